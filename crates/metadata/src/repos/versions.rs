//! Discovered resource versions.

use crate::error::MetadataResult;
use crate::models::VersionedResourceRow;
use async_trait::async_trait;
use lookout_core::Version;

#[async_trait]
pub trait VersionRepo: Send + Sync {
    /// Save versions in the given order, in one transaction.
    ///
    /// Each version is upserted by its hash and assigned the next
    /// `check_order`, so re-saving a known version makes it the latest.
    async fn save_resource_versions(
        &self,
        resource_id: i64,
        versions: &[Version],
    ) -> MetadataResult<()>;

    /// The version with the highest `check_order`.
    async fn get_latest_version(
        &self,
        resource_id: i64,
    ) -> MetadataResult<Option<VersionedResourceRow>>;

    /// All versions ordered by `check_order`.
    async fn list_versions(&self, resource_id: i64) -> MetadataResult<Vec<VersionedResourceRow>>;
}
