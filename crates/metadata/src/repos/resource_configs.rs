//! Resource config identities and their usage ledger.

use crate::error::MetadataResult;
use crate::models::{
    ResourceConfigRow, ResourceConfigUseRow, UsedResourceCache, UsedResourceConfig,
};
use async_trait::async_trait;
use lookout_core::{ResourceCacheDescriptor, ResourceConfigDescriptor, ResourceUser};

/// Content-addressed find-or-create for config identities.
///
/// The store never deletes a config; an external collector does so once a
/// config has no usage edges. Any write racing with such a deletion fails with
/// `RetryableConflict`.
#[async_trait]
pub trait ResourceConfigRepo: Send + Sync {
    /// Resolve the descriptor's whole parent chain to persisted identities in
    /// one transaction, recording a usage edge for `user` at every level.
    ///
    /// Errors:
    /// - `BaseResourceTypeNotFound` if the chain's base type is not registered
    /// - `RetryableConflict` on a unique or foreign-key race
    /// - `UserDisappeared` if `user` no longer exists
    async fn find_or_create_resource_config(
        &self,
        descriptor: &ResourceConfigDescriptor,
        user: ResourceUser,
    ) -> MetadataResult<UsedResourceConfig>;

    /// Like [`find_or_create_resource_config`](Self::find_or_create_resource_config)
    /// for a cache and the config it was produced from.
    async fn find_or_create_resource_cache(
        &self,
        descriptor: &ResourceCacheDescriptor,
        user: ResourceUser,
    ) -> MetadataResult<UsedResourceCache>;

    async fn get_resource_config(&self, config_id: i64)
    -> MetadataResult<Option<ResourceConfigRow>>;

    async fn list_resource_config_uses(
        &self,
        config_id: i64,
    ) -> MetadataResult<Vec<ResourceConfigUseRow>>;

    async fn count_resource_config_uses(&self, config_id: i64) -> MetadataResult<u64>;

    /// Configs with no usage edges, oldest first. Collector input.
    async fn list_unused_resource_configs(&self) -> MetadataResult<Vec<ResourceConfigRow>>;

    /// Drop one usage edge. Returns whether an edge was removed.
    async fn release_resource_config_use(
        &self,
        config_id: i64,
        user: ResourceUser,
    ) -> MetadataResult<bool>;
}
