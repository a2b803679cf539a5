//! Collaborators consumed by the scanner.
//!
//! The scanner owns no state of its own; everything it reads or writes goes
//! through these traits. [`crate::db`] implements the storage-facing ones on
//! top of a [`lookout_metadata::MetadataStore`]. Check execution is always
//! supplied by the embedding process.

use crate::error::{CheckError, ScanResult};
use async_trait::async_trait;
use lookout_core::{
    Resource, ResourceConfigDescriptor, ResourceType, ResourceUser, Source, Version,
    VersionedResourceType,
};
use lookout_metadata::models::UsedResourceConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Environment variable carrying the externally reachable URL.
pub const ENV_EXTERNAL_URL: &str = "EXTERNAL_URL";
/// Environment variable carrying the owning pipeline's name.
pub const ENV_PIPELINE_NAME: &str = "RESOURCE_PIPELINE_NAME";
/// Environment variable carrying the resource's name.
pub const ENV_RESOURCE_NAME: &str = "RESOURCE_NAME";

/// A held checking lease.
#[async_trait]
pub trait Lease: Send + Sync {
    async fn release(&self) -> ScanResult<()>;
}

/// One pipeline's resources, types, and checking leases.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    fn pipeline_name(&self) -> &str;

    fn team_id(&self) -> i64;

    /// Look up an active resource by name.
    async fn resource(&self, name: &str) -> ScanResult<Option<Resource>>;

    /// Names of all active resources, for the radar.
    async fn resource_names(&self) -> ScanResult<Vec<String>>;

    async fn resource_types(&self) -> ScanResult<Vec<ResourceType>>;

    /// Single non-blocking probe. `None` means another holder has the lease
    /// or, unless `immediate`, the resource was checked less than `interval`
    /// ago.
    async fn acquire_checking_lock(
        &self,
        resource: &Resource,
        interval: Duration,
        immediate: bool,
    ) -> ScanResult<Option<Box<dyn Lease>>>;

    /// Record (or with `None`, clear) the resource's check error.
    async fn set_resource_check_error(
        &self,
        resource: &Resource,
        error: Option<&str>,
    ) -> ScanResult<()>;

    /// Resolve the config identity checked for `resource`, recording the
    /// resource as a user of it.
    async fn find_or_create_resource_config(
        &self,
        resource: &Resource,
        descriptor: &ResourceConfigDescriptor,
    ) -> ScanResult<UsedResourceConfig>;
}

/// Discovered versions and the pipeline's pause state.
#[async_trait]
pub trait VersionRepository: Send + Sync {
    async fn is_paused(&self) -> ScanResult<bool>;

    async fn latest_version(&self, resource: &Resource) -> ScanResult<Option<Version>>;

    /// Persist versions in the order given; the newest is last.
    async fn save_resource_versions(
        &self,
        resource: &Resource,
        versions: &[Version],
    ) -> ScanResult<()>;

    /// Namespace a name for logs and metrics.
    fn scoped_name(&self, name: &str) -> String;
}

/// Everything needed to provision a checker for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRequest {
    pub user: ResourceUser,
    pub resource_config_id: i64,
    pub resource_type: String,
    pub source: Source,
    pub tags: Vec<String>,
    pub team_id: i64,
    pub env: Vec<String>,
    pub custom_types: Vec<VersionedResourceType>,
}

/// Builds checkers. Constructed once at startup and shared.
#[async_trait]
pub trait CheckerFactory: Send + Sync {
    async fn new_check_resource(
        &self,
        request: CheckRequest,
    ) -> Result<Box<dyn Checker>, CheckError>;
}

/// Runs a resource's check against its source.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Versions newer than `from`, oldest first. `None` checks from the
    /// beginning. `cancel` is forwarded as-is; honouring it is up to the
    /// implementation.
    async fn check(
        &self,
        source: &Source,
        from: Option<&Version>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Version>, CheckError>;
}
