//! Resource repository.

use crate::error::MetadataResult;
use crate::models::ResourceRow;
use async_trait::async_trait;
use lookout_core::ResourceDefinition;

#[async_trait]
pub trait ResourceRepo: Send + Sync {
    /// Insert or update a resource's definition, reactivating it if it had
    /// been removed from the pipeline.
    async fn save_resource(
        &self,
        pipeline_id: i64,
        name: &str,
        definition: &ResourceDefinition,
    ) -> MetadataResult<ResourceRow>;

    /// Get an active resource by name.
    async fn get_resource(&self, pipeline_id: i64, name: &str)
    -> MetadataResult<Option<ResourceRow>>;

    async fn get_resource_by_id(&self, resource_id: i64) -> MetadataResult<Option<ResourceRow>>;

    /// List active resources ordered by name.
    async fn list_resources(&self, pipeline_id: i64) -> MetadataResult<Vec<ResourceRow>>;

    async fn set_resource_paused(&self, resource_id: i64, paused: bool) -> MetadataResult<()>;

    /// Record or clear (`None`) the resource's check error.
    async fn set_resource_check_error(
        &self,
        resource_id: i64,
        check_error: Option<&str>,
    ) -> MetadataResult<()>;

    /// Mark a resource as removed from its pipeline. The row and its usage
    /// edges are kept.
    async fn deactivate_resource(&self, resource_id: i64) -> MetadataResult<()>;
}
