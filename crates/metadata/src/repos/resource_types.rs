//! Pipeline-defined resource type repository.

use crate::error::MetadataResult;
use crate::models::ResourceTypeRow;
use async_trait::async_trait;
use lookout_core::{ResourceDefinition, Version};

#[async_trait]
pub trait ResourceTypeRepo: Send + Sync {
    /// Insert or update a resource type's definition. The stored version is
    /// kept.
    async fn save_resource_type(
        &self,
        pipeline_id: i64,
        name: &str,
        definition: &ResourceDefinition,
    ) -> MetadataResult<ResourceTypeRow>;

    /// List active resource types ordered by name.
    async fn list_resource_types(&self, pipeline_id: i64) -> MetadataResult<Vec<ResourceTypeRow>>;

    /// Record the current version of the type's own image.
    async fn set_resource_type_version(
        &self,
        resource_type_id: i64,
        version: &Version,
    ) -> MetadataResult<()>;
}
