//! Worker-provided base resource types.

use crate::error::MetadataResult;
use crate::models::BaseResourceTypeRow;
use async_trait::async_trait;

#[async_trait]
pub trait BaseResourceTypeRepo: Send + Sync {
    /// Register a base type advertised by a worker. Idempotent.
    async fn save_base_resource_type(&self, name: &str) -> MetadataResult<BaseResourceTypeRow>;

    async fn get_base_resource_type(&self, name: &str)
    -> MetadataResult<Option<BaseResourceTypeRow>>;
}
