//! Build repository.

use crate::error::MetadataResult;
use crate::models::BuildRow;
use async_trait::async_trait;

#[async_trait]
pub trait BuildRepo: Send + Sync {
    async fn create_build(
        &self,
        team_id: i64,
        pipeline_id: Option<i64>,
        name: &str,
    ) -> MetadataResult<BuildRow>;

    async fn get_build(&self, build_id: i64) -> MetadataResult<Option<BuildRow>>;

    /// Delete a build. Its usage edges go with it.
    async fn delete_build(&self, build_id: i64) -> MetadataResult<()>;
}
