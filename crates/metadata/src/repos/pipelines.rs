//! Team and pipeline repository.

use crate::error::MetadataResult;
use crate::models::{PipelineRow, TeamRow};
use async_trait::async_trait;

#[async_trait]
pub trait PipelineRepo: Send + Sync {
    /// Create a team. Fails with `AlreadyExists` if the name is taken.
    async fn create_team(&self, name: &str) -> MetadataResult<TeamRow>;

    async fn get_team(&self, team_id: i64) -> MetadataResult<Option<TeamRow>>;

    /// Create a pipeline owned by a team.
    async fn create_pipeline(&self, team_id: i64, name: &str) -> MetadataResult<PipelineRow>;

    async fn get_pipeline(&self, pipeline_id: i64) -> MetadataResult<Option<PipelineRow>>;

    async fn get_pipeline_by_name(
        &self,
        team_id: i64,
        name: &str,
    ) -> MetadataResult<Option<PipelineRow>>;

    async fn set_pipeline_paused(&self, pipeline_id: i64, paused: bool) -> MetadataResult<()>;
}
