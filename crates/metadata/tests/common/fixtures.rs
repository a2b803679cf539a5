//! Test fixtures for seeding pipelines, resources, and builds.

use lookout_core::{ResourceConfigDescriptor, ResourceDefinition, Source, Version};
use lookout_metadata::MetadataStore;
use lookout_metadata::models::{BuildRow, PipelineRow, ResourceRow};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique team names.
static TEAM_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A team with one pipeline.
#[allow(dead_code)]
pub struct Seeded {
    pub team_id: i64,
    pub pipeline: PipelineRow,
}

/// Create a uniquely named team and a pipeline in it.
#[allow(dead_code)]
pub async fn seed_pipeline(store: &dyn MetadataStore, name: &str) -> Seeded {
    let n = TEAM_COUNTER.fetch_add(1, Ordering::Relaxed);
    let team = store
        .create_team(&format!("team-{n}"))
        .await
        .expect("create team");
    let pipeline = store
        .create_pipeline(team.id, name)
        .await
        .expect("create pipeline");
    Seeded {
        team_id: team.id,
        pipeline,
    }
}

/// A git resource definition pointing at `uri`.
#[allow(dead_code)]
pub fn git_definition(uri: &str) -> ResourceDefinition {
    ResourceDefinition {
        type_name: "git".to_string(),
        source: git_source(uri),
        check_every: None,
        tags: Vec::new(),
    }
}

#[allow(dead_code)]
pub fn git_source(uri: &str) -> Source {
    Source::new().with("uri", uri)
}

/// A config descriptor on the `git` base type.
#[allow(dead_code)]
pub fn git_config(uri: &str) -> ResourceConfigDescriptor {
    ResourceConfigDescriptor::base("git", git_source(uri))
}

#[allow(dead_code)]
pub fn version(v: &str) -> Version {
    [("ref", v)].into_iter().collect()
}

#[allow(dead_code)]
pub async fn seed_resource(store: &dyn MetadataStore, pipeline_id: i64, name: &str) -> ResourceRow {
    store
        .save_resource(pipeline_id, name, &git_definition("https://example.com/repo.git"))
        .await
        .expect("save resource")
}

#[allow(dead_code)]
pub async fn seed_builds(store: &dyn MetadataStore, seeded: &Seeded, count: usize) -> Vec<BuildRow> {
    let mut builds = Vec::with_capacity(count);
    for i in 0..count {
        let build = store
            .create_build(seeded.team_id, Some(seeded.pipeline.id), &format!("{}", i + 1))
            .await
            .expect("create build");
        builds.push(build);
    }
    builds
}
