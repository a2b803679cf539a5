//! Scanner collaborators backed by a [`MetadataStore`].

use crate::clock::Clock;
use crate::error::ScanResult;
use crate::ports::{CheckerFactory, Lease, PipelineStore, VersionRepository};
use crate::scanner::{ResourceScanner, ScannerSettings};
use async_trait::async_trait;
use lookout_core::config::ScannerConfig;
use lookout_core::{
    Resource, ResourceConfigDescriptor, ResourceType, ResourceUser, Version,
};
use lookout_metadata::models::{CheckingLease, PipelineRow, UsedResourceConfig};
use lookout_metadata::{MetadataError, MetadataStore, safe_find_or_create};
use std::sync::Arc;
use std::time::Duration;

/// A lease row held in the metadata store.
pub struct DbLease {
    store: Arc<dyn MetadataStore>,
    lease: CheckingLease,
}

#[async_trait]
impl Lease for DbLease {
    async fn release(&self) -> ScanResult<()> {
        let released = self.store.release_checking_lease(&self.lease).await?;
        if !released {
            tracing::warn!(
                resource_id = self.lease.resource_id,
                "checking lease expired before release"
            );
        }
        Ok(())
    }
}

/// One pipeline as seen from the metadata store.
pub struct DbPipeline {
    store: Arc<dyn MetadataStore>,
    pipeline: PipelineRow,
    find_or_create_max_attempts: u32,
}

impl DbPipeline {
    pub async fn load(
        store: Arc<dyn MetadataStore>,
        pipeline_id: i64,
        find_or_create_max_attempts: u32,
    ) -> ScanResult<Self> {
        let pipeline = store
            .get_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("pipeline {pipeline_id}")))?;
        Ok(Self {
            store,
            pipeline,
            find_or_create_max_attempts,
        })
    }

    pub fn pipeline_id(&self) -> i64 {
        self.pipeline.id
    }
}

#[async_trait]
impl PipelineStore for DbPipeline {
    fn pipeline_name(&self) -> &str {
        &self.pipeline.name
    }

    fn team_id(&self) -> i64 {
        self.pipeline.team_id
    }

    async fn resource(&self, name: &str) -> ScanResult<Option<Resource>> {
        match self.store.get_resource(self.pipeline.id, name).await? {
            Some(row) => Ok(Some(row.into_resource()?)),
            None => Ok(None),
        }
    }

    async fn resource_names(&self) -> ScanResult<Vec<String>> {
        let rows = self.store.list_resources(self.pipeline.id).await?;
        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    async fn resource_types(&self) -> ScanResult<Vec<ResourceType>> {
        let rows = self.store.list_resource_types(self.pipeline.id).await?;
        let types = rows
            .into_iter()
            .map(|row| row.into_resource_type())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(types)
    }

    async fn acquire_checking_lock(
        &self,
        resource: &Resource,
        interval: Duration,
        immediate: bool,
    ) -> ScanResult<Option<Box<dyn Lease>>> {
        let lease = self
            .store
            .acquire_checking_lease(resource.id, interval, immediate)
            .await?;
        Ok(lease.map(|lease| {
            Box::new(DbLease {
                store: self.store.clone(),
                lease,
            }) as Box<dyn Lease>
        }))
    }

    async fn set_resource_check_error(
        &self,
        resource: &Resource,
        error: Option<&str>,
    ) -> ScanResult<()> {
        self.store
            .set_resource_check_error(resource.id, error)
            .await?;
        Ok(())
    }

    async fn find_or_create_resource_config(
        &self,
        resource: &Resource,
        descriptor: &ResourceConfigDescriptor,
    ) -> ScanResult<UsedResourceConfig> {
        let user = ResourceUser::Resource(resource.id);
        let used = safe_find_or_create(self.find_or_create_max_attempts, || {
            self.store.find_or_create_resource_config(descriptor, user)
        })
        .await?;
        Ok(used)
    }
}

/// Version history and pause state of one pipeline.
pub struct DbVersions {
    store: Arc<dyn MetadataStore>,
    pipeline_id: i64,
    pipeline_name: String,
}

impl DbVersions {
    pub fn new(store: Arc<dyn MetadataStore>, pipeline_id: i64, pipeline_name: String) -> Self {
        Self {
            store,
            pipeline_id,
            pipeline_name,
        }
    }
}

#[async_trait]
impl VersionRepository for DbVersions {
    async fn is_paused(&self) -> ScanResult<bool> {
        let pipeline = self
            .store
            .get_pipeline(self.pipeline_id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("pipeline {}", self.pipeline_id)))?;
        Ok(pipeline.paused)
    }

    async fn latest_version(&self, resource: &Resource) -> ScanResult<Option<Version>> {
        match self.store.get_latest_version(resource.id).await? {
            Some(row) => Ok(Some(row.version()?)),
            None => Ok(None),
        }
    }

    async fn save_resource_versions(
        &self,
        resource: &Resource,
        versions: &[Version],
    ) -> ScanResult<()> {
        self.store
            .save_resource_versions(resource.id, versions)
            .await?;
        Ok(())
    }

    fn scoped_name(&self, name: &str) -> String {
        format!("{}:{}", self.pipeline_name, name)
    }
}

/// Build a scanner for one pipeline of `store`.
pub async fn pipeline_scanner(
    store: Arc<dyn MetadataStore>,
    pipeline_id: i64,
    checkers: Arc<dyn CheckerFactory>,
    clock: Arc<dyn Clock>,
    config: &ScannerConfig,
) -> ScanResult<ResourceScanner> {
    let pipeline = DbPipeline::load(
        store.clone(),
        pipeline_id,
        config.find_or_create_max_attempts,
    )
    .await?;
    let versions = DbVersions::new(store, pipeline_id, pipeline.pipeline_name().to_string());
    Ok(ResourceScanner::new(
        clock,
        checkers,
        Arc::new(versions),
        Arc::new(pipeline),
        ScannerSettings::from(config),
    ))
}
