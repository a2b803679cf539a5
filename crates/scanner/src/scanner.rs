//! Per-resource check cycle.
//!
//! Each entry point runs one cycle for one named resource:
//!
//! ```text
//! lookup -> pause check -> interval -> lease -> config -> check -> persist
//! ```
//!
//! Lookup, pause, and interval failures end the cycle before any lease is
//! attempted. Once a lease is held it is released exactly once, whichever step
//! fails, including on panic.

use crate::clock::Clock;
use crate::error::{ScanError, ScanResult};
use crate::metrics;
use crate::ports::{
    CheckRequest, CheckerFactory, ENV_EXTERNAL_URL, ENV_PIPELINE_NAME, ENV_RESOURCE_NAME, Lease,
    PipelineStore, VersionRepository,
};
use futures::FutureExt;
use lookout_core::config::ScannerConfig;
use lookout_core::{
    Resource, ResourceConfigDescriptor, ResourceUser, Version, VersionedResourceType,
    parse_check_interval,
};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where a check starts from.
#[derive(Debug, Clone)]
enum FromVersion {
    /// The latest version in the repository.
    Latest,
    /// A caller-supplied version; `None` is the beginning.
    Given(Option<Version>),
}

/// Scanner settings resolved from [`ScannerConfig`].
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub default_interval: Duration,
    pub lock_retry_interval: Duration,
    pub external_url: String,
}

impl From<&ScannerConfig> for ScannerSettings {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            default_interval: config.default_check_interval(),
            lock_retry_interval: config.lock_retry_interval(),
            external_url: config.external_url.clone(),
        }
    }
}

/// Checks one pipeline's resources.
pub struct ResourceScanner {
    clock: Arc<dyn Clock>,
    checkers: Arc<dyn CheckerFactory>,
    versions: Arc<dyn VersionRepository>,
    pipeline: Arc<dyn PipelineStore>,
    settings: ScannerSettings,
    cancel: CancellationToken,
}

impl ResourceScanner {
    pub fn new(
        clock: Arc<dyn Clock>,
        checkers: Arc<dyn CheckerFactory>,
        versions: Arc<dyn VersionRepository>,
        pipeline: Arc<dyn PipelineStore>,
        settings: ScannerSettings,
    ) -> Self {
        Self {
            clock,
            checkers,
            versions,
            pipeline,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Forward `cancel` to every checker and stop `scan` polling once it
    /// fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn default_interval(&self) -> Duration {
        self.settings.default_interval
    }

    pub fn pipeline(&self) -> &Arc<dyn PipelineStore> {
        &self.pipeline
    }

    /// Periodic check. Returns the interval to wait before the next run
    /// together with the outcome.
    ///
    /// - paused pipeline or resource: default interval, `Ok`
    /// - unparsable `check_every`: default interval, error recorded and returned
    /// - lease taken: effective interval, [`ScanError::FailedToAcquireLock`]
    /// - script failure: effective interval, recorded but `Ok`
    #[tracing::instrument(skip(self), fields(resource = %self.versions.scoped_name(name)))]
    pub async fn run(&self, name: &str) -> (Duration, ScanResult<()>) {
        let default = self.settings.default_interval;

        let resource = match self.prepare(name).await {
            Ok(Some(resource)) => resource,
            Ok(None) => return (default, Ok(())),
            Err(err) => return (default, Err(err)),
        };

        let interval = match self.effective_interval(&resource).await {
            Ok(interval) => interval,
            Err(err) => return (default, Err(err)),
        };

        let lease = match self
            .pipeline
            .acquire_checking_lock(&resource, interval, false)
            .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                metrics::LOCK_CONTENTION.inc();
                tracing::debug!(interval_ms = interval.as_millis() as u64, "checking lock held elsewhere");
                return (interval, Err(ScanError::FailedToAcquireLock));
            }
            Err(err) => return (interval, Err(err)),
        };

        let result = self
            .with_lease(lease, self.check(&resource, FromVersion::Latest))
            .await;

        match result {
            Err(err) if err.is_script_failure() => {
                tracing::info!(error = %err, "check script failed");
                (interval, Ok(()))
            }
            result => (interval, result),
        }
    }

    /// Manual check from the latest known version. Polls for the lease until
    /// it is granted; script failures are returned.
    #[tracing::instrument(skip(self), fields(resource = %self.versions.scoped_name(name)))]
    pub async fn scan(&self, name: &str) -> ScanResult<()> {
        self.scan_from(name, FromVersion::Latest).await
    }

    /// Like [`scan`](Self::scan), checking from `from` instead of the latest
    /// known version. `None` checks from the beginning.
    #[tracing::instrument(skip(self, from), fields(resource = %self.versions.scoped_name(name)))]
    pub async fn scan_from_version(&self, name: &str, from: Option<Version>) -> ScanResult<()> {
        self.scan_from(name, FromVersion::Given(from)).await
    }

    async fn scan_from(&self, name: &str, from: FromVersion) -> ScanResult<()> {
        let Some(resource) = self.prepare(name).await? else {
            return Ok(());
        };
        let interval = self.effective_interval(&resource).await?;

        let lease = loop {
            if let Some(lease) = self
                .pipeline
                .acquire_checking_lock(&resource, interval, true)
                .await?
            {
                break lease;
            }
            metrics::LOCK_CONTENTION.inc();
            if self.cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            tracing::debug!(
                retry_ms = self.settings.lock_retry_interval.as_millis() as u64,
                "checking lock held elsewhere, retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ScanError::Cancelled),
                _ = self.clock.sleep(self.settings.lock_retry_interval) => {}
            }
        };

        self.with_lease(lease, self.check(&resource, from)).await
    }

    /// Look up the resource and evaluate pause state. `None` means paused.
    async fn prepare(&self, name: &str) -> ScanResult<Option<Resource>> {
        let resource = self
            .pipeline
            .resource(name)
            .await?
            .ok_or_else(|| ScanError::ResourceNotFound(name.to_string()))?;

        if self.versions.is_paused().await? {
            tracing::debug!("pipeline paused");
            return Ok(None);
        }
        if resource.paused {
            tracing::debug!("resource paused");
            return Ok(None);
        }
        Ok(Some(resource))
    }

    async fn effective_interval(&self, resource: &Resource) -> ScanResult<Duration> {
        let Some(check_every) = resource.check_every.as_deref() else {
            return Ok(self.settings.default_interval);
        };
        match parse_check_interval(check_every) {
            Ok(interval) => Ok(interval),
            Err(err) => {
                tracing::warn!(error = %err, "invalid check interval");
                self.record_check_error(resource, Some(err.to_string())).await;
                Err(err.into())
            }
        }
    }

    async fn with_lease<T>(
        &self,
        lease: Box<dyn Lease>,
        work: impl Future<Output = ScanResult<T>>,
    ) -> ScanResult<T> {
        let outcome = AssertUnwindSafe(work).catch_unwind().await;
        if let Err(err) = lease.release().await {
            tracing::warn!(error = %err, "failed to release checking lock");
        }
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn check(&self, resource: &Resource, from: FromVersion) -> ScanResult<()> {
        let custom_types: Vec<VersionedResourceType> = self
            .pipeline
            .resource_types()
            .await?
            .iter()
            .map(VersionedResourceType::from)
            .collect();

        let used = match self.resolve_config(resource, &custom_types).await {
            Ok(used) => used,
            Err(err) => {
                tracing::error!(error = %err, "failed to resolve resource config");
                self.record_check_error(resource, Some(err.to_string())).await;
                return Err(err);
            }
        };

        let from = match from {
            FromVersion::Latest => self.versions.latest_version(resource).await?,
            FromVersion::Given(version) => version,
        };

        let request = CheckRequest {
            user: ResourceUser::Resource(resource.id),
            resource_config_id: used.id,
            resource_type: resource.type_name.clone(),
            source: resource.source.clone(),
            tags: resource.tags.clone(),
            team_id: self.pipeline.team_id(),
            env: vec![
                format!("{ENV_EXTERNAL_URL}={}", self.settings.external_url),
                format!("{ENV_PIPELINE_NAME}={}", self.pipeline.pipeline_name()),
                format!("{ENV_RESOURCE_NAME}={}", resource.name),
            ],
            custom_types,
        };

        metrics::CHECKS_STARTED.inc();
        tracing::debug!(config_id = used.id, from = ?from, "checking");

        let checked = match self.checkers.new_check_resource(request).await {
            Ok(checker) => {
                checker
                    .check(&resource.source, from.as_ref(), &self.cancel)
                    .await
            }
            Err(err) => Err(err),
        };

        let versions = match checked {
            Ok(versions) => versions,
            Err(err) => {
                metrics::record_check_failure(err.kind());
                if !err.is_script_failure() {
                    tracing::error!(error = %err, "check failed");
                }
                self.record_check_error(resource, Some(err.to_string())).await;
                return Err(err.into());
            }
        };

        self.record_check_error(resource, None).await;

        if versions.is_empty() || (versions.len() == 1 && from.as_ref() == Some(&versions[0])) {
            tracing::debug!("no new versions");
            return Ok(());
        }

        tracing::info!(count = versions.len(), "found new versions");
        match self
            .versions
            .save_resource_versions(resource, &versions)
            .await
        {
            Ok(()) => metrics::VERSIONS_SAVED.inc_by(versions.len() as u64),
            Err(err) => tracing::error!(error = %err, "failed to save versions"),
        }

        Ok(())
    }

    async fn resolve_config(
        &self,
        resource: &Resource,
        custom_types: &[VersionedResourceType],
    ) -> ScanResult<lookout_metadata::models::UsedResourceConfig> {
        let descriptor = ResourceConfigDescriptor::for_resource_type(
            &resource.type_name,
            resource.source.clone(),
            custom_types,
        )?;
        self.pipeline
            .find_or_create_resource_config(resource, &descriptor)
            .await
    }

    async fn record_check_error(&self, resource: &Resource, error: Option<String>) {
        if let Err(err) = self
            .pipeline
            .set_resource_check_error(resource, error.as_deref())
            .await
        {
            tracing::error!(error = %err, "failed to record check error");
        }
    }
}
