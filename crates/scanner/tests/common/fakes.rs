//! Hand-written fakes of the scanner's collaborators.

use async_trait::async_trait;
use lookout_core::{
    Resource, ResourceConfigDescriptor, ResourceType, Source, Version,
};
use lookout_metadata::MetadataError;
use lookout_metadata::models::{UsedBaseResourceType, UsedConfigParent, UsedResourceConfig};
use lookout_scanner::{
    CheckError, CheckRequest, Checker, CheckerFactory, Lease, PipelineStore, ScanError,
    ScanResult, VersionRepository,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const TEAM_ID: i64 = 123;
pub const PIPELINE_NAME: &str = "some-pipeline";
pub const RESOURCE_NAME: &str = "some-resource";
pub const CONFIG_ID: i64 = 7;

#[allow(dead_code)]
pub fn version(v: &str) -> Version {
    [("version", v)].into_iter().collect()
}

pub fn some_resource() -> Resource {
    Resource {
        id: 39,
        name: RESOURCE_NAME.to_string(),
        pipeline_id: 42,
        pipeline_name: PIPELINE_NAME.to_string(),
        type_name: "git".to_string(),
        source: Source::new().with("uri", "http://example.com"),
        check_every: None,
        tags: vec!["some-tag".to_string()],
        check_error: None,
        paused: false,
    }
}

pub fn some_resource_type() -> ResourceType {
    ResourceType {
        id: 1,
        name: "some-custom-resource".to_string(),
        pipeline_id: 42,
        type_name: "docker-image".to_string(),
        source: Source::new().with("custom", "source"),
        check_every: None,
        tags: Vec::new(),
        version: Some([("custom", "version")].into_iter().collect()),
    }
}

fn failure(message: &str) -> ScanError {
    ScanError::Metadata(MetadataError::Internal(message.to_string()))
}

/// Counts releases.
pub struct FakeLease {
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl Lease for FakeLease {
    async fn release(&self) -> ScanResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A lease probe as seen by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct LockCall {
    pub resource: String,
    pub interval: Duration,
    pub immediate: bool,
}

pub struct FakePipeline {
    pub resources: Mutex<BTreeMap<String, Resource>>,
    pub resource_error: Mutex<Option<String>>,
    pub types: Mutex<Vec<ResourceType>>,
    /// Scripted probe outcomes, consumed in order; `lock_default` afterwards.
    pub lock_results: Mutex<VecDeque<bool>>,
    pub lock_default: AtomicBool,
    pub lock_calls: Mutex<Vec<LockCall>>,
    pub releases: Arc<AtomicUsize>,
    pub check_errors: Mutex<Vec<(String, Option<String>)>>,
    pub descriptors: Mutex<Vec<ResourceConfigDescriptor>>,
}

impl FakePipeline {
    pub fn new() -> Self {
        let resource = some_resource();
        Self {
            resources: Mutex::new(BTreeMap::from([(resource.name.clone(), resource)])),
            resource_error: Mutex::new(None),
            types: Mutex::new(vec![some_resource_type()]),
            lock_results: Mutex::new(VecDeque::new()),
            lock_default: AtomicBool::new(true),
            lock_calls: Mutex::new(Vec::new()),
            releases: Arc::new(AtomicUsize::new(0)),
            check_errors: Mutex::new(Vec::new()),
            descriptors: Mutex::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn update_resource(&self, f: impl FnOnce(&mut Resource)) {
        let mut resources = self.resources.lock().unwrap();
        f(resources.get_mut(RESOURCE_NAME).expect("resource seeded"));
    }

    #[allow(dead_code)]
    pub fn script_locks(&self, results: &[bool]) {
        self.lock_results.lock().unwrap().extend(results.iter().copied());
    }

    pub fn lock_calls(&self) -> Vec<LockCall> {
        self.lock_calls.lock().unwrap().clone()
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn check_errors(&self) -> Vec<(String, Option<String>)> {
        self.check_errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineStore for FakePipeline {
    fn pipeline_name(&self) -> &str {
        PIPELINE_NAME
    }

    fn team_id(&self) -> i64 {
        TEAM_ID
    }

    async fn resource(&self, name: &str) -> ScanResult<Option<Resource>> {
        if let Some(message) = self.resource_error.lock().unwrap().clone() {
            return Err(failure(&message));
        }
        Ok(self.resources.lock().unwrap().get(name).cloned())
    }

    async fn resource_names(&self) -> ScanResult<Vec<String>> {
        Ok(self.resources.lock().unwrap().keys().cloned().collect())
    }

    async fn resource_types(&self) -> ScanResult<Vec<ResourceType>> {
        Ok(self.types.lock().unwrap().clone())
    }

    async fn acquire_checking_lock(
        &self,
        resource: &Resource,
        interval: Duration,
        immediate: bool,
    ) -> ScanResult<Option<Box<dyn Lease>>> {
        self.lock_calls.lock().unwrap().push(LockCall {
            resource: resource.name.clone(),
            interval,
            immediate,
        });
        let granted = self
            .lock_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.lock_default.load(Ordering::SeqCst));
        Ok(granted.then(|| {
            Box::new(FakeLease {
                releases: self.releases.clone(),
            }) as Box<dyn Lease>
        }))
    }

    async fn set_resource_check_error(
        &self,
        resource: &Resource,
        error: Option<&str>,
    ) -> ScanResult<()> {
        self.check_errors
            .lock()
            .unwrap()
            .push((resource.name.clone(), error.map(str::to_string)));
        Ok(())
    }

    async fn find_or_create_resource_config(
        &self,
        _resource: &Resource,
        descriptor: &ResourceConfigDescriptor,
    ) -> ScanResult<UsedResourceConfig> {
        self.descriptors.lock().unwrap().push(descriptor.clone());
        Ok(UsedResourceConfig {
            id: CONFIG_ID,
            created_by: UsedConfigParent::BaseResourceType(UsedBaseResourceType {
                id: 1,
                name: "git".to_string(),
            }),
        })
    }
}

#[derive(Default)]
pub struct FakeVersions {
    pub paused: AtomicBool,
    pub paused_error: Mutex<Option<String>>,
    pub latest: Mutex<Option<Version>>,
    pub latest_error: Mutex<Option<String>>,
    pub saved: Mutex<Vec<Vec<Version>>>,
    pub fail_saves: AtomicBool,
}

impl FakeVersions {
    pub fn saved(&self) -> Vec<Vec<Version>> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl VersionRepository for FakeVersions {
    async fn is_paused(&self) -> ScanResult<bool> {
        if let Some(message) = self.paused_error.lock().unwrap().clone() {
            return Err(failure(&message));
        }
        Ok(self.paused.load(Ordering::SeqCst))
    }

    async fn latest_version(&self, _resource: &Resource) -> ScanResult<Option<Version>> {
        if let Some(message) = self.latest_error.lock().unwrap().clone() {
            return Err(failure(&message));
        }
        Ok(self.latest.lock().unwrap().clone())
    }

    async fn save_resource_versions(
        &self,
        _resource: &Resource,
        versions: &[Version],
    ) -> ScanResult<()> {
        self.saved.lock().unwrap().push(versions.to_vec());
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(failure("failed"));
        }
        Ok(())
    }

    fn scoped_name(&self, name: &str) -> String {
        format!("pipeline:{name}")
    }
}

/// Shared state between the factory and the checkers it hands out.
#[derive(Default)]
pub struct CheckState {
    pub requests: Mutex<Vec<CheckRequest>>,
    pub checked_from: Mutex<Vec<Option<Version>>>,
    pub result: Mutex<Option<Result<Vec<Version>, CheckError>>>,
    pub panic: AtomicBool,
    pub saw_cancel: AtomicBool,
}

#[derive(Default)]
pub struct FakeCheckerFactory {
    pub state: Arc<CheckState>,
}

impl FakeCheckerFactory {
    #[allow(dead_code)]
    pub fn returns(&self, result: Result<Vec<Version>, CheckError>) {
        *self.state.result.lock().unwrap() = Some(result);
    }

    pub fn requests(&self) -> Vec<CheckRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn checked_from(&self) -> Vec<Option<Version>> {
        self.state.checked_from.lock().unwrap().clone()
    }

    pub fn check_count(&self) -> usize {
        self.state.checked_from.lock().unwrap().len()
    }
}

#[async_trait]
impl CheckerFactory for FakeCheckerFactory {
    async fn new_check_resource(
        &self,
        request: CheckRequest,
    ) -> Result<Box<dyn Checker>, CheckError> {
        self.state.requests.lock().unwrap().push(request);
        Ok(Box::new(FakeChecker {
            state: self.state.clone(),
        }))
    }
}

pub struct FakeChecker {
    state: Arc<CheckState>,
}

#[async_trait]
impl Checker for FakeChecker {
    async fn check(
        &self,
        _source: &Source,
        from: Option<&Version>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Version>, CheckError> {
        self.state.checked_from.lock().unwrap().push(from.cloned());
        if cancel.is_cancelled() {
            self.state.saw_cancel.store(true, Ordering::SeqCst);
        }
        if self.state.panic.load(Ordering::SeqCst) {
            panic!("checker exploded");
        }
        self.state
            .result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[allow(dead_code)]
pub fn script_failure() -> CheckError {
    CheckError::ScriptFailed {
        script: "/opt/resource/check".to_string(),
        exit_status: 1,
        stderr: "some stderr".to_string(),
    }
}
