//! Common test utilities and fixtures.

pub mod fakes;

#[allow(unused_imports)]
pub use fakes::*;

use lookout_scanner::{FakeClock, ResourceScanner, ScannerSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[allow(dead_code)]
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
#[allow(dead_code)]
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(1);
#[allow(dead_code)]
pub const EXTERNAL_URL: &str = "https://www.example.com";

#[allow(dead_code)]
pub fn settings() -> ScannerSettings {
    ScannerSettings {
        default_interval: DEFAULT_INTERVAL,
        lock_retry_interval: LOCK_RETRY_INTERVAL,
        external_url: EXTERNAL_URL.to_string(),
    }
}

/// A scanner wired to fakes, with handles on every fake.
#[allow(dead_code)]
pub struct Harness {
    pub pipeline: Arc<FakePipeline>,
    pub versions: Arc<FakeVersions>,
    pub checkers: Arc<FakeCheckerFactory>,
    pub clock: Arc<FakeClock>,
    pub cancel: CancellationToken,
    pub scanner: ResourceScanner,
}

impl Harness {
    #[allow(dead_code)]
    pub fn new() -> Self {
        let pipeline = Arc::new(FakePipeline::new());
        let versions = Arc::new(FakeVersions::default());
        let checkers = Arc::new(FakeCheckerFactory::default());
        let clock = Arc::new(FakeClock::new());
        let cancel = CancellationToken::new();
        let scanner = ResourceScanner::new(
            clock.clone(),
            checkers.clone(),
            versions.clone(),
            pipeline.clone(),
            settings(),
        )
        .with_cancellation(cancel.clone());
        Self {
            pipeline,
            versions,
            checkers,
            clock,
            cancel,
            scanner,
        }
    }
}
