//! Resource check scheduling for lookout.
//!
//! [`ResourceScanner`] runs one check cycle for one resource: it takes the
//! resource's checking lease, resolves the config identity being checked,
//! invokes a [`Checker`], and hands discovered versions to the
//! [`VersionRepository`]. [`Radar`] drives it periodically.

pub mod clock;
pub mod db;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod radar;
pub mod scanner;

pub use clock::{Clock, FakeClock, SystemClock};
pub use db::{DbLease, DbPipeline, DbVersions, pipeline_scanner};
pub use error::{CheckError, ScanError, ScanResult};
pub use ports::{CheckRequest, Checker, CheckerFactory, Lease, PipelineStore, VersionRepository};
pub use radar::Radar;
pub use scanner::{ResourceScanner, ScannerSettings};
