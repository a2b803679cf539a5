//! Core domain types for the lookout resource checker.
//!
//! This crate defines the data model shared by the metadata store and the
//! scanner:
//! - Pipeline records (resources, resource types, versions, sources)
//! - Resource config descriptors and their content hashes
//! - Usage-edge subjects (builds, resources, resource types)
//! - Check interval parsing and application configuration

pub mod config;
pub mod error;
pub mod hash;
pub mod interval;
pub mod pipeline;
pub mod resource_config;
pub mod user;

pub use config::{AppConfig, MetadataConfig, PgSslMode, ScannerConfig};
pub use error::{Error, Result};
pub use hash::ContentHash;
pub use interval::parse_check_interval;
pub use pipeline::{
    Params, Resource, ResourceDefinition, ResourceType, Source, Version, VersionedResourceType,
};
pub use resource_config::{
    BaseResourceType, ConfigChain, ConfigParent, ResourceCacheDescriptor, ResourceConfigDescriptor,
};
pub use user::{ResourceUser, UserKind};
