//! Repository traits for metadata operations.

pub mod base_resource_types;
pub mod builds;
pub mod leases;
pub mod pipelines;
pub mod resource_configs;
pub mod resource_types;
pub mod resources;
pub mod versions;

pub use base_resource_types::BaseResourceTypeRepo;
pub use builds::BuildRepo;
pub use leases::LeaseRepo;
pub use pipelines::PipelineRepo;
pub use resource_configs::ResourceConfigRepo;
pub use resource_types::ResourceTypeRepo;
pub use resources::ResourceRepo;
pub use versions::VersionRepo;
