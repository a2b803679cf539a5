//! Database models mapping to the metadata schema.

use crate::error::MetadataResult;
use lookout_core::{Resource, ResourceDefinition, ResourceType, ResourceUser, Version};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// Teams, pipelines, builds
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct TeamRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct PipelineRow {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub paused: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct BuildRow {
    pub id: i64,
    pub team_id: i64,
    pub pipeline_id: Option<i64>,
    pub name: String,
    pub status: String,
}

// =============================================================================
// Resources and resource types
// =============================================================================

/// Resource record joined with its pipeline's name.
///
/// `config` holds the JSON-encoded [`ResourceDefinition`].
#[derive(Debug, Clone, FromRow)]
pub struct ResourceRow {
    pub id: i64,
    pub pipeline_id: i64,
    pub pipeline_name: String,
    pub name: String,
    pub config: String,
    pub check_error: Option<String>,
    pub paused: bool,
    pub active: bool,
}

impl ResourceRow {
    pub fn definition(&self) -> MetadataResult<ResourceDefinition> {
        Ok(serde_json::from_str(&self.config)?)
    }

    pub fn into_resource(self) -> MetadataResult<Resource> {
        let definition = self.definition()?;
        Ok(Resource {
            id: self.id,
            name: self.name,
            pipeline_id: self.pipeline_id,
            pipeline_name: self.pipeline_name,
            type_name: definition.type_name,
            source: definition.source,
            check_every: definition.check_every,
            tags: definition.tags,
            check_error: self.check_error,
            paused: self.paused,
        })
    }
}

/// Pipeline-defined resource type; `version` is the JSON-encoded current
/// version of the type's own image.
#[derive(Debug, Clone, FromRow)]
pub struct ResourceTypeRow {
    pub id: i64,
    pub pipeline_id: i64,
    pub name: String,
    pub config: String,
    pub version: Option<String>,
    pub active: bool,
}

impl ResourceTypeRow {
    pub fn into_resource_type(self) -> MetadataResult<ResourceType> {
        let definition: ResourceDefinition = serde_json::from_str(&self.config)?;
        let version = self
            .version
            .as_deref()
            .map(serde_json::from_str::<Version>)
            .transpose()?;
        Ok(ResourceType {
            id: self.id,
            name: self.name,
            pipeline_id: self.pipeline_id,
            type_name: definition.type_name,
            source: definition.source,
            check_every: definition.check_every,
            tags: definition.tags,
            version,
        })
    }
}

// =============================================================================
// Config identities and the usage ledger
// =============================================================================

/// Worker-provided type registered as a config parent.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct BaseResourceTypeRow {
    pub id: i64,
    pub name: String,
}

/// Persisted config identity. Exactly one parent column is set.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ResourceConfigRow {
    pub id: i64,
    pub resource_cache_id: Option<i64>,
    pub base_resource_type_id: Option<i64>,
    pub source_hash: String,
}

/// Usage edge from a build, resource, or resource type to a config.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ResourceConfigUseRow {
    pub id: i64,
    pub resource_config_id: i64,
    pub build_id: Option<i64>,
    pub resource_id: Option<i64>,
    pub resource_type_id: Option<i64>,
}

impl ResourceConfigUseRow {
    pub fn user(&self) -> Option<ResourceUser> {
        ResourceUser::from_columns(self.build_id, self.resource_id, self.resource_type_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ResourceCacheRow {
    pub id: i64,
    pub resource_config_id: i64,
    pub version: String,
    pub version_hash: String,
    pub params: String,
    pub params_hash: String,
}

/// A resolved config identity together with its resolved parent chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedResourceConfig {
    pub id: i64,
    pub created_by: UsedConfigParent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsedConfigParent {
    BaseResourceType(UsedBaseResourceType),
    ResourceCache(Box<UsedResourceCache>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedBaseResourceType {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedResourceCache {
    pub id: i64,
    pub resource_config: UsedResourceConfig,
    pub version: Version,
}

impl UsedResourceConfig {
    /// The base type at the bottom of the chain.
    pub fn base_resource_type(&self) -> &UsedBaseResourceType {
        match &self.created_by {
            UsedConfigParent::BaseResourceType(base) => base,
            UsedConfigParent::ResourceCache(cache) => cache.resource_config.base_resource_type(),
        }
    }
}

// =============================================================================
// Versions and checking leases
// =============================================================================

/// A discovered version; `version` is JSON-encoded.
#[derive(Debug, Clone, FromRow)]
pub struct VersionedResourceRow {
    pub id: i64,
    pub resource_id: i64,
    pub version: String,
    pub version_hash: String,
    pub check_order: i64,
}

impl VersionedResourceRow {
    pub fn version(&self) -> MetadataResult<Version> {
        Ok(serde_json::from_str(&self.version)?)
    }
}

/// A held checking lease. Only the holder of `lease_id` can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckingLease {
    pub resource_id: i64,
    pub lease_id: Uuid,
    pub expires_at_ms: i64,
}
