//! Resource config descriptors.
//!
//! A descriptor names *what* is being checked or provisioned: a parent (either
//! a worker-provided base type or the cache produced by another config) plus an
//! opaque source. Descriptors are content-addressed; identical descriptors
//! resolve to one persisted identity.
//!
//! Parents form a strictly descending chain that always ends in a base type:
//!
//! ```text
//! config --parent--> cache --of--> config --parent--> ... --> base type
//! ```

use crate::hash::ContentHash;
use crate::pipeline::{Params, Source, Version, VersionedResourceType, lookup_type};
use serde::{Deserialize, Serialize};

/// A worker-provided resource type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseResourceType {
    pub name: String,
}

/// The single parent of a config descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigParent {
    BaseResourceType(BaseResourceType),
    ResourceCache(Box<ResourceCacheDescriptor>),
}

/// A (parent, source) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfigDescriptor {
    pub parent: ConfigParent,
    pub source: Source,
}

/// The output of fetching one version of a config with some params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceCacheDescriptor {
    pub resource_config: ResourceConfigDescriptor,
    pub version: Version,
    #[serde(default)]
    pub params: Params,
}

/// A descriptor flattened into its descending chain.
///
/// `caches[i]` is the parent of `configs[i]`, and `configs[i + 1]` is the
/// config that `caches[i]` was produced from. `base` is the parent of the last
/// config.
#[derive(Debug)]
pub struct ConfigChain<'a> {
    pub configs: Vec<&'a ResourceConfigDescriptor>,
    pub caches: Vec<&'a ResourceCacheDescriptor>,
    pub base: &'a BaseResourceType,
}

impl ResourceConfigDescriptor {
    /// A config whose parent is a worker-provided type.
    pub fn base(type_name: impl Into<String>, source: Source) -> Self {
        Self {
            parent: ConfigParent::BaseResourceType(BaseResourceType {
                name: type_name.into(),
            }),
            source,
        }
    }

    /// A config whose parent is another config's cache.
    pub fn cached(cache: ResourceCacheDescriptor, source: Source) -> Self {
        Self {
            parent: ConfigParent::ResourceCache(Box::new(cache)),
            source,
        }
    }

    /// Build the descriptor for a resource of `type_name`.
    ///
    /// If `type_name` is one of the pipeline's own types, the parent is the
    /// cache of that type's image at its current version; that type's config is
    /// resolved against the remaining types, so a type named after the type it
    /// extends bottoms out at the base type.
    pub fn for_resource_type(
        type_name: &str,
        source: Source,
        custom_types: &[VersionedResourceType],
    ) -> crate::Result<Self> {
        let Some(custom) = lookup_type(custom_types, type_name) else {
            return Ok(Self::base(type_name, source));
        };

        let version = custom
            .version
            .clone()
            .ok_or_else(|| crate::Error::ResourceTypeVersionUnknown(custom.name.clone()))?;

        let remaining: Vec<VersionedResourceType> = custom_types
            .iter()
            .filter(|t| t.name != custom.name)
            .cloned()
            .collect();

        let image_config =
            Self::for_resource_type(&custom.type_name, custom.source.clone(), &remaining)?;

        Ok(Self::cached(
            ResourceCacheDescriptor {
                resource_config: image_config,
                version,
                params: Params::new(),
            },
            source,
        ))
    }

    /// Hash of the source alone; half of the persisted uniqueness key.
    pub fn source_hash(&self) -> crate::Result<ContentHash> {
        self.source.hash()
    }

    /// Hash of the whole descriptor, used to name the creation lock.
    pub fn lock_name(&self) -> crate::Result<ContentHash> {
        ContentHash::of_json(self)
    }

    /// Flatten the parent chain, top first.
    pub fn chain(&self) -> ConfigChain<'_> {
        let mut configs = vec![self];
        let mut caches = Vec::new();
        let mut current = self;
        loop {
            match &current.parent {
                ConfigParent::BaseResourceType(base) => {
                    return ConfigChain {
                        configs,
                        caches,
                        base,
                    };
                }
                ConfigParent::ResourceCache(cache) => {
                    caches.push(cache.as_ref());
                    current = &cache.resource_config;
                    configs.push(current);
                }
            }
        }
    }
}

impl ResourceCacheDescriptor {
    pub fn version_hash(&self) -> crate::Result<ContentHash> {
        self.version.hash()
    }

    pub fn params_hash(&self) -> crate::Result<ContentHash> {
        self.params.hash()
    }
}
