//! Backend-neutral find-or-create of config identities.
//!
//! Each backend supplies the primitive statements through [`ConfigTx`], run
//! inside one transaction; this module owns the chain walk and the mapping of
//! constraint violations onto the retry taxonomy.

use crate::constraint::{
    CACHE_USES_CACHE_FKEY, CONFIG_USES_CONFIG_FKEY, ConstraintViolation, classify,
};
use crate::error::{MetadataError, MetadataResult};
use crate::models::{
    UsedBaseResourceType, UsedConfigParent, UsedResourceCache, UsedResourceConfig,
};
use async_trait::async_trait;
use lookout_core::{
    ContentHash, ResourceCacheDescriptor, ResourceConfigDescriptor, ResourceUser,
};

/// Persisted parent of a config row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ParentId {
    BaseResourceType(i64),
    ResourceCache(i64),
}

impl ParentId {
    pub(crate) fn columns(self) -> (Option<i64>, Option<i64>) {
        match self {
            Self::BaseResourceType(id) => (None, Some(id)),
            Self::ResourceCache(id) => (Some(id), None),
        }
    }
}

/// The identity a usage edge points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum UseTarget {
    Config(i64),
    Cache(i64),
}

impl UseTarget {
    pub(crate) fn id(self) -> i64 {
        match self {
            Self::Config(id) | Self::Cache(id) => id,
        }
    }

    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Config(_) => "resource_configs",
            Self::Cache(_) => "resource_caches",
        }
    }

    pub(crate) fn uses_table(self) -> &'static str {
        match self {
            Self::Config(_) => "resource_config_uses",
            Self::Cache(_) => "resource_cache_uses",
        }
    }

    pub(crate) fn uses_column(self) -> &'static str {
        match self {
            Self::Config(_) => "resource_config_id",
            Self::Cache(_) => "resource_cache_id",
        }
    }

    fn fkey(self) -> &'static str {
        match self {
            Self::Config(_) => CONFIG_USES_CONFIG_FKEY,
            Self::Cache(_) => CACHE_USES_CACHE_FKEY,
        }
    }
}

/// Uniqueness key and payload of a cache row.
#[derive(Debug, Clone)]
pub(crate) struct CacheKey {
    pub version_hash: String,
    pub params_hash: String,
    pub version_json: String,
    pub params_json: String,
}

/// Primitive statements of the find-or-create transaction.
///
/// Inserts return the raw driver error so constraint violations can be
/// classified here.
#[async_trait]
pub(crate) trait ConfigTx: Send {
    /// Take a transaction-scoped lock on `key`.
    async fn lock(&mut self, key: i64) -> MetadataResult<()>;

    async fn find_base_resource_type(&mut self, name: &str) -> MetadataResult<Option<i64>>;

    async fn find_config(&mut self, parent: ParentId, source_hash: &str)
    -> MetadataResult<Option<i64>>;

    async fn insert_config(&mut self, parent: ParentId, source_hash: &str)
    -> Result<i64, sqlx::Error>;

    async fn find_cache(&mut self, config_id: i64, key: &CacheKey) -> MetadataResult<Option<i64>>;

    async fn insert_cache(&mut self, config_id: i64, key: &CacheKey) -> Result<i64, sqlx::Error>;

    async fn target_exists(&mut self, target: UseTarget) -> MetadataResult<bool>;

    async fn use_exists(&mut self, target: UseTarget, user: ResourceUser) -> MetadataResult<bool>;

    async fn insert_use(&mut self, target: UseTarget, user: ResourceUser)
    -> Result<(), sqlx::Error>;
}

/// Resolve a config descriptor's chain bottom-up, recording a usage edge for
/// `user` on every config and cache along the way.
pub(crate) async fn resolve_config<T: ConfigTx + ?Sized>(
    tx: &mut T,
    descriptor: &ResourceConfigDescriptor,
    user: ResourceUser,
) -> MetadataResult<UsedResourceConfig> {
    tx.lock(descriptor.lock_name()?.advisory_lock_key()).await?;
    resolve_chain(tx, descriptor, user).await
}

/// Resolve a cache descriptor: its config chain, then the cache itself.
pub(crate) async fn resolve_cache<T: ConfigTx + ?Sized>(
    tx: &mut T,
    descriptor: &ResourceCacheDescriptor,
    user: ResourceUser,
) -> MetadataResult<UsedResourceCache> {
    tx.lock(ContentHash::of_json(descriptor)?.advisory_lock_key())
        .await?;
    let config = resolve_chain(tx, &descriptor.resource_config, user).await?;
    ensure_cache(tx, config, descriptor, user).await
}

async fn resolve_chain<T: ConfigTx + ?Sized>(
    tx: &mut T,
    descriptor: &ResourceConfigDescriptor,
    user: ResourceUser,
) -> MetadataResult<UsedResourceConfig> {
    let chain = descriptor.chain();

    let base_id = tx
        .find_base_resource_type(&chain.base.name)
        .await?
        .ok_or_else(|| MetadataError::BaseResourceTypeNotFound(chain.base.name.clone()))?;

    let mut parent = UsedConfigParent::BaseResourceType(UsedBaseResourceType {
        id: base_id,
        name: chain.base.name.clone(),
    });

    // configs[i]'s parent is caches[i]; caches[i] was produced by configs[i + 1].
    let mut level = chain.configs.len() - 1;
    loop {
        let config = ensure_config(tx, parent, chain.configs[level], user).await?;
        if level == 0 {
            return Ok(config);
        }
        level -= 1;
        let cache = ensure_cache(tx, config, chain.caches[level], user).await?;
        parent = UsedConfigParent::ResourceCache(Box::new(cache));
    }
}

async fn ensure_config<T: ConfigTx + ?Sized>(
    tx: &mut T,
    parent: UsedConfigParent,
    descriptor: &ResourceConfigDescriptor,
    user: ResourceUser,
) -> MetadataResult<UsedResourceConfig> {
    let source_hash = descriptor.source_hash()?.to_hex();
    let parent_id = match &parent {
        UsedConfigParent::BaseResourceType(base) => ParentId::BaseResourceType(base.id),
        UsedConfigParent::ResourceCache(cache) => ParentId::ResourceCache(cache.id),
    };

    let id = match tx.find_config(parent_id, &source_hash).await? {
        Some(id) => id,
        None => {
            let id = tx
                .insert_config(parent_id, &source_hash)
                .await
                .map_err(|e| insert_conflict(e, "resource config"))?;
            tracing::debug!(config_id = id, parent = ?parent_id, "created resource config");
            id
        }
    };

    ensure_use(tx, UseTarget::Config(id), user).await?;

    Ok(UsedResourceConfig {
        id,
        created_by: parent,
    })
}

async fn ensure_cache<T: ConfigTx + ?Sized>(
    tx: &mut T,
    config: UsedResourceConfig,
    descriptor: &ResourceCacheDescriptor,
    user: ResourceUser,
) -> MetadataResult<UsedResourceCache> {
    let key = CacheKey {
        version_hash: descriptor.version_hash()?.to_hex(),
        params_hash: descriptor.params_hash()?.to_hex(),
        version_json: serde_json::to_string(&descriptor.version)?,
        params_json: serde_json::to_string(&descriptor.params)?,
    };

    let id = match tx.find_cache(config.id, &key).await? {
        Some(id) => id,
        None => {
            let id = tx
                .insert_cache(config.id, &key)
                .await
                .map_err(|e| insert_conflict(e, "resource cache"))?;
            tracing::debug!(cache_id = id, config_id = config.id, "created resource cache");
            id
        }
    };

    ensure_use(tx, UseTarget::Cache(id), user).await?;

    Ok(UsedResourceCache {
        id,
        resource_config: config,
        version: descriptor.version.clone(),
    })
}

async fn ensure_use<T: ConfigTx + ?Sized>(
    tx: &mut T,
    target: UseTarget,
    user: ResourceUser,
) -> MetadataResult<()> {
    if tx.use_exists(target, user).await? {
        return Ok(());
    }
    match tx.insert_use(target, user).await {
        Ok(()) => Ok(()),
        Err(e) => Err(use_conflict(tx, e, target, user).await),
    }
}

/// A unique violation means a concurrent creator won; a foreign-key violation
/// means the parent was collected. Both are resolved by re-running.
fn insert_conflict(err: sqlx::Error, what: &str) -> MetadataError {
    match classify(&err) {
        Some(ConstraintViolation::Unique { .. }) => {
            MetadataError::RetryableConflict(format!("{what} created concurrently"))
        }
        Some(ConstraintViolation::ForeignKey { .. }) => {
            MetadataError::RetryableConflict(format!("parent of {what} disappeared"))
        }
        None => MetadataError::Database(err),
    }
}

async fn use_conflict<T: ConfigTx + ?Sized>(
    tx: &mut T,
    err: sqlx::Error,
    target: UseTarget,
    user: ResourceUser,
) -> MetadataError {
    match classify(&err) {
        Some(ConstraintViolation::Unique { .. }) => {
            MetadataError::RetryableConflict(format!("usage edge for {user} created concurrently"))
        }
        Some(ConstraintViolation::ForeignKey {
            constraint: Some(name),
        }) => {
            if name == target.fkey() {
                MetadataError::RetryableConflict(format!("{} disappeared", target.table()))
            } else {
                MetadataError::UserDisappeared(user)
            }
        }
        // Unnamed: whichever referenced row is gone decides.
        Some(ConstraintViolation::ForeignKey { constraint: None }) => {
            match tx.target_exists(target).await {
                Ok(true) => MetadataError::UserDisappeared(user),
                Ok(false) => {
                    MetadataError::RetryableConflict(format!("{} disappeared", target.table()))
                }
                Err(probe_err) => probe_err,
            }
        }
        None => MetadataError::Database(err),
    }
}
