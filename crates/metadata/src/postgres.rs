//! PostgreSQL-based metadata store implementation.

use crate::constraint::{ConstraintViolation, classify};
use crate::error::{MetadataError, MetadataResult};
use crate::find_or_create::{self, CacheKey, ConfigTx, ParentId, UseTarget};
use crate::models::*;
use crate::repos::leases::{interval_ms, now_ms};
use crate::repos::{
    BaseResourceTypeRepo, BuildRepo, LeaseRepo, PipelineRepo, ResourceConfigRepo,
    ResourceRepo, ResourceTypeRepo, VersionRepo,
};
use crate::store::MetadataStore;
use async_trait::async_trait;
use lookout_core::config::PgSslMode;
use lookout_core::{
    ResourceCacheDescriptor, ResourceConfigDescriptor, ResourceDefinition, ResourceUser, Version,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// Two-key advisory lock held for the whole migration transaction. The
/// two-key space is disjoint from the single-key find-or-create locks.
const MIGRATION_LOCK: (i32, i32) = (0x6c6b_6f74, 1);

const CONFIG_CACHE_FKEY: &str = "resource_configs_resource_cache_id_fkey";

const ADD_CONFIG_CACHE_FKEY: &str = "ALTER TABLE resource_configs \
     ADD CONSTRAINT resource_configs_resource_cache_id_fkey \
     FOREIGN KEY (resource_cache_id) REFERENCES resource_caches(id) ON DELETE CASCADE";

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

const RESOURCE_COLUMNS: &str = "r.id, r.pipeline_id, p.name AS pipeline_name, r.name, \
     r.config, r.check_error, r.paused, r.active";

fn already_exists(err: sqlx::Error, what: String) -> MetadataError {
    match classify(&err) {
        Some(ConstraintViolation::Unique { .. }) => MetadataError::AlreadyExists(what),
        Some(ConstraintViolation::ForeignKey { .. }) => {
            MetadataError::NotFound(format!("owner of {what}"))
        }
        None => MetadataError::Database(err),
    }
}

fn not_found_unless_affected(rows: u64, what: impl FnOnce() -> String) -> MetadataResult<()> {
    if rows == 0 {
        return Err(MetadataError::NotFound(what()));
    }
    Ok(())
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters,
    /// so the password can come from its own environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(MIGRATION_LOCK.0)
            .bind(MIGRATION_LOCK.1)
            .execute(&mut *tx)
            .await?;

        // Prepared statements cannot hold more than one statement.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        // configs and caches reference each other, so this key is added once
        // both exist, and never dropped.
        let has_fkey: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_constraint \
             WHERE conname = $1 AND conrelid = 'resource_configs'::regclass)",
        )
        .bind(CONFIG_CACHE_FKEY)
        .fetch_one(&mut *tx)
        .await?;
        if !has_fkey {
            sqlx::query(ADD_CONFIG_CACHE_FKEY).execute(&mut *tx).await?;
            tracing::info!(constraint = CONFIG_CACHE_FKEY, "added foreign key");
        }

        tx.commit().await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PipelineRepo for PostgresStore {
    async fn create_team(&self, name: &str) -> MetadataResult<TeamRow> {
        let row =
            sqlx::query_as::<_, TeamRow>("INSERT INTO teams (name) VALUES ($1) RETURNING id, name")
                .bind(name)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| already_exists(e, format!("team '{name}'")))?;
        Ok(row)
    }

    async fn get_team(&self, team_id: i64) -> MetadataResult<Option<TeamRow>> {
        let row = sqlx::query_as::<_, TeamRow>("SELECT id, name FROM teams WHERE id = $1")
            .bind(team_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn create_pipeline(&self, team_id: i64, name: &str) -> MetadataResult<PipelineRow> {
        let row = sqlx::query_as::<_, PipelineRow>(
            "INSERT INTO pipelines (team_id, name) VALUES ($1, $2) \
             RETURNING id, team_id, name, paused",
        )
        .bind(team_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| already_exists(e, format!("pipeline '{name}'")))?;
        Ok(row)
    }

    async fn get_pipeline(&self, pipeline_id: i64) -> MetadataResult<Option<PipelineRow>> {
        let row = sqlx::query_as::<_, PipelineRow>(
            "SELECT id, team_id, name, paused FROM pipelines WHERE id = $1",
        )
        .bind(pipeline_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_pipeline_by_name(
        &self,
        team_id: i64,
        name: &str,
    ) -> MetadataResult<Option<PipelineRow>> {
        let row = sqlx::query_as::<_, PipelineRow>(
            "SELECT id, team_id, name, paused FROM pipelines WHERE team_id = $1 AND name = $2",
        )
        .bind(team_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_pipeline_paused(&self, pipeline_id: i64, paused: bool) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE pipelines SET paused = $1 WHERE id = $2")
            .bind(paused)
            .bind(pipeline_id)
            .execute(&self.pool)
            .await?;
        not_found_unless_affected(result.rows_affected(), || format!("pipeline {pipeline_id}"))
    }
}

#[async_trait]
impl ResourceRepo for PostgresStore {
    async fn save_resource(
        &self,
        pipeline_id: i64,
        name: &str,
        definition: &ResourceDefinition,
    ) -> MetadataResult<ResourceRow> {
        let config = serde_json::to_string(definition)?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO resources (pipeline_id, name, config, active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (pipeline_id, name)
            DO UPDATE SET config = EXCLUDED.config, active = TRUE
            RETURNING id
            "#,
        )
        .bind(pipeline_id)
        .bind(name)
        .bind(&config)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| already_exists(e, format!("resource '{name}'")))?;

        self.get_resource_by_id(id)
            .await?
            .ok_or_else(|| MetadataError::Internal(format!("resource {id} vanished on save")))
    }

    async fn get_resource(&self, pipeline_id: i64, name: &str) -> MetadataResult<Option<ResourceRow>> {
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources r \
             JOIN pipelines p ON p.id = r.pipeline_id \
             WHERE r.pipeline_id = $1 AND r.name = $2 AND r.active"
        ))
        .bind(pipeline_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_resource_by_id(&self, resource_id: i64) -> MetadataResult<Option<ResourceRow>> {
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources r \
             JOIN pipelines p ON p.id = r.pipeline_id WHERE r.id = $1"
        ))
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_resources(&self, pipeline_id: i64) -> MetadataResult<Vec<ResourceRow>> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources r \
             JOIN pipelines p ON p.id = r.pipeline_id \
             WHERE r.pipeline_id = $1 AND r.active ORDER BY r.name"
        ))
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_resource_paused(&self, resource_id: i64, paused: bool) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE resources SET paused = $1 WHERE id = $2")
            .bind(paused)
            .bind(resource_id)
            .execute(&self.pool)
            .await?;
        not_found_unless_affected(result.rows_affected(), || format!("resource {resource_id}"))
    }

    async fn set_resource_check_error(
        &self,
        resource_id: i64,
        check_error: Option<&str>,
    ) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE resources SET check_error = $1 WHERE id = $2")
            .bind(check_error)
            .bind(resource_id)
            .execute(&self.pool)
            .await?;
        not_found_unless_affected(result.rows_affected(), || format!("resource {resource_id}"))
    }

    async fn deactivate_resource(&self, resource_id: i64) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE resources SET active = FALSE WHERE id = $1")
            .bind(resource_id)
            .execute(&self.pool)
            .await?;
        not_found_unless_affected(result.rows_affected(), || format!("resource {resource_id}"))
    }
}

#[async_trait]
impl ResourceTypeRepo for PostgresStore {
    async fn save_resource_type(
        &self,
        pipeline_id: i64,
        name: &str,
        definition: &ResourceDefinition,
    ) -> MetadataResult<ResourceTypeRow> {
        let config = serde_json::to_string(definition)?;
        let row = sqlx::query_as::<_, ResourceTypeRow>(
            r#"
            INSERT INTO resource_types (pipeline_id, name, config, active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (pipeline_id, name)
            DO UPDATE SET config = EXCLUDED.config, active = TRUE
            RETURNING id, pipeline_id, name, config, version, active
            "#,
        )
        .bind(pipeline_id)
        .bind(name)
        .bind(&config)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| already_exists(e, format!("resource type '{name}'")))?;
        Ok(row)
    }

    async fn list_resource_types(&self, pipeline_id: i64) -> MetadataResult<Vec<ResourceTypeRow>> {
        let rows = sqlx::query_as::<_, ResourceTypeRow>(
            "SELECT id, pipeline_id, name, config, version, active FROM resource_types \
             WHERE pipeline_id = $1 AND active ORDER BY name",
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_resource_type_version(
        &self,
        resource_type_id: i64,
        version: &Version,
    ) -> MetadataResult<()> {
        let version = serde_json::to_string(version)?;
        let result = sqlx::query("UPDATE resource_types SET version = $1 WHERE id = $2")
            .bind(&version)
            .bind(resource_type_id)
            .execute(&self.pool)
            .await?;
        not_found_unless_affected(result.rows_affected(), || {
            format!("resource type {resource_type_id}")
        })
    }
}

#[async_trait]
impl BuildRepo for PostgresStore {
    async fn create_build(
        &self,
        team_id: i64,
        pipeline_id: Option<i64>,
        name: &str,
    ) -> MetadataResult<BuildRow> {
        let row = sqlx::query_as::<_, BuildRow>(
            "INSERT INTO builds (team_id, pipeline_id, name) VALUES ($1, $2, $3) \
             RETURNING id, team_id, pipeline_id, name, status",
        )
        .bind(team_id)
        .bind(pipeline_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| already_exists(e, format!("build '{name}'")))?;
        Ok(row)
    }

    async fn get_build(&self, build_id: i64) -> MetadataResult<Option<BuildRow>> {
        let row = sqlx::query_as::<_, BuildRow>(
            "SELECT id, team_id, pipeline_id, name, status FROM builds WHERE id = $1",
        )
        .bind(build_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_build(&self, build_id: i64) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM builds WHERE id = $1")
            .bind(build_id)
            .execute(&self.pool)
            .await?;
        not_found_unless_affected(result.rows_affected(), || format!("build {build_id}"))
    }
}

#[async_trait]
impl BaseResourceTypeRepo for PostgresStore {
    async fn save_base_resource_type(&self, name: &str) -> MetadataResult<BaseResourceTypeRow> {
        let row = sqlx::query_as::<_, BaseResourceTypeRow>(
            "INSERT INTO base_resource_types (name) VALUES ($1) \
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
             RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_base_resource_type(
        &self,
        name: &str,
    ) -> MetadataResult<Option<BaseResourceTypeRow>> {
        let row = sqlx::query_as::<_, BaseResourceTypeRow>(
            "SELECT id, name FROM base_resource_types WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

/// Find-or-create statements run inside one PostgreSQL transaction.
struct PgConfigTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ConfigTx for PgConfigTx {
    async fn lock(&mut self, key: i64) -> MetadataResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_base_resource_type(&mut self, name: &str) -> MetadataResult<Option<i64>> {
        let id = sqlx::query_scalar("SELECT id FROM base_resource_types WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id)
    }

    async fn find_config(
        &mut self,
        parent: ParentId,
        source_hash: &str,
    ) -> MetadataResult<Option<i64>> {
        let (cache_id, base_id) = parent.columns();
        let id = sqlx::query_scalar(
            "SELECT id FROM resource_configs \
             WHERE resource_cache_id IS NOT DISTINCT FROM $1 \
               AND base_resource_type_id IS NOT DISTINCT FROM $2 \
               AND source_hash = $3",
        )
        .bind(cache_id)
        .bind(base_id)
        .bind(source_hash)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn insert_config(
        &mut self,
        parent: ParentId,
        source_hash: &str,
    ) -> Result<i64, sqlx::Error> {
        let (cache_id, base_id) = parent.columns();
        sqlx::query_scalar(
            "INSERT INTO resource_configs (resource_cache_id, base_resource_type_id, source_hash) \
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(cache_id)
        .bind(base_id)
        .bind(source_hash)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn find_cache(&mut self, config_id: i64, key: &CacheKey) -> MetadataResult<Option<i64>> {
        let id = sqlx::query_scalar(
            "SELECT id FROM resource_caches \
             WHERE resource_config_id = $1 AND version_hash = $2 AND params_hash = $3",
        )
        .bind(config_id)
        .bind(&key.version_hash)
        .bind(&key.params_hash)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn insert_cache(&mut self, config_id: i64, key: &CacheKey) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO resource_caches \
             (resource_config_id, version, version_hash, params, params_hash) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(config_id)
        .bind(&key.version_json)
        .bind(&key.version_hash)
        .bind(&key.params_json)
        .bind(&key.params_hash)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn target_exists(&mut self, target: UseTarget) -> MetadataResult<bool> {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            target.table()
        ))
        .bind(target.id())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn use_exists(&mut self, target: UseTarget, user: ResourceUser) -> MetadataResult<bool> {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = $1 AND {} = $2)",
            target.uses_table(),
            target.uses_column(),
            user.kind().column()
        ))
        .bind(target.id())
        .bind(user.id())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_use(&mut self, target: UseTarget, user: ResourceUser) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            "INSERT INTO {} ({}, {}) VALUES ($1, $2)",
            target.uses_table(),
            target.uses_column(),
            user.kind().column()
        ))
        .bind(target.id())
        .bind(user.id())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceConfigRepo for PostgresStore {
    async fn find_or_create_resource_config(
        &self,
        descriptor: &ResourceConfigDescriptor,
        user: ResourceUser,
    ) -> MetadataResult<UsedResourceConfig> {
        let mut tx = PgConfigTx {
            tx: self.pool.begin().await?,
        };
        let used = find_or_create::resolve_config(&mut tx, descriptor, user).await?;
        tx.tx.commit().await?;
        Ok(used)
    }

    async fn find_or_create_resource_cache(
        &self,
        descriptor: &ResourceCacheDescriptor,
        user: ResourceUser,
    ) -> MetadataResult<UsedResourceCache> {
        let mut tx = PgConfigTx {
            tx: self.pool.begin().await?,
        };
        let used = find_or_create::resolve_cache(&mut tx, descriptor, user).await?;
        tx.tx.commit().await?;
        Ok(used)
    }

    async fn get_resource_config(&self, config_id: i64) -> MetadataResult<Option<ResourceConfigRow>> {
        let row = sqlx::query_as::<_, ResourceConfigRow>(
            "SELECT id, resource_cache_id, base_resource_type_id, source_hash \
             FROM resource_configs WHERE id = $1",
        )
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_resource_config_uses(
        &self,
        config_id: i64,
    ) -> MetadataResult<Vec<ResourceConfigUseRow>> {
        let rows = sqlx::query_as::<_, ResourceConfigUseRow>(
            "SELECT id, resource_config_id, build_id, resource_id, resource_type_id \
             FROM resource_config_uses WHERE resource_config_id = $1 ORDER BY id",
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_resource_config_uses(&self, config_id: i64) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM resource_config_uses WHERE resource_config_id = $1",
        )
        .bind(config_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn list_unused_resource_configs(&self) -> MetadataResult<Vec<ResourceConfigRow>> {
        let rows = sqlx::query_as::<_, ResourceConfigRow>(
            r#"
            SELECT c.id, c.resource_cache_id, c.base_resource_type_id, c.source_hash
            FROM resource_configs c
            WHERE NOT EXISTS (
                SELECT 1 FROM resource_config_uses u WHERE u.resource_config_id = c.id
            )
            ORDER BY c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn release_resource_config_use(
        &self,
        config_id: i64,
        user: ResourceUser,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(&format!(
            "DELETE FROM resource_config_uses WHERE resource_config_id = $1 AND {} = $2",
            user.kind().column()
        ))
        .bind(config_id)
        .bind(user.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl VersionRepo for PostgresStore {
    async fn save_resource_versions(
        &self,
        resource_id: i64,
        versions: &[Version],
    ) -> MetadataResult<()> {
        if versions.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        // Row lock keeps concurrent savers from handing out the same check_order.
        let locked: Option<i64> =
            sqlx::query_scalar("SELECT id FROM resources WHERE id = $1 FOR UPDATE")
                .bind(resource_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(MetadataError::NotFound(format!("resource {resource_id}")));
        }

        let mut check_order: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(check_order), 0)::BIGINT FROM versioned_resources WHERE resource_id = $1",
        )
        .bind(resource_id)
        .fetch_one(&mut *tx)
        .await?;

        for version in versions {
            check_order += 1;
            sqlx::query(
                r#"
                INSERT INTO versioned_resources (resource_id, version, version_hash, check_order)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (resource_id, version_hash)
                DO UPDATE SET check_order = EXCLUDED.check_order
                "#,
            )
            .bind(resource_id)
            .bind(serde_json::to_string(version)?)
            .bind(version.hash()?.to_hex())
            .bind(check_order)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_latest_version(
        &self,
        resource_id: i64,
    ) -> MetadataResult<Option<VersionedResourceRow>> {
        let row = sqlx::query_as::<_, VersionedResourceRow>(
            "SELECT id, resource_id, version, version_hash, check_order \
             FROM versioned_resources WHERE resource_id = $1 \
             ORDER BY check_order DESC LIMIT 1",
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_versions(&self, resource_id: i64) -> MetadataResult<Vec<VersionedResourceRow>> {
        let rows = sqlx::query_as::<_, VersionedResourceRow>(
            "SELECT id, resource_id, version, version_hash, check_order \
             FROM versioned_resources WHERE resource_id = $1 ORDER BY check_order",
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl LeaseRepo for PostgresStore {
    async fn acquire_checking_lease(
        &self,
        resource_id: i64,
        interval: std::time::Duration,
        immediate: bool,
    ) -> MetadataResult<Option<CheckingLease>> {
        let now = now_ms();
        let ttl = interval_ms(interval);
        let lease_id = Uuid::new_v4();
        let expires_at_ms = now.saturating_add(ttl);

        sqlx::query(
            "INSERT INTO resource_checking_leases (resource_id, last_checked_ms) \
             VALUES ($1, 0) ON CONFLICT (resource_id) DO NOTHING",
        )
        .bind(resource_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match classify(&e) {
            Some(ConstraintViolation::ForeignKey { .. }) => {
                MetadataError::NotFound(format!("resource {resource_id}"))
            }
            _ => MetadataError::Database(e),
        })?;

        // A single conditional UPDATE; concurrent acquirers re-check the
        // predicate after the row lock is released.
        let result = sqlx::query(
            r#"
            UPDATE resource_checking_leases
            SET lease_id = $1, last_checked_ms = $2, expires_at_ms = $3
            WHERE resource_id = $4
              AND (expires_at_ms IS NULL OR expires_at_ms <= $2)
              AND ($5 OR last_checked_ms <= $6)
            "#,
        )
        .bind(lease_id)
        .bind(now)
        .bind(expires_at_ms)
        .bind(resource_id)
        .bind(immediate)
        .bind(now.saturating_sub(ttl))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(CheckingLease {
            resource_id,
            lease_id,
            expires_at_ms,
        }))
    }

    async fn release_checking_lease(&self, lease: &CheckingLease) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE resource_checking_leases SET lease_id = NULL, expires_at_ms = NULL \
             WHERE resource_id = $1 AND lease_id = $2",
        )
        .bind(lease.resource_id)
        .bind(lease.lease_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_skip_comments() {
        let statements = postgres_schema_statements(POSTGRES_SCHEMA);
        assert!(!statements.is_empty());
        assert!(statements.iter().all(|s| !s.is_empty()));
        assert!(
            statements
                .iter()
                .any(|s| s.contains("resource_config_uses_resource_config_id_fkey"))
        );
        assert!(
            statements
                .iter()
                .all(|s| !s.contains("DROP CONSTRAINT") && !s.contains(CONFIG_CACHE_FKEY)),
            "the config-to-cache key is only ever added by migrate"
        );
        assert!(ADD_CONFIG_CACHE_FKEY.contains(CONFIG_CACHE_FKEY));
        assert!(
            postgres_schema_statements("-- only a comment\n;\n  ;").is_empty(),
            "comment-only fragments must be dropped"
        );
    }
}
