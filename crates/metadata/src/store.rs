//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{
    BaseResourceTypeRepo, BuildRepo, LeaseRepo, PipelineRepo, ResourceConfigRepo,
    ResourceRepo, ResourceTypeRepo, VersionRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    PipelineRepo
    + ResourceRepo
    + ResourceTypeRepo
    + BuildRepo
    + BaseResourceTypeRepo
    + ResourceConfigRepo
    + VersionRepo
    + LeaseRepo
    + Send
    + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
///
/// All access goes through a single pooled connection, so writers are
/// serialised and find-or-create needs no separate advisory lock.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store. `":memory:"` opens a private in-memory
    /// database.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        let opts = if path == Path::new(":memory:") {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MetadataError::Config(format!(
                        "failed to create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        };
        let opts = opts
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // One connection: SQLite has a single writer, and an in-memory
            // database lives and dies with its connection.
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs,
            "SQLite metadata store ready (query timeout is advisory only)"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::find_or_create::{self, CacheKey, ConfigTx, ParentId, UseTarget};
    use crate::models::*;
    use crate::repos::leases::{interval_ms, now_ms};
    use lookout_core::{
        ResourceCacheDescriptor, ResourceConfigDescriptor, ResourceDefinition, ResourceUser,
        Version,
    };
    use sqlx::Transaction;
    use uuid::Uuid;

    const RESOURCE_COLUMNS: &str = "r.id, r.pipeline_id, p.name AS pipeline_name, r.name, \
         r.config, r.check_error, r.paused, r.active";

    fn already_exists(err: sqlx::Error, what: String) -> MetadataError {
        match crate::constraint::classify(&err) {
            Some(crate::constraint::ConstraintViolation::Unique { .. }) => {
                MetadataError::AlreadyExists(what)
            }
            Some(crate::constraint::ConstraintViolation::ForeignKey { .. }) => {
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

    #[async_trait]
    impl PipelineRepo for SqliteStore {
        async fn create_team(&self, name: &str) -> MetadataResult<TeamRow> {
            let row = sqlx::query_as::<_, TeamRow>(
                "INSERT INTO teams (name) VALUES (?) RETURNING id, name",
            )
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| already_exists(e, format!("team '{name}'")))?;
            Ok(row)
        }

        async fn get_team(&self, team_id: i64) -> MetadataResult<Option<TeamRow>> {
            let row = sqlx::query_as::<_, TeamRow>("SELECT id, name FROM teams WHERE id = ?")
                .bind(team_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn create_pipeline(&self, team_id: i64, name: &str) -> MetadataResult<PipelineRow> {
            let row = sqlx::query_as::<_, PipelineRow>(
                "INSERT INTO pipelines (team_id, name) VALUES (?, ?) \
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
                "SELECT id, team_id, name, paused FROM pipelines WHERE id = ?",
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
                "SELECT id, team_id, name, paused FROM pipelines WHERE team_id = ? AND name = ?",
            )
            .bind(team_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn set_pipeline_paused(&self, pipeline_id: i64, paused: bool) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE pipelines SET paused = ? WHERE id = ?")
                .bind(paused)
                .bind(pipeline_id)
                .execute(&self.pool)
                .await?;
            not_found_unless_affected(result.rows_affected(), || {
                format!("pipeline {pipeline_id}")
            })
        }
    }

    #[async_trait]
    impl ResourceRepo for SqliteStore {
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
                VALUES (?, ?, ?, 1)
                ON CONFLICT (pipeline_id, name)
                DO UPDATE SET config = excluded.config, active = 1
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

        async fn get_resource(
            &self,
            pipeline_id: i64,
            name: &str,
        ) -> MetadataResult<Option<ResourceRow>> {
            let row = sqlx::query_as::<_, ResourceRow>(&format!(
                "SELECT {RESOURCE_COLUMNS} FROM resources r \
                 JOIN pipelines p ON p.id = r.pipeline_id \
                 WHERE r.pipeline_id = ? AND r.name = ? AND r.active = 1"
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
                 JOIN pipelines p ON p.id = r.pipeline_id WHERE r.id = ?"
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
                 WHERE r.pipeline_id = ? AND r.active = 1 ORDER BY r.name"
            ))
            .bind(pipeline_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn set_resource_paused(&self, resource_id: i64, paused: bool) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE resources SET paused = ? WHERE id = ?")
                .bind(paused)
                .bind(resource_id)
                .execute(&self.pool)
                .await?;
            not_found_unless_affected(result.rows_affected(), || {
                format!("resource {resource_id}")
            })
        }

        async fn set_resource_check_error(
            &self,
            resource_id: i64,
            check_error: Option<&str>,
        ) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE resources SET check_error = ? WHERE id = ?")
                .bind(check_error)
                .bind(resource_id)
                .execute(&self.pool)
                .await?;
            not_found_unless_affected(result.rows_affected(), || {
                format!("resource {resource_id}")
            })
        }

        async fn deactivate_resource(&self, resource_id: i64) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE resources SET active = 0 WHERE id = ?")
                .bind(resource_id)
                .execute(&self.pool)
                .await?;
            not_found_unless_affected(result.rows_affected(), || {
                format!("resource {resource_id}")
            })
        }
    }

    #[async_trait]
    impl ResourceTypeRepo for SqliteStore {
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
                VALUES (?, ?, ?, 1)
                ON CONFLICT (pipeline_id, name)
                DO UPDATE SET config = excluded.config, active = 1
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

        async fn list_resource_types(
            &self,
            pipeline_id: i64,
        ) -> MetadataResult<Vec<ResourceTypeRow>> {
            let rows = sqlx::query_as::<_, ResourceTypeRow>(
                "SELECT id, pipeline_id, name, config, version, active FROM resource_types \
                 WHERE pipeline_id = ? AND active = 1 ORDER BY name",
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
            let result = sqlx::query("UPDATE resource_types SET version = ? WHERE id = ?")
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
    impl BuildRepo for SqliteStore {
        async fn create_build(
            &self,
            team_id: i64,
            pipeline_id: Option<i64>,
            name: &str,
        ) -> MetadataResult<BuildRow> {
            let row = sqlx::query_as::<_, BuildRow>(
                "INSERT INTO builds (team_id, pipeline_id, name) VALUES (?, ?, ?) \
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
                "SELECT id, team_id, pipeline_id, name, status FROM builds WHERE id = ?",
            )
            .bind(build_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn delete_build(&self, build_id: i64) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM builds WHERE id = ?")
                .bind(build_id)
                .execute(&self.pool)
                .await?;
            not_found_unless_affected(result.rows_affected(), || format!("build {build_id}"))
        }
    }

    #[async_trait]
    impl BaseResourceTypeRepo for SqliteStore {
        async fn save_base_resource_type(&self, name: &str) -> MetadataResult<BaseResourceTypeRow> {
            // DO UPDATE rather than DO NOTHING so RETURNING yields the existing row.
            let row = sqlx::query_as::<_, BaseResourceTypeRow>(
                "INSERT INTO base_resource_types (name) VALUES (?) \
                 ON CONFLICT (name) DO UPDATE SET name = excluded.name \
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
                "SELECT id, name FROM base_resource_types WHERE name = ?",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }

    /// Find-or-create statements run inside one SQLite transaction.
    struct SqliteConfigTx {
        tx: Transaction<'static, Sqlite>,
    }

    #[async_trait]
    impl ConfigTx for SqliteConfigTx {
        async fn lock(&mut self, _key: i64) -> MetadataResult<()> {
            // The single pooled connection already serialises transactions.
            Ok(())
        }

        async fn find_base_resource_type(&mut self, name: &str) -> MetadataResult<Option<i64>> {
            let id = sqlx::query_scalar("SELECT id FROM base_resource_types WHERE name = ?")
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
                 WHERE resource_cache_id IS ? AND base_resource_type_id IS ? AND source_hash = ?",
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
                 VALUES (?, ?, ?) RETURNING id",
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
                 WHERE resource_config_id = ? AND version_hash = ? AND params_hash = ?",
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
                 VALUES (?, ?, ?, ?, ?) RETURNING id",
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
                "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)",
                target.table()
            ))
            .bind(target.id())
            .fetch_one(&mut *self.tx)
            .await?;
            Ok(exists)
        }

        async fn use_exists(&mut self, target: UseTarget, user: ResourceUser) -> MetadataResult<bool> {
            let exists: bool = sqlx::query_scalar(&format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ? AND {} = ?)",
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

        async fn insert_use(
            &mut self,
            target: UseTarget,
            user: ResourceUser,
        ) -> Result<(), sqlx::Error> {
            sqlx::query(&format!(
                "INSERT INTO {} ({}, {}) VALUES (?, ?)",
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
    impl ResourceConfigRepo for SqliteStore {
        async fn find_or_create_resource_config(
            &self,
            descriptor: &ResourceConfigDescriptor,
            user: ResourceUser,
        ) -> MetadataResult<UsedResourceConfig> {
            let mut tx = SqliteConfigTx {
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
            let mut tx = SqliteConfigTx {
                tx: self.pool.begin().await?,
            };
            let used = find_or_create::resolve_cache(&mut tx, descriptor, user).await?;
            tx.tx.commit().await?;
            Ok(used)
        }

        async fn get_resource_config(
            &self,
            config_id: i64,
        ) -> MetadataResult<Option<ResourceConfigRow>> {
            let row = sqlx::query_as::<_, ResourceConfigRow>(
                "SELECT id, resource_cache_id, base_resource_type_id, source_hash \
                 FROM resource_configs WHERE id = ?",
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
                 FROM resource_config_uses WHERE resource_config_id = ? ORDER BY id",
            )
            .bind(config_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_resource_config_uses(&self, config_id: i64) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM resource_config_uses WHERE resource_config_id = ?",
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
                "DELETE FROM resource_config_uses WHERE resource_config_id = ? AND {} = ?",
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
    impl VersionRepo for SqliteStore {
        async fn save_resource_versions(
            &self,
            resource_id: i64,
            versions: &[Version],
        ) -> MetadataResult<()> {
            if versions.is_empty() {
                return Ok(());
            }

            let mut tx = self.pool.begin().await?;

            let mut check_order: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(check_order), 0) FROM versioned_resources WHERE resource_id = ?",
            )
            .bind(resource_id)
            .fetch_one(&mut *tx)
            .await?;

            for version in versions {
                check_order += 1;
                sqlx::query(
                    r#"
                    INSERT INTO versioned_resources (resource_id, version, version_hash, check_order)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT (resource_id, version_hash)
                    DO UPDATE SET check_order = excluded.check_order
                    "#,
                )
                .bind(resource_id)
                .bind(serde_json::to_string(version)?)
                .bind(version.hash()?.to_hex())
                .bind(check_order)
                .execute(&mut *tx)
                .await
                .map_err(|e| match crate::constraint::classify(&e) {
                    Some(crate::constraint::ConstraintViolation::ForeignKey { .. }) => {
                        MetadataError::NotFound(format!("resource {resource_id}"))
                    }
                    _ => MetadataError::Database(e),
                })?;
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
                 FROM versioned_resources WHERE resource_id = ? \
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
                 FROM versioned_resources WHERE resource_id = ? ORDER BY check_order",
            )
            .bind(resource_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl LeaseRepo for SqliteStore {
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

            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "INSERT INTO resource_checking_leases (resource_id, last_checked_ms) \
                 VALUES (?, 0) ON CONFLICT (resource_id) DO NOTHING",
            )
            .bind(resource_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| match crate::constraint::classify(&e) {
                Some(crate::constraint::ConstraintViolation::ForeignKey { .. }) => {
                    MetadataError::NotFound(format!("resource {resource_id}"))
                }
                _ => MetadataError::Database(e),
            })?;

            let result = sqlx::query(
                r#"
                UPDATE resource_checking_leases
                SET lease_id = ?, last_checked_ms = ?, expires_at_ms = ?
                WHERE resource_id = ?
                  AND (expires_at_ms IS NULL OR expires_at_ms <= ?)
                  AND (? OR last_checked_ms <= ?)
                "#,
            )
            .bind(lease_id)
            .bind(now)
            .bind(expires_at_ms)
            .bind(resource_id)
            .bind(now)
            .bind(immediate)
            .bind(now.saturating_sub(ttl))
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

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
                 WHERE resource_id = ? AND lease_id = ?",
            )
            .bind(lease.resource_id)
            .bind(lease.lease_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS teams (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS pipelines (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    paused INTEGER NOT NULL DEFAULT 0,
    UNIQUE (team_id, name)
);

CREATE TABLE IF NOT EXISTS resources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_id INTEGER NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    config TEXT NOT NULL,
    check_error TEXT,
    paused INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1,
    UNIQUE (pipeline_id, name)
);

CREATE TABLE IF NOT EXISTS resource_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_id INTEGER NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    config TEXT NOT NULL,
    version TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    UNIQUE (pipeline_id, name)
);

CREATE TABLE IF NOT EXISTS builds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
    pipeline_id INTEGER REFERENCES pipelines(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS base_resource_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

-- Config identities. Exactly one parent is set.
CREATE TABLE IF NOT EXISTS resource_configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_cache_id INTEGER REFERENCES resource_caches(id) ON DELETE CASCADE,
    base_resource_type_id INTEGER REFERENCES base_resource_types(id) ON DELETE CASCADE,
    source_hash TEXT NOT NULL,
    CHECK ((resource_cache_id IS NULL) <> (base_resource_type_id IS NULL)),
    UNIQUE (resource_cache_id, source_hash),
    UNIQUE (base_resource_type_id, source_hash)
);

CREATE TABLE IF NOT EXISTS resource_caches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_config_id INTEGER NOT NULL REFERENCES resource_configs(id) ON DELETE CASCADE,
    version TEXT NOT NULL,
    version_hash TEXT NOT NULL,
    params TEXT NOT NULL,
    params_hash TEXT NOT NULL,
    UNIQUE (resource_config_id, version_hash, params_hash)
);

-- Usage ledger. Exactly one user column is set.
CREATE TABLE IF NOT EXISTS resource_config_uses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_config_id INTEGER NOT NULL,
    build_id INTEGER REFERENCES builds(id) ON DELETE CASCADE,
    resource_id INTEGER REFERENCES resources(id) ON DELETE CASCADE,
    resource_type_id INTEGER REFERENCES resource_types(id) ON DELETE CASCADE,
    CONSTRAINT resource_config_uses_resource_config_id_fkey
        FOREIGN KEY (resource_config_id) REFERENCES resource_configs(id) ON DELETE CASCADE,
    CHECK ((build_id IS NOT NULL) + (resource_id IS NOT NULL) + (resource_type_id IS NOT NULL) = 1)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_config_uses_build
    ON resource_config_uses (resource_config_id, build_id) WHERE build_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_config_uses_resource
    ON resource_config_uses (resource_config_id, resource_id) WHERE resource_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_config_uses_resource_type
    ON resource_config_uses (resource_config_id, resource_type_id) WHERE resource_type_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS resource_cache_uses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_cache_id INTEGER NOT NULL,
    build_id INTEGER REFERENCES builds(id) ON DELETE CASCADE,
    resource_id INTEGER REFERENCES resources(id) ON DELETE CASCADE,
    resource_type_id INTEGER REFERENCES resource_types(id) ON DELETE CASCADE,
    CONSTRAINT resource_cache_uses_resource_cache_id_fkey
        FOREIGN KEY (resource_cache_id) REFERENCES resource_caches(id) ON DELETE CASCADE,
    CHECK ((build_id IS NOT NULL) + (resource_id IS NOT NULL) + (resource_type_id IS NOT NULL) = 1)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_cache_uses_build
    ON resource_cache_uses (resource_cache_id, build_id) WHERE build_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_cache_uses_resource
    ON resource_cache_uses (resource_cache_id, resource_id) WHERE resource_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_cache_uses_resource_type
    ON resource_cache_uses (resource_cache_id, resource_type_id) WHERE resource_type_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS versioned_resources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_id INTEGER NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
    version TEXT NOT NULL,
    version_hash TEXT NOT NULL,
    check_order INTEGER NOT NULL,
    UNIQUE (resource_id, version_hash)
);
CREATE INDEX IF NOT EXISTS idx_versioned_resources_order
    ON versioned_resources (resource_id, check_order);

CREATE TABLE IF NOT EXISTS resource_checking_leases (
    resource_id INTEGER PRIMARY KEY REFERENCES resources(id) ON DELETE CASCADE,
    lease_id BLOB,
    last_checked_ms INTEGER NOT NULL DEFAULT 0,
    expires_at_ms INTEGER
);
"#;
