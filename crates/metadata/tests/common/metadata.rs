//! Backends for store tests.

use lookout_metadata::{MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore};
use sqlx::{Pool, Postgres as PgDb, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Marks errors caused by Docker being unavailable rather than by the store.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// A SQLite store in a temporary directory, removed on drop.
pub struct TestMetadata {
    sqlite: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

impl TestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| MetadataError::Internal(format!("temp dir: {e}")))?;
        let sqlite = SqliteStore::new(temp_dir.path().join("lookout.db"), None).await?;
        Ok(Self {
            sqlite: Arc::new(sqlite),
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.sqlite.clone()
    }

    /// Raw access, for simulating the collector.
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite.pool()
    }
}

/// A PostgreSQL store in a throwaway container.
pub struct PostgresTestMetadata {
    postgres: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

impl PostgresTestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                MetadataError::Internal(format!("{POSTGRES_CONTAINER_START_ERR_PREFIX} {e}"))
            })?;
        let host = container
            .get_host()
            .await
            .map_err(|e| MetadataError::Internal(format!("container host: {e}")))?;
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .map_err(|e| MetadataError::Internal(format!("container port: {e}")))?;

        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let postgres = PostgresStore::from_url(&url, 16, None).await?;
        Ok(Self {
            postgres: Arc::new(postgres),
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.postgres.clone()
    }

    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<PgDb> {
        self.postgres.pool()
    }
}

/// `None` when `SKIP_POSTGRES_TESTS` is set or Docker cannot start the
/// container; any other setup failure panics.
#[allow(dead_code)]
pub async fn postgres_or_skip() -> Option<PostgresTestMetadata> {
    if std::env::var_os("SKIP_POSTGRES_TESTS").is_some() {
        return None;
    }
    match PostgresTestMetadata::new().await {
        Ok(metadata) => Some(metadata),
        Err(err) if err.to_string().contains(POSTGRES_CONTAINER_START_ERR_PREFIX) => {
            eprintln!("skipping postgres test: {err}");
            None
        }
        Err(err) => panic!("postgres test setup failed: {err}"),
    }
}

/// Run `test_fn` on SQLite, then on PostgreSQL when available.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestMetadata::new().await.expect("sqlite test store");
    test_fn(sqlite.store()).await;

    if let Some(postgres) = postgres_or_skip().await {
        test_fn(postgres.store()).await;
    }
}
