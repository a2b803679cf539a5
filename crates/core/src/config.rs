//! Configuration types shared across crates.

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `LOOKOUT_SCANNER__EXTERNAL_URL`.
pub const ENV_PREFIX: &str = "LOOKOUT_";

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (testing and single-node deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// WARNING: Prefer LOOKOUT_METADATA__PASSWORD over storing in config.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/lookout.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("metadata.max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Scanner configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Interval used when a resource declares no `check_every`, when it is
    /// paused, and when its own interval fails to parse.
    #[serde(default = "default_check_interval_secs")]
    pub default_check_interval_secs: u64,
    /// Backoff between lease attempts in `scan`.
    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,
    /// Externally reachable URL, exported to checks as `EXTERNAL_URL`.
    #[serde(default)]
    pub external_url: String,
    /// Attempts at config find-or-create before giving up on conflicts.
    #[serde(default = "default_find_or_create_max_attempts")]
    pub find_or_create_max_attempts: u32,
    /// How often the radar looks for added or removed resources.
    #[serde(default = "default_resource_sync_interval_secs")]
    pub resource_sync_interval_secs: u64,
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_lock_retry_interval_ms() -> u64 {
    1000
}

fn default_find_or_create_max_attempts() -> u32 {
    5
}

fn default_resource_sync_interval_secs() -> u64 {
    10
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            default_check_interval_secs: default_check_interval_secs(),
            lock_retry_interval_ms: default_lock_retry_interval_ms(),
            external_url: String::new(),
            find_or_create_max_attempts: default_find_or_create_max_attempts(),
            resource_sync_interval_secs: default_resource_sync_interval_secs(),
        }
    }
}

impl ScannerConfig {
    pub fn default_check_interval(&self) -> Duration {
        Duration::from_secs(self.default_check_interval_secs)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }

    pub fn resource_sync_interval(&self) -> Duration {
        Duration::from_secs(self.resource_sync_interval_secs)
    }

    /// Validate scanner settings that would otherwise spin or never run.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_check_interval_secs == 0 {
            return Err("scanner.default_check_interval_secs cannot be 0".to_string());
        }
        if self.lock_retry_interval_ms == 0 {
            return Err("scanner.lock_retry_interval_ms cannot be 0".to_string());
        }
        if self.find_or_create_max_attempts == 0 {
            return Err("scanner.find_or_create_max_attempts cannot be 0".to_string());
        }
        if self.resource_sync_interval_secs == 0 {
            return Err("scanner.resource_sync_interval_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
}

impl AppConfig {
    /// Load configuration from an optional TOML file, overridden by
    /// `LOOKOUT_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.exists() {
                return Err(crate::Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| crate::Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.metadata.validate().map_err(crate::Error::Config)?;
        self.scanner.validate().map_err(crate::Error::Config)?;
        Ok(())
    }

    /// **For testing only.** SQLite metadata at the default path.
    pub fn for_testing() -> Self {
        Self {
            metadata: MetadataConfig::default(),
            scanner: ScannerConfig {
                external_url: "https://ci.example.com".to_string(),
                ..ScannerConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_scanner_config_defaults() {
        let config: ScannerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.default_check_interval(), Duration::from_secs(60));
        assert_eq!(config.lock_retry_interval(), Duration::from_secs(1));
        assert_eq!(config.find_or_create_max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[metadata]
type = "postgres"
url = "postgres://lookout@localhost/lookout"

[scanner]
default_check_interval_secs = 30
external_url = "https://ci.example.com"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.scanner.default_check_interval_secs, 30);
        assert_eq!(config.scanner.lock_retry_interval_ms, 1000);
        assert_eq!(config.scanner.external_url, "https://ci.example.com");
        match config.metadata {
            MetadataConfig::Postgres {
                url,
                max_connections,
                ..
            } => {
                assert_eq!(url.as_deref(), Some("postgres://lookout@localhost/lookout"));
                assert_eq!(max_connections, 10);
            }
            _ => panic!("expected postgres config"),
        }
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scanner]\nlock_retry_interval_ms = 0").unwrap();
        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("lock_retry_interval_ms"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/lookout.toml"))).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_postgres_validate_requires_database() {
        let config = MetadataConfig::Postgres {
            url: None,
            host: Some("localhost".to_string()),
            port: Some(5432),
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            max_connections: 10,
            statement_timeout_ms: None,
        };
        assert!(config.validate().is_err());
    }
}
