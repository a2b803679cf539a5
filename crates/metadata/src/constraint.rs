//! Driver-neutral classification of constraint violations.

use sqlx::error::ErrorKind;

/// Foreign key from a config usage edge to its config.
pub const CONFIG_USES_CONFIG_FKEY: &str = "resource_config_uses_resource_config_id_fkey";

/// Foreign key from a cache usage edge to its cache.
pub const CACHE_USES_CACHE_FKEY: &str = "resource_cache_uses_resource_cache_id_fkey";

/// A unique or foreign-key violation reported by the database.
///
/// `constraint` is set when the driver names the violated constraint
/// (PostgreSQL does, SQLite does not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintViolation {
    Unique { constraint: Option<String> },
    ForeignKey { constraint: Option<String> },
}

impl ConstraintViolation {
    pub fn constraint(&self) -> Option<&str> {
        match self {
            Self::Unique { constraint } | Self::ForeignKey { constraint } => constraint.as_deref(),
        }
    }
}

/// Classify a driver error, returning `None` for anything that is not a
/// unique or foreign-key violation.
pub fn classify(err: &sqlx::Error) -> Option<ConstraintViolation> {
    let db_err = err.as_database_error()?;
    let constraint = db_err.constraint().map(str::to_string);
    match db_err.kind() {
        ErrorKind::UniqueViolation => Some(ConstraintViolation::Unique { constraint }),
        ErrorKind::ForeignKeyViolation => Some(ConstraintViolation::ForeignKey { constraint }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_unclassified() {
        assert_eq!(classify(&sqlx::Error::RowNotFound), None);
        assert_eq!(classify(&sqlx::Error::PoolTimedOut), None);
    }

    #[test]
    fn test_constraint_accessor() {
        let violation = ConstraintViolation::ForeignKey {
            constraint: Some(CONFIG_USES_CONFIG_FKEY.to_string()),
        };
        assert_eq!(violation.constraint(), Some(CONFIG_USES_CONFIG_FKEY));
        assert_eq!(ConstraintViolation::Unique { constraint: None }.constraint(), None);
    }
}
