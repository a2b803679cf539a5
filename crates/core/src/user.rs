//! Entities that hold usage edges on configuration identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity referencing a config identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    Build,
    Resource,
    ResourceType,
}

impl UserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Resource => "resource",
            Self::ResourceType => "resource_type",
        }
    }

    /// Column in the usage tables that carries this kind's id.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Build => "build_id",
            Self::Resource => "resource_id",
            Self::ResourceType => "resource_type_id",
        }
    }
}

/// A build, resource, or resource type referencing a config identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ResourceUser {
    Build(i64),
    Resource(i64),
    ResourceType(i64),
}

impl ResourceUser {
    pub fn kind(&self) -> UserKind {
        match self {
            Self::Build(_) => UserKind::Build,
            Self::Resource(_) => UserKind::Resource,
            Self::ResourceType(_) => UserKind::ResourceType,
        }
    }

    pub fn id(&self) -> i64 {
        match *self {
            Self::Build(id) | Self::Resource(id) | Self::ResourceType(id) => id,
        }
    }

    /// Build the user from a usage row's nullable columns.
    ///
    /// Exactly one of the ids must be set.
    pub fn from_columns(
        build_id: Option<i64>,
        resource_id: Option<i64>,
        resource_type_id: Option<i64>,
    ) -> Option<Self> {
        match (build_id, resource_id, resource_type_id) {
            (Some(id), None, None) => Some(Self::Build(id)),
            (None, Some(id), None) => Some(Self::Resource(id)),
            (None, None, Some(id)) => Some(Self::ResourceType(id)),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind().as_str(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_columns_requires_exactly_one() {
        assert_eq!(
            ResourceUser::from_columns(None, Some(7), None),
            Some(ResourceUser::Resource(7))
        );
        assert_eq!(ResourceUser::from_columns(None, None, None), None);
        assert_eq!(ResourceUser::from_columns(Some(1), Some(2), None), None);
    }

    #[test]
    fn test_display_and_column() {
        let user = ResourceUser::ResourceType(3);
        assert_eq!(user.to_string(), "resource_type 3");
        assert_eq!(user.kind().column(), "resource_type_id");
    }
}
