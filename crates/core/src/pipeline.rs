//! Pipeline members whose external versions are checked.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Opaque configuration mapping handed to a resource type's check.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Source(BTreeMap<String, Value>);

impl Source {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable content hash over the canonical encoding.
    pub fn hash(&self) -> crate::Result<ContentHash> {
        ContentHash::of_json(&self.0)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Source {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Parameters applied when fetching a cached version.
pub type Params = Source;

/// An opaque key/value version emitted by a check.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(BTreeMap<String, String>);

impl Version {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hash(&self) -> crate::Result<ContentHash> {
        ContentHash::of_json(&self.0)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Version {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// The persisted definition of a resource or resource type, as declared in
/// pipeline configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_every: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A pipeline resource.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    pub id: i64,
    pub name: String,
    pub pipeline_id: i64,
    pub pipeline_name: String,
    pub type_name: String,
    pub source: Source,
    pub check_every: Option<String>,
    pub tags: Vec<String>,
    pub check_error: Option<String>,
    pub paused: bool,
}

/// A pipeline-defined resource type.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceType {
    pub id: i64,
    pub name: String,
    pub pipeline_id: i64,
    pub type_name: String,
    pub source: Source,
    pub check_every: Option<String>,
    pub tags: Vec<String>,
    /// Current version of the type's own image, once it has been checked.
    pub version: Option<Version>,
}

/// A pipeline-defined type together with the version its image resolves to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionedResourceType {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub source: Source,
    pub version: Option<Version>,
}

impl From<&ResourceType> for VersionedResourceType {
    fn from(rt: &ResourceType) -> Self {
        Self {
            name: rt.name.clone(),
            type_name: rt.type_name.clone(),
            source: rt.source.clone(),
            version: rt.version.clone(),
        }
    }
}

/// Find a versioned type by name.
pub fn lookup_type<'a>(
    types: &'a [VersionedResourceType],
    name: &str,
) -> Option<&'a VersionedResourceType> {
    types.iter().find(|t| t.name == name)
}
