//! Subgraph identity.

use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::str::FromStr;
use std::sync::Arc;

use heck::ToShoutySnakeCase;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;

/// The name of a subgraph participating in the unified schema.
///
/// Names keep the spelling they were supplied with, but compare and hash in
/// constant-case form: letters are uppercased and runs of separators collapse
/// to a single underscore, so `MyApi`, `my_api` and `MY-API` all denote the
/// same subgraph.
#[derive(Clone, Eq)]
pub struct SubgraphName {
    raw: Arc<str>,
    key: Arc<str>,
}

/// The reasons a string cannot be used as a subgraph name.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum InvalidSubgraphName {
    #[error("subgraph name cannot be empty")]
    Empty,
    #[error("subgraph name '{0}' contains no letters or digits")]
    NoAlphanumeric(String),
}

impl SubgraphName {
    pub fn new(name: impl AsRef<str>) -> Result<Self, InvalidSubgraphName> {
        let raw = name.as_ref().trim();
        if raw.is_empty() {
            return Err(InvalidSubgraphName::Empty);
        }
        if !raw.chars().any(|c| c.is_ascii_alphanumeric()) {
            return Err(InvalidSubgraphName::NoAlphanumeric(raw.to_string()));
        }
        let key = raw.to_shouty_snake_case();
        Ok(Self {
            raw: Arc::from(raw),
            key: Arc::from(key.as_str()),
        })
    }

    /// The name as it was supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The constant-case form used for comparisons.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for SubgraphName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Hash for SubgraphName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state)
    }
}

impl fmt::Display for SubgraphName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.raw.fmt(f)
    }
}

impl fmt::Debug for SubgraphName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubgraphName({})", self.raw)
    }
}

impl FromStr for SubgraphName {
    type Err = InvalidSubgraphName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubgraphName::new(s)
    }
}

impl TryFrom<&str> for SubgraphName {
    type Error = InvalidSubgraphName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        SubgraphName::new(value)
    }
}

impl TryFrom<String> for SubgraphName {
    type Error = InvalidSubgraphName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SubgraphName::new(value)
    }
}

impl Serialize for SubgraphName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for SubgraphName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SubgraphName::new(raw).map_err(serde::de::Error::custom)
    }
}
