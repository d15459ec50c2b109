use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

/// Reserved group name that expands to every concrete capability in the
/// catalog (optionally filtered by flags). Catalogs may not declare it.
pub const ALL_GROUP: &str = "all";

/// Versioned key for a polyfill catalog snapshot (e.g., `polyfills_2024_06`).
///
/// Reported in bundle banners and CLI summaries so consumers can tell which
/// catalog produced an artifact.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogKey(pub String);

/// Unique name of a capability or alias group within one catalog snapshot.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityName(pub String);

/// Opaque handle to a capability's implementation text.
///
/// Interpreted only by a [`crate::bundle::SourceStore`]; the catalog never
/// reads fragment text itself.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(pub String);

/// Behavior modifier attached to a capability or to a requested feature.
///
/// Known variants drive resolution and assembly; `Other` preserves flags from
/// newer catalogs so older binaries can still load them.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Flag {
    /// Wrap the fragment in a runtime presence check.
    Gated,
    /// Bypass targeting; include whenever requested or depended on.
    Always,
    Other(String),
}

/// Flags are kept ordered so serialized output is reproducible.
pub type FlagSet = BTreeSet<Flag>;

impl CapabilityName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CapabilityName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CapabilityName {
    fn from(value: &str) -> Self {
        CapabilityName(value.to_string())
    }
}

impl SourceRef {
    /// Default fragment location for a capability without an explicit `source`.
    pub fn for_capability(name: &CapabilityName) -> Self {
        SourceRef(format!("{}.js", name.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Flag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Flag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::from_str(&value))
    }
}

impl Flag {
    pub fn as_str(&self) -> &str {
        match self {
            Flag::Gated => "gated",
            Flag::Always => "always",
            Flag::Other(value) => value.as_str(),
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value.trim() {
            "gated" => Flag::Gated,
            "always" => Flag::Always,
            other => Flag::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
