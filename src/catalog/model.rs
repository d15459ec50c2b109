//! Deserializable representation of `catalog.json` plus the resolved runtime
//! entries built from it.
//!
//! The `*Config` types mirror the on-disk schema. [`CatalogIndex`] turns them
//! into an arena of [`CatalogEntry`] values whose references are indices, so
//! the dependency graph needs no shared ownership.
//!
//! [`CatalogIndex`]: crate::catalog::CatalogIndex

use crate::catalog::identity::{CapabilityName, CatalogKey, FlagSet, SourceRef};
use crate::targeting::VersionRange;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// File name of the catalog document inside a catalog directory.
pub const CATALOG_FILE: &str = "catalog.json";

#[derive(Clone, Debug, Deserialize)]
/// Full polyfill catalog as stored on disk.
pub struct PolyfillCatalog {
    pub schema_version: String,
    pub catalog: CatalogMetadata,
    pub capabilities: Vec<CapabilityConfig>,
    /// Explicit alias groups; members may name other aliases.
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<CapabilityName>>,
}

#[derive(Clone, Debug, Deserialize)]
/// Identity of the catalog snapshot.
pub struct CatalogMetadata {
    pub key: CatalogKey,
    pub title: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
/// One capability as written in `catalog.json`.
pub struct CapabilityConfig {
    pub name: CapabilityName,
    #[serde(default)]
    pub dependencies: Vec<CapabilityName>,
    /// Alias groups this capability belongs to (e.g. `es6`, `default`).
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub flags: FlagSet,
    /// Client family → versions that ship the capability natively.
    #[serde(default)]
    pub browsers: BTreeMap<String, String>,
    #[serde(default)]
    pub source: Option<SourceRef>,
    #[serde(default)]
    pub detect: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
}

/// Position of an entry inside a [`CatalogIndex`] arena.
///
/// Only meaningful for the snapshot that produced it.
///
/// [`CatalogIndex`]: crate::catalog::CatalogIndex
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EntryId(pub(crate) usize);

#[derive(Clone, Debug)]
/// A concrete capability with its own implementation fragment.
pub struct Capability {
    pub name: CapabilityName,
    /// Concrete dependencies, already alias-expanded.
    pub dependencies: Vec<EntryId>,
    pub flags: FlagSet,
    /// Lowercase client family → native support range.
    pub support: BTreeMap<String, VersionRange>,
    pub source: SourceRef,
    pub detect: Option<String>,
    pub license: Option<String>,
}

#[derive(Clone, Debug)]
/// A name that expands to other entries and has no source of its own.
pub struct AliasGroup {
    pub name: CapabilityName,
    pub members: Vec<EntryId>,
}

#[derive(Clone, Debug)]
pub enum CatalogEntry {
    Concrete(Capability),
    Alias(AliasGroup),
}

impl CatalogEntry {
    pub fn name(&self) -> &CapabilityName {
        match self {
            CatalogEntry::Concrete(capability) => &capability.name,
            CatalogEntry::Alias(alias) => &alias.name,
        }
    }

    pub fn as_capability(&self) -> Option<&Capability> {
        match self {
            CatalogEntry::Concrete(capability) => Some(capability),
            CatalogEntry::Alias(_) => None,
        }
    }
}

/// Read and parse `catalog.json` without additional validation.
///
/// Accepts either the catalog directory or the document itself.
pub fn load_catalog_from_path(path: &Path) -> Result<PolyfillCatalog> {
    let file = if path.is_dir() {
        path.join(CATALOG_FILE)
    } else {
        path.to_path_buf()
    };
    let data =
        fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    let catalog: PolyfillCatalog =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", file.display()))?;
    Ok(catalog)
}
