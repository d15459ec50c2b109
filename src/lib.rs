//! Polyfill feature resolution and bundle assembly.
//!
//! The crate turns a request (feature names, exclusions, a client identifier)
//! into the minimal set of polyfills that client needs, and packages their
//! source fragments into one dependency-ordered script. The catalog is loaded
//! once into an immutable snapshot; requests never mutate it, so any number of
//! threads can resolve against the same snapshot while a reload swaps in a new
//! one for later requests.
//!
//! Layers, bottom-up: [`catalog`] (on-disk format, validation, the indexed
//! snapshot), [`targeting`] (client identifiers and version ranges),
//! [`resolver`] (closure computation with provenance), [`bundle`] (ordering
//! and emission), and [`engine`] (the two request entry points).

use anyhow::{Result, bail};
use std::env;
use std::path::PathBuf;

pub mod bundle;
pub mod catalog;
pub mod engine;
pub mod error;
mod graph;
pub mod resolver;
mod schema_loader;
pub mod targeting;

pub use bundle::{
    Assembler, Bundle, BundleOptions, BundleStream, DirectorySourceStore, MemorySourceStore,
    Minifier, SourceStore, WhitespaceMinifier,
};
pub use catalog::{
    ALL_GROUP, Capability, CapabilityName, CatalogIndex, CatalogKey, CatalogLoader,
    CatalogRepository, DirectoryCatalogLoader, Flag, FlagSet, SourceRef, load_catalog_from_path,
};
pub use engine::PolyfillEngine;
pub use error::{PolyfillError, PolyfillResult};
pub use resolver::{FeatureOptions, Resolution, ResolutionEntry, ResolutionRequest, resolve};
pub use targeting::{
    ClientNormalizer, ClientTarget, FamilyVersionNormalizer, UnknownPolicy, Version, VersionRange,
};

/// Environment override for the catalog directory.
pub const CATALOG_DIR_ENV: &str = "POLYFILL_CATALOG_DIR";

/// Locate the catalog directory when none was given explicitly.
///
/// Honors `POLYFILL_CATALOG_DIR` first, then the location baked in at build
/// time. Either candidate must contain a `catalog.json`.
pub fn default_catalog_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var(CATALOG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    if let Some(hint) = option_env!("POLYFILL_CATALOG_HINT") {
        let candidate = PathBuf::from(hint);
        if candidate.join(catalog::CATALOG_FILE).is_file() {
            return Ok(candidate);
        }
    }

    bail!("Unable to locate a polyfill catalog. Pass --catalog or set {CATALOG_DIR_ENV}.")
}

/// Split comma- or whitespace-delimited lists into tokens.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .replace(',', " ")
        .split_whitespace()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a feature list such as `es6,Math.sign|gated|always` into request
/// features. Flags after `|` are added to that feature's options.
pub fn parse_feature_list(value: &str) -> Result<Vec<(String, FlagSet)>> {
    let mut features = Vec::new();
    for token in split_list(value) {
        let mut parts = token.split('|');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            bail!("feature entry '{token}' has no name");
        }
        let flags: FlagSet = parts
            .map(str::trim)
            .filter(|flag| !flag.is_empty())
            .map(Flag::from_str)
            .collect();
        features.push((name.to_string(), flags));
    }
    Ok(features)
}
