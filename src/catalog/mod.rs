//! Polyfill catalog wiring.
//!
//! This module wraps the on-disk catalog (`catalog.json` plus `sources/`) so
//! the resolver can work against a validated, immutable snapshot. Types in
//! `model` mirror the document; callers use `CatalogIndex` for lookups and
//! `CatalogRepository` when the snapshot may be hot-reloaded.

pub mod identity;
pub mod index;
pub mod model;
pub mod repository;

pub use identity::{ALL_GROUP, CapabilityName, CatalogKey, Flag, FlagSet, SourceRef};
pub use index::{CATALOG_SCHEMA_VERSION, CatalogIndex};
pub use model::{
    AliasGroup, CATALOG_FILE, Capability, CapabilityConfig, CatalogEntry, CatalogMetadata,
    EntryId, PolyfillCatalog,
};
pub use repository::{CatalogLoader, CatalogRepository, DirectoryCatalogLoader};

pub use model::load_catalog_from_path;
