//! Holds the current catalog snapshot and swaps it atomically on reload.
//!
//! Readers take an `Arc` snapshot at the start of a request and keep it for
//! the whole request, so a reload never changes data under an in-flight
//! resolution. Nothing here mutates a snapshot in place.

use crate::catalog::identity::CatalogKey;
use crate::catalog::index::CatalogIndex;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Supplies catalog snapshots, at startup and on reload.
pub trait CatalogLoader: Send + Sync {
    fn load(&self) -> Result<CatalogIndex>;
}

/// Loads `catalog.json` from a directory on every call.
#[derive(Clone, Debug)]
pub struct DirectoryCatalogLoader {
    dir: PathBuf,
}

impl DirectoryCatalogLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CatalogLoader for DirectoryCatalogLoader {
    fn load(&self) -> Result<CatalogIndex> {
        CatalogIndex::load(&self.dir)
    }
}

/// Shared, hot-swappable catalog snapshot.
pub struct CatalogRepository {
    current: ArcSwap<CatalogIndex>,
}

impl CatalogRepository {
    pub fn new(index: CatalogIndex) -> Self {
        Self {
            current: ArcSwap::from_pointee(index),
        }
    }

    /// Load the initial snapshot through `loader`.
    pub fn from_loader(loader: &dyn CatalogLoader) -> Result<Self> {
        Ok(Self::new(loader.load()?))
    }

    /// The snapshot new requests should use.
    pub fn snapshot(&self) -> Arc<CatalogIndex> {
        self.current.load_full()
    }

    pub fn key(&self) -> CatalogKey {
        self.current.load().key().clone()
    }

    /// Install a new snapshot, returning the one it replaced.
    pub fn replace(&self, index: CatalogIndex) -> Arc<CatalogIndex> {
        let previous = self.current.swap(Arc::new(index));
        info!(
            previous = %previous.key().0,
            current = %self.current.load().key().0,
            "catalog snapshot replaced"
        );
        previous
    }

    /// Reload through `loader`; on failure the current snapshot stays in place.
    pub fn reload(&self, loader: &dyn CatalogLoader) -> Result<Arc<CatalogIndex>> {
        let index = loader.load()?;
        Ok(self.replace(index))
    }
}
