//! Public entry points for a delivery layer.
//!
//! `PolyfillEngine` owns the collaborators (catalog repository, client
//! normalizer, source store, minifier). Every request takes one catalog
//! snapshot up front and uses it for both resolution and assembly, so a
//! concurrent reload never mixes two catalogs in one response.

use crate::bundle::{
    Assembler, Bundle, BundleOptions, DirectorySourceStore, Minifier, SourceStore,
    WhitespaceMinifier,
};
use crate::catalog::{CatalogRepository, DirectoryCatalogLoader};
use crate::error::PolyfillResult;
use crate::resolver::{Resolution, ResolutionRequest, resolve};
use crate::targeting::{ClientNormalizer, ClientTarget, FamilyVersionNormalizer};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct PolyfillEngine {
    catalog: Arc<CatalogRepository>,
    normalizer: Arc<dyn ClientNormalizer>,
    sources: Arc<dyn SourceStore>,
    minifier: Arc<dyn Minifier>,
}

impl PolyfillEngine {
    /// Engine with the stock `family/version` normalizer and whitespace
    /// minifier.
    pub fn new(catalog: Arc<CatalogRepository>, sources: Arc<dyn SourceStore>) -> Self {
        Self {
            catalog,
            normalizer: Arc::new(FamilyVersionNormalizer),
            sources,
            minifier: Arc::new(WhitespaceMinifier),
        }
    }

    /// Load `<dir>/catalog.json` and serve fragments from `<dir>/sources`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let repository = CatalogRepository::from_loader(&DirectoryCatalogLoader::new(dir))?;
        Ok(Self::new(
            Arc::new(repository),
            Arc::new(DirectorySourceStore::for_catalog(dir)),
        ))
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn ClientNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_minifier(mut self, minifier: Arc<dyn Minifier>) -> Self {
        self.minifier = minifier;
        self
    }

    /// Shared handle for reloading the catalog while the engine serves.
    pub fn repository(&self) -> &Arc<CatalogRepository> {
        &self.catalog
    }

    /// Resolved capability set with provenance; no source text.
    pub fn get_polyfills(&self, request: &ResolutionRequest) -> PolyfillResult<Resolution> {
        let snapshot = self.catalog.snapshot();
        let client = self.client_for(request);
        resolve(&snapshot, client.as_ref(), request)
    }

    /// Resolve and assemble in one go.
    pub fn get_polyfill_string(
        &self,
        request: &ResolutionRequest,
        options: &BundleOptions,
    ) -> PolyfillResult<Bundle> {
        let snapshot = self.catalog.snapshot();
        let client = self.client_for(request);
        let resolution = resolve(&snapshot, client.as_ref(), request)?;
        Assembler::new(
            snapshot,
            Arc::clone(&self.sources),
            Arc::clone(&self.minifier),
        )
        .assemble(&resolution, options)
    }

    fn client_for(&self, request: &ResolutionRequest) -> Option<ClientTarget> {
        let raw = request.client.as_deref()?;
        let client = self.normalizer.normalize(raw);
        if client.is_none() {
            debug!(raw, "client identifier did not normalize; treating as unknown");
        }
        client
    }
}
