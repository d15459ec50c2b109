//! Bundle assembly: ordered polyfill fragments packaged into one script.
//!
//! The assembler orders a [`Resolution`] so dependencies come first, then
//! produces the artifact as a sequence of chunks: banner, scope opener, one
//! chunk per fragment, scope closer. Buffered output is that same sequence
//! concatenated, so both modes are byte-identical. Fragments are fetched
//! lazily while the stream is pulled; dropping the stream stops all work.

use crate::catalog::{CatalogIndex, EntryId, Flag, SourceRef};
use crate::error::{PolyfillError, PolyfillResult};
use crate::graph;
use crate::resolver::Resolution;
use anyhow::{Context, Result, bail};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const SCOPE_OPEN: &str = "(function(self, undefined) {\n";

const GLOBAL_OBJECT: &str = "('object' === typeof window && window || 'object' === typeof self && self || 'object' === typeof global && global || {})";

/// Directory under a catalog root that holds fragment files.
pub const SOURCES_DIR: &str = "sources";

/// Resolves a capability's [`SourceRef`] to its implementation text.
///
/// `Ok(None)` means the fragment does not exist, which assembly reports as a
/// catalog integrity error; `Err` is a store failure.
pub trait SourceStore: Send + Sync {
    fn fetch(&self, source: &SourceRef) -> Result<Option<String>>;
}

/// Post-processes emitted text; must be a pure function of its input.
pub trait Minifier: Send + Sync {
    fn minify(&self, text: &str) -> Result<String>;
}

/// Reads fragments from files below a root directory.
#[derive(Clone, Debug)]
pub struct DirectorySourceStore {
    root: PathBuf,
}

impl DirectorySourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `<catalog_dir>/sources`.
    pub fn for_catalog(catalog_dir: &Path) -> Self {
        Self::new(catalog_dir.join(SOURCES_DIR))
    }
}

impl SourceStore for DirectorySourceStore {
    fn fetch(&self, source: &SourceRef) -> Result<Option<String>> {
        let candidate = self.root.join(source.as_str());
        if !candidate.is_file() {
            return Ok(None);
        }
        // Refs are catalog data; refuse anything that escapes the root.
        let root = fs::canonicalize(&self.root)
            .with_context(|| format!("canonicalizing {}", self.root.display()))?;
        let canonical = fs::canonicalize(&candidate)
            .with_context(|| format!("canonicalizing {}", candidate.display()))?;
        if !canonical.starts_with(&root) {
            bail!(
                "source ref '{}' resolves outside {}",
                source,
                self.root.display()
            );
        }
        let text = fs::read_to_string(&canonical)
            .with_context(|| format!("reading {}", canonical.display()))?;
        Ok(Some(text))
    }
}

/// In-memory fragments, for embedders and tests.
#[derive(Clone, Debug, Default)]
pub struct MemorySourceStore {
    fragments: BTreeMap<SourceRef, String>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: &str, text: &str) {
        self.fragments
            .insert(SourceRef(source.to_string()), text.to_string());
    }

    pub fn with(mut self, source: &str, text: &str) -> Self {
        self.insert(source, text);
        self
    }
}

impl SourceStore for MemorySourceStore {
    fn fetch(&self, source: &SourceRef) -> Result<Option<String>> {
        Ok(self.fragments.get(source).cloned())
    }
}

/// Trims indentation and drops blank lines and whole-line `//` comments.
#[derive(Clone, Copy, Debug, Default)]
pub struct WhitespaceMinifier;

impl Minifier for WhitespaceMinifier {
    fn minify(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BundleOptions {
    /// Produce a lazy chunk stream instead of one buffered string.
    pub stream: bool,
    /// Run fragments and wrapper through the configured [`Minifier`].
    pub minify: bool,
    /// Global function to call once the polyfills have run.
    pub callback: Option<String>,
}

/// Assembled artifact.
pub enum Bundle {
    Buffered(String),
    Stream(BundleStream),
}

impl Bundle {
    /// Materialize the artifact, draining a stream if necessary.
    pub fn into_string(self) -> PolyfillResult<String> {
        match self {
            Bundle::Buffered(text) => Ok(text),
            Bundle::Stream(stream) => stream.collect(),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Bundle::Stream(_))
    }
}

/// Orders resolutions and packages their fragments.
#[derive(Clone)]
pub struct Assembler {
    catalog: Arc<CatalogIndex>,
    sources: Arc<dyn SourceStore>,
    minifier: Arc<dyn Minifier>,
}

impl Assembler {
    pub fn new(
        catalog: Arc<CatalogIndex>,
        sources: Arc<dyn SourceStore>,
        minifier: Arc<dyn Minifier>,
    ) -> Self {
        Self {
            catalog,
            sources,
            minifier,
        }
    }

    pub fn assemble(
        &self,
        resolution: &Resolution,
        options: &BundleOptions,
    ) -> PolyfillResult<Bundle> {
        let mut nodes = std::collections::BTreeSet::new();
        for name in resolution.names() {
            let id = self
                .catalog
                .lookup(name)
                .filter(|id| self.catalog.capability_by_id(*id).is_some())
                .ok_or_else(|| PolyfillError::UnknownCapability(name.to_string()))?;
            nodes.insert(id);
        }

        let order = graph::topological_order(&self.catalog, &nodes).map_err(|cycle| {
            PolyfillError::DependencyCycle(graph::names(&self.catalog, &cycle))
        })?;

        let pending: VecDeque<Planned> = order
            .iter()
            .map(|id| Planned {
                id: *id,
                gated: resolution
                    .get(self.catalog.name(*id))
                    .is_some_and(|entry| entry.flags.contains(&Flag::Gated)),
            })
            .collect();

        let callback = options.callback.as_deref().and_then(|raw| {
            if is_callback_name(raw) {
                Some(raw.to_string())
            } else {
                warn!(callback = raw, "ignoring callback that is not a dotted identifier");
                None
            }
        });

        debug!(
            fragments = pending.len(),
            stream = options.stream,
            minify = options.minify,
            "assembling bundle"
        );

        let stream = BundleStream {
            banner: render_banner(&self.catalog, resolution, &order, options.minify),
            catalog: Arc::clone(&self.catalog),
            sources: Arc::clone(&self.sources),
            minifier: options.minify.then(|| Arc::clone(&self.minifier)),
            pending,
            callback,
            stage: Stage::Banner,
        };

        if options.stream {
            Ok(Bundle::Stream(stream))
        } else {
            stream.collect::<PolyfillResult<String>>().map(Bundle::Buffered)
        }
    }
}

struct Planned {
    id: EntryId,
    gated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Banner,
    Open,
    Fragments,
    Failed,
    Done,
}

/// Lazy, finite, non-restartable chunk sequence for one bundle.
///
/// Each `next` performs one unit of work. After an error the stream ends.
pub struct BundleStream {
    catalog: Arc<CatalogIndex>,
    sources: Arc<dyn SourceStore>,
    minifier: Option<Arc<dyn Minifier>>,
    banner: String,
    pending: VecDeque<Planned>,
    callback: Option<String>,
    stage: Stage,
}

impl BundleStream {
    /// Fragments not yet produced.
    pub fn remaining_fragments(&self) -> usize {
        self.pending.len()
    }

    fn shape(&self, text: String) -> PolyfillResult<String> {
        match &self.minifier {
            Some(minifier) => minifier
                .minify(&text)
                .map_err(|err| PolyfillError::Minify(format!("{err:#}"))),
            None => Ok(text),
        }
    }

    fn fragment(&self, planned: &Planned) -> PolyfillResult<String> {
        let capability = self
            .catalog
            .capability_by_id(planned.id)
            .ok_or_else(|| PolyfillError::UnknownCapability(self.catalog.name(planned.id).to_string()))?;
        let name = capability.name.as_str();
        let source = self
            .sources
            .fetch(&capability.source)
            .map_err(|err| PolyfillError::SourceStore {
                name: name.to_string(),
                message: format!("{err:#}"),
            })?
            .ok_or_else(|| PolyfillError::MissingSource {
                name: name.to_string(),
                source_ref: capability.source.to_string(),
            })?;
        let body = source.trim_end();

        let text = match (&capability.detect, planned.gated) {
            (Some(detect), true) => {
                format!("\n// {name}\nif (!({detect})) {{\n{body}\n}}\n")
            }
            _ => format!("\n// {name}\n{body}\n"),
        };
        Ok(text)
    }

    fn closing(&self) -> String {
        let mut text = format!("}})\n({GLOBAL_OBJECT});\n");
        if let Some(callback) = &self.callback {
            text.push_str(&format!(
                "\ntypeof {callback} === 'function' && {callback}();\n"
            ));
        }
        text
    }
}

impl Iterator for BundleStream {
    type Item = PolyfillResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = match self.stage {
            Stage::Banner => {
                self.stage = Stage::Open;
                Ok(std::mem::take(&mut self.banner))
            }
            Stage::Open => {
                self.stage = Stage::Fragments;
                self.shape(SCOPE_OPEN.to_string())
            }
            Stage::Fragments => match self.pending.pop_front() {
                Some(planned) => self.fragment(&planned).and_then(|text| self.shape(text)),
                None => {
                    self.stage = Stage::Done;
                    self.shape(self.closing())
                }
            },
            Stage::Failed | Stage::Done => return None,
        };
        if chunk.is_err() {
            self.pending.clear();
            self.stage = Stage::Failed;
        }
        Some(chunk)
    }
}

fn is_callback_name(raw: &str) -> bool {
    !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'))
}

// Request-supplied names end up inside a block comment.
fn comment_safe(text: &str) -> String {
    text.replace("*/", "* /")
}

fn render_banner(
    catalog: &CatalogIndex,
    resolution: &Resolution,
    order: &[EntryId],
    minify: bool,
) -> String {
    let requested = comment_safe(&resolution.requested.join(","));
    if minify {
        return format!(
            "/* Polyfill service v{SERVICE_VERSION} | {} | Features requested: {requested} */\n\n",
            catalog.key().0
        );
    }

    let mut lines = vec![
        format!("/* Polyfill service v{SERVICE_VERSION}"),
        format!(" * Catalog: {}", catalog.key().0),
        " *".to_string(),
        format!(" * Features requested: {requested}"),
        " *".to_string(),
    ];
    if order.is_empty() {
        lines.push(" * No polyfills needed for the current settings".to_string());
    }
    for id in order {
        let name = catalog.name(*id);
        let mut line = format!(" * - {name}");
        if let Some(license) = catalog.capability_by_id(*id).and_then(|c| c.license.as_deref()) {
            line.push_str(&format!(", License: {}", comment_safe(license)));
        }
        if let Some(entry) = resolution.get(name) {
            if !entry.dependency_of.is_empty() {
                let dependents = entry
                    .dependency_of
                    .iter()
                    .map(|d| format!("\"{d}\""))
                    .collect::<Vec<_>>()
                    .join(", ");
                line.push_str(&format!(" (required by {dependents})"));
            }
        }
        lines.push(line);
    }
    let mut banner = lines.join("\n");
    banner.push_str(" */\n\n");
    banner
}
