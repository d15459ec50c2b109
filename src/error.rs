//! Error taxonomy for resolution and assembly.
//!
//! Catalog loading and the CLI report through `anyhow`; the request path uses
//! this typed enum so a delivery layer can tell integrity failures (fatal for
//! the request) from collaborator failures (possibly retryable upstream).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolyfillError {
    #[error("dependency cycle between capabilities: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("capability '{0}' is not a concrete entry of the catalog snapshot")]
    UnknownCapability(String),

    #[error("source fragment '{source_ref}' for capability '{name}' is missing")]
    MissingSource { name: String, source_ref: String },

    #[error("source store failed for capability '{name}': {message}")]
    SourceStore { name: String, message: String },

    #[error("minifier failed: {0}")]
    Minify(String),
}

impl PolyfillError {
    /// Catalog integrity errors indicate a broken snapshot rather than a
    /// failing collaborator.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            PolyfillError::DependencyCycle(_)
                | PolyfillError::UnknownCapability(_)
                | PolyfillError::MissingSource { .. }
        )
    }
}

pub type PolyfillResult<T> = Result<T, PolyfillError>;
