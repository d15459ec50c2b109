#![allow(dead_code)]

use anyhow::{Context, Result, bail};
use polyfill_engine::PolyfillEngine;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// The catalog shipped with the repository.
pub fn catalog_dir() -> PathBuf {
    repo_root().join("catalog")
}

pub fn engine() -> PolyfillEngine {
    PolyfillEngine::from_dir(&catalog_dir()).expect("repository catalog loads")
}

pub fn polyfill_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_polyfill"))
}

pub fn run_command(mut cmd: Command) -> Result<Output> {
    let output = cmd
        .output()
        .with_context(|| format!("failed to run command: {:?}", cmd))?;
    if output.status.success() {
        Ok(output)
    } else {
        bail!(
            "command {:?} failed: status {:?}\nstdout: {}\nstderr: {}",
            cmd,
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    }
}

/// Write a catalog directory (`catalog.json` plus `sources/`) into a fresh
/// temp dir. Keep the returned guard alive for as long as the files are used.
pub fn write_catalog(
    key: &str,
    capabilities: Value,
    aliases: Value,
    sources: &[(&str, &str)],
) -> Result<TempDir> {
    let dir = TempDir::new().context("allocating catalog dir")?;
    write_catalog_into(dir.path(), key, capabilities, aliases, sources)?;
    Ok(dir)
}

pub fn write_catalog_into(
    dir: &Path,
    key: &str,
    capabilities: Value,
    aliases: Value,
    sources: &[(&str, &str)],
) -> Result<()> {
    let document = json!({
        "schema_version": "polyfill_catalog_v1",
        "catalog": {"key": key, "title": format!("{key} fixture")},
        "capabilities": capabilities,
        "aliases": aliases,
    });
    fs::write(
        dir.join("catalog.json"),
        serde_json::to_string_pretty(&document)?,
    )
    .context("writing catalog.json")?;

    let source_root = dir.join("sources");
    fs::create_dir_all(&source_root).context("creating sources dir")?;
    for (name, text) in sources {
        fs::write(source_root.join(name), text)
            .with_context(|| format!("writing source {name}"))?;
    }
    Ok(())
}
