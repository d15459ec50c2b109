//! JSON Schema loading for catalog documents.
//!
//! A catalog directory may ship its own `polyfill_catalog.schema.json`; when it
//! does not, the copy compiled into the crate is used. Either way the schema's
//! `schema_version` const is checked against the allowed set before the
//! validator is compiled.

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;

/// File name of a catalog-local schema override.
pub(crate) const CATALOG_SCHEMA_FILE: &str = "polyfill_catalog.schema.json";

const EMBEDDED_CATALOG_SCHEMA: &str = include_str!("../schema/polyfill_catalog.schema.json");

/// Result of loading and compiling a JSON Schema.
pub(crate) struct SchemaLoadResult {
    pub schema_version: String,
    pub compiled: JSONSchema,
}

/// Controls how schemas are normalized before compilation.
pub(crate) struct SchemaLoadOptions<'a> {
    /// Where to find the schema_version const inside the schema payload.
    pub schema_version_pointer: &'a str,
    /// Allowed schema_version values; enforced when present.
    pub allowed_versions: Option<&'a BTreeSet<String>>,
}

impl Default for SchemaLoadOptions<'_> {
    fn default() -> Self {
        Self {
            schema_version_pointer: "/properties/schema_version/const",
            allowed_versions: None,
        }
    }
}

/// Load the schema that governs `catalog_dir`, preferring a local override.
pub(crate) fn load_catalog_schema(
    catalog_dir: &Path,
    options: SchemaLoadOptions<'_>,
) -> Result<SchemaLoadResult> {
    let local = catalog_dir.join(CATALOG_SCHEMA_FILE);
    if local.is_file() {
        return load_json_schema(&local, options);
    }
    let value: Value =
        serde_json::from_str(EMBEDDED_CATALOG_SCHEMA).context("parsing embedded catalog schema")?;
    compile_schema(value, "embedded catalog schema", options)
}

pub(crate) fn load_json_schema(
    path: &Path,
    options: SchemaLoadOptions<'_>,
) -> Result<SchemaLoadResult> {
    let value: Value = serde_json::from_reader(
        File::open(path).with_context(|| format!("opening schema {}", path.display()))?,
    )
    .with_context(|| format!("parsing schema {}", path.display()))?;
    compile_schema(value, &path.display().to_string(), options)
}

fn compile_schema(
    schema: Value,
    label: &str,
    options: SchemaLoadOptions<'_>,
) -> Result<SchemaLoadResult> {
    let schema_version = extract_schema_version(&schema, options.schema_version_pointer)
        .ok_or_else(|| anyhow!("{label} missing schema_version const"))?;

    if let Some(allowed) = options.allowed_versions {
        if !allowed.contains(&schema_version) {
            bail!(
                "schema_version '{}' not in allowed set {:?}",
                schema_version,
                allowed
            );
        }
    }

    let compiled =
        JSONSchema::compile(&schema).map_err(|err| anyhow!("compiling {label}: {err}"))?;

    Ok(SchemaLoadResult {
        schema_version,
        compiled,
    })
}

/// Validate `instance`, joining every violation into one error.
pub(crate) fn validate_instance(schema: &JSONSchema, instance: &Value, label: &str) -> Result<()> {
    if let Err(errors) = schema.validate(instance) {
        let details = errors
            .map(|err| format!("{}: {}", err.instance_path, err))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("{label} failed schema validation:\n{details}");
    }
    Ok(())
}

fn extract_schema_version(schema: &Value, pointer: &str) -> Option<String> {
    let version = schema.pointer(pointer).and_then(Value::as_str)?;
    if version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        Some(version.to_string())
    } else {
        None
    }
}
