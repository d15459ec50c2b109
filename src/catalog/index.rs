//! Indexed, validated view of a polyfill catalog.
//!
//! The index enforces the expected schema version and the catalog's integrity
//! rules: unique names, no dangling dependency or alias references, acyclic
//! alias expansion and parsable support ranges. Entries live in a flat arena
//! addressed by [`EntryId`]; dependencies that name an alias are expanded to
//! concrete entries here so the resolver only ever walks concrete edges.
//! Dependency cycles are left for resolution to report, since they only matter
//! for the part of the graph a request actually reaches.

use crate::catalog::identity::{ALL_GROUP, CapabilityName, CatalogKey, SourceRef};
use crate::catalog::model::{
    AliasGroup, CATALOG_FILE, Capability, CatalogEntry, CatalogMetadata, EntryId, PolyfillCatalog,
};
use crate::error::PolyfillError;
use crate::graph;
use crate::schema_loader::{SchemaLoadOptions, load_catalog_schema, validate_instance};
use crate::targeting::VersionRange;
use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// The only catalog document version this crate understands.
pub const CATALOG_SCHEMA_VERSION: &str = "polyfill_catalog_v1";

#[derive(Debug)]
/// Catalog arena plus a name lookup table.
pub struct CatalogIndex {
    metadata: CatalogMetadata,
    entries: Vec<CatalogEntry>,
    by_name: BTreeMap<CapabilityName, EntryId>,
    concrete_len: usize,
}

impl CatalogIndex {
    /// Load and validate a catalog directory (or its `catalog.json`).
    pub fn load(path: &Path) -> Result<Self> {
        let (dir, file) = if path.is_dir() {
            (path.to_path_buf(), path.join(CATALOG_FILE))
        } else {
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| Path::new(".").to_path_buf());
            (dir, path.to_path_buf())
        };

        let value: Value = serde_json::from_reader(BufReader::new(
            File::open(&file).with_context(|| format!("opening catalog {}", file.display()))?,
        ))
        .with_context(|| format!("parsing catalog {}", file.display()))?;

        let allowed = allowed_schema_versions();
        let schema = load_catalog_schema(
            &dir,
            SchemaLoadOptions {
                allowed_versions: Some(&allowed),
                ..Default::default()
            },
        )
        .with_context(|| format!("loading catalog schema for {}", dir.display()))?;
        validate_instance(
            &schema.compiled,
            &value,
            &format!("polyfill catalog {}", file.display()),
        )?;

        let catalog: PolyfillCatalog = serde_json::from_value(value)
            .with_context(|| format!("decoding catalog {}", file.display()))?;
        let index = Self::from_catalog(catalog)
            .with_context(|| format!("validating catalog {}", file.display()))?;
        debug!(
            catalog = %index.key().0,
            schema = %schema.schema_version,
            capabilities = index.concrete_len,
            aliases = index.entries.len() - index.concrete_len,
            "loaded polyfill catalog"
        );
        Ok(index)
    }

    /// Validate an already-parsed catalog and build the arena.
    pub fn from_catalog(catalog: PolyfillCatalog) -> Result<Self> {
        validate_schema_version(&catalog.schema_version)?;
        validate_catalog_metadata(&catalog.catalog)?;
        let concrete_len = catalog.capabilities.len();
        let (entries, by_name) = build_arena(&catalog)?;
        Ok(Self {
            metadata: catalog.catalog,
            entries,
            by_name,
            concrete_len,
        })
    }

    /// The catalog key declared in the loaded document.
    pub fn key(&self) -> &CatalogKey {
        &self.metadata.key
    }

    pub fn metadata(&self) -> &CatalogMetadata {
        &self.metadata
    }

    /// Resolve a capability or alias name to its arena position.
    pub fn lookup(&self, name: &str) -> Option<EntryId> {
        self.by_name.get(name).copied()
    }

    /// Panics on an id from another snapshot.
    pub fn entry(&self, id: EntryId) -> &CatalogEntry {
        &self.entries[id.0]
    }

    pub fn name(&self, id: EntryId) -> &str {
        self.entry(id).name().as_str()
    }

    /// Concrete capability by name; `None` for aliases and unknown names.
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.lookup(name).and_then(|id| self.capability_by_id(id))
    }

    pub fn capability_by_id(&self, id: EntryId) -> Option<&Capability> {
        self.entries.get(id.0).and_then(CatalogEntry::as_capability)
    }

    /// Concrete capabilities in catalog order.
    pub fn capabilities(&self) -> impl Iterator<Item = (EntryId, &Capability)> {
        self.entries[..self.concrete_len]
            .iter()
            .enumerate()
            .filter_map(|(pos, entry)| entry.as_capability().map(|cap| (EntryId(pos), cap)))
    }

    /// Alias groups in name order.
    pub fn aliases(&self) -> impl Iterator<Item = &AliasGroup> {
        self.entries[self.concrete_len..]
            .iter()
            .filter_map(|entry| match entry {
                CatalogEntry::Alias(alias) => Some(alias),
                CatalogEntry::Concrete(_) => None,
            })
    }

    /// All capability and alias names in stable order.
    pub fn names(&self) -> impl Iterator<Item = &CapabilityName> {
        self.by_name.keys()
    }

    pub fn capability_count(&self) -> usize {
        self.concrete_len
    }

    /// Check the whole dependency graph for cycles.
    ///
    /// Resolution only reports cycles it reaches; this is the eager variant for
    /// catalog tooling.
    pub fn check_acyclic(&self) -> Result<(), PolyfillError> {
        let all: BTreeSet<EntryId> = self.capabilities().map(|(id, _)| id).collect();
        graph::topological_order(self, &all)
            .map(|_| ())
            .map_err(|cycle| PolyfillError::DependencyCycle(graph::names(self, &cycle)))
    }
}

fn validate_schema_version(schema_version: &str) -> Result<()> {
    if schema_version.is_empty() {
        bail!("schema_version must not be empty");
    }

    let allowed = allowed_schema_versions();
    if !allowed.contains(schema_version) {
        bail!(
            "schema_version '{}' not in allowed set {:?}",
            schema_version,
            allowed
        );
    }

    Ok(())
}

fn allowed_schema_versions() -> BTreeSet<String> {
    BTreeSet::from_iter([CATALOG_SCHEMA_VERSION.to_string()])
}

fn validate_catalog_metadata(meta: &CatalogMetadata) -> Result<()> {
    validate_catalog_key(&meta.key)?;
    if meta.title.trim().is_empty() {
        bail!("catalog.title must not be empty");
    }
    Ok(())
}

fn validate_catalog_key(key: &CatalogKey) -> Result<()> {
    if key.0.is_empty() {
        bail!("catalog.key must not be empty");
    }

    if !key
        .0
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        bail!("catalog.key must match ^[A-Za-z0-9_.-]+$, got {}", key.0);
    }

    Ok(())
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

fn build_arena(
    catalog: &PolyfillCatalog,
) -> Result<(Vec<CatalogEntry>, BTreeMap<CapabilityName, EntryId>)> {
    if catalog.capabilities.is_empty() {
        bail!("catalog contains no capabilities");
    }

    let mut by_name: BTreeMap<CapabilityName, EntryId> = BTreeMap::new();
    for (pos, cap) in catalog.capabilities.iter().enumerate() {
        let name = cap.name.as_str();
        if name.trim().is_empty() {
            bail!("encountered capability with no name");
        }
        if name == ALL_GROUP {
            bail!("'{ALL_GROUP}' is reserved and cannot name a capability");
        }
        if by_name.insert(cap.name.clone(), EntryId(pos)).is_some() {
            bail!("duplicate capability name {}", name);
        }
    }

    // Group memberships declared on capabilities come first, then explicit
    // alias lists, each in declaration order.
    let mut groups: BTreeMap<String, Vec<CapabilityName>> = BTreeMap::new();
    for cap in &catalog.capabilities {
        for group in &cap.aliases {
            push_unique(groups.entry(group.clone()).or_default(), cap.name.clone());
        }
    }
    for (alias, members) in &catalog.aliases {
        let slot = groups.entry(alias.clone()).or_default();
        for member in members {
            push_unique(slot, member.clone());
        }
    }

    let alias_start = catalog.capabilities.len();
    for (offset, alias) in groups.keys().enumerate() {
        if alias.trim().is_empty() {
            bail!("encountered alias with no name");
        }
        if alias == ALL_GROUP {
            bail!("'{ALL_GROUP}' is reserved and cannot be declared as an alias");
        }
        if by_name.contains_key(alias.as_str()) {
            bail!("alias {} collides with a capability of the same name", alias);
        }
        by_name.insert(CapabilityName(alias.clone()), EntryId(alias_start + offset));
    }

    let lookup = |owner: &str, name: &CapabilityName| -> Result<EntryId> {
        by_name
            .get(name.as_str())
            .copied()
            .ok_or_else(|| anyhow!("{owner} references unknown capability '{name}'"))
    };

    let mut alias_members: Vec<Vec<EntryId>> = Vec::with_capacity(groups.len());
    for (alias, members) in &groups {
        let ids = members
            .iter()
            .map(|member| lookup(&format!("alias {alias}"), member))
            .collect::<Result<Vec<_>>>()?;
        alias_members.push(ids);
    }
    reject_alias_cycles(alias_start, &alias_members, &groups)?;

    let mut entries = Vec::with_capacity(alias_start + groups.len());
    for cap in &catalog.capabilities {
        let owner = format!("capability {}", cap.name);
        let mut dependencies = Vec::new();
        for dep in &cap.dependencies {
            let id = lookup(&owner, dep)?;
            if id.0 < alias_start {
                push_unique(&mut dependencies, id);
            } else {
                for member in concrete_members(id, alias_start, &alias_members) {
                    push_unique(&mut dependencies, member);
                }
            }
        }

        let mut support = BTreeMap::new();
        for (family, range) in &cap.browsers {
            let parsed = VersionRange::parse(range)
                .with_context(|| format!("{owner} has an invalid range for '{family}'"))?;
            support.insert(family.trim().to_ascii_lowercase(), parsed);
        }

        entries.push(CatalogEntry::Concrete(Capability {
            name: cap.name.clone(),
            dependencies,
            flags: cap.flags.clone(),
            support,
            source: cap
                .source
                .clone()
                .unwrap_or_else(|| SourceRef::for_capability(&cap.name)),
            detect: cap.detect.clone().filter(|d| !d.trim().is_empty()),
            license: cap.license.clone(),
        }));
    }

    for ((alias, _), members) in groups.iter().zip(alias_members) {
        entries.push(CatalogEntry::Alias(AliasGroup {
            name: CapabilityName(alias.clone()),
            members,
        }));
    }

    Ok((entries, by_name))
}

fn concrete_members(
    id: EntryId,
    alias_start: usize,
    alias_members: &[Vec<EntryId>],
) -> Vec<EntryId> {
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        if current.0 < alias_start {
            push_unique(&mut out, current);
        } else {
            stack.extend(alias_members[current.0 - alias_start].iter().rev().copied());
        }
    }
    out
}

fn reject_alias_cycles(
    alias_start: usize,
    alias_members: &[Vec<EntryId>],
    groups: &BTreeMap<String, Vec<CapabilityName>>,
) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Active,
        Done,
    }

    fn visit(
        pos: usize,
        alias_start: usize,
        alias_members: &[Vec<EntryId>],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        match marks[pos] {
            Mark::Done => return None,
            Mark::Active => {
                let start = path.iter().position(|p| *p == pos).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(pos);
                return Some(cycle);
            }
            Mark::Unvisited => {}
        }
        marks[pos] = Mark::Active;
        path.push(pos);
        for member in &alias_members[pos] {
            if member.0 >= alias_start {
                if let Some(cycle) =
                    visit(member.0 - alias_start, alias_start, alias_members, marks, path)
                {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks[pos] = Mark::Done;
        None
    }

    let names: Vec<&String> = groups.keys().collect();
    let mut marks = vec![Mark::Unvisited; alias_members.len()];
    for pos in 0..alias_members.len() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(pos, alias_start, alias_members, &mut marks, &mut path) {
            let rendered = cycle
                .iter()
                .map(|p| names[*p].as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            bail!("alias cycle detected: {rendered}");
        }
    }
    Ok(())
}
