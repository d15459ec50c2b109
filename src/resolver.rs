//! Feature resolution: requested names → closed, filtered polyfill set.
//!
//! Requested names are expanded through alias groups, then a FIFO work queue
//! walks dependency edges. Each capability is decided once per distinct set of
//! request-level flags it has been reached with: excluded capabilities and
//! capabilities the client already ships are dropped without visiting their
//! dependencies; everything else is recorded with the alias and dependency
//! paths that reached it.
//!
//! Exclusion is global: an excluded name is dropped on every path unless it
//! was also requested by its own name.

use crate::catalog::{ALL_GROUP, Capability, CatalogEntry, CatalogIndex, EntryId, Flag, FlagSet};
use crate::error::{PolyfillError, PolyfillResult};
use crate::graph;
use crate::targeting::{ClientTarget, TargetingEvaluator, UnknownPolicy};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info, warn};

/// Per-feature request options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureOptions {
    /// Flags added to the catalog's own flags for this feature, its alias
    /// members and everything it pulls in. For `all` they filter instead.
    #[serde(default)]
    pub flags: FlagSet,
}

/// One resolution call's inputs, using the service's wire field names.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResolutionRequest {
    #[serde(default)]
    pub features: BTreeMap<String, FeatureOptions>,
    #[serde(default)]
    pub excludes: BTreeSet<String>,
    /// Raw client identifier; absent and unparsable are handled alike.
    #[serde(default, rename = "uaString")]
    pub client: Option<String>,
    #[serde(default)]
    pub unknown: UnknownPolicy,
}

impl ResolutionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feature(self, name: &str) -> Self {
        self.with_flagged_feature(name, [])
    }

    pub fn with_flagged_feature(
        mut self,
        name: &str,
        flags: impl IntoIterator<Item = Flag>,
    ) -> Self {
        self.features
            .entry(name.to_string())
            .or_default()
            .flags
            .extend(flags);
        self
    }

    pub fn with_exclude(mut self, name: &str) -> Self {
        self.excludes.insert(name.to_string());
        self
    }

    pub fn with_client(mut self, raw: &str) -> Self {
        self.client = Some(raw.to_string());
        self
    }

    pub fn with_unknown(mut self, policy: UnknownPolicy) -> Self {
        self.unknown = policy;
        self
    }
}

/// Why one capability ended up in a resolution.
#[derive(Clone, Debug, Serialize)]
pub struct ResolutionEntry {
    #[serde(skip)]
    pub name: String,
    pub flags: FlagSet,
    /// Alias names, in discovery order, whose expansion reached this entry.
    #[serde(rename = "aliasOf")]
    pub alias_of: Vec<String>,
    /// Included capabilities, in discovery order, that depend on this entry.
    #[serde(rename = "dependencyOf")]
    pub dependency_of: Vec<String>,
}

impl ResolutionEntry {
    /// Requested by name and not reached any other way.
    pub fn is_direct_only(&self) -> bool {
        self.alias_of.is_empty() && self.dependency_of.is_empty()
    }
}

// Provenance order is for reproducible output only; membership decides equality.
impl PartialEq for ResolutionEntry {
    fn eq(&self, other: &Self) -> bool {
        fn as_set(items: &[String]) -> BTreeSet<&str> {
            items.iter().map(String::as_str).collect()
        }
        self.name == other.name
            && self.flags == other.flags
            && as_set(&self.alias_of) == as_set(&other.alias_of)
            && as_set(&self.dependency_of) == as_set(&other.dependency_of)
    }
}

impl Eq for ResolutionEntry {}

/// Resolved capability set plus request bookkeeping.
///
/// Serializes as the bare `name → entry` mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub entries: BTreeMap<String, ResolutionEntry>,
    /// Feature names as requested, for bundle banners.
    pub requested: Vec<String>,
    /// Requested names that matched nothing in the catalog.
    pub unknown_features: Vec<String>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &str) -> Option<&ResolutionEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Serialize for Resolution {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.entries.serialize(serializer)
    }
}

struct Seed {
    id: EntryId,
    overrides: FlagSet,
    alias_of: Vec<String>,
}

#[derive(Default)]
struct NodeState {
    overrides: FlagSet,
    alias_of: Vec<String>,
    dependency_of: Vec<String>,
    decided_with: Option<FlagSet>,
    included: bool,
}

struct Closure<'a> {
    index: &'a CatalogIndex,
    evaluator: TargetingEvaluator<'a>,
    excludes: &'a BTreeSet<String>,
    direct: BTreeSet<EntryId>,
    nodes: BTreeMap<EntryId, NodeState>,
    queue: VecDeque<EntryId>,
    queued: BTreeSet<EntryId>,
}

/// Resolve `request` against one catalog snapshot for an already-normalized
/// client (`None` when the identifier was missing or unparsable).
pub fn resolve(
    index: &CatalogIndex,
    client: Option<&ClientTarget>,
    request: &ResolutionRequest,
) -> PolyfillResult<Resolution> {
    let evaluator = TargetingEvaluator::new(client, request.unknown);
    let mut resolution = Resolution {
        requested: request.features.keys().cloned().collect(),
        ..Default::default()
    };

    let (seeds, direct) = expand_requested(index, request, &mut resolution.unknown_features);

    // Cycles anywhere under the request fail it, whatever the client skips.
    let reachable = graph::dependency_closure(index, seeds.iter().map(|seed| seed.id));
    graph::topological_order(index, &reachable)
        .map_err(|cycle| PolyfillError::DependencyCycle(graph::names(index, &cycle)))?;

    if evaluator.ignores_everything() {
        info!(
            requested = resolution.requested.len(),
            "unknown client with unknown=ignore; nothing to polyfill"
        );
        return Ok(resolution);
    }

    let mut closure = Closure {
        index,
        evaluator,
        excludes: &request.excludes,
        direct,
        nodes: BTreeMap::new(),
        queue: VecDeque::new(),
        queued: BTreeSet::new(),
    };
    for seed in seeds {
        closure.offer(seed.id, &seed.overrides, &seed.alias_of, None);
    }
    closure.run();

    let included: BTreeSet<EntryId> = closure
        .nodes
        .iter()
        .filter(|(_, state)| state.included)
        .map(|(id, _)| *id)
        .collect();
    for id in included {
        let Some(capability) = index.capability_by_id(id) else {
            continue;
        };
        let Some(state) = closure.nodes.remove(&id) else {
            continue;
        };
        let flags = closure.effective_flags(capability, &state.overrides);
        let name = capability.name.as_str().to_string();
        resolution.entries.insert(
            name.clone(),
            ResolutionEntry {
                name,
                flags,
                alias_of: state.alias_of,
                dependency_of: state.dependency_of,
            },
        );
    }

    info!(
        requested = resolution.requested.len(),
        resolved = resolution.entries.len(),
        unknown = resolution.unknown_features.len(),
        client = %client.map(ToString::to_string).unwrap_or_else(|| "unknown".to_string()),
        "resolved polyfill set"
    );
    Ok(resolution)
}

fn push_unique(items: &mut Vec<String>, item: &str) {
    if !items.iter().any(|existing| existing == item) {
        items.push(item.to_string());
    }
}

fn expand_requested(
    index: &CatalogIndex,
    request: &ResolutionRequest,
    unknown: &mut Vec<String>,
) -> (Vec<Seed>, BTreeSet<EntryId>) {
    let mut seeds = Vec::new();
    let mut direct = BTreeSet::new();

    for (name, options) in &request.features {
        if name == ALL_GROUP {
            for (id, capability) in index.capabilities() {
                if options.flags.iter().all(|flag| capability.flags.contains(flag)) {
                    seeds.push(Seed {
                        id,
                        overrides: FlagSet::new(),
                        alias_of: vec![ALL_GROUP.to_string()],
                    });
                }
            }
            continue;
        }

        let Some(id) = index.lookup(name) else {
            warn!(feature = %name, "requested feature is not in the catalog; skipping");
            push_unique(unknown, name);
            continue;
        };
        match index.entry(id) {
            CatalogEntry::Concrete(_) => {
                direct.insert(id);
                seeds.push(Seed {
                    id,
                    overrides: options.flags.clone(),
                    alias_of: Vec::new(),
                });
            }
            CatalogEntry::Alias(_) => {
                let mut chain = Vec::new();
                expand_alias(index, id, &options.flags, &mut chain, &mut seeds);
            }
        }
    }

    (seeds, direct)
}

fn expand_alias(
    index: &CatalogIndex,
    id: EntryId,
    flags: &FlagSet,
    chain: &mut Vec<String>,
    seeds: &mut Vec<Seed>,
) {
    let CatalogEntry::Alias(alias) = index.entry(id) else {
        return;
    };
    if chain.iter().any(|name| name == alias.name.as_str()) {
        return;
    }
    chain.push(alias.name.as_str().to_string());
    for &member in &alias.members {
        match index.entry(member) {
            CatalogEntry::Concrete(_) => seeds.push(Seed {
                id: member,
                overrides: flags.clone(),
                alias_of: chain.clone(),
            }),
            CatalogEntry::Alias(_) => expand_alias(index, member, flags, chain, seeds),
        }
    }
    chain.pop();
}

impl<'a> Closure<'a> {
    /// Record a path to `id` and queue it if it is new or gained flags.
    fn offer(
        &mut self,
        id: EntryId,
        overrides: &FlagSet,
        alias_of: &[String],
        dependent: Option<&str>,
    ) {
        let state = self.nodes.entry(id).or_default();
        for alias in alias_of {
            push_unique(&mut state.alias_of, alias);
        }
        if let Some(dependent) = dependent {
            push_unique(&mut state.dependency_of, dependent);
        }
        let grew = overrides.iter().any(|flag| !state.overrides.contains(flag));
        state.overrides.extend(overrides.iter().cloned());

        if (state.decided_with.is_none() || grew) && self.queued.insert(id) {
            self.queue.push_back(id);
        }
    }

    fn run(&mut self) {
        while let Some(id) = self.queue.pop_front() {
            self.queued.remove(&id);
            self.decide(id);
        }
    }

    fn decide(&mut self, id: EntryId) {
        let index = self.index;
        let Some(capability) = index.capability_by_id(id) else {
            return;
        };
        let name = capability.name.as_str();

        let overrides = {
            let Some(state) = self.nodes.get_mut(&id) else {
                return;
            };
            if state.decided_with.as_ref() == Some(&state.overrides) {
                return;
            }
            state.decided_with = Some(state.overrides.clone());
            state.overrides.clone()
        };

        if self.excludes.contains(name) && !self.direct.contains(&id) {
            debug!(capability = name, "excluded by request");
            return;
        }

        let flags = self.effective_flags(capability, &overrides);
        if self.evaluator.skips(capability, &flags) {
            debug!(capability = name, "natively supported by client; skipping");
            return;
        }

        if let Some(state) = self.nodes.get_mut(&id) {
            state.included = true;
        }
        debug!(capability = name, flags = ?flags, "including polyfill");
        for dep in &capability.dependencies {
            self.offer(*dep, &overrides, &[], Some(name));
        }
    }

    fn effective_flags(&self, capability: &Capability, overrides: &FlagSet) -> FlagSet {
        let mut flags: FlagSet = capability.flags.union(overrides).cloned().collect();
        if self.evaluator.polyfills_everything() {
            flags.insert(Flag::Gated);
        }
        flags
    }
}
