//! Dependency ordering over a subset of catalog entries.

use crate::catalog::{CatalogIndex, EntryId};
use std::collections::{BTreeMap, BTreeSet};

/// Order `nodes` so every dependency precedes its dependents.
///
/// Only edges between members of `nodes` count. Ties are broken by arena
/// position, keeping the order stable for a fixed snapshot. On failure the
/// entries forming one cycle are returned, starting and ending on the same
/// entry.
pub(crate) fn topological_order(
    index: &CatalogIndex,
    nodes: &BTreeSet<EntryId>,
) -> Result<Vec<EntryId>, Vec<EntryId>> {
    let mut pending: BTreeMap<EntryId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<EntryId, Vec<EntryId>> = BTreeMap::new();

    for &id in nodes {
        let deps = internal_dependencies(index, nodes, id);
        pending.insert(id, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(id);
        }
    }

    let mut ready: BTreeSet<EntryId> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop_first() {
        order.push(id);
        pending.remove(&id);
        for dependent in dependents.get(&id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if pending.is_empty() {
        Ok(order)
    } else {
        Err(find_cycle(index, nodes, &pending))
    }
}

// Every entry left pending still waits on another pending entry, so walking
// pending dependencies must revisit something.
fn find_cycle(
    index: &CatalogIndex,
    nodes: &BTreeSet<EntryId>,
    pending: &BTreeMap<EntryId, usize>,
) -> Vec<EntryId> {
    let Some((&start, _)) = pending.iter().next() else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut current = start;
    loop {
        let next = internal_dependencies(index, nodes, current)
            .into_iter()
            .find(|dep| pending.contains_key(dep));
        let Some(next) = next else {
            return path;
        };
        if let Some(pos) = path.iter().position(|id| *id == next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            return cycle;
        }
        path.push(next);
        current = next;
    }
}

fn internal_dependencies(
    index: &CatalogIndex,
    nodes: &BTreeSet<EntryId>,
    id: EntryId,
) -> Vec<EntryId> {
    let deps: BTreeSet<EntryId> = index
        .capability_by_id(id)
        .map(|capability| {
            capability
                .dependencies
                .iter()
                .copied()
                .filter(|dep| nodes.contains(dep))
                .collect()
        })
        .unwrap_or_default();
    deps.into_iter().collect()
}

/// `roots` plus every capability they depend on, directly or transitively.
pub(crate) fn dependency_closure(
    index: &CatalogIndex,
    roots: impl IntoIterator<Item = EntryId>,
) -> BTreeSet<EntryId> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<EntryId> = roots.into_iter().collect();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(capability) = index.capability_by_id(id) {
            stack.extend(capability.dependencies.iter().copied());
        }
    }
    seen
}

/// Names for a list of entries, for error messages and logs.
pub(crate) fn names(index: &CatalogIndex, ids: &[EntryId]) -> Vec<String> {
    ids.iter().map(|id| index.name(*id).to_string()).collect()
}
