//! Dependency resolver - creation order from the descriptor graph.
//!
//! Depth-first topological sort with three-color marking. Roots and
//! dependencies are visited in declaration order, so resources with no
//! relative dependency keep the order they were declared in.

use crate::error::{Error, Result};
use crate::store::DescriptorStore;
use crate::types::ResourceId;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Resolve the full creation order. Every resource appears after all of its
/// dependencies.
pub fn resolve(store: &DescriptorStore) -> Result<Vec<ResourceId>> {
    let mut marks: HashMap<&ResourceId, Mark> =
        store.iter().map(|d| (&d.id, Mark::Unvisited)).collect();
    let mut path: Vec<&ResourceId> = Vec::new();
    let mut order = Vec::with_capacity(store.len());

    for d in store.iter() {
        visit(store, &d.id, &mut marks, &mut path, &mut order)?;
    }

    debug!(resources = order.len(), "resolved apply order");
    Ok(order)
}

/// Resolve only `targets` plus the transitive closure of their dependencies,
/// in the same relative order as the full resolution.
pub fn resolve_targets(store: &DescriptorStore, targets: &[ResourceId]) -> Result<Vec<ResourceId>> {
    for t in targets {
        if !store.contains(t) {
            return Err(Error::UnknownTarget(t.to_string()));
        }
    }

    let full = resolve(store)?;

    let mut closure: HashSet<ResourceId> = HashSet::new();
    let mut stack: Vec<ResourceId> = targets.to_vec();
    while let Some(id) = stack.pop() {
        if !closure.insert(id.clone()) {
            continue;
        }
        if let Some(d) = store.get(&id) {
            stack.extend(d.dependencies());
        }
    }

    Ok(full.into_iter().filter(|id| closure.contains(id)).collect())
}

/// Resolve with an optional target subset; `None` or empty means everything.
pub fn resolve_subset(
    store: &DescriptorStore,
    targets: Option<&[ResourceId]>,
) -> Result<Vec<ResourceId>> {
    match targets {
        Some(t) if !t.is_empty() => resolve_targets(store, t),
        _ => resolve(store),
    }
}

/// Teardown order: dependents before their prerequisites.
pub fn teardown_order(store: &DescriptorStore) -> Result<Vec<ResourceId>> {
    let mut order = resolve(store)?;
    order.reverse();
    Ok(order)
}

fn visit<'a>(
    store: &'a DescriptorStore,
    id: &'a ResourceId,
    marks: &mut HashMap<&'a ResourceId, Mark>,
    path: &mut Vec<&'a ResourceId>,
    order: &mut Vec<ResourceId>,
) -> Result<()> {
    match marks.get(id).copied().unwrap_or(Mark::Done) {
        Mark::Done => return Ok(()),
        Mark::InProgress => {
            let start = path.iter().position(|p| *p == id).unwrap_or(0);
            let mut cycle: Vec<ResourceId> = path[start..].iter().map(|p| (*p).clone()).collect();
            cycle.push(id.clone());
            return Err(Error::CyclicDependency { cycle });
        }
        Mark::Unvisited => {}
    }

    let Some(descriptor) = store.get(id) else {
        return Ok(());
    };

    marks.insert(id, Mark::InProgress);
    path.push(id);

    let mut deps: Vec<&'a ResourceId> = descriptor
        .dependencies()
        .iter()
        .filter_map(|dep| store.get(dep).map(|d| &d.id))
        .collect();
    deps.sort_by_key(|d| store.position(d));

    for dep in deps {
        visit(store, dep, marks, path, order)?;
    }

    path.pop();
    marks.insert(id, Mark::Done);
    order.push(id.clone());
    Ok(())
}
