//! Lineage traversal over the flat parent table.
//!
//! Candidates refer to their parents by index into the population, so the
//! lineage is an arena of ids. Traversal uses an explicit worklist with a
//! visited set; deep lineages never grow the call stack.

use std::collections::BTreeSet;

/// Every transitive ancestor of `node`, excluding `node` itself.
///
/// Parent ids outside the table are ignored.
pub fn ancestors(parents: &[Vec<usize>], node: usize) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    let mut worklist: Vec<usize> = parents.get(node).cloned().unwrap_or_default();

    while let Some(id) = worklist.pop() {
        if id >= parents.len() || !seen.insert(id) {
            continue;
        }
        worklist.extend(parents[id].iter().copied().filter(|p| !seen.contains(p)));
    }

    seen
}

/// True when `candidate` appears in the ancestry of `node`.
pub fn is_ancestor(parents: &[Vec<usize>], candidate: usize, node: usize) -> bool {
    ancestors(parents, node).contains(&candidate)
}

/// Ancestors shared by `a` and `b`.
pub fn common_ancestors(parents: &[Vec<usize>], a: usize, b: usize) -> BTreeSet<usize> {
    let left = ancestors(parents, a);
    let right = ancestors(parents, b);
    left.intersection(&right).copied().collect()
}
