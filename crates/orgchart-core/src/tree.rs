//! Pure tree algebra over materialized ancestor paths.
//!
//! An ancestor path is a comma-separated chain of node ids starting at the
//! virtual root sentinel: `"0"` for roots, `"0,<root>,<parent>"` below them.
//! Nothing here touches storage.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::ids::ROOT_SENTINEL;
use crate::models::organization::{AncestorRewrite, OrgTreeNode, Organization};

/// Ancestor path of a child of `parent_id`, given the parent's own path.
pub fn compute_ancestors(parent_ancestors: &str, parent_id: &str) -> String {
    if parent_id == ROOT_SENTINEL {
        return ROOT_SENTINEL.to_string();
    }
    match parent_ancestors {
        "" | ROOT_SENTINEL => format!("{ROOT_SENTINEL},{parent_id}"),
        path => format!("{path},{parent_id}"),
    }
}

/// True iff `needle` is one of the comma-delimited segments of `ancestors`.
pub fn is_on_path(needle: &str, ancestors: &str) -> bool {
    ancestors.split(',').any(|seg| seg == needle)
}

/// True iff `candidate` lies strictly below `ancestor_id`.
pub fn is_descendant(ancestor_id: Uuid, candidate: &Organization) -> bool {
    candidate.id != ancestor_id && is_on_path(&ancestor_id.to_string(), &candidate.ancestors)
}

/// Replace a leading `old_prefix` with `new_prefix`.
///
/// The prefix only matches on a segment boundary, so `0,a` never rewrites
/// `0,ab`. Paths that do not start with `old_prefix` are returned as-is.
pub fn rewrite_prefix(ancestors: &str, old_prefix: &str, new_prefix: &str) -> String {
    match ancestors.strip_prefix(old_prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with(',') => format!("{new_prefix}{rest}"),
        _ => ancestors.to_string(),
    }
}

/// New paths for every descendant when their common prefix changes.
pub fn descendant_rewrites(
    descendants: &[Organization],
    old_prefix: &str,
    new_prefix: &str,
) -> Vec<AncestorRewrite> {
    descendants
        .iter()
        .map(|node| AncestorRewrite {
            id: node.id,
            ancestors: rewrite_prefix(&node.ancestors, old_prefix, new_prefix),
        })
        .collect()
}

/// Ids on a path, excluding the sentinel and anything unparsable.
pub fn path_ids(ancestors: &str) -> Vec<Uuid> {
    ancestors
        .split(',')
        .filter(|seg| *seg != ROOT_SENTINEL)
        .filter_map(|seg| Uuid::parse_str(seg).ok())
        .collect()
}

/// Root-to-node chain of ids, ending with the node itself.
pub fn path_of(node: &Organization) -> Vec<Uuid> {
    let mut path = path_ids(&node.ancestors);
    path.push(node.id);
    path
}

/// ASCII-only lowercase fold; other characters pass through unchanged.
pub fn fold_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

pub fn name_matches(name: &str, folded_keyword: &str) -> bool {
    fold_name(name).contains(folded_keyword)
}

/// Keep nodes whose name contains `keyword`, or that have an ancestor
/// whose name does. A blank keyword keeps everything.
pub fn retain_by_name(nodes: Vec<Organization>, keyword: &str) -> Vec<Organization> {
    let needle = fold_name(keyword.trim());
    if needle.is_empty() {
        return nodes;
    }

    let matched: HashSet<Uuid> = nodes
        .iter()
        .filter(|n| name_matches(&n.name, &needle))
        .map(|n| n.id)
        .collect();

    nodes
        .into_iter()
        .filter(|n| {
            matched.contains(&n.id) || path_ids(&n.ancestors).iter().any(|a| matched.contains(a))
        })
        .collect()
}

/// Assemble a forest from a flat node list in a single pass.
///
/// Roots are nodes without a parent. Nodes whose parent is not in the
/// input are dropped together with everything below them. Siblings are
/// ordered by `(sort_order, id)`.
pub fn build_forest(nodes: &[Organization]) -> Vec<OrgTreeNode> {
    let index: HashMap<Uuid, usize> = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut roots = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        match node.parent_id {
            None => roots.push(i),
            Some(parent) => {
                if let Some(&p) = index.get(&parent) {
                    children[p].push(i);
                }
            }
        }
    }

    let key = |i: &usize| (nodes[*i].sort_order, nodes[*i].id);
    roots.sort_by_key(key);
    for list in &mut children {
        list.sort_by_key(key);
    }

    roots
        .into_iter()
        .map(|i| assemble(nodes, &children, i))
        .collect()
}

fn assemble(nodes: &[Organization], children: &[Vec<usize>], at: usize) -> OrgTreeNode {
    let mut node = OrgTreeNode::leaf(&nodes[at]);
    node.children = children[at]
        .iter()
        .map(|&c| assemble(nodes, children, c))
        .collect();
    node
}
