//! Pure algorithms over the document forest.
//!
//! Nothing here performs I/O. Functions that restructure the forest take the
//! node list by value and hand back the new list, so untouched branches are
//! moved rather than copied.
//!
//! ## Reconciliation
//!
//! ```text
//!  local (old)                server (new)             merged
//!  ├─ a                       ├─ a   children: []      ├─ a
//!  │  └─ a1  (loaded)         ├─ b                     │  └─ a1   (kept)
//!  └─ c                       └─ c                     ├─ b
//!                                                      └─ c
//! ```
//!
//! The server list is authoritative for *which* siblings exist and in what
//! order; locally loaded grandchildren survive the refresh.

use std::collections::{HashMap, HashSet};

use crate::node::{DocumentNode, FlatDocumentRecord};

/// Depth-first lookup by id.
pub fn find<'a>(nodes: &'a [DocumentNode], id: &str) -> Option<&'a DocumentNode> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(children) = &node.children {
            if let Some(found) = find(children, id) {
                return Some(found);
            }
        }
    }
    None
}

/// Depth-first mutable lookup by id.
pub fn find_mut<'a>(nodes: &'a mut [DocumentNode], id: &str) -> Option<&'a mut DocumentNode> {
    for node in nodes.iter_mut() {
        if node.id == id {
            return Some(node);
        }
        if let Some(children) = node.children.as_mut() {
            if let Some(found) = find_mut(children, id) {
                return Some(found);
            }
        }
    }
    None
}

/// Id of the node whose loaded children contain `id`.
///
/// Returns `None` both for root-level nodes and for ids not in the tree.
pub fn find_parent_id(nodes: &[DocumentNode], id: &str) -> Option<String> {
    for node in nodes {
        if let Some(children) = &node.children {
            if children.iter().any(|child| child.id == id) {
                return Some(node.id.clone());
            }
            if let Some(parent) = find_parent_id(children, id) {
                return Some(parent);
            }
        }
    }
    None
}

/// Replace the node matching `id` with `updater(node)`.
pub fn replace<F>(nodes: Vec<DocumentNode>, id: &str, updater: F) -> Vec<DocumentNode>
where
    F: FnOnce(DocumentNode) -> DocumentNode,
{
    let mut updater = Some(updater);
    replace_inner(nodes, id, &mut updater)
}

fn replace_inner<F>(nodes: Vec<DocumentNode>, id: &str, updater: &mut Option<F>) -> Vec<DocumentNode>
where
    F: FnOnce(DocumentNode) -> DocumentNode,
{
    let mut out = Vec::with_capacity(nodes.len());
    for mut node in nodes {
        if updater.is_none() {
            out.push(node);
            continue;
        }
        if node.id == id {
            match updater.take() {
                Some(apply) => out.push(apply(node)),
                None => out.push(node),
            }
            continue;
        }
        if let Some(children) = node.children.take() {
            node.children = Some(replace_inner(children, id, updater));
        }
        out.push(node);
    }
    out
}

/// Drop the node matching `id` wherever it occurs, along with its subtree.
pub fn remove(nodes: Vec<DocumentNode>, id: &str) -> Vec<DocumentNode> {
    nodes
        .into_iter()
        .filter(|node| node.id != id)
        .map(|mut node| {
            if let Some(children) = node.children.take() {
                node.children = Some(remove(children, id));
            }
            node
        })
        .collect()
}

/// Detach the node matching `id` and return it with its subtree intact.
pub fn take(nodes: &mut Vec<DocumentNode>, id: &str) -> Option<DocumentNode> {
    if let Some(index) = nodes.iter().position(|node| node.id == id) {
        return Some(nodes.remove(index));
    }
    for node in nodes.iter_mut() {
        if let Some(children) = node.children.as_mut() {
            if let Some(found) = take(children, id) {
                return Some(found);
            }
        }
    }
    None
}

/// Reconcile an authoritative sibling list against the locally held one.
///
/// Every node of `new_children` appears in the result, in order. When the
/// local copy of a node already holds a non-empty child list, that list is
/// kept (recursively merged with the incoming children if the server sent
/// any); every other field comes from the server.
///
/// `merge(x, x.clone()) == x` for any forest `x`.
pub fn merge(old_children: &[DocumentNode], new_children: Vec<DocumentNode>) -> Vec<DocumentNode> {
    let previous: HashMap<&str, &DocumentNode> = old_children
        .iter()
        .map(|node| (node.id.as_str(), node))
        .collect();

    new_children
        .into_iter()
        .map(|mut incoming| {
            let existing = previous
                .get(incoming.id.as_str())
                .and_then(|node| node.children.as_deref())
                .filter(|children| !children.is_empty());

            if let Some(existing) = existing {
                let merged = match incoming.children.take() {
                    Some(fresh) if !fresh.is_empty() => merge(existing, fresh),
                    _ => existing.to_vec(),
                };
                incoming.children = Some(merged);
            }
            incoming
        })
        .collect()
}

/// Result of [`build_from_flat_list`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltTree {
    pub nodes: Vec<DocumentNode>,
    /// Every id that is the parent of another returned record.
    pub ancestor_ids: HashSet<String>,
}

/// Nest a flat, `parent_id`-linked list.
///
/// Records whose parent is absent from the list become roots. Siblings are
/// ordered by `position`; ties keep input order.
pub fn build_from_flat_list(records: Vec<FlatDocumentRecord>) -> BuiltTree {
    // Pass 1: index every record by id.
    let mut links: Vec<(String, Option<String>)> = Vec::with_capacity(records.len());
    let mut index: HashMap<String, DocumentNode> = HashMap::with_capacity(records.len());
    for record in records {
        links.push((record.id.clone(), record.parent_id.clone()));
        index.insert(record.id.clone(), record.into_node());
    }

    // Pass 2: attach each record to its parent or to the root list.
    let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
    let mut root_ids = Vec::new();
    let mut ancestor_ids = HashSet::new();
    for (id, parent_id) in links {
        match parent_id {
            Some(parent) if parent != id && index.contains_key(&parent) => {
                ancestor_ids.insert(parent.clone());
                children_of.entry(parent).or_default().push(id);
            }
            _ => root_ids.push(id),
        }
    }

    let mut nodes: Vec<DocumentNode> = root_ids
        .iter()
        .filter_map(|id| assemble(id, &mut index, &children_of))
        .collect();
    nodes.sort_by_key(|node| node.position);

    if !index.is_empty() {
        log::warn!("Dropped {} unreachable records while nesting tree", index.len());
    }

    BuiltTree { nodes, ancestor_ids }
}

fn assemble(
    id: &str,
    index: &mut HashMap<String, DocumentNode>,
    children_of: &HashMap<String, Vec<String>>,
) -> Option<DocumentNode> {
    // Removing from the index as we go also terminates parent cycles.
    let mut node = index.remove(id)?;
    if let Some(child_ids) = children_of.get(id) {
        let mut children: Vec<DocumentNode> = child_ids
            .iter()
            .filter_map(|child| assemble(child, index, children_of))
            .collect();
        children.sort_by_key(|child| child.position);
        node.is_leaf = false;
        node.children = Some(children);
    }
    Some(node)
}

/// Whether `id` lies strictly inside the subtree rooted at `ancestor_id`.
pub fn is_descendant(nodes: &[DocumentNode], ancestor_id: &str, id: &str) -> bool {
    find(nodes, ancestor_id)
        .and_then(|ancestor| ancestor.children.as_deref())
        .is_some_and(|children| find(children, id).is_some())
}

/// Sibling list under `parent_id`, or the root list when `parent_id` is `None`.
pub fn children_of<'a>(nodes: &'a [DocumentNode], parent_id: Option<&str>) -> Option<&'a [DocumentNode]> {
    match parent_id {
        None => Some(nodes),
        Some(parent) => find(nodes, parent).and_then(|node| node.children.as_deref()),
    }
}

/// Overwrite a sibling list. Returns `false` when the parent is not in the tree.
pub fn set_children(nodes: &mut Vec<DocumentNode>, parent_id: Option<&str>, children: Vec<DocumentNode>) -> bool {
    match parent_id {
        None => {
            *nodes = children;
            true
        }
        Some(parent) => match find_mut(nodes, parent) {
            Some(node) => {
                node.children = Some(children);
                true
            }
            None => false,
        },
    }
}

/// Append `child` under `parent_id` (or at root), marking the parent a folder.
pub fn insert_child(nodes: &mut Vec<DocumentNode>, parent_id: Option<&str>, child: DocumentNode) -> bool {
    match parent_id {
        None => {
            nodes.push(child);
            true
        }
        Some(parent) => match find_mut(nodes, parent) {
            Some(node) => {
                node.is_leaf = false;
                node.children.get_or_insert_with(Vec::new).push(child);
                true
            }
            None => false,
        },
    }
}

/// Insert `node` directly after its sibling `sibling_id`, at whatever depth.
pub fn insert_after(nodes: &mut Vec<DocumentNode>, sibling_id: &str, node: DocumentNode) -> bool {
    if let Some(index) = nodes.iter().position(|n| n.id == sibling_id) {
        nodes.insert(index + 1, node);
        return true;
    }
    let mut pending = Some(node);
    for candidate in nodes.iter_mut() {
        if let Some(children) = candidate.children.as_mut() {
            if children_contain(children, sibling_id) {
                if let Some(node) = pending.take() {
                    return insert_after(children, sibling_id, node);
                }
            }
        }
    }
    false
}

fn children_contain(nodes: &[DocumentNode], id: &str) -> bool {
    find(nodes, id).is_some()
}

/// Ids of `node` and everything below it.
pub fn subtree_ids(node: &DocumentNode) -> Vec<String> {
    let mut ids = vec![node.id.clone()];
    if let Some(children) = &node.children {
        for child in children {
            ids.extend(subtree_ids(child));
        }
    }
    ids
}
