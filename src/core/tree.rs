//! Pure operations over a snapshot of a message mapping.
//!
//! Nothing in here mutates its input: structural edits clone the mapping and
//! return the new version so the store can diff old against new. Every walk
//! keeps a visited set, so malformed input (cycles, dangling links) can make
//! a result incomplete but never makes a walk loop.

use std::collections::{HashMap, HashSet};

use super::message::{Message, MessageId};

/// Message records keyed by id.
pub type History = HashMap<MessageId, Message>;

/// Linearize the tree by following the first child at every fork.
///
/// The first entry of `children_ids` is the earliest-created branch, so the
/// default path always shows the original branch at each fork; later edits
/// and regenerations appear as siblings after it. Starting from `start_id`
/// walks one path; without it every root is walked, roots ordered by
/// timestamp and then id.
pub fn traverse_default_path(history: &History, start_id: Option<&MessageId>) -> Vec<Message> {
    let mut result = Vec::new();
    let mut visited = HashSet::new();

    let starts: Vec<&MessageId> = match start_id {
        Some(id) => vec![id],
        None => roots(history).into_iter().map(|m| &m.id).collect(),
    };

    for start in starts {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let Some(message) = history.get(id) else {
                break;
            };
            if !visited.insert(id.clone()) {
                break;
            }
            result.push(message.clone());
            cursor = message.children_ids.first();
        }
    }

    result
}

/// Root messages, oldest first.
pub fn roots(history: &History) -> Vec<&Message> {
    let mut roots: Vec<&Message> = history.values().filter(|m| m.is_root()).collect();
    roots.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    roots
}

/// Every id reachable through `children_ids`, in depth-first discovery order.
pub fn find_descendants(history: &History, id: &MessageId) -> Vec<MessageId> {
    let mut descendants = Vec::new();
    let mut visited: HashSet<&MessageId> = HashSet::from([id]);
    let mut stack: Vec<&MessageId> = match history.get(id) {
        Some(message) => message.children_ids.iter().rev().collect(),
        None => return descendants,
    };

    while let Some(child_id) = stack.pop() {
        if !visited.insert(child_id) {
            continue;
        }
        descendants.push(child_id.clone());
        if let Some(child) = history.get(child_id) {
            stack.extend(child.children_ids.iter().rev());
        }
    }

    descendants
}

/// Ancestors of `id`, root first. Empty for a root or an unknown id.
pub fn find_ancestors(history: &History, id: &MessageId) -> Vec<MessageId> {
    let mut ancestors = Vec::new();
    let mut visited: HashSet<&MessageId> = HashSet::from([id]);
    let mut current = history.get(id).and_then(|m| m.parent_id.as_ref());

    while let Some(parent_id) = current {
        if !visited.insert(parent_id) {
            break;
        }
        ancestors.push(parent_id.clone());
        current = history.get(parent_id).and_then(|m| m.parent_id.as_ref());
    }

    ancestors.reverse();
    ancestors
}

/// Remove `id`, handing its children to its own parent.
///
/// The children take the deleted node's slot in the parent's
/// `children_ids`, keeping their relative order, so deleting an interior
/// node collapses it instead of orphaning the subtree. Without a parent the
/// children become roots. Unknown ids return an unchanged copy.
pub fn delete_node(history: &History, id: &MessageId) -> History {
    let mut next = history.clone();
    let Some(removed) = next.remove(id) else {
        return next;
    };

    let grandparent = removed.parent_id.clone();
    let orphans: Vec<MessageId> = removed
        .children_ids
        .iter()
        .filter(|child| *child != id && next.contains_key(*child))
        .cloned()
        .collect();

    if let Some(parent) = grandparent.as_ref().and_then(|pid| next.get_mut(pid)) {
        let mut spliced = Vec::with_capacity(parent.children_ids.len() + orphans.len());
        let mut placed = false;
        for child in parent.children_ids.drain(..) {
            if &child == id {
                if !placed {
                    spliced.extend(orphans.iter().cloned());
                    placed = true;
                }
            } else {
                spliced.push(child);
            }
        }
        if !placed {
            spliced.extend(orphans.iter().cloned());
        }
        let mut seen = HashSet::new();
        spliced.retain(|child| seen.insert(child.clone()));
        parent.children_ids = spliced;
    }

    for child_id in &orphans {
        if let Some(child) = next.get_mut(child_id) {
            child.parent_id = grandparent.clone();
        }
    }

    for message in next.values_mut() {
        message.children_ids.retain(|child| child != id);
    }

    next
}

/// Add `message` as the last child of `parent_id`.
///
/// The message's own `parent_id` is overwritten with the linkage actually
/// made, and it enters as a leaf. A parent that is missing or belongs to a
/// different conversation makes the message a root. An id that is already
/// present leaves the history unchanged.
pub fn insert_node(history: &History, message: Message, parent_id: Option<&MessageId>) -> History {
    let mut next = history.clone();
    if next.contains_key(&message.id) {
        tracing::debug!(message = %message.id, "insert skipped: id already present");
        return next;
    }

    let mut message = message;
    message.children_ids.clear();
    message.parent_id = None;

    if let Some(parent_id) = parent_id {
        match next.get_mut(parent_id) {
            Some(parent) if parent.conversation_id == message.conversation_id => {
                parent.children_ids.push(message.id.clone());
                message.parent_id = Some(parent_id.clone());
            }
            _ => {
                tracing::debug!(
                    message = %message.id,
                    parent = %parent_id,
                    "insert parent unavailable; adding as root"
                );
            }
        }
    }

    next.insert(message.id.clone(), message);
    next
}

/// Check the forest invariants: parent links resolve within the same
/// conversation, `children_ids` agree with `parent_id` in both directions,
/// and no node is its own ancestor.
pub fn is_consistent(history: &History) -> bool {
    for message in history.values() {
        if let Some(parent_id) = &message.parent_id {
            match history.get(parent_id) {
                Some(parent)
                    if parent.conversation_id == message.conversation_id
                        && parent.children_ids.contains(&message.id) => {}
                _ => return false,
            }
        }
        let mut seen = HashSet::new();
        for child_id in &message.children_ids {
            if !seen.insert(child_id) {
                return false;
            }
            match history.get(child_id) {
                Some(child) if child.parent_id.as_ref() == Some(&message.id) => {}
                _ => return false,
            }
        }
    }

    history.keys().all(|id| {
        let mut visited = HashSet::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if !visited.insert(node) {
                return false;
            }
            current = history.get(node).and_then(|m| m.parent_id.as_ref());
        }
        true
    })
}
