//! Window lifecycle management.
//!
//! [`WindowTree`] tracks parent/child relationships so that destroying a
//! window recursively destroys its descendants, even though the wire
//! protocol itself has no notion of a window's children (only its
//! `transient_for`/`parent` link at CREATE time).

use std::collections::HashMap;
use std::num::NonZeroU32;

/// Tracks parent/child edges between windows.  A window not present here is,
/// as far as this crate is concerned, not a window this agent created.
#[derive(Debug, Default)]
pub(crate) struct WindowTree {
    nodes: HashMap<NonZeroU32, Node>,
    next_id: u32,
}

#[derive(Debug, Default)]
struct Node {
    parent: Option<NonZeroU32>,
    children: Vec<NonZeroU32>,
}

impl WindowTree {
    /// Allocates a fresh window id and registers it under `parent`.  The
    /// agent, not the host, chooses window ids; this never reuses an id
    /// still live in the tree, to make races with in-flight events on a
    /// just-destroyed id less likely.
    pub(crate) fn allocate(&mut self, parent: Option<NonZeroU32>) -> NonZeroU32 {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if let Some(id) = NonZeroU32::new(self.next_id) {
                if !self.nodes.contains_key(&id) {
                    self.nodes.insert(
                        id,
                        Node {
                            parent,
                            children: Vec::new(),
                        },
                    );
                    if let Some(parent) = parent {
                        if let Some(p) = self.nodes.get_mut(&parent) {
                            p.children.push(id);
                        }
                    }
                    return id;
                }
            }
        }
    }

    /// Removes `id` and returns the full set of windows to destroy, in
    /// leaf-first order: every descendant of `id`, followed by `id` itself.
    pub(crate) fn remove_subtree(&mut self, id: NonZeroU32) -> Vec<NonZeroU32> {
        let mut order = Vec::new();
        self.collect_postorder(id, &mut order);
        for &w in &order {
            if let Some(node) = self.nodes.remove(&w) {
                if let Some(parent) = node.parent {
                    if let Some(p) = self.nodes.get_mut(&parent) {
                        p.children.retain(|&c| c != w);
                    }
                }
            }
        }
        order
    }

    fn collect_postorder(&self, id: NonZeroU32, out: &mut Vec<NonZeroU32>) {
        if let Some(node) = self.nodes.get(&id) {
            for &child in &node.children.clone() {
                self.collect_postorder(child, out);
            }
        }
        out.push(id);
    }

    pub(crate) fn contains(&self, id: NonZeroU32) -> bool {
        self.nodes.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroying_a_parent_destroys_children_first() {
        let mut tree = WindowTree::default();
        let root = tree.allocate(None);
        let child = tree.allocate(Some(root));
        let grandchild = tree.allocate(Some(child));

        let order = tree.remove_subtree(root);
        assert_eq!(order, vec![grandchild, child, root]);
        assert!(!tree.contains(root));
        assert!(!tree.contains(child));
        assert!(!tree.contains(grandchild));
    }

    #[test]
    fn ids_are_not_reused_while_live() {
        let mut tree = WindowTree::default();
        let a = tree.allocate(None);
        let b = tree.allocate(None);
        assert_ne!(a, b);
    }
}
