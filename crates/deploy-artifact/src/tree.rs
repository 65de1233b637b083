//! Arena tree
//!
//! [`Tree<T>`] stores every node in one arena addressed by stable [`NodeId`]s. A node
//! holds its value, an ordered list of children and the id of its parent. Removing a
//! child detaches its whole subtree; detached ids are never reused.
//!
//! # Concurrency
//!
//! The arena sits behind a single `RwLock`. Traversals take the lock per step and never
//! hold it while user callbacks run, so callbacks may read (or even extend) the tree.

use parking_lot::RwLock;
use std::fmt;

/// Stable index of a node within its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Raw arena index
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors raised by tree mutation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// Node id does not belong to this tree
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Node was removed from the tree
    #[error("node {0} is detached")]
    Detached(NodeId),

    /// `child` is not a direct child of `parent`
    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    /// A tree cannot be grafted onto itself
    #[error("cannot graft a tree onto itself")]
    SelfGraft,
}

#[derive(Debug)]
struct Slot<T> {
    value: T,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attached: bool,
}

/// Ordered tree of values with parent back-references
#[derive(Debug)]
pub struct Tree<T> {
    slots: RwLock<Vec<Slot<T>>>,
}

impl<T: Clone> Tree<T> {
    /// Create a tree holding a single root node
    #[must_use]
    pub fn new(root: T) -> Self {
        Self {
            slots: RwLock::new(vec![Slot {
                value: root,
                parent: None,
                children: Vec::new(),
                attached: true,
            }]),
        }
    }

    /// Id of the root node
    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Append a child below `parent`
    ///
    /// # Errors
    /// Returns error if `parent` is unknown or detached
    pub fn add_child(&self, parent: NodeId, value: T) -> Result<NodeId, TreeError> {
        let mut slots = self.slots.write();
        check_attached(&slots, parent)?;
        let id = NodeId(slots.len());
        slots.push(Slot {
            value,
            parent: Some(parent),
            children: Vec::new(),
            attached: true,
        });
        slots[parent.0].children.push(id);
        Ok(id)
    }

    /// Copy every node of `other` below `parent`, preserving shape and order
    ///
    /// Returns the id the root of `other` received in this tree.
    ///
    /// # Errors
    /// Returns error if `parent` is unknown or detached, or `other` is this tree
    pub fn graft(&self, parent: NodeId, other: &Tree<T>) -> Result<NodeId, TreeError> {
        if std::ptr::eq(self, other) {
            return Err(TreeError::SelfGraft);
        }
        let source = other.slots.read();
        let mut slots = self.slots.write();
        check_attached(&slots, parent)?;

        let new_root = NodeId(slots.len());
        let mut pending = vec![(other.root(), parent)];
        while let Some((source_id, target_parent)) = pending.pop() {
            let slot = &source[source_id.0];
            let id = NodeId(slots.len());
            slots.push(Slot {
                value: slot.value.clone(),
                parent: Some(target_parent),
                children: Vec::new(),
                attached: true,
            });
            slots[target_parent.0].children.push(id);
            pending.extend(slot.children.iter().rev().map(|child| (*child, id)));
        }
        Ok(new_root)
    }

    /// Detach `child` and its subtree from `parent`
    ///
    /// # Errors
    /// Returns error if either node is unknown or `child` is not a direct child of `parent`
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        let mut slots = self.slots.write();
        check_attached(&slots, parent)?;
        check_attached(&slots, child)?;

        let position = slots[parent.0]
            .children
            .iter()
            .position(|c| *c == child)
            .ok_or(TreeError::NotAChild { parent, child })?;
        slots[parent.0].children.remove(position);

        let mut pending = vec![child];
        while let Some(id) = pending.pop() {
            let slot = &mut slots[id.0];
            slot.attached = false;
            pending.extend(slot.children.iter().copied());
        }
        slots[child.0].parent = None;
        Ok(())
    }

    /// Value held by `node`, if attached
    #[must_use]
    pub fn value(&self, node: NodeId) -> Option<T> {
        let slots = self.slots.read();
        slots
            .get(node.0)
            .filter(|slot| slot.attached)
            .map(|slot| slot.value.clone())
    }

    /// Parent of `node`; `None` for the root and for detached nodes
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        let slots = self.slots.read();
        slots
            .get(node.0)
            .filter(|slot| slot.attached)
            .and_then(|slot| slot.parent)
    }

    /// Direct children of `node` in insertion order
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let slots = self.slots.read();
        slots
            .get(node.0)
            .filter(|slot| slot.attached)
            .map(|slot| slot.children.clone())
            .unwrap_or_default()
    }

    /// Ancestors of `node`, nearest first
    #[must_use]
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let slots = self.slots.read();
        let mut result = Vec::new();
        let mut current = slots
            .get(node.0)
            .filter(|slot| slot.attached)
            .and_then(|slot| slot.parent);
        while let Some(id) = current {
            result.push(id);
            current = slots[id.0].parent;
        }
        result
    }

    /// Whether `node` is part of the tree
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.slots.read().get(node.0).is_some_and(|slot| slot.attached)
    }

    /// Number of attached nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().iter().filter(|slot| slot.attached).count()
    }

    /// A tree always has a root, so it is never empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Depth-first pre-order walk starting at `from`
    ///
    /// The visitor returns `false` to skip the children of the node it was given.
    /// Children are read after the visitor returns, so children it adds are visited too.
    pub fn visit<F>(&self, from: NodeId, mut visitor: F)
    where
        F: FnMut(NodeId, &T) -> bool,
    {
        let mut pending = vec![from];
        while let Some(id) = pending.pop() {
            let Some(value) = self.value(id) else {
                continue;
            };
            if visitor(id, &value) {
                pending.extend(self.children(id).into_iter().rev());
            }
        }
    }

    /// Values of the subtree rooted at `from`, in pre-order
    #[must_use]
    pub fn values(&self, from: NodeId) -> Vec<T> {
        let mut values = Vec::new();
        self.visit(from, |_, value| {
            values.push(value.clone());
            true
        });
        values
    }
}

fn check_attached<T>(slots: &[Slot<T>], node: NodeId) -> Result<(), TreeError> {
    match slots.get(node.0) {
        None => Err(TreeError::UnknownNode(node)),
        Some(slot) if !slot.attached => Err(TreeError::Detached(node)),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> (Tree<&'static str>, NodeId, NodeId, NodeId) {
        let tree = Tree::new("root");
        let a = tree.add_child(tree.root(), "a").unwrap();
        let b = tree.add_child(tree.root(), "b").unwrap();
        let a1 = tree.add_child(a, "a1").unwrap();
        (tree, a, b, a1)
    }

    #[test]
    fn preorder_visit() {
        let (tree, ..) = sample();
        assert_eq!(tree.values(tree.root()), vec!["root", "a", "a1", "b"]);
    }

    #[test]
    fn visitor_can_prune() {
        let (tree, a, ..) = sample();
        let mut seen = Vec::new();
        tree.visit(tree.root(), |id, value| {
            seen.push(*value);
            id != a
        });
        assert_eq!(seen, vec!["root", "a", "b"]);
    }

    #[test]
    fn parents_and_ancestors() {
        let (tree, a, b, a1) = sample();
        assert_eq!(tree.parent(tree.root()), None);
        assert_eq!(tree.parent(a1), Some(a));
        assert_eq!(tree.parent(b), Some(tree.root()));
        assert_eq!(tree.ancestors(a1), vec![a, tree.root()]);
    }

    #[test]
    fn remove_detaches_subtree() {
        let (tree, a, _, a1) = sample();
        tree.remove_child(tree.root(), a).unwrap();
        assert!(!tree.contains(a));
        assert!(!tree.contains(a1));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.value(a1), None);
        assert_eq!(tree.add_child(a, "x"), Err(TreeError::Detached(a)));
    }

    #[test]
    fn remove_requires_direct_child() {
        let (tree, _, _, a1) = sample();
        assert_eq!(
            tree.remove_child(tree.root(), a1),
            Err(TreeError::NotAChild { parent: tree.root(), child: a1 })
        );
    }

    #[test]
    fn graft_copies_shape() {
        let (tree, _, b, _) = sample();
        let other = Tree::new("p");
        let q = other.add_child(other.root(), "q").unwrap();
        other.add_child(q, "r").unwrap();
        other.add_child(other.root(), "s").unwrap();

        let grafted = tree.graft(b, &other).unwrap();
        assert_eq!(tree.value(grafted), Some("p"));
        assert_eq!(tree.values(b), vec!["b", "p", "q", "r", "s"]);
    }

    #[test]
    fn graft_onto_itself_is_rejected() {
        let (tree, _, b, _) = sample();
        let before = tree.values(tree.root());
        assert_eq!(tree.graft(b, &tree), Err(TreeError::SelfGraft));
        assert_eq!(tree.values(tree.root()), before);
    }

    proptest! {
        #[test]
        fn prop_every_node_visited_once(parents in proptest::collection::vec(0usize..100, 1..60)) {
            let tree = Tree::new(0usize);
            let mut ids = vec![tree.root()];
            for (i, p) in parents.iter().enumerate() {
                let parent = ids[p % ids.len()];
                ids.push(tree.add_child(parent, i + 1).unwrap());
            }
            let mut values = tree.values(tree.root());
            prop_assert_eq!(values.len(), ids.len());
            values.sort_unstable();
            values.dedup();
            prop_assert_eq!(values.len(), ids.len());
        }
    }
}
