//! The replicated spanning-tree topology model (§3, §4.4).
//!
//! Nodes live in a slab (`Vec<Option<Node<S>>>`) addressed by [`NodeId`]
//! rather than through owning parent/child pointers, which would otherwise
//! form a reference cycle (§9 "Cyclic parent/child references"). `Remove`
//! recycles a node's slot; child lists hold plain [`NodeId`]s, so detaching
//! a subtree is just unlinking it from its parent's `children` and walking
//! it to recycle every slot it touches.

use std::collections::HashSet;

use crate::error::CoreError;

/// A handle to a node in a [`ServerTree`]. Stable for the node's lifetime;
/// reused only after the node is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// One known server in the network (§3 `ServerNode`).
#[derive(Debug, Clone)]
pub struct ServerNode<S> {
    pub name: String,
    pub description: String,
    pub version: String,
    pub user_count: u32,
    pub oper_count: u32,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Present iff `parent` is the root — see the tree-level invariant.
    pub socket: Option<S>,
}

impl<S> ServerNode<S> {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// A direct neighbor, per the glossary: a node whose parent is the
    /// root.
    pub fn is_direct_neighbor(&self, root: NodeId) -> bool {
        self.parent == Some(root)
    }
}

enum Slot<S> {
    Occupied(ServerNode<S>),
    Free,
}

/// The rooted, loop-free tree of known servers.
///
/// `S` is the transport-level handle stored on direct-neighbor nodes (a
/// session identifier in `meshd-core`'s caller, typically); the tree itself
/// is agnostic to what it is.
pub struct ServerTree<S> {
    slots: Vec<Slot<S>>,
    free_list: Vec<u32>,
    root: NodeId,
}

impl<S> ServerTree<S> {
    /// Creates a tree whose root represents the local server.
    pub fn new(local_name: impl Into<String>, local_description: impl Into<String>) -> Self {
        let root_node = ServerNode {
            name: local_name.into(),
            description: local_description.into(),
            version: String::new(),
            user_count: 0,
            oper_count: 0,
            parent: None,
            children: Vec::new(),
            socket: None,
        };
        Self {
            slots: vec![Slot::Occupied(root_node)],
            free_list: Vec::new(),
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&ServerNode<S>> {
        match self.slots.get(id.0 as usize) {
            Some(Slot::Occupied(node)) => Some(node),
            _ => None,
        }
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut ServerNode<S>> {
        match self.slots.get_mut(id.0 as usize) {
            Some(Slot::Occupied(node)) => Some(node),
            _ => None,
        }
    }

    /// Adds a new node under `parent`. Fails with
    /// [`CoreError::DuplicateName`] if `name` already exists anywhere in
    /// the tree (§4.4 `Add`).
    pub fn add(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        description: impl Into<String>,
        socket: Option<S>,
    ) -> Result<NodeId, CoreError> {
        let name = name.into();
        if self.find(&name).is_some() {
            return Err(CoreError::DuplicateName { name });
        }
        if self.node(parent).is_none() {
            return Err(CoreError::protocol(
                "tree.unknown_parent",
                "parent node does not exist",
            ));
        }

        let node = ServerNode {
            name,
            description: description.into(),
            version: String::new(),
            user_count: 0,
            oper_count: 0,
            parent: Some(parent),
            children: Vec::new(),
            socket,
        };
        let id = self.insert_slot(node);
        self.node_mut(parent)
            .expect("validated above")
            .children
            .push(id);
        Ok(id)
    }

    fn insert_slot(&mut self, node: ServerNode<S>) -> NodeId {
        if let Some(index) = self.free_list.pop() {
            self.slots[index as usize] = Slot::Occupied(node);
            NodeId(index)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied(node));
            NodeId(index)
        }
    }

    /// Detaches `node` from its parent and recursively removes its subtree,
    /// returning the ids of every node that was removed (including `node`
    /// itself) in depth-first order. Never removes the root. Emits no
    /// network traffic; callers own any user-visible notification (§4.4
    /// `Remove`).
    pub fn remove(&mut self, node: NodeId) -> Vec<NodeId> {
        if node == self.root {
            return Vec::new();
        }
        let Some(parent) = self.node(node).and_then(|n| n.parent) else {
            return Vec::new();
        };
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.retain(|&child| child != node);
        }

        let mut removed = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let children = match self.slots.get(id.0 as usize) {
                Some(Slot::Occupied(n)) => n.children.clone(),
                _ => continue,
            };
            stack.extend(children);
            self.slots[id.0 as usize] = Slot::Free;
            self.free_list.push(id.0);
            removed.push(id);
        }
        removed
    }

    /// Finds the first node named `name` under a pre-order traversal from
    /// the root. Deterministic because names are unique (§4.4 `Find`).
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.preorder().find(|&id| {
            self.node(id)
                .map(|n| n.name == name)
                .unwrap_or(false)
        })
    }

    /// Returns the direct child of the root on the path toward `name`, or
    /// `None` if the server is absent (§4.4 `BestRouteTo`).
    pub fn best_route_to(&self, name: &str) -> Option<NodeId> {
        let mut current = self.find(name)?;
        loop {
            let parent = self.node(current)?.parent?;
            if parent == self.root {
                return Some(current);
            }
            current = parent;
        }
    }

    /// Ordered (insertion-order) children of `node` (§4.4
    /// `EnumerateChildren`).
    pub fn enumerate_children(&self, node: NodeId) -> &[NodeId] {
        self.node(node).map(ServerNode::children).unwrap_or(&[])
    }

    /// Depth of `node` from the root; the root is depth 0 (used as the
    /// burst's `hops` field, §4.5).
    pub fn depth(&self, mut node: NodeId) -> usize {
        let mut depth = 0;
        while let Some(parent) = self.node(node).and_then(|n| n.parent) {
            depth += 1;
            node = parent;
        }
        depth
    }

    /// Depth-first, pre-order traversal of every node reachable from the
    /// root (including the root itself).
    pub fn preorder(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = vec![self.root];
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            if let Some(node) = self.node(id) {
                // Push in reverse so children are visited in insertion order.
                stack.extend(node.children.iter().rev().copied());
            }
            Some(id)
        })
    }

    /// All reachable node ids, as a set, for invariant checking.
    pub(crate) fn reachable_set(&self) -> HashSet<NodeId> {
        self.preorder().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestTree = ServerTree<()>;

    #[test]
    fn add_attaches_under_parent_and_finds_by_name() {
        let mut tree: TestTree = ServerTree::new("root.example", "root");
        let root = tree.root();
        let child = tree.add(root, "a.example", "A", Some(())).unwrap();
        assert_eq!(tree.find("a.example"), Some(child));
        assert_eq!(tree.node(child).unwrap().parent(), Some(root));
        assert!(tree.node(child).unwrap().is_direct_neighbor(root));
    }

    #[test]
    fn add_rejects_duplicate_names() {
        let mut tree: TestTree = ServerTree::new("root.example", "root");
        let root = tree.root();
        tree.add(root, "a.example", "A", Some(())).unwrap();
        let err = tree.add(root, "a.example", "dup", Some(())).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateName { .. }));
    }

    #[test]
    fn best_route_to_resolves_through_intermediate_hops() {
        let mut tree: TestTree = ServerTree::new("root.example", "root");
        let root = tree.root();
        let b = tree.add(root, "b.example", "B", Some(())).unwrap();
        let a = tree.add(b, "a.example", "A", None).unwrap();
        assert_eq!(tree.best_route_to("a.example"), Some(b));
        assert_eq!(tree.best_route_to("b.example"), Some(b));
        assert_eq!(tree.depth(a), 2);
        assert_eq!(tree.depth(b), 1);
    }

    #[test]
    fn remove_detaches_entire_subtree() {
        let mut tree: TestTree = ServerTree::new("root.example", "root");
        let root = tree.root();
        let b = tree.add(root, "b.example", "B", Some(())).unwrap();
        let a = tree.add(b, "a.example", "A", None).unwrap();

        let removed = tree.remove(b);
        assert_eq!(removed.len(), 2);
        assert!(tree.find("a.example").is_none());
        assert!(tree.find("b.example").is_none());
        assert!(!tree.reachable_set().contains(&a));
        assert!(!tree.reachable_set().contains(&b));
    }

    #[test]
    fn remove_on_root_is_a_noop() {
        let mut tree: TestTree = ServerTree::new("root.example", "root");
        let root = tree.root();
        assert!(tree.remove(root).is_empty());
        assert_eq!(tree.find("root.example"), Some(root));
    }

    #[test]
    fn recycled_slot_is_reused_after_remove() {
        let mut tree: TestTree = ServerTree::new("root.example", "root");
        let root = tree.root();
        let b = tree.add(root, "b.example", "B", Some(())).unwrap();
        tree.remove(b);
        let c = tree.add(root, "c.example", "C", Some(())).unwrap();
        assert_eq!(tree.find("c.example"), Some(c));
        // The name is free again once its node is gone.
        tree.add(root, "b.example", "B again", Some(())).unwrap();
    }
}
