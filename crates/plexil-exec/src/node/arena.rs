//! [`NodeArena`]: owns every [`NodeData`] in a plan, indexed by [`NodeId`].
//! Mirrors [`crate::expr::ExprArena`]'s handle-based design (§9) so neither
//! arena needs reference-counted or cyclic pointers between parent and
//! child nodes.

use super::types::{NodeData, NodeId};

#[derive(Default)]
pub struct NodeArena {
    nodes: Vec<NodeData>,
}

impl NodeArena {
    pub fn new() -> Self {
        NodeArena { nodes: Vec::new() }
    }

    /// Inserts a fully-built node and returns its id. Callers build
    /// `NodeData` with a placeholder id (the next one, which the plan
    /// builder tracks via [`Self::next_id`]) since the id must be known
    /// before the node can reference itself as a child's parent.
    pub fn insert(&mut self, node: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        debug_assert_eq!(node.id, id, "node inserted at an index other than its own id");
        self.nodes.push(node);
        id
    }

    pub fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len())
    }

    pub fn get(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn root(&self) -> NodeId {
        self.nodes
            .iter()
            .find(|n| n.parent.is_none())
            .map(|n| n.id)
            .expect("a non-empty plan always has exactly one root")
    }
}
