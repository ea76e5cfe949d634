//! The partial core graph: an arena of core constructors keyed by opaque
//! node identities. A child identity with no entry in the arena is a
//! pending position that an expansion task is expected to fill later.

use crate::ast::{Core, CoreShape, NodeId, PartialTree};
use serde::Serialize;
use std::collections::BTreeMap;

/// Allocator for fresh node identities.
#[derive(Debug, Default, Clone, Serialize)]
pub struct NodeIdGen {
    next: u64,
}

impl NodeIdGen {
    pub fn new() -> Self {
        NodeIdGen::default()
    }

    pub fn fresh(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

/// The expander's output representation: a distinguished root plus a map
/// from node identity to constructor. Missing entries are holes. The map
/// is ordered so dumps and debug output are deterministic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialCoreGraph {
    pub root: NodeId,
    pub nodes: BTreeMap<NodeId, CoreShape<NodeId>>,
}

impl PartialCoreGraph {
    pub fn get(&self, id: NodeId) -> Option<&CoreShape<NodeId>> {
        self.nodes.get(&id)
    }

    /// Turn a tree with explicit holes into `(root, map)`. Every known
    /// node gets an entry keyed by a fresh identity; a hole contributes
    /// nothing (its identity stays absent from the map).
    pub fn unzonk(tree: &PartialTree, ids: &mut NodeIdGen) -> PartialCoreGraph {
        let mut nodes = BTreeMap::new();
        let root = unzonk_at(tree, ids, &mut nodes);
        PartialCoreGraph { root, nodes }
    }

    /// The inverse of `unzonk`: walk from the root, producing a hole
    /// wherever a child identity is missing from the map. Total.
    pub fn zonk(&self) -> PartialTree {
        self.zonk_at(self.root)
    }

    fn zonk_at(&self, id: NodeId) -> PartialTree {
        match self.get(id) {
            None => PartialTree::Hole,
            Some(shape) => {
                PartialTree::Node(shape.clone().map(&mut |child| Box::new(self.zonk_at(child))))
            }
        }
    }

    /// True when no hole is reachable from the root.
    pub fn is_complete(&self) -> bool {
        self.complete_at(self.root)
    }

    fn complete_at(&self, id: NodeId) -> bool {
        match self.get(id) {
            None => false,
            Some(shape) => shape.children().iter().all(|c| self.complete_at(**c)),
        }
    }

    /// The finished term, if every position is known.
    pub fn to_core(&self) -> Option<Core> {
        self.zonk().to_core()
    }
}

fn unzonk_at(
    tree: &PartialTree,
    ids: &mut NodeIdGen,
    nodes: &mut BTreeMap<NodeId, CoreShape<NodeId>>,
) -> NodeId {
    let id = ids.fresh();
    if let PartialTree::Node(shape) = tree {
        let shape = shape
            .clone()
            .map(&mut |child| unzonk_at(&child, ids, nodes));
        nodes.insert(id, shape);
    }
    id
}
