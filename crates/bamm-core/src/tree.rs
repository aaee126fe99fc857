//! The rooted, time-calibrated binary tree and its map linearization.
//!
//! Newick parsing lives in `bamm-io`; the map/MRCA/inverse-map machinery
//! that the core proposal kernels lean on is implemented here, arena-
//! allocated and addressed by stable [`NodeId`] handles rather than a
//! pointer graph.

use std::collections::HashMap;
use thiserror::Error;

/// Stable handle into [`Tree`]'s node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone)]
pub struct NodeData {
    pub parent: Option<NodeId>,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
    /// Absolute node time; root = 0, tips = maximum (time increases tipward).
    pub time: f64,
    /// Length of the branch connecting this node to its parent (0 for root).
    pub branch_length: f64,
    /// Cumulative map position at the rootward end of the inbound branch.
    pub map_start: f64,
    /// Cumulative map position at the tipward end of the inbound branch.
    pub map_end: f64,
    pub name: Option<String>,
    pub sampling_fraction: f64,
    /// Number of tips in the subtree rooted at this node (1 for tips).
    pub clade_size: u32,
}

impl NodeData {
    pub fn is_tip(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// One row of the builder input: a node defined by its parent (by arena
/// index, `None` for the root) and the branch length connecting it to that
/// parent. Children are assigned left-then-right in the order they appear
/// pointing at the same parent. This is the shape both the Newick parser
/// (`bamm-io`) and unit tests build trees from.
#[derive(Debug, Clone)]
pub struct RawNode {
    pub parent: Option<usize>,
    pub branch_length: f64,
    pub name: Option<String>,
    pub sampling_fraction: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum TreeError {
    #[error("tree must have exactly one root (node with no parent), found {0}")]
    NotExactlyOneRoot(usize),

    #[error("node {0} has {1} children; the tree must be strictly binary")]
    NotBinary(usize, usize),

    #[error("tree must contain at least one node")]
    Empty,

    #[error("duplicate tip name '{0}'")]
    DuplicateTipName(String),

    #[error("unknown tip name '{0}'")]
    UnknownTipName(String),

    #[error("'{0}' and '{1}' have no common ancestor in this tree")]
    NoCommonAncestor(String, String),

    #[error("map offset {0} is outside [0, {1})")]
    MapOffsetOutOfRange(f64, f64),
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<NodeData>,
    root: NodeId,
    total_map_length: f64,
    /// Nodes ordered by ascending `map_start`, for `inverse_map`'s binary search.
    by_map_start: Vec<NodeId>,
    /// Children-before-parents traversal order, for likelihood/summary passes.
    postorder: Vec<NodeId>,
    name_to_id: HashMap<String, NodeId>,
}

impl Tree {
    /// Build a [`Tree`] from a flat parent-pointer description, assigning
    /// times, map offsets, clade sizes, and traversal orders.
    pub fn build(raw: Vec<RawNode>) -> Result<Tree, TreeError> {
        if raw.is_empty() {
            return Err(TreeError::Empty);
        }

        let n = raw.len();
        let mut children: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        let mut root = None;
        for (i, r) in raw.iter().enumerate() {
            match r.parent {
                None => {
                    if root.is_some() {
                        return Err(TreeError::NotExactlyOneRoot(2));
                    }
                    root = Some(NodeId(i as u32));
                }
                Some(p) => children[p].push(NodeId(i as u32)),
            }
        }
        let root = root.ok_or(TreeError::NotExactlyOneRoot(0))?;

        for (i, kids) in children.iter().enumerate() {
            if !(kids.is_empty() || kids.len() == 2) {
                return Err(TreeError::NotBinary(i, kids.len()));
            }
        }

        let mut nodes: Vec<NodeData> = raw
            .iter()
            .map(|r| NodeData {
                parent: r.parent.map(|p| NodeId(p as u32)),
                left: None,
                right: None,
                time: 0.0,
                branch_length: r.branch_length,
                map_start: 0.0,
                map_end: 0.0,
                name: r.name.clone(),
                sampling_fraction: r.sampling_fraction,
                clade_size: 0,
            })
            .collect();
        for (i, kids) in children.into_iter().enumerate() {
            if kids.len() == 2 {
                nodes[i].left = Some(kids[0]);
                nodes[i].right = Some(kids[1]);
            }
        }

        let mut name_to_id = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if let Some(name) = &node.name {
                if name_to_id.insert(name.clone(), NodeId(i as u32)).is_some() {
                    return Err(TreeError::DuplicateTipName(name.clone()));
                }
            }
        }

        // Preorder walk: assign times and map offsets, rootward branches first.
        let mut cursor = 0.0_f64;
        let mut stack = vec![root];
        let mut preorder = Vec::with_capacity(n);
        nodes[root.0 as usize].time = 0.0;
        while let Some(id) = stack.pop() {
            preorder.push(id);
            let bl = nodes[id.0 as usize].branch_length;
            if nodes[id.0 as usize].parent.is_some() {
                nodes[id.0 as usize].map_start = cursor;
                cursor += bl;
                nodes[id.0 as usize].map_end = cursor;
                let parent_time = nodes[nodes[id.0 as usize].parent.unwrap().0 as usize].time;
                nodes[id.0 as usize].time = parent_time + bl;
            }
            let (l, r) = (nodes[id.0 as usize].left, nodes[id.0 as usize].right);
            if let Some(r) = r {
                stack.push(r);
            }
            if let Some(l) = l {
                stack.push(l);
            }
        }
        let total_map_length = cursor;

        let mut by_map_start = preorder.clone();
        by_map_start.retain(|id| nodes[id.0 as usize].parent.is_some());
        by_map_start.sort_by(|a, b| {
            nodes[a.0 as usize]
                .map_start
                .partial_cmp(&nodes[b.0 as usize].map_start)
                .unwrap()
        });

        // Postorder: reverse a preorder that visits left-then-right before
        // pushing, by doing the mirror walk (right-then-left push order
        // above already yields left-first pops); easiest is an explicit
        // postorder walk.
        let mut postorder = Vec::with_capacity(n);
        let mut visit_stack = vec![(root, false)];
        while let Some((id, expanded)) = visit_stack.pop() {
            if expanded {
                postorder.push(id);
                continue;
            }
            visit_stack.push((id, true));
            if let Some(r) = nodes[id.0 as usize].right {
                visit_stack.push((r, false));
            }
            if let Some(l) = nodes[id.0 as usize].left {
                visit_stack.push((l, false));
            }
        }

        for &id in &postorder {
            let (l, r) = (nodes[id.0 as usize].left, nodes[id.0 as usize].right);
            nodes[id.0 as usize].clade_size = match (l, r) {
                (Some(l), Some(r)) => nodes[l.0 as usize].clade_size + nodes[r.0 as usize].clade_size,
                _ => 1,
            };
        }

        Ok(Tree {
            nodes,
            root,
            total_map_length,
            by_map_start,
            postorder,
            name_to_id,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn total_map_length(&self) -> f64 {
        self.total_map_length
    }

    pub fn max_root_to_tip_length(&self) -> f64 {
        self.nodes
            .iter()
            .filter(|n| n.is_tip())
            .map(|n| n.time)
            .fold(0.0, f64::max)
    }

    pub fn number_of_tips(&self) -> u32 {
        self.nodes.iter().filter(|n| n.is_tip()).count() as u32
    }

    /// All node ids in children-before-parent order.
    pub fn postorder(&self) -> &[NodeId] {
        &self.postorder
    }

    pub fn node_by_name(&self, name: &str) -> Result<NodeId, TreeError> {
        self.name_to_id
            .get(name)
            .copied()
            .ok_or_else(|| TreeError::UnknownTipName(name.to_string()))
    }

    /// Every tip name in the tree, in no particular order. Used by
    /// `bamm-io` to cross-check a traits file or sampling-fraction file
    /// against the tree it was supposedly measured on.
    pub fn tip_names(&self) -> impl Iterator<Item = &String> {
        self.nodes.iter().filter(|n| n.is_tip()).filter_map(|n| n.name.as_ref())
    }

    /// Most recent common ancestor of two tips named `a` and `b`.
    pub fn mrca(&self, a: &str, b: &str) -> Result<NodeId, TreeError> {
        let a = self.node_by_name(a)?;
        let b = self.node_by_name(b)?;
        Ok(self.mrca_of(a, b))
    }

    pub fn mrca_of(&self, a: NodeId, b: NodeId) -> NodeId {
        let ancestors_of_a = self.ancestor_chain(a);
        let mut cur = b;
        loop {
            if ancestors_of_a.contains(&cur) {
                return cur;
            }
            cur = self.nodes[cur.0 as usize]
                .parent
                .expect("walked off the root without finding a common ancestor");
        }
    }

    fn ancestor_chain(&self, mut id: NodeId) -> std::collections::HashSet<NodeId> {
        let mut set = std::collections::HashSet::new();
        set.insert(id);
        while let Some(p) = self.nodes[id.0 as usize].parent {
            set.insert(p);
            id = p;
        }
        set
    }

    /// Locate the branch containing map offset `x` and return its node.
    /// Performs an O(tree) scan or binary
    /// search over the pre-order nodes sorted by mapStart".
    pub fn inverse_map(&self, x: f64) -> Result<NodeId, TreeError> {
        if !(0.0..self.total_map_length).contains(&x) {
            return Err(TreeError::MapOffsetOutOfRange(x, self.total_map_length));
        }
        let idx = self
            .by_map_start
            .partition_point(|id| self.nodes[id.0 as usize].map_start <= x);
        let id = self.by_map_start[idx.saturating_sub(1).min(self.by_map_start.len() - 1)];
        debug_assert!(
            x >= self.nodes[id.0 as usize].map_start && x < self.nodes[id.0 as usize].map_end
        );
        Ok(id)
    }

    /// Absolute time corresponding to map offset `x` on `node`'s inbound
    /// branch. Map offset increases tipward-to-rootward within the branch
    /// relative to the node's own time: `map_end` is this node's time,
    /// `map_start` is its parent's time.
    pub fn absolute_time_from_map(&self, node: NodeId, x: f64) -> f64 {
        let n = &self.nodes[node.0 as usize];
        n.time - (n.map_end - x)
    }

    /// Inverse of [`Tree::absolute_time_from_map`]: the map offset on
    /// `node`'s inbound branch corresponding to absolute time `t`.
    pub fn map_from_absolute_time(&self, node: NodeId, t: f64) -> f64 {
        let n = &self.nodes[node.0 as usize];
        n.map_end - (n.time - t)
    }

    /// A deterministic representative tip in the subtree rooted at `node`
    /// (the leftmost descendant). Used to name events in the snapshot
    /// format, which locates an event by a pair of tip
    /// names whose MRCA is the event's attachment node.
    pub fn leftmost_tip(&self, mut node: NodeId) -> NodeId {
        while let Some(l) = self.nodes[node.0 as usize].left {
            node = l;
        }
        node
    }

    pub fn rightmost_tip(&self, mut node: NodeId) -> NodeId {
        while let Some(r) = self.nodes[node.0 as usize].right {
            node = r;
        }
        node
    }
}


#[cfg(test)]
mod tests {
    use super::test_trees::*;
    use super::*;

    #[test]
    fn three_tip_times_and_map() {
        let t = three_tip();
        assert_eq!(t.total_map_length(), 1.0 + 2.0 + 1.0 + 1.0);
        let c = t.node_by_name("C").unwrap();
        assert_eq!(t.node(c).time, 2.0);
        let a = t.node_by_name("A").unwrap();
        assert_eq!(t.node(a).time, 2.0);
    }

    #[test]
    fn mrca_is_correct() {
        let t = three_tip();
        let internal = t.mrca("A", "B").unwrap();
        assert_eq!(t.node(internal).clade_size, 2);
        let root = t.mrca("A", "C").unwrap();
        assert_eq!(root, t.root());
    }

    #[test]
    fn inverse_map_roundtrips_every_branch() {
        let t = three_tip();
        for &id in t.postorder() {
            if t.node(id).parent.is_none() {
                continue;
            }
            let mid = (t.node(id).map_start + t.node(id).map_end) / 2.0;
            let found = t.inverse_map(mid).unwrap();
            assert_eq!(found, id);
        }
    }

    #[test]
    fn map_absolute_time_roundtrip() {
        let t = three_tip();
        let c = t.node_by_name("C").unwrap();
        let x = (t.node(c).map_start + t.node(c).map_end) / 2.0;
        let at = t.absolute_time_from_map(c, x);
        let back = t.map_from_absolute_time(c, at);
        assert!((back - x).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_map_offset_errors() {
        let t = three_tip();
        assert!(t.inverse_map(-1.0).is_err());
        assert!(t.inverse_map(t.total_map_length()).is_err());
    }

    #[test]
    fn rejects_non_binary_node() {
        let raw = vec![
            RawNode { parent: None, branch_length: 0.0, name: None, sampling_fraction: 1.0 },
            RawNode { parent: Some(0), branch_length: 1.0, name: Some("A".into()), sampling_fraction: 1.0 },
            RawNode { parent: Some(0), branch_length: 1.0, name: Some("B".into()), sampling_fraction: 1.0 },
            RawNode { parent: Some(0), branch_length: 1.0, name: Some("C".into()), sampling_fraction: 1.0 },
        ];
        assert_eq!(Tree::build(raw), Err(TreeError::NotBinary(0, 3)));
    }
}
