//! Immutable tree topologies with canonical child order and structural hashing.
//!
//! # Overview
//! A `Topology` is an arena of nodes addressed by `NodeId` handles. Once built it
//! never changes, so it can be shared (behind an `Arc`) by a tree collection, a
//! topology counter and the SBN training code at the same time.
//!
//! Every node carries:
//! - its children, sorted by ascending max leaf id (so two trees that differ only in
//!   the order children were written compare equal),
//! - a tag packing `(max leaf id, leaf count)` into one `u64`,
//! - a structural hash: leaves hash their id, internal nodes XOR their children's
//!   hashes and rotate the result by one bit.
//!
//! # Node ids
//! `finish` lays the arena out in index order: leaves get their leaf id
//! (`0..leaf_count`), internal nodes get `leaf_count..` in post-order, the root gets the
//! largest id. A node's id is therefore always larger than the ids of its children,
//! and scanning ids upwards is a valid bottom-up traversal.
//!
//! ```text
//!        (2,(1,3),(0,4))      ids:      7
//!                                     / | \
//!                                    2  5  6
//!                                      / \ / \
//!                                     1  3 0  4
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::bitset::Bitset;
use crate::error::{Result, SbnError};

/// Handle of a node inside a `Topology` (equal to the node's post-order index).
pub type NodeId = usize;

/// `(max leaf id, leaf count)` packed into one integer.
pub type Tag = u64;

#[inline]
pub fn pack_tag(max_leaf_id: u32, leaf_count: u32) -> Tag {
    (u64::from(max_leaf_id) << 32) | u64::from(leaf_count)
}

#[inline]
pub fn unpack_tag(tag: Tag) -> (u32, u32) {
    ((tag >> 32) as u32, tag as u32)
}

fn leaf_hash(id: u32) -> u64 {
    let mut x = id;
    x = ((x >> 16) ^ x).wrapping_mul(0x45d9f3b);
    x = ((x >> 16) ^ x).wrapping_mul(0x45d9f3b);
    u64::from((x >> 16) ^ x)
}

#[derive(Clone, Debug)]
struct Node {
    children: Vec<NodeId>,
    leaf_id: Option<u32>,
    tag: Tag,
    hash: u64,
}

impl Node {
    fn max_leaf_id(&self) -> u32 {
        unpack_tag(self.tag).0
    }

    fn leaf_count(&self) -> u32 {
        unpack_tag(self.tag).1
    }
}

/// One side of an edge: the clade below `node`, or its complement when `flip` is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Side {
    pub node: NodeId,
    pub flip: bool,
}

impl Side {
    pub fn down(node: NodeId) -> Self {
        Side { node, flip: false }
    }

    pub fn up(node: NodeId) -> Self {
        Side { node, flip: true }
    }
}

/// Everything needed to build one PCSS bitset: the parent subsplit is
/// `sister|focal`, and the focal clade splits into `child0` and `child1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcssStep {
    pub sister: Side,
    pub focal: Side,
    pub child0: Side,
    pub child1: Side,
}

impl PcssStep {
    fn new(sister: Side, focal: Side, child0: Side, child1: Side) -> Self {
        PcssStep {
            sister,
            focal,
            child0,
            child1,
        }
    }

    /// True when the virtual root sits on the focal node's own edge, i.e. the parent
    /// subsplit is a rootsplit.
    pub fn is_rootsplit_step(&self) -> bool {
        self.sister.node == self.focal.node
    }
}

/// Arena under construction. Nodes are appended with `leaf` and `join`; `finish`
/// validates the leaf set and produces the indexed `Topology`.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    nodes: Vec<Node>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaf(&mut self, id: u32) -> NodeId {
        self.nodes.push(Node {
            children: Vec::new(),
            leaf_id: Some(id),
            tag: pack_tag(id, 1),
            hash: leaf_hash(id),
        });
        self.nodes.len() - 1
    }

    /// Joins previously built nodes under a new internal node.
    ///
    /// # Errors
    /// `SbnError::Structural` if `children` is empty or two children share a max leaf
    /// id (a repeated taxon).
    pub fn join(&mut self, mut children: Vec<NodeId>) -> Result<NodeId> {
        if children.is_empty() {
            return Err(SbnError::structural("internal node without children"));
        }
        if let Some(&bad) = children.iter().find(|&&c| c >= self.nodes.len()) {
            return Err(SbnError::structural(format!("unknown child node {bad}")));
        }
        children.sort_by_key(|&c| self.nodes[c].max_leaf_id());
        for pair in children.windows(2) {
            if self.nodes[pair[0]].max_leaf_id() == self.nodes[pair[1]].max_leaf_id() {
                return Err(SbnError::structural(format!(
                    "sibling clades share max leaf id {}; is a taxon repeated?",
                    self.nodes[pair[0]].max_leaf_id()
                )));
            }
        }
        let mut hash = 0u64;
        let mut leaf_count = 0u32;
        for &child in &children {
            hash ^= self.nodes[child].hash;
            leaf_count += self.nodes[child].leaf_count();
        }
        // Children are sorted, so the last one holds the max leaf id.
        let max_leaf_id = children
            .last()
            .map(|&c| self.nodes[c].max_leaf_id())
            .unwrap_or_default();
        self.nodes.push(Node {
            children,
            leaf_id: None,
            tag: pack_tag(max_leaf_id, leaf_count),
            hash: hash.rotate_left(1),
        });
        Ok(self.nodes.len() - 1)
    }

    /// Convenience for the common bifurcation.
    pub fn join_pair(&mut self, left: NodeId, right: NodeId) -> Result<NodeId> {
        self.join(vec![left, right])
    }

    /// Re-indexes the subtree below `root` and freezes it.
    ///
    /// # Errors
    /// `SbnError::Structural` if leaf ids repeat or are not exactly `0..leaf_count`.
    pub fn finish(self, root: NodeId) -> Result<Topology> {
        self.finish_with_ids(root).map(|(topology, _)| topology)
    }

    /// Like `finish`, also returning the final id of every builder node (`None` for
    /// nodes outside the subtree of `root`).
    pub fn finish_with_ids(self, root: NodeId) -> Result<(Topology, Vec<Option<NodeId>>)> {
        if root >= self.nodes.len() {
            return Err(SbnError::structural(format!("unknown root node {root}")));
        }
        let leaf_count = self.nodes[root].leaf_count() as usize;
        if self.nodes[root].max_leaf_id() as usize + 1 != leaf_count {
            return Err(SbnError::structural(format!(
                "leaf ids must be 0..{leaf_count}, found max leaf id {}",
                self.nodes[root].max_leaf_id()
            )));
        }

        // Post-order over the builder arena assigns the final ids.
        let mut new_id = vec![usize::MAX; self.nodes.len()];
        let mut seen_leaf = vec![false; leaf_count];
        let mut next_internal = leaf_count;
        let mut stack = vec![(root, false)];
        while let Some((old, expanded)) = stack.pop() {
            let node = &self.nodes[old];
            if let Some(id) = node.leaf_id {
                let id = id as usize;
                if seen_leaf[id] {
                    return Err(SbnError::structural(format!("taxon id {id} is repeated")));
                }
                seen_leaf[id] = true;
                new_id[old] = id;
            } else if expanded {
                new_id[old] = next_internal;
                next_internal += 1;
            } else {
                stack.push((old, true));
                stack.extend(node.children.iter().rev().map(|&c| (c, false)));
            }
        }

        let node_count = next_internal;
        let mut slots: Vec<Option<Node>> = vec![None; node_count];
        for (old, node) in self.nodes.into_iter().enumerate() {
            if new_id[old] == usize::MAX {
                continue;
            }
            let children = node.children.iter().map(|&c| new_id[c]).collect();
            slots[new_id[old]] = Some(Node { children, ..node });
        }
        let nodes = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| SbnError::structural("node ids are not contiguous"))?;
        let ids = new_id
            .into_iter()
            .map(|id| (id != usize::MAX).then_some(id))
            .collect();
        Ok((
            Topology {
                root: node_count - 1,
                nodes,
            },
            ids,
        ))
    }
}

/// An immutable, canonically ordered tree topology.
#[derive(Clone, Debug)]
pub struct Topology {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Topology {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes[self.root].leaf_count() as usize
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node].children
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.nodes[node].children.is_empty()
    }

    pub fn leaf_id(&self, node: NodeId) -> Option<u32> {
        self.nodes[node].leaf_id
    }

    pub fn max_leaf_id(&self, node: NodeId) -> u32 {
        self.nodes[node].max_leaf_id()
    }

    pub fn subtree_leaf_count(&self, node: NodeId) -> usize {
        self.nodes[node].leaf_count() as usize
    }

    pub fn tag(&self, node: NodeId) -> Tag {
        self.nodes[node].tag
    }

    pub fn node_hash(&self, node: NodeId) -> u64 {
        self.nodes[node].hash
    }

    /// Hash of the whole topology (the root's structural hash).
    pub fn structural_hash(&self) -> u64 {
        self.nodes[self.root].hash
    }

    /// Calls `f` on every node, parent before children.
    pub fn pre_order(&self, f: impl FnMut(NodeId)) {
        self.pre_order_from(self.root, f);
    }

    /// Pre-order over the subtree below `start`.
    pub fn pre_order_from(&self, start: NodeId, mut f: impl FnMut(NodeId)) {
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            f(node);
            stack.extend(self.nodes[node].children.iter().rev());
        }
    }

    /// Calls `f` on every node, children before parent.
    pub fn post_order(&self, mut f: impl FnMut(NodeId)) {
        let mut stack = vec![(self.root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded || self.is_leaf(node) {
                f(node);
            } else {
                stack.push((node, true));
                stack.extend(self.nodes[node].children.iter().rev().map(|&c| (c, false)));
            }
        }
    }

    /// Breadth-first traversal from the root.
    pub fn level_order(&self, mut f: impl FnMut(NodeId)) {
        let mut to_visit = VecDeque::from([self.root]);
        while let Some(node) = to_visit.pop_front() {
            f(node);
            to_visit.extend(self.nodes[node].children.iter());
        }
    }

    /// Parent of every node (`None` for the root).
    pub fn parents(&self) -> Vec<Option<NodeId>> {
        let mut parents = vec![None; self.nodes.len()];
        for (id, node) in self.nodes.iter().enumerate() {
            for &child in &node.children {
                parents[child] = Some(id);
            }
        }
        parents
    }

    /// Leaf set of every node, indexed by `NodeId`.
    ///
    /// Ids grow from leaves to root, so one upward scan fills the table.
    pub fn clades(&self) -> Vec<Bitset> {
        let leaf_count = self.leaf_count();
        let mut clades: Vec<Bitset> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let mut clade = Bitset::zeros(leaf_count);
            match node.leaf_id {
                Some(id) => clade.set(id as usize),
                None => {
                    for &child in &node.children {
                        for idx in clades[child].iter_ones() {
                            clade.set(idx);
                        }
                    }
                }
            }
            clades.push(clade);
        }
        clades
    }

    fn bifurcation(&self, node: NodeId) -> Result<Option<[NodeId; 2]>> {
        match self.nodes[node].children.as_slice() {
            [] => Ok(None),
            &[c0, c1] => Ok(Some([c0, c1])),
            other => Err(SbnError::structural(format!(
                "expected a bifurcation at node {node}, found {} children",
                other.len()
            ))),
        }
    }

    fn check_trifurcating_root(&self) -> Result<[NodeId; 3]> {
        match self.nodes[self.root].children.as_slice() {
            &[c0, c1, c2] => Ok([c0, c1, c2]),
            other => Err(SbnError::structural(format!(
                "expected a trifurcation at the root, found {} children",
                other.len()
            ))),
        }
    }

    /// Enumerates every PCSS of every virtual rooting of an unrooted topology.
    ///
    /// Each of the root's three children is visited as focal with the other two as
    /// the sister pair, then every internal node is visited with the same pattern over
    /// its two children. The same parent/child pair may be reported by several
    /// rootings; the visitor sees it once per distinct configuration.
    ///
    /// ```text
    ///   virtual root on node's edge, pointing up     node | ~node    -> ~parent, sister
    ///   virtual root above the parent                sister | node   -> child0, child1
    ///   virtual root inside the sister               ~parent | node  -> child0, child1
    ///   virtual root on node's edge, pointing down   ~node | node    -> child0, child1
    ///   virtual root inside child0                   child1 | ~node  -> sister, ~parent
    ///   virtual root inside child1                   child0 | ~node  -> sister, ~parent
    /// ```
    ///
    /// # Errors
    /// `SbnError::Structural` unless the root trifurcates and every other internal node
    /// bifurcates.
    pub fn pcss_pre_order(&self, mut f: impl FnMut(&PcssStep)) -> Result<()> {
        let [r0, r1, r2] = self.check_trifurcating_root()?;
        for [node0, node1, node2] in [[r0, r1, r2], [r1, r2, r0], [r2, r0, r1]] {
            let (n0, n1, n2) = (Side::down(node0), Side::down(node1), Side::down(node2));
            f(&PcssStep::new(n2, Side::up(node2), n0, n1));
            if let Some([a, b]) = self.bifurcation(node2)? {
                let (a, b) = (Side::down(a), Side::down(b));
                f(&PcssStep::new(n0, n2, a, b));
                f(&PcssStep::new(n1, n2, a, b));
                f(&PcssStep::new(Side::up(node2), n2, a, b));
                f(&PcssStep::new(b, Side::up(node2), n0, n1));
                f(&PcssStep::new(a, Side::up(node2), n0, n1));
            }
        }

        let mut internal = |parent: NodeId, sister: NodeId, node: NodeId| -> Result<()> {
            let (p, s, n) = (Side::up(parent), Side::down(sister), Side::down(node));
            f(&PcssStep::new(n, Side::up(node), p, s));
            if let Some([a, b]) = self.bifurcation(node)? {
                let (a, b) = (Side::down(a), Side::down(b));
                f(&PcssStep::new(s, n, a, b));
                f(&PcssStep::new(p, n, a, b));
                f(&PcssStep::new(Side::up(node), n, a, b));
                f(&PcssStep::new(b, Side::up(node), s, p));
                f(&PcssStep::new(a, Side::up(node), s, p));
            }
            Ok(())
        };
        for root_child in [r0, r1, r2] {
            let mut stack = vec![root_child];
            while let Some(parent) = stack.pop() {
                if let Some([c0, c1]) = self.bifurcation(parent)? {
                    internal(parent, c1, c0)?;
                    internal(parent, c0, c1)?;
                    stack.push(c1);
                    stack.push(c0);
                }
            }
        }
        Ok(())
    }

    /// The two sides met when crossing `focal` away from the virtual root, or `None`
    /// when the focal side is a single leaf.
    fn sides_beyond(&self, focal: Side, parents: &[Option<NodeId>]) -> Result<Option<[Side; 2]>> {
        if !focal.flip {
            return Ok(self
                .bifurcation(focal.node)?
                .map(|[a, b]| [Side::down(a), Side::down(b)]));
        }
        let parent = parents[focal.node]
            .ok_or_else(|| SbnError::structural("the root has no edge above it"))?;
        let mut sides: Vec<Side> = self.nodes[parent]
            .children
            .iter()
            .filter(|&&c| c != focal.node)
            .map(|&c| Side::down(c))
            .collect();
        if parents[parent].is_some() {
            sides.push(Side::up(parent));
        }
        match sides.as_slice() {
            &[a, b] => Ok(Some([a, b])),
            other => Err(SbnError::structural(format!(
                "node {parent} has degree {} in the unrooted tree, expected 3",
                other.len() + 1
            ))),
        }
    }

    /// Walks the rooted tree obtained by placing the root on the edge above
    /// `edge_node`, calling `f` with the PCSS step of every internal vertex,
    /// parents before children.
    ///
    /// The first two calls (when both sides of the edge are clades with more than one
    /// taxon) expand the two halves of the root subsplit.
    pub fn virtual_rooting_pre_order(
        &self,
        edge_node: NodeId,
        mut f: impl FnMut(&PcssStep),
    ) -> Result<()> {
        if edge_node >= self.root {
            return Err(SbnError::structural(format!(
                "node {edge_node} does not have an edge above it"
            )));
        }
        self.check_trifurcating_root()?;
        let parents = self.parents();
        let mut stack = vec![
            (Side::up(edge_node), Side::down(edge_node)),
            (Side::down(edge_node), Side::up(edge_node)),
        ];
        while let Some((focal, sister)) = stack.pop() {
            if let Some([c0, c1]) = self.sides_beyond(focal, &parents)? {
                f(&PcssStep::new(sister, focal, c0, c1));
                stack.push((c1, c0));
                stack.push((c0, c1));
            }
        }
        Ok(())
    }

    /// Pre-order PCSS walk of a rooted (bifurcating) topology.
    pub fn rooted_pre_order(&self, mut f: impl FnMut(&PcssStep)) -> Result<()> {
        let [a, b] = self.bifurcation(self.root)?.ok_or_else(|| {
            SbnError::structural("a rooted topology needs a bifurcating root")
        })?;
        let mut stack = vec![(Side::down(b), Side::down(a)), (Side::down(a), Side::down(b))];
        while let Some((focal, sister)) = stack.pop() {
            if let Some([c0, c1]) = self.bifurcation(focal.node)? {
                let (c0, c1) = (Side::down(c0), Side::down(c1));
                f(&PcssStep::new(sister, focal, c0, c1));
                stack.push((c1, c0));
                stack.push((c0, c1));
            }
        }
        Ok(())
    }

    /// For each non-root node, the id of its parent.
    pub fn parent_index_vector(&self) -> Vec<usize> {
        self.parents()
            .into_iter()
            .take(self.root)
            .map(|p| p.unwrap_or(self.root))
            .collect()
    }

    /// Rebuilds a topology from a parent index vector: entry `i` is the parent of node
    /// `i`, the root is the (missing) index `indices.len()`, and any index that is
    /// nobody's parent is a leaf with that id.
    ///
    /// # Example
    /// ```
    /// # use rust_python_sbn::topology::Topology;
    /// // (2,(1,3),(0,4)), internal nodes 5, 6 and root 7.
    /// let t = Topology::of_parent_index_vector(&[6, 5, 7, 5, 6, 7, 7]).unwrap();
    /// assert_eq!(t.newick(None, None, false), "(2,(1,3),(0,4));");
    /// ```
    pub fn of_parent_index_vector(indices: &[usize]) -> Result<Topology> {
        let root = indices.len();
        let mut downward: Vec<Vec<usize>> = vec![Vec::new(); root + 1];
        for (child, &parent) in indices.iter().enumerate() {
            if parent > root || parent == child {
                return Err(SbnError::structural(format!(
                    "invalid parent {parent} for node {child}"
                )));
            }
            downward[parent].push(child);
        }
        let mut builder = TopologyBuilder::new();
        let mut built: Vec<Option<NodeId>> = vec![None; root + 1];
        let mut stack = vec![(root, false)];
        let mut visits = 0usize;
        while let Some((index, expanded)) = stack.pop() {
            visits += 1;
            if visits > 2 * (root + 1) {
                return Err(SbnError::structural("parent index vector contains a cycle"));
            }
            if downward[index].is_empty() {
                let id = u32::try_from(index)
                    .map_err(|_| SbnError::structural("leaf id does not fit in u32"))?;
                built[index] = Some(builder.leaf(id));
            } else if expanded {
                let children = downward[index]
                    .iter()
                    .map(|&c| built[c].ok_or_else(|| SbnError::structural("unbuilt child")))
                    .collect::<Result<Vec<_>>>()?;
                built[index] = Some(builder.join(children)?);
            } else {
                stack.push((index, true));
                stack.extend(downward[index].iter().map(|&c| (c, false)));
            }
        }
        let root_node = built[root].ok_or_else(|| SbnError::structural("root was not built"))?;
        builder.finish(root_node)
    }

    /// Copies the subtree below `node` into `builder`.
    fn copy_into(&self, builder: &mut TopologyBuilder, node: NodeId) -> Result<NodeId> {
        let mut built: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        let mut result = None;
        self.post_order_from(node, |id| {
            if result.is_some() {
                return;
            }
            let copied = match self.nodes[id].leaf_id {
                Some(leaf) => Ok(builder.leaf(leaf)),
                None => self.nodes[id]
                    .children
                    .iter()
                    .map(|&c| built[c].ok_or_else(|| SbnError::structural("unbuilt child")))
                    .collect::<Result<Vec<_>>>()
                    .and_then(|children| builder.join(children)),
            };
            match copied {
                Ok(new_id) => built[id] = Some(new_id),
                Err(e) => result = Some(Err(e)),
            }
        });
        match result {
            Some(err) => err,
            None => built[node].ok_or_else(|| SbnError::structural("subtree was not copied")),
        }
    }

    fn post_order_from(&self, start: NodeId, mut f: impl FnMut(NodeId)) {
        let mut stack = vec![(start, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded || self.is_leaf(node) {
                f(node);
            } else {
                stack.push((node, true));
                stack.extend(self.nodes[node].children.iter().rev().map(|&c| (c, false)));
            }
        }
    }

    /// Turns a bifurcating root into a trifurcation by dissolving the root child that
    /// has descendants: `((a,b),c)` becomes `(a,b,c)`.
    pub fn deroot(&self) -> Result<Topology> {
        if self.leaf_count() < 3 {
            return Err(SbnError::structural("derooting needs at least 3 taxa"));
        }
        let [c0, c1] = self
            .bifurcation(self.root)?
            .ok_or_else(|| SbnError::structural("cannot deroot a single leaf"))?;
        let (other, has_descendants) = if self.subtree_leaf_count(c1) == 1 {
            (c1, c0)
        } else {
            (c0, c1)
        };
        let mut builder = TopologyBuilder::new();
        let mut children = self.nodes[has_descendants]
            .children
            .iter()
            .map(|&c| self.copy_into(&mut builder, c))
            .collect::<Result<Vec<_>>>()?;
        children.push(self.copy_into(&mut builder, other)?);
        let root = builder.join(children)?;
        builder.finish(root)
    }

    /// Re-roots an unrooted topology on the internal vertex next to taxon 0, so that
    /// equal unrooted trees become equal `Topology` values.
    pub fn canonical_unrooted(&self) -> Result<Topology> {
        self.check_trifurcating_root()?;
        let parents = self.parents();
        let anchor = parents[0].ok_or_else(|| SbnError::structural("taxon 0 has no parent"))?;
        let mut builder = TopologyBuilder::new();
        let root = self.build_away_from(&mut builder, &parents, anchor, None)?;
        builder.finish(root)
    }

    fn build_away_from(
        &self,
        builder: &mut TopologyBuilder,
        parents: &[Option<NodeId>],
        vertex: NodeId,
        from: Option<NodeId>,
    ) -> Result<NodeId> {
        if let Some(id) = self.leaf_id(vertex) {
            return Ok(builder.leaf(id));
        }
        let mut children = Vec::with_capacity(3);
        for &next in self.children(vertex).iter().chain(parents[vertex].iter()) {
            if Some(next) != from {
                children.push(self.build_away_from(builder, parents, next, Some(vertex))?);
            }
        }
        builder.join(children)
    }

    /// Newick string, optionally with branch lengths (indexed by node id), taxon
    /// labels (indexed by leaf id) and `max_count` tags.
    pub fn newick(
        &self,
        branch_lengths: Option<&[f64]>,
        labels: Option<&[String]>,
        show_tags: bool,
    ) -> String {
        let mut out = String::new();
        self.newick_aux(self.root, branch_lengths, labels, show_tags, &mut out);
        out.push(';');
        out
    }

    fn newick_aux(
        &self,
        node: NodeId,
        branch_lengths: Option<&[f64]>,
        labels: Option<&[String]>,
        show_tags: bool,
        out: &mut String,
    ) {
        let (max_leaf_id, leaf_count) = unpack_tag(self.tag(node));
        if let Some(id) = self.leaf_id(node) {
            match labels.and_then(|l| l.get(id as usize)) {
                Some(label) => out.push_str(label),
                None if show_tags => out.push_str(&format!("{max_leaf_id}_{leaf_count}")),
                None => out.push_str(&id.to_string()),
            }
        } else {
            out.push('(');
            for (i, &child) in self.children(node).iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.newick_aux(child, branch_lengths, labels, show_tags, out);
            }
            out.push(')');
            if show_tags {
                out.push_str(&format!("{max_leaf_id}_{leaf_count}"));
            }
        }
        if let Some(length) = branch_lengths.and_then(|b| b.get(node)) {
            out.push_str(&format!(":{length}"));
        }
    }
}

impl PartialEq for Topology {
    /// Hash first; only on a hash match compare the structure node by node.
    fn eq(&self, other: &Self) -> bool {
        if self.structural_hash() != other.structural_hash() {
            return false;
        }
        let mut stack = vec![(self.root, other.root)];
        while let Some((a, b)) = stack.pop() {
            let (na, nb) = (&self.nodes[a], &other.nodes[b]);
            if na.hash != nb.hash
                || na.leaf_id != nb.leaf_id
                || na.children.len() != nb.children.len()
            {
                return false;
            }
            stack.extend(na.children.iter().copied().zip(nb.children.iter().copied()));
        }
        true
    }
}

impl Eq for Topology {}

impl Hash for Topology {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.newick(None, None, false))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a topology from nested leaf lists, e.g. `two_level(&[&[0], &[1], &[2, 3]])`
    /// is `(0,1,(2,3))`. Only two levels are needed by most tests, deeper shapes go
    /// through `of_parent_index_vector`.
    pub(crate) fn two_level(groups: &[&[u32]]) -> Topology {
        let mut builder = TopologyBuilder::new();
        let children = groups
            .iter()
            .map(|group| match group {
                [single] => builder.leaf(*single),
                many => {
                    let leaves = many.iter().map(|&id| builder.leaf(id)).collect();
                    builder.join(leaves).unwrap()
                }
            })
            .collect();
        let root = builder.join(children).unwrap();
        builder.finish(root).unwrap()
    }

    #[test]
    fn test_children_are_sorted_and_equal() {
        let t1 = two_level(&[&[0], &[1], &[2, 3]]);
        let t2 = two_level(&[&[1], &[0], &[3, 2]]);
        let t3 = two_level(&[&[0], &[2], &[1, 3]]);
        assert_eq!(t1, t2);
        assert_ne!(t1, t3);
        assert_eq!(t1.newick(None, None, false), "(0,1,(2,3));");
        assert_eq!(t1.newick(None, None, true), "(0_1,1_1,(2_1,3_1)3_2)3_4;");
    }

    /// ```text
    ///   ((0,1),(2,3))  vs  ((0,2),(1,3))
    /// ```
    /// Rotation distributes over XOR, so leaves at equal depth collide at the root.
    /// Equality must fall back to the per-node comparison.
    #[test]
    fn test_hash_collision_still_unequal() {
        let a = Topology::of_parent_index_vector(&[4, 4, 5, 5, 6, 6]).unwrap();
        let b = Topology::of_parent_index_vector(&[4, 5, 4, 5, 6, 6]).unwrap();
        assert_eq!(a.structural_hash(), b.structural_hash());
        assert_ne!(a, b);

        // A caterpillar puts leaves at different depths.
        let c = Topology::of_parent_index_vector(&[4, 4, 5, 6, 5, 6]).unwrap();
        assert_ne!(a.structural_hash(), c.structural_hash());
    }

    #[test]
    fn test_repeated_taxon_is_structural() {
        let mut builder = TopologyBuilder::new();
        let a = builder.leaf(0);
        let b = builder.leaf(0);
        assert!(builder.join(vec![a, b]).is_err());

        // ((0,1),(0,2)) has no sibling tie but still repeats taxon 0.
        let mut builder = TopologyBuilder::new();
        let l0 = builder.leaf(0);
        let l1 = builder.leaf(1);
        let l0b = builder.leaf(0);
        let l2 = builder.leaf(2);
        let x = builder.join_pair(l0, l1).unwrap();
        let y = builder.join_pair(l0b, l2).unwrap();
        let root = builder.join_pair(x, y).unwrap();
        assert!(matches!(builder.finish(root), Err(SbnError::Structural { .. })));
    }

    #[test]
    fn test_indices_and_parent_vector() {
        let parents = [6, 5, 7, 5, 6, 7, 7];
        let t = Topology::of_parent_index_vector(&parents).unwrap();
        assert_eq!(t.root(), 7);
        assert_eq!(t.leaf_count(), 5);
        assert_eq!(t.parent_index_vector(), parents.to_vec());
        assert_eq!(t.children(7), &[2, 5, 6]);
        assert_eq!(t.subtree_leaf_count(6), 2);
        assert_eq!(t.max_leaf_id(5), 3);
    }

    #[test]
    fn test_traversal_orders() {
        let t = Topology::of_parent_index_vector(&[6, 5, 7, 5, 6, 7, 7]).unwrap();
        let mut pre = Vec::new();
        t.pre_order(|n| pre.push(n));
        assert_eq!(pre, vec![7, 2, 5, 1, 3, 6, 0, 4]);
        let mut post = Vec::new();
        t.post_order(|n| post.push(n));
        assert_eq!(post, vec![2, 1, 3, 5, 0, 4, 6, 7]);
        let mut level = Vec::new();
        t.level_order(|n| level.push(n));
        assert_eq!(level, vec![7, 2, 5, 6, 1, 3, 0, 4]);
    }

    #[test]
    fn test_clades() {
        let t = Topology::of_parent_index_vector(&[6, 5, 7, 5, 6, 7, 7]).unwrap();
        let clades = t.clades();
        assert_eq!(clades[5].to_string(), "01010");
        assert_eq!(clades[6].to_string(), "10001");
        assert_eq!(clades[7].to_string(), "11111");
    }

    #[test]
    fn test_deroot() {
        // (0,(1,(2,3))) derooted is (0,1,(2,3)).
        let rooted = Topology::of_parent_index_vector(&[6, 5, 4, 4, 5, 6]).unwrap();
        let unrooted = rooted.deroot().unwrap();
        assert_eq!(unrooted, two_level(&[&[0], &[1], &[2, 3]]));
        assert_eq!(unrooted.root(), 5);
        // The input topology is untouched.
        assert_eq!(rooted.newick(None, None, false), "(0,(1,(2,3)));");
    }

    /// ```text
    ///   (2,(1,3),(0,4))  re-rooted next to taxon 0  ->  (0,(2,(1,3)),4)
    /// ```
    #[test]
    fn test_canonical_unrooted() {
        let t = Topology::of_parent_index_vector(&[6, 5, 7, 5, 6, 7, 7]).unwrap();
        let canonical = t.canonical_unrooted().unwrap();
        assert_eq!(canonical.newick(None, None, false), "(0,(2,(1,3)),4);");
        assert_eq!(canonical.canonical_unrooted().unwrap(), canonical);
        assert_eq!(canonical.leaf_count(), 5);
    }

    #[test]
    fn test_pcss_pre_order_requires_trifurcation() {
        let rooted = Topology::of_parent_index_vector(&[6, 5, 4, 4, 5, 6]).unwrap();
        assert!(matches!(
            rooted.pcss_pre_order(|_| {}),
            Err(SbnError::Structural { .. })
        ));
        assert!(rooted.virtual_rooting_pre_order(0, |_| {}).is_err());
    }

    #[test]
    fn test_pcss_step_count() {
        // A rooting of an n-taxon tree has n - 2 non-root internal vertices.
        let t = Topology::of_parent_index_vector(&[6, 5, 7, 5, 6, 7, 7]).unwrap();
        let mut rooting_steps = 0;
        for edge in 0..t.root() {
            t.virtual_rooting_pre_order(edge, |_| rooting_steps += 1).unwrap();
        }
        assert_eq!(rooting_steps, 7 * 3);

        // One step per root child, five more per internal root child, one per leaf
        // hanging below a root child.
        let mut steps = 0;
        t.pcss_pre_order(|_| steps += 1).unwrap();
        assert_eq!(steps, 3 + 2 * 5 + 2 * (2 * 1));
    }

    #[test]
    fn test_branch_lengths_in_newick() {
        let t = two_level(&[&[0], &[1], &[2, 3]]);
        let lengths = vec![1.0, 2.0, 3.0, 4.0, 0.5, 0.0];
        let labels: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            t.newick(Some(&lengths), Some(&labels), false),
            "(a:1,b:2,(c:3,d:4):0.5):0;"
        );
    }
}
