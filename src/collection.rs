//! Trees with branch lengths, collections of them, and topology counting.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SbnError};
use crate::topology::Topology;

/// A topology plus one branch length per node (indexed by `NodeId`).
#[derive(Clone, Debug)]
pub struct Tree {
    topology: Arc<Topology>,
    branch_lengths: Vec<f64>,
}

impl Tree {
    /// # Errors
    /// `SbnError::Structural` if there is not exactly one branch length per node.
    pub fn new(topology: Arc<Topology>, branch_lengths: Vec<f64>) -> Result<Self> {
        if branch_lengths.len() != topology.node_count() {
            return Err(SbnError::structural(format!(
                "{} branch lengths for a topology with {} nodes",
                branch_lengths.len(),
                topology.node_count()
            )));
        }
        Ok(Tree {
            topology,
            branch_lengths,
        })
    }

    /// Every branch gets length 1 (used for sampled topologies).
    pub fn unit_branch_length_tree_of(topology: Topology) -> Self {
        let branch_lengths = vec![1.0; topology.node_count()];
        Tree {
            topology: Arc::new(topology),
            branch_lengths,
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn branch_lengths(&self) -> &[f64] {
        &self.branch_lengths
    }

    pub fn leaf_count(&self) -> usize {
        self.topology.leaf_count()
    }

    pub fn newick(&self, labels: Option<&[String]>) -> String {
        self.topology
            .newick(Some(&self.branch_lengths), labels, false)
    }
}

/// Trees over a shared taxon set. Leaf id `i` is `taxon_names[i]`.
#[derive(Clone, Debug, Default)]
pub struct TreeCollection {
    trees: Vec<Tree>,
    taxon_names: Vec<String>,
}

impl TreeCollection {
    /// # Errors
    /// `SbnError::Structural` if a tree's leaf count differs from the number of taxa.
    pub fn new(trees: Vec<Tree>, taxon_names: Vec<String>) -> Result<Self> {
        if let Some((idx, tree)) = trees
            .iter()
            .enumerate()
            .find(|(_, t)| t.leaf_count() != taxon_names.len())
        {
            return Err(SbnError::structural(format!(
                "tree {idx} has {} leaves but the collection has {} taxa",
                tree.leaf_count(),
                taxon_names.len()
            )));
        }
        Ok(TreeCollection { trees, taxon_names })
    }

    /// Builds a collection with unit branch lengths. Taxa are named by leaf id.
    pub fn of_topologies(topologies: impl IntoIterator<Item = Topology>) -> Result<Self> {
        let trees: Vec<Tree> = topologies
            .into_iter()
            .map(Tree::unit_branch_length_tree_of)
            .collect();
        let taxon_count = trees.first().map(Tree::leaf_count).unwrap_or(0);
        let taxon_names = (0..taxon_count).map(|i| i.to_string()).collect();
        Self::new(trees, taxon_names)
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn taxon_names(&self) -> &[String] {
        &self.taxon_names
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn taxon_count(&self) -> usize {
        self.taxon_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Distinct topologies with their multiplicities.
    pub fn topology_counter(&self) -> TopologyCounter {
        let mut counter = TopologyCounter::new();
        for tree in &self.trees {
            counter.increment(Arc::clone(&tree.topology), 1);
        }
        counter
    }

    /// One Newick string per tree, leaves labelled with taxon names.
    pub fn newick(&self) -> String {
        self.trees
            .iter()
            .map(|t| t.newick(Some(&self.taxon_names)))
            .fold(String::new(), |mut acc, line| {
                acc.push_str(&line);
                acc.push('\n');
                acc
            })
    }
}

/// Distinct topology to occurrence count, iterated in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct TopologyCounter {
    entries: Vec<(Arc<Topology>, usize)>,
    lookup: HashMap<Arc<Topology>, usize>,
}

impl TopologyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, topology: Arc<Topology>, by: usize) {
        match self.lookup.get(&topology) {
            Some(&slot) => self.entries[slot].1 += by,
            None => {
                self.lookup.insert(Arc::clone(&topology), self.entries.len());
                self.entries.push((topology, by));
            }
        }
    }

    pub fn count_of(&self, topology: &Topology) -> usize {
        self.lookup
            .get(topology)
            .map(|&slot| self.entries[slot].1)
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<Topology>, usize)> {
        self.entries.iter().map(|(t, c)| (t, *c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, c)| c).sum()
    }
}

impl FromIterator<(Topology, usize)> for TopologyCounter {
    fn from_iter<I: IntoIterator<Item = (Topology, usize)>>(iter: I) -> Self {
        let mut counter = TopologyCounter::new();
        for (topology, count) in iter {
            counter.increment(Arc::new(topology), count);
        }
        counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::two_level;

    #[test]
    fn test_counter_merges_reordered_children() {
        let collection = TreeCollection::of_topologies([
            two_level(&[&[0], &[1], &[2, 3]]),
            two_level(&[&[0], &[2], &[1, 3]]),
            two_level(&[&[1], &[0], &[3, 2]]),
        ])
        .unwrap();
        let counter = collection.topology_counter();
        assert_eq!(counter.len(), 2);
        assert_eq!(counter.total(), 3);
        let counts: Vec<usize> = counter.iter().map(|(_, c)| c).collect();
        assert_eq!(counts, vec![2, 1]);
        assert_eq!(counter.count_of(&two_level(&[&[0], &[1], &[2, 3]])), 2);
        assert_eq!(counter.count_of(&two_level(&[&[0], &[3], &[1, 2]])), 0);
    }

    #[test]
    fn test_mismatched_taxa_rejected() {
        let trees = vec![
            Tree::unit_branch_length_tree_of(two_level(&[&[0], &[1], &[2, 3]])),
            Tree::unit_branch_length_tree_of(two_level(&[&[0], &[1], &[2]])),
        ];
        let names = (0..4).map(|i| format!("t{i}")).collect();
        assert!(matches!(
            TreeCollection::new(trees, names),
            Err(SbnError::Structural { .. })
        ));
    }

    #[test]
    fn test_branch_length_count_checked() {
        let topology = Arc::new(two_level(&[&[0], &[1], &[2]]));
        assert!(Tree::new(Arc::clone(&topology), vec![1.0; 3]).is_err());
        assert!(Tree::new(topology, vec![1.0; 4]).is_ok());
    }

    #[test]
    fn test_collection_newick() {
        let collection = TreeCollection::of_topologies([two_level(&[&[0], &[1], &[2]])]).unwrap();
        assert_eq!(collection.newick(), "(0:1,1:1,2:1):1;\n");
    }
}
