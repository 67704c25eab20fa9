//! Primary subsplit pair (PSP) indexing and per-split branch length collection.
//!
//! A PSP indexer reuses the SBN rootsplits and adds one index per `focal|child` pair
//! whose parent is a rootsplit, i.e. the PCSS seen directly below and above every edge.
//! A tree is then described by three vectors indexed by node id:
//!
//! ```text
//!   rootsplit[node]   minorized split of the edge above node
//!   below[node]       focal = clade of node,            child = smaller part of it
//!   above[node]       focal = complement of the clade,  child = smaller part of that
//! ```
//!
//! Leaves have nothing below them, so `below[leaf]` is the sentinel.

use std::collections::BTreeMap;

use tracing::warn;

use crate::bitset::Bitset;
use crate::collection::TreeCollection;
use crate::error::{Result, SbnError};
use crate::sbn_maps::{pcss_child_of, side_bitset, Indexer};
use crate::topology::Topology;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PspRepresentation {
    pub rootsplit: Vec<usize>,
    pub below: Vec<usize>,
    pub above: Vec<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct PspIndexer {
    taxon_count: usize,
    rootsplit_count: usize,
    indexer: BTreeMap<Bitset, usize>,
    first_empty_index: usize,
}

impl PspIndexer {
    /// Rootsplits keep their SBN indices; rootsplit-parent PCSS entries of the SBN
    /// indexer follow in indexer order.
    pub fn new(rootsplits: &[Bitset], sbn_indexer: &Indexer) -> Result<Self> {
        let taxon_count = rootsplits.first().map(Bitset::len).unwrap_or(0);
        let mut indexer = BTreeMap::new();
        for (idx, rootsplit) in rootsplits.iter().enumerate() {
            indexer.insert(rootsplit.clone(), idx);
        }
        let mut next = rootsplits.len();
        for (pcss, &sbn_index) in sbn_indexer {
            if sbn_index >= rootsplits.len() && pcss.pcss_is_rootsplit()? {
                indexer.insert(pcss.pcss_without_sister()?, next);
                next += 1;
            }
        }
        Ok(PspIndexer {
            taxon_count,
            rootsplit_count: rootsplits.len(),
            indexer,
            first_empty_index: next,
        })
    }

    pub fn indexer(&self) -> &BTreeMap<Bitset, usize> {
        &self.indexer
    }

    pub fn rootsplit_count(&self) -> usize {
        self.rootsplit_count
    }

    /// Sentinel index for bitsets outside the indexer.
    pub fn first_empty_index(&self) -> usize {
        self.first_empty_index
    }

    fn index_of(&self, bitset: &Bitset) -> usize {
        self.indexer
            .get(bitset)
            .copied()
            .unwrap_or(self.first_empty_index)
    }

    pub fn representation_of(&self, topology: &Topology) -> Result<PspRepresentation> {
        if topology.leaf_count() != self.taxon_count {
            return Err(SbnError::structural(format!(
                "topology has {} taxa, the PSP indexer was built for {}",
                topology.leaf_count(),
                self.taxon_count
            )));
        }
        let edge_count = topology.root();
        let clades = topology.clades();
        let rootsplit = clades[..edge_count]
            .iter()
            .map(|clade| self.index_of(&clade.minorized()))
            .collect();
        let mut below = vec![self.first_empty_index; edge_count];
        let mut above = vec![self.first_empty_index; edge_count];
        topology.pcss_pre_order(|step| {
            if !step.is_rootsplit_step() {
                return;
            }
            let focal = side_bitset(&clades, step.focal);
            let index = self.index_of(&focal.concat(&pcss_child_of(step, &clades)));
            if step.focal.flip {
                above[step.focal.node] = index;
            } else {
                below[step.focal.node] = index;
            }
        })?;
        Ok(PspRepresentation {
            rootsplit,
            below,
            above,
        })
    }

    /// The representation as strings (`rootsplit`, `below`, `above`); sentinel entries
    /// are empty strings.
    pub fn string_representation_of(&self, topology: &Topology) -> Result<Vec<Vec<String>>> {
        let mut reversed = vec![String::new(); self.first_empty_index + 1];
        for (bitset, &idx) in &self.indexer {
            reversed[idx] = if idx < self.rootsplit_count {
                bitset.to_string()
            } else {
                bitset.subsplit_to_string()?
            };
        }
        let representation = self.representation_of(topology)?;
        Ok([representation.rootsplit, representation.below, representation.above]
            .into_iter()
            .map(|indices| indices.into_iter().map(|i| reversed[i].clone()).collect())
            .collect())
    }

    /// Branch lengths observed for each rootsplit across the collection.
    pub fn split_lengths(&self, collection: &TreeCollection) -> Result<Vec<Vec<f64>>> {
        let mut lengths = vec![Vec::new(); self.rootsplit_count];
        for (tree_idx, tree) in collection.trees().iter().enumerate() {
            let representation = self.representation_of(tree.topology())?;
            for (node, &idx) in representation.rootsplit.iter().enumerate() {
                match lengths.get_mut(idx) {
                    Some(observed) => observed.push(tree.branch_lengths()[node]),
                    None => warn!(
                        tree = tree_idx,
                        node, "split is not in the PSP indexer, skipping its branch length"
                    ),
                }
            }
        }
        Ok(lengths)
    }
}
