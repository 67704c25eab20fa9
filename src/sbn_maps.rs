//! Subsplit counting and SBN index construction.
//!
//! # Overview
//! Every SBN parameter is addressed through one `Indexer`, a `BTreeMap` from bitset to
//! position in the parameter vector:
//!
//! ```text
//!   [0, R)        rootsplits (n bits, minorized)
//!   [R, N)        PCSS bitsets (3n bits: sister | focal | child), one contiguous
//!                 range per parent subsplit `sister | focal`
//! ```
//!
//! Both passes walk `BTreeMap`s, so the index of a bitset only depends on the set of
//! bitsets observed, never on the order the trees were read in.
//!
//! A tree is represented for training by its *indexer representation*: one entry per
//! virtual rooting (per edge), each a list `[rootsplit index, PCSS indices...]`. Bitsets
//! that are not in the indexer map to a caller-supplied sentinel.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::bitset::Bitset;
use crate::collection::TopologyCounter;
use crate::error::{Result, SbnError};
use crate::topology::{PcssStep, Side, Topology};

pub type RootsplitCounter = BTreeMap<Bitset, usize>;
pub type PcssCounter = BTreeMap<Bitset, BTreeMap<Bitset, usize>>;
pub type Indexer = BTreeMap<Bitset, usize>;
pub type ParentToRange = BTreeMap<Bitset, Range<usize>>;

/// One index list per virtual rooting: rootsplit index first, then PCSS indices.
pub type IndexerRepresentation = Vec<Vec<usize>>;
pub type IndexerRepresentationCounter = Vec<(IndexerRepresentation, usize)>;

/// Rooted representations (sorted index lists) with multiplicities.
pub type RootedRepresentationCounter = BTreeMap<Vec<usize>, usize>;

/// Key of the rootsplit block in `string_indexers`.
pub const ROOTSPLIT_RANGE_KEY: &str = "rootsplit";

/// Clade on one side of an edge.
pub fn side_bitset(clades: &[Bitset], side: Side) -> Bitset {
    if side.flip {
        clades[side.node].complement()
    } else {
        clades[side.node].clone()
    }
}

/// The `sister | focal` parent subsplit of a step.
pub fn pcss_parent_of(step: &PcssStep, clades: &[Bitset]) -> Bitset {
    side_bitset(clades, step.sister).concat(&side_bitset(clades, step.focal))
}

/// The smaller of the two child clades.
pub fn pcss_child_of(step: &PcssStep, clades: &[Bitset]) -> Bitset {
    let child0 = side_bitset(clades, step.child0);
    let child1 = side_bitset(clades, step.child1);
    child0.min(child1)
}

/// Full `sister | focal | child` bitset of a step.
pub fn pcss_bitset_of(step: &PcssStep, clades: &[Bitset]) -> Bitset {
    pcss_parent_of(step, clades).concat(&pcss_child_of(step, clades))
}

/// Counts minorized rootsplits: every non-root node's clade is the rootsplit of the
/// rooting on its edge.
pub fn rootsplit_counter_of(counter: &TopologyCounter) -> RootsplitCounter {
    let mut rootsplits = RootsplitCounter::new();
    for (topology, count) in counter.iter() {
        let clades = topology.clades();
        for &child in topology.children(topology.root()) {
            topology.pre_order_from(child, |node| {
                *rootsplits.entry(clades[node].minorized()).or_insert(0) += count;
            });
        }
    }
    rootsplits
}

/// Counts every (parent subsplit, child) pair over all virtual rootings.
///
/// # Errors
/// `SbnError::Structural` for a topology without a trifurcating root or with a
/// non-bifurcating internal node.
pub fn pcss_counter_of(counter: &TopologyCounter) -> Result<PcssCounter> {
    let mut pcss = PcssCounter::new();
    for (topology, count) in counter.iter() {
        let clades = topology.clades();
        topology.pcss_pre_order(|step| {
            *pcss
                .entry(pcss_parent_of(step, &clades))
                .or_default()
                .entry(pcss_child_of(step, &clades))
                .or_insert(0) += count;
        })?;
    }
    Ok(pcss)
}

/// Adds the rooted representation of `topology` (sorted) to `counter`.
pub fn increment_rooted_representation_counter(
    maps: &SbnMaps,
    counter: &mut RootedRepresentationCounter,
    topology: &Topology,
) -> Result<()> {
    let mut representation =
        maps.rooted_indexer_representation_of(topology, maps.gpcss_count())?;
    representation.sort_unstable();
    *counter.entry(representation).or_insert(0) += 1;
    Ok(())
}

/// Everything the SBN needs to address its parameters.
#[derive(Clone, Debug, Default)]
pub struct SbnMaps {
    taxon_count: usize,
    rootsplits: Vec<Bitset>,
    indexer: Indexer,
    parent_to_range: ParentToRange,
    /// Child subsplit of each PCSS index, offset by the rootsplit count.
    index_to_child: Vec<Bitset>,
    rootsplit_counter: RootsplitCounter,
    pcss_counter: PcssCounter,
}

impl SbnMaps {
    /// Counts subsplits of `counter` and assigns indices.
    ///
    /// # Algorithm
    /// 1. Rootsplits in lexicographic order get `0..R`.
    /// 2. Parents in lexicographic order each get the next contiguous range, children
    ///    inside a range also lexicographic.
    ///
    /// # Errors
    /// `SbnError::Structural` if a topology is not unrooted-bifurcating or the trees
    /// disagree on the number of taxa.
    pub fn build(counter: &TopologyCounter) -> Result<Self> {
        let mut taxon_counts = counter.iter().map(|(t, _)| t.leaf_count());
        let taxon_count = taxon_counts.next().unwrap_or(0);
        if taxon_counts.any(|n| n != taxon_count) {
            return Err(SbnError::structural(
                "topologies in the counter have different taxon counts",
            ));
        }

        let rootsplit_counter = rootsplit_counter_of(counter);
        let pcss_counter = pcss_counter_of(counter)?;

        let mut indexer = Indexer::new();
        let rootsplits: Vec<Bitset> = rootsplit_counter.keys().cloned().collect();
        for (idx, rootsplit) in rootsplits.iter().enumerate() {
            indexer.insert(rootsplit.clone(), idx);
        }

        let mut parent_to_range = ParentToRange::new();
        let mut index_to_child = Vec::new();
        let mut next = rootsplits.len();
        for (parent, children) in &pcss_counter {
            let start = next;
            for child in children.keys() {
                indexer.insert(parent.concat(child), next);
                index_to_child.push(Bitset::child_subsplit(parent, child)?);
                next += 1;
            }
            parent_to_range.insert(parent.clone(), start..next);
        }

        Ok(SbnMaps {
            taxon_count,
            rootsplits,
            indexer,
            parent_to_range,
            index_to_child,
            rootsplit_counter,
            pcss_counter,
        })
    }

    pub fn taxon_count(&self) -> usize {
        self.taxon_count
    }

    pub fn rootsplits(&self) -> &[Bitset] {
        &self.rootsplits
    }

    pub fn rootsplit_count(&self) -> usize {
        self.rootsplits.len()
    }

    /// Number of SBN parameters (rootsplits plus PCSS entries).
    pub fn gpcss_count(&self) -> usize {
        self.indexer.len()
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn parent_to_range(&self) -> &ParentToRange {
        &self.parent_to_range
    }

    pub fn rootsplit_counter(&self) -> &RootsplitCounter {
        &self.rootsplit_counter
    }

    pub fn pcss_counter(&self) -> &PcssCounter {
        &self.pcss_counter
    }

    /// Child subsplit reached by choosing PCSS `index`.
    pub fn child_subsplit_of(&self, index: usize) -> Option<&Bitset> {
        index
            .checked_sub(self.rootsplits.len())
            .and_then(|offset| self.index_to_child.get(offset))
    }

    fn push_range_if_parent(&self, parent: &Bitset, ranges: &mut Vec<Range<usize>>) {
        if let Some(range) = self.parent_to_range.get(parent) {
            ranges.push(range.clone());
        }
    }

    /// Parameter blocks a rooted tree draws from: the rootsplit block, then the child
    /// range of every non-leaf clade, in representation order. These are the blocks
    /// whose softmax a gradient with respect to this tree touches.
    ///
    /// # Errors
    /// `SbnError::Precondition` for an empty representation or an index outside the
    /// support.
    pub fn subsplit_ranges_of(&self, rooted_representation: &[usize]) -> Result<Vec<Range<usize>>> {
        let (&rootsplit_idx, pcss_indices) = rooted_representation
            .split_first()
            .ok_or_else(|| SbnError::precondition("empty rooted representation"))?;
        let rootsplit = self.rootsplits.get(rootsplit_idx).ok_or_else(|| {
            SbnError::precondition(format!("index {rootsplit_idx} is not a rootsplit"))
        })?;
        let mut ranges = vec![0..self.rootsplits.len()];
        let root = rootsplit.concat(&rootsplit.complement());
        self.push_range_if_parent(&root, &mut ranges);
        self.push_range_if_parent(&root.rotate_subsplit()?, &mut ranges);
        for &idx in pcss_indices {
            let child = self
                .child_subsplit_of(idx)
                .ok_or_else(|| SbnError::precondition(format!("index {idx} is not a PCSS")))?;
            self.push_range_if_parent(child, &mut ranges);
            self.push_range_if_parent(&child.rotate_subsplit()?, &mut ranges);
        }
        Ok(ranges)
    }

    /// Every independent categorical block: the rootsplits, then each parent range in
    /// index order.
    pub fn parameter_blocks(&self) -> Vec<Range<usize>> {
        let mut blocks = Vec::with_capacity(self.parent_to_range.len() + 1);
        blocks.push(0..self.rootsplits.len());
        let mut ranges: Vec<Range<usize>> = self.parent_to_range.values().cloned().collect();
        ranges.sort_by_key(|r| r.start);
        blocks.extend(ranges);
        blocks
    }

    fn check_taxon_count(&self, topology: &Topology) -> Result<()> {
        if topology.leaf_count() != self.taxon_count {
            return Err(SbnError::structural(format!(
                "topology has {} taxa, the SBN was built for {}",
                topology.leaf_count(),
                self.taxon_count
            )));
        }
        Ok(())
    }

    fn index_or(&self, bitset: &Bitset, default_index: usize) -> usize {
        self.indexer.get(bitset).copied().unwrap_or(default_index)
    }

    /// Index lists of every virtual rooting of an unrooted topology, rootings ordered by
    /// the id of the node below the root edge.
    pub fn indexer_representation_of(
        &self,
        topology: &Topology,
        default_index: usize,
    ) -> Result<IndexerRepresentation> {
        self.check_taxon_count(topology)?;
        let clades = topology.clades();
        (0..topology.root())
            .map(|edge| -> Result<Vec<usize>> {
                let mut rooting = vec![self.index_or(&clades[edge].minorized(), default_index)];
                topology.virtual_rooting_pre_order(edge, |step| {
                    rooting.push(self.index_or(&pcss_bitset_of(step, &clades), default_index));
                })?;
                Ok(rooting)
            })
            .collect()
    }

    /// Index list of a rooted (bifurcating root) topology.
    pub fn rooted_indexer_representation_of(
        &self,
        topology: &Topology,
        default_index: usize,
    ) -> Result<Vec<usize>> {
        self.check_taxon_count(topology)?;
        let clades = topology.clades();
        let first_child = topology
            .children(topology.root())
            .first()
            .copied()
            .ok_or_else(|| SbnError::structural("a rooted topology needs children"))?;
        let mut representation =
            vec![self.index_or(&clades[first_child].minorized(), default_index)];
        topology.rooted_pre_order(|step| {
            representation.push(self.index_or(&pcss_bitset_of(step, &clades), default_index));
        })?;
        Ok(representation)
    }

    pub fn indexer_representation_counter_of(
        &self,
        counter: &TopologyCounter,
        default_index: usize,
    ) -> Result<IndexerRepresentationCounter> {
        counter
            .iter()
            .map(|(topology, count)| -> Result<(IndexerRepresentation, usize)> {
                Ok((self.indexer_representation_of(topology, default_index)?, count))
            })
            .collect()
    }

    /// Human-readable name of each index: rootsplits as `0110`, PCSS as `01|10|00`.
    pub fn pretty_indexer(&self) -> Result<Vec<String>> {
        self.reversed_indexer(|bitset| {
            if bitset.len() == self.taxon_count {
                Ok(bitset.to_string())
            } else {
                bitset.pcss_to_string()
            }
        })
    }

    /// Raw bitstring of each index.
    pub fn string_reversed_indexer(&self) -> Result<Vec<String>> {
        self.reversed_indexer(|bitset| Ok(bitset.to_string()))
    }

    fn reversed_indexer(&self, show: impl Fn(&Bitset) -> Result<String>) -> Result<Vec<String>> {
        let mut reversed = vec![String::new(); self.indexer.len()];
        for (bitset, &idx) in &self.indexer {
            reversed[idx] = show(bitset)?;
        }
        Ok(reversed)
    }

    /// String-keyed indexer and parent-to-range maps. The rootsplit block appears in the
    /// range map under `"rootsplit"`.
    pub fn string_indexers(
        &self,
    ) -> (BTreeMap<String, usize>, BTreeMap<String, (usize, usize)>) {
        let indexer = self
            .indexer
            .iter()
            .map(|(bitset, &idx)| (bitset.to_string(), idx))
            .collect();
        let mut ranges: BTreeMap<String, (usize, usize)> = self
            .parent_to_range
            .iter()
            .map(|(parent, range)| (parent.to_string(), (range.start, range.end)))
            .collect();
        ranges.insert(ROOTSPLIT_RANGE_KEY.to_string(), (0, self.rootsplits.len()));
        (indexer, ranges)
    }

    /// Pretty strings of a tree's indexer representation; out-of-support entries are
    /// empty strings.
    pub fn string_indexer_representation_of(&self, topology: &Topology) -> Result<Vec<Vec<String>>> {
        let pretty = self.pretty_indexer()?;
        let representation = self.indexer_representation_of(topology, self.gpcss_count())?;
        Ok(representation
            .into_iter()
            .map(|rooting| {
                rooting
                    .into_iter()
                    .map(|idx| pretty.get(idx).cloned().unwrap_or_default())
                    .collect()
            })
            .collect())
    }

    pub fn string_rootsplit_counter(&self) -> BTreeMap<String, usize> {
        self.rootsplit_counter
            .iter()
            .map(|(bitset, &count)| (bitset.to_string(), count))
            .collect()
    }

    pub fn string_pcss_counter(&self) -> Result<BTreeMap<String, BTreeMap<String, usize>>> {
        self.pcss_counter
            .iter()
            .map(|(parent, children)| {
                let children = children
                    .iter()
                    .map(|(child, &count)| (child.to_string(), count))
                    .collect();
                Ok((parent.subsplit_to_string()?, children))
            })
            .collect()
    }
}

/// Builds maps from topologies that are each counted once.
pub fn sbn_maps_of_topologies(topologies: impl IntoIterator<Item = Topology>) -> Result<SbnMaps> {
    let counter: TopologyCounter = topologies.into_iter().map(|t| (t, 1)).collect();
    SbnMaps::build(&counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::two_level;
    use std::collections::{BTreeSet, HashSet};

    fn string_sets(maps: &SbnMaps, topology: &Topology) -> Vec<BTreeSet<String>> {
        maps.string_indexer_representation_of(topology)
            .unwrap()
            .into_iter()
            .map(|rooting| rooting.into_iter().collect())
            .collect()
    }

    fn expected_sets(expected: &[[&str; 4]]) -> Vec<BTreeSet<String>> {
        expected
            .iter()
            .map(|set| set.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    /// ```text
    ///          7
    ///        / | \
    ///       2  5  6
    ///         / \ / \
    ///        1  3 0  4
    /// ```
    fn cherries() -> Topology {
        Topology::of_parent_index_vector(&[6, 5, 7, 5, 6, 7, 7]).unwrap()
    }

    /// ```text
    ///          7
    ///        / | \
    ///       6  3  4
    ///      / \
    ///     5   2
    ///    / \
    ///   0   1
    /// ```
    fn ladder() -> Topology {
        Topology::of_parent_index_vector(&[5, 5, 6, 7, 7, 6, 7]).unwrap()
    }

    #[test]
    fn test_indexer_representation_cherries() {
        let maps = sbn_maps_of_topologies([cherries(), ladder()]).unwrap();
        let expected = expected_sets(&[
            ["01111", "10000|01111|00001", "00001|01110|00100", "00100|01010|00010"],
            ["01000", "01000|10111|00010", "00100|10001|00001", "00010|10101|00100"],
            ["00100", "10001|01010|00010", "01010|10001|00001", "00100|11011|01010"],
            ["00010", "00010|11101|01000", "00100|10001|00001", "01000|10101|00100"],
            ["00001", "00001|11110|01110", "10000|01110|00100", "00100|01010|00010"],
            ["01010", "10101|01010|00010", "00100|10001|00001", "01010|10101|00100"],
            ["01110", "00100|01010|00010", "10001|01110|00100", "01110|10001|00001"],
        ]);
        assert_eq!(string_sets(&maps, &cherries()), expected);
    }

    #[test]
    fn test_indexer_representation_ladder() {
        let maps = sbn_maps_of_topologies([cherries(), ladder()]).unwrap();
        let expected = expected_sets(&[
            ["01111", "10000|01111|00111", "00100|00011|00001", "01000|00111|00011"],
            ["01000", "01000|10111|00111", "00100|00011|00001", "10000|00111|00011"],
            ["00100", "00100|11011|00011", "11000|00011|00001", "00011|11000|01000"],
            ["00010", "00100|11000|01000", "00001|11100|00100", "00010|11101|00001"],
            ["00001", "00100|11000|01000", "00001|11110|00010", "00010|11100|00100"],
            ["00111", "00111|11000|01000", "00100|00011|00001", "11000|00111|00011"],
            ["00011", "00100|11000|01000", "11100|00011|00001", "00011|11100|00100"],
        ]);
        assert_eq!(string_sets(&maps, &ladder()), expected);
    }

    #[test]
    fn test_rooted_indexer_representation() {
        let maps = sbn_maps_of_topologies([ladder()]).unwrap();
        let pretty = maps.pretty_indexer().unwrap();
        let as_strings = |topology: &Topology| -> BTreeSet<String> {
            maps.rooted_indexer_representation_of(topology, maps.gpcss_count())
                .unwrap()
                .into_iter()
                .map(|idx| pretty[idx].clone())
                .collect()
        };

        // ((((0,1),2),3),4)
        let caterpillar = Topology::of_parent_index_vector(&[5, 5, 6, 7, 8, 6, 7, 8]).unwrap();
        let expected: BTreeSet<String> =
            ["00001", "00001|11110|00010", "00010|11100|00100", "00100|11000|01000"]
                .iter()
                .map(|s| s.to_string())
                .collect();
        assert_eq!(as_strings(&caterpillar), expected);

        // (((0,1),2),(3,4))
        let balanced = Topology::of_parent_index_vector(&[5, 5, 6, 7, 7, 6, 8, 8]).unwrap();
        let expected: BTreeSet<String> =
            ["00011", "11100|00011|00001", "00011|11100|00100", "00100|11000|01000"]
                .iter()
                .map(|s| s.to_string())
                .collect();
        assert_eq!(as_strings(&balanced), expected);
    }

    #[test]
    fn test_pcss_enumeration_matches_rootings() {
        for topology in [cherries(), ladder()] {
            let clades = topology.clades();
            let mut enumerated = HashSet::new();
            topology
                .pcss_pre_order(|step| {
                    enumerated.insert(pcss_bitset_of(step, &clades));
                })
                .unwrap();
            let mut from_rootings = HashSet::new();
            for edge in 0..topology.root() {
                topology
                    .virtual_rooting_pre_order(edge, |step| {
                        from_rootings.insert(pcss_bitset_of(step, &clades));
                    })
                    .unwrap();
            }
            assert_eq!(enumerated, from_rootings);
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = sbn_maps_of_topologies([cherries(), ladder()]).unwrap();
        let b = sbn_maps_of_topologies([ladder(), cherries()]).unwrap();
        assert_eq!(a.indexer(), b.indexer());
        assert_eq!(a.parent_to_range(), b.parent_to_range());
        assert_eq!(a.parameter_blocks(), b.parameter_blocks());
    }

    #[test]
    fn test_layout_and_ranges() {
        let maps = sbn_maps_of_topologies([cherries(), ladder()]).unwrap();
        let r = maps.rootsplit_count();
        assert!(maps.rootsplits().iter().all(Bitset::is_minorized));
        for (bitset, &idx) in maps.indexer() {
            if idx < r {
                assert_eq!(bitset.len(), 5);
            } else {
                assert_eq!(bitset.len(), 15);
                let range = &maps.parent_to_range()[&bitset.pcss_parent().unwrap()];
                assert!(range.contains(&idx));
            }
        }
        // Blocks tile [0, N) without gaps.
        let blocks = maps.parameter_blocks();
        let mut next = 0;
        for block in &blocks {
            assert_eq!(block.start, next);
            assert!(!block.is_empty());
            next = block.end;
        }
        assert_eq!(next, maps.gpcss_count());

        let (_, ranges) = maps.string_indexers();
        assert_eq!(ranges[ROOTSPLIT_RANGE_KEY], (0, r));
    }

    #[test]
    fn test_child_subsplit_partitions_focal() {
        let maps = sbn_maps_of_topologies([cherries()]).unwrap();
        for (parent, range) in maps.parent_to_range() {
            let focal = parent.chunk(1, 2).unwrap();
            for idx in range.clone() {
                let child = maps.child_subsplit_of(idx).unwrap();
                let union = child.chunk(0, 2).unwrap().union(&child.chunk(1, 2).unwrap()).unwrap();
                assert_eq!(union, focal);
            }
        }
        assert!(maps.child_subsplit_of(0).is_none());
    }

    #[test]
    fn test_rootsplit_counter_non_trivial() {
        // (0,1,(2,3)) x2, (0,2,(1,3)), (0,(1,(2,3)))
        let rooted = Topology::of_parent_index_vector(&[6, 5, 4, 4, 5, 6]).unwrap();
        let counter: TopologyCounter = [
            (two_level(&[&[0], &[1], &[2, 3]]), 2),
            (two_level(&[&[0], &[2], &[1, 3]]), 1),
            (rooted, 1),
        ]
        .into_iter()
        .collect();
        let rootsplits = rootsplit_counter_of(&counter);
        let non_trivial: Vec<String> = rootsplits
            .keys()
            .filter(|b| b.count_ones() > 1 && b.complement().count_ones() > 1)
            .map(|b| b.to_string())
            .collect();
        assert_eq!(non_trivial, vec!["0011", "0101"]);

        // The bifurcating root has no PCSS enumeration.
        assert!(matches!(
            SbnMaps::build(&counter),
            Err(SbnError::Structural { .. })
        ));
    }

    #[test]
    fn test_unknown_topology_gets_sentinel() {
        let maps = sbn_maps_of_topologies([cherries()]).unwrap();
        let sentinel = maps.gpcss_count();
        let representation = maps.indexer_representation_of(&ladder(), sentinel).unwrap();
        assert_eq!(representation.len(), 7);
        assert!(representation.iter().flatten().any(|&idx| idx == sentinel));

        let four_taxa = two_level(&[&[0], &[1], &[2, 3]]);
        assert!(maps.indexer_representation_of(&four_taxa, sentinel).is_err());
    }

    #[test]
    fn test_string_counters() {
        let maps = sbn_maps_of_topologies([cherries()]).unwrap();
        let rootsplits = maps.string_rootsplit_counter();
        assert_eq!(rootsplits["01010"], 1);
        let pcss = maps.string_pcss_counter().unwrap();
        assert_eq!(pcss["00100|11011"]["01010"], 1);
    }

    #[test]
    fn test_subsplit_ranges_of_rooted_quartet() {
        // (0,1,(2,3)) rooted between the cherries: ((0,1),(2,3)).
        let unrooted = Topology::of_parent_index_vector(&[5, 5, 4, 4, 5]).unwrap();
        let rooted = Topology::of_parent_index_vector(&[4, 4, 5, 5, 6, 6]).unwrap();
        let maps = sbn_maps_of_topologies([unrooted]).unwrap();
        let representation = maps
            .rooted_indexer_representation_of(&rooted, maps.gpcss_count())
            .unwrap();
        let ranges = maps.subsplit_ranges_of(&representation).unwrap();

        let range_of = |parent: &str| maps.parent_to_range()[&parent.parse::<Bitset>().unwrap()].clone();
        assert_eq!(
            ranges,
            vec![0..maps.rootsplit_count(), range_of("00111100"), range_of("11000011")]
        );
    }

    /// ```text
    ///            8
    ///          /   \
    ///         7     6
    ///        / \   / \
    ///       2   5 0   4
    ///          / \
    ///         1   3
    /// ```
    #[test]
    fn test_subsplit_ranges_cover_each_pcss_once() {
        let rooted = Topology::of_parent_index_vector(&[6, 5, 7, 5, 6, 7, 8, 8]).unwrap();
        let maps = sbn_maps_of_topologies([cherries()]).unwrap();
        let representation = maps
            .rooted_indexer_representation_of(&rooted, maps.gpcss_count())
            .unwrap();
        assert!(representation.iter().all(|&idx| idx < maps.gpcss_count()));

        let ranges = maps.subsplit_ranges_of(&representation).unwrap();
        // Rootsplit block plus one range per internal non-root node.
        assert_eq!(ranges.len(), 4);
        assert!(ranges[0].contains(&representation[0]));
        for idx in &representation[1..] {
            assert_eq!(ranges[1..].iter().filter(|r| r.contains(idx)).count(), 1);
        }

        assert!(matches!(
            maps.subsplit_ranges_of(&[representation[0], maps.gpcss_count()]),
            Err(SbnError::Precondition { .. })
        ));
        assert!(matches!(maps.subsplit_ranges_of(&[]), Err(SbnError::Precondition { .. })));
    }
}
