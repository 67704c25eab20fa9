//! Drawing topologies from a trained SBN.
//!
//! A draw is top-down: pick a rootsplit, expand it into the subsplit
//! `rootsplit | !rootsplit`, then for each half either stop at a single taxon or pick
//! one of the PCSS children recorded for that parent and recurse into both parts.
//! Every recursion strictly shrinks the clade, so the walk ends at the leaves.

use std::ops::Range;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::bitset::Bitset;
use crate::error::{Result, SbnError};
use crate::sbn_maps::SbnMaps;
use crate::sbn_probability::log_sum_exp;
use crate::topology::{NodeId, Topology, TopologyBuilder};

/// Draws an index from `range` with probabilities proportional to `exp(params[i])`.
///
/// # Errors
/// `SbnError::Precondition` if the range is empty, out of bounds, or carries no
/// usable weight.
pub fn sample_index<R: Rng + ?Sized>(
    params: &[f64],
    range: Range<usize>,
    rng: &mut R,
) -> Result<usize> {
    let block = params.get(range.clone()).ok_or_else(|| {
        SbnError::precondition(format!(
            "range {range:?} is outside a parameter vector of length {}",
            params.len()
        ))
    })?;
    let lse = log_sum_exp(block);
    let weights = block.iter().map(|p| (p - lse).exp());
    let distribution = WeightedIndex::new(weights).map_err(|e| {
        SbnError::precondition(format!("cannot sample from range {range:?}: {e}"))
    })?;
    Ok(range.start + distribution.sample(rng))
}

/// Draws one topology. With `rooted` false the result is derooted and re-rooted
/// canonically (see `Topology::canonical_unrooted`).
pub fn sample_topology<R: Rng + ?Sized>(
    maps: &SbnMaps,
    params: &[f64],
    rooted: bool,
    rng: &mut R,
) -> Result<Topology> {
    if params.len() != maps.gpcss_count() {
        return Err(SbnError::precondition(format!(
            "{} parameters for an SBN with {} entries",
            params.len(),
            maps.gpcss_count()
        )));
    }
    let rootsplit_idx = sample_index(params, 0..maps.rootsplit_count(), rng)?;
    let rootsplit = &maps.rootsplits()[rootsplit_idx];
    let subsplit = rootsplit.concat(&rootsplit.complement());

    let mut builder = TopologyBuilder::new();
    let first = sample_clade(maps, params, &subsplit, &mut builder, rng)?;
    let second = sample_clade(maps, params, &subsplit.rotate_subsplit()?, &mut builder, rng)?;
    let root = builder.join_pair(first, second)?;
    let topology = builder.finish(root)?;
    if rooted {
        Ok(topology)
    } else {
        topology.deroot()?.canonical_unrooted()
    }
}

/// Builds the clade in the second half of `subsplit`.
fn sample_clade<R: Rng + ?Sized>(
    maps: &SbnMaps,
    params: &[f64],
    subsplit: &Bitset,
    builder: &mut TopologyBuilder,
    rng: &mut R,
) -> Result<NodeId> {
    let focal = subsplit.chunk(1, 2)?;
    if let Some(taxon) = focal.singleton_option() {
        let id = u32::try_from(taxon)
            .map_err(|_| SbnError::structural(format!("taxon id {taxon} does not fit in u32")))?;
        return Ok(builder.leaf(id));
    }
    let range = maps.parent_to_range().get(subsplit).cloned().ok_or_else(|| {
        SbnError::precondition(format!(
            "subsplit {} has no children in the SBN",
            subsplit.subsplit_to_string().unwrap_or_default()
        ))
    })?;
    let child_idx = sample_index(params, range, rng)?;
    let child = maps
        .child_subsplit_of(child_idx)
        .ok_or_else(|| SbnError::precondition(format!("index {child_idx} is not a PCSS")))?
        .clone();
    let first = sample_clade(maps, params, &child, builder, rng)?;
    let second = sample_clade(maps, params, &child.rotate_subsplit()?, builder, rng)?;
    builder.join_pair(first, second)
}
