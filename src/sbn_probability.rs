//! Training and evaluating SBN parameters.
//!
//! Parameters live in one dense vector addressed by the `SbnMaps` indexer. Each block
//! (the rootsplits, then every parent range) is a separate categorical distribution.
//! After training the vector holds natural logs.
//!
//! # Example
//! ```
//! # use rust_python_sbn::sbn_probability::log_sum_exp;
//! let lse = log_sum_exp(&[0.5f64.ln(), 0.25f64.ln()]);
//! assert!((lse - 0.75f64.ln()).abs() < 1e-12);
//! ```

use std::ops::Range;

use tracing::{debug, warn};

use crate::error::{Result, SbnError};
use crate::sbn_maps::{IndexerRepresentation, IndexerRepresentationCounter};

/// Options for `expectation_maximization`.
#[derive(Clone, Debug, PartialEq)]
pub struct EmConfig {
    /// Pseudocount added to every parameter in the M-step.
    pub alpha: f64,
    pub max_iter: usize,
    /// Stop once an iteration improves the score by less than this.
    pub score_epsilon: f64,
}

impl Default for EmConfig {
    fn default() -> Self {
        EmConfig {
            alpha: 0.0,
            max_iter: 100,
            score_epsilon: 1e-6,
        }
    }
}

/// `ln(Σ exp(x))` without overflow. Returns `-inf` for an empty or all `-inf` input.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + values.iter().map(|x| (x - max).exp()).sum::<f64>().ln()
}

/// Subtracts each block's log-sum-exp so every block sums to one in probability space.
///
/// A block with no mass (all `-inf`) becomes NaN and is left that way.
pub fn probability_normalize_params_in_log(params: &mut [f64], blocks: &[Range<usize>]) {
    for block in blocks {
        let slice = &mut params[block.clone()];
        let lse = log_sum_exp(slice);
        slice.iter_mut().for_each(|x| *x -= lse);
    }
}

fn normalize_blocks(values: &mut [f64], blocks: &[Range<usize>]) {
    for block in blocks {
        let slice = &mut values[block.clone()];
        let total: f64 = slice.iter().sum();
        slice.iter_mut().for_each(|x| *x /= total);
    }
}

fn rooting_log_probability(params: &[f64], rooting: &[usize]) -> f64 {
    rooting
        .iter()
        .map(|&idx| params.get(idx).copied().unwrap_or(f64::NEG_INFINITY))
        .sum()
}

/// Log-probability of an unrooted tree: log-sum-exp over its rootings. Any index outside
/// the parameter vector (the sentinel) makes that rooting impossible.
pub fn log_probability_of(params: &[f64], representation: &IndexerRepresentation) -> f64 {
    let per_rooting: Vec<f64> = representation
        .iter()
        .map(|rooting| rooting_log_probability(params, rooting))
        .collect();
    log_sum_exp(&per_rooting)
}

fn check_inputs(
    gpcss_count: usize,
    blocks: &[Range<usize>],
    representations: &IndexerRepresentationCounter,
) -> Result<()> {
    if representations.is_empty() {
        return Err(SbnError::precondition("no tree representations to train on"));
    }
    if blocks.iter().any(|b| b.end > gpcss_count) {
        return Err(SbnError::precondition(
            "parameter blocks extend past the parameter vector",
        ));
    }
    Ok(())
}

/// Count-weighted occurrences of every index over every rooting, normalized per block,
/// returned as logs.
pub fn simple_average(
    gpcss_count: usize,
    blocks: &[Range<usize>],
    representations: &IndexerRepresentationCounter,
) -> Result<Vec<f64>> {
    check_inputs(gpcss_count, blocks, representations)?;
    let mut counts = vec![0.0; gpcss_count];
    for (representation, count) in representations {
        for &idx in representation.iter().flatten() {
            if let Some(slot) = counts.get_mut(idx) {
                *slot += *count as f64;
            }
        }
    }
    normalize_blocks(&mut counts, blocks);
    Ok(counts.into_iter().map(f64::ln).collect())
}

/// Fits the SBN to the trees' unrooted frequencies, treating the rooting as missing.
///
/// # Algorithm
/// Starts from `simple_average`. Each iteration:
/// 1. E-step: for every tree, the posterior weight of each rooting is its probability
///    divided by the tree's total; `m_bar[i]` accumulates `count × weight` for every
///    index `i` of the rooting.
/// 2. Score: `Σ count × log P(tree)` plus `alpha × Σ params` (the log-prior of the
///    current parameters).
/// 3. M-step: parameters become `ln(normalize(m_bar + alpha))` per block.
///
/// Stops when the score improves by less than `score_epsilon` or after `max_iter`
/// iterations.
///
/// # Returns
/// The trained log-parameters and the score of every iteration.
pub fn expectation_maximization(
    gpcss_count: usize,
    blocks: &[Range<usize>],
    representations: &IndexerRepresentationCounter,
    config: &EmConfig,
) -> Result<(Vec<f64>, Vec<f64>)> {
    if config.alpha < 0.0 {
        return Err(SbnError::precondition("EM pseudocount must be non-negative"));
    }
    let mut params = simple_average(gpcss_count, blocks, representations)?;
    let mut scores: Vec<f64> = Vec::with_capacity(config.max_iter);

    for iteration in 0..config.max_iter {
        let mut m_bar = vec![0.0; gpcss_count];
        let mut score = 0.0;
        for (tree_idx, (representation, count)) in representations.iter().enumerate() {
            let count = *count as f64;
            let per_rooting: Vec<f64> = representation
                .iter()
                .map(|rooting| rooting_log_probability(&params, rooting))
                .collect();
            let tree_log_probability = log_sum_exp(&per_rooting);
            if tree_log_probability == f64::NEG_INFINITY {
                warn!(tree = tree_idx, "tree has zero probability under the SBN, skipping");
                continue;
            }
            score += count * tree_log_probability;
            for (rooting, log_probability) in representation.iter().zip(&per_rooting) {
                let weight = count * (log_probability - tree_log_probability).exp();
                for &idx in rooting {
                    if let Some(slot) = m_bar.get_mut(idx) {
                        *slot += weight;
                    }
                }
            }
        }
        if config.alpha > 0.0 {
            score += config.alpha * params.iter().sum::<f64>();
        }

        m_bar.iter_mut().for_each(|m| *m += config.alpha);
        normalize_blocks(&mut m_bar, blocks);
        params = m_bar.into_iter().map(f64::ln).collect();

        debug!(iteration, score, "EM iteration");
        let improvement = scores.last().map(|previous| score - previous);
        scores.push(score);
        if improvement.is_some_and(|delta| delta < config.score_epsilon) {
            break;
        }
    }
    Ok((params, scores))
}

fn check_samples(log_f: &[f64], at_least: usize) -> Result<()> {
    if log_f.len() < at_least {
        return Err(SbnError::precondition(format!(
            "{} samples given, at least {at_least} needed",
            log_f.len()
        )));
    }
    Ok(())
}

/// Multiplicative factors of the score-function gradient estimator for `K` sampled
/// topologies with log-weights `log_f`: `ln(mean f) - f_j / Σ f`.
pub fn multiplicative_factors(log_f: &[f64]) -> Result<Vec<f64>> {
    check_samples(log_f, 1)?;
    let log_total = log_sum_exp(log_f);
    let log_mean = log_total - (log_f.len() as f64).ln();
    Ok(log_f
        .iter()
        .map(|&x| log_mean - (x - log_total).exp())
        .collect())
}

/// VIMCO factors: the learning signal of sample `j` uses a leave-one-out baseline where
/// `log f_j` is replaced by the mean of the other log-weights.
pub fn vimco_multiplicative_factors(log_f: &[f64]) -> Result<Vec<f64>> {
    check_samples(log_f, 2)?;
    let k = log_f.len();
    let log_total = log_sum_exp(log_f);
    let sum: f64 = log_f.iter().sum();
    let mut perturbed = log_f.to_vec();
    Ok((0..k)
        .map(|j| {
            perturbed[j] = (sum - log_f[j]) / (k - 1) as f64;
            let signal = log_total - log_sum_exp(&perturbed);
            perturbed[j] = log_f[j];
            signal - (log_f[j] - log_total).exp()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::TopologyCounter;
    use crate::sbn_maps::SbnMaps;
    use crate::topology::Topology;
    use approx::assert_relative_eq;

    fn block_sums(params: &[f64], blocks: &[Range<usize>]) -> Vec<f64> {
        blocks
            .iter()
            .map(|b| params[b.clone()].iter().map(|x| x.exp()).sum())
            .collect()
    }

    /// Several 5-taxon topologies with uneven counts, enough for EM to move away
    /// from the simple average.
    fn training_set() -> (SbnMaps, IndexerRepresentationCounter) {
        let counter: TopologyCounter = [
            (vec![6, 5, 7, 5, 6, 7, 7], 10),
            (vec![5, 5, 6, 7, 7, 6, 7], 6),
            (vec![5, 6, 5, 7, 7, 6, 7], 3),
            (vec![7, 5, 5, 6, 6, 7, 7], 1),
        ]
        .into_iter()
        .map(|(parents, count)| (Topology::of_parent_index_vector(&parents).unwrap(), count))
        .collect();
        let maps = SbnMaps::build(&counter).unwrap();
        let representations = maps
            .indexer_representation_counter_of(&counter, maps.gpcss_count())
            .unwrap();
        (maps, representations)
    }

    #[test]
    fn test_log_sum_exp() {
        assert_relative_eq!(log_sum_exp(&[0.0, 0.0]), 2f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(log_sum_exp(&[1000.0, 1000.0]), 1000.0 + 2f64.ln(), epsilon = 1e-9);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_normalize_in_log() {
        let mut params = vec![0.0, 1.0, 2.0, -3.0, 5.0];
        let blocks = vec![0..2, 2..5];
        probability_normalize_params_in_log(&mut params, &blocks);
        for total in block_sums(&params, &blocks) {
            assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        }
        assert_relative_eq!(params[1] - params[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_simple_average_blocks_normalized() {
        let (maps, representations) = training_set();
        let blocks = maps.parameter_blocks();
        let params = simple_average(maps.gpcss_count(), &blocks, &representations).unwrap();
        for total in block_sums(&params, &blocks) {
            assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_em_score_is_non_decreasing() {
        let (maps, representations) = training_set();
        let blocks = maps.parameter_blocks();
        for alpha in [0.0, 0.5, 2.0] {
            let config = EmConfig {
                alpha,
                max_iter: 30,
                score_epsilon: f64::NEG_INFINITY,
            };
            let (params, scores) =
                expectation_maximization(maps.gpcss_count(), &blocks, &representations, &config)
                    .unwrap();
            assert_eq!(scores.len(), 30);
            for pair in scores.windows(2) {
                assert!(pair[1] >= pair[0] - 1e-9, "alpha {alpha}: {pair:?}");
            }
            for total in block_sums(&params, &blocks) {
                assert_relative_eq!(total, 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_em_stops_on_small_improvement() {
        let (maps, representations) = training_set();
        let blocks = maps.parameter_blocks();
        let config = EmConfig {
            alpha: 0.0,
            max_iter: 10_000,
            score_epsilon: 1e-3,
        };
        let (_, scores) =
            expectation_maximization(maps.gpcss_count(), &blocks, &representations, &config)
                .unwrap();
        assert!(scores.len() < 10_000);
        assert!(scores.len() >= 2);
    }

    #[test]
    fn test_em_rejects_negative_alpha() {
        let (maps, representations) = training_set();
        let config = EmConfig {
            alpha: -1.0,
            ..EmConfig::default()
        };
        assert!(matches!(
            expectation_maximization(
                maps.gpcss_count(),
                &maps.parameter_blocks(),
                &representations,
                &config
            ),
            Err(SbnError::Precondition { .. })
        ));
    }

    #[test]
    fn test_log_probability_of() {
        let (maps, representations) = training_set();
        let blocks = maps.parameter_blocks();
        let params = simple_average(maps.gpcss_count(), &blocks, &representations).unwrap();
        let total: f64 = representations
            .iter()
            .map(|(representation, _)| log_probability_of(&params, representation).exp())
            .sum();
        assert!(total > 0.0 && total <= 1.0 + 1e-12);

        let mut with_sentinel = representations[0].0.clone();
        for rooting in &mut with_sentinel {
            rooting.push(maps.gpcss_count());
        }
        assert_eq!(log_probability_of(&params, &with_sentinel), f64::NEG_INFINITY);
    }

    #[test]
    fn test_empty_training_set() {
        assert!(matches!(
            simple_average(0, &[], &Vec::new()),
            Err(SbnError::Precondition { .. })
        ));
    }

    #[test]
    fn test_multiplicative_factors() {
        let factors = multiplicative_factors(&[0.0, 3f64.ln()]).unwrap();
        assert_relative_eq!(factors[0], 2f64.ln() - 0.25, epsilon = 1e-12);
        assert_relative_eq!(factors[1], 2f64.ln() - 0.75, epsilon = 1e-12);
        assert!(matches!(multiplicative_factors(&[]), Err(SbnError::Precondition { .. })));
    }

    #[test]
    fn test_vimco_multiplicative_factors() {
        let factors = vimco_multiplicative_factors(&[0.0, 3f64.ln()]).unwrap();
        // Baselines replace each weight by the other: {3, 3} and {1, 1}.
        assert_relative_eq!(factors[0], (4.0f64 / 6.0).ln() - 0.25, epsilon = 1e-12);
        assert_relative_eq!(factors[1], 2f64.ln() - 0.75, epsilon = 1e-12);

        // Equal weights carry no signal beyond the normalized weight.
        for factor in vimco_multiplicative_factors(&[-2.0; 3]).unwrap() {
            assert_relative_eq!(factor, -1.0 / 3.0, epsilon = 1e-12);
        }
        assert!(matches!(
            vimco_multiplicative_factors(&[1.0]),
            Err(SbnError::Precondition { .. })
        ));
    }
}
