//! Python binding layer for SBN training and sampling.
//!
//! Exposes one class, `SbnInstance`, wrapping the Rust pipeline of the same name.
//! Every `SbnError` surfaces in Python as a `ValueError`.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::collections::BTreeMap;

use crate::error::SbnError;
use crate::instance::SbnInstance;
use crate::sbn_probability::EmConfig;

impl From<SbnError> for PyErr {
    fn from(e: SbnError) -> Self {
        PyValueError::new_err(e.to_string())
    }
}

/// A tree collection together with the SBN built from it.
///
/// Args:
///     name: Label used in log messages
///     seed: Seed for sampling (default: drawn from OS entropy)
///
/// Typical use:
///     inst = SbnInstance("run")
///     inst.read_nexus_file("posterior.trees", burnin_trees=100)
///     inst.process_loaded_trees()
///     inst.train_simple_average()
///     probabilities = inst.calculate_sbn_probabilities()
#[pyclass(name = "SbnInstance")]
struct PySbnInstance {
    inner: SbnInstance,
}

#[pymethods]
impl PySbnInstance {
    #[new]
    #[pyo3(signature = (name, seed=None))]
    fn new(name: String, seed: Option<u64>) -> Self {
        let inner = match seed {
            Some(seed) => SbnInstance::with_seed(name, seed),
            None => SbnInstance::new(name),
        };
        PySbnInstance { inner }
    }

    #[getter]
    fn name(&self) -> String {
        self.inner.name().to_string()
    }

    fn set_seed(&mut self, seed: u64) {
        self.inner.set_seed(seed);
    }

    /// Load trees from a file with one Newick string per line.
    fn read_newick_file(&mut self, path: String) -> PyResult<()> {
        Ok(self.inner.read_newick_file(path)?)
    }

    /// Load trees from a BEAST/NEXUS file, dropping the first `burnin_trees`.
    #[pyo3(signature = (path, burnin_trees=0))]
    fn read_nexus_file(&mut self, path: String, burnin_trees: usize) -> PyResult<()> {
        Ok(self.inner.read_nexus_file(path, burnin_trees)?)
    }

    fn tree_count(&self) -> usize {
        self.inner.tree_collection().tree_count()
    }

    fn taxon_names(&self) -> Vec<String> {
        self.inner.taxon_names().to_vec()
    }

    /// Newick strings of the loaded trees, one per tree.
    fn tree_newicks(&self) -> Vec<String> {
        let collection = self.inner.tree_collection();
        collection
            .trees()
            .iter()
            .map(|tree| tree.newick(Some(collection.taxon_names())))
            .collect()
    }

    /// Count subsplits and build the indexers. Required before training or sampling.
    fn process_loaded_trees(&mut self) -> PyResult<()> {
        Ok(self.inner.process_loaded_trees()?)
    }

    fn train_simple_average(&mut self) -> PyResult<()> {
        Ok(self.inner.train_simple_average()?)
    }

    /// Run EM and return the score of every iteration.
    #[pyo3(signature = (alpha=0.0, max_iter=100, score_epsilon=1e-6))]
    fn train_expectation_maximization(
        &mut self,
        alpha: f64,
        max_iter: usize,
        score_epsilon: f64,
    ) -> PyResult<Vec<f64>> {
        let config = EmConfig {
            alpha,
            max_iter,
            score_epsilon,
        };
        Ok(self.inner.train_expectation_maximization(&config)?)
    }

    /// Log-space parameters, in indexer order.
    #[getter]
    fn sbn_parameters(&self) -> Vec<f64> {
        self.inner.sbn_parameters().to_vec()
    }

    #[setter]
    fn set_sbn_parameters(&mut self, parameters: Vec<f64>) -> PyResult<()> {
        Ok(self.inner.set_sbn_parameters(parameters)?)
    }

    /// Probability of every loaded tree under the current parameters.
    fn calculate_sbn_probabilities(&self) -> PyResult<Vec<f64>> {
        Ok(self.inner.calculate_sbn_probabilities()?)
    }

    /// Replace the loaded trees with `count` sampled unrooted trees.
    fn sample_trees(&mut self, count: usize) -> PyResult<()> {
        Ok(self.inner.sample_trees(count)?)
    }

    /// Returns (indexer, parent_to_range) keyed by bitset strings.
    fn get_indexers(
        &self,
    ) -> PyResult<(BTreeMap<String, usize>, BTreeMap<String, (usize, usize)>)> {
        Ok(self.inner.get_indexers()?)
    }

    fn pretty_indexer(&self) -> PyResult<Vec<String>> {
        Ok(self.inner.pretty_indexer()?)
    }

    fn string_reversed_indexer(&self) -> PyResult<Vec<String>> {
        Ok(self.inner.string_reversed_indexer()?)
    }

    fn make_indexer_representations(&self) -> PyResult<Vec<Vec<Vec<usize>>>> {
        Ok(self.inner.make_indexer_representations()?)
    }

    /// One (rootsplit, below, above) triple of index lists per tree.
    fn make_psp_indexer_representations(
        &self,
    ) -> PyResult<Vec<(Vec<usize>, Vec<usize>, Vec<usize>)>> {
        Ok(self
            .inner
            .make_psp_indexer_representations()?
            .into_iter()
            .map(|r| (r.rootsplit, r.below, r.above))
            .collect())
    }

    fn string_psp_representations(&self) -> PyResult<Vec<Vec<Vec<String>>>> {
        Ok(self.inner.string_psp_representations()?)
    }

    fn split_lengths(&self) -> PyResult<Vec<Vec<f64>>> {
        Ok(self.inner.split_lengths()?)
    }

    /// Returns (rootsplit counts, parent -> child counts) keyed by bitset strings.
    fn split_counters(
        &self,
    ) -> PyResult<(BTreeMap<String, usize>, BTreeMap<String, BTreeMap<String, usize>>)> {
        Ok(self.inner.split_counters()?)
    }

    fn print_status(&self) {
        self.inner.print_status();
    }
}

/// Python module definition
#[pymodule]
fn rust_python_sbn(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PySbnInstance>()?;
    Ok(())
}
