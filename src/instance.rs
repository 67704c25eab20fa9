//! `SbnInstance`: one tree collection, the SBN built from it, and its parameters.
//!
//! # Overview
//! The usual pipeline is
//!
//! ```text
//!   read_newick_file / read_nexus_file / load_collection
//!        -> process_loaded_trees           (count subsplits, assign indices)
//!        -> train_simple_average | train_expectation_maximization
//!        -> calculate_sbn_probabilities | sample_trees
//! ```
//!
//! Each step that needs the SBN maps returns `SbnError::Precondition` when called
//! before `process_loaded_trees`.
//!
//! # Example
//! ```
//! # use rust_python_sbn::collection::TreeCollection;
//! # use rust_python_sbn::instance::SbnInstance;
//! # use rust_python_sbn::topology::Topology;
//! let topology = Topology::of_parent_index_vector(&[6, 5, 7, 5, 6, 7, 7]).unwrap();
//! let mut inst = SbnInstance::with_seed("demo", 7);
//! inst.load_collection(TreeCollection::of_topologies([topology]).unwrap());
//! inst.process_loaded_trees().unwrap();
//! inst.train_simple_average().unwrap();
//! inst.sample_trees(3).unwrap();
//! assert_eq!(inst.tree_collection().tree_count(), 3);
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::info;

use crate::collection::{Tree, TreeCollection};
use crate::error::{Result, SbnError};
use crate::io;
use crate::psp_indexer::{PspIndexer, PspRepresentation};
use crate::sampler;
use crate::sbn_maps::{IndexerRepresentation, IndexerRepresentationCounter, SbnMaps};
use crate::sbn_probability::{
    expectation_maximization, log_probability_of, probability_normalize_params_in_log,
    simple_average, EmConfig,
};
use crate::topology::Topology;

pub type StringIndexers = (BTreeMap<String, usize>, BTreeMap<String, (usize, usize)>);
pub type StringSplitCounters = (BTreeMap<String, usize>, BTreeMap<String, BTreeMap<String, usize>>);

fn maps_missing() -> SbnError {
    SbnError::precondition("SBN maps are not built; call process_loaded_trees first")
}

#[derive(Debug)]
pub struct SbnInstance {
    name: String,
    collection: TreeCollection,
    maps: Option<SbnMaps>,
    psp_indexer: Option<PspIndexer>,
    sbn_parameters: Vec<f64>,
    rng: StdRng,
}

impl SbnInstance {
    /// An empty instance whose generator is seeded from OS entropy.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rng(name, StdRng::from_entropy())
    }

    /// An empty instance with a reproducible generator.
    pub fn with_seed(name: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(name, StdRng::seed_from_u64(seed))
    }

    fn with_rng(name: impl Into<String>, rng: StdRng) -> Self {
        SbnInstance {
            name: name.into(),
            collection: TreeCollection::default(),
            maps: None,
            psp_indexer: None,
            sbn_parameters: Vec::new(),
            rng,
        }
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree_collection(&self) -> &TreeCollection {
        &self.collection
    }

    pub fn taxon_names(&self) -> &[String] {
        self.collection.taxon_names()
    }

    /// Replaces the loaded trees. Existing maps and parameters are kept until the next
    /// `process_loaded_trees`.
    pub fn load_collection(&mut self, collection: TreeCollection) {
        self.collection = collection;
    }

    pub fn read_newick_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.collection = io::read_newick_file(path)?;
        Ok(())
    }

    pub fn read_nexus_file<P: AsRef<Path>>(&mut self, path: P, burnin_trees: usize) -> Result<()> {
        self.collection = io::read_nexus_file(path, burnin_trees)?;
        Ok(())
    }

    /// Counts the subsplits of the loaded trees, builds the indexers and resets the
    /// parameters to uniform.
    pub fn process_loaded_trees(&mut self) -> Result<()> {
        if self.collection.is_empty() {
            return Err(SbnError::precondition("no trees loaded"));
        }
        let counter = self.collection.topology_counter();
        let maps = SbnMaps::build(&counter)?;
        let psp_indexer = PspIndexer::new(maps.rootsplits(), maps.indexer())?;

        let mut parameters = vec![0.0; maps.gpcss_count()];
        probability_normalize_params_in_log(&mut parameters, &maps.parameter_blocks());
        info!(
            instance = %self.name,
            topologies = counter.len(),
            rootsplits = maps.rootsplit_count(),
            parameters = maps.gpcss_count(),
            "built SBN maps"
        );
        self.sbn_parameters = parameters;
        self.psp_indexer = Some(psp_indexer);
        self.maps = Some(maps);
        Ok(())
    }

    pub fn check_sbn_maps_available(&self) -> Result<&SbnMaps> {
        self.maps.as_ref().ok_or_else(maps_missing)
    }

    fn check_psp_indexer_available(&self) -> Result<&PspIndexer> {
        self.psp_indexer.as_ref().ok_or_else(|| {
            SbnError::precondition("PSP indexer is not built; call process_loaded_trees first")
        })
    }

    /// Log-space SBN parameters.
    pub fn sbn_parameters(&self) -> &[f64] {
        &self.sbn_parameters
    }

    pub fn set_sbn_parameters(&mut self, parameters: Vec<f64>) -> Result<()> {
        let maps = self.check_sbn_maps_available()?;
        if parameters.len() != maps.gpcss_count() {
            return Err(SbnError::precondition(format!(
                "{} parameters given, the SBN has {}",
                parameters.len(),
                maps.gpcss_count()
            )));
        }
        self.sbn_parameters = parameters;
        Ok(())
    }

    /// Indexer representation of every loaded tree, in collection order. Unknown
    /// subsplits get the index one past the last parameter.
    pub fn make_indexer_representations(&self) -> Result<Vec<IndexerRepresentation>> {
        let maps = self.check_sbn_maps_available()?;
        let default_index = maps.gpcss_count();
        self.collection
            .trees()
            .par_iter()
            .map(|tree| maps.indexer_representation_of(tree.topology(), default_index))
            .collect()
    }

    pub fn make_psp_indexer_representations(&self) -> Result<Vec<PspRepresentation>> {
        let psp_indexer = self.check_psp_indexer_available()?;
        self.collection
            .trees()
            .par_iter()
            .map(|tree| psp_indexer.representation_of(tree.topology()))
            .collect()
    }

    pub fn split_lengths(&self) -> Result<Vec<Vec<f64>>> {
        self.check_psp_indexer_available()?
            .split_lengths(&self.collection)
    }

    fn training_inputs(&self) -> Result<(&SbnMaps, IndexerRepresentationCounter)> {
        let maps = self.check_sbn_maps_available()?;
        let representations = maps
            .indexer_representation_counter_of(&self.collection.topology_counter(), maps.gpcss_count())?;
        Ok((maps, representations))
    }

    pub fn train_simple_average(&mut self) -> Result<()> {
        let (maps, representations) = self.training_inputs()?;
        let parameters =
            simple_average(maps.gpcss_count(), &maps.parameter_blocks(), &representations)?;
        info!(instance = %self.name, trees = self.collection.tree_count(), "trained simple average");
        self.sbn_parameters = parameters;
        Ok(())
    }

    /// Runs EM and returns the score of every iteration.
    pub fn train_expectation_maximization(&mut self, config: &EmConfig) -> Result<Vec<f64>> {
        let (maps, representations) = self.training_inputs()?;
        let (parameters, scores) = expectation_maximization(
            maps.gpcss_count(),
            &maps.parameter_blocks(),
            &representations,
            config,
        )?;
        info!(
            instance = %self.name,
            iterations = scores.len(),
            final_score = scores.last().copied().unwrap_or(f64::NAN),
            "trained expectation maximization"
        );
        self.sbn_parameters = parameters;
        Ok(scores)
    }

    /// Probability of every loaded tree under the current parameters. The parameters
    /// are treated as unnormalized log-weights; the stored vector is left as is.
    pub fn calculate_sbn_probabilities(&self) -> Result<Vec<f64>> {
        let maps = self.check_sbn_maps_available()?;
        let mut normalized = self.sbn_parameters.clone();
        probability_normalize_params_in_log(&mut normalized, &maps.parameter_blocks());
        let representations = self.make_indexer_representations()?;
        Ok(representations
            .par_iter()
            .map(|representation| log_probability_of(&normalized, representation).exp())
            .collect())
    }

    pub fn sample_topology(&mut self, rooted: bool) -> Result<Topology> {
        let maps = self.maps.as_ref().ok_or_else(maps_missing)?;
        sampler::sample_topology(maps, &self.sbn_parameters, rooted, &mut self.rng)
    }

    /// Replaces the loaded trees with `count` unrooted draws carrying unit branch
    /// lengths.
    pub fn sample_trees(&mut self, count: usize) -> Result<()> {
        self.check_sbn_maps_available()?;
        let taxon_names = self.collection.taxon_names().to_vec();
        let trees = (0..count)
            .map(|_| self.sample_topology(false).map(Tree::unit_branch_length_tree_of))
            .collect::<Result<Vec<_>>>()?;
        self.collection = TreeCollection::new(trees, taxon_names)?;
        info!(instance = %self.name, trees = count, "sampled trees");
        Ok(())
    }

    pub fn get_indexers(&self) -> Result<StringIndexers> {
        Ok(self.check_sbn_maps_available()?.string_indexers())
    }

    pub fn pretty_indexer(&self) -> Result<Vec<String>> {
        self.check_sbn_maps_available()?.pretty_indexer()
    }

    pub fn string_reversed_indexer(&self) -> Result<Vec<String>> {
        self.check_sbn_maps_available()?.string_reversed_indexer()
    }

    pub fn string_indexer_representation_of(&self, topology: &Topology) -> Result<Vec<Vec<String>>> {
        self.check_sbn_maps_available()?
            .string_indexer_representation_of(topology)
    }

    pub fn string_psp_representations(&self) -> Result<Vec<Vec<Vec<String>>>> {
        let psp_indexer = self.check_psp_indexer_available()?;
        self.collection
            .trees()
            .iter()
            .map(|tree| psp_indexer.string_representation_of(tree.topology()))
            .collect()
    }

    /// Rootsplit and PCSS counts as strings.
    pub fn split_counters(&self) -> Result<StringSplitCounters> {
        let maps = self.check_sbn_maps_available()?;
        Ok((maps.string_rootsplit_counter(), maps.string_pcss_counter()?))
    }

    pub fn print_status(&self) {
        info!(
            instance = %self.name,
            trees = self.collection.tree_count(),
            taxa = self.collection.taxon_count(),
            parameters = self.sbn_parameters.len(),
            maps_built = self.maps.is_some(),
            "status"
        );
    }
}
