//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `bitset`: fixed-length bitsets plus subsplit / PCSS views over them.
//! - `topology`: arena-backed tree topologies and their traversals.
//! - `collection`: trees with branch lengths, collections and topology counters.
//! - `sbn_maps`: subsplit counting and parameter indexing.
//! - `psp_indexer`: per-edge indexing for the primary subsplit pair parametrization.
//! - `sbn_probability`: simple average and EM training, tree probabilities.
//! - `sampler`: drawing topologies from a trained SBN.
//! - `instance`: `SbnInstance`, the load / process / train / sample pipeline.
//! - `io`: reading Newick and BEAST/NEXUS files, writing results.
//! - `error`: `SbnError` and the `Result` alias.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod bitset;
pub mod collection;
pub mod error;
pub mod instance;
pub mod io;
pub mod psp_indexer;
pub mod sampler;
pub mod sbn_maps;
pub mod sbn_probability;
pub mod topology;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types
pub use bitset::Bitset;
pub use collection::{Tree, TreeCollection};
pub use error::{Result, SbnError};
pub use instance::SbnInstance;
pub use topology::Topology;
