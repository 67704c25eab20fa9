//! Reading tree files into collections and writing SBN results.
//!
//! Parsing itself is done by `phylotree`; this module handles the surrounding file
//! formats (one Newick string per line, or a BEAST/Nexus `TREES` block with an
//! optional `TRANSLATE` table) and converts parsed trees into `Topology` values.
//!
//! Taxa are numbered by sorting their names, so identical taxa always get the same
//! leaf id whatever order a file lists them in.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use itertools::Itertools;
use phylotree::tree::Tree as PhyloTree;
use tracing::{info, warn};

use crate::collection::{Tree, TreeCollection};
use crate::error::{Result, SbnError};
use crate::topology::{NodeId, TopologyBuilder};

/// Strip BEAST annotations from Newick strings.
///
/// BEAST writes annotations like `:[&rate=0.123]2.45` where `2.45` is the actual branch
/// length. The `[&...]` parts are dropped, branch lengths are kept.
fn strip_beast_annotations(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut in_annotation = false;
    let mut chars = newick.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '[' && chars.peek() == Some(&'&') {
            in_annotation = true;
        } else if ch == ']' && in_annotation {
            in_annotation = false;
        } else if !in_annotation {
            result.push(ch);
        }
    }

    result
}

fn parse_newick(newick: &str, origin: &str) -> Result<PhyloTree> {
    PhyloTree::from_newick(&strip_beast_annotations(newick))
        .map_err(|e| SbnError::parse(format!("{origin}: {e}")))
}

/// Reads a file holding one Newick tree per non-empty line.
pub fn read_newick_file<P: AsRef<Path>>(path: P) -> Result<TreeCollection> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let trees = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(idx, line)| parse_newick(line, &format!("{} line {}", path.display(), idx + 1)))
        .collect::<Result<Vec<_>>>()?;
    info!(path = %path.display(), trees = trees.len(), "read Newick file");
    collection_of_phylo_trees(&trees)
}

/// Reads the `TREES` block of a BEAST/Nexus file, skipping the first `burnin_trees`.
///
/// Leaf labels are translated through the `TRANSLATE` table when there is one.
pub fn read_nexus_file<P: AsRef<Path>>(path: P, burnin_trees: usize) -> Result<TreeCollection> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let translate = parse_taxon_block(&content);

    let blocks = collect_tree_blocks(&content);
    if blocks.len() <= burnin_trees {
        return Err(SbnError::parse(format!(
            "{}: {} trees found, none left after a burn-in of {burnin_trees}",
            path.display(),
            blocks.len()
        )));
    }
    let trees = blocks
        .into_iter()
        .enumerate()
        .skip(burnin_trees)
        .map(|(idx, block)| -> Result<PhyloTree> {
            let origin = format!(
                "{} tree {idx} (state {})",
                path.display(),
                extract_state(block.header)
            );
            let mut tree = parse_newick(&block.body, &origin)?;
            if !translate.is_empty() {
                rename_leaf_nodes(&mut tree, &translate);
            }
            Ok(tree)
        })
        .collect::<Result<Vec<_>>>()?;
    info!(
        path = %path.display(),
        trees = trees.len(),
        burnin = burnin_trees,
        "read Nexus file"
    );
    collection_of_phylo_trees(&trees)
}

fn extract_state(header: &str) -> usize {
    if let Some(start) = header.to_ascii_uppercase().find("STATE_") {
        let rest = &header[start + "STATE_".len()..];
        let state = rest
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>();
        if let Ok(num) = state.parse::<usize>() {
            return num;
        }
    }
    0
}

struct TreeBlock<'a> {
    header: &'a str,
    body: String,
}

fn collect_tree_blocks(content: &str) -> Vec<TreeBlock<'_>> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TREE "))
        .take_while(|line| !line.trim().to_ascii_uppercase().starts_with("END;"))
        .filter_map(|line| {
            let (header, body) = line.split_once('=')?;
            Some(TreeBlock {
                header: header.trim(),
                body: body.trim().to_string(),
            })
        })
        .collect()
}

fn parse_taxon_block(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TRANSLATE"))
        .skip(1)
        .take_while(|line| !line.trim().starts_with(';'))
        // 1 '1959.M.CD.59.ZR59',
        // 2 '1960.DRC60A',
        .filter_map(|line| {
            let line = line.trim().trim_end_matches([',', ';']);
            let mut parts = line.split_whitespace();
            let id = parts.next()?.to_string();
            let label = parts.next()?.trim_matches('\'').to_string();
            Some((id, label))
        })
        .collect()
}

fn rename_leaf_nodes(tree: &mut PhyloTree, translate: &HashMap<String, String>) {
    for leaf_id in tree.get_leaves() {
        if let Ok(node) = tree.get_mut(&leaf_id) {
            if let Some(label) = node.name.as_ref().and_then(|n| translate.get(n)) {
                node.name = Some(label.clone());
            }
        }
    }
}

fn leaf_names(tree: &PhyloTree) -> Result<Vec<String>> {
    tree.get_leaves()
        .iter()
        .map(|leaf| {
            tree.get(leaf)
                .ok()
                .and_then(|node| node.name.clone())
                .ok_or_else(|| SbnError::parse(format!("leaf node {leaf} has no name")))
        })
        .collect()
}

/// Converts parsed trees into a collection over their shared, name-sorted taxon set.
///
/// # Errors
/// `SbnError::Structural` if the trees disagree on their taxa or a taxon appears twice.
pub fn collection_of_phylo_trees(trees: &[PhyloTree]) -> Result<TreeCollection> {
    let Some(first) = trees.first() else {
        return Ok(TreeCollection::default());
    };
    let mut taxon_names = leaf_names(first)?;
    taxon_names.sort();
    if taxon_names.iter().duplicates().next().is_some() {
        return Err(SbnError::structural("a taxon name appears twice in the first tree"));
    }
    if u32::try_from(taxon_names.len()).is_err() {
        return Err(SbnError::structural("too many taxa"));
    }
    let taxon_ids: HashMap<String, u32> = taxon_names
        .iter()
        .zip(0u32..)
        .map(|(name, id)| (name.clone(), id))
        .collect();
    let expected: HashSet<&String> = taxon_names.iter().collect();

    let converted = trees
        .iter()
        .enumerate()
        .map(|(idx, tree)| {
            let names = leaf_names(tree)?;
            if names.len() != taxon_names.len() || names.iter().any(|n| !expected.contains(n)) {
                return Err(SbnError::structural(format!(
                    "tree {idx} has a different taxon set than tree 0"
                )));
            }
            tree_of_phylo_tree(tree, &taxon_ids)
        })
        .collect::<Result<Vec<_>>>()?;
    TreeCollection::new(converted, taxon_names)
}

/// Builds a `Tree` from a parsed tree; missing branch lengths become 0.
fn tree_of_phylo_tree(tree: &PhyloTree, taxon_ids: &HashMap<String, u32>) -> Result<Tree> {
    let root = tree
        .get_root()
        .map_err(|e| SbnError::parse(format!("tree has no root: {e}")))?;
    let mut builder = TopologyBuilder::new();
    let mut lengths: Vec<f64> = Vec::new();
    let built_root = build_node(tree, root, taxon_ids, &mut builder, &mut lengths)?;
    let (topology, ids) = builder.finish_with_ids(built_root)?;

    let mut branch_lengths = vec![0.0; topology.node_count()];
    for (built, final_id) in ids.into_iter().enumerate() {
        if let Some(final_id) = final_id {
            branch_lengths[final_id] = lengths[built];
        }
    }
    Tree::new(Arc::new(topology), branch_lengths)
}

/// Recursively copies the subtree under `node_id` into `builder`. `lengths` is indexed
/// by builder node.
fn build_node(
    tree: &PhyloTree,
    node_id: usize,
    taxon_ids: &HashMap<String, u32>,
    builder: &mut TopologyBuilder,
    lengths: &mut Vec<f64>,
) -> Result<NodeId> {
    let node = tree
        .get(&node_id)
        .map_err(|e| SbnError::parse(format!("node {node_id}: {e}")))?;
    let built = if node.children.is_empty() {
        let name = node
            .name
            .as_ref()
            .ok_or_else(|| SbnError::parse(format!("leaf node {node_id} has no name")))?;
        let id = taxon_ids
            .get(name)
            .copied()
            .ok_or_else(|| SbnError::structural(format!("unknown taxon {name}")))?;
        builder.leaf(id)
    } else {
        let children = node
            .children
            .iter()
            .map(|&child| build_node(tree, child, taxon_ids, builder, lengths))
            .collect::<Result<Vec<_>>>()?;
        builder.join(children)?
    };
    if lengths.len() <= built {
        lengths.resize(built + 1, 0.0);
    }
    lengths[built] = node.parent_edge.unwrap_or(0.0);
    Ok(built)
}

/// Opens `path` for writing; a `.gz` suffix selects gzip compression.
fn create_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        return Err(SbnError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "writing to stdout is not supported",
        )));
    }
    let file = File::create(path)?;
    Ok(if path.to_string_lossy().ends_with(".gz") {
        Box::new(BufWriter::new(GzEncoder::new(file, Compression::default())))
    } else {
        Box::new(BufWriter::new(file))
    })
}

/// Writes one row per SBN parameter: index, bitset and probability.
pub fn write_parameters_tsv<P: AsRef<Path>>(
    path: P,
    names: &[String],
    log_params: &[f64],
) -> Result<()> {
    if names.len() != log_params.len() {
        return Err(SbnError::precondition(format!(
            "{} names for {} parameters",
            names.len(),
            log_params.len()
        )));
    }
    let mut out = create_output(path.as_ref())?;
    writeln!(out, "index\tbitset\tprobability")?;
    for (idx, (name, log_p)) in names.iter().zip(log_params).enumerate() {
        writeln!(out, "{idx}\t{name}\t{}", log_p.exp())?;
    }
    out.flush()?;
    Ok(())
}

/// Writes every tree of the collection as a Newick line.
pub fn write_newick_trees<P: AsRef<Path>>(path: P, collection: &TreeCollection) -> Result<()> {
    let mut out = create_output(path.as_ref())?;
    let taxon_names = collection.taxon_names();
    let lines = collection
        .trees()
        .iter()
        .map(|tree| tree.newick(Some(taxon_names)))
        .join("\n");
    if lines.is_empty() {
        warn!(path = %path.as_ref().display(), "writing an empty tree file");
    } else {
        writeln!(out, "{lines}")?;
    }
    out.flush()?;
    Ok(())
}
