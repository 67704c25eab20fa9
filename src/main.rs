use clap::{Parser, ValueEnum};
use rust_python_sbn::io::{write_newick_trees, write_parameters_tsv};
use rust_python_sbn::sbn_probability::EmConfig;
use rust_python_sbn::{SbnError, SbnInstance};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Train a subsplit Bayesian network on a posterior sample of trees, then optionally
/// write its parameters and draw new trees from it.
#[derive(Parser, Debug)]
#[command(name = "sbn", version, about = "Subsplit Bayesian network training and sampling")]
struct Args {
    /// Path to a tree file (one Newick per line, or a BEAST/NEXUS trees file)
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Input format: newick | nexus
    #[arg(short = 'f', long = "format", value_enum, default_value_t = FormatArg::Nexus)]
    format: FormatArg,

    /// Burn-in by number of trees (drop first N trees, NEXUS only)
    #[arg(short = 't', long = "burnin-trees", default_value_t = 0)]
    burnin_trees: usize,

    /// Training procedure: sa (simple average) | em (expectation maximization)
    #[arg(long = "training", value_enum, default_value_t = TrainingArg::Sa)]
    training: TrainingArg,

    /// EM pseudocount added to every parameter
    #[arg(long = "alpha", default_value_t = 0.0)]
    alpha: f64,

    /// Maximum number of EM iterations
    #[arg(long = "max-iter", default_value_t = 100)]
    max_iter: usize,

    /// Stop EM once the score improves by less than this
    #[arg(long = "score-epsilon", default_value_t = 1e-6)]
    score_epsilon: f64,

    /// Number of unrooted trees to sample from the trained SBN
    #[arg(short = 'n', long = "sample")]
    sample: Option<usize>,

    /// Seed for sampling; entropy when omitted
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Output path for the parameter TSV (".gz" compresses)
    #[arg(short = 'o', long = "parameters-out")]
    parameters_out: Option<PathBuf>,

    /// Output path for the trees, one Newick per line (".gz" compresses)
    #[arg(long = "trees-out")]
    trees_out: Option<PathBuf>,

    /// Quiet mode: only warnings and errors on stderr
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatArg { Newick, Nexus }

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TrainingArg { Sa, Em }

fn main() {
    let args = Args::parse();
    init_logging(args.quiet);

    if let Err(e) = run(&args) {
        eprintln!("Error: {e}");
        std::process::exit(exit_code(&e));
    }
}

fn init_logging(quiet: bool) {
    let level = if quiet { LevelFilter::WARN } else { LevelFilter::INFO };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(level)
        .init();
}

fn exit_code(e: &SbnError) -> i32 {
    match e {
        SbnError::Io(_) | SbnError::Parse { .. } => 2,
        SbnError::Structural { .. } => 3,
        SbnError::Precondition { .. } => 4,
    }
}

fn run(args: &Args) -> Result<(), SbnError> {
    let mut inst = match args.seed {
        Some(seed) => SbnInstance::with_seed("cli", seed),
        None => SbnInstance::new("cli"),
    };

    let t0 = Instant::now();
    match args.format {
        FormatArg::Newick => inst.read_newick_file(&args.input)?,
        FormatArg::Nexus => inst.read_nexus_file(&args.input, args.burnin_trees)?,
    }
    let collection = inst.tree_collection();
    info!(
        "Read {} trees on {} taxa in {:.3}s",
        collection.tree_count(),
        collection.taxon_count(),
        t0.elapsed().as_secs_f64()
    );

    let t1 = Instant::now();
    inst.process_loaded_trees()?;
    info!("Building SBN maps {:.3}s", t1.elapsed().as_secs_f64());

    let t2 = Instant::now();
    match args.training {
        TrainingArg::Sa => inst.train_simple_average()?,
        TrainingArg::Em => {
            let config = EmConfig {
                alpha: args.alpha,
                max_iter: args.max_iter,
                score_epsilon: args.score_epsilon,
            };
            let scores = inst.train_expectation_maximization(&config)?;
            if let Some(last) = scores.last() {
                info!("EM finished after {} iterations, score {last:.6}", scores.len());
            }
        }
    }
    info!("Training {:?} {:.3}s", args.training, t2.elapsed().as_secs_f64());

    if let Some(path) = &args.parameters_out {
        let t3 = Instant::now();
        write_parameters_tsv(path, &inst.pretty_indexer()?, inst.sbn_parameters())?;
        info!("Writing parameters to {} {:.3}s", path.display(), t3.elapsed().as_secs_f64());
    }

    if let Some(count) = args.sample {
        let t4 = Instant::now();
        inst.sample_trees(count)?;
        info!("Sampling {count} trees {:.3}s", t4.elapsed().as_secs_f64());
    }

    if let Some(path) = &args.trees_out {
        let t5 = Instant::now();
        write_newick_trees(path, inst.tree_collection())?;
        info!("Writing trees to {} {:.3}s", path.display(), t5.elapsed().as_secs_f64());
    }

    inst.print_status();
    Ok(())
}
