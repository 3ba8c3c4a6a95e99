use anyhow::Context;
use clap::{ArgAction, Parser};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs::File;
use std::io::BufWriter;

pub mod bubbles;
pub mod filter;
pub mod graph;
pub mod io;
pub mod output;
pub mod traverse;

use bubbles::{BranchingPolicy, BubbleFinder, FinderConfig};
use graph::{Graph, Node};
use output::{FastaSink, SequenceSink, SharedOutput, Stats};
pub use traverse::TraversalKind;

/// Detect isolated SNP bubbles in the de Bruijn graph of a genome assembly.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_version_flag = true)]
pub struct Args {
    /// Input FASTA with the assembled sequences or reads (plain or .gz)
    #[arg(short, long)]
    pub input: std::path::PathBuf,

    /// K-mer length [k=31]
    #[arg(short, long)]
    pub k: Option<usize>,

    /// Authorised branching: 0 = none, 1 = symmetric forbidden, 2 = all [b=0]
    #[arg(short = 'b', long, default_value_t = 0, hide_default_value = true)]
    pub branching: u8,

    /// Extend bubbles along the graph
    #[arg(short = 'e', long = "extend", value_enum, default_value_t = TraversalKind::None)]
    pub extend: TraversalKind,

    /// Low-complexity score threshold [T=100]
    #[arg(short = 'T', long, default_value_t = 100, hide_default_value = true)]
    pub threshold: u64,

    /// Also report low-complexity bubbles
    #[arg(short = 'l', long, action = ArgAction::SetTrue)]
    pub low: bool,

    /// Output FASTA [o=bubbles.fa]
    #[arg(short, long, default_value = "bubbles.fa")]
    pub output: std::path::PathBuf,

    /// Number of threads [t=1]
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Display version information.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: (),
}

/// Run the search over every strand pair of the graph, one finder per
/// worker, collecting into `sink`. Returns the bubble total and the
/// emission statistics.
pub fn search_bubbles(
    graph: &Graph,
    cfg: FinderConfig,
    sink: Box<dyn SequenceSink>,
    num_threads: usize,
) -> anyhow::Result<(u64, Stats)> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads.max(1))
        .build()
        .expect("Failed to build Rayon thread pool in search_bubbles");

    let shared = SharedOutput::new(sink);

    pool.install(|| {
        graph
            .kmers()
            .par_iter()
            .filter(|&&kmer| graph.is_strand_representative(kmer))
            .try_for_each_init(
                || BubbleFinder::new(graph, cfg, &shared),
                |finder, &kmer| finder.process(Node::new(kmer)),
            )
    })?;

    shared.finish()
}

pub fn run_with_args(args: Args) -> anyhow::Result<()> {
    let default_k = 31usize;
    let max_k = 32usize;

    let k = args.k.unwrap_or(default_k);
    anyhow::ensure!(
        (3..=max_k).contains(&k),
        "k={} is invalid: allowed range is 3..={} (default {})",
        k,
        max_k,
        default_k
    );

    let branching = BranchingPolicy::from_level(args.branching)
        .ok_or_else(|| anyhow::anyhow!("branching ({}) must be 0, 1 or 2.", args.branching))?;

    let num_threads: usize = args.threads.unwrap_or(1);
    anyhow::ensure!(num_threads >= 1, "threads must be ≥ 1");

    eprintln!("bulle v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "parameters: k={} branching={} extend={:?} threshold={} low={} threads={} input={} output={}",
        k,
        args.branching,
        args.extend,
        args.threshold,
        args.low,
        num_threads,
        args.input.display(),
        args.output.display()
    );

    let g = io::build_graph_from_fasta(&args.input, k)?;
    eprintln!("graph: k={} nodes={}", k, g.len());

    let cfg = FinderConfig {
        branching,
        traversal: args.extend,
        threshold: args.threshold,
        keep_low_complexity: args.low,
    };

    let out_file =
        File::create(&args.output).with_context(|| format!("create {:?}", args.output))?;
    let sink = FastaSink::new(BufWriter::new(out_file));

    let (total, stats) = search_bubbles(&g, cfg, Box::new(sink), num_threads)?;

    eprintln!(
        "bubbles found: {} (high complexity: {}, low complexity: {})",
        total, stats.nb_high, stats.nb_low
    );
    eprintln!(
        "closures: none={} left={} right={} both={}",
        stats.by_closure[0], stats.by_closure[1], stats.by_closure[2], stats.by_closure[3]
    );
    eprintln!("output file: {}", args.output.display());

    Ok(())
}
