use std::path::PathBuf;
use std::time::{Duration, Instant};

use graph_compute::prelude::*;
use log::{info, LevelFilter};

mod label_propagation;
mod loading;
mod wcc;

fn main() -> Result<(), AppError> {
    let args = <Args as clap::Parser>::parse();

    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .parse_default_env()
        .init();

    match args.algorithm {
        Algorithm::Wcc { config } => wcc::wcc(args.args, config),
        Algorithm::LabelPropagation { config } => {
            label_propagation::label_propagation(args.args, config)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum AppError {
    #[error("error while loading the graph")]
    Load {
        #[from]
        source: graph_builder::Error,
    },
    #[error(transparent)]
    Compute(#[from] graph_compute::Error),
    #[error("error while creating the thread pool")]
    ThreadPool {
        #[from]
        source: rayon::ThreadPoolBuildError,
    },
}

#[derive(Debug, clap::Parser)]
#[command(author, version, about, propagate_version = true)]
struct Args {
    #[command(flatten)]
    args: CommonArgs,

    #[command(subcommand)]
    algorithm: Algorithm,

    /// Increases the log level, can be repeated.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Debug, clap::Args)]
pub(crate) struct CommonArgs {
    #[arg(short, long)]
    pub(crate) path: PathBuf,

    #[arg(short, long, value_enum, default_value_t = FileFormat::EdgeList)]
    pub(crate) format: FileFormat,

    #[arg(long)]
    pub(crate) use_32_bit: bool,

    /// Sorts the adjacency lists and removes parallel relationships.
    #[arg(long)]
    pub(crate) deduplicate: bool,

    /// Size of the thread pool, defaults to the number of cpus.
    #[arg(long)]
    pub(crate) threads: Option<usize>,

    #[arg(short, long, default_value_t = 1)]
    pub(crate) runs: usize,

    #[arg(short, long, default_value_t = 1)]
    pub(crate) warmup_runs: usize,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
pub(crate) enum FileFormat {
    EdgeList,
    Graph500,
}

#[derive(clap::Subcommand, Debug)]
enum Algorithm {
    Wcc {
        #[command(flatten)]
        config: WccConfig,
    },
    LabelPropagation {
        #[command(flatten)]
        config: LabelPropagationConfig,
    },
}

impl CommonArgs {
    pub(crate) fn thread_pool(&self) -> Result<rayon::ThreadPool, AppError> {
        let threads = self.threads.unwrap_or_else(num_cpus::get);
        info!("Creating thread pool with {threads} threads");
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?)
    }
}

/// Runs `f` for the configured warm-up and measured runs and logs the
/// average runtime of the measured runs.
pub(crate) fn time<T, F>(runs: usize, warmup_runs: usize, mut f: F) -> Option<T>
where
    F: FnMut() -> T,
{
    let mut durations = vec![];
    let mut last = None;

    for run in 1..=(warmup_runs + runs) {
        let start = Instant::now();
        let result = f();
        let took = start.elapsed();

        info!(
            "{}Run {} of {} finished in {:.6?}",
            if run <= warmup_runs { "Warm-up " } else { "" },
            run,
            warmup_runs + runs,
            took,
        );

        if run > warmup_runs {
            durations.push(took);
        }
        last = Some(result);
    }

    if !durations.is_empty() {
        let total = durations.iter().sum::<Duration>();
        info!("Average runtime: {:?}", total / durations.len() as u32);
    }

    last
}
