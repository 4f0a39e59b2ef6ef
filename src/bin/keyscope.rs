//! keyscope Binary
//!
//! Runs one comparison of two dumps end to end and prints query reports.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use keyscope::{Config, Engine, ExtractorCommand, Query, RunId};
use tracing_subscriber::{fmt, EnvFilter};

/// keyscope CLI
#[derive(Parser, Debug)]
#[command(name = "keyscope")]
#[command(about = "Compare the key-spaces of two key-value database dumps")]
#[command(version)]
struct Args {
    /// Work directory for downloaded dumps and key files
    #[arg(short, long, default_value = "./keyscope_data")]
    work_dir: PathBuf,

    /// Key segment delimiter
    #[arg(short, long, default_value = ":")]
    delimiter: char,

    /// Key-extraction program (default: python3 fast-parse.py)
    #[arg(long)]
    extractor: Option<String>,

    /// Argument for `--extractor`; `{dump}` and `{keys}` are replaced
    #[arg(long = "extractor-arg", allow_hyphen_values = true, requires = "extractor")]
    extractor_args: Vec<String>,

    /// Fetch stage timeout in seconds
    #[arg(long, default_value = "600")]
    fetch_timeout_secs: u64,

    /// Extraction timeout in seconds (all processes together)
    #[arg(long, default_value = "1800")]
    extract_timeout_secs: u64,

    /// Index construction timeout in seconds
    #[arg(long, default_value = "300")]
    index_timeout_secs: u64,

    /// Merge single-child chains after building the indices
    #[arg(long)]
    compact: bool,

    /// Keep the run's files after printing the reports
    #[arg(long)]
    keep: bool,

    /// First dump: path, file:// or http(s):// URL
    source_a: String,

    /// Second dump: path, file:// or http(s):// URL
    source_b: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Count keys under one or more prefixes
    Count {
        /// Prefixes to count
        #[arg(required = true)]
        prefixes: Vec<String>,
    },

    /// List the heaviest child prefixes of a prefix
    Top {
        /// Prefix to break down (empty for the root)
        prefix: String,

        /// Number of children to list
        #[arg(short, long, default_value = "10")]
        n: usize,
    },
}

impl Commands {
    fn queries(&self) -> Vec<Query> {
        match self {
            Commands::Count { prefixes } => prefixes.iter().map(Query::count).collect(),
            Commands::Top { prefix, n } => vec![Query::top_k(prefix, *n)],
        }
    }
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,keyscope=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("keyscope v{}", keyscope::VERSION);
    tracing::info!("Work directory: {}", args.work_dir.display());

    // Build config from args
    let mut builder = Config::builder()
        .work_dir(&args.work_dir)
        .delimiter(args.delimiter)
        .fetch_timeout(Duration::from_secs(args.fetch_timeout_secs))
        .extract_timeout(Duration::from_secs(args.extract_timeout_secs))
        .index_timeout(Duration::from_secs(args.index_timeout_secs))
        .compact_indices(args.compact);
    if let Some(program) = &args.extractor {
        builder = builder.extractor(ExtractorCommand::new(program, &args.extractor_args));
    }

    // Open engine
    let engine = match Engine::open(builder.build()) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let id = engine.create_run(&args.source_a, &args.source_b);
    let outcome = run_queries(&engine, &id, &args.command);

    if let Ok(status) = engine.status(&id) {
        println!("{}\n", status);
    }

    if args.keep {
        tracing::info!("Keeping run {} under {}", id, engine.runs_root().display());
    } else if let Err(e) = engine.remove_run(&id) {
        tracing::warn!("Failed to remove run {}: {}", id, e);
    }

    match outcome {
        Ok(reports) => {
            for report in reports {
                println!("{}\n", report);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Run {} failed ({:?}): {}", id, e.kind(), e);
            ExitCode::FAILURE
        }
    }
}

/// Drive every stage, then answer each query
fn run_queries(engine: &Engine, id: &RunId, command: &Commands) -> keyscope::Result<Vec<String>> {
    engine.process(id)?;
    command
        .queries()
        .into_iter()
        .map(|query| engine.execute(id, query).map(|report| report.to_string()))
        .collect()
}
