//! xtq: run cross-tracker expert queries against a local store.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "xtq")]
#[command(about = "Cross-tracker expert queries - validate and run reports over tracker artifacts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an empty store
    Init,

    /// Load users, trackers and artifacts from a JSON dataset
    Load {
        /// Dataset file
        dataset: String,
    },

    /// Validate a report's expert query without running it
    Check {
        /// Report file (TOML: tracker_ids, expert_query)
        #[arg(short = 'r', long = "report")]
        report: String,

        /// Login of the user running the report (omit for anonymous)
        #[arg(short = 'u', long = "user")]
        user: Option<String>,
    },

    /// Run a report and print the matching artifacts
    #[command(visible_alias = "q")]
    Query {
        /// Report file (TOML: tracker_ids, expert_query)
        #[arg(short = 'r', long = "report")]
        report: String,

        /// Login of the user running the report (omit for anonymous)
        #[arg(short = 'u', long = "user")]
        user: Option<String>,

        /// Page size (default from config)
        #[arg(short = 'n', long = "limit")]
        limit: Option<usize>,

        /// Rows to skip
        #[arg(short = 'o', long = "offset", default_value = "0")]
        offset: usize,

        /// Print the page as JSON
        #[arg(long = "json")]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("XTQ_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => commands::init(),
        Commands::Load { dataset } => commands::load(&dataset),
        Commands::Check { report, user } => commands::check(&report, user.as_deref()),
        Commands::Query { report, user, limit, offset, json } => {
            commands::query(&report, user.as_deref(), limit, offset, json)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
