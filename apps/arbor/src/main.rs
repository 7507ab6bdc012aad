//! # Arbor - Skeleton Annotation Tool
//!
//! The main binary for the Arbor skeleton forest.
//!
//! ## Usage
//!
//! ```bash
//! # Summaries and consistency checks
//! arbor stats -f cell.nml
//! arbor validate -f cell.nml --strict
//!
//! # Editing
//! arbor merge -i a.nml -i b.nml -o merged.nml
//! arbor split -f cell.nml -n 42 -o split.nml
//!
//! # Queries
//! arbor path -f cell.nml --from 1 --to 30
//! arbor nearest -f cell.nml -x 100 -y 200 -z 30
//!
//! # Settings
//! arbor init-config -o arbor.toml
//! arbor --config arbor.toml stats -f cell.nml
//! ```

use arbor::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // ARBOR_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("ARBOR_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let cli = cli::Cli::parse();

    let default_filter = match (cli.verbose, cli.quiet) {
        (true, _) => "arbor=debug,arbor_core=debug",
        (false, true) => "arbor=warn,arbor_core=warn",
        (false, false) => "arbor=info,arbor_core=info",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
