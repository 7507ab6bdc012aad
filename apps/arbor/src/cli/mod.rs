//! # Arbor CLI Module
//!
//! This module implements the CLI interface for Arbor.
//!
//! ## Available Commands
//!
//! - `stats` - Summarize an NML file
//! - `validate` - Load an NML file and audit the forest invariants
//! - `merge` - Combine several NML files into one
//! - `split` - Move a connected component into a tree of its own
//! - `path` - Shortest path between two nodes
//! - `nearest` - Node closest to a position
//! - `init-config` - Write a default configuration file

mod commands;

use arbor_core::ArborError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Arbor - skeleton annotation tool
///
/// Inspects and edits forests of neuron skeletons stored as NML documents.
#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Forest settings (TOML); defaults are used when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarize an NML file
    Stats {
        /// NML file to read
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Load an NML file and audit the forest invariants
    Validate {
        /// NML file to read
        #[arg(short, long)]
        file: PathBuf,

        /// Also fail on unknown content and skipped references
        #[arg(short, long)]
        strict: bool,
    },

    /// Combine several NML files into one, renumbering later files
    Merge {
        /// Input files, merged in order
        #[arg(short, long = "input", required = true)]
        inputs: Vec<PathBuf>,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Move the connected component of a node into a tree of its own
    Split {
        /// NML file to read
        #[arg(short, long)]
        file: PathBuf,

        /// Any node of the component
        #[arg(short, long)]
        node: u64,

        /// Output file path (defaults to rewriting the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Shortest path between two nodes, ignoring edge direction
    Path {
        /// NML file to read
        #[arg(short, long)]
        file: PathBuf,

        /// Start node ID
        #[arg(long)]
        from: u64,

        /// End node ID
        #[arg(long)]
        to: u64,
    },

    /// Node closest to a position
    Nearest {
        /// NML file to read
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short)]
        x: i32,

        #[arg(short)]
        y: i32,

        #[arg(short)]
        z: i32,

        /// Search this tree first
        #[arg(short, long)]
        tree: Option<u64>,
    },

    /// Write a configuration file with every setting at its default
    InitConfig {
        /// Output file path
        #[arg(short, long, default_value = "arbor.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), ArborError> {
    let json_mode = cli.json_mode;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Stats { file } => cmd_stats(&file, &config, json_mode),
        Commands::Validate { file, strict } => cmd_validate(&file, &config, json_mode, strict),
        Commands::Merge { inputs, output } => cmd_merge(&inputs, &output, &config, json_mode),
        Commands::Split { file, node, output } => {
            let output = output.unwrap_or_else(|| file.clone());
            cmd_split(&file, node, &output, &config, json_mode).map(|_| ())
        }
        Commands::Path { file, from, to } => {
            cmd_path(&file, from, to, &config, json_mode).map(|_| ())
        }
        Commands::Nearest {
            file,
            x,
            y,
            z,
            tree,
        } => cmd_nearest(&file, [x, y, z], tree, &config, json_mode).map(|_| ()),
        Commands::InitConfig { output, force } => cmd_init_config(&output, force),
    }
}
