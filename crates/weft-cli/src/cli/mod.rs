//! CLI command definitions for the `weft` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod builtins;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Validate, plan, and run declarative workflows.
#[derive(Parser)]
#[command(name = "weft", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine configuration file (TOML).
    #[arg(long, global = true, env = "WEFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate a workflow definition.
    Validate {
        /// Path to a YAML or JSON workflow file.
        file: PathBuf,
    },

    /// Show the dependency waves a workflow would run in.
    Plan {
        /// Path to a YAML or JSON workflow file.
        file: PathBuf,
    },

    /// Run a workflow locally and print the result of every task.
    Run {
        /// Path to a YAML or JSON workflow file.
        file: PathBuf,

        /// Set a workflow variable (KEY=VALUE; VALUE is parsed as JSON when possible).
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Use this execution ID instead of a generated one.
        #[arg(long)]
        execution_id: Option<String>,
    },
}

/// Output mode shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}
