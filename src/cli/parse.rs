//! CLI parse: clap types for Sluice. No behavior; definitions only.

use crate::config::BackpressureStrategy;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Sluice CLI - priority-based content delivery scheduler
#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Priority-based content delivery with backpressure and retry")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (for config/sluice.toml)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long, default_value = "false")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (when output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a synthetic workload through the engine and report metrics
    Simulate(SimulateArgs),
    /// Configuration commands (show, validate)
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of boundaries, spread across all priorities
    #[arg(long, default_value = "8")]
    pub boundaries: usize,

    /// Chunks produced per boundary
    #[arg(long, default_value = "16")]
    pub chunks: u64,

    /// Payload size of each chunk in bytes
    #[arg(long, default_value = "1024")]
    pub chunk_size: usize,

    /// Delay between chunks of one boundary, in milliseconds
    #[arg(long, default_value = "2")]
    pub interval_ms: u64,

    /// How often buffered chunks are delivered, in milliseconds
    #[arg(long, default_value = "5")]
    pub deliver_every_ms: u64,

    /// Fail the first attempt of every Nth chunk with a network error
    #[arg(long)]
    pub fail_every: Option<u64>,

    /// Number of boundaries sending chunks with bad checksums
    #[arg(long, default_value = "0")]
    pub corrupt: usize,

    /// Skip chunk checksums
    #[arg(long)]
    pub no_checksums: bool,

    /// Override the concurrency ceiling
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Override the backpressure strategy (pause, drop, error, expand)
    #[arg(long)]
    pub strategy: Option<BackpressureStrategy>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Validate configuration (the --config file, or the layered workspace config)
    Validate {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
