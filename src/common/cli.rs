//! CLI argument parsing for coda-rs binaries
//!
//! # Design Principles (KISS)
//! - Use clap's derive macro for declarative argument definition
//! - Common arguments shared via composition, not inheritance
//! - Each binary has its own Args struct that embeds CommonArgs

use clap::Parser;
use std::path::PathBuf;

/// Common arguments shared across all binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file (decoder settings + crate map)
    #[arg(short = 'f', long = "config", default_value = "config.toml")]
    pub config_file: String,
}

/// Arguments for the decode tool
#[derive(Parser, Debug, Clone)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// CODA event file to decode
    #[arg(short, long, conflicts_with = "emulate")]
    pub input: Option<PathBuf>,

    /// Decode N emulated physics buffers instead of reading a file
    #[arg(short, long)]
    pub emulate: Option<u64>,

    /// Seed for the emulator (overrides `[emulator] seed`)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Events per block for emulated pipelining crates
    #[arg(long)]
    pub block_size: Option<u32>,

    /// Stop after N buffers
    #[arg(short = 'n', long)]
    pub max_buffers: Option<u64>,

    /// Print the final counters as JSON
    #[arg(long)]
    pub json: bool,
}
