use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stash",
    about = "Stash: a transient, typed, key-indexed object store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store configuration (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Process simulated events across parallel slots
    Run(RunArgs),
    /// Process one event and print the store contents before clearing
    Dump(DumpArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct RunArgs {
    /// Number of events to process
    #[arg(short, long, default_value_t = 8)]
    pub events: u64,

    /// Parallel slots (defaults to the configured num_slots)
    #[arg(short, long)]
    pub slots: Option<usize>,

    /// Seed for the simulated detector readout
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Raw hits per event
    #[arg(long, default_value_t = 64)]
    pub hits: usize,

    /// Destroy every proxy at the end of each event instead of resetting
    #[arg(long)]
    pub force_clear: bool,
}

#[derive(Args)]
pub struct DumpArgs {
    /// Event number to process
    #[arg(short, long, default_value_t = 0)]
    pub event: u64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 16)]
    pub hits: usize,
}
