//! Command-line arguments

use crate::demos::Demo;
use clap::Parser;
use scheduler::Pacing;
use std::path::PathBuf;

/// Run demo programs on the cooperative bytecode VM
#[derive(Debug, Parser)]
#[command(name = "cldc-vm", version, about)]
pub struct Cli {
    /// Demo program to run
    #[arg(short, long, value_enum, default_value = "counter")]
    pub demo: Demo,

    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Pacing between bunches: unlimited, busy_wait or sleep
    #[arg(short, long)]
    pub pacing: Option<Pacing>,

    /// Scheduler turns per bunch
    #[arg(long, value_name = "TURNS")]
    pub bunch_size: Option<usize>,

    /// Wall-clock budget per bunch in milliseconds
    #[arg(long, value_name = "MS")]
    pub budget_ms: Option<u64>,

    /// Worker threads started by the demo
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG wins
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// List the demos and exit
    #[arg(long)]
    pub list: bool,
}
