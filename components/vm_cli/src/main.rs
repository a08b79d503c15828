//! Cooperative bytecode VM CLI
//!
//! Entry point for the demo runner. Parses CLI arguments and delegates to
//! the Runtime for execution.

use clap::Parser;
use std::process::ExitCode;
use vm_cli::{logging, Cli, Demo};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if cli.list {
        for demo in Demo::ALL {
            println!("{:<18} {}", demo.name(), demo.describe());
        }
        return ExitCode::SUCCESS;
    }

    match vm_cli::run(&cli) {
        Ok(report) => {
            println!("{}", report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
