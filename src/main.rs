//! Barge - command-line entry point for the asset build pipeline

use std::process::ExitCode;

use barge::cli;

fn main() -> ExitCode {
    cli::run()
}
