//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to
//! submodules for the build and serve commands.

mod build;
mod serve;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::config::{load_config, Config};
use crate::discovery::discover_all_sources;
use crate::graph::PackageGraph;
use crate::transform::TransformerRegistry;

pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;
pub(crate) const EXIT_BUILD_FAILED: u8 = 65;

/// Barge - incremental asset build pipeline and dev server
#[derive(Parser)]
#[command(name = "barge")]
#[command(about = "Barge - incremental asset build pipeline and dev server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build every package once and write the serve tree to disk
    Build {
        /// Path to barge.toml (defaults to ./barge.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory, overriding the configured one
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Build, then serve assets over HTTP and rebuild on file changes
    Serve {
        /// Path to barge.toml (defaults to ./barge.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on, overriding the configured one
        #[arg(short, long)]
        port: Option<u16>,
    },
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { config, out } => build::run_build(config.as_deref(), out.as_deref()),
        Commands::Serve { config, port } => serve::run_serve(config.as_deref(), port),
    }
}

/// Load the config, assemble the graph, and ingest all sources.
///
/// Shared setup for both commands; prints the failure and hands back
/// the exit code on error.
pub(crate) fn load_project(
    config_path: Option<&Path>,
) -> Result<(Config, PathBuf, PackageGraph), ExitCode> {
    let (config, project_root) = match load_config(config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Err(ExitCode::from(EXIT_INVALID_ARGS));
        }
    };

    let registry = TransformerRegistry::with_builtins();
    let mut graph = match PackageGraph::from_config(&config, &registry) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Err(ExitCode::from(EXIT_INVALID_ARGS));
        }
    };

    let changes = match discover_all_sources(&project_root, &config) {
        Ok(changes) => changes,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Err(ExitCode::from(EXIT_ERROR));
        }
    };
    graph.apply_changes(changes);

    Ok((config, project_root, graph))
}
