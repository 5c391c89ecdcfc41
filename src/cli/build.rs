//! One-shot build command.

use std::path::Path;
use std::process::ExitCode;

use crate::cli::{load_project, EXIT_BUILD_FAILED, EXIT_ERROR, EXIT_SUCCESS};
use crate::output::materialize;
use crate::watch::timestamp;

/// Execute `barge build`.
pub(crate) fn run_build(config_path: Option<&Path>, out_override: Option<&Path>) -> ExitCode {
    let (config, project_root, mut graph) = match load_project(config_path) {
        Ok(loaded) => loaded,
        Err(exit) => return exit,
    };

    println!("[{}] Building...", timestamp());
    let result = graph.build_all();
    println!("[{}] {}", timestamp(), result.summary());

    if !result.succeeded() {
        for message in result.sorted_messages() {
            eprintln!("Error: {}", message);
        }
        return ExitCode::from(EXIT_BUILD_FAILED);
    }

    let out_dir = out_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_root.join(&config.project.out_dir));
    match materialize(&graph, &config, &result, &out_dir) {
        Ok(written) => {
            println!("[{}] Wrote {} files to {}", timestamp(), written.len(), out_dir.display());
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
