//! Dev server command.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::cli::{load_project, EXIT_ERROR, EXIT_SUCCESS};
use crate::scheduler::BuildService;
use crate::server;
use crate::watch::{start_watcher, timestamp};

/// Execute `barge serve`.
pub(crate) fn run_serve(config_path: Option<&Path>, port_override: Option<u16>) -> ExitCode {
    let (config, project_root, graph) = match load_project(config_path) {
        Ok(loaded) => loaded,
        Err(exit) => return exit,
    };
    let port = port_override.unwrap_or(config.project.port);

    let service = Arc::new(BuildService::start(graph));

    // Print each rebuild's outcome as the watcher triggers it.
    let results = service.subscribe_results();
    std::thread::spawn(move || {
        while let Ok(result) = results.recv() {
            println!("[{}] {}", timestamp(), result.summary());
            for message in result.sorted_messages() {
                eprintln!("Error: {}", message);
            }
        }
    });

    println!("[{}] Building...", timestamp());
    match service.build_all() {
        Some(result) => {
            println!("[{}] {}", timestamp(), result.summary());
            // Errors are served as 500s; keep going so fixes rebuild.
            for message in result.sorted_messages() {
                eprintln!("Error: {}", message);
            }
        }
        None => {
            eprintln!("Error: build service stopped during initial build");
            return ExitCode::from(EXIT_ERROR);
        }
    }

    let watcher = match start_watcher(&project_root, &config, Arc::clone(&service)) {
        Ok(watcher) => watcher,
        Err(e) => {
            eprintln!("Error: {}", e);
            service.shutdown();
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            service.shutdown();
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let exit = runtime.block_on(run_server(&config, port, Arc::clone(&service)));
    // The fatal-error listener blocks in spawn_blocking until the
    // service drops; detach it instead of waiting.
    runtime.shutdown_background();

    watcher.stop();
    service.shutdown();
    ExitCode::from(exit)
}

async fn run_server(config: &crate::config::Config, port: u16, service: Arc<BuildService>) -> u8 {
    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: failed to bind port {}: {}", port, e);
            return EXIT_ERROR;
        }
    };
    println!(
        "[{}] Serving {}/ on http://127.0.0.1:{}/",
        timestamp(),
        config.project.serve_dir,
        port
    );
    println!("[{}] Watching for changes, Ctrl+C to stop", timestamp());

    let fatal_rx = service.subscribe_fatal();
    let fatal = tokio::task::spawn_blocking(move || fatal_rx.recv());
    let router = server::router(service, config);

    tokio::select! {
        result = server::serve(listener, router) => {
            match result {
                Ok(()) => EXIT_SUCCESS,
                Err(e) => {
                    eprintln!("Error: server failed: {}", e);
                    EXIT_ERROR
                }
            }
        }
        fatal = fatal => {
            match fatal {
                Ok(Ok(error)) => eprintln!("Error: {}", error),
                _ => eprintln!("Error: build service stopped unexpectedly"),
            }
            EXIT_ERROR
        }
        _ = tokio::signal::ctrl_c() => {
            println!("[{}] Shutting down", timestamp());
            EXIT_SUCCESS
        }
    }
}
