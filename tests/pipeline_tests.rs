//! End-to-end pipeline tests.
//!
//! Drive the full library surface the way the CLI does: a project tree
//! on disk, config loading, source discovery, graph builds, and output
//! materialization.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use barge::asset::{AssetId, SourceChange};
use barge::config::{load_config, ConfigError};
use barge::discovery::{discover_all_sources, discover_package_sources};
use barge::graph::{PackageGraph, Resolved};
use barge::output::materialize;
use barge::transform::TransformerRegistry;

// ============================================================================
// Test Utilities
// ============================================================================

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

const PROJECT_CONFIG: &str = r#"
[project]
name = "myapp"
serve_dir = "web"
out_dir = "build"

[packages.myapp]
root = "."
dependencies = ["widgets"]

[[packages.myapp.phases]]
transformers = [{ kind = "rewrite", from = "txt", to = "out" }]

[[packages.myapp.phases]]
transformers = [{ kind = "concat" }]

[packages.widgets]

[[packages.widgets.phases]]
transformers = [{ kind = "rewrite", from = "txt", to = "out" }]
"#;

/// A project tree with one widgets dependency and a two-phase pipeline.
fn scaffold_project(temp: &TempDir) {
    let root = temp.path();
    write_file(root, "barge.toml", PROJECT_CONFIG);
    write_file(root, "web/index.html", "<html>app</html>");
    write_file(root, "web/notes.txt", "note");
    write_file(root, "web/all.list", "web/notes.out\nwidgets|lib/button.out\n");
    write_file(root, "widgets/lib/button.txt", "button");
}

fn load_graph(temp: &TempDir) -> (barge::config::Config, PackageGraph) {
    let (config, project_root) = load_config(Some(&temp.path().join("barge.toml"))).unwrap();
    let mut graph = PackageGraph::from_config(&config, &TransformerRegistry::with_builtins())
        .unwrap()
        .with_workers(1);
    graph.apply_changes(discover_all_sources(&project_root, &config).unwrap());
    (config, graph)
}

fn content(graph: &mut PackageGraph, package: &str, path: &str) -> String {
    match graph.get(&AssetId::new(package, path)) {
        Resolved::Available(asset) => asset.content_str(),
        Resolved::Error(error) => panic!("{}|{}: {}", package, path, error),
        Resolved::NotFound => panic!("{}|{} not found", package, path),
    }
}

// ============================================================================
// Builds from a project tree
// ============================================================================

#[test]
fn test_full_build_from_disk() {
    let temp = TempDir::new().unwrap();
    scaffold_project(&temp);

    let (_, mut graph) = load_graph(&temp);
    let result = graph.build_all();
    assert!(result.succeeded(), "{:?}", result.errors);

    assert_eq!(content(&mut graph, "myapp", "web/notes.out"), "note.out");
    assert_eq!(content(&mut graph, "widgets", "lib/button.out"), "button.out");
    // The bundle concatenates a local and a cross-package asset.
    assert_eq!(content(&mut graph, "myapp", "web/all.bundle"), "note.outbutton.out");
}

#[test]
fn test_materialized_tree_matches_serve_scope() {
    let temp = TempDir::new().unwrap();
    scaffold_project(&temp);

    let (config, mut graph) = load_graph(&temp);
    let result = graph.build_all();
    let out_dir = temp.path().join("build");
    let written = materialize(&graph, &config, &result, &out_dir).unwrap();
    assert!(!written.is_empty());

    assert_eq!(fs::read_to_string(out_dir.join("index.html")).unwrap(), "<html>app</html>");
    assert_eq!(fs::read_to_string(out_dir.join("notes.out")).unwrap(), "note.out");
    assert_eq!(fs::read_to_string(out_dir.join("all.bundle")).unwrap(), "note.outbutton.out");
    // Dependency packages never land in the output tree.
    assert!(!out_dir.join("button.out").exists());
    assert!(!out_dir.join("lib").exists());
}

#[test]
fn test_rediscovery_after_build_is_a_noop() {
    let temp = TempDir::new().unwrap();
    scaffold_project(&temp);

    let (config, mut graph) = load_graph(&temp);
    graph.build_all();
    let before = graph.transform_invocations();

    // Discovering the same tree again changes no content hashes.
    graph.apply_changes(discover_all_sources(temp.path(), &config).unwrap());
    graph.build_all();
    assert_eq!(graph.transform_invocations(), before);
}

#[test]
fn test_incremental_edit_rebuilds_only_affected_lineages() {
    let temp = TempDir::new().unwrap();
    scaffold_project(&temp);

    let (_, mut graph) = load_graph(&temp);
    graph.build_all();
    let before = graph.transform_invocations();

    // An upstream edit re-runs its rewrite plus the bundle that read
    // it; everything else replays from the memo.
    write_file(temp.path(), "widgets/lib/button.txt", "button-v2");
    graph.apply_changes(vec![SourceChange::Put {
        id: AssetId::new("widgets", "lib/button.txt"),
        content: fs::read(temp.path().join("widgets/lib/button.txt")).unwrap(),
    }]);
    graph.build_all();

    assert_eq!(graph.transform_invocations(), before + 2);
    assert_eq!(content(&mut graph, "myapp", "web/all.bundle"), "note.outbutton-v2.out");
}

// ============================================================================
// Failure and recovery
// ============================================================================

#[test]
fn test_broken_manifest_fails_and_recovers() {
    let temp = TempDir::new().unwrap();
    scaffold_project(&temp);
    write_file(temp.path(), "web/all.list", "web/missing.out\n");

    let (_, mut graph) = load_graph(&temp);
    let result = graph.build_all();
    assert!(!result.succeeded());
    assert_eq!(result.summary(), "Build completed with 1 errors");
    // The message names the missing input.
    assert!(result.sorted_messages()[0].contains("web/missing.out"));

    // Independent lineages still built.
    assert_eq!(content(&mut graph, "myapp", "web/notes.out"), "note.out");

    // Fixing the manifest clears the error.
    graph.apply_changes(vec![SourceChange::Put {
        id: AssetId::new("myapp", "web/all.list"),
        content: b"web/notes.out\n".to_vec(),
    }]);
    let result = graph.build_all();
    assert!(result.succeeded());
    assert_eq!(content(&mut graph, "myapp", "web/all.bundle"), "note.out");
}

#[test]
fn test_failed_build_materializes_nothing() {
    let temp = TempDir::new().unwrap();
    scaffold_project(&temp);
    write_file(temp.path(), "web/all.list", "web/missing.out\n");

    let (config, mut graph) = load_graph(&temp);
    let result = graph.build_all();
    let out_dir = temp.path().join("build");
    let written = materialize(&graph, &config, &result, &out_dir).unwrap();

    assert!(written.is_empty());
    assert!(!out_dir.exists());
}

#[test]
fn test_removing_a_source_removes_its_outputs() {
    let temp = TempDir::new().unwrap();
    scaffold_project(&temp);

    let (_, mut graph) = load_graph(&temp);
    graph.build_all();

    graph.apply_changes(vec![SourceChange::Remove(AssetId::new("myapp", "web/notes.txt"))]);
    graph.build_all();

    assert!(matches!(
        graph.get(&AssetId::new("myapp", "web/notes.out")),
        Resolved::NotFound
    ));
    // The bundle that read it now fails instead of serving stale bytes.
    assert!(matches!(
        graph.get(&AssetId::new("myapp", "web/all.bundle")),
        Resolved::Error(_)
    ));
}

// ============================================================================
// Configuration errors
// ============================================================================

#[test]
fn test_missing_config_file() {
    let temp = TempDir::new().unwrap();
    let err = load_config(Some(&temp.path().join("barge.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[test]
fn test_unknown_transformer_kind() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "barge.toml",
        r#"
        [project]
        name = "myapp"

        [packages.myapp]

        [[packages.myapp.phases]]
        transformers = [{ kind = "minify" }]
    "#,
    );

    let (config, _) = load_config(Some(&temp.path().join("barge.toml"))).unwrap();
    let err = PackageGraph::from_config(&config, &TransformerRegistry::with_builtins());
    assert!(matches!(err, Err(ConfigError::UnknownTransformer { .. })));
}

#[test]
fn test_discovery_ignores_build_output() {
    let temp = TempDir::new().unwrap();
    scaffold_project(&temp);
    write_file(temp.path(), "build/web/stale.txt", "stale");

    let (config, _) = load_config(Some(&temp.path().join("barge.toml"))).unwrap();
    let changes = discover_package_sources(temp.path(), &config, "myapp").unwrap();
    assert!(changes.iter().all(|c| !c.id().path.contains("stale")));
}
