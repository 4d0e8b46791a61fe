use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use gridhand::config::WorkspaceConfig;
use gridhand::error::Result;
use gridhand::paths;
use gridhand::stages::{Placement, StageArgs, StageDescriptor, StageRegistry};
use gridhand::workspace::Workspace;

fn scaffold_workspace(root: &Path) -> Workspace {
    let ws = Workspace::open_for_init(root).unwrap();
    std::fs::write(ws.local_path(paths::SIGNATURE_FILE), "").unwrap();
    std::fs::write(ws.local_path(paths::CONFIG_FILE), WorkspaceConfig::template()).unwrap();
    for dir in [paths::TRAINING_DIR, paths::TESTING_DIR] {
        std::fs::create_dir_all(ws.local_path(dir)).unwrap();
    }
    for dir in paths::SCRATCH_DIRS {
        std::fs::create_dir_all(ws.local_path(dir)).unwrap();
    }
    Workspace::open(root).unwrap()
}

#[test]
fn bootstrap_then_open_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("ws");

    let err = Workspace::open(&root.join("..").join("ws_missing")).unwrap_err();
    assert_eq!(err.code.as_str(), "internal.io_error");

    let ws = scaffold_workspace(&root);
    let config = ws.config().unwrap();
    assert_eq!(config.gpu.host, "gpu.example.edu");
    assert_eq!(config.training.chart_resolution, 2048);
}

#[test]
fn open_without_signature_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("plain");
    std::fs::create_dir_all(&root).unwrap();
    let err = Workspace::open(&root).unwrap_err();
    assert_eq!(err.code.as_str(), "workspace.uninitialized");
    assert!(err.hints[0].message.contains("gridhand init"));
}

#[test]
fn workspace_paths_follow_the_layout() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("ws");
    let ws = scaffold_workspace(&root);

    assert_eq!(
        ws.checkpoint_dir("rob"),
        ws.local_path(paths::NEURAL_SCRATCH).join("rob")
    );
    assert_eq!(
        ws.pid_file("env"),
        ws.local_path(paths::NEURAL_SCRATCH).join("env.pid")
    );
    let puzzle = ws.local_path(paths::TESTING_DIR).join("maze");
    assert_eq!(
        ws.atex_prediction_file(&puzzle, "env"),
        puzzle.join("env-atex.npz")
    );
}

static WALKED: AtomicUsize = AtomicUsize::new(0);

fn counting(_: &Workspace, _: &StageArgs) -> Result<()> {
    WALKED.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

fn walk_registry() -> StageRegistry {
    StageRegistry::new(
        "nn",
        vec![
            StageDescriptor {
                name: "first",
                func: counting,
                placement: Placement::Local,
                variants: &[0],
            },
            StageDescriptor {
                name: "pause",
                func: counting,
                placement: Placement::Barrier,
                variants: &[0],
            },
            StageDescriptor {
                name: "second",
                func: counting,
                placement: Placement::Local,
                variants: &[0],
            },
        ],
    )
}

#[test]
fn autorun_pauses_at_the_barrier_and_resumes_from() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("ws");
    let ws = scaffold_workspace(&root);
    let registry = walk_registry();
    let args = StageArgs::default();

    registry.autorun(&ws, 0, None, &args).unwrap();
    assert_eq!(WALKED.load(Ordering::SeqCst), 1);

    registry.autorun(&ws, 0, Some("second"), &args).unwrap();
    assert_eq!(WALKED.load(Ordering::SeqCst), 2);
}

#[test]
fn autorun_rejects_an_empty_variant() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("ws");
    let ws = scaffold_workspace(&root);
    let err = walk_registry()
        .autorun(&ws, 9, None, &StageArgs::default())
        .unwrap_err();
    assert_eq!(err.code.as_str(), "validation.invalid_argument");
}
