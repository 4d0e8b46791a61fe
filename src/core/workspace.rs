//! Workspace handle: signature check, lazy configuration, path accessors,
//! puzzle contexts, and remote mirroring/dispatch against the role hosts.

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use crate::core::config::{RoleConfig, WorkspaceConfig};
use crate::core::dispatch::{RemoteInvocation, RetryPolicy, SshTransport};
use crate::core::error::{Error, Result};
use crate::core::paths;
use crate::core::transfer::{self, Endpoint};
use crate::log_status;
use crate::utils::base_path::join_remote;
use crate::utils::io;
use crate::utils::parser::SectionedText;

/// Remote role a workspace operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Condor,
    Gpu,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Condor => "condor",
            Role::Gpu => "gpu",
        }
    }
}

/// Parsed puzzle descriptor. One per `puzzle.cfg`, cached on the workspace.
#[derive(Debug, Clone)]
pub struct PuzzleContext {
    pub name: String,
    pub dir: PathBuf,
    pub env_file: String,
    pub rob_file: String,
    pub collision_resolution: Option<f64>,
}

#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    config: OnceCell<WorkspaceConfig>,
    contexts: RefCell<HashMap<PathBuf, Rc<PuzzleContext>>>,
    spans: RefCell<HashMap<String, Instant>>,
    pub nn_profile: Option<String>,
    pub current_trial: Option<i64>,
}

impl Workspace {
    /// Opens an existing workspace. The signature file must be present;
    /// anything else is some other directory handed to us by mistake.
    pub fn open(dir: &Path) -> Result<Self> {
        let ws = Self::attach(dir)?;
        if !ws.root.join(paths::SIGNATURE_FILE).is_file() {
            return Err(Error::workspace_uninitialized(
                ws.root.display().to_string(),
                paths::SIGNATURE_FILE,
            ));
        }
        Ok(ws)
    }

    /// Attaches without the signature check. Only `init` uses this.
    pub fn open_for_init(dir: &Path) -> Result<Self> {
        io::ensure_dir(dir, "workspace init")?;
        Self::attach(dir)
    }

    fn attach(dir: &Path) -> Result<Self> {
        let root = dir
            .canonicalize()
            .map_err(|e| {
                Error::internal_io(e.to_string(), Some("workspace root resolve".to_string()))
            })?;
        Ok(Self {
            root,
            config: OnceCell::new(),
            contexts: RefCell::new(HashMap::new()),
            spans: RefCell::new(HashMap::new()),
            nn_profile: None,
            current_trial: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace-relative local path.
    pub fn local_path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Configuration, loaded on first use and memoized for the process.
    pub fn config(&self) -> Result<&WorkspaceConfig> {
        if let Some(config) = self.config.get() {
            return Ok(config);
        }
        let loaded = WorkspaceConfig::load(&self.local_path(paths::CONFIG_FILE))?;
        Ok(self.config.get_or_init(|| loaded))
    }

    pub fn role_config(&self, role: Role) -> Result<&RoleConfig> {
        let config = self.config()?;
        Ok(match role {
            Role::Condor => &config.condor,
            Role::Gpu => &config.gpu,
        })
    }

    /// Workspace-relative path on a role host, as a remote string.
    pub fn remote_path(&self, role: Role, rel: &str) -> Result<String> {
        let role_config = self.role_config(role)?;
        Ok(join_remote(&role_config.workspace_path, &[rel]))
    }

    /// Mirrors workspace-relative paths to the role host, one rsync per
    /// path. A failed path is logged and skipped so one missing optional
    /// artifact does not abort the whole deploy.
    pub fn deploy_to(&self, role: Role, rels: &[&str]) -> Result<()> {
        let role_config = self.role_config(role)?.clone();
        for rel in rels {
            let local = self.local_path(rel).display().to_string();
            let remote = join_remote(&role_config.workspace_path, &[rel]);
            let outcome = transfer::mirror(
                &Endpoint::local(&local),
                &Endpoint::remote(&role_config.host, &remote),
            );
            report_mirror(rel, role, outcome);
        }
        Ok(())
    }

    /// Mirrors workspace-relative paths back from the role host.
    pub fn fetch_from(&self, role: Role, rels: &[&str]) -> Result<()> {
        let role_config = self.role_config(role)?.clone();
        for rel in rels {
            let local = self.local_path(rel).display().to_string();
            let remote = join_remote(&role_config.workspace_path, &[rel]);
            let outcome = transfer::mirror(
                &Endpoint::remote(&role_config.host, &remote),
                &Endpoint::local(&local),
            );
            report_mirror(rel, role, outcome);
        }
        Ok(())
    }

    /// Runs one pipeline stage on the role host and blocks until it
    /// exits, reconnecting through the retry policy on connection loss.
    pub fn remote_command(
        &self,
        role: Role,
        pipeline: &str,
        stage: &str,
        in_tmux: bool,
        auto_retry: bool,
    ) -> Result<()> {
        let role_config = self.role_config(role)?;
        let invocation = RemoteInvocation {
            host: role_config.host.clone(),
            exec_path: role_config.exec_path.clone(),
            workspace_path: role_config.workspace_path.clone(),
            pipeline: pipeline.to_string(),
            stage: stage.to_string(),
            in_tmux,
            auto_retry,
            current_trial: self.current_trial,
            nn_profile: self.nn_profile.clone(),
        };
        invocation.dispatch(&SshTransport, &RetryPolicy::default())
    }

    /// Descriptor for the puzzle under `dir`, parsed once and cached.
    pub fn get_context(&self, dir: &Path) -> Result<Rc<PuzzleContext>> {
        if let Some(context) = self.contexts.borrow().get(dir) {
            return Ok(Rc::clone(context));
        }
        let cfg_path = dir.join(paths::PUZZLE_CFG_FILE);
        if !cfg_path.is_file() {
            return Err(Error::artifact_missing(cfg_path.display().to_string()));
        }
        let text = SectionedText::parse(&io::read_file(&cfg_path, "puzzle descriptor")?);
        let env_file = require_key(&text, &cfg_path, "world")?;
        let rob_file = require_key(&text, &cfg_path, "robot")?;
        let context = Rc::new(PuzzleContext {
            name: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            dir: dir.to_path_buf(),
            env_file,
            rob_file,
            collision_resolution: text.get_f64("problem", "collision_resolution"),
        });
        self.contexts
            .borrow_mut()
            .insert(dir.to_path_buf(), Rc::clone(&context));
        Ok(context)
    }

    pub fn training_dir(&self) -> PathBuf {
        self.local_path(paths::TRAINING_DIR)
    }

    /// Extra training puzzles, one directory per puzzle. Absent directory
    /// means none.
    pub fn extra_training_puzzles(&self) -> Result<Vec<PathBuf>> {
        self.puzzle_dirs(paths::EXTRA_TRAINING_DIR)
    }

    /// Testing puzzles in name order.
    pub fn test_puzzles(&self) -> Result<Vec<PathBuf>> {
        self.puzzle_dirs(paths::TESTING_DIR)
    }

    fn puzzle_dirs(&self, rel: &str) -> Result<Vec<PathBuf>> {
        let base = self.local_path(rel);
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&base)
            .map_err(|e| Error::internal_io(e.to_string(), Some("puzzle listing".to_string())))?;
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| Error::internal_io(e.to_string(), Some("puzzle listing".to_string())))?;
            let path = entry.path();
            if path.join(paths::PUZZLE_CFG_FILE).is_file() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Checkpoint directory for one geometry's network.
    pub fn checkpoint_dir(&self, geo: &str) -> PathBuf {
        self.local_path(paths::NEURAL_SCRATCH).join(geo)
    }

    /// Rendezvous file for one geometry's trainer.
    pub fn pid_file(&self, geo: &str) -> PathBuf {
        self.local_path(paths::NEURAL_SCRATCH)
            .join(format!("{}.pid", geo))
    }

    /// Predicted atlas for a puzzle, written next to its descriptor.
    pub fn atex_prediction_file(&self, puzzle_dir: &Path, geo: &str) -> PathBuf {
        puzzle_dir.join(format!("{}-atex.npz", geo))
    }

    /// Opens a named span; `span_finish` appends its duration to the
    /// performance log.
    pub fn span_start(&self, name: &str) {
        self.spans
            .borrow_mut()
            .insert(name.to_string(), Instant::now());
    }

    pub fn span_finish(&self, name: &str) -> Result<()> {
        let Some(started) = self.spans.borrow_mut().remove(name) else {
            return Ok(());
        };
        let line = format!(
            "{} {} {:.3}s\n",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            name,
            started.elapsed().as_secs_f64()
        );
        io::append_file(
            &self.local_path(paths::PERFORMANCE_LOG),
            &line,
            "performance log",
        )
    }
}

fn report_mirror(rel: &str, role: Role, outcome: Result<i32>) {
    match outcome {
        Ok(0) => {}
        Ok(code) => log_status!("WARN", "mirror of {} with {} exited {}", rel, role.name(), code),
        Err(err) => log_status!("WARN", "mirror of {} with {} failed: {}", rel, role.name(), err),
    }
}

fn require_key(text: &SectionedText, cfg_path: &Path, key: &str) -> Result<String> {
    text.get("problem", key)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::artifact_invalid(
                cfg_path.display().to_string(),
                format!("missing problem.{}", key),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaffold() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ws");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(paths::SIGNATURE_FILE), "").unwrap();
        (dir, root)
    }

    fn write_puzzle(dir: &Path, resolution: Option<&str>) {
        std::fs::create_dir_all(dir).unwrap();
        let mut content = "[problem]\nworld = env.obj\nrobot = rob.obj\n".to_string();
        if let Some(resolution) = resolution {
            content.push_str(&format!("collision_resolution = {}\n", resolution));
        }
        std::fs::write(dir.join(paths::PUZZLE_CFG_FILE), content).unwrap();
    }

    #[test]
    fn open_requires_signature() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();
        let err = Workspace::open(&plain).unwrap_err();
        assert_eq!(err.code.as_str(), "workspace.uninitialized");
    }

    #[test]
    fn open_for_init_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("fresh");
        let ws = Workspace::open_for_init(&root).unwrap();
        assert!(ws.root().is_dir());
    }

    #[test]
    fn config_is_memoized() {
        let (_dir, root) = scaffold();
        std::fs::write(root.join(paths::CONFIG_FILE), WorkspaceConfig::template()).unwrap();
        let ws = Workspace::open(&root).unwrap();
        let first = ws.config().unwrap() as *const WorkspaceConfig;
        std::fs::remove_file(root.join(paths::CONFIG_FILE)).unwrap();
        let second = ws.config().unwrap() as *const WorkspaceConfig;
        assert_eq!(first, second);
    }

    #[test]
    fn context_parses_descriptor_and_caches() {
        let (_dir, root) = scaffold();
        let puzzle = root.join(paths::TRAINING_DIR);
        write_puzzle(&puzzle, Some("0.001"));
        let ws = Workspace::open(&root).unwrap();
        let context = ws.get_context(&puzzle).unwrap();
        assert_eq!(context.env_file, "env.obj");
        assert_eq!(context.rob_file, "rob.obj");
        assert_eq!(context.collision_resolution, Some(0.001));
        let again = ws.get_context(&puzzle).unwrap();
        assert!(Rc::ptr_eq(&context, &again));
    }

    #[test]
    fn context_without_descriptor_is_missing_artifact() {
        let (_dir, root) = scaffold();
        let ws = Workspace::open(&root).unwrap();
        let err = ws.get_context(&root.join("nowhere")).unwrap_err();
        assert_eq!(err.code.as_str(), "artifact.missing");
    }

    #[test]
    fn context_without_world_is_invalid() {
        let (_dir, root) = scaffold();
        let puzzle = root.join(paths::TRAINING_DIR);
        std::fs::create_dir_all(&puzzle).unwrap();
        std::fs::write(
            puzzle.join(paths::PUZZLE_CFG_FILE),
            "[problem]\nrobot = rob.obj\n",
        )
        .unwrap();
        let ws = Workspace::open(&root).unwrap();
        let err = ws.get_context(&puzzle).unwrap_err();
        assert_eq!(err.code.as_str(), "artifact.invalid");
    }

    #[test]
    fn test_puzzles_sorted_and_filtered() {
        let (_dir, root) = scaffold();
        let testing = root.join(paths::TESTING_DIR);
        write_puzzle(&testing.join("beta"), None);
        write_puzzle(&testing.join("alpha"), None);
        std::fs::create_dir_all(testing.join("not_a_puzzle")).unwrap();
        let ws = Workspace::open(&root).unwrap();
        let puzzles = ws.test_puzzles().unwrap();
        let names: Vec<_> = puzzles
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn missing_test_dir_means_no_puzzles() {
        let (_dir, root) = scaffold();
        let ws = Workspace::open(&root).unwrap();
        assert!(ws.test_puzzles().unwrap().is_empty());
        assert!(ws.extra_training_puzzles().unwrap().is_empty());
    }

    #[test]
    fn span_finish_appends_performance_line() {
        let (_dir, root) = scaffold();
        let ws = Workspace::open(&root).unwrap();
        ws.span_start("train_rob");
        ws.span_finish("train_rob").unwrap();
        let log = std::fs::read_to_string(root.join(paths::PERFORMANCE_LOG)).unwrap();
        assert!(log.contains("train_rob"));
    }

    #[test]
    fn unopened_span_finish_is_a_no_op() {
        let (_dir, root) = scaffold();
        let ws = Workspace::open(&root).unwrap();
        ws.span_finish("never_started").unwrap();
        assert!(!root.join(paths::PERFORMANCE_LOG).exists());
    }
}
