//! Typed workspace configuration.
//!
//! The `config` file at the workspace root is sectioned TOML deserialized
//! into a declared schema and validated eagerly at load time, so a bad
//! value surfaces before any stage starts rather than mid-pipeline on a
//! remote host.

use std::path::Path;

use serde::Deserialize;

use crate::core::error::{Error, Result};
use crate::utils::io;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    pub condor: RoleConfig,
    pub gpu: RoleConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
}

/// Host placement for one remote role: where the pipeline binary lives and
/// where the mirrored workspace root lives on that host.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleConfig {
    pub host: String,
    pub exec_path: String,
    pub workspace_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub chart_resolution: u32,
    /// External trainer entry point, spawned once per invocation.
    pub trainer_exec: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            chart_resolution: 2048,
            trainer_exec: "hg-trainer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Relative path to another workspace whose checkpoints are reused
    /// for prediction instead of this workspace's own.
    pub reuse_workspace: Option<String>,
}

impl WorkspaceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::config_missing_key(
                "config",
                Some(path.display().to_string()),
            )
            .with_hint("Run 'gridhand init <dir>' to write a configuration template"));
        }
        let content = io::read_file(path, "config load")?;
        let mut config: WorkspaceConfig = toml::from_str(&content)
            .map_err(|e| Error::config_invalid_toml(path.display().to_string(), e))?;
        config.expand_and_validate()?;
        Ok(config)
    }

    fn expand_and_validate(&mut self) -> Result<()> {
        self.condor.expand_and_validate("condor")?;
        self.gpu.expand_and_validate("gpu")?;
        if self.training.chart_resolution == 0 {
            return Err(Error::config_invalid_value(
                "training.chart_resolution",
                Some("0".to_string()),
                "must be positive",
            ));
        }
        if self.training.trainer_exec.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "training.trainer_exec",
                None,
                "must not be empty",
            ));
        }
        self.training.trainer_exec = shellexpand::tilde(&self.training.trainer_exec).into_owned();
        Ok(())
    }

    /// Configuration template written by `init`. Hosts are placeholders the
    /// operator fills in before the first deploy.
    pub fn template() -> &'static str {
        "\
# Runtime configuration for this puzzle workspace.
# Fill in the host placement before deploying.

[condor]
host = \"condor.example.edu\"
exec_path = \"~/bin/gridhand\"
workspace_path = \"~/puzzle_workspaces/example\"

[gpu]
host = \"gpu.example.edu\"
exec_path = \"~/bin/gridhand\"
workspace_path = \"~/puzzle_workspaces/example\"

[training]
chart_resolution = 2048
trainer_exec = \"hg-trainer\"

[prediction]
# reuse_workspace = \"../pretrained_ws\"
"
    }
}

impl RoleConfig {
    fn expand_and_validate(&mut self, section: &str) -> Result<()> {
        for (key, value) in [
            ("host", &self.host),
            ("exec_path", &self.exec_path),
            ("workspace_path", &self.workspace_path),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config_invalid_value(
                    format!("{}.{}", section, key),
                    None,
                    "must not be empty",
                ));
            }
        }
        self.exec_path = shellexpand::tilde(&self.exec_path).into_owned();
        self.workspace_path = shellexpand::tilde(&self.workspace_path).into_owned();
        Ok(())
    }
}
