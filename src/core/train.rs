//! Neural-network training and prediction stages.
//!
//! The hourglass trainer is an external executable configured through a
//! JSON parameter file. It must never run twice inside one process, so
//! every invocation spawns a fresh child. Training stages hold the GPU
//! lock for their whole run and publish a PID rendezvous so a separate
//! `wait_for_training` invocation can block on completion.

use std::path::PathBuf;

use serde::Serialize;

use crate::core::error::{Error, Result};
use crate::core::lock::DeviceLock;
use crate::core::paths;
use crate::core::rendezvous::PidRendezvous;
use crate::core::stages::{Placement, StageArgs, StageDescriptor, StageRegistry};
use crate::core::workspace::{Role, Workspace};
use crate::log_status;
use crate::utils::{command, io};

pub const PIPELINE_NAME: &str = "nn";

pub const GEO_TYPES: [&str; 2] = ["rob", "env"];

/// Knobs handed to the trainer executable. Defaults mirror the stock
/// hourglass configuration; named profiles tweak a few of them.
#[derive(Debug, Clone, Serialize)]
pub struct TrainerParams {
    pub img_size: u32,
    pub hm_size: u32,
    pub n_feats: u32,
    pub n_stacks: u32,
    pub n_modules: u32,
    pub n_low: u32,
    pub tiny: bool,
    pub mcam: bool,
    pub dropout_rate: f64,
    pub enable_augmentation: bool,
    pub suppress_hot: f64,
    pub red_noise: f64,
    pub suppress_cold: f64,
    pub batch_size: u32,
    pub n_epochs: u32,
    pub epoch_size: u32,
    pub learning_rate: f64,
    pub learning_rate_decay: f64,
    pub decay_step: u32,
    pub weighted_loss: bool,
    pub prediction_epoch_size: u32,
    pub saver_step: u32,
    pub include_surface_normal: bool,
    pub chart_resolution: u32,

    pub puzzle_config: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_puzzle_configs: Vec<String>,
    pub what_to_render: String,
    pub checkpoint_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_name: Option<String>,
}

impl Default for TrainerParams {
    fn default() -> Self {
        Self {
            img_size: 256,
            hm_size: 64,
            n_feats: 256,
            n_stacks: 2,
            n_modules: 1,
            n_low: 4,
            tiny: false,
            mcam: false,
            dropout_rate: 0.2,
            enable_augmentation: true,
            suppress_hot: 0.1,
            red_noise: 0.1,
            suppress_cold: 0.1,
            batch_size: 8,
            n_epochs: 75,
            epoch_size: 1000,
            learning_rate: 0.00025,
            learning_rate_decay: 0.96,
            decay_step: 3000,
            weighted_loss: false,
            prediction_epoch_size: 4096,
            saver_step: 500,
            include_surface_normal: false,
            chart_resolution: 2048,
            puzzle_config: String::new(),
            extra_puzzle_configs: Vec::new(),
            what_to_render: String::new(),
            checkpoint_dir: String::new(),
            output_dir: None,
            dataset_name: None,
        }
    }
}

impl TrainerParams {
    /// Parameters for a named profile, or the stock defaults when no
    /// profile is selected.
    pub fn from_profile(profile: Option<&str>) -> Result<Self> {
        let mut params = Self::default();
        let Some(name) = profile else {
            return Ok(params);
        };
        match name {
            "" => {}
            "hg4" => {
                params.n_stacks = 4;
            }
            "256hg" => {
                params.n_low = 6;
                params.batch_size = 4;
            }
            "256hg+normal" => {
                params.n_low = 6;
                params.batch_size = 4;
                params.include_surface_normal = true;
            }
            "256hg+normal-aug" => {
                params.n_low = 6;
                params.batch_size = 4;
                params.include_surface_normal = true;
                params.enable_augmentation = false;
            }
            other => {
                return Err(Error::config_invalid_value(
                    "nn_profile",
                    Some(other.to_string()),
                    "unknown trainer profile",
                ));
            }
        }
        Ok(params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrainerMode {
    Train,
    Predict,
}

impl TrainerMode {
    fn as_str(self) -> &'static str {
        match self {
            TrainerMode::Train => "train",
            TrainerMode::Predict => "predict",
        }
    }
}

/// Spawns one trainer child and blocks until it exits. The parameter
/// file is written next to the checkpoints so a run can be reproduced
/// by hand.
fn launch_trainer(ws: &Workspace, params: &TrainerParams, mode: TrainerMode, load: bool) -> Result<()> {
    let params_dir = PathBuf::from(&params.checkpoint_dir);
    io::ensure_dir(&params_dir, "trainer checkpoint dir")?;
    let params_file = params_dir.join("params.json");
    let rendered = serde_json::to_string_pretty(params)
        .map_err(|e| Error::internal_json(e.to_string(), Some("trainer params".to_string())))?;
    io::write_file(&params_file, &rendered, "trainer params")?;

    let trainer_exec = ws.config()?.training.trainer_exec.clone();
    let params_arg = params_file.display().to_string();
    let mut argv = vec!["--params", params_arg.as_str(), "--mode", mode.as_str()];
    if load {
        argv.push("--load");
    }
    let code = command::run_status(&trainer_exec, &argv, "trainer launch")?;
    if code != 0 {
        return Err(Error::trainer_failed(
            code,
            format!("{} {}", mode.as_str(), params.what_to_render),
        ));
    }
    Ok(())
}

fn base_params(ws: &Workspace) -> Result<TrainerParams> {
    let mut params = TrainerParams::from_profile(ws.nn_profile.as_deref())?;
    params.chart_resolution = ws.config()?.training.chart_resolution;
    Ok(params)
}

fn train_stage(ws: &Workspace, args: &StageArgs, geo: &str) -> Result<()> {
    if args.only_wait {
        log_status!("STAGE", "--only_wait has no effect in train_{}", geo);
    }
    let mut params = base_params(ws)?;
    params.puzzle_config = ws
        .training_dir()
        .join(paths::PUZZLE_CFG_FILE)
        .display()
        .to_string();
    let extras = ws.extra_training_puzzles()?;
    if !extras.is_empty() {
        params.extra_puzzle_configs = extras
            .iter()
            .map(|d| d.join(paths::PUZZLE_CFG_FILE).display().to_string())
            .collect();
        params.n_epochs = 50 + 25 * (1 + extras.len() as u32);
    }
    params.what_to_render = geo.to_string();
    params.checkpoint_dir = ws.checkpoint_dir(geo).display().to_string();
    params.suppress_hot = 0.0;
    params.suppress_cold = 0.7;

    ws.span_start("wait for GPU resource");
    let _guard = DeviceLock::gpu().acquire()?;
    ws.span_finish("wait for GPU resource")?;

    let span = format!("train_{}", geo);
    ws.span_start(&span);
    io::ensure_dir(&ws.local_path(paths::NEURAL_SCRATCH), "neural scratch")?;
    let rendezvous = PidRendezvous::new(ws.pid_file(geo));
    rendezvous.start(std::process::id() as i64)?;
    let outcome = launch_trainer(ws, &params, TrainerMode::Train, args.load);
    rendezvous.finish()?;
    ws.span_finish(&span)?;
    outcome
}

fn train_rob(ws: &Workspace, args: &StageArgs) -> Result<()> {
    train_stage(ws, args, "rob")
}

fn train_env(ws: &Workspace, args: &StageArgs) -> Result<()> {
    train_stage(ws, args, "env")
}

fn wait_for_training(ws: &Workspace, _args: &StageArgs) -> Result<()> {
    for geo in GEO_TYPES {
        let rendezvous = PidRendezvous::new(ws.pid_file(geo));
        log_status!("STAGE", "waiting on {}", rendezvous.path().display());
        let pid = rendezvous.wait()?;
        log_status!("STAGE", "{} trainer finished (last pid {:?})", geo, pid);
    }
    Ok(())
}

/// Checkpoints come from this workspace unless `prediction.reuse_workspace`
/// points at another workspace whose networks should be reused; in that
/// case predictions are still written under this workspace.
fn prediction_checkpoints(ws: &Workspace, geo: &str) -> Result<(PathBuf, Option<PathBuf>)> {
    match &ws.config()?.prediction.reuse_workspace {
        Some(rel) => {
            let reused = Workspace::open(&ws.root().join(rel))?;
            let own = ws.checkpoint_dir(geo);
            io::ensure_dir(&own, "prediction output dir")?;
            Ok((reused.checkpoint_dir(geo), Some(own)))
        }
        None => Ok((ws.checkpoint_dir(geo), None)),
    }
}

fn predict_stage(ws: &Workspace, args: &StageArgs, geo: &str, puzzles: &[PathBuf]) -> Result<()> {
    let (ckpt_dir, output_dir) = prediction_checkpoints(ws, geo)?;
    for puzzle_dir in puzzles {
        let context = ws.get_context(puzzle_dir)?;
        if let Some(only) = &args.puzzle_name {
            if *only != context.name {
                continue;
            }
        }
        let atex = ws.atex_prediction_file(puzzle_dir, geo);
        if atex.is_file() {
            log_status!(
                "STAGE",
                "skipping {}: {} already exists",
                context.name,
                atex.display()
            );
            continue;
        }

        ws.span_start("wait for GPU resource");
        let guard = DeviceLock::gpu().acquire()?;
        ws.span_finish("wait for GPU resource")?;

        let span = format!("predict_{} {}", geo, context.name);
        ws.span_start(&span);
        let mut params = base_params(ws)?;
        params.puzzle_config = puzzle_dir
            .join(paths::PUZZLE_CFG_FILE)
            .display()
            .to_string();
        params.what_to_render = geo.to_string();
        params.checkpoint_dir = ckpt_dir.display().to_string();
        params.output_dir = output_dir.as_ref().map(|d| d.display().to_string());
        params.dataset_name = Some(context.name.clone());
        log_status!("STAGE", "predicting {} for {}", geo, context.name);
        launch_trainer(ws, &params, TrainerMode::Predict, false)?;

        let produced_dir = output_dir.as_deref().unwrap_or(&ckpt_dir);
        let produced = produced_dir.join(format!("{}-atex.npz", context.name));
        if !produced.is_file() {
            return Err(Error::artifact_missing(produced.display().to_string()));
        }
        std::fs::copy(&produced, &atex).map_err(|e| {
            Error::internal_io(e.to_string(), Some("prediction copy".to_string()))
        })?;
        ws.span_finish(&span)?;
        drop(guard);
    }
    Ok(())
}

fn predict_rob(ws: &Workspace, args: &StageArgs) -> Result<()> {
    predict_stage(ws, args, "rob", &ws.test_puzzles()?)
}

fn predict_env(ws: &Workspace, args: &StageArgs) -> Result<()> {
    predict_stage(ws, args, "env", &ws.test_puzzles()?)
}

fn training_puzzles(ws: &Workspace) -> Result<Vec<PathBuf>> {
    let mut puzzles = vec![ws.training_dir()];
    puzzles.extend(ws.extra_training_puzzles()?);
    Ok(puzzles)
}

/// Predicts over the training puzzles instead of the testing set, which
/// checks how well the networks fit their own data.
fn validate_rob(ws: &Workspace, args: &StageArgs) -> Result<()> {
    predict_stage(ws, args, "rob", &training_puzzles(ws)?)
}

fn validate_env(ws: &Workspace, args: &StageArgs) -> Result<()> {
    predict_stage(ws, args, "env", &training_puzzles(ws)?)
}

fn deploy_to_gpu(ws: &Workspace, _args: &StageArgs) -> Result<()> {
    ws.deploy_to(
        Role::Gpu,
        &[
            paths::SIGNATURE_FILE,
            paths::CONFIG_FILE,
            "train/",
            "test/",
        ],
    )?;
    if ws.local_path(paths::EXTRA_TRAINING_DIR).is_dir() {
        ws.deploy_to(Role::Gpu, &["extra_train/"])?;
    }
    Ok(())
}

fn fetch_from_gpu(ws: &Workspace, _args: &StageArgs) -> Result<()> {
    ws.fetch_from(Role::Gpu, &["test/"])
}

fn barrier(_ws: &Workspace, _args: &StageArgs) -> Result<()> {
    Ok(())
}

/// Training pipeline registry. Variant 0 is the full train-then-predict
/// run with a pause between the phases; variant 4 reuses existing
/// checkpoints and only predicts.
pub fn registry() -> StageRegistry {
    StageRegistry::new(
        PIPELINE_NAME,
        vec![
            StageDescriptor {
                name: "deploy_to_gpu",
                func: deploy_to_gpu,
                placement: Placement::Local,
                variants: &[0, 4],
            },
            StageDescriptor {
                name: "train_rob",
                func: train_rob,
                placement: Placement::Gpu { in_tmux: true },
                variants: &[0],
            },
            StageDescriptor {
                name: "train_env",
                func: train_env,
                placement: Placement::Gpu { in_tmux: true },
                variants: &[0],
            },
            StageDescriptor {
                name: "wait_for_training",
                func: wait_for_training,
                placement: Placement::Gpu { in_tmux: false },
                variants: &[0],
            },
            StageDescriptor {
                name: "break",
                func: barrier,
                placement: Placement::Barrier,
                variants: &[0],
            },
            StageDescriptor {
                name: "predict_rob",
                func: predict_rob,
                placement: Placement::Gpu { in_tmux: false },
                variants: &[0, 4],
            },
            StageDescriptor {
                name: "predict_env",
                func: predict_env,
                placement: Placement::Gpu { in_tmux: false },
                variants: &[0, 4],
            },
            StageDescriptor {
                name: "validate_rob",
                func: validate_rob,
                placement: Placement::Gpu { in_tmux: false },
                variants: &[],
            },
            StageDescriptor {
                name: "validate_env",
                func: validate_env,
                placement: Placement::Gpu { in_tmux: false },
                variants: &[],
            },
            StageDescriptor {
                name: "fetch_from_gpu",
                func: fetch_from_gpu,
                placement: Placement::Local,
                variants: &[0, 4],
            },
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_match_stock_configuration() {
        let params = TrainerParams::default();
        assert_eq!(params.n_feats, 256);
        assert_eq!(params.n_stacks, 2);
        assert_eq!(params.n_low, 4);
        assert_eq!(params.batch_size, 8);
        assert_eq!(params.n_epochs, 75);
        assert!(params.enable_augmentation);
    }

    #[test]
    fn profile_256hg_lowers_batch_and_deepens_hourglass() {
        let params = TrainerParams::from_profile(Some("256hg")).unwrap();
        assert_eq!(params.n_low, 6);
        assert_eq!(params.batch_size, 4);
        assert!(!params.include_surface_normal);
    }

    #[test]
    fn profile_normal_aug_disables_augmentation() {
        let params = TrainerParams::from_profile(Some("256hg+normal-aug")).unwrap();
        assert!(params.include_surface_normal);
        assert!(!params.enable_augmentation);
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let err = TrainerParams::from_profile(Some("512hg")).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }

    #[test]
    fn registry_orders_variant_zero() {
        let registry = registry();
        let names: Vec<_> = registry
            .variant_stages(0)
            .iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "deploy_to_gpu",
                "train_rob",
                "train_env",
                "wait_for_training",
                "break",
                "predict_rob",
                "predict_env",
                "fetch_from_gpu",
            ]
        );
    }

    #[test]
    fn registry_variant_four_predicts_only() {
        let registry = registry();
        let names: Vec<_> = registry
            .variant_stages(4)
            .iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            vec!["deploy_to_gpu", "predict_rob", "predict_env", "fetch_from_gpu"]
        );
    }

    #[test]
    fn validate_stages_resolve_but_run_in_no_variant() {
        let registry = registry();
        assert!(registry.resolve("validate_rob").is_ok());
        assert!(registry
            .variant_stages(0)
            .iter()
            .all(|s| s.name != "validate_rob"));
    }

    #[test]
    fn params_serialize_without_unset_options() {
        let params = TrainerParams::default();
        let json = serde_json::to_value(&params).unwrap();
        assert!(json.get("output_dir").is_none());
        assert!(json.get("extra_puzzle_configs").is_none());
        assert_eq!(json["n_feats"], 256);
    }
}
