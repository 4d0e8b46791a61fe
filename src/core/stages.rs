//! Stage registry and variant execution plans.
//!
//! Every unit of pipeline work is a named stage operating on a workspace.
//! A variant is an ordered subset of the registered stages; `autorun`
//! walks a variant in registration order, while `--stage` resolves one
//! stage by name and runs it in the current process.

use crate::core::error::{Error, Result};
use crate::core::workspace::{Role, Workspace};
use crate::log_status;

/// Flags threaded from the CLI into every stage function.
#[derive(Debug, Clone, Default)]
pub struct StageArgs {
    /// Attach to work already in flight instead of starting it. Set on
    /// re-invocation after a dropped connection; every long-running stage
    /// must honor it to stay resumable.
    pub only_wait: bool,
    /// Continue from existing checkpoints instead of starting fresh.
    pub load: bool,
    /// Restrict per-puzzle stages to a single named puzzle.
    pub puzzle_name: Option<String>,
}

pub type StageFn = fn(&Workspace, &StageArgs) -> Result<()>;

/// Where a stage executes when reached through `autorun`.
#[derive(Debug, Clone, Copy)]
pub enum Placement {
    /// Runs in the autorun process itself.
    Local,
    /// Dispatched to the GPU role host via `--stage`.
    Gpu { in_tmux: bool },
    /// Not a stage: autorun stops here and the operator resumes
    /// explicitly once satisfied with the phase before the barrier.
    Barrier,
}

#[derive(Debug)]
pub struct StageDescriptor {
    pub name: &'static str,
    pub func: StageFn,
    pub placement: Placement,
    pub variants: &'static [u32],
}

pub struct StageRegistry {
    pipeline: &'static str,
    stages: Vec<StageDescriptor>,
}

impl StageRegistry {
    pub fn new(pipeline: &'static str, stages: Vec<StageDescriptor>) -> Self {
        Self { pipeline, stages }
    }

    pub fn pipeline(&self) -> &'static str {
        self.pipeline
    }

    /// Names invocable through `--stage`. Barriers are autorun markers,
    /// not stages, so they are not listed.
    pub fn names(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| !matches!(s.placement, Placement::Barrier))
            .map(|s| s.name.to_string())
            .collect()
    }

    pub fn resolve(&self, name: &str) -> Result<&StageDescriptor> {
        self.stages
            .iter()
            .filter(|s| !matches!(s.placement, Placement::Barrier))
            .find(|s| s.name == name)
            .ok_or_else(|| Error::stage_unknown(name, self.names()))
    }

    /// Runs one stage in the current process.
    pub fn run(&self, name: &str, ws: &Workspace, args: &StageArgs) -> Result<()> {
        let stage = self.resolve(name)?;
        log_status!("STAGE", "{} started", stage.name);
        (stage.func)(ws, args)?;
        log_status!("STAGE", "{} finished", stage.name);
        Ok(())
    }

    /// Stages of a variant in registration order, barriers included.
    pub fn variant_stages(&self, variant: u32) -> Vec<&StageDescriptor> {
        self.stages
            .iter()
            .filter(|s| s.variants.contains(&variant))
            .collect()
    }

    /// Walks a variant from `from` (or the beginning), executing local
    /// stages in-process and dispatching GPU stages to the role host.
    /// Stops at a barrier so the operator can inspect intermediate state;
    /// a later call with `from` set to the next stage resumes the walk.
    pub fn autorun(
        &self,
        ws: &Workspace,
        variant: u32,
        from: Option<&str>,
        args: &StageArgs,
    ) -> Result<()> {
        let plan = self.variant_stages(variant);
        if plan.is_empty() {
            return Err(Error::validation_invalid_argument(
                "variant",
                format!("no stages registered for variant {}", variant),
            ));
        }
        let start = match from {
            Some(name) => plan
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| Error::stage_unknown(name, self.names()))?,
            None => 0,
        };
        let total = plan.len() as u64;
        for (index, stage) in plan.iter().enumerate().skip(start) {
            let counter = crate::utils::fmt::padded(index as u64 + 1, total);
            match stage.placement {
                Placement::Barrier => {
                    if let Some(next) = plan.get(index + 1) {
                        log_status!(
                            "STAGE",
                            "pausing before {}; rerun autorun with --from {} to continue",
                            next.name,
                            next.name
                        );
                    }
                    return Ok(());
                }
                Placement::Local => {
                    log_status!("STAGE", "[{}/{}] {} (local)", counter, total, stage.name);
                    (stage.func)(ws, args)?;
                }
                Placement::Gpu { in_tmux } => {
                    log_status!("STAGE", "[{}/{}] {} (gpu)", counter, total, stage.name);
                    ws.remote_command(Role::Gpu, self.pipeline, stage.name, in_tmux, true)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Workspace, _: &StageArgs) -> Result<()> {
        Ok(())
    }

    fn registry() -> StageRegistry {
        StageRegistry::new(
            "nn",
            vec![
                StageDescriptor {
                    name: "alpha",
                    func: noop,
                    placement: Placement::Local,
                    variants: &[0, 4],
                },
                StageDescriptor {
                    name: "pause",
                    func: noop,
                    placement: Placement::Barrier,
                    variants: &[0],
                },
                StageDescriptor {
                    name: "omega",
                    func: noop,
                    placement: Placement::Local,
                    variants: &[0],
                },
            ],
        )
    }

    #[test]
    fn resolve_finds_registered_stage() {
        let registry = registry();
        assert_eq!(registry.resolve("alpha").unwrap().name, "alpha");
    }

    #[test]
    fn resolve_rejects_unknown_stage_with_hint() {
        let registry = registry();
        let err = registry.resolve("alhpa").unwrap_err();
        assert_eq!(err.code.as_str(), "stage.unknown");
        assert!(err.hints[0].message.contains("alpha"));
    }

    #[test]
    fn barriers_are_not_invocable() {
        let registry = registry();
        assert_eq!(
            registry.resolve("pause").unwrap_err().code.as_str(),
            "stage.unknown"
        );
    }

    #[test]
    fn variant_filters_preserve_order() {
        let registry = registry();
        let names: Vec<_> = registry
            .variant_stages(0)
            .iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["alpha", "pause", "omega"]);
        let names: Vec<_> = registry
            .variant_stages(4)
            .iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["alpha"]);
    }
}
