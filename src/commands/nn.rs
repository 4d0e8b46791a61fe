use std::path::PathBuf;

use clap::Args;

use gridhand::error::Result;
use gridhand::stages::StageArgs;
use gridhand::train;
use gridhand::workspace::Workspace;

#[derive(Args)]
pub struct NnArgs {
    /// Workspace directory
    pub dir: PathBuf,

    /// Pipeline stage to run in this process
    #[arg(long)]
    pub stage: String,

    /// Attach to work already in flight instead of starting it
    #[arg(long = "only_wait")]
    pub only_wait: bool,

    /// Continue from existing checkpoints
    #[arg(long)]
    pub load: bool,

    /// Restrict per-puzzle stages to one puzzle
    #[arg(long = "puzzle_name")]
    pub puzzle_name: Option<String>,

    /// Named trainer profile
    #[arg(long = "nn_profile")]
    pub nn_profile: Option<String>,

    /// Trial number recorded for this run
    #[arg(long = "current_trial")]
    pub current_trial: Option<i64>,
}

pub fn run(args: NnArgs) -> Result<()> {
    let mut ws = Workspace::open(&args.dir)?;
    ws.nn_profile = args.nn_profile;
    ws.current_trial = args.current_trial;

    let stage_args = StageArgs {
        only_wait: args.only_wait,
        load: args.load,
        puzzle_name: args.puzzle_name,
    };
    train::registry().run(&args.stage, &ws, &stage_args)
}
