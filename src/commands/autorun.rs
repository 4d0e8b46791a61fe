use std::path::PathBuf;

use clap::Args;

use gridhand::error::Result;
use gridhand::stages::StageArgs;
use gridhand::train;
use gridhand::workspace::Workspace;

#[derive(Args)]
pub struct AutorunArgs {
    /// Workspace directory
    pub dir: PathBuf,

    /// Pipeline variant to walk
    #[arg(long, default_value_t = 0)]
    pub variant: u32,

    /// Resume the walk from this stage instead of the beginning
    #[arg(long)]
    pub from: Option<String>,

    /// Named trainer profile forwarded to remote stages
    #[arg(long = "nn_profile")]
    pub nn_profile: Option<String>,

    /// Trial number forwarded to remote stages
    #[arg(long = "current_trial")]
    pub current_trial: Option<i64>,
}

pub fn run(args: AutorunArgs) -> Result<()> {
    let mut ws = Workspace::open(&args.dir)?;
    ws.nn_profile = args.nn_profile;
    ws.current_trial = args.current_trial;

    train::registry().autorun(&ws, args.variant, args.from.as_deref(), &StageArgs::default())
}
