use std::path::PathBuf;

use clap::Args;

use gridhand::config::WorkspaceConfig;
use gridhand::error::Result;
use gridhand::paths;
use gridhand::workspace::Workspace;
use gridhand::{io, log_status};

#[derive(Args)]
pub struct InitArgs {
    /// Directory to initialize as a puzzle workspace
    pub dir: PathBuf,
}

/// Batch cluster submission template written by `init`. Stages fill in
/// the executable, arguments, and job count before submitting.
const CONDOR_TEMPLATE_CONTENT: &str = "\
universe = vanilla
executable = $(exec)
arguments = $(args)
output = condor_scratch/$(cluster).$(process).out
error = condor_scratch/$(cluster).$(process).err
log = condor_scratch/condor.log
queue $(njobs)
";

pub fn run(args: InitArgs) -> Result<()> {
    let ws = Workspace::open_for_init(&args.dir)?;
    io::touch(&ws.local_path(paths::SIGNATURE_FILE), "workspace signature")?;

    for dir in [paths::TRAINING_DIR, paths::TESTING_DIR] {
        io::ensure_dir(&ws.local_path(dir), "workspace data dir")?;
    }
    for dir in paths::SCRATCH_DIRS {
        io::ensure_dir(&ws.local_path(dir), "workspace scratch dir")?;
    }

    let config_path = ws.local_path(paths::CONFIG_FILE);
    if config_path.exists() {
        log_status!("INIT", "keeping existing {}", config_path.display());
    } else {
        io::write_file(&config_path, WorkspaceConfig::template(), "config template")?;
    }

    let condor_path = ws.local_path(paths::CONDOR_TEMPLATE);
    if !condor_path.exists() {
        io::write_file(&condor_path, CONDOR_TEMPLATE_CONTENT, "condor template")?;
    }

    log_status!("INIT", "workspace initialized at {}", ws.root().display());
    log_status!(
        "INIT",
        "edit {} and drop a puzzle into {}/ before the first deploy",
        config_path.display(),
        paths::TRAINING_DIR
    );
    Ok(())
}
