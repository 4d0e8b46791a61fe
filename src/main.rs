use clap::{Parser, Subcommand};

mod commands;

use commands::{autorun, init, nn};
use gridhand::error::{Error, ErrorCode};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "gridhand")]
#[command(version = VERSION)]
#[command(about = "Puzzle pipeline workspace orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a puzzle workspace
    Init(init::InitArgs),
    /// Run one training/prediction stage in this process
    Nn(nn::NnArgs),
    /// Walk a pipeline variant from the control node
    Autorun(autorun::AutorunArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init(args) => init::run(args),
        Commands::Nn(args) => nn::run(args),
        Commands::Autorun(args) => autorun::run(args),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error[{}]: {}", err.code.as_str(), err);
            for hint in &err.hints {
                eprintln!("  hint: {}", hint.message);
            }
            std::process::ExitCode::from(exit_code_to_u8(error_exit_code(&err)))
        }
    }
}

/// A failed remote dispatch surfaces the remote exit code; everything
/// else exits 1.
fn error_exit_code(err: &Error) -> i32 {
    if err.code == ErrorCode::RemoteDispatchFailed {
        if let Some(code) = err.details.get("exitCode").and_then(|v| v.as_i64()) {
            return code as i32;
        }
    }
    1
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
