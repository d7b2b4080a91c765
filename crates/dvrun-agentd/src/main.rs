use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use dvrun_observe::{LoggerConfig, logger_init};

mod node;
mod run;

#[derive(Parser)]
#[command(version, name = "dvrun", about = "Launch one training worker per local accelerator device")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve this node and supervise one worker per device until the job ends.
    Run(run::RunArgs),
    /// Resolve this node and print the rank variables as shell exports.
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logger = LoggerConfig::from_env().and_then(|cfg| logger_init(&cfg));
    if let Err(e) = logger {
        eprintln!("dvrun: logger: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Run(args) => run::run(args).await,
        Command::Init => node::print_exports().await.map(|()| 0),
    };
    match result {
        Ok(code) => exit_code(code),
        Err(e) => {
            error!(target: "dvrun.agentd", "dvrun failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Process exit codes are a byte; out-of-range codes collapse to a generic failure.
fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(byte) => ExitCode::from(byte),
        Err(_) => ExitCode::FAILURE,
    }
}
