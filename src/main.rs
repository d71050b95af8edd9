//! term-assistant - chat with a local model from the terminal.

use clap::Parser;
use std::process::ExitCode;

use term_assistant::{logging, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    // Keep the guard alive so buffered log lines are flushed on exit
    let _guard = match logging::init() {
        Ok((guard, _)) => Some(guard),
        Err(e) => {
            logging::init_console();
            tracing::warn!("File logging unavailable: {}", e);
            None
        }
    };

    let args = Cli::parse();

    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
