//! stackguard - guarded command runner for deployment scripts
//!
//! Thin binary entry point; every subcommand lives in `cli`.

use std::process::ExitCode;

use clap::Parser;
use stackguard::RemoteError;
use stackguard_runner::error::{EXIT_FAILURE, GuardError, StateError};

mod cli;
mod main_helpers;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Cli::parse();
    main_helpers::initialize_tracing();

    match cli::run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("stackguard: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<RemoteError>() {
            return err.exit_code();
        }
        if let Some(err) = cause.downcast_ref::<GuardError>() {
            return err.exit_code();
        }
        if let Some(err) = cause.downcast_ref::<StateError>() {
            return err.exit_code();
        }
    }
    EXIT_FAILURE
}
