//! Entry point: parse arguments, install signal handlers, run the orchestrator, and translate
//! its outcome into the stable 0-4 exit code contract.

mod adapter;
mod address;
mod agent;
mod bus;
mod cli;
mod config;
mod device;
mod discovery;
mod error;
mod orchestrator;
mod output;
mod pin;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

use crate::{
    cli::{Cli, Config},
    orchestrator::Outcome,
    output::OutputWriter,
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let config = match Config::try_from(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(err.kind.exit_code());
        }
    };

    let output = OutputWriter::new(config.verbose);

    let Ok(mut sig_term) = signal(SignalKind::terminate()) else {
        eprintln!("failed to install SIGTERM handler");
        std::process::exit(3);
    };
    let Ok(mut sig_int) = signal(SignalKind::interrupt()) else {
        eprintln!("failed to install SIGINT handler");
        std::process::exit(3);
    };

    // Every resource this run acquires (bus connection, registered agent, started discovery)
    // cleans itself up via Drop when the run future below is cancelled, so cancelling it here by
    // simply not polling it further is sufficient; no separate teardown call is needed.
    let outcome = tokio::select! {
        outcome = orchestrator::run(&config, &output) => outcome,
        _ = sig_term.recv() => Outcome::PairingFailed,
        _ = sig_int.recv() => Outcome::PairingFailed,
    };

    output.result(outcome);
    std::process::exit(outcome.exit_code());
}
