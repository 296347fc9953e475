//! `mnemo`: operator CLI for a mnemo memory store.
//!
//! ```bash
//! mnemo observe "Don't forget, my birthday is March 3rd"
//! mnemo recall "when is my birthday?" -k 5
//! mnemo stats --prometheus
//! mnemo --data-dir ./store gc
//! ```

#![deny(clippy::unwrap_used)]

mod args;
mod commands;
mod telemetry;

use clap::Parser;

use crate::args::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(&cli)?;
    telemetry::init_tracing(&config.general.log_level);

    let mut stdout = std::io::stdout().lock();
    commands::run(&cli, config, &mut stdout).await
}
