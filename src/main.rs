mod backup;
mod bundle;
mod cli;
mod config;
mod error;
mod fetch;
mod game;
mod install;
mod langconfig;
mod progress;
mod state;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = cli::parse_args(&args)?;
    init_tracing(invocation.global.verbosity);
    cli::run(invocation)
}

fn init_tracing(verbosity: cli::Verbosity) {
    // -v / -q beat RUST_LOG; otherwise RUST_LOG beats the default.
    let filter = match verbosity {
        cli::Verbosity::Normal => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(verbosity.filter())),
        _ => EnvFilter::new(verbosity.filter()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
