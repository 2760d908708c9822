use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

mod commands;
mod error;
mod input;
mod settings;

use settings::Settings;

/// Logs go to stderr so stdout stays clean for converted output
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);
    tracing_subscriber::registry().with(fmt_layer).init();
}

fn main() {
    setup_logging();

    let settings = Settings::parse();
    tracing::debug!(?settings, "Parsed command line");

    let result = settings
        .to_config()
        .and_then(|config| commands::run(settings.command, &config));

    if let Err(err) = result {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}
