//! Sigil Bot: watches package registries and scans new AI-ecosystem
//! packages.
//!
//! Main entry point that loads configuration, installs logging, and
//! dispatches the CLI command.

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use sigil_core::config::AppConfig;
use sigil_core::error::AppError;

mod commands;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = cli.execute(config).await {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Load configuration from file, environment overlay, and environment
/// variables.
fn load_configuration(path: Option<&str>) -> Result<AppConfig, AppError> {
    let config_path = path.map(str::to_string).unwrap_or_else(|| {
        std::env::var("SIGIL_BOT_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string())
    });
    let env = std::env::var("SIGIL_BOT_ENV").unwrap_or_else(|_| "development".to_string());

    AppConfig::load(&config_path, &env)
}

/// Initialize tracing/logging. Events go to stderr so command output on
/// stdout stays machine-readable.
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}
