//! Stemdeck CLI
//!
//! Command-line interface for the Stemdeck audio engine.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stemdeck::cli::{commands, failure_report, Cli, Commands, MixOptions};
use stemdeck::config::EngineConfig;
use stemdeck::EngineError;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Stemdeck v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Some(cmd) => handle_command(&config, cmd),
        None => {
            println!("Stemdeck v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn explain(error: EngineError) -> anyhow::Error {
    anyhow::anyhow!(failure_report(&error))
}

fn handle_command(config: &EngineConfig, cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Validate { file, mime } => commands::validate(config, &file, mime.as_deref())
            .map_err(explain)
            .with_context(|| format!("{} was rejected", file.display()))?,
        Commands::Tempo { input } => {
            commands::tempo(&input).map_err(explain)?;
        }
        Commands::Separate { input, output } => {
            commands::separate(config, &input, &output)
                .map_err(explain)
                .with_context(|| format!("separating {}", input.display()))?;
        }
        Commands::Accompany { input, bpm, output } => {
            commands::accompany(config, &input, bpm, &output)
                .map_err(explain)
                .with_context(|| format!("generating accompaniment for {}", input.display()))?;
        }
        Commands::Mix {
            input,
            separate,
            accompany,
            bpm,
            eq,
            volume,
            mute,
            solo,
            output,
        } => {
            let options = MixOptions {
                separate,
                accompany,
                bpm,
                eq,
                volume,
                mute,
                solo,
            };
            commands::mix(config, &input, &options, &output)
                .map_err(explain)
                .with_context(|| format!("mixing {}", input.display()))?;
        }
    }
    Ok(())
}
