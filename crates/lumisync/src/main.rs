mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lumisync_core::{EngineConfig, SyncEngine};

use crate::cli::{Cli, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.json_logs);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, json: bool) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let (profile, config) = build_engine_config(&cli.global)?;
    let engine = SyncEngine::new(config).map_err(|e| CliError::from_core(e, &profile))?;

    tracing::debug!(command = ?cli.command, profile = %profile, "dispatching command");
    commands::dispatch(cli.command, &engine, &profile).await
}

/// Load the config file and translate the selected profile.
fn build_engine_config(global: &GlobalOpts) -> Result<(String, EngineConfig), CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(lumisync_config::config_path);
    let config_err = |source| CliError::Config {
        source,
        path: path.display().to_string(),
    };

    let cfg = lumisync_config::load_config_from(&path).map_err(config_err)?;
    let (name, profile) = cfg.profile(global.profile.as_deref()).map_err(config_err)?;
    let engine_config =
        lumisync_config::profile_to_engine_config(profile, name).map_err(config_err)?;
    Ok((name.to_owned(), engine_config))
}
