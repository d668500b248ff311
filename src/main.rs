use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use certsync::Config;
use certsync::cli::{Cli, Commands};
use certsync::commands::{
    App, handle_backend, handle_backup, handle_config, handle_delete, handle_download,
    handle_secret, handle_status, handle_upload,
};
use certsync::error::Result;
use certsync::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.global.config.clone().or_else(Config::find_existing_config);
    let mut config = match &config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::default(),
    };

    logging::init(&config.log_level());
    debug!(path = ?config_path, "configuration resolved");

    // Config commands work on the file itself, without overrides or keychain.
    if let Commands::Config { command } = cli.command {
        return handle_config(config, config_path, command);
    }

    if let Some(dir) = &cli.global.data_dir {
        config.set_default("data_dir", &dir.to_string_lossy())?;
    }
    if let Some(keychain) = &cli.global.keychain {
        config.set_default("keychain", keychain)?;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, finishing the current step...");
            on_interrupt.cancel();
        }
    });

    let app = App::open(&config).await?;

    match cli.command {
        Commands::Status { all } => handle_status(&app, all, &cancel).await,
        Commands::Upload { serial, p12 } => handle_upload(&app, &serial, p12, &cancel).await,
        Commands::Download { serial } => handle_download(&app, &serial, &cancel).await,
        Commands::Delete { serial, local } => handle_delete(&app, &serial, local, &cancel).await,
        Commands::Backend { command } => handle_backend(&app, command, &cancel).await,
        Commands::Backup { command } => handle_backup(&app.settings, command).await,
        Commands::Secret { command } => handle_secret(&app, command, &cancel).await,
        Commands::Config { .. } => Ok(()),
    }
}
