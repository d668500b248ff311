//! Backend commands - configure, select and probe secret backends.

use tokio_util::sync::CancellationToken;

use super::App;
use crate::cli::BackendCommands;
use crate::error::{Result, SyncError};
use crate::secrets::{BackendFactory, BackendType};
use crate::settings::BackendConfig;
use crate::utils::parse_settings;
use crate::utils::prompt::prompt_password;

pub async fn handle_backend(
    app: &App,
    command: BackendCommands,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        BackendCommands::Types => {
            for backend_type in BackendFactory::supported_types() {
                println!(
                    "{:<28} {}",
                    backend_type.as_str(),
                    BackendFactory::display_name(backend_type)
                );
            }
        }
        BackendCommands::Fields { backend_type } => {
            let backend_type: BackendType = backend_type.parse()?;
            println!("{} settings:", BackendFactory::display_name(backend_type));
            for field in BackendFactory::required_settings(backend_type) {
                let mut flags = Vec::new();
                if field.is_required {
                    flags.push("required");
                }
                if field.is_secret {
                    flags.push("secret");
                }
                print!("  {:<24} {}", field.key, field.label);
                if !flags.is_empty() {
                    print!(" ({})", flags.join(", "));
                }
                if let Some(default) = field.default_value {
                    print!(" [default: {}]", default);
                }
                println!();
            }
        }
        BackendCommands::List => {
            let configs = app.registry.configs().await;
            if configs.is_empty() {
                println!("No backends configured.");
                return Ok(());
            }
            let active = app.registry.active_id().await;
            for config in configs {
                let marker = if active.as_deref() == Some(config.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{} {}  {} [{}]", marker, config.id, config.name, config.backend_type);
                for (key, value) in &config.settings {
                    println!("      {} = {}", key, value);
                }
            }
        }
        BackendCommands::Add {
            backend_type,
            name,
            settings,
            activate,
        } => {
            let backend_type: BackendType = backend_type.parse()?;
            if backend_type == BackendType::None {
                return Err(SyncError::validation("choose a backend type other than 'none'"));
            }
            let mut config = BackendConfig::new(name, backend_type);
            for field in BackendFactory::required_settings(backend_type) {
                if let Some(default) = field.default_value {
                    config.settings.insert(field.key.to_string(), default.to_string());
                }
            }
            config.settings.extend(parse_settings(&settings)?);

            // Required secrets are prompted for rather than read from argv.
            for field in BackendFactory::required_settings(backend_type) {
                if field.is_secret && field.is_required && config.setting(field.key).is_none() {
                    let value = prompt_password(field.label)?;
                    config.settings.insert(field.key.to_string(), value.to_string());
                }
            }

            let id = config.id.clone();
            if activate {
                BackendFactory::validate(&config)?;
            }
            app.registry.save_config(config).await?;
            println!("Added backend {}", id);

            if activate {
                app.registry.set_active(Some(&id)).await?;
                println!("Backend {} is now active", id);
            }
        }
        BackendCommands::Edit { id, settings } => {
            let id = resolve_id(app, &id).await?;
            let mut config = app
                .registry
                .config(&id)
                .await?
                .ok_or_else(|| SyncError::UnknownBackend(id.clone()))?;
            for (key, value) in parse_settings(&settings)? {
                if value.is_empty() {
                    config.settings.remove(&key);
                } else {
                    config.settings.insert(key, value);
                }
            }
            app.registry.save_config(config).await?;
            println!("Updated backend {}", id);
        }
        BackendCommands::Remove { id } => {
            let id = resolve_id(app, &id).await?;
            if app.registry.delete_config(&id).await? {
                println!("Removed backend {}", id);
            } else {
                println!("No backend {}", id);
            }
        }
        BackendCommands::Activate { id } => {
            let id = resolve_id(app, &id).await?;
            app.registry.set_active(Some(&id)).await?;
            println!("Backend {} is now active", id);
        }
        BackendCommands::Deactivate => {
            app.registry.set_active(None).await?;
            println!("No backend is active");
        }
        BackendCommands::Test { id } => {
            let id = match id {
                Some(id) => Some(resolve_id(app, &id).await?),
                None => None,
            };
            if app.registry.test_connection(id.as_deref(), cancel).await {
                println!("Connection OK");
            } else {
                return Err(SyncError::Other(match id {
                    Some(id) => format!("connection test failed for backend {}", id),
                    None => "connection test failed for the active backend".to_string(),
                }));
            }
        }
    }
    Ok(())
}

/// Accept a backend id or a unique backend name.
async fn resolve_id(app: &App, key: &str) -> Result<String> {
    let configs = app.registry.configs().await;
    if configs.iter().any(|c| c.id == key) {
        return Ok(key.to_string());
    }
    let mut by_name = configs.iter().filter(|c| c.name == key);
    match (by_name.next(), by_name.next()) {
        (Some(config), None) => Ok(config.id.clone()),
        (Some(_), Some(_)) => Err(SyncError::validation(format!(
            "several backends are named '{}'; use the id",
            key
        ))),
        _ => Err(SyncError::UnknownBackend(key.to_string())),
    }
}
