mod cli;
mod database;
mod error;
mod models;
mod services;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands, SettingsAction};
use models::Settings;
use services::activity_store::ActivityStore;
use services::classifier::ChatCompletionClassifier;
use services::dashboard_engine;
use services::native_host::{self, HostContext};
use services::settings_store::SettingsStore;
use utils::config::{self, Paths};
use utils::logging;

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();
    logging::init();

    if cli::launched_by_browser() {
        let paths = Paths::new(config::resolve_data_dir(None));
        return run_host(&paths).await;
    }

    let cli = Cli::parse();
    let paths = Paths::new(config::resolve_data_dir(cli.data_dir));

    match cli.command {
        Commands::Host => run_host(&paths).await,
        command => run_command(&paths, command).await,
    }
}

/// One-shot CLI commands. Verbosity follows the stored `debug` setting, as it
/// does in the host.
async fn run_command(paths: &Paths, command: Commands) -> Result<()> {
    let settings_store = SettingsStore::open(paths.settings_file())?;
    logging::apply_debug_flag(settings_store.current().debug);

    match command {
        Commands::Host => run_host(paths).await,
        Commands::Install => {
            ActivityStore::open(paths.database_file())?;
            println!("Settings written to {}", settings_store.path().display());
            println!("Activity database at {}", paths.database_file().display());
            Ok(())
        }
        Commands::Settings { action } => {
            let settings = match action {
                SettingsAction::Show => settings_store.current(),
                SettingsAction::Set { key, value } => settings_store.set_field(&key, &value)?,
            };
            println!("{}", serde_json::to_string_pretty(&masked(settings))?);
            Ok(())
        }
        Commands::Dashboard { json } => {
            let store = ActivityStore::open(paths.database_file())?;
            let tables = dashboard_engine::render(&store.snapshot().await?);
            if json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                print!("{}", dashboard_engine::render_text(&tables));
            }
            Ok(())
        }
        Commands::Analyze { site } => {
            let settings = settings_store.current();
            let store = ActivityStore::open(paths.database_file())?;
            let classifier = ChatCompletionClassifier::default();
            let rows =
                dashboard_engine::analyze_site(&classifier, &settings, &store.snapshot().await?, &site)
                    .await
                    .with_context(|| format!("analysis of {} failed", site))?;
            print!(
                "{}",
                dashboard_engine::render_table(
                    &format!("Sensitive actions on {}", site),
                    &["Action", "Reason"],
                    rows.into_iter().map(|r| vec![r.action, r.reason]).collect(),
                )
            );
            Ok(())
        }
        Commands::Export { output } => {
            let store = ActivityStore::open(paths.database_file())?;
            let dir = output.unwrap_or_else(|| paths.export_dir());
            let path = store.export(&dir).await?;
            println!("Exported to {}", path.display());
            Ok(())
        }
        Commands::Stats => {
            let store = ActivityStore::open(paths.database_file())?;
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}

async fn run_host(paths: &Paths) -> Result<()> {
    let ctx = HostContext {
        settings: SettingsStore::open(paths.settings_file())?,
        store: ActivityStore::open(paths.database_file())?,
        classifier: Arc::new(ChatCompletionClassifier::default()),
    };
    native_host::run_host(tokio::io::stdin(), tokio::io::stdout(), ctx).await
}

fn masked(mut settings: Settings) -> Settings {
    let chars: Vec<char> = settings.api_token.trim().chars().collect();
    if !chars.is_empty() {
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        settings.api_token = format!("****{}", tail);
    }
    settings
}
