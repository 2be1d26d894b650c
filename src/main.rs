//! screenguard CLI
//!
//! On-device content-safety screening with a durable, synced event log.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;

use screenguard::classifier::{classify_within, prepare_frame, ClassifierInput};
use screenguard::models::FrameSample;
use screenguard::reports::weekly_digest;
use screenguard::settings::default_settings_path;
use screenguard::utils::{init_logging, install_panic_hook};
use screenguard::AppState;

#[derive(Parser)]
#[command(name = "screenguard")]
#[command(version)]
#[command(about = "Screen and notification content-safety guard", long_about = None)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, env = "SCREENGUARD_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the screening pipeline until interrupted
    Run,

    /// Push pending detections to the remote store now
    Sync,

    /// Show local buffer state
    Status,

    /// Aggregate the last seven days of synced detections for a child
    Digest {
        /// Child to report on (defaults to the configured child id)
        #[arg(long)]
        child_id: Option<String>,

        /// Display name used in the report text
        #[arg(long, default_value = "Child Device")]
        child_name: String,

        /// Print the plain-text listing instead of JSON
        #[arg(long)]
        text: bool,
    },

    /// Classify a single image file or message and print the verdict
    Classify {
        /// Image file to classify
        #[arg(long, conflicts_with = "message")]
        image: Option<PathBuf>,

        /// Message body to classify
        #[arg(long)]
        message: Option<String>,

        /// Sender shown to the classifier with --message
        #[arg(long, default_value = "Unknown")]
        sender: String,
    },

    /// Show configuration, optionally updating the child id
    Config {
        #[arg(long)]
        set_child_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    init_logging();
    install_panic_hook();

    let cli = Cli::parse();
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);

    let result = match cli.command {
        Commands::Run => cmd_run(settings_path).await,
        Commands::Sync => cmd_sync(settings_path).await,
        Commands::Status => cmd_status(settings_path).await,
        Commands::Digest {
            child_id,
            child_name,
            text,
        } => cmd_digest(settings_path, child_id, &child_name, text).await,
        Commands::Classify {
            image,
            message,
            sender,
        } => cmd_classify(settings_path, image, message, sender).await,
        Commands::Config { set_child_id } => cmd_config(settings_path, set_child_id),
    };

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn cmd_run(settings_path: PathBuf) -> Result<()> {
    let state = AppState::open(settings_path)?;
    screenguard::run(&state, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    })
    .await
}

async fn cmd_sync(settings_path: PathBuf) -> Result<()> {
    let state = AppState::open(settings_path)?;
    let Some(engine) = state.sync_engine() else {
        bail!("no sync endpoint configured");
    };
    let report = engine.drain().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_status(settings_path: PathBuf) -> Result<()> {
    let state = AppState::open(settings_path)?;
    let status = json!({
        "settingsPath": state.settings_store.path(),
        "databasePath": state.db.path(),
        "childId": state.settings.child_id,
        "syncEndpoint": state.settings.sync.endpoint,
        "pending": state.db.count().await?,
        "quarantined": state.db.quarantined_count().await?,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_digest(
    settings_path: PathBuf,
    child_id: Option<String>,
    child_name: &str,
    text: bool,
) -> Result<()> {
    let state = AppState::open(settings_path)?;
    let Some(store) = state.store.clone() else {
        bail!("no sync endpoint configured");
    };
    let child_id = child_id.unwrap_or_else(|| state.settings.child_id.clone());
    if child_id.is_empty() {
        bail!("no child id given");
    }

    let digest = weekly_digest(store.as_ref(), &child_id, child_name, Utc::now()).await?;
    if text {
        print!("{}", digest.to_prompt_context());
    } else {
        println!("{}", serde_json::to_string_pretty(&digest)?);
    }
    Ok(())
}

async fn cmd_classify(
    settings_path: PathBuf,
    image_path: Option<PathBuf>,
    message: Option<String>,
    sender: String,
) -> Result<()> {
    let state = AppState::open(settings_path)?;
    let classifier = state.classifier()?;

    let input = match (image_path, message) {
        (Some(path), _) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let max_width = state.settings.capture.max_width;
            let prepared = tokio::task::spawn_blocking(move || {
                let pixels = image::load_from_memory(&bytes)?.into_rgba8();
                prepare_frame(FrameSample::new(pixels, Utc::now()), max_width)
            })
            .await
            .context("image worker failed")??;
            ClassifierInput::Image { png: prepared.png }
        }
        (None, Some(body)) => ClassifierInput::Text { sender, body },
        (None, None) => bail!("pass --image or --message"),
    };

    let verdict = classify_within(
        classifier.as_ref(),
        input,
        state.settings.classifier_timeout(),
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

fn cmd_config(settings_path: PathBuf, set_child_id: Option<String>) -> Result<()> {
    let store = screenguard::settings::SettingsStore::new(settings_path)?;
    let mut settings = match set_child_id {
        Some(child_id) => store.update(|settings| settings.child_id = child_id)?,
        None => store.snapshot(),
    };
    if settings.classifier.api_key.is_some() {
        settings.classifier.api_key = Some("********".into());
    }
    if settings.sync.token.is_some() {
        settings.sync.token = Some("********".into());
    }
    println!("# {}", store.path().display());
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
