pub mod db;
pub mod error;
pub mod feedback;
pub mod history;
pub mod inference;
pub mod models;
pub mod sensing;
pub mod session;
pub mod settings;
pub mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use db::Database;
use feedback::{MessagePicker, RodioPlayer};
use history::{HistoryStore, SqliteHistoryBlob, HISTORY_KEY};
use inference::GeminiClient;
use sensing::FileFrameSource;
use session::{Collaborators, SessionController, SessionEvent};
use settings::{api_key_from_env, SettingsStore};
use utils::time::format_elapsed;

const DATA_DIR_VAR: &str = "FOCUSCOACH_DATA_DIR";
const FRAME_PATH_VAR: &str = "FOCUSCOACH_FRAME_PATH";
const DEFAULT_DATA_DIR: &str = "focuscoach-data";
const DEFAULT_FRAME_FILE: &str = "frame.jpg";

/// Runs one headless focus session until Ctrl-C, then prints its record.
pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("FocusCoach starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run_session())
}

async fn run_session() -> Result<()> {
    let data_dir = std::env::var_os(DATA_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;
    let settings = settings_store.current().with_env_overrides();

    let database = Database::new(data_dir.join("focuscoach.sqlite3"))?;
    let blob = Arc::new(SqliteHistoryBlob::new(database, HISTORY_KEY));
    let history = HistoryStore::load(blob, settings.history_limit).await;

    let gemini = Arc::new(GeminiClient::new(&settings, api_key_from_env())?);
    let frame_path = std::env::var_os(FRAME_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join(DEFAULT_FRAME_FILE));
    info!("Reading camera frames from {}", frame_path.display());
    // A frame older than two analysis periods means the camera feed stalled.
    let frames = FileFrameSource::new(frame_path).with_max_age(settings.analysis_interval() * 2);

    let controller = SessionController::new(
        Collaborators {
            frames: Arc::new(frames),
            posture: gemini.clone(),
            speech: gemini.clone(),
            player: Arc::new(RodioPlayer::new(settings.feedback_volume)),
            summarizer: gemini,
        },
        history,
        &settings,
        MessagePicker::from_entropy(),
    );

    let mut events = controller.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Tick { elapsed_secs }) if elapsed_secs % 60 == 0 => {
                    info!("Elapsed {}", format_elapsed(elapsed_secs));
                }
                Ok(SessionEvent::StateChanged { phase, status }) => {
                    info!("Session {phase:?}: {status}");
                }
                Ok(SessionEvent::SessionFailed { message }) => warn!("{message}"),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    controller.start().await?;
    info!("Press Ctrl-C to end the session");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    let outcome = controller.stop().await;
    controller.shutdown().await;
    reporter.abort();

    match outcome? {
        Some(record) => {
            let trend = controller.history().focus_trend().await;
            info!("Session record: {}", serde_json::to_string_pretty(&record)?);
            if !trend.is_empty() {
                info!("Focus trend (oldest first): {trend:?}");
            }
        }
        None => warn!("Session had already ended before Ctrl-C"),
    }

    Ok(())
}
