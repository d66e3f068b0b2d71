mod blob;

pub use blob::{HistoryBlobStore, MemoryHistoryBlob, SqliteHistoryBlob};

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::Mutex;

use crate::models::SessionRecord;

pub const HISTORY_KEY: &str = "focus-session-history";
pub const MAX_HISTORY: usize = 50;
const TREND_WINDOW: usize = 7;

/// Completed sessions, most recent first, bounded to `limit` entries.
///
/// The in-memory list is authoritative for the lifetime of the process; the
/// blob store is only written to, never re-read after `load`.
#[derive(Clone)]
pub struct HistoryStore {
    records: Arc<Mutex<Vec<SessionRecord>>>,
    blob: Arc<dyn HistoryBlobStore>,
    limit: usize,
}

impl HistoryStore {
    /// Reads the persisted history. Missing or corrupt data yields an empty
    /// history rather than an error.
    pub async fn load(blob: Arc<dyn HistoryBlobStore>, limit: usize) -> Self {
        let limit = limit.max(1);
        let mut records = match blob.load().await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<SessionRecord>>(&raw) {
                Ok(records) => records,
                Err(err) => {
                    warn!("Could not parse stored session history, starting empty: {err}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("Could not load session history, starting empty: {err:#}");
                Vec::new()
            }
        };
        records.truncate(limit);
        info!("Loaded {} session(s) from history", records.len());

        Self {
            records: Arc::new(Mutex::new(records)),
            blob,
            limit,
        }
    }

    /// Prepends `record`, evicts the oldest entries beyond the limit and
    /// persists the result. A failed write is logged and otherwise ignored.
    pub async fn add(&self, record: SessionRecord) {
        // Held across the write so concurrent adds cannot persist stale lists.
        let mut records = self.records.lock().await;
        records.insert(0, record);
        records.truncate(self.limit);

        match serde_json::to_string(&*records) {
            Ok(serialized) => {
                if let Err(err) = self.blob.save(serialized).await {
                    warn!("Could not save session history: {err:#}");
                }
            }
            Err(err) => warn!("Could not serialize session history: {err}"),
        }
    }

    pub async fn sessions(&self) -> Vec<SessionRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn latest(&self) -> Option<SessionRecord> {
        self.records.lock().await.first().cloned()
    }

    /// Focus percentages of the last seven sessions, oldest first. Empty when
    /// fewer than two sessions exist, since a single point is not a trend.
    pub async fn focus_trend(&self) -> Vec<f64> {
        let records = self.records.lock().await;
        if records.len() < 2 {
            return Vec::new();
        }
        records
            .iter()
            .take(TREND_WINDOW)
            .rev()
            .map(|record| record.focus_percentage)
            .collect()
    }
}
