use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::db::Database;

/// Persisted medium for the serialized history list.
#[async_trait]
pub trait HistoryBlobStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    async fn save(&self, blob: String) -> Result<()>;
}

/// Stores the history blob under a single key of the SQLite key-value table.
pub struct SqliteHistoryBlob {
    db: Database,
    key: String,
}

impl SqliteHistoryBlob {
    pub fn new(db: Database, key: impl Into<String>) -> Self {
        Self {
            db,
            key: key.into(),
        }
    }
}

#[async_trait]
impl HistoryBlobStore for SqliteHistoryBlob {
    async fn load(&self) -> Result<Option<String>> {
        self.db.get_value(&self.key).await
    }

    async fn save(&self, blob: String) -> Result<()> {
        self.db.put_value(&self.key, blob).await
    }
}

/// Process-local blob, used when no database is available and in tests.
#[derive(Default)]
pub struct MemoryHistoryBlob {
    value: Mutex<Option<String>>,
    fail_saves: AtomicBool,
}

impl MemoryHistoryBlob {
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(value.into())),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn value(&self) -> Option<String> {
        self.value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl HistoryBlobStore for MemoryHistoryBlob {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.value())
    }

    async fn save(&self, blob: String) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("history storage unavailable");
        }
        *self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(blob);
        Ok(())
    }
}
