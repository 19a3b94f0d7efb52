//! Maintenance switch persisted as `maintenance.json` under the runtime dir.
//!
//! `version` increases each time `on` flips so clients can detect changes by
//! polling. A missing or unreadable file reads as "off".

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceState {
    pub on: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl MaintenanceState {
    fn off(now: DateTime<Utc>) -> Self {
        Self {
            on: false,
            message: String::new(),
            version: 0,
            updated_at: now,
        }
    }

    /// Apply an update; an absent field keeps its current value.
    pub fn apply(&self, on: Option<bool>, message: Option<String>, now: DateTime<Utc>) -> Self {
        let next_on = on.unwrap_or(self.on);
        Self {
            on: next_on,
            message: message.unwrap_or_else(|| self.message.clone()),
            version: if next_on != self.on { self.version + 1 } else { self.version },
            updated_at: now,
        }
    }
}

#[derive(Debug)]
pub struct MaintenanceStore {
    path: PathBuf,
    // Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl MaintenanceStore {
    pub fn new(runtime_dir: impl AsRef<Path>) -> Self {
        Self {
            path: runtime_dir.as_ref().join("maintenance.json"),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn get(&self) -> MaintenanceState {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %self.path.display(), "unreadable maintenance state");
                MaintenanceState::off(Utc::now())
            }),
            Err(_) => MaintenanceState::off(Utc::now()),
        }
    }

    pub async fn set(&self, on: Option<bool>, message: Option<String>) -> anyhow::Result<MaintenanceState> {
        let _guard = self.write_lock.lock().await;
        let next = self.get().await.apply(on, message, Utc::now());
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(&next)?).await?;
        tracing::info!(on = next.on, version = next.version, "maintenance state updated");
        Ok(next)
    }
}
