use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::models::{Alert, AlertRule};
use crate::services::file_lock::FileLock;

pub const ALERTS_FILE: &str = "alerts.json";

/// Everything the alert subsystem persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertDocument {
    #[serde(default)]
    pub rules: Vec<AlertRule>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

impl AlertDocument {
    pub fn rule(&self, id: &str) -> Result<&AlertRule> {
        self.rules
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| FleetError::RuleNotFound(id.to_string()))
    }

    pub fn rule_mut(&mut self, id: &str) -> Result<&mut AlertRule> {
        self.rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| FleetError::RuleNotFound(id.to_string()))
    }

    pub fn alert(&self, id: &str) -> Result<&Alert> {
        self.alerts
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| FleetError::AlertNotFound(id.to_string()))
    }

    pub fn alert_mut(&mut self, id: &str) -> Result<&mut Alert> {
        self.alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| FleetError::AlertNotFound(id.to_string()))
    }

    /// Index of the rule's active or acknowledged alert, if any.
    pub fn open_alert_index(&self, rule_id: &str) -> Option<usize> {
        self.alerts
            .iter()
            .position(|a| a.rule_id == rule_id && a.status.is_open())
    }

    pub fn targets_of(&self, rule_id: &str) -> Vec<String> {
        self.rule(rule_id)
            .map(|r| r.notification_targets.clone())
            .unwrap_or_default()
    }
}

/// Persistence for rules and alerts. Several processes may share one store:
/// every read-modify-write holds [`AlertStore::lock`] from `load` to `save`.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn load(&self) -> Result<AlertDocument>;
    async fn save(&self, document: &AlertDocument) -> Result<()>;

    /// Exclusive access across processes, released on drop. Stores private
    /// to one process need none.
    async fn lock(&self) -> Result<Option<FileLock>> {
        Ok(None)
    }
}

/// `alerts.json` in the fleet root, rewritten whole after every mutation.
pub struct JsonAlertStore {
    path: PathBuf,
}

impl JsonAlertStore {
    pub fn new(fleet_root: &Path) -> Self {
        Self {
            path: fleet_root.join(ALERTS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }
}

#[async_trait]
impl AlertStore for JsonAlertStore {
    async fn lock(&self) -> Result<Option<FileLock>> {
        FileLock::acquire(self.lock_path()).await.map(Some)
    }

    async fn load(&self) -> Result<AlertDocument> {
        if !self.path.exists() {
            return Ok(AlertDocument::default());
        }
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| FleetError::State(format!("failed to read alert store: {e}")))?;
        serde_json::from_str(&json)
            .map_err(|e| FleetError::State(format!("corrupt alert store {}: {e}", self.path.display())))
    }

    async fn save(&self, document: &AlertDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FleetError::State(format!("failed to create fleet dir: {e}")))?;
        }
        let json = serde_json::to_string_pretty(document)?;
        // Write beside the target and rename so readers never see half a file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| FleetError::State(format!("failed to write alert store: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| FleetError::State(format!("failed to replace alert store: {e}")))?;
        Ok(())
    }
}

/// Volatile store for tests and one-shot tooling.
#[derive(Default)]
pub struct MemoryAlertStore {
    document: Mutex<AlertDocument>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn load(&self) -> Result<AlertDocument> {
        Ok(self
            .document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn save(&self, document: &AlertDocument) -> Result<()> {
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = document.clone();
        Ok(())
    }
}
