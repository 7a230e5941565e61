//! Persisted per-plugin session state.
//!
//! Only flags and the last negotiated capability set survive a restart;
//! pagers and sessions never do.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::capabilities::CapabilitySet;
use crate::error::PluginError;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub captcha_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilitySet>,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, plugin_id: Uuid) -> Result<Option<PersistedState>, PluginError>;

    async fn save(&self, plugin_id: Uuid, state: &PersistedState) -> Result<(), PluginError>;

    async fn remove(&self, plugin_id: Uuid) -> Result<(), PluginError>;
}

// ─── In-memory store ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<Uuid, PersistedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, plugin_id: Uuid) -> Result<Option<PersistedState>, PluginError> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(&plugin_id).cloned())
    }

    async fn save(&self, plugin_id: Uuid, state: &PersistedState) -> Result<(), PluginError> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.insert(plugin_id, state.clone());
        Ok(())
    }

    async fn remove(&self, plugin_id: Uuid) -> Result<(), PluginError> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.remove(&plugin_id);
        Ok(())
    }
}

// ─── JSON file store ────────────────────────────────────────────────────

/// All plugins' state in one JSON document, rewritten atomically.
#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<Uuid, PersistedState>, PluginError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| PluginError::Store(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, states: &HashMap<Uuid, PersistedState>) -> Result<(), PluginError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(states)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn load(&self, plugin_id: Uuid) -> Result<Option<PersistedState>, PluginError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(&plugin_id))
    }

    async fn save(&self, plugin_id: Uuid, state: &PersistedState) -> Result<(), PluginError> {
        let _guard = self.lock.lock().await;
        let mut states = self.read_all().await?;
        states.insert(plugin_id, state.clone());
        self.write_all(&states).await
    }

    async fn remove(&self, plugin_id: Uuid) -> Result<(), PluginError> {
        let _guard = self.lock.lock().await;
        let mut states = self.read_all().await?;
        if states.remove(&plugin_id).is_some() {
            self.write_all(&states).await?;
        }
        Ok(())
    }
}
