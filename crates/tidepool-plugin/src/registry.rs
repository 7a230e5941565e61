//! Plugin host: every loaded session, keyed by plugin id.
//!
//! Load, reload and unload of one plugin are serialized on a per-id lock, so
//! a second concurrent load waits for the first and then sees its outcome.
//! Calls into sessions never take these locks.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capabilities::{CapabilityRegistry, CapabilitySet};
use crate::diagnostics::{DiagnosticEntry, DEFAULT_DIAGNOSTICS_CAPACITY};
use crate::error::PluginError;
use crate::events::{HostEvent, SessionPhase, SessionSnapshot};
use crate::fault::{Fault, PluginRef};
use crate::manifest::{PluginConfig, PluginDefinition, CONFIG_FILE};
use crate::replies::DEFAULT_REPLY_CAPACITY;
use crate::sandbox::RuntimeFactory;
use crate::session::{PluginSession, SessionContext, SessionOptions, DEFAULT_CALL_TIMEOUT};
use crate::store::{PersistedState, StateStore};

/// Buffered events per subscriber before slow receivers start lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub call_timeout: Duration,
    pub diagnostics_capacity: usize,
    pub reply_capacity: usize,
    pub event_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
            reply_capacity: DEFAULT_REPLY_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl HostConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let call_timeout = std::env::var("PLUGIN_CALL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CALL_TIMEOUT);

        let diagnostics_capacity = std::env::var("PLUGIN_DIAGNOSTICS_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_DIAGNOSTICS_CAPACITY);

        Self {
            call_timeout,
            diagnostics_capacity,
            ..Default::default()
        }
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            call_timeout: self.call_timeout,
            diagnostics_capacity: self.diagnostics_capacity,
            reply_capacity: self.reply_capacity,
        }
    }
}

pub struct PluginHost {
    sessions: RwLock<HashMap<Uuid, PluginSession>>,
    lifecycle: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    capabilities: Arc<CapabilityRegistry>,
    factory: Arc<dyn RuntimeFactory>,
    store: Arc<dyn StateStore>,
    events: broadcast::Sender<HostEvent>,
    config: HostConfig,
}

impl PluginHost {
    pub fn new(
        factory: Arc<dyn RuntimeFactory>,
        store: Arc<dyn StateStore>,
        config: HostConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            sessions: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(HashMap::new()),
            capabilities: Arc::new(CapabilityRegistry::new()),
            factory,
            store,
            events,
            config,
        }
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            capabilities: Arc::clone(&self.capabilities),
            events: self.events.clone(),
            store: Arc::clone(&self.store),
            options: self.config.session_options(),
        }
    }

    fn lifecycle_lock(&self, plugin_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(plugin_id).or_default())
    }

    /// Load a plugin. Loading an id that is already loaded returns the
    /// existing session.
    pub async fn load(&self, definition: PluginDefinition) -> Result<PluginSession, Fault> {
        let config = definition.config().map_err(|e| Fault::config(None, e))?;
        let plugin_id = config.plugin.id;

        let lock = self.lifecycle_lock(plugin_id);
        let _guard = lock.lock().await;

        let existing = self.sessions.read().await.get(&plugin_id).cloned();
        if let Some(session) = existing {
            tracing::debug!(
                plugin_name = %session.plugin().name,
                plugin_id = %plugin_id,
                "plugin already loaded"
            );
            return match session.snapshot() {
                snapshot if snapshot.phase == SessionPhase::Faulted => Err(Fault::Faulted {
                    plugin: session.plugin().clone(),
                    model: Box::new(snapshot.fault.unwrap_or_else(|| {
                        Fault::config(Some(session.plugin()), "session faulted")
                            .to_exception_model()
                    })),
                }),
                _ => Ok(session),
            };
        }

        let saved = match self.store.load(plugin_id).await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(
                    plugin_name = %config.plugin.name,
                    plugin_id = %plugin_id,
                    "could not read saved session state: {e}"
                );
                None
            }
        };
        self.start(config, definition, saved).await
    }

    /// Create, register and initialize a session. A session that fails to
    /// initialize stays registered as `Faulted` so it can be reloaded.
    async fn start(
        &self,
        config: PluginConfig,
        definition: PluginDefinition,
        saved: Option<PersistedState>,
    ) -> Result<PluginSession, Fault> {
        let plugin_id = config.plugin.id;
        let session = PluginSession::new(config, definition, &self.context());
        self.sessions
            .write()
            .await
            .insert(plugin_id, session.clone());

        session.initialize(self.factory.as_ref(), saved).await?;

        tracing::info!(
            plugin_name = %session.plugin().name,
            plugin_id = %plugin_id,
            version = %session.config().plugin.version,
            "plugin loaded"
        );
        Ok(session)
    }

    /// Reload a plugin from the definition it was loaded with.
    pub async fn reload(&self, plugin_id: Uuid) -> Result<PluginSession, Fault> {
        let definition = self.get(plugin_id).await?.definition().clone();
        self.reload_with(plugin_id, definition).await
    }

    /// Replace a plugin's session with one built from `definition`.
    ///
    /// The login flag survives only if the new session's negotiation still
    /// offers login and reports the user as authenticated.
    pub async fn reload_with(
        &self,
        plugin_id: Uuid,
        definition: PluginDefinition,
    ) -> Result<PluginSession, Fault> {
        let config = definition.config().map_err(|e| Fault::config(None, e))?;
        if config.plugin.id != plugin_id {
            let plugin = PluginRef::new(plugin_id, config.plugin.name.clone());
            return Err(Fault::config(
                Some(&plugin),
                format!("definition is for plugin {}", config.plugin.id),
            ));
        }

        let lock = self.lifecycle_lock(plugin_id);
        let _guard = lock.lock().await;

        // The old session stays registered until `start` replaces it, so
        // lookups during the swap see it as not ready rather than missing.
        let previous = self
            .sessions
            .read()
            .await
            .get(&plugin_id)
            .cloned()
            .ok_or(Fault::NotFound(plugin_id))?;
        // A session that never got ready has no live flags; fall back to
        // what was last persisted.
        let saved = match previous.shutdown_with_state().await {
            Some(state) => Some(state),
            None => self.store.load(plugin_id).await.ok().flatten(),
        };

        tracing::info!(
            plugin_name = %config.plugin.name,
            plugin_id = %plugin_id,
            from = %previous.config().plugin.version,
            to = %config.plugin.version,
            "reloading plugin"
        );
        self.start(config, definition, saved).await
    }

    pub async fn unload(&self, plugin_id: Uuid) -> Result<(), Fault> {
        let lock = self.lifecycle_lock(plugin_id);
        let _guard = lock.lock().await;

        let session = self
            .sessions
            .write()
            .await
            .remove(&plugin_id)
            .ok_or(Fault::NotFound(plugin_id))?;
        session.shutdown().await;
        self.capabilities.remove(plugin_id);
        let _ = self.events.send(HostEvent::Unloaded { plugin_id });

        tracing::info!(
            plugin_name = %session.plugin().name,
            plugin_id = %plugin_id,
            "plugin unloaded"
        );
        Ok(())
    }

    /// Unload everything, e.g. on server shutdown.
    pub async fn unload_all(&self) {
        let ids: Vec<Uuid> = self.sessions.read().await.keys().copied().collect();
        for plugin_id in ids {
            if let Err(e) = self.unload(plugin_id).await {
                tracing::debug!(plugin_id = %plugin_id, "unload skipped: {e}");
            }
        }
    }

    pub async fn get(&self, plugin_id: Uuid) -> Result<PluginSession, Fault> {
        self.sessions
            .read()
            .await
            .get(&plugin_id)
            .cloned()
            .ok_or(Fault::NotFound(plugin_id))
    }

    /// Snapshots of every registered session, ordered by name.
    pub async fn list_loaded(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = self
            .sessions
            .read()
            .await
            .values()
            .map(PluginSession::snapshot)
            .collect();
        snapshots.sort_by(|a, b| a.plugin_name.cmp(&b.plugin_name));
        snapshots
    }

    pub async fn loaded_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Compare a published config against the loaded one and flag the
    /// session when the candidate is newer.
    pub async fn check_update(
        &self,
        plugin_id: Uuid,
        candidate: &PluginConfig,
    ) -> Result<bool, Fault> {
        let session = self.get(plugin_id).await?;
        let plugin = session.plugin();
        if candidate.plugin.id != plugin_id {
            return Err(Fault::config(
                Some(plugin),
                format!("candidate config is for plugin {}", candidate.plugin.id),
            ));
        }

        let current = session
            .config()
            .version()
            .map_err(|e| Fault::config(Some(plugin), e))?;
        let offered = candidate
            .version()
            .map_err(|e| Fault::config(Some(plugin), e))?;

        let available = offered > current;
        session.set_update_available(available);
        if available {
            tracing::info!(
                plugin_name = %plugin.name,
                plugin_id = %plugin_id,
                current = %current,
                available = %offered,
                "plugin update available"
            );
        }
        Ok(available)
    }

    pub async fn diagnostics(&self, plugin_id: Uuid) -> Result<Vec<DiagnosticEntry>, Fault> {
        Ok(self.get(plugin_id).await?.diagnostics())
    }

    pub async fn negotiate(
        &self,
        plugin_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<CapabilitySet, Fault> {
        self.get(plugin_id).await?.negotiate(cancel).await
    }

    /// Receive a [`HostEvent`] for every session transition.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    /// Load every plugin directory under `dir` that has a `plugin.toml`.
    ///
    /// Failures are logged per plugin; returns how many reached `Ready`.
    pub async fn load_dir(&self, dir: &Path) -> Result<usize, PluginError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(dir = %dir.display(), "plugin directory does not exist");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut loaded = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.join(CONFIG_FILE).is_file() {
                continue;
            }

            let definition = match PluginDefinition::read_dir(&path).await {
                Ok(definition) => definition,
                Err(e) => {
                    tracing::error!(path = %path.display(), "failed to read plugin: {e}");
                    continue;
                }
            };
            match self.load(definition).await {
                Ok(_) => loaded += 1,
                Err(fault) => {
                    tracing::error!(path = %path.display(), "failed to load plugin: {fault}");
                }
            }
        }

        tracing::info!(dir = %dir.display(), loaded, "plugin directory scanned");
        Ok(loaded)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
