//! A loaded plugin: its runtime, flags and capability view.
//!
//! Calls into one session are queued FIFO on a single call slot and never
//! overlap. The slot is held across a whole operation, so a login that
//! re-negotiates capabilities cannot interleave with a search.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{broadcast, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capabilities::{
    Capability, CapabilityRegistry, CapabilitySet, Negotiation, QueryFilters, SearchQuery,
};
use crate::content::{CommentEntry, ContentItem, Rating, ReferenceComment, ReferenceId};
use crate::diagnostics::{CallOutcome, DiagnosticEntry, DiagnosticLog, DEFAULT_DIAGNOSTICS_CAPACITY};
use crate::error::PluginError;
use crate::events::{HostEvent, SessionPhase, SessionSnapshot};
use crate::fault::{ExceptionModel, Fault, PluginRef, ScriptErrorKind, ScriptFault};
use crate::host_functions::{process_host_requests, HostContext, PluginEnvelope};
use crate::manifest::{PluginConfig, PluginDefinition};
use crate::pager::{BoxPager, Page, PageFetcher, Pager, ReferencePager, SourcePager};
use crate::replies::{ReplyTable, DEFAULT_REPLY_CAPACITY};
use crate::sandbox::{Interrupter, RuntimeFactory, ScriptRuntime};
use crate::store::{PersistedState, StateStore};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub call_timeout: Duration,
    pub diagnostics_capacity: usize,
    pub reply_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
            reply_capacity: DEFAULT_REPLY_CAPACITY,
        }
    }
}

/// Host services a session reports to.
#[derive(Clone)]
pub struct SessionContext {
    pub capabilities: Arc<CapabilityRegistry>,
    pub events: broadcast::Sender<HostEvent>,
    pub store: Arc<dyn StateStore>,
    pub options: SessionOptions,
}

#[derive(Debug, Clone, Copy, Default)]
struct Exports {
    enable: bool,
    disable: bool,
    get_capabilities: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Flags {
    logged_in: bool,
    captcha_required: bool,
}

#[derive(Debug, Clone)]
struct SessionState {
    phase: SessionPhase,
    flags: Flags,
    update_available: bool,
    fault: Option<ExceptionModel>,
    exports: Exports,
}

type SharedRuntime = Arc<Mutex<Option<Box<dyn ScriptRuntime>>>>;
type Slot<'a> = MutexGuard<'a, ()>;
type Translate<T> = fn(&PluginRef, Value) -> Result<T, Fault>;

struct SessionCore {
    plugin: PluginRef,
    config: PluginConfig,
    definition: PluginDefinition,
    runtime: SharedRuntime,
    interrupter: Mutex<Option<Interrupter>>,
    slot: tokio::sync::Mutex<()>,
    state: RwLock<SessionState>,
    capabilities: Arc<CapabilityRegistry>,
    diagnostics: DiagnosticLog,
    replies: Arc<ReplyTable>,
    events: broadcast::Sender<HostEvent>,
    store: Arc<dyn StateStore>,
    call_timeout: Duration,
}

/// Handle to one plugin session. Clones share the session.
#[derive(Clone)]
pub struct PluginSession {
    core: Arc<SessionCore>,
}

impl std::fmt::Debug for PluginSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSession")
            .field("plugin", &self.core.plugin)
            .field("phase", &self.phase())
            .finish()
    }
}

impl PluginSession {
    /// New unloaded session. Registers the declared capability set.
    pub fn new(config: PluginConfig, definition: PluginDefinition, ctx: &SessionContext) -> Self {
        let plugin = PluginRef::new(config.plugin.id, config.plugin.name.clone());
        ctx.capabilities
            .declare(plugin.id, config.declared_capabilities());

        let core = SessionCore {
            plugin,
            config,
            definition,
            runtime: Arc::new(Mutex::new(None)),
            interrupter: Mutex::new(None),
            slot: tokio::sync::Mutex::new(()),
            state: RwLock::new(SessionState {
                phase: SessionPhase::Unloaded,
                flags: Flags {
                    logged_in: false,
                    captcha_required: false,
                },
                update_available: false,
                fault: None,
                exports: Exports::default(),
            }),
            capabilities: Arc::clone(&ctx.capabilities),
            diagnostics: DiagnosticLog::new(ctx.options.diagnostics_capacity),
            replies: Arc::new(ReplyTable::new(ctx.options.reply_capacity)),
            events: ctx.events.clone(),
            store: Arc::clone(&ctx.store),
            call_timeout: ctx.options.call_timeout,
        };
        Self {
            core: Arc::new(core),
        }
    }

    pub fn id(&self) -> Uuid {
        self.core.plugin.id
    }

    pub fn plugin(&self) -> &PluginRef {
        &self.core.plugin
    }

    pub fn config(&self) -> &PluginConfig {
        &self.core.config
    }

    pub fn definition(&self) -> &PluginDefinition {
        &self.core.definition
    }

    pub fn phase(&self) -> SessionPhase {
        self.with_state(|s| s.phase)
    }

    pub fn is_logged_in(&self) -> bool {
        self.with_state(|s| s.flags.logged_in)
    }

    pub fn is_captcha_required(&self) -> bool {
        self.with_state(|s| s.flags.captcha_required)
    }

    pub fn is_update_available(&self) -> bool {
        self.with_state(|s| s.update_available)
    }

    pub fn diagnostics(&self) -> Vec<DiagnosticEntry> {
        self.core.diagnostics.snapshot()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let id = self.id();
        let declared = self
            .core
            .capabilities
            .declared(id)
            .unwrap_or_else(|| self.core.config.declared_capabilities());
        let negotiated = self.core.capabilities.negotiated(id);
        self.with_state(|s| SessionSnapshot {
            plugin_id: id,
            plugin_name: self.core.plugin.name.clone(),
            version: self.core.config.plugin.version.clone(),
            phase: s.phase,
            logged_in: s.flags.logged_in,
            captcha_required: s.flags.captcha_required,
            update_available: s.update_available,
            declared,
            negotiated,
            fault: s.fault.clone(),
            at: Utc::now(),
        })
    }

    pub fn set_update_available(&self, available: bool) {
        let changed = self.update_state(|s| {
            std::mem::replace(&mut s.update_available, available) != available
        });
        if changed {
            self.publish();
        }
    }

    // ── State helpers ────────────────────────────────────────────────

    fn with_state<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let state = self.core.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn update_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.core.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn publish(&self) {
        // No subscribers is fine.
        let _ = self.core.events.send(HostEvent::StateChanged(self.snapshot()));
    }

    fn transition(&self, next: SessionPhase) {
        let previous = self.update_state(|s| std::mem::replace(&mut s.phase, next));
        if !previous.can_transition_to(next) {
            tracing::warn!(
                plugin = %self.core.plugin.name,
                plugin_id = %self.core.plugin.id,
                from = ?previous,
                to = ?next,
                "unexpected session phase transition"
            );
        }
        tracing::debug!(
            plugin = %self.core.plugin.name,
            from = ?previous,
            to = ?next,
            "session phase changed"
        );
        self.publish();
    }

    /// Move to `Faulted`, keeping the fault's model for later callers.
    fn fail(&self, fault: Fault) -> Fault {
        let model = fault.to_exception_model();
        tracing::error!(
            plugin = %self.core.plugin.name,
            plugin_id = %self.core.plugin.id,
            "plugin session faulted: {fault}"
        );
        self.update_state(|s| s.fault = Some(model));
        self.transition(SessionPhase::Faulted);
        let _ = self.release_runtime();
        fault
    }

    async fn persist(&self) {
        self.save_state(self.core.capabilities.negotiated(self.id()))
            .await;
    }

    async fn save_state(&self, capabilities: Option<CapabilitySet>) {
        let state = PersistedState {
            logged_in: self.is_logged_in(),
            captcha_required: self.is_captcha_required(),
            capabilities,
        };
        if let Err(e) = self.core.store.save(self.id(), &state).await {
            tracing::warn!(
                plugin = %self.core.plugin.name,
                plugin_id = %self.core.plugin.id,
                "failed to persist session state: {e}"
            );
        }
    }

    /// Drop the runtime on a blocking thread; a call still running there
    /// finishes first.
    fn release_runtime(&self) -> tokio::task::JoinHandle<()> {
        let runtime = Arc::clone(&self.core.runtime);
        *self
            .core
            .interrupter
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        tokio::task::spawn_blocking(move || {
            let taken = runtime.lock().unwrap_or_else(PoisonError::into_inner).take();
            drop(taken);
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Build the runtime, enable it with `saved` state and negotiate.
    ///
    /// Any failure leaves the session `Faulted`.
    pub async fn initialize(
        &self,
        factory: &dyn RuntimeFactory,
        saved: Option<PersistedState>,
    ) -> Result<(), Fault> {
        let slot = self.core.slot.lock().await;
        let plugin = &self.core.plugin;
        if self.phase() != SessionPhase::Unloaded {
            return Err(Fault::config(Some(plugin), "session was already initialized"));
        }
        self.transition(SessionPhase::Loading);

        let saved = saved.unwrap_or_default();
        let saved_flags = Flags {
            logged_in: saved.logged_in,
            captcha_required: saved.captcha_required,
        };

        let runtime = match factory.build(&self.core.config, &self.core.definition) {
            Ok(runtime) => runtime,
            Err(e) => return Err(self.fail(Fault::config(Some(plugin), e))),
        };
        let exports = Exports {
            enable: runtime.has_function("enable"),
            disable: runtime.has_function("disable"),
            get_capabilities: runtime.has_function("get_capabilities"),
        };
        *self
            .core
            .interrupter
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = runtime.interrupter();
        *self
            .core
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(runtime);
        self.update_state(|s| s.exports = exports);
        self.transition(SessionPhase::Initialized);

        let cancel = CancellationToken::new();
        if exports.enable {
            let input = json!({
                "plugin_id": plugin.id,
                "logged_in": saved.logged_in,
                "captcha_required": saved.captcha_required,
                "capabilities": saved.capabilities,
            });
            if let Err(fault) = self.execute(&slot, "enable", input, &cancel).await {
                return Err(self.fail(fault));
            }
        }

        let negotiation = match self.negotiate_locked(&slot, saved_flags, &cancel).await {
            Ok(n) => n,
            Err(fault) => return Err(self.fail(fault)),
        };
        let flags = Flags {
            logged_in: saved.logged_in
                && negotiation.authenticated
                && negotiation.capabilities.supports(Capability::Login),
            captcha_required: saved.captcha_required,
        };
        self.commit(negotiation, flags, false).await;
        self.update_state(|s| s.fault = None);
        self.transition(SessionPhase::Ready);

        tracing::info!(
            plugin_name = %plugin.name,
            plugin_id = %plugin.id,
            version = %self.core.config.plugin.version,
            logged_in = flags.logged_in,
            "plugin session ready"
        );
        drop(slot);
        Ok(())
    }

    /// Disable the plugin (best effort) and release its runtime.
    pub async fn shutdown(&self) {
        self.shutdown_with_state().await;
    }

    /// Shut down, returning the flags and negotiated set of a ready session
    /// as they stood once the last queued call had finished.
    pub(crate) async fn shutdown_with_state(&self) -> Option<PersistedState> {
        let slot = self.core.slot.lock().await;
        let (phase, exports, flags) = self.with_state(|s| (s.phase, s.exports, s.flags));
        if phase == SessionPhase::Unloaded {
            return None;
        }
        let state = (phase == SessionPhase::Ready).then(|| PersistedState {
            logged_in: flags.logged_in,
            captcha_required: flags.captcha_required,
            capabilities: self.core.capabilities.negotiated(self.id()),
        });

        if exports.disable && matches!(phase, SessionPhase::Ready | SessionPhase::Initialized) {
            let cancel = CancellationToken::new();
            if let Err(fault) = self.execute(&slot, "disable", Value::Null, &cancel).await {
                tracing::warn!(
                    plugin = %self.core.plugin.name,
                    plugin_id = %self.core.plugin.id,
                    "disable failed during unload: {fault}"
                );
            }
        }

        if tokio::time::timeout(self.core.call_timeout, self.release_runtime())
            .await
            .is_err()
        {
            tracing::warn!(
                plugin = %self.core.plugin.name,
                "runtime still busy at unload; releasing in the background"
            );
        }
        self.transition(SessionPhase::Unloaded);
        tracing::info!(
            plugin_name = %self.core.plugin.name,
            plugin_id = %self.core.plugin.id,
            "plugin session unloaded"
        );
        drop(slot);
        state
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    async fn acquire(&self, cancel: &CancellationToken) -> Result<Slot<'_>, Fault> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Fault::Cancelled),
            slot = self.core.slot.lock() => Ok(slot),
        }
    }

    fn ensure_ready(&self) -> Result<(), Fault> {
        let plugin = &self.core.plugin;
        self.with_state(|s| match s.phase {
            SessionPhase::Ready => Ok(()),
            SessionPhase::Faulted => {
                let model = s.fault.clone().unwrap_or_else(|| {
                    Fault::config(Some(plugin), "session faulted").to_exception_model()
                });
                Err(Fault::Faulted {
                    plugin: plugin.clone(),
                    model: Box::new(model),
                })
            }
            phase => Err(Fault::NotReady {
                plugin: plugin.clone(),
                phase,
            }),
        })
    }

    fn capability_fault(&self, capability: Capability, reason: impl Into<String>) -> Fault {
        Fault::Capability {
            plugin: self.core.plugin.clone(),
            operation: capability.to_string(),
            reason: reason.into(),
        }
    }

    fn check_capability(
        &self,
        capability: Capability,
        query: Option<&SearchQuery>,
    ) -> Result<(), Fault> {
        let id = self.id();
        if !self.core.capabilities.check(id, capability) {
            tracing::debug!(
                plugin = %self.core.plugin.name,
                capability = %capability,
                "call rejected by capability check"
            );
            return Err(self.capability_fault(capability, "not in the negotiated capability set"));
        }
        if let Some(query) = query {
            let negotiated = self.core.capabilities.negotiated(id).unwrap_or_default();
            negotiated
                .validate_query(capability, query)
                .map_err(|reason| self.capability_fault(capability, reason))?;
        }
        Ok(())
    }

    /// Gated dispatch: queue on the slot, check readiness and capability,
    /// then call into the runtime.
    async fn call(
        &self,
        capability: Capability,
        function: &str,
        input: Value,
        query: Option<&SearchQuery>,
        cancel: &CancellationToken,
    ) -> Result<Value, Fault> {
        let slot = self.acquire(cancel).await?;
        self.ensure_ready()?;
        self.check_capability(capability, query)?;
        self.execute(&slot, function, input, cancel).await
    }

    /// Run one export while holding the call slot. A script fault that
    /// flips a session flag re-negotiates before the slot is released.
    async fn execute(
        &self,
        slot: &Slot<'_>,
        function: &str,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, Fault> {
        let result = self.invoke(slot, function, input, cancel).await;
        if let Err(Fault::Script(fault)) = &result {
            self.settle_script_fault(slot, fault).await;
        }
        result
    }

    /// Run one export and log the outcome, leaving flags alone.
    async fn invoke(
        &self,
        _slot: &Slot<'_>,
        function: &str,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, Fault> {
        let plugin = &self.core.plugin;
        let started = Instant::now();
        let result = self.run(function, input, cancel).await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match &result {
            Ok(_) => {
                self.core
                    .diagnostics
                    .record_call(function, CallOutcome::Ok, elapsed, "");
                tracing::debug!(
                    plugin = %plugin.name,
                    plugin_id = %plugin.id,
                    operation = %function,
                    elapsed_ms,
                    "plugin call finished"
                );
            }
            Err(Fault::Cancelled) => {
                self.core
                    .diagnostics
                    .record_call(function, CallOutcome::Cancelled, elapsed, "cancelled");
                tracing::debug!(
                    plugin = %plugin.name,
                    plugin_id = %plugin.id,
                    operation = %function,
                    elapsed_ms,
                    "plugin call cancelled"
                );
            }
            Err(fault) => {
                let outcome = match fault {
                    Fault::Timeout { .. } => CallOutcome::Timeout,
                    _ => CallOutcome::Fault,
                };
                self.core
                    .diagnostics
                    .record_call(function, outcome, elapsed, fault.to_string());
                tracing::warn!(
                    plugin = %plugin.name,
                    plugin_id = %plugin.id,
                    operation = %function,
                    elapsed_ms,
                    "plugin call failed: {fault}"
                );
            }
        }
        result
    }

    async fn run(
        &self,
        function: &str,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, Fault> {
        let plugin = &self.core.plugin;
        if cancel.is_cancelled() {
            return Err(Fault::Cancelled);
        }

        let bytes = serde_json::to_vec(&input)
            .map_err(|e| Fault::runtime(plugin, &PluginError::from(e)))?;
        let runtime = Arc::clone(&self.core.runtime);
        let name = function.to_string();
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = runtime.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_mut() {
                Some(runtime) => runtime.call(&name, &bytes),
                None => Err(PluginError::Sandbox("plugin runtime is not loaded".into())),
            }
        });

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Fault::Cancelled),
            joined = tokio::time::timeout(self.core.call_timeout, task) => match joined {
                Err(_) => {
                    self.interrupt();
                    Err(Fault::Timeout {
                        plugin: plugin.clone(),
                        operation: function.to_string(),
                        after: self.core.call_timeout,
                    })
                }
                Ok(Err(join_err)) => Err(Fault::Runtime {
                    plugin: plugin.clone(),
                    message: format!("plugin call aborted: {join_err}"),
                    retryable: false,
                }),
                Ok(Ok(result)) => result.map_err(|e| Fault::runtime(plugin, &e)),
            },
        }?;

        let PluginEnvelope {
            ok,
            error,
            host_requests,
        } = PluginEnvelope::decode(&output).map_err(|e| Fault::runtime(plugin, &e))?;
        {
            let ctx = HostContext::new(plugin, function, &self.core.diagnostics);
            process_host_requests(&ctx, host_requests);
        }

        match error {
            None => Ok(ok),
            Some(err) => {
                Err(Fault::Script(ScriptFault::from_script_error(plugin, err)))
            }
        }
    }

    fn interrupt(&self) {
        let interrupter = self
            .core
            .interrupter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(interrupt) = interrupter {
            interrupt();
        }
    }

    /// Flag changes a plugin signals by failing a call. The capability set
    /// is re-negotiated for the new flags under the caller's slot.
    async fn settle_script_fault(&self, slot: &Slot<'_>, fault: &ScriptFault) {
        if self.phase() != SessionPhase::Ready {
            return;
        }
        let mut flags = self.with_state(|s| s.flags);
        match fault.kind {
            ScriptErrorKind::CaptchaRequired => flags.captcha_required = true,
            ScriptErrorKind::LoginRequired => flags.logged_in = false,
            _ => return,
        }
        if flags == self.with_state(|s| s.flags) {
            return;
        }

        let plugin = &self.core.plugin;
        tracing::info!(
            plugin = %plugin.name,
            plugin_id = %plugin.id,
            kind = %fault.kind.type_name(),
            logged_in = flags.logged_in,
            captcha_required = flags.captcha_required,
            "plugin changed session flags"
        );

        // The caller may already be cancelled; the sync still has to run.
        let cancel = CancellationToken::new();
        match self.negotiate_locked(slot, flags, &cancel).await {
            Ok(negotiation) => self.commit(negotiation, flags, true).await,
            Err(e) => {
                tracing::warn!(
                    plugin = %plugin.name,
                    plugin_id = %plugin.id,
                    "re-negotiation after flag change failed: {e}"
                );
                self.update_state(|s| s.flags = flags);
                self.publish();
                self.save_state(None).await;
            }
        }
    }

    // ── Negotiation ──────────────────────────────────────────────────

    async fn negotiate_locked(
        &self,
        slot: &Slot<'_>,
        flags: Flags,
        cancel: &CancellationToken,
    ) -> Result<Negotiation, Fault> {
        let exports = self.with_state(|s| s.exports);
        if !exports.get_capabilities {
            return Ok(Negotiation {
                capabilities: self.core.config.declared_capabilities(),
                authenticated: flags.logged_in,
            });
        }

        let input = json!({
            "logged_in": flags.logged_in,
            "captcha_required": flags.captcha_required,
        });
        let raw = self.invoke(slot, "get_capabilities", input, cancel).await?;
        serde_json::from_value::<Negotiation>(raw).map_err(|e| {
            Fault::validation(&self.core.plugin, format!("malformed capability answer: {e}"))
        })
    }

    /// Install a negotiation together with the flags it was made for.
    async fn commit(&self, negotiation: Negotiation, flags: Flags, publish: bool) {
        let declared = self.core.config.declared_capabilities();
        for capability in negotiation.capabilities.enabled() {
            if !declared.supports(capability) {
                tracing::debug!(
                    plugin = %self.core.plugin.name,
                    capability = %capability,
                    "plugin negotiated a capability it did not declare"
                );
            }
        }

        self.core
            .capabilities
            .record_negotiated(self.id(), negotiation.capabilities);
        self.update_state(|s| s.flags = flags);
        if publish {
            self.publish();
        }
        self.persist().await;
    }

    /// Re-query the plugin's capabilities for the current flags.
    pub async fn negotiate(&self, cancel: &CancellationToken) -> Result<CapabilitySet, Fault> {
        let slot = self.acquire(cancel).await?;
        self.ensure_ready()?;
        let flags = self.with_state(|s| s.flags);
        let negotiation = self.negotiate_locked(&slot, flags, cancel).await?;
        let set = negotiation.capabilities.clone();
        self.commit(negotiation, flags, true).await;
        Ok(set)
    }

    /// Call a flag-changing export, then re-negotiate for the new flags.
    /// Nothing is committed unless the whole sequence succeeds.
    async fn change_flags(
        &self,
        capability: Capability,
        function: &str,
        input: Value,
        apply: impl FnOnce(&mut Flags),
        cancel: &CancellationToken,
    ) -> Result<SessionSnapshot, Fault> {
        let slot = self.acquire(cancel).await?;
        self.ensure_ready()?;
        self.check_capability(capability, None)?;
        self.execute(&slot, function, input, cancel).await?;

        let mut flags = self.with_state(|s| s.flags);
        apply(&mut flags);
        let negotiation = self.negotiate_locked(&slot, flags, cancel).await?;
        self.commit(negotiation, flags, true).await;

        tracing::info!(
            plugin = %self.core.plugin.name,
            plugin_id = %self.core.plugin.id,
            operation = %function,
            logged_in = flags.logged_in,
            captcha_required = flags.captcha_required,
            "session flags updated"
        );
        Ok(self.snapshot())
    }

    pub async fn login(
        &self,
        credentials: Value,
        cancel: &CancellationToken,
    ) -> Result<SessionSnapshot, Fault> {
        self.change_flags(
            Capability::Login,
            "login",
            json!({ "credentials": credentials }),
            |f| f.logged_in = true,
            cancel,
        )
        .await
    }

    pub async fn logout(&self, cancel: &CancellationToken) -> Result<SessionSnapshot, Fault> {
        self.change_flags(
            Capability::Login,
            "logout",
            Value::Null,
            |f| f.logged_in = false,
            cancel,
        )
        .await
    }

    pub async fn resolve_captcha(
        &self,
        solution: Value,
        cancel: &CancellationToken,
    ) -> Result<SessionSnapshot, Fault> {
        self.change_flags(
            Capability::Captcha,
            "solve_captcha",
            json!({ "solution": solution }),
            |f| f.captcha_required = false,
            cancel,
        )
        .await
    }

    // ── Content operations ───────────────────────────────────────────

    async fn open_pager<T: Send + 'static>(
        &self,
        capability: Capability,
        function: &'static str,
        args: Value,
        query: Option<SearchQuery>,
        translate: Translate<T>,
        cancel: &CancellationToken,
    ) -> Result<SourcePager<T>, Fault> {
        let fetcher = SessionPageFetcher {
            session: self.clone(),
            capability,
            function,
            args,
            query,
            translate,
        };
        let mut pager = SourcePager::new(fetcher);
        pager.advance(cancel).await?;
        Ok(pager)
    }

    pub async fn get_home(&self, cancel: &CancellationToken) -> Result<BoxPager<ContentItem>, Fault> {
        let pager = self
            .open_pager(
                Capability::Home,
                "get_home",
                json!({}),
                None,
                ContentItem::from_raw,
                cancel,
            )
            .await?;
        Ok(Box::new(pager))
    }

    pub async fn search(
        &self,
        query: SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<BoxPager<ContentItem>, Fault> {
        let args = json!({
            "query": query.query,
            "filters": query.filters,
            "sort": query.sort,
        });
        let pager = self
            .open_pager(
                Capability::Search,
                "search",
                args,
                Some(query),
                ContentItem::from_raw,
                cancel,
            )
            .await?;
        Ok(Box::new(pager))
    }

    pub async fn get_channel_content(
        &self,
        channel_url: &str,
        filters: QueryFilters,
        sort: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<BoxPager<ContentItem>, Fault> {
        let query = SearchQuery {
            query: String::new(),
            filters,
            sort,
        };
        let args = json!({
            "url": channel_url,
            "filters": query.filters,
            "sort": query.sort,
        });
        let pager = self
            .open_pager(
                Capability::Channel,
                "get_channel_content",
                args,
                Some(query),
                ContentItem::from_raw,
                cancel,
            )
            .await?;
        Ok(Box::new(pager))
    }

    pub async fn search_channel_content(
        &self,
        channel_url: &str,
        query: SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<BoxPager<ContentItem>, Fault> {
        let args = json!({
            "url": channel_url,
            "query": query.query,
            "filters": query.filters,
            "sort": query.sort,
        });
        let pager = self
            .open_pager(
                Capability::ChannelSearch,
                "search_channel_content",
                args,
                Some(query),
                ContentItem::from_raw,
                cancel,
            )
            .await?;
        Ok(Box::new(pager))
    }

    pub async fn get_content_details(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ContentItem, Fault> {
        let raw = self
            .call(
                Capability::Details,
                "get_content_details",
                json!({ "url": url }),
                None,
                cancel,
            )
            .await?;
        ContentItem::from_raw(&self.core.plugin, raw)
    }

    pub async fn get_comments(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<BoxPager<ReferenceComment>, Fault> {
        let pager = self
            .open_pager(
                Capability::Comments,
                "get_comments",
                json!({ "url": url }),
                None,
                CommentEntry::from_raw,
                cancel,
            )
            .await?;
        Ok(self.attach_replies(pager))
    }

    /// Replies to a comment previously returned with `reference`.
    pub async fn get_replies(
        &self,
        reference: &ReferenceId,
        cancel: &CancellationToken,
    ) -> Result<BoxPager<ReferenceComment>, Fault> {
        let ctx = self
            .core
            .replies
            .get(reference)
            .ok_or_else(|| Fault::UnknownReference(reference.to_string()))?;
        let args = json!({
            "comment": ctx.comment,
            "reply_context": ctx.context,
        });
        let pager = self
            .open_pager(
                Capability::Comments,
                "get_sub_comments",
                args,
                None,
                CommentEntry::from_raw,
                cancel,
            )
            .await?;
        Ok(self.attach_replies(pager))
    }

    fn attach_replies(&self, pager: SourcePager<CommentEntry>) -> BoxPager<ReferenceComment> {
        let replies = Arc::clone(&self.core.replies);
        let inner: BoxPager<CommentEntry> = Box::new(pager);
        Box::new(ReferencePager::new(inner, move |entry: &CommentEntry| {
            let reply_ref = entry.has_replies().then(|| {
                replies.register(
                    entry.comment.clone(),
                    entry.reply_context.clone().unwrap_or_default(),
                )
            });
            ReferenceComment::new(entry.comment.clone(), reply_ref)
        }))
    }

    /// Playlist details, including the first page of its items.
    pub async fn get_playlist(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ContentItem, Fault> {
        let raw = self
            .call(
                Capability::Playlists,
                "get_playlist",
                json!({ "url": url }),
                None,
                cancel,
            )
            .await?;
        let item = ContentItem::from_raw(&self.core.plugin, raw)?;
        match item {
            ContentItem::PlaylistDetails { .. } => Ok(item),
            other => Err(Fault::validation(
                &self.core.plugin,
                format!("expected playlist details, got {}", other.content_type()),
            )),
        }
    }

    /// Pager over a playlist, starting from the page embedded in `details`.
    pub fn playlist_contents(&self, details: &ContentItem) -> Result<BoxPager<ContentItem>, Fault> {
        let ContentItem::PlaylistDetails { meta, contents, .. } = details else {
            return Err(Fault::validation(
                &self.core.plugin,
                format!("expected playlist details, got {}", details.content_type()),
            ));
        };
        let fetcher = SessionPageFetcher {
            session: self.clone(),
            capability: Capability::Playlists,
            function: "get_playlist_page",
            args: json!({ "url": meta.url }),
            query: None,
            translate: ContentItem::from_raw,
        };
        Ok(Box::new(SourcePager::with_seed(contents.clone(), fetcher)))
    }

    pub async fn get_rating(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Rating>, Fault> {
        let raw = self
            .call(
                Capability::Ratings,
                "get_rating",
                json!({ "url": url }),
                None,
                cancel,
            )
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        Rating::from_raw(&self.core.plugin, raw).map(Some)
    }
}

// ─── Paging through a session ───────────────────────────────────────────

struct SessionPageFetcher<T> {
    session: PluginSession,
    capability: Capability,
    function: &'static str,
    args: Value,
    query: Option<SearchQuery>,
    translate: Translate<T>,
}

#[async_trait]
impl<T: Send + 'static> PageFetcher<T> for SessionPageFetcher<T> {
    async fn fetch(
        &self,
        continuation: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Page<T>, Fault> {
        let mut input = self.args.clone();
        if let Value::Object(ref mut map) = input {
            map.insert(
                "continuation".to_string(),
                continuation.unwrap_or(Value::Null),
            );
        }

        let raw = self
            .session
            .call(
                self.capability,
                self.function,
                input,
                self.query.as_ref(),
                cancel,
            )
            .await?;
        let plugin = self.session.plugin();
        let page: Page<Value> = serde_json::from_value(raw).map_err(|e| {
            Fault::validation(plugin, format!("malformed page from {}: {e}", self.function))
        })?;
        translate_page(plugin, self.function, page, self.translate)
    }
}

/// Translate raw items, dropping invalid ones. Fails only when every item
/// of a non-empty page is invalid.
fn translate_page<T>(
    plugin: &PluginRef,
    function: &str,
    page: Page<Value>,
    translate: Translate<T>,
) -> Result<Page<T>, Fault> {
    let total = page.items.len();
    let items: Vec<T> = page
        .items
        .into_iter()
        .filter_map(|raw| match translate(plugin, raw) {
            Ok(item) => Some(item),
            Err(fault) => {
                tracing::debug!(plugin = %plugin.name, operation = %function, "dropping item: {fault}");
                None
            }
        })
        .collect();

    if total > 0 && items.is_empty() {
        return Err(Fault::validation(
            plugin,
            format!("all {total} items returned by {function} were malformed"),
        ));
    }
    if items.len() < total {
        tracing::warn!(
            plugin = %plugin.name,
            plugin_id = %plugin.id,
            operation = %function,
            dropped = total - items.len(),
            "dropped malformed items from page"
        );
    }

    Ok(Page {
        items,
        has_more: page.has_more,
        continuation: page.continuation,
    })
}
