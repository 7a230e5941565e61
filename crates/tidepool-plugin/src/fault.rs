//! Fault taxonomy and its cross-boundary form.
//!
//! Inside a session, failures travel as [`Fault`]. Anything that leaves the
//! host is flattened into an [`ExceptionModel`] and wrapped in a
//! [`HostResponse`] carrying [`PLUGIN_FAULT_STATUS`], so transports can tell
//! plugin-origin failures apart from ordinary request failures.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::PluginError;
use crate::events::SessionPhase;

/// Reserved out-of-range status marking a plugin-origin failure.
pub const PLUGIN_FAULT_STATUS: u16 = 550;

/// Status used for successful host responses.
pub const OK_STATUS: u16 = 200;

// ─── Plugin identity ────────────────────────────────────────────────────

/// Identity of the plugin a fault or item originates from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginRef {
    pub id: Uuid,
    pub name: String,
}

impl PluginRef {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for PluginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

// ─── Script errors (wire form) ──────────────────────────────────────────

/// Kind of error raised by plugin logic, as reported in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScriptErrorKind {
    #[default]
    ScriptException,
    CaptchaRequired,
    LoginRequired,
    Unavailable,
    AgeRestricted,
    Critical,
}

impl ScriptErrorKind {
    pub fn type_name(self) -> &'static str {
        match self {
            ScriptErrorKind::ScriptException => "ScriptException",
            ScriptErrorKind::CaptchaRequired => "ScriptCaptchaRequiredException",
            ScriptErrorKind::LoginRequired => "ScriptLoginRequiredException",
            ScriptErrorKind::Unavailable => "ScriptUnavailableException",
            ScriptErrorKind::AgeRestricted => "ScriptAgeException",
            ScriptErrorKind::Critical => "ScriptCriticalException",
        }
    }

    fn title(self) -> &'static str {
        match self {
            ScriptErrorKind::ScriptException => "Plugin error",
            ScriptErrorKind::CaptchaRequired => "Captcha required",
            ScriptErrorKind::LoginRequired => "Login required",
            ScriptErrorKind::Unavailable => "Content unavailable",
            ScriptErrorKind::AgeRestricted => "Age restricted",
            ScriptErrorKind::Critical => "Critical plugin error",
        }
    }
}

/// Error object a plugin returns in the `error` member of its envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScriptError {
    #[serde(rename = "type", default)]
    pub kind: ScriptErrorKind,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ScriptError>>,
}

impl ScriptError {
    pub fn new(kind: ScriptErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_cause(mut self, cause: ScriptError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

// ─── Script fault ───────────────────────────────────────────────────────

/// A fault raised by sandboxed plugin logic, tagged with the plugin identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFault {
    pub plugin: PluginRef,
    pub kind: ScriptErrorKind,
    pub message: String,
    pub stack: Option<String>,
    pub code: Option<String>,
    pub retryable: bool,
    pub cause: Option<Box<ScriptFault>>,
}

impl ScriptFault {
    /// Translate a plugin-reported error. Retryable unless the plugin says
    /// otherwise or raised a critical error.
    pub fn from_script_error(plugin: &PluginRef, err: ScriptError) -> Self {
        let retryable = err
            .retryable
            .unwrap_or(err.kind != ScriptErrorKind::Critical);
        Self {
            plugin: plugin.clone(),
            kind: err.kind,
            message: err.message,
            stack: err.stack.filter(|s| !s.trim().is_empty()),
            code: err.code.filter(|c| !c.trim().is_empty()),
            retryable,
            cause: err
                .cause
                .map(|c| Box::new(ScriptFault::from_script_error(plugin, *c))),
        }
    }

    /// Explicit code, else the stack trace, else the message.
    pub fn diagnostic_code(&self) -> String {
        self.code
            .clone()
            .or_else(|| self.stack.clone())
            .unwrap_or_else(|| format!("{}: {}", self.kind.type_name(), self.message))
    }

    fn to_model(&self) -> ExceptionModel {
        ExceptionModel {
            type_name: self.kind.type_name().to_string(),
            title: self.kind.title().to_string(),
            message: self.message.clone(),
            code: self.diagnostic_code(),
            retryable: self.retryable,
            plugin_id: Some(self.plugin.id),
            plugin_name: Some(self.plugin.name.clone()),
            inner: self.cause.as_ref().map(|c| Box::new(c.to_model())),
        }
    }
}

impl fmt::Display for ScriptFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {}: {}",
            self.kind.type_name(),
            self.plugin,
            self.message
        )
    }
}

// ─── Exception model ────────────────────────────────────────────────────

/// UI-renderable description of a fault. `code` is always populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionModel {
    pub type_name: String,
    pub title: String,
    pub message: String,
    pub code: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner: Option<Box<ExceptionModel>>,
}

impl ExceptionModel {
    /// Model with only a title; the rest is filled by the caller.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            type_name: String::new(),
            title: title.into(),
            message: String::new(),
            code: String::new(),
            retryable: false,
            plugin_id: None,
            plugin_name: None,
            inner: None,
        }
    }

    fn host(type_name: &str, title: &str, message: String, code: String, retryable: bool) -> Self {
        Self {
            type_name: type_name.to_string(),
            title: title.to_string(),
            message,
            code,
            retryable,
            plugin_id: None,
            plugin_name: None,
            inner: None,
        }
    }

    fn for_plugin(mut self, plugin: &PluginRef) -> Self {
        self.plugin_id = Some(plugin.id);
        self.plugin_name = Some(plugin.name.clone());
        self
    }

    /// Depth of the inner-model chain, counting this model.
    pub fn depth(&self) -> usize {
        1 + self.inner.as_ref().map_or(0, |i| i.depth())
    }
}

// ─── Dialog fault ───────────────────────────────────────────────────────

/// Host-level fault meant for a blocking dialog rather than an inline error.
#[derive(Debug, Clone)]
pub struct DialogFault {
    pub model: ExceptionModel,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl DialogFault {
    pub fn new(model: ExceptionModel) -> Self {
        Self { model, cause: None }
    }

    /// Wrap `cause`, copying its message and source chain into the model.
    /// The type name is taken from the cause's type when the model has none.
    pub fn with_cause<E>(mut model: ExceptionModel, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        model.message = cause.to_string();
        model.code = render_chain(&cause);
        if model.type_name.is_empty() {
            model.type_name = short_type_name::<E>().to_string();
        }
        Self {
            model,
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn from_error<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::with_cause(ExceptionModel::titled("Error"), cause)
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Display for DialogFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.model.title, self.model.message)
    }
}

impl StdError for DialogFault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut lines = vec![err.to_string()];
    let mut source = err.source();
    while let Some(s) = source {
        lines.push(format!("caused by: {s}"));
        source = s.source();
    }
    lines.join("\n")
}

fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ─── Fault ──────────────────────────────────────────────────────────────

/// Coarse classification of a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Validation,
    Capability,
    Script,
    Timeout,
    Cancelled,
    Config,
    Session,
    Dialog,
}

/// Every failure that can escape a plugin session.
#[derive(Error, Debug, Clone)]
pub enum Fault {
    #[error("invalid content from {plugin}: {message}")]
    Validation { plugin: PluginRef, message: String },

    #[error("{plugin} does not support {operation}: {reason}")]
    Capability {
        plugin: PluginRef,
        operation: String,
        reason: String,
    },

    #[error("{0}")]
    Script(ScriptFault),

    #[error("{plugin} runtime failure: {message}")]
    Runtime {
        plugin: PluginRef,
        message: String,
        retryable: bool,
    },

    #[error("{plugin} did not finish {operation} within {after:?}")]
    Timeout {
        plugin: PluginRef,
        operation: String,
        after: Duration,
    },

    #[error("call cancelled")]
    Cancelled,

    #[error("plugin configuration error: {message}")]
    Config {
        plugin: Option<PluginRef>,
        message: String,
    },

    #[error("{plugin} is faulted: {}", .model.message)]
    Faulted {
        plugin: PluginRef,
        model: Box<ExceptionModel>,
    },

    #[error("{plugin} is not ready (phase: {phase:?})")]
    NotReady { plugin: PluginRef, phase: SessionPhase },

    #[error("plugin not loaded: {0}")]
    NotFound(Uuid),

    #[error("unknown or expired reply reference: {0}")]
    UnknownReference(String),

    #[error("{0}")]
    Dialog(DialogFault),
}

impl Fault {
    pub fn validation(plugin: &PluginRef, message: impl Into<String>) -> Self {
        Fault::Validation {
            plugin: plugin.clone(),
            message: message.into(),
        }
    }

    pub fn config(plugin: Option<&PluginRef>, err: impl fmt::Display) -> Self {
        Fault::Config {
            plugin: plugin.cloned(),
            message: err.to_string(),
        }
    }

    pub fn runtime(plugin: &PluginRef, err: &PluginError) -> Self {
        Fault::Runtime {
            plugin: plugin.clone(),
            message: err.to_string(),
            retryable: err.is_transient(),
        }
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::Validation { .. } => FaultKind::Validation,
            Fault::Capability { .. } => FaultKind::Capability,
            Fault::Script(_) | Fault::Runtime { .. } => FaultKind::Script,
            Fault::Timeout { .. } => FaultKind::Timeout,
            Fault::Cancelled => FaultKind::Cancelled,
            Fault::Config { .. } => FaultKind::Config,
            Fault::Faulted { .. }
            | Fault::NotReady { .. }
            | Fault::NotFound(_)
            | Fault::UnknownReference(_) => FaultKind::Session,
            Fault::Dialog(_) => FaultKind::Dialog,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.to_exception_model().retryable
    }

    /// Cancellation is a no-op from the user's point of view.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Fault::Cancelled)
    }

    /// Flatten into the boundary model without side effects.
    pub fn to_exception_model(&self) -> ExceptionModel {
        match self {
            Fault::Validation { plugin, message } => ExceptionModel::host(
                "ValidationException",
                "Invalid content",
                message.clone(),
                format!("validation: {message}"),
                false,
            )
            .for_plugin(plugin),
            Fault::Capability {
                plugin,
                operation,
                reason,
            } => ExceptionModel::host(
                "CapabilityException",
                "Unsupported operation",
                format!("{} does not support {operation}: {reason}", plugin.name),
                format!("capability: {operation}"),
                false,
            )
            .for_plugin(plugin),
            Fault::Script(script) => script.to_model(),
            Fault::Runtime {
                plugin,
                message,
                retryable,
            } => ExceptionModel::host(
                "ScriptRuntimeException",
                "Plugin runtime failure",
                message.clone(),
                format!("runtime: {message}"),
                *retryable,
            )
            .for_plugin(plugin),
            Fault::Timeout {
                plugin,
                operation,
                after,
            } => ExceptionModel::host(
                "ScriptTimeoutException",
                "Plugin timed out",
                format!("{} did not finish {operation} in time", plugin.name),
                format!("timeout: {operation} after {}ms", after.as_millis()),
                true,
            )
            .for_plugin(plugin),
            Fault::Cancelled => ExceptionModel::host(
                "CancelledException",
                "Cancelled",
                "call cancelled".into(),
                "cancelled".into(),
                false,
            ),
            Fault::Config { plugin, message } => {
                let model = ExceptionModel::host(
                    "ConfigException",
                    "Plugin failed to load",
                    message.clone(),
                    format!("config: {message}"),
                    false,
                );
                match plugin {
                    Some(p) => model.for_plugin(p),
                    None => model,
                }
            }
            Fault::Faulted { plugin, model } => {
                let mut outer = ExceptionModel::host(
                    "PluginFaultedException",
                    "Plugin needs reload",
                    format!("{} is faulted and must be reloaded", plugin.name),
                    model.code.clone(),
                    false,
                )
                .for_plugin(plugin);
                outer.inner = Some(model.clone());
                outer
            }
            Fault::NotReady { plugin, phase } => ExceptionModel::host(
                "PluginNotReadyException",
                "Plugin not ready",
                format!("{} is still starting", plugin.name),
                format!("phase: {phase:?}"),
                true,
            )
            .for_plugin(plugin),
            Fault::NotFound(id) => {
                let mut model = ExceptionModel::host(
                    "PluginNotFoundException",
                    "Plugin not loaded",
                    format!("no plugin loaded with id {id}"),
                    format!("not_found: {id}"),
                    false,
                );
                model.plugin_id = Some(*id);
                model
            }
            Fault::UnknownReference(reference) => ExceptionModel::host(
                "ReferenceExpiredException",
                "Replies unavailable",
                format!("reply reference {reference} is unknown or expired"),
                format!("reference: {reference}"),
                false,
            ),
            Fault::Dialog(dialog) => dialog.model.clone(),
        }
    }

    /// Flatten for the host boundary. Capability faults should have been
    /// gated by the consumer, so they are logged on their own target.
    pub fn flatten(&self) -> ExceptionModel {
        if let Fault::Capability {
            plugin, operation, ..
        } = self
        {
            tracing::error!(
                target: "tidepool::capability_sync",
                plugin = %plugin.name,
                plugin_id = %plugin.id,
                operation = %operation,
                "capability fault reached the host boundary; consumer capability view is stale"
            );
        }
        self.to_exception_model()
    }
}

// ─── Host response ──────────────────────────────────────────────────────

/// Result-style response crossing the host boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostResponse<T> {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExceptionModel>,
}

impl<T> HostResponse<T> {
    pub fn ok(value: T) -> Self {
        Self {
            status: OK_STATUS,
            result: Some(value),
            error: None,
        }
    }

    pub fn fault(fault: &Fault) -> Self {
        Self {
            status: PLUGIN_FAULT_STATUS,
            result: None,
            error: Some(fault.flatten()),
        }
    }

    pub fn from_result(result: Result<T, Fault>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(fault) => Self::fault(&fault),
        }
    }

    pub fn is_plugin_fault(&self) -> bool {
        self.status == PLUGIN_FAULT_STATUS
    }

    pub fn into_result(self) -> Result<T, ExceptionModel> {
        match (self.result, self.error) {
            (Some(value), None) => Ok(value),
            (_, Some(model)) => Err(model),
            (None, None) => Err(ExceptionModel::host(
                "ProtocolException",
                "Empty response",
                "response carried neither a result nor an error".into(),
                format!("status: {}", self.status),
                false,
            )),
        }
    }
}

impl<T> From<Result<T, Fault>> for HostResponse<T> {
    fn from(result: Result<T, Fault>) -> Self {
        Self::from_result(result)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin() -> PluginRef {
        PluginRef::new(Uuid::nil(), "test-source")
    }

    // ── Script faults ────────────────────────────────────────────────

    #[test]
    fn test_script_fault_is_retryable_by_default() {
        let fault = ScriptFault::from_script_error(
            &plugin(),
            ScriptError::new(ScriptErrorKind::ScriptException, "boom"),
        );
        assert!(fault.retryable);
    }

    #[test]
    fn test_script_fault_respects_explicit_retryable() {
        let mut err = ScriptError::new(ScriptErrorKind::ScriptException, "boom");
        err.retryable = Some(false);
        let fault = ScriptFault::from_script_error(&plugin(), err);
        assert!(!fault.retryable);
    }

    #[test]
    fn test_critical_script_fault_not_retryable() {
        let fault = ScriptFault::from_script_error(
            &plugin(),
            ScriptError::new(ScriptErrorKind::Critical, "broken"),
        );
        assert!(!fault.retryable);
    }

    #[test]
    fn test_nested_script_fault_code_falls_back_to_stack() {
        let stack = "Error: level3 failed\n    at level3 (source.js:30)\n    at level2 (source.js:20)\n    at level1 (source.js:10)";
        let err = ScriptError::new(ScriptErrorKind::ScriptException, "level3 failed")
            .with_stack(stack)
            .with_cause(
                ScriptError::new(ScriptErrorKind::ScriptException, "level2 failed").with_cause(
                    ScriptError::new(ScriptErrorKind::ScriptException, "level1 failed"),
                ),
            );

        let fault = Fault::Script(ScriptFault::from_script_error(&plugin(), err));
        let model = fault.flatten();

        assert_eq!(model.code, stack);
        assert_eq!(model.type_name, "ScriptException");
        assert_eq!(model.plugin_name.as_deref(), Some("test-source"));
        assert_eq!(model.depth(), 3);
        let innermost = model.inner.as_ref().unwrap().inner.as_ref().unwrap();
        assert_eq!(innermost.message, "level1 failed");
        assert!(!innermost.code.is_empty());
    }

    #[test]
    fn test_explicit_code_wins_over_stack() {
        let mut err = ScriptError::new(ScriptErrorKind::Unavailable, "gone").with_stack("at x");
        err.code = Some("E_GONE".into());
        let model = Fault::Script(ScriptFault::from_script_error(&plugin(), err)).flatten();
        assert_eq!(model.code, "E_GONE");
        assert_eq!(model.type_name, "ScriptUnavailableException");
    }

    #[test]
    fn test_code_populated_without_stack_or_code() {
        let err = ScriptError::new(ScriptErrorKind::ScriptException, "plain");
        let model = Fault::Script(ScriptFault::from_script_error(&plugin(), err)).flatten();
        assert!(model.code.contains("plain"));
    }

    #[test]
    fn test_script_error_wire_format() {
        let json = r#"{"type":"CaptchaRequired","message":"solve me","stack":"at a"}"#;
        let err: ScriptError = serde_json::from_str(json).unwrap();
        assert_eq!(err.kind, ScriptErrorKind::CaptchaRequired);
        assert_eq!(err.stack.as_deref(), Some("at a"));
        assert!(err.cause.is_none());

        let bare: ScriptError = serde_json::from_str(r#"{"message":"x"}"#).unwrap();
        assert_eq!(bare.kind, ScriptErrorKind::ScriptException);
    }

    // ── Fault classification ─────────────────────────────────────────

    #[test]
    fn test_every_fault_has_a_code() {
        let faults = vec![
            Fault::validation(&plugin(), "missing url"),
            Fault::Capability {
                plugin: plugin(),
                operation: "search".into(),
                reason: "not negotiated".into(),
            },
            Fault::Timeout {
                plugin: plugin(),
                operation: "get_home".into(),
                after: Duration::from_secs(30),
            },
            Fault::Cancelled,
            Fault::config(None, "bad toml"),
            Fault::NotFound(Uuid::nil()),
            Fault::UnknownReference("abc".into()),
        ];
        for fault in faults {
            let model = fault.to_exception_model();
            assert!(!model.code.is_empty(), "{fault:?} has empty code");
            assert!(!model.type_name.is_empty());
        }
    }

    #[test]
    fn test_timeout_retryable_cancel_not() {
        let timeout = Fault::Timeout {
            plugin: plugin(),
            operation: "search".into(),
            after: Duration::from_millis(10),
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.kind(), FaultKind::Timeout);
        assert!(!Fault::Cancelled.is_retryable());
        assert!(!Fault::Cancelled.is_user_visible());
    }

    #[test]
    fn test_faulted_wraps_stored_model() {
        let stored = Fault::config(Some(&plugin()), "bad entry").to_exception_model();
        let fault = Fault::Faulted {
            plugin: plugin(),
            model: Box::new(stored.clone()),
        };
        let model = fault.to_exception_model();
        assert_eq!(model.type_name, "PluginFaultedException");
        assert_eq!(model.inner.as_deref(), Some(&stored));
    }

    // ── Dialog faults ────────────────────────────────────────────────

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    #[derive(Debug, thiserror::Error)]
    #[error("could not save settings")]
    struct SaveFailed(#[source] DiskFull);

    #[test]
    fn test_dialog_fault_copies_cause() {
        let dialog = DialogFault::from_error(SaveFailed(DiskFull));
        assert_eq!(dialog.model.message, "could not save settings");
        assert_eq!(dialog.model.type_name, "SaveFailed");
        assert!(dialog.model.code.contains("caused by: disk full"));
        assert!(dialog.cause().is_some());
        assert!(std::error::Error::source(&dialog).is_some());
    }

    #[test]
    fn test_dialog_fault_keeps_existing_type_name() {
        let mut model = ExceptionModel::titled("Import failed");
        model.type_name = "ImportException".into();
        let dialog = DialogFault::with_cause(model, DiskFull);
        assert_eq!(dialog.model.type_name, "ImportException");
        assert_eq!(dialog.model.title, "Import failed");
        assert_eq!(dialog.to_string(), "Import failed: disk full");
    }

    // ── Host response ────────────────────────────────────────────────

    #[test]
    fn test_host_response_tags_plugin_faults() {
        let response: HostResponse<u32> = Err(Fault::NotFound(Uuid::nil())).into();
        assert!(response.is_plugin_fault());
        assert_eq!(response.status, PLUGIN_FAULT_STATUS);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], 550);
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["type_name"], "PluginNotFoundException");

        let back: HostResponse<u32> = serde_json::from_value(json).unwrap();
        assert!(back.into_result().is_err());
    }

    #[test]
    fn test_host_response_ok() {
        let response = HostResponse::from_result(Ok::<_, Fault>(7u32));
        assert_eq!(response.status, OK_STATUS);
        assert_eq!(response.into_result().unwrap(), 7);
    }
}
