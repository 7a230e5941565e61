//! Plugin envelope decoding and host requests.
//!
//! A plugin answers every call with a JSON envelope. Side effects it wants
//! from the host travel in `host_requests` and are processed after the call
//! returns, on behalf of the calling plugin.

use serde::Deserialize;
use serde_json::Value;

use crate::diagnostics::{DiagnosticLevel, DiagnosticLog};
use crate::error::PluginError;
use crate::fault::{PluginRef, ScriptError};

/// Maximum log message length from plugins.
const MAX_LOG_MESSAGE_LEN: usize = 2048;

/// Strip control characters (except newline/tab) and truncate.
pub fn sanitize_log_message(message: &str) -> String {
    let cleaned: String = message
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(MAX_LOG_MESSAGE_LEN)
        .collect();
    if message.chars().count() > MAX_LOG_MESSAGE_LEN {
        format!("{cleaned}… (truncated)")
    } else {
        cleaned
    }
}

// ─── Wire types ───────────────────────────────────────────────────────

/// A host function request attached to a plugin response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HostRequest {
    pub function: String,
    #[serde(default)]
    pub args: Value,
}

/// Decoded plugin response.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PluginEnvelope {
    #[serde(default)]
    pub ok: Value,
    #[serde(default)]
    pub error: Option<ScriptError>,
    #[serde(default)]
    pub host_requests: Vec<HostRequest>,
}

impl PluginEnvelope {
    /// Empty output decodes to an empty success.
    pub fn decode(bytes: &[u8]) -> Result<Self, PluginError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let envelope: PluginEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| PluginError::Protocol(format!("malformed plugin response: {e}")))?;
        Ok(envelope)
    }

    pub fn into_result(self) -> Result<Value, ScriptError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.ok),
        }
    }
}

// ─── Host context ─────────────────────────────────────────────────────

/// Everything a host request may touch for one call.
pub struct HostContext<'a> {
    plugin: &'a PluginRef,
    operation: &'a str,
    diagnostics: &'a DiagnosticLog,
}

impl<'a> HostContext<'a> {
    pub fn new(plugin: &'a PluginRef, operation: &'a str, diagnostics: &'a DiagnosticLog) -> Self {
        Self {
            plugin,
            operation,
            diagnostics,
        }
    }

    pub fn log_info(&self, message: &str) {
        let msg = sanitize_log_message(message);
        tracing::info!(plugin = %self.plugin.name, operation = %self.operation, "{msg}");
        self.diagnostics
            .record_plugin_log(DiagnosticLevel::Info, self.operation, msg);
    }

    pub fn log_warn(&self, message: &str) {
        let msg = sanitize_log_message(message);
        tracing::warn!(plugin = %self.plugin.name, operation = %self.operation, "{msg}");
        self.diagnostics
            .record_plugin_log(DiagnosticLevel::Warn, self.operation, msg);
    }

    pub fn log_error(&self, message: &str) {
        let msg = sanitize_log_message(message);
        tracing::error!(plugin = %self.plugin.name, operation = %self.operation, "{msg}");
        self.diagnostics
            .record_plugin_log(DiagnosticLevel::Error, self.operation, msg);
    }

    pub fn plugin(&self) -> &PluginRef {
        self.plugin
    }
}

/// Run the requests in order. Unknown functions are skipped with a warning.
/// Returns how many requests were handled.
pub fn process_host_requests(ctx: &HostContext<'_>, requests: Vec<HostRequest>) -> usize {
    let mut handled = 0;
    for req in requests {
        let message = req.args["message"].as_str().unwrap_or_default();
        match req.function.as_str() {
            "log_info" => ctx.log_info(message),
            "log_warn" => ctx.log_warn(message),
            "log_error" => ctx.log_error(message),
            other => {
                tracing::warn!(
                    plugin = %ctx.plugin.name,
                    function = %other,
                    "unknown host function request, ignoring"
                );
                continue;
            }
        }
        handled += 1;
    }
    handled
}
