//! Runtime whose exported functions are Rust closures.
//!
//! Speaks the same JSON envelope protocol as a WASM plugin, so a session
//! cannot tell the two apart. Used for sources compiled into the host and
//! to drive sessions in tests without a compiled module.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::PluginError;
use crate::fault::ScriptError;
use crate::manifest::{PluginConfig, PluginDefinition, RuntimeKind};
use crate::sandbox::{RuntimeFactory, ScriptRuntime};

type ValueFn = Box<dyn FnMut(Value) -> Result<Value, ScriptError> + Send>;
type EnvelopeFn = Box<dyn FnMut(Value) -> Value + Send>;

enum Export {
    /// Result is wrapped into `{"ok": ..}` / `{"error": ..}`.
    Value(ValueFn),
    /// Returns the whole envelope, host requests included.
    Envelope(EnvelopeFn),
}

#[derive(Default)]
pub struct NativeRuntime {
    exports: HashMap<String, Export>,
}

impl fmt::Debug for NativeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.exports.keys().collect();
        names.sort();
        f.debug_struct("NativeRuntime")
            .field("exports", &names)
            .finish()
    }
}

impl NativeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function<F>(mut self, name: &str, f: F) -> Self
    where
        F: FnMut(Value) -> Result<Value, ScriptError> + Send + 'static,
    {
        self.exports
            .insert(name.to_string(), Export::Value(Box::new(f)));
        self
    }

    pub fn with_envelope_function<F>(mut self, name: &str, f: F) -> Self
    where
        F: FnMut(Value) -> Value + Send + 'static,
    {
        self.exports
            .insert(name.to_string(), Export::Envelope(Box::new(f)));
        self
    }
}

impl ScriptRuntime for NativeRuntime {
    fn call(&mut self, function: &str, input: &[u8]) -> Result<Vec<u8>, PluginError> {
        let export = self
            .exports
            .get_mut(function)
            .ok_or_else(|| PluginError::MissingFunction(function.to_string()))?;

        let input: Value = if input.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(input)?
        };

        let envelope = match export {
            Export::Value(f) => match f(input) {
                Ok(value) => json!({ "ok": value }),
                Err(err) => json!({ "error": err }),
            },
            Export::Envelope(f) => f(input),
        };

        Ok(serde_json::to_vec(&envelope)?)
    }

    fn has_function(&self, name: &str) -> bool {
        self.exports.contains_key(name)
    }
}

// ─── Factory ────────────────────────────────────────────────────────────

type Builder = Arc<dyn Fn() -> NativeRuntime + Send + Sync>;

/// Builds native runtimes for `runtime = "native"` plugins, keyed by the
/// config's `script.entry`.
#[derive(Default)]
pub struct NativeRuntimeFactory {
    builders: HashMap<String, Builder>,
    builds: AtomicUsize,
}

impl NativeRuntimeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, entry: &str, build: F) -> Self
    where
        F: Fn() -> NativeRuntime + Send + Sync + 'static,
    {
        self.builders.insert(entry.to_string(), Arc::new(build));
        self
    }

    /// Number of runtimes built so far.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl RuntimeFactory for NativeRuntimeFactory {
    fn build(
        &self,
        config: &PluginConfig,
        _definition: &PluginDefinition,
    ) -> Result<Box<dyn ScriptRuntime>, PluginError> {
        if config.script.runtime != RuntimeKind::Native {
            return Err(PluginError::Config(format!(
                "plugin {} is not a native plugin",
                config.plugin.name
            )));
        }
        let build = self.builders.get(&config.script.entry).ok_or_else(|| {
            PluginError::Config(format!(
                "no native source registered as '{}'",
                config.script.entry
            ))
        })?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(build()))
    }
}
