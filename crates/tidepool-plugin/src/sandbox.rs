//! Script runtimes and the WASM sandbox.
//!
//! A session talks to its plugin only through [`ScriptRuntime`]: bytes in,
//! bytes out. [`PluginSandbox`] runs WASM modules under Extism (wasmtime)
//! with memory and fuel limits; [`crate::native::NativeRuntime`] runs Rust
//! closures for built-in sources and tests.

use std::sync::Arc;

use crate::error::PluginError;
use crate::manifest::{PluginConfig, PluginDefinition, RuntimeKind};

/// WASM magic bytes: `\0asm`.
pub const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// Default maximum WASM binary size in MB.
pub const DEFAULT_MAX_WASM_SIZE_MB: u64 = 50;

/// Import namespaces a plugin module may use.
pub const ALLOWED_IMPORT_NAMESPACES: &[&str] = &[
    "env",
    "extism:host/env",
    "wasi_snapshot_preview1",
    "wasi_unstable",
];

/// Stops a call in progress from another thread.
pub type Interrupter = Arc<dyn Fn() + Send + Sync>;

/// An isolated plugin instance.
///
/// Calls are synchronous and never overlap: the owning session serializes
/// them and runs each on a blocking thread.
pub trait ScriptRuntime: Send {
    fn call(&mut self, function: &str, input: &[u8]) -> Result<Vec<u8>, PluginError>;

    fn has_function(&self, name: &str) -> bool;

    /// Handle that aborts the running call, if the runtime supports it.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

/// Builds a runtime for a validated plugin definition.
pub trait RuntimeFactory: Send + Sync {
    fn build(
        &self,
        config: &PluginConfig,
        definition: &PluginDefinition,
    ) -> Result<Box<dyn ScriptRuntime>, PluginError>;
}

impl<F> RuntimeFactory for F
where
    F: Fn(&PluginConfig, &PluginDefinition) -> Result<Box<dyn ScriptRuntime>, PluginError>
        + Send
        + Sync,
{
    fn build(
        &self,
        config: &PluginConfig,
        definition: &PluginDefinition,
    ) -> Result<Box<dyn ScriptRuntime>, PluginError> {
        self(config, definition)
    }
}

// ─── Configuration ──────────────────────────────────────────────────────

/// Configuration for the WASM sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum memory in bytes (default: 32 MB).
    pub memory_limit: usize,
    /// Maximum fuel (instructions) per execution (default: 1_000_000).
    pub fuel_limit: u64,
    /// Host-wide WASI switch. A plugin also has to ask for it in
    /// `permissions.allow_wasi`.
    pub wasi_enabled: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit: 32 * 1024 * 1024,
            fuel_limit: 1_000_000,
            wasi_enabled: false,
        }
    }
}

impl SandboxConfig {
    pub fn from_env() -> Self {
        Self {
            memory_limit: std::env::var("PLUGIN_MEMORY_LIMIT_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(32)
                * 1024
                * 1024,
            fuel_limit: std::env::var("PLUGIN_FUEL_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_000_000),
            wasi_enabled: std::env::var("PLUGIN_WASI_ENABLED")
                .unwrap_or_default()
                .eq_ignore_ascii_case("true"),
        }
    }
}

// ─── Sandbox ────────────────────────────────────────────────────────────

/// A loaded WASM plugin.
pub struct PluginSandbox {
    plugin: extism::Plugin,
    plugin_name: String,
}

impl std::fmt::Debug for PluginSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSandbox")
            .field("plugin_name", &self.plugin_name)
            .finish_non_exhaustive()
    }
}

impl PluginSandbox {
    /// Instantiate a module with memory (64 KB pages) and fuel limits.
    pub fn from_bytes(
        wasm: &[u8],
        config: &SandboxConfig,
        name: &str,
        allowed_hosts: &[String],
        wasi: bool,
    ) -> Result<Self, PluginError> {
        let manifest = extism::Manifest::new([extism::Wasm::data(wasm.to_vec())])
            .with_memory_max((config.memory_limit / 65536) as u32)
            .with_allowed_hosts(allowed_hosts.iter().cloned());

        if wasi {
            tracing::warn!(
                plugin = %name,
                "WASI enabled for plugin; it can read the host environment"
            );
        }

        let plugin = extism::PluginBuilder::new(manifest)
            .with_wasi(wasi)
            .with_fuel_limit(config.fuel_limit)
            .build()
            .map_err(|e| PluginError::Sandbox(e.to_string()))?;

        Ok(Self {
            plugin,
            plugin_name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.plugin_name
    }
}

impl ScriptRuntime for PluginSandbox {
    fn call(&mut self, function: &str, input: &[u8]) -> Result<Vec<u8>, PluginError> {
        if !self.plugin.function_exists(function) {
            return Err(PluginError::MissingFunction(function.to_string()));
        }

        self.plugin
            .call::<&[u8], Vec<u8>>(function, input)
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("fuel") {
                    PluginError::FuelExhausted(self.plugin_name.clone())
                } else if msg.contains("memory") {
                    PluginError::MemoryExceeded(self.plugin_name.clone())
                } else {
                    PluginError::Sandbox(msg)
                }
            })
    }

    fn has_function(&self, name: &str) -> bool {
        self.plugin.function_exists(name)
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let handle = self.plugin.cancel_handle();
        Some(Arc::new(move || {
            let _ = handle.cancel();
        }))
    }
}

// ─── WASM validation ────────────────────────────────────────────────────

/// Size limit, magic bytes, then import namespaces.
pub fn validate_wasm(wasm: &[u8], max_size: u64) -> Result<(), PluginError> {
    let size = wasm.len() as u64;
    if size > max_size {
        return Err(PluginError::WasmValidation(format!(
            "WASM binary too large: {size} bytes (max: {max_size} bytes)"
        )));
    }

    if wasm.len() < 4 || &wasm[..4] != WASM_MAGIC {
        return Err(PluginError::WasmValidation(
            "invalid WASM binary: magic bytes mismatch".into(),
        ));
    }

    validate_wasm_imports(wasm)
}

pub fn validate_wasm_imports(wasm: &[u8]) -> Result<(), PluginError> {
    use wasmparser::{Parser, Payload};

    for payload in Parser::new(0).parse_all(wasm) {
        let payload = payload
            .map_err(|e| PluginError::WasmValidation(format!("failed to parse WASM: {e}")))?;

        if let Payload::ImportSection(reader) = payload {
            for import in reader {
                let import = import.map_err(|e| {
                    PluginError::WasmValidation(format!("failed to read import: {e}"))
                })?;

                if !ALLOWED_IMPORT_NAMESPACES.contains(&import.module) {
                    return Err(PluginError::WasmValidation(format!(
                        "unauthorized import namespace: '{}' (function: '{}'); \
                         allowed namespaces: {:?}",
                        import.module, import.name, ALLOWED_IMPORT_NAMESPACES
                    )));
                }
            }
        }
    }

    Ok(())
}

// ─── WASM factory ───────────────────────────────────────────────────────

/// Builds [`PluginSandbox`] runtimes after validating the module.
#[derive(Debug, Clone)]
pub struct WasmRuntimeFactory {
    pub sandbox: SandboxConfig,
    pub max_wasm_size: u64,
}

impl Default for WasmRuntimeFactory {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            max_wasm_size: DEFAULT_MAX_WASM_SIZE_MB * 1024 * 1024,
        }
    }
}

impl WasmRuntimeFactory {
    pub fn from_env() -> Self {
        let max_mb = std::env::var("PLUGIN_WASM_MAX_SIZE_MB")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_MAX_WASM_SIZE_MB);
        Self {
            sandbox: SandboxConfig::from_env(),
            max_wasm_size: max_mb * 1024 * 1024,
        }
    }
}

impl RuntimeFactory for WasmRuntimeFactory {
    fn build(
        &self,
        config: &PluginConfig,
        definition: &PluginDefinition,
    ) -> Result<Box<dyn ScriptRuntime>, PluginError> {
        if config.script.runtime != RuntimeKind::Wasm {
            return Err(PluginError::Config(format!(
                "plugin {} is not a WASM plugin",
                config.plugin.name
            )));
        }

        validate_wasm(&definition.script, self.max_wasm_size)?;

        let wasi = self.sandbox.wasi_enabled && config.permissions.allow_wasi;
        let sandbox = PluginSandbox::from_bytes(
            &definition.script,
            &self.sandbox,
            &config.plugin.name,
            &config.permissions.http_hosts,
            wasi,
        )?;
        Ok(Box::new(sandbox))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
