//! Infrastructure error types for the plugin host.
//!
//! `PluginError` covers failures of the host machinery itself (config
//! parsing, sandbox construction, IO). Faults that concern a single plugin
//! call live in [`crate::fault`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("sandbox failure: {0}")]
    Sandbox(String),

    #[error("plugin does not export function: {0}")]
    MissingFunction(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("rejected module: {0}")]
    WasmValidation(String),

    #[error("plugin {0} ran out of fuel")]
    FuelExhausted(String),

    #[error("plugin {0} hit its memory limit")]
    MemoryExceeded(String),

    #[error("state store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("plugin.toml is not valid TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("invalid version: {0}")]
    Semver(#[from] semver::Error),
}

impl PluginError {
    /// Whether retrying the same call could succeed.
    ///
    /// Resource-limit trips are transient; a malformed module or config is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PluginError::FuelExhausted(_) | PluginError::MemoryExceeded(_) | PluginError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{Fault, PluginRef};
    use crate::manifest::PluginConfig;
    use uuid::Uuid;

    #[test]
    fn test_transient_errors() {
        assert!(PluginError::FuelExhausted("p".into()).is_transient());
        assert!(PluginError::MemoryExceeded("p".into()).is_transient());
        assert!(!PluginError::WasmValidation("bad".into()).is_transient());
        assert!(!PluginError::MissingFunction("f".into()).is_transient());
    }

    #[test]
    fn test_runtime_fault_inherits_retryability() {
        let plugin = PluginRef::new(Uuid::nil(), "tube");
        let fuel = Fault::runtime(&plugin, &PluginError::FuelExhausted("tube".into()));
        assert!(fuel.is_retryable());
        let missing = Fault::runtime(&plugin, &PluginError::MissingFunction("search".into()));
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_bad_toml_converts() {
        let err = PluginConfig::parse("[plugin\nname = ").unwrap_err();
        assert!(matches!(err, PluginError::TomlParse(_)));
        assert!(err.to_string().starts_with("plugin.toml is not valid TOML"));
    }
}
