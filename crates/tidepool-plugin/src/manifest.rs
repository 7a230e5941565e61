//! Plugin configuration parsing and validation.
//!
//! Each plugin ships a `plugin.toml` declaring its identity, script entry,
//! static capabilities and permissions, next to the script blob itself.

use std::path::{Component, Path};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capabilities::{Capability, CapabilitySet, CapabilitySupport};
use crate::error::PluginError;

/// File name of the configuration document inside a plugin directory.
pub const CONFIG_FILE: &str = "plugin.toml";

/// Host version checked against `plugin.min_host_version`.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Static plugin configuration parsed from `plugin.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub plugin: PluginMeta,
    pub script: ScriptConfig,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub authentication: Option<AuthenticationConfig>,
    #[serde(default)]
    pub captcha: Option<CaptchaConfig>,
}

/// Identity section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMeta {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub platform_url: Option<String>,
    /// Where newer versions of this configuration are published.
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub min_host_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Wasm,
    /// Built into the host binary; the script blob is unused.
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    pub entry: String,
    #[serde(default)]
    pub runtime: RuntimeKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub http_hosts: Vec<String>,
    #[serde(default)]
    pub allow_wasi: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    pub login_url: String,
    #[serde(default)]
    pub completion_url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptchaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub captcha_url: Option<String>,
}

// ─── Validation helpers ─────────────────────────────────────────────

/// Validate a plugin name against `^[a-z][a-z0-9-]{1,63}$`.
fn validate_plugin_name(name: &str) -> Result<(), PluginError> {
    let len = name.len();
    if !(2..=64).contains(&len) {
        return Err(PluginError::InvalidConfig(format!(
            "plugin name must be 2-64 characters, got {len}"
        )));
    }

    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        if !first.is_ascii_lowercase() {
            return Err(PluginError::InvalidConfig(format!(
                "plugin name must start with a lowercase letter, got '{first}'"
            )));
        }
    }

    for ch in chars {
        if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() && ch != '-' {
            return Err(PluginError::InvalidConfig(format!(
                "plugin name contains invalid character '{ch}'"
            )));
        }
    }

    Ok(())
}

fn parse_semver(value: &str, field_name: &str) -> Result<semver::Version, PluginError> {
    semver::Version::parse(value).map_err(|_| {
        PluginError::InvalidConfig(format!("{field_name} is not valid semver: '{value}'"))
    })
}

/// Reject absolute paths and `..` components.
fn validate_path_safety(path: &str, field_name: &str) -> Result<(), PluginError> {
    let p = Path::new(path);
    if p.is_absolute() {
        return Err(PluginError::InvalidConfig(format!(
            "{field_name} must be a relative path, got absolute: '{path}'"
        )));
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(PluginError::InvalidConfig(format!(
            "{field_name} must not contain '..': '{path}'"
        )));
    }
    Ok(())
}

/// `"*"`, `"localhost"`, or something with at least one dot.
fn validate_http_host(host: &str) -> Result<(), PluginError> {
    if host.is_empty() {
        return Err(PluginError::InvalidConfig(
            "http_hosts entry must not be empty".into(),
        ));
    }
    if host.contains(' ') {
        return Err(PluginError::InvalidConfig(format!(
            "http_hosts entry must not contain spaces: '{host}'"
        )));
    }
    if host != "*" && host != "localhost" && !host.contains('.') {
        return Err(PluginError::InvalidConfig(format!(
            "http_hosts entry is not a valid domain: '{host}'"
        )));
    }
    Ok(())
}

fn validate_http_url(value: &str, field_name: &str) -> Result<(), PluginError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| PluginError::InvalidConfig(format!("{field_name} is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PluginError::InvalidConfig(format!(
            "{field_name} must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    Ok(())
}

impl PluginConfig {
    pub fn parse(toml_str: &str) -> Result<Self, PluginError> {
        let config: PluginConfig = toml::from_str(toml_str)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        // ── Identity ────────────────────────────────────────────────
        if self.plugin.id.is_nil() {
            return Err(PluginError::InvalidConfig(
                "plugin.id must not be the nil UUID".into(),
            ));
        }

        validate_plugin_name(&self.plugin.name)?;
        parse_semver(&self.plugin.version, "plugin.version")?;

        let desc_len = self.plugin.description.len();
        if desc_len == 0 || desc_len > 500 {
            return Err(PluginError::InvalidConfig(format!(
                "plugin.description must be 1-500 characters, got {desc_len}"
            )));
        }

        if let Some(ref author) = self.plugin.author {
            let len = author.len();
            if len == 0 || len > 255 {
                return Err(PluginError::InvalidConfig(format!(
                    "plugin.author must be 1-255 characters, got {len}"
                )));
            }
        }

        for (value, field) in [
            (&self.plugin.platform_url, "plugin.platform_url"),
            (&self.plugin.source_url, "plugin.source_url"),
            (&self.plugin.icon_url, "plugin.icon_url"),
        ] {
            if let Some(url) = value {
                validate_http_url(url, field)?;
            }
        }

        if let Some(ref min_ver) = self.plugin.min_host_version {
            let required = parse_semver(min_ver, "plugin.min_host_version")?;
            let host = semver::Version::parse(HOST_VERSION)?;
            if host < required {
                return Err(PluginError::InvalidConfig(format!(
                    "plugin requires host {required} or newer, this is {host}"
                )));
            }
        }

        // ── Script ──────────────────────────────────────────────────
        validate_path_safety(&self.script.entry, "script.entry")?;
        if self.script.runtime == RuntimeKind::Wasm && !self.script.entry.ends_with(".wasm") {
            return Err(PluginError::InvalidConfig(format!(
                "script.entry must end with '.wasm', got '{}'",
                self.script.entry
            )));
        }

        // ── Permissions ─────────────────────────────────────────────
        for host in &self.permissions.http_hosts {
            validate_http_host(host)?;
        }

        // ── Authentication and captcha ──────────────────────────────
        match self.authentication {
            Some(ref auth) => {
                validate_http_url(&auth.login_url, "authentication.login_url")?;
                if let Some(ref done) = auth.completion_url {
                    validate_http_url(done, "authentication.completion_url")?;
                }
            }
            None if self.capabilities.supports(Capability::Login) => {
                return Err(PluginError::InvalidConfig(
                    "login capability requires an [authentication] section".into(),
                ));
            }
            None => {}
        }

        if let Some(url) = self.captcha.as_ref().and_then(|c| c.captcha_url.as_ref()) {
            validate_http_url(url, "captcha.captcha_url")?;
        }

        Ok(())
    }

    pub fn parse_and_validate(toml_str: &str) -> Result<Self, PluginError> {
        let config = Self::parse(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Static capability set, including operations implied by the
    /// `[authentication]` and `[captcha]` sections.
    pub fn declared_capabilities(&self) -> CapabilitySet {
        let mut set = self.capabilities.clone();
        if self.authentication.is_some() && set.get(Capability::Login).is_none() {
            set.insert(Capability::Login, CapabilitySupport::default());
        }
        if self.captcha.as_ref().is_some_and(|c| c.enabled) && set.get(Capability::Captcha).is_none()
        {
            set.insert(Capability::Captcha, CapabilitySupport::default());
        }
        set
    }

    pub fn version(&self) -> Result<semver::Version, PluginError> {
        Ok(semver::Version::parse(&self.plugin.version)?)
    }
}

// ─── Plugin definition ──────────────────────────────────────────────

/// Opaque plugin input: configuration document plus script blob.
#[derive(Clone)]
pub struct PluginDefinition {
    pub config_source: String,
    pub script: Arc<[u8]>,
}

impl std::fmt::Debug for PluginDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDefinition")
            .field("config_len", &self.config_source.len())
            .field("script_len", &self.script.len())
            .finish()
    }
}

impl PluginDefinition {
    pub fn new(config_source: impl Into<String>, script: impl Into<Arc<[u8]>>) -> Self {
        Self {
            config_source: config_source.into(),
            script: script.into(),
        }
    }

    /// Read `plugin.toml` and the script it names from a plugin directory.
    pub async fn read_dir(dir: &Path) -> Result<Self, PluginError> {
        let config_source = tokio::fs::read_to_string(dir.join(CONFIG_FILE)).await?;
        let config = PluginConfig::parse(&config_source)?;
        validate_path_safety(&config.script.entry, "script.entry")?;

        let script: Arc<[u8]> = match config.script.runtime {
            RuntimeKind::Wasm => tokio::fs::read(dir.join(&config.script.entry)).await?.into(),
            RuntimeKind::Native => Arc::from(Vec::new()),
        };

        Ok(Self {
            config_source,
            script,
        })
    }

    pub fn config(&self) -> Result<PluginConfig, PluginError> {
        PluginConfig::parse_and_validate(&self.config_source)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
