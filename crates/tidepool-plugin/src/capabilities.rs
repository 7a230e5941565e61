//! Capability model and registry.
//!
//! Each plugin has two capability sets: the one *declared* in its
//! `plugin.toml`, and the one *negotiated* with the running instance. Only
//! the negotiated set decides whether an operation may be dispatched.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operations a plugin may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Home,
    Search,
    ChannelSearch,
    Channel,
    Details,
    Comments,
    Ratings,
    Playlists,
    Login,
    Captcha,
}

impl Capability {
    pub const ALL: [Capability; 10] = [
        Capability::Home,
        Capability::Search,
        Capability::ChannelSearch,
        Capability::Channel,
        Capability::Details,
        Capability::Comments,
        Capability::Ratings,
        Capability::Playlists,
        Capability::Login,
        Capability::Captcha,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Home => "home",
            Capability::Search => "search",
            Capability::ChannelSearch => "channel-search",
            Capability::Channel => "channel",
            Capability::Details => "details",
            Capability::Comments => "comments",
            Capability::Ratings => "ratings",
            Capability::Playlists => "playlists",
            Capability::Login => "login",
            Capability::Captcha => "captcha",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown capability '{s}'"))
    }
}

// ─── Capability metadata ────────────────────────────────────────────────

/// A group of filter values a query may carry (e.g. duration, upload date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub multi_select: bool,
    pub values: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

/// Support entry for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySupport {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sorts: Vec<String>,
}

impl Default for CapabilitySupport {
    fn default() -> Self {
        Self {
            enabled: true,
            filters: Vec::new(),
            sorts: Vec::new(),
        }
    }
}

impl CapabilitySupport {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Filters chosen by the user, keyed by filter group id.
pub type QueryFilters = BTreeMap<String, Vec<String>>;

/// A search or channel query as received from a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub filters: QueryFilters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
}

impl SearchQuery {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

// ─── Capability set ─────────────────────────────────────────────────────

/// Mapping from operation to its support entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    ops: BTreeMap<Capability, CapabilitySupport>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability, support: CapabilitySupport) -> Self {
        self.ops.insert(capability, support);
        self
    }

    pub fn insert(&mut self, capability: Capability, support: CapabilitySupport) {
        self.ops.insert(capability, support);
    }

    pub fn get(&self, capability: Capability) -> Option<&CapabilitySupport> {
        self.ops.get(&capability)
    }

    /// Present and enabled.
    pub fn supports(&self, capability: Capability) -> bool {
        self.ops.get(&capability).is_some_and(|s| s.enabled)
    }

    pub fn enabled(&self) -> impl Iterator<Item = Capability> + '_ {
        self.ops
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(c, _)| *c)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Check a query's filters and sort order against this set's metadata.
    pub fn validate_query(&self, capability: Capability, query: &SearchQuery) -> Result<(), String> {
        let support = self
            .ops
            .get(&capability)
            .filter(|s| s.enabled)
            .ok_or_else(|| format!("{capability} is not supported"))?;

        for (group_id, values) in &query.filters {
            let group = support
                .filters
                .iter()
                .find(|g| &g.id == group_id)
                .ok_or_else(|| format!("unknown filter group '{group_id}' for {capability}"))?;

            if !group.multi_select && values.len() > 1 {
                return Err(format!(
                    "filter group '{group_id}' accepts a single value, got {}",
                    values.len()
                ));
            }

            if let Some(bad) = values.iter().find(|v| !group.values.contains(v)) {
                return Err(format!(
                    "unknown value '{bad}' for filter group '{group_id}'"
                ));
            }
        }

        if let Some(ref sort) = query.sort {
            if !support.sorts.contains(sort) {
                return Err(format!("unsupported sort order '{sort}' for {capability}"));
            }
        }

        Ok(())
    }
}

/// Answer of a plugin's `get_capabilities` export.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Negotiation {
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub authenticated: bool,
}

// ─── Registry ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct CapabilityEntry {
    declared: CapabilitySet,
    negotiated: Option<CapabilitySet>,
}

/// Per-plugin declared and negotiated capability sets.
///
/// Reads are concurrent. Writes of the negotiated set happen only while the
/// owning session holds its call slot, so a negotiated set always matches
/// the session state that produced it.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<Uuid, CapabilityEntry>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the static set. Clears any previous negotiation.
    pub fn declare(&self, plugin_id: Uuid, set: CapabilitySet) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            plugin_id,
            CapabilityEntry {
                declared: set,
                negotiated: None,
            },
        );
    }

    pub(crate) fn record_negotiated(&self, plugin_id: Uuid, set: CapabilitySet) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(plugin_id).or_default().negotiated = Some(set);
    }

    /// Whether `capability` is dispatchable right now.
    pub fn check(&self, plugin_id: Uuid, capability: Capability) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&plugin_id)
            .and_then(|e| e.negotiated.as_ref())
            .is_some_and(|set| set.supports(capability))
    }

    pub fn declared(&self, plugin_id: Uuid) -> Option<CapabilitySet> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&plugin_id).map(|e| e.declared.clone())
    }

    pub fn negotiated(&self, plugin_id: Uuid) -> Option<CapabilitySet> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&plugin_id).and_then(|e| e.negotiated.clone())
    }

    pub fn remove(&self, plugin_id: Uuid) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&plugin_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_support() -> CapabilitySupport {
        CapabilitySupport {
            enabled: true,
            filters: vec![
                FilterGroup {
                    id: "duration".into(),
                    name: "Duration".into(),
                    multi_select: false,
                    values: vec!["short".into(), "long".into()],
                },
                FilterGroup {
                    id: "type".into(),
                    name: "Type".into(),
                    multi_select: true,
                    values: vec!["video".into(), "live".into()],
                },
            ],
            sorts: vec!["relevance".into(), "date".into()],
        }
    }

    // ── Names ────────────────────────────────────────────────────────

    #[test]
    fn test_capability_names_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
            let json = serde_json::to_value(cap).unwrap();
            assert_eq!(json, cap.as_str());
        }
        assert!("teleport".parse::<Capability>().is_err());
    }

    // ── Sets ─────────────────────────────────────────────────────────

    #[test]
    fn test_supports_requires_enabled() {
        let set = CapabilitySet::new()
            .with(Capability::Home, CapabilitySupport::default())
            .with(Capability::Search, CapabilitySupport::disabled());
        assert!(set.supports(Capability::Home));
        assert!(!set.supports(Capability::Search));
        assert!(!set.supports(Capability::Comments));
        assert_eq!(set.enabled().collect::<Vec<_>>(), vec![Capability::Home]);
    }

    #[test]
    fn test_set_deserializes_from_map() {
        let json = r#"{"search":{"sorts":["date"]},"login":{"enabled":false}}"#;
        let set: CapabilitySet = serde_json::from_str(json).unwrap();
        assert!(set.supports(Capability::Search));
        assert!(!set.supports(Capability::Login));
        assert_eq!(set.get(Capability::Search).unwrap().sorts, vec!["date"]);
    }

    #[test]
    fn test_validate_query_accepts_known_filters() {
        let set = CapabilitySet::new().with(Capability::Search, search_support());
        let mut query = SearchQuery::text("cats");
        query.filters.insert("duration".into(), vec!["short".into()]);
        query
            .filters
            .insert("type".into(), vec!["video".into(), "live".into()]);
        query.sort = Some("date".into());
        assert!(set.validate_query(Capability::Search, &query).is_ok());
    }

    #[test]
    fn test_validate_query_rejects_unknown_group() {
        let set = CapabilitySet::new().with(Capability::Search, search_support());
        let mut query = SearchQuery::text("cats");
        query.filters.insert("colour".into(), vec!["red".into()]);
        let err = set.validate_query(Capability::Search, &query).unwrap_err();
        assert!(err.contains("colour"));
    }

    #[test]
    fn test_validate_query_rejects_multi_value_on_single_select() {
        let set = CapabilitySet::new().with(Capability::Search, search_support());
        let mut query = SearchQuery::text("cats");
        query
            .filters
            .insert("duration".into(), vec!["short".into(), "long".into()]);
        assert!(set.validate_query(Capability::Search, &query).is_err());
    }

    #[test]
    fn test_validate_query_rejects_unknown_sort() {
        let set = CapabilitySet::new().with(Capability::Search, search_support());
        let mut query = SearchQuery::text("cats");
        query.sort = Some("views".into());
        let err = set.validate_query(Capability::Search, &query).unwrap_err();
        assert!(err.contains("views"));
    }

    // ── Registry ─────────────────────────────────────────────────────

    #[test]
    fn test_check_uses_negotiated_set_only() {
        let registry = CapabilityRegistry::new();
        let id = Uuid::new_v4();
        registry.declare(
            id,
            CapabilitySet::new().with(Capability::Search, CapabilitySupport::default()),
        );

        assert!(!registry.check(id, Capability::Search));

        registry.record_negotiated(id, CapabilitySet::new());
        assert!(!registry.check(id, Capability::Search));
        assert!(registry.declared(id).unwrap().supports(Capability::Search));

        registry.record_negotiated(
            id,
            CapabilitySet::new().with(Capability::Search, CapabilitySupport::default()),
        );
        assert!(registry.check(id, Capability::Search));
    }

    #[test]
    fn test_declare_resets_negotiation() {
        let registry = CapabilityRegistry::new();
        let id = Uuid::new_v4();
        let set = CapabilitySet::new().with(Capability::Home, CapabilitySupport::default());
        registry.declare(id, set.clone());
        registry.record_negotiated(id, set.clone());
        assert!(registry.check(id, Capability::Home));

        registry.declare(id, set);
        assert!(registry.negotiated(id).is_none());
        assert!(!registry.check(id, Capability::Home));
    }

    #[test]
    fn test_unknown_plugin_checks_false() {
        let registry = CapabilityRegistry::new();
        assert!(!registry.check(Uuid::new_v4(), Capability::Home));
        registry.remove(Uuid::new_v4());
    }
}
