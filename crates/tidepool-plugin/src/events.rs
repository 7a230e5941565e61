//! Session lifecycle phases and the snapshots broadcast on every transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capabilities::CapabilitySet;
use crate::fault::ExceptionModel;

/// Lifecycle phase of a plugin session.
///
/// `Unloaded → Loading → Initialized → {Ready, Faulted}`. A faulted session
/// only leaves that phase through a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unloaded,
    Loading,
    Initialized,
    Ready,
    Faulted,
}

impl SessionPhase {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Unloaded, Loading)
                | (Loading, Initialized)
                | (Loading, Faulted)
                | (Initialized, Ready)
                | (Initialized, Faulted)
                | (Ready, Faulted)
                | (Ready, Unloaded)
                | (Faulted, Unloaded)
                | (Initialized, Unloaded)
                | (Loading, Unloaded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Faulted | SessionPhase::Unloaded)
    }
}

/// Point-in-time view of one session, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub plugin_id: Uuid,
    pub plugin_name: String,
    pub version: String,
    pub phase: SessionPhase,
    pub logged_in: bool,
    pub captcha_required: bool,
    pub update_available: bool,
    pub declared: CapabilitySet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negotiated: Option<CapabilitySet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<ExceptionModel>,
    pub at: DateTime<Utc>,
}

/// Event published on the host's broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    StateChanged(SessionSnapshot),
    Unloaded { plugin_id: Uuid },
}

impl HostEvent {
    pub fn plugin_id(&self) -> Uuid {
        match self {
            HostEvent::StateChanged(snapshot) => snapshot.plugin_id,
            HostEvent::Unloaded { plugin_id } => *plugin_id,
        }
    }
}
