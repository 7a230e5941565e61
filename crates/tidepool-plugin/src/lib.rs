//! Tidepool plugin host
//!
//! Loads media-source plugins into sandboxed runtimes (Extism/wasmtime for
//! WASM, Rust closures for built-in sources), negotiates what each plugin can
//! do, and exposes its content through resumable pagers. Every failure that
//! leaves a session is a [`Fault`], flattened at the host boundary into an
//! [`ExceptionModel`].

pub mod capabilities;
pub mod content;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod fault;
pub mod host_functions;
pub mod manifest;
pub mod native;
pub mod pager;
pub mod registry;
pub mod replies;
pub mod sandbox;
pub mod session;
pub mod store;

pub use capabilities::{
    Capability, CapabilityRegistry, CapabilitySet, CapabilitySupport, FilterGroup, QueryFilters,
    SearchQuery,
};
pub use content::{
    AuthorLink, Comment, ContentItem, ContentMeta, PlatformId, Rating, ReferenceComment,
    ReferenceId, Thumbnail,
};
pub use diagnostics::{CallOutcome, DiagnosticEntry, DiagnosticLevel};
pub use error::PluginError;
pub use events::{HostEvent, SessionPhase, SessionSnapshot};
pub use fault::{
    DialogFault, ExceptionModel, Fault, FaultKind, HostResponse, PluginRef, ScriptError,
    ScriptErrorKind, PLUGIN_FAULT_STATUS,
};
pub use manifest::{PluginConfig, PluginDefinition};
pub use native::{NativeRuntime, NativeRuntimeFactory};
pub use pager::{BoxPager, Page, Pager, PlaceholderPager};
pub use registry::{HostConfig, PluginHost};
pub use sandbox::{PluginSandbox, RuntimeFactory, SandboxConfig, ScriptRuntime, WasmRuntimeFactory};
pub use session::PluginSession;
pub use store::{JsonFileStateStore, MemoryStateStore, PersistedState, StateStore};
