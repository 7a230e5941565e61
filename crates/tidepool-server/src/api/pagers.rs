//! Server-side pagers.
//!
//! A paged endpoint returns the first page plus a pager id; the client pulls
//! further pages through `/api/pagers/{id}/next`. Only pagers with more to
//! give are kept: the page that exhausts a pager closes it and carries no
//! id. The store evicts the least recently used pager when full.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tidepool_plugin::{BoxPager, ContentItem, Fault, ReferenceComment};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{fault_response, internal_error, not_found, ApiError, ApiResult};
use super::{cancellable, AppState};

pub const DEFAULT_MAX_OPEN_PAGERS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PagerKind {
    Content,
    Comments,
}

pub enum StoredPager {
    Content(BoxPager<ContentItem>),
    Comments(BoxPager<ReferenceComment>),
}

impl StoredPager {
    fn kind(&self) -> PagerKind {
        match self {
            StoredPager::Content(_) => PagerKind::Content,
            StoredPager::Comments(_) => PagerKind::Comments,
        }
    }

    fn has_more(&self) -> bool {
        match self {
            StoredPager::Content(p) => p.has_more(),
            StoredPager::Comments(p) => p.has_more(),
        }
    }

    fn items(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            StoredPager::Content(p) => serde_json::to_value(p.current_results()),
            StoredPager::Comments(p) => serde_json::to_value(p.current_results()),
        }
    }

    async fn advance(&mut self, cancel: &CancellationToken) -> Result<(), Fault> {
        match self {
            StoredPager::Content(p) => p.advance(cancel).await,
            StoredPager::Comments(p) => p.advance(cancel).await,
        }
    }
}

/// One page as sent to the client. `pager_id` is absent once nothing more
/// can be fetched at the time the page was produced.
#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub pager_id: Option<Uuid>,
    pub plugin_id: Uuid,
    pub kind: PagerKind,
    pub items: serde_json::Value,
    pub has_more: bool,
}

struct PagerEntry {
    plugin_id: Uuid,
    pager: Arc<tokio::sync::Mutex<StoredPager>>,
    last_used: Instant,
}

pub struct PagerStore {
    capacity: usize,
    entries: Mutex<HashMap<Uuid, PagerEntry>>,
}

impl Default for PagerStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OPEN_PAGERS)
    }
}

impl PagerStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Render the pager's current page, keeping the pager if it has more.
    pub fn open(
        &self,
        plugin_id: Uuid,
        pager: StoredPager,
    ) -> Result<PageResponse, serde_json::Error> {
        let items = pager.items()?;
        let kind = pager.kind();
        let has_more = pager.has_more();
        let pager_id = has_more.then(|| self.insert(plugin_id, pager));
        Ok(PageResponse {
            pager_id,
            plugin_id,
            kind,
            items,
            has_more,
        })
    }

    fn insert(&self, plugin_id: Uuid, pager: StoredPager) -> Uuid {
        let id = Uuid::new_v4();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| *id)
            else {
                break;
            };
            entries.remove(&oldest);
            tracing::debug!(pager_id = %oldest, "evicted least recently used pager");
        }
        entries.insert(
            id,
            PagerEntry {
                plugin_id,
                pager: Arc::new(tokio::sync::Mutex::new(pager)),
                last_used: Instant::now(),
            },
        );
        id
    }

    fn get(&self, id: Uuid) -> Option<(Uuid, Arc<tokio::sync::Mutex<StoredPager>>)> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get_mut(&id)?;
        entry.last_used = Instant::now();
        Some((entry.plugin_id, Arc::clone(&entry.pager)))
    }

    pub fn close(&self, id: Uuid) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Drop every pager opened against `plugin_id`.
    pub fn close_plugin(&self, plugin_id: Uuid) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| e.plugin_id != plugin_id);
        before - entries.len()
    }

    pub fn open_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Register a freshly opened pager and render its first page.
pub fn open_page(
    state: &AppState,
    plugin_id: Uuid,
    pager: StoredPager,
) -> Result<PageResponse, ApiError> {
    state.pagers.open(plugin_id, pager).map_err(internal_error)
}

// ─── Handlers ───────────────────────────────────────────────────────────

/// POST /api/pagers/{pager_id}/next: fetch the next page
pub async fn next_page(
    State(state): State<Arc<AppState>>,
    Path(pager_id): Path<Uuid>,
) -> ApiResult<PageResponse> {
    let (plugin_id, pager) = state
        .pagers
        .get(pager_id)
        .ok_or_else(|| not_found("pager", pager_id))?;

    let (kind, items, has_more) = cancellable(move |cancel| async move {
        let mut pager = pager.lock_owned().await;
        pager.advance(&cancel).await?;
        Ok::<_, Fault>((pager.kind(), pager.items(), pager.has_more()))
    })
    .await
    .map_err(fault_response)?;

    if !has_more {
        state.pagers.close(pager_id);
    }
    Ok(Json(PageResponse {
        pager_id: has_more.then_some(pager_id),
        plugin_id,
        kind,
        items: items.map_err(internal_error)?,
        has_more,
    }))
}

/// DELETE /api/pagers/{pager_id}: release a pager
pub async fn close_pager(
    State(state): State<Arc<AppState>>,
    Path(pager_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.pagers.close(pager_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("pager", pager_id))
    }
}
