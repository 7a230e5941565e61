//! Content endpoints: home feed, search, channels, details, comments,
//! playlists and ratings.
//!
//! List endpoints answer with the first page and, while more remain, a
//! server-side pager id (see [`super::pagers`]).

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tidepool_plugin::{ContentItem, Fault, QueryFilters, Rating, ReferenceId, SearchQuery};
use uuid::Uuid;

use super::cancellable;
use super::error::{fault_response, ApiResult};
use super::pagers::{open_page, PageResponse, StoredPager};
use super::AppState;

// ─── Request / Response types ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: String,
}

/// Channel listing; a non-empty `query` searches within the channel.
#[derive(Debug, Deserialize)]
pub struct ChannelRequest {
    pub url: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filters: QueryFilters,
    #[serde(default)]
    pub sort: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlaylistResponse {
    pub playlist: ContentItem,
    pub page: PageResponse,
}

#[derive(Debug, Serialize)]
pub struct RatingResponse {
    pub rating: Option<Rating>,
}

// ─── Handlers ───────────────────────────────────────────────────────────

/// GET /api/plugins/{id}/home: first page of the home feed
pub async fn home(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<PageResponse> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    let pager = cancellable(move |cancel| async move { session.get_home(&cancel).await })
        .await
        .map_err(fault_response)?;
    Ok(Json(open_page(&state, id, StoredPager::Content(pager))?))
}

/// POST /api/plugins/{id}/search: search the plugin's platform
pub async fn search(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(query): Json<SearchQuery>,
) -> ApiResult<PageResponse> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    let pager = cancellable(move |cancel| async move { session.search(query, &cancel).await })
        .await
        .map_err(fault_response)?;
    Ok(Json(open_page(&state, id, StoredPager::Content(pager))?))
}

/// POST /api/plugins/{id}/channel: list or search a channel's content
pub async fn channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChannelRequest>,
) -> ApiResult<PageResponse> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    let pager = cancellable(move |cancel| async move {
        match req.query.filter(|q| !q.trim().is_empty()) {
            Some(query) => {
                let query = SearchQuery {
                    query,
                    filters: req.filters,
                    sort: req.sort,
                };
                session.search_channel_content(&req.url, query, &cancel).await
            }
            None => {
                session
                    .get_channel_content(&req.url, req.filters, req.sort, &cancel)
                    .await
            }
        }
    })
    .await
    .map_err(fault_response)?;
    Ok(Json(open_page(&state, id, StoredPager::Content(pager))?))
}

/// GET /api/plugins/{id}/details?url=: full details of one item
pub async fn details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<UrlQuery>,
) -> ApiResult<ContentItem> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    let item = cancellable(move |cancel| async move {
        session.get_content_details(&q.url, &cancel).await
    })
    .await
    .map_err(fault_response)?;
    Ok(Json(item))
}

/// GET /api/plugins/{id}/comments?url=: first page of comments
pub async fn comments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<UrlQuery>,
) -> ApiResult<PageResponse> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    let pager = cancellable(move |cancel| async move {
        session.get_comments(&q.url, &cancel).await
    })
    .await
    .map_err(fault_response)?;
    Ok(Json(open_page(&state, id, StoredPager::Comments(pager))?))
}

/// GET /api/plugins/{id}/replies/{reference_id}: replies to a comment
pub async fn replies(
    State(state): State<Arc<AppState>>,
    Path((id, reference_id)): Path<(Uuid, String)>,
) -> ApiResult<PageResponse> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    let reference = ReferenceId(reference_id);
    let pager = cancellable(move |cancel| async move {
        session.get_replies(&reference, &cancel).await
    })
    .await
    .map_err(fault_response)?;
    Ok(Json(open_page(&state, id, StoredPager::Comments(pager))?))
}

/// GET /api/plugins/{id}/playlist?url=: playlist details plus its first page
pub async fn playlist(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<UrlQuery>,
) -> ApiResult<PlaylistResponse> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    let (playlist, pager) = cancellable(move |cancel| async move {
        let playlist = session.get_playlist(&q.url, &cancel).await?;
        let pager = session.playlist_contents(&playlist)?;
        Ok::<_, Fault>((playlist, pager))
    })
    .await
    .map_err(fault_response)?;
    let page = open_page(&state, id, StoredPager::Content(pager))?;
    Ok(Json(PlaylistResponse { playlist, page }))
}

/// GET /api/plugins/{id}/rating?url=: rating of one item, if the platform has one
pub async fn rating(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<UrlQuery>,
) -> ApiResult<RatingResponse> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    let rating = cancellable(move |cancel| async move {
        session.get_rating(&q.url, &cancel).await
    })
    .await
    .map_err(fault_response)?;
    Ok(Json(RatingResponse { rating }))
}
