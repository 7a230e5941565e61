//! Polymorphic content model.
//!
//! Every item a plugin produces is translated into a [`ContentItem`] variant
//! by a validating constructor. The `content_type` discriminator is the serde
//! tag, so it cannot disagree with the concrete variant.

use std::fmt;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::fault::{Fault, PluginRef};
use crate::pager::{Page, Skeleton};

/// Platform name used for synthesized skeleton items.
pub const PLACEHOLDER_PLATFORM: &str = "placeholder";

// ─── Identity and authorship ────────────────────────────────────────────

/// Stable identifier: platform plus the platform's own id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PlatformId {
    pub platform: String,
    pub value: String,
}

impl PlatformId {
    pub fn new(platform: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.value)
    }
}

/// Reference to an author or channel. Anonymous content carries the default,
/// empty author rather than none.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorLink {
    pub id: PlatformId,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribers: Option<u64>,
}

impl AuthorLink {
    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty() && self.url.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    #[serde(default)]
    pub quality: u32,
}

// ─── Ratings ────────────────────────────────────────────────────────────

/// Exactly one rating shape. An absent rating is `None` at the use site,
/// distinct from a zero-valued one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rating {
    Likes { likes: u64 },
    LikesDislikes { likes: u64, dislikes: u64 },
    /// Normalized score in `0.0..=1.0`.
    Scaler { value: f64 },
}

impl Rating {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Rating::Scaler { value } if !value.is_finite() || !(0.0..=1.0).contains(value) => {
                Err(format!("scaler rating {value} is outside 0..=1"))
            }
            _ => Ok(()),
        }
    }

    pub fn from_raw(plugin: &PluginRef, raw: Value) -> Result<Self, Fault> {
        let rating: Rating = serde_json::from_value(raw)
            .map_err(|e| Fault::validation(plugin, format!("malformed rating: {e}")))?;
        rating
            .validate()
            .map_err(|msg| Fault::validation(plugin, msg))?;
        Ok(rating)
    }
}

// ─── Content items ──────────────────────────────────────────────────────

/// Attributes shared by every content variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMeta {
    pub id: PlatformId,
    pub name: String,
    #[serde(default)]
    pub author: AuthorLink,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DateTime<Utc>>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "content_type", rename_all = "snake_case")]
pub enum ContentItem {
    Video {
        #[serde(flatten)]
        meta: ContentMeta,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        thumbnails: Vec<Thumbnail>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_secs: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        view_count: Option<u64>,
        #[serde(default)]
        is_live: bool,
    },
    Post {
        #[serde(flatten)]
        meta: ContentMeta,
        #[serde(default)]
        description: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        thumbnails: Vec<Thumbnail>,
    },
    PlaylistSummary {
        #[serde(flatten)]
        meta: ContentMeta,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumbnail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_count: Option<u64>,
    },
    PlaylistDetails {
        #[serde(flatten)]
        meta: ContentMeta,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumbnail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_count: Option<u64>,
        /// First page of the playlist's items.
        #[serde(default)]
        contents: Page<ContentItem>,
    },
    NestedMedia {
        #[serde(flatten)]
        meta: ContentMeta,
        content_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nested: Option<Box<ContentItem>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plugin_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plugin_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plugin_thumbnail: Option<String>,
    },
    LockedContent {
        #[serde(flatten)]
        meta: ContentMeta,
        unlock_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lock_description: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        thumbnails: Vec<Thumbnail>,
    },
    /// Host-synthesized loading skeleton. Never accepted from plugins.
    Placeholder {
        #[serde(flatten)]
        meta: ContentMeta,
    },
}

impl ContentItem {
    /// Build an item from raw plugin output.
    ///
    /// Items inside an embedded playlist page that fail validation are
    /// dropped; the playlist itself must be valid.
    pub fn from_raw(plugin: &PluginRef, raw: Value) -> Result<Self, Fault> {
        let mut raw = raw;
        let seed_items = if raw.get("content_type").and_then(Value::as_str) == Some("playlist_details")
        {
            raw.get_mut("contents")
                .and_then(|c| c.get_mut("items"))
                .map(|items| std::mem::replace(items, Value::Array(Vec::new())))
        } else {
            None
        };

        let mut item: ContentItem = serde_json::from_value(raw)
            .map_err(|e| Fault::validation(plugin, format!("malformed content item: {e}")))?;
        item.validate()
            .map_err(|msg| Fault::validation(plugin, msg))?;

        if let (ContentItem::PlaylistDetails { contents, .. }, Some(Value::Array(raw_items))) =
            (&mut item, seed_items)
        {
            contents.items = raw_items
                .into_iter()
                .filter_map(|raw| match ContentItem::from_raw(plugin, raw) {
                    Ok(child) => Some(child),
                    Err(fault) => {
                        tracing::debug!(plugin = %plugin.name, "dropping playlist item: {fault}");
                        None
                    }
                })
                .collect();
        }

        Ok(item)
    }

    fn validate(&self) -> Result<(), String> {
        if let ContentItem::Placeholder { .. } = self {
            return Err("placeholder items cannot come from a plugin".into());
        }

        let meta = self.meta();
        if meta.id.value.trim().is_empty() {
            return Err("item is missing an identifier".into());
        }
        if meta.name.trim().is_empty() {
            return Err(format!("item {} is missing a name", meta.id));
        }
        validate_url(&meta.url, "url")?;
        if let Some(ref share) = meta.share_url {
            validate_url(share, "share_url")?;
        }
        if let Some(ref backend) = meta.backend_url {
            validate_url(backend, "backend_url")?;
        }

        match self {
            ContentItem::NestedMedia {
                content_url,
                nested,
                ..
            } => {
                validate_url(content_url, "content_url")?;
                if let Some(inner) = nested {
                    inner.validate()?;
                }
            }
            ContentItem::LockedContent { unlock_url, .. } => {
                validate_url(unlock_url, "unlock_url")?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn meta(&self) -> &ContentMeta {
        match self {
            ContentItem::Video { meta, .. }
            | ContentItem::Post { meta, .. }
            | ContentItem::PlaylistSummary { meta, .. }
            | ContentItem::PlaylistDetails { meta, .. }
            | ContentItem::NestedMedia { meta, .. }
            | ContentItem::LockedContent { meta, .. }
            | ContentItem::Placeholder { meta } => meta,
        }
    }

    /// Discriminator as it appears on the wire.
    pub fn content_type(&self) -> &'static str {
        match self {
            ContentItem::Video { .. } => "video",
            ContentItem::Post { .. } => "post",
            ContentItem::PlaylistSummary { .. } => "playlist_summary",
            ContentItem::PlaylistDetails { .. } => "playlist_details",
            ContentItem::NestedMedia { .. } => "nested_media",
            ContentItem::LockedContent { .. } => "locked_content",
            ContentItem::Placeholder { .. } => "placeholder",
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ContentItem::Placeholder { .. })
    }
}

fn validate_url(value: &str, field: &str) -> Result<(), String> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| format!("invalid {field} '{value}': {e}"))
}

impl Skeleton for ContentItem {
    fn skeleton(index: usize) -> Self {
        ContentItem::Placeholder {
            meta: ContentMeta {
                id: PlatformId::new(PLACEHOLDER_PLATFORM, index.to_string()),
                name: String::new(),
                author: AuthorLink::default(),
                datetime: None,
                url: String::new(),
                share_url: None,
                backend_url: None,
            },
        }
    }
}

// ─── Comments ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub context_url: String,
    #[serde(default)]
    pub author: AuthorLink,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u64>,
}

impl Skeleton for Comment {
    fn skeleton(_index: usize) -> Self {
        Comment {
            context_url: String::new(),
            author: AuthorLink::default(),
            message: String::new(),
            rating: None,
            datetime: None,
            reply_count: None,
        }
    }
}

/// A comment as a plugin reports it, with the plugin's own reply context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentEntry {
    #[serde(flatten)]
    pub comment: Comment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_context: Option<Value>,
}

impl CommentEntry {
    pub fn from_raw(plugin: &PluginRef, raw: Value) -> Result<Self, Fault> {
        let entry: CommentEntry = serde_json::from_value(raw)
            .map_err(|e| Fault::validation(plugin, format!("malformed comment: {e}")))?;
        validate_url(&entry.comment.context_url, "context_url")
            .map_err(|msg| Fault::validation(plugin, msg))?;
        if let Some(ref rating) = entry.comment.rating {
            rating
                .validate()
                .map_err(|msg| Fault::validation(plugin, msg))?;
        }
        Ok(entry)
    }

    /// Whether replies can be requested for this comment.
    pub fn has_replies(&self) -> bool {
        self.reply_context.as_ref().is_some_and(|c| !c.is_null())
            && self.comment.reply_count != Some(0)
    }
}

/// Opaque handle used to fetch a comment's replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceId(pub String);

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A comment plus the handle for its reply pager. Adds no content fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceComment {
    #[serde(flatten)]
    comment: Comment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_ref: Option<ReferenceId>,
}

impl ReferenceComment {
    pub(crate) fn new(comment: Comment, reply_ref: Option<ReferenceId>) -> Self {
        Self { comment, reply_ref }
    }

    pub fn reply_ref(&self) -> Option<&ReferenceId> {
        self.reply_ref.as_ref()
    }

    pub fn into_comment(self) -> Comment {
        self.comment
    }
}

impl Deref for ReferenceComment {
    type Target = Comment;

    fn deref(&self) -> &Comment {
        &self.comment
    }
}

impl Skeleton for ReferenceComment {
    fn skeleton(index: usize) -> Self {
        ReferenceComment::new(Comment::skeleton(index), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plugin() -> PluginRef {
        PluginRef::new(Uuid::nil(), "content-test")
    }

    fn raw_video() -> Value {
        json!({
            "content_type": "video",
            "id": { "platform": "tube", "value": "abc123" },
            "name": "A video",
            "author": { "name": "Someone", "url": "https://tube.example/u/someone" },
            "datetime": "2024-05-01T12:00:00Z",
            "url": "https://tube.example/watch?v=abc123",
            "duration_secs": 300,
            "view_count": 42
        })
    }

    // ── Construction ─────────────────────────────────────────────────

    #[test]
    fn test_video_round_trip_keeps_discriminator() {
        let item = ContentItem::from_raw(&plugin(), raw_video()).unwrap();
        assert_eq!(item.content_type(), "video");

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["content_type"], "video");
        assert_eq!(json["id"]["value"], "abc123");
        assert_eq!(json["url"], "https://tube.example/watch?v=abc123");

        let back = ContentItem::from_raw(&plugin(), json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_nested_and_locked_round_trip() {
        let nested = json!({
            "content_type": "nested_media",
            "id": { "platform": "feed", "value": "n1" },
            "name": "Shared clip",
            "url": "https://feed.example/p/n1",
            "content_url": "https://tube.example/watch?v=abc123",
            "nested": raw_video(),
            "plugin_name": "tube"
        });
        let locked = json!({
            "content_type": "locked_content",
            "id": { "platform": "club", "value": "l1" },
            "name": "Members only",
            "url": "https://club.example/v/l1",
            "unlock_url": "https://club.example/join"
        });

        for raw in [nested, locked] {
            let item = ContentItem::from_raw(&plugin(), raw).unwrap();
            let json = serde_json::to_value(&item).unwrap();
            let back = ContentItem::from_raw(&plugin(), json).unwrap();
            assert_eq!(back.content_type(), item.content_type());
            assert_eq!(back, item);
        }
    }

    #[test]
    fn test_anonymous_author_defaults_to_empty() {
        let mut raw = raw_video();
        raw.as_object_mut().unwrap().remove("author");
        let item = ContentItem::from_raw(&plugin(), raw).unwrap();
        assert!(item.meta().author.is_anonymous());
    }

    #[test]
    fn test_missing_identifier_is_validation_fault() {
        let mut raw = raw_video();
        raw["id"]["value"] = json!("");
        let err = ContentItem::from_raw(&plugin(), raw).unwrap_err();
        assert!(matches!(err, Fault::Validation { .. }));
    }

    #[test]
    fn test_missing_name_or_url_rejected() {
        let mut no_name = raw_video();
        no_name["name"] = json!("  ");
        assert!(ContentItem::from_raw(&plugin(), no_name).is_err());

        let mut bad_url = raw_video();
        bad_url["url"] = json!("not a url");
        assert!(ContentItem::from_raw(&plugin(), bad_url).is_err());

        let mut no_url = raw_video();
        no_url.as_object_mut().unwrap().remove("url");
        assert!(ContentItem::from_raw(&plugin(), no_url).is_err());
    }

    #[test]
    fn test_locked_content_requires_unlock_url() {
        let raw = json!({
            "content_type": "locked_content",
            "id": { "platform": "club", "value": "l1" },
            "name": "Members only",
            "url": "https://club.example/v/l1"
        });
        assert!(ContentItem::from_raw(&plugin(), raw).is_err());
    }

    #[test]
    fn test_placeholder_rejected_from_plugins() {
        let raw = serde_json::to_value(ContentItem::skeleton(0)).unwrap();
        assert_eq!(raw["content_type"], "placeholder");
        assert!(ContentItem::from_raw(&plugin(), raw).is_err());
    }

    #[test]
    fn test_unknown_discriminator_rejected() {
        let mut raw = raw_video();
        raw["content_type"] = json!("hologram");
        assert!(ContentItem::from_raw(&plugin(), raw).is_err());
    }

    #[test]
    fn test_playlist_details_drops_invalid_children() {
        let mut broken = raw_video();
        broken["url"] = json!("nope");
        let raw = json!({
            "content_type": "playlist_details",
            "id": { "platform": "tube", "value": "pl1" },
            "name": "Mix",
            "url": "https://tube.example/playlist?list=pl1",
            "contents": {
                "items": [raw_video(), broken, { "content_type": "video" }],
                "has_more": true,
                "continuation": "page-2"
            }
        });

        let item = ContentItem::from_raw(&plugin(), raw).unwrap();
        let ContentItem::PlaylistDetails { contents, .. } = item else {
            panic!("expected playlist details");
        };
        assert_eq!(contents.items.len(), 1);
        assert!(contents.has_more);
        assert_eq!(contents.continuation, Some(json!("page-2")));
    }

    // ── Ratings ──────────────────────────────────────────────────────

    #[test]
    fn test_rating_variants() {
        let likes = Rating::from_raw(&plugin(), json!({"type": "likes", "likes": 0})).unwrap();
        assert_eq!(likes, Rating::Likes { likes: 0 });

        let both = Rating::from_raw(
            &plugin(),
            json!({"type": "likes_dislikes", "likes": 10, "dislikes": 2}),
        )
        .unwrap();
        assert_eq!(
            both,
            Rating::LikesDislikes {
                likes: 10,
                dislikes: 2
            }
        );

        assert!(Rating::from_raw(&plugin(), json!({"type": "scaler", "value": 1.5})).is_err());
        assert!(Rating::from_raw(&plugin(), json!({"likes": 3})).is_err());
    }

    // ── Comments ─────────────────────────────────────────────────────

    #[test]
    fn test_comment_entry_keeps_reply_context() {
        let raw = json!({
            "context_url": "https://tube.example/watch?v=abc123",
            "author": { "name": "Someone" },
            "message": "first",
            "rating": { "type": "likes", "likes": 4 },
            "reply_count": 2,
            "reply_context": { "thread": "t-1" }
        });
        let entry = CommentEntry::from_raw(&plugin(), raw).unwrap();
        assert_eq!(entry.comment.message, "first");
        assert!(entry.has_replies());
        assert_eq!(entry.reply_context, Some(json!({ "thread": "t-1" })));
    }

    #[test]
    fn test_comment_with_bad_context_url_rejected() {
        let raw = json!({ "context_url": "", "message": "hi" });
        assert!(CommentEntry::from_raw(&plugin(), raw).is_err());
    }

    #[test]
    fn test_reference_comment_derefs_to_comment() {
        let comment = Comment {
            message: "hello".into(),
            context_url: "https://tube.example/watch?v=1".into(),
            ..Comment::skeleton(0)
        };
        let reference = ReferenceComment::new(comment, Some(ReferenceId("r-1".into())));
        assert_eq!(reference.message, "hello");
        assert_eq!(reference.reply_ref().map(|r| r.0.as_str()), Some("r-1"));

        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["message"], "hello");
        assert_eq!(json["reply_ref"], "r-1");
    }
}
