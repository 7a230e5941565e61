//! Resumable result sequences.
//!
//! Every list-producing operation hands back a [`Pager`]. `current_results`
//! only ever reads the materialized page; `advance` is the single place a
//! fetch may happen, and a failed fetch leaves the pager exactly as it was.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::fault::Fault;

/// Items that can be synthesized as loading skeletons.
pub trait Skeleton: Sized {
    fn skeleton(index: usize) -> Self;
}

/// A resumable, forward-only sequence of result pages.
#[async_trait]
pub trait Pager<T: Send>: Send {
    /// The materialized page, in upstream order. Never fetches.
    fn current_results(&self) -> &[T];

    fn has_more(&self) -> bool;

    /// Replace the current page with the next one.
    ///
    /// On a pager with nothing more to give this succeeds and leaves an empty
    /// page behind; calling it again changes nothing.
    async fn advance(&mut self, cancel: &CancellationToken) -> Result<(), Fault>;

    fn is_exhausted(&self) -> bool {
        !self.has_more() && self.current_results().is_empty()
    }
}

pub type BoxPager<T> = Box<dyn Pager<T>>;

/// One page as returned by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<Value>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            continuation: None,
        }
    }
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            has_more: false,
            continuation: None,
        }
    }

    pub fn with_continuation(items: Vec<T>, continuation: Value) -> Self {
        Self {
            items,
            has_more: true,
            continuation: Some(continuation),
        }
    }
}

/// Fetches one page given the continuation left by the previous one.
#[async_trait]
pub trait PageFetcher<T>: Send + Sync {
    async fn fetch(
        &self,
        continuation: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Page<T>, Fault>;
}

// ─── Source pager ───────────────────────────────────────────────────────

/// Pager backed by a [`PageFetcher`], following the fetcher's continuations.
pub struct SourcePager<T> {
    fetcher: Box<dyn PageFetcher<T>>,
    page: Vec<T>,
    has_more: bool,
    continuation: Option<Value>,
}

impl<T: Send + 'static> SourcePager<T> {
    /// Lazy pager: empty until the first `advance`.
    pub fn new(fetcher: impl PageFetcher<T> + 'static) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            page: Vec::new(),
            has_more: true,
            continuation: None,
        }
    }

    /// Pager whose first page is already known.
    pub fn with_seed(seed: Page<T>, fetcher: impl PageFetcher<T> + 'static) -> Self {
        let mut pager = Self::new(fetcher);
        pager.install(seed);
        pager
    }

    fn install(&mut self, page: Page<T>) {
        if page.has_more && page.continuation.is_none() {
            tracing::warn!("page reported more results without a continuation; treating as last");
        }
        self.has_more = page.has_more && page.continuation.is_some();
        self.continuation = page.continuation;
        self.page = page.items;
    }
}

#[async_trait]
impl<T: Send + 'static> Pager<T> for SourcePager<T> {
    fn current_results(&self) -> &[T] {
        &self.page
    }

    fn has_more(&self) -> bool {
        self.has_more
    }

    async fn advance(&mut self, cancel: &CancellationToken) -> Result<(), Fault> {
        if !self.has_more {
            self.page.clear();
            self.continuation = None;
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(Fault::Cancelled);
        }

        let page = self
            .fetcher
            .fetch(self.continuation.clone(), cancel)
            .await?;
        self.install(page);
        Ok(())
    }
}

// ─── Placeholder pager ──────────────────────────────────────────────────

/// Fixed set of skeleton items shown while real content loads.
pub struct PlaceholderPager<T> {
    items: Vec<T>,
}

impl<T: Skeleton> PlaceholderPager<T> {
    pub fn new(count: usize) -> Self {
        Self {
            items: (0..count).map(T::skeleton).collect(),
        }
    }
}

#[async_trait]
impl<T: Skeleton + Send> Pager<T> for PlaceholderPager<T> {
    fn current_results(&self) -> &[T] {
        &self.items
    }

    fn has_more(&self) -> bool {
        false
    }

    async fn advance(&mut self, _cancel: &CancellationToken) -> Result<(), Fault> {
        Ok(())
    }
}

// ─── Reference pager ────────────────────────────────────────────────────

type Attach<R, T> = Box<dyn Fn(&R) -> T + Send + Sync>;

/// Decorates an inner pager, attaching context to each raw item when a page
/// is materialized. Never fetches on its own.
pub struct ReferencePager<R: Send, T> {
    inner: BoxPager<R>,
    attach: Attach<R, T>,
    results: Vec<T>,
}

impl<R: Send, T> ReferencePager<R, T> {
    pub fn new(inner: BoxPager<R>, attach: impl Fn(&R) -> T + Send + Sync + 'static) -> Self {
        let attach: Attach<R, T> = Box::new(attach);
        let results = inner.current_results().iter().map(|raw| attach(raw)).collect();
        Self {
            inner,
            attach,
            results,
        }
    }
}

#[async_trait]
impl<R: Send, T: Send> Pager<T> for ReferencePager<R, T> {
    fn current_results(&self) -> &[T] {
        &self.results
    }

    fn has_more(&self) -> bool {
        self.inner.has_more()
    }

    async fn advance(&mut self, cancel: &CancellationToken) -> Result<(), Fault> {
        self.inner.advance(cancel).await?;
        self.results = self
            .inner
            .current_results()
            .iter()
            .map(|raw| (self.attach)(raw))
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::PluginRef;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// Serves scripted pages and counts fetches.
    struct ScriptedFetcher {
        pages: Mutex<VecDeque<Result<Page<u32>, Fault>>>,
        seen: Arc<Mutex<Vec<Option<Value>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedFetcher {
        fn new(pages: Vec<Result<Page<u32>, Fault>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                seen: Arc::new(Mutex::new(Vec::new())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl PageFetcher<u32> for ScriptedFetcher {
        async fn fetch(
            &self,
            continuation: Option<Value>,
            _cancel: &CancellationToken,
        ) -> Result<Page<u32>, Fault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(continuation);
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::default()))
        }
    }

    fn plugin() -> PluginRef {
        PluginRef::new(Uuid::nil(), "pager-test")
    }

    #[derive(Debug, PartialEq)]
    struct Bone(usize);

    impl Skeleton for Bone {
        fn skeleton(index: usize) -> Self {
            Bone(index)
        }
    }

    // ── Source pager ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_lazy_pager_is_empty_until_advanced() {
        let fetcher = ScriptedFetcher::new(vec![Ok(Page::last(vec![1, 2]))]);
        let calls = fetcher.calls.clone();
        let mut pager = SourcePager::new(fetcher);

        assert!(pager.current_results().is_empty());
        assert!(pager.has_more());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        pager.advance(&CancellationToken::new()).await.unwrap();
        assert_eq!(pager.current_results(), &[1, 2]);
        assert!(!pager.has_more());
    }

    #[tokio::test]
    async fn test_continuations_are_forwarded() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(Page::with_continuation(vec![1], serde_json::json!({"page": 2}))),
            Ok(Page::last(vec![2])),
        ]);
        let seen = fetcher.seen.clone();
        let mut pager = SourcePager::new(fetcher);
        let cancel = CancellationToken::new();

        pager.advance(&cancel).await.unwrap();
        pager.advance(&cancel).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], None);
        assert_eq!(seen[1], Some(serde_json::json!({"page": 2})));
        assert_eq!(pager.current_results(), &[2]);
    }

    #[tokio::test]
    async fn test_failed_advance_leaves_state_untouched() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(Page::with_continuation(vec![1, 2], serde_json::json!("c1"))),
            Err(Fault::validation(&plugin(), "garbage page")),
        ]);
        let seen = fetcher.seen.clone();
        let mut pager = SourcePager::new(fetcher);
        let cancel = CancellationToken::new();

        pager.advance(&cancel).await.unwrap();
        let err = pager.advance(&cancel).await.unwrap_err();
        assert!(matches!(err, Fault::Validation { .. }));

        assert_eq!(pager.current_results(), &[1, 2]);
        assert!(pager.has_more());
        assert_eq!(pager.continuation, Some(serde_json::json!("c1")));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_advance_is_idempotent() {
        let fetcher = ScriptedFetcher::new(vec![Ok(Page::last(vec![7]))]);
        let calls = fetcher.calls.clone();
        let mut pager = SourcePager::new(fetcher);
        let cancel = CancellationToken::new();

        pager.advance(&cancel).await.unwrap();
        pager.advance(&cancel).await.unwrap();
        assert!(pager.is_exhausted());

        pager.advance(&cancel).await.unwrap();
        assert!(pager.is_exhausted());
        assert!(pager.current_results().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_has_more_without_continuation_is_last() {
        let page = Page {
            items: vec![1],
            has_more: true,
            continuation: None,
        };
        let pager = SourcePager::with_seed(page, ScriptedFetcher::new(vec![]));
        assert!(!pager.has_more());
        assert_eq!(pager.current_results(), &[1]);
    }

    #[tokio::test]
    async fn test_cancelled_advance_does_not_fetch() {
        let fetcher = ScriptedFetcher::new(vec![Ok(Page::last(vec![1]))]);
        let calls = fetcher.calls.clone();
        let mut pager = SourcePager::new(fetcher);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pager.advance(&cancel).await.unwrap_err();
        assert!(matches!(err, Fault::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(pager.has_more());
    }

    // ── Placeholder pager ────────────────────────────────────────────

    #[tokio::test]
    async fn test_placeholder_pager_never_grows() {
        let mut pager = PlaceholderPager::<Bone>::new(3);
        assert_eq!(pager.current_results(), &[Bone(0), Bone(1), Bone(2)]);
        assert!(!pager.has_more());

        pager.advance(&CancellationToken::new()).await.unwrap();
        assert_eq!(pager.current_results().len(), 3);
        assert!(!pager.has_more());
    }

    // ── Reference pager ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_reference_pager_attaches_without_refetching() {
        let fetcher = ScriptedFetcher::new(vec![Ok(Page::last(vec![3, 4]))]);
        let calls = fetcher.calls.clone();
        let seed = Page::with_continuation(vec![1, 2], serde_json::json!("next"));
        let inner: BoxPager<u32> = Box::new(SourcePager::with_seed(seed, fetcher));

        let attached = Arc::new(AtomicUsize::new(0));
        let counter = attached.clone();
        let mut pager = ReferencePager::new(inner, move |n: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            format!("item-{n}")
        });

        assert_eq!(pager.current_results(), &["item-1", "item-2"]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        pager.advance(&CancellationToken::new()).await.unwrap();
        assert_eq!(pager.current_results(), &["item-3", "item-4"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(attached.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhausted_reference_pager_is_stable() {
        let inner: BoxPager<u32> = Box::new(SourcePager::with_seed(
            Page::last(vec![1]),
            ScriptedFetcher::new(vec![]),
        ));
        let mut pager = ReferencePager::new(inner, |n: &u32| n * 10);
        let cancel = CancellationToken::new();

        pager.advance(&cancel).await.unwrap();
        let first: Vec<u32> = pager.current_results().to_vec();
        let first_more = pager.has_more();

        pager.advance(&cancel).await.unwrap();
        assert_eq!(pager.current_results(), first.as_slice());
        assert_eq!(pager.has_more(), first_more);
        assert!(pager.is_exhausted());
    }
}
