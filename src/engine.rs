//! Concurrent crawl scheduler.
//!
//! `CrawlEngine` drives every URL through the storage-backed state machine
//! (`NotCrawled -> BeingCrawled -> Crawled -> Linked`) while recursively
//! expanding the related-book graph up to the configured depth and
//! fan-out. Duplicate work is prevented by the storage CAS: whichever
//! worker wins the witness transition owns the vertex, everyone else backs
//! off. Vertices already handled in the current run are fenced out by
//! comparing the witness timestamp against the run start.

use crate::book::BookAttributes;
use crate::extractor::{self, ExtractError};
use crate::fetcher::Fetch;
use crate::state::{CrawlState, StateChange};
use crate::storage::{Storage, StorageError};
use crate::CrawlError;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use reqwest::Method;
use scraper::Html;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Crawl bounds and vertex filters. Any filter bound set to -1 is
/// unbounded.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Maximum recursion depth; the seed is at depth 0.
    pub max_depth: u32,
    /// Maximum children followed per vertex.
    pub max_read_also: usize,
    pub min_num_ratings: i32,
    pub max_num_ratings: i32,
    /// Scaled integer hundredths, like `Book::rating`.
    pub min_rating: i32,
    pub max_rating: i32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_read_also: 5,
            min_num_ratings: -1,
            max_num_ratings: -1,
            min_rating: -1,
            max_rating: -1,
        }
    }
}

pub struct CrawlEngine {
    config: CrawlerConfig,
    fetcher: Arc<dyn Fetch>,
    storage: Arc<dyn Storage>,

    /// Upper bound on vertex checks this run: a complete tree of arity
    /// `max_read_also` and height `max_depth`. Observability only.
    progress_total: u64,

    run_lock: tokio::sync::Mutex<()>,
    start: RwLock<DateTime<Utc>>,

    crawled: AtomicU64,
    checked: AtomicU64,
}

impl CrawlEngine {
    pub fn new(
        config: CrawlerConfig,
        fetcher: Arc<dyn Fetch>,
        storage: Arc<dyn Storage>,
    ) -> Arc<Self> {
        let progress_total = complete_tree_size(config.max_depth, config.max_read_also);
        Arc::new(Self {
            config,
            fetcher,
            storage,
            progress_total,
            run_lock: tokio::sync::Mutex::new(()),
            start: RwLock::new(DateTime::<Utc>::UNIX_EPOCH),
            crawled: AtomicU64::new(0),
            checked: AtomicU64::new(0),
        })
    }

    /// Books fetched, parsed, and stored this run.
    pub fn crawled(&self) -> u64 {
        self.crawled.load(Ordering::Relaxed)
    }

    /// Vertex checks performed this run, including CAS losses and fence
    /// short-circuits.
    pub fn checked(&self) -> u64 {
        self.checked.load(Ordering::Relaxed)
    }

    /// Crawl the graph rooted at `seed_url`.
    ///
    /// Non-reentrant: a second call while a crawl is in flight fails
    /// immediately. Partial state persisted before an error or
    /// cancellation remains valid and resumable on a later run.
    pub async fn run(self: &Arc<Self>, seed_url: &str) -> Result<(), CrawlError> {
        let _run = self
            .run_lock
            .try_lock()
            .map_err(|_| CrawlError::AlreadyRunning)?;

        *self.start.write() = Utc::now();
        self.crawled.store(0, Ordering::Relaxed);
        self.checked.store(0, Ordering::Relaxed);

        tracing::info!(
            max_depth = self.config.max_depth,
            max_read_also = self.config.max_read_also,
            potential_checks = self.progress_total,
            "starting crawl"
        );

        let cancel = CancellationToken::new();
        let reporter = tokio::spawn(Self::report_progress(Arc::clone(self), cancel.clone()));

        let result = Arc::clone(self)
            .crawl(cancel.clone(), seed_url.to_string(), 0, 0)
            .await;

        cancel.cancel();
        let _ = reporter.await;

        match &result {
            Ok(()) => {
                let checked = self.checked();
                tracing::info!(
                    crawled = self.crawled(),
                    checked,
                    avoided = self.progress_total.saturating_sub(checked),
                    "crawl finished"
                );
            }
            Err(CrawlError::Cancelled) => {}
            Err(error) => tracing::error!(%error, "crawl failed"),
        }
        result
    }

    async fn report_progress(engine: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tracing::info!(
                        checked = engine.checked(),
                        crawled = engine.crawled(),
                        potential_checks = engine.progress_total,
                        "crawl progress"
                    );
                }
            }
        }
    }

    /// Recursive per-vertex routine. `index` is the 0-based position this
    /// URL occupied on its parent's related-books page.
    fn crawl(
        self: Arc<Self>,
        cancel: CancellationToken,
        url: String,
        depth: u32,
        index: usize,
    ) -> BoxFuture<'static, Result<(), CrawlError>> {
        Box::pin(async move {
            if depth > self.config.max_depth {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            self.checked.fetch_add(1, Ordering::Relaxed);

            let sc = self.storage.book_state(&url).await?;
            if sc.when >= *self.start.read() {
                tracing::debug!(%url, depth, index, "already visited in this run, skipping");
                return Ok(());
            }

            match sc.state {
                CrawlState::NotCrawled => self.crawl_new(cancel, url, sc, depth, index).await,
                CrawlState::BeingCrawled => {
                    // Left behind by an interrupted run or the rating
                    // filter; not claimable.
                    tracing::debug!(%url, depth, "vertex stuck in being-crawled, skipping");
                    Ok(())
                }
                CrawlState::Crawled => self.crawl_unlinked(cancel, url, sc, depth).await,
                CrawlState::Linked => self.crawl_linked(cancel, url, sc, depth).await,
            }
        })
    }

    /// First visit: claim the vertex, fetch and store the book, then link
    /// its children.
    async fn crawl_new(
        self: Arc<Self>,
        cancel: CancellationToken,
        url: String,
        sc: StateChange,
        depth: u32,
        index: usize,
    ) -> Result<(), CrawlError> {
        let Some(claimed) = self
            .storage
            .set_book_state(&url, sc, CrawlState::BeingCrawled)
            .await?
        else {
            tracing::debug!(%url, depth, index, "another worker claimed this book");
            return Ok(());
        };

        let page = self.fetcher.fetch(&cancel, Method::GET, &url).await?;
        let (attrs, also_link) = {
            let doc = Html::parse_document(&page.body);
            (
                extractor::extract_book(&doc, &url),
                extractor::extract_also_read_link(&doc, &url),
            )
        };

        if !self.passes_filters(&attrs) {
            tracing::debug!(
                %url,
                rating = attrs.rating,
                ratings = attrs.ratings_total,
                "book outside the configured rating bounds, dropping"
            );
            return Ok(());
        }

        let book = attrs.into_book(url.clone());
        self.storage.set_book(&url, &book).await?;
        let crawled = self.crawled.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            crawled,
            depth,
            index,
            title = %book.title,
            author = %book.author,
            %url,
            "crawled book"
        );

        let claim = self
            .storage
            .set_book_state(&url, claimed, CrawlState::Crawled)
            .await?
            .ok_or_else(|| CrawlError::StateTransition {
                url: url.clone(),
                from: CrawlState::BeingCrawled,
                to: CrawlState::Crawled,
            })?;

        let also_link = also_link.ok_or_else(|| ExtractError::MissingRelatedLink {
            url: url.clone(),
        })?;

        if depth >= self.config.max_depth {
            return self.finish_linking(&url, claim).await;
        }
        self.expand(cancel, url, claim, also_link, depth).await
    }

    /// A vertex stored by an earlier run but never linked: claim it with a
    /// touch and finish its expansion.
    async fn crawl_unlinked(
        self: Arc<Self>,
        cancel: CancellationToken,
        url: String,
        sc: StateChange,
        depth: u32,
    ) -> Result<(), CrawlError> {
        let Some(claim) = self
            .storage
            .set_book_state(&url, sc, CrawlState::Crawled)
            .await?
        else {
            tracing::debug!(%url, depth, "another worker claimed this crawled book");
            return Ok(());
        };

        if depth >= self.config.max_depth {
            return self.finish_linking(&url, claim).await;
        }

        // Rediscover the related-books link from the book page.
        let page = self.fetcher.fetch(&cancel, Method::GET, &url).await?;
        let also_link = {
            let doc = Html::parse_document(&page.body);
            extractor::extract_also_read_link(&doc, &url)
        }
        .ok_or_else(|| ExtractError::MissingRelatedLink { url: url.clone() })?;

        self.expand(cancel, url, claim, also_link, depth).await
    }

    /// A vertex fully linked by an earlier run: claim it with a touch and
    /// re-crawl its stored children, which extends a shallower previous
    /// crawl to this run's depth.
    async fn crawl_linked(
        self: Arc<Self>,
        cancel: CancellationToken,
        url: String,
        sc: StateChange,
        depth: u32,
    ) -> Result<(), CrawlError> {
        let Some(_claim) = self
            .storage
            .set_book_state(&url, sc, CrawlState::Linked)
            .await?
        else {
            tracing::debug!(%url, depth, "another worker claimed this linked book");
            return Ok(());
        };

        let book = self
            .storage
            .book(&url, 1)
            .await?
            .ok_or_else(|| StorageError::BookNotFound(url.clone()))?;

        let group_cancel = cancel.child_token();
        let mut group = JoinSet::new();
        for edge in book.also_read {
            let engine = Arc::clone(&self);
            group.spawn(engine.crawl(group_cancel.clone(), edge.to, depth + 1, edge.priority));
        }
        self.join_group(group, &group_cancel).await
    }

    /// Fetch the related-books page, then concurrently crawl and link up to
    /// `max_read_also` children. The edge list is frozen by the final CAS
    /// to `Linked` once every child task has completed.
    async fn expand(
        self: Arc<Self>,
        cancel: CancellationToken,
        url: String,
        claim: StateChange,
        also_link: String,
        depth: u32,
    ) -> Result<(), CrawlError> {
        let page = self.fetcher.fetch(&cancel, Method::GET, &also_link).await?;
        let mut children = {
            let doc = Html::parse_document(&page.body);
            extractor::extract_related_urls(&doc, &also_link)
        };
        children.truncate(self.config.max_read_also);
        tracing::debug!(%url, children = children.len(), "expanding related books");

        let group_cancel = cancel.child_token();
        let mut group = JoinSet::new();
        for (child_index, child) in children.into_iter().enumerate() {
            let engine = Arc::clone(&self);
            let token = group_cancel.clone();
            let parent = url.clone();
            group.spawn(async move {
                Arc::clone(&engine)
                    .crawl(token, child.clone(), depth + 1, child_index)
                    .await?;
                engine
                    .storage
                    .link_books(&parent, &child, child_index)
                    .await?;
                Ok::<(), CrawlError>(())
            });
        }
        self.join_group(group, &group_cancel).await?;

        self.finish_linking(&url, claim).await
    }

    /// Wait for every child task; the first failure cancels the group and
    /// is the one propagated.
    async fn join_group(
        &self,
        mut group: JoinSet<Result<(), CrawlError>>,
        group_cancel: &CancellationToken,
    ) -> Result<(), CrawlError> {
        let mut first_error: Option<CrawlError> = None;
        while let Some(joined) = group.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) if join_error.is_cancelled() => Ok(()),
                Err(join_error) => Err(CrawlError::Task(join_error.to_string())),
            };
            if let Err(error) = result {
                match &first_error {
                    None => {
                        group_cancel.cancel();
                        first_error = Some(error);
                    }
                    // Keep the most meaningful failure when cancellation
                    // noise arrives first.
                    Some(CrawlError::Cancelled) if !matches!(error, CrawlError::Cancelled) => {
                        first_error = Some(error);
                    }
                    Some(_) => {}
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Freeze the vertex's edge list. The claim witness is ours, so a CAS
    /// loss here is an invariant violation, not contention.
    async fn finish_linking(&self, url: &str, claim: StateChange) -> Result<(), CrawlError> {
        self.storage
            .set_book_state(url, claim, CrawlState::Linked)
            .await?
            .ok_or_else(|| CrawlError::StateTransition {
                url: url.to_string(),
                from: claim.state,
                to: CrawlState::Linked,
            })?;
        Ok(())
    }

    fn passes_filters(&self, attrs: &BookAttributes) -> bool {
        let c = &self.config;
        if c.min_num_ratings >= 0 && attrs.ratings_total < c.min_num_ratings {
            return false;
        }
        if c.max_num_ratings >= 0 && attrs.ratings_total > c.max_num_ratings {
            return false;
        }
        if c.min_rating >= 0 && attrs.rating < c.min_rating {
            return false;
        }
        if c.max_rating >= 0 && attrs.rating > c.max_rating {
            return false;
        }
        true
    }
}

/// Size of a complete tree of the given height and arity; the worst-case
/// number of vertex checks in one run.
fn complete_tree_size(depth: u32, fanout: usize) -> u64 {
    let mut total: u64 = 1;
    let mut level: u64 = 1;
    for _ in 0..depth {
        level = level.saturating_mul(fanout as u64);
        total = total.saturating_add(level);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_tree_size() {
        assert_eq!(complete_tree_size(0, 5), 1);
        assert_eq!(complete_tree_size(1, 5), 6);
        assert_eq!(complete_tree_size(2, 5), 31);
        assert_eq!(complete_tree_size(3, 5), 156);
        assert_eq!(complete_tree_size(3, 0), 1);
        assert_eq!(complete_tree_size(5, 1), 6);
    }

    #[test]
    fn test_tree_size_saturates() {
        assert_eq!(complete_tree_size(u32::MAX, usize::MAX), u64::MAX);
    }

    fn attrs(rating: i32, ratings_total: i32) -> BookAttributes {
        BookAttributes {
            title: "T".to_string(),
            author: "A".to_string(),
            author_url: String::new(),
            rating,
            ratings_total,
            ratings_by_star: [-1; 5],
            reviews: -1,
            pages: -1,
            genres: Vec::new(),
        }
    }

    fn engine_with(config: CrawlerConfig) -> Arc<CrawlEngine> {
        use crate::fetcher::{Fetch, FetchError, FetchedPage};
        use crate::storage::MemoryStorage;
        use async_trait::async_trait;

        struct NoFetch;

        #[async_trait]
        impl Fetch for NoFetch {
            async fn fetch(
                &self,
                _cancel: &CancellationToken,
                _method: Method,
                url: &str,
            ) -> Result<FetchedPage, FetchError> {
                Err(FetchError::Status {
                    status: 404,
                    url: url.to_string(),
                })
            }
        }

        CrawlEngine::new(config, Arc::new(NoFetch), Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_unbounded_filters_pass_everything() {
        let engine = engine_with(CrawlerConfig::default());
        assert!(engine.passes_filters(&attrs(-1, -1)));
        assert!(engine.passes_filters(&attrs(499, 10)));
    }

    #[test]
    fn test_rating_bounds() {
        let engine = engine_with(CrawlerConfig {
            min_rating: 400,
            max_rating: 480,
            ..CrawlerConfig::default()
        });
        assert!(engine.passes_filters(&attrs(423, 100)));
        assert!(!engine.passes_filters(&attrs(350, 100)));
        assert!(!engine.passes_filters(&attrs(490, 100)));
        // Unknown rating falls below any lower bound.
        assert!(!engine.passes_filters(&attrs(-1, 100)));
    }

    #[test]
    fn test_num_ratings_bounds() {
        let engine = engine_with(CrawlerConfig {
            min_num_ratings: 1000,
            max_num_ratings: 100_000,
            ..CrawlerConfig::default()
        });
        assert!(engine.passes_filters(&attrs(423, 5000)));
        assert!(!engine.passes_filters(&attrs(423, 10)));
        assert!(!engine.passes_filters(&attrs(423, 200_000)));
    }
}
