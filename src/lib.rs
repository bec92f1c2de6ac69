//! Concurrent crawler for "readers also enjoyed" book recommendation
//! graphs.
//!
//! The crawler expands the recommendation graph from a single seed page,
//! bounded by a maximum depth and a per-book fan-out, and persists a
//! de-duplicated graph of book vertices and priority-ordered edges. Many
//! workers may discover the same URL concurrently; a compare-and-swap on
//! the per-URL state witness in [`storage::Storage`] decides ownership, so
//! no page is fetched twice and interrupted crawls resume cleanly.

pub mod backoff;
pub mod book;
pub mod cli;
pub mod dot;
pub mod engine;
pub mod extractor;
pub mod fetcher;
pub mod graph;
pub mod logging;
pub mod state;
pub mod storage;
pub mod urls;

pub use book::{Book, BookAttributes, Edge};
pub use engine::{CrawlEngine, CrawlerConfig};
pub use extractor::ExtractError;
pub use fetcher::{Fetch, FetchError, FetchedPage, FetcherConfig, HttpFetcher};
pub use graph::BookGraph;
pub use state::{CrawlState, StateChange};
pub use storage::{GraphDbConfig, GraphDbStorage, MemoryStorage, Storage, StorageError};

use thiserror::Error;

/// Top-level error type for crawl operations.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Fetch(FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A CAS the caller believed it owned did not apply. This signals an
    /// invariant violation, not ordinary contention.
    #[error("unexpected state transition for {url}: {from} -> {to}")]
    StateTransition {
        url: String,
        from: CrawlState,
        to: CrawlState,
    },

    #[error("a crawl is already running on this engine")]
    AlreadyRunning,

    #[error("crawl task failed: {0}")]
    Task(String),

    #[error("crawl cancelled")]
    Cancelled,
}

impl From<FetchError> for CrawlError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Cancelled => CrawlError::Cancelled,
            other => CrawlError::Fetch(other),
        }
    }
}
