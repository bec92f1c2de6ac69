//! Storage backend abstraction.
//!
//! A backend persists three things per URL: the book vertex, the crawl
//! state witness, and the outgoing priority-ordered edges. The state
//! witness update is an atomic compare-and-swap shared by every worker, and
//! is the single linearization point per vertex. Two implementations
//! satisfy the trait: an in-process concurrent map and a graph database.

pub mod graph;
pub mod memory;

pub use graph::{GraphDbConfig, GraphDbStorage, DEFAULT_GRAPH_DB_URL};
pub use memory::MemoryStorage;

use crate::book::Book;
use crate::state::{CrawlState, StateChange};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("book not found: {0}")]
    BookNotFound(String),

    #[error("storage not initialized")]
    NotInitialized,

    #[error("failed to execute query {query:?}: {message}")]
    Query { query: String, message: String },

    #[error("database error: {0}")]
    Database(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations.
///
/// All operations are safe for concurrent callers. In-flight operations are
/// cancelled by dropping their futures, which is how task-group
/// cancellation reaches the backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Prepare the backend. Idempotent; creates indices and constraints
    /// where the backend has them.
    async fn initialize(&self) -> StorageResult<()>;

    /// Release resources. Further calls may fail.
    async fn shutdown(&self) -> StorageResult<()>;

    /// Current state witness for a URL. URLs absent from storage report the
    /// zero value `(NotCrawled, epoch)`.
    async fn book_state(&self, url: &str) -> StorageResult<StateChange>;

    /// Atomic compare-and-swap on the state witness.
    ///
    /// Succeeds iff the stored witness equals `previous` by both state and
    /// timestamp; on success stores `(new, now)` and returns it. A lost
    /// race returns `Ok(None)` and is not an error. The vertex is
    /// merge-created on the first transition out of `NotCrawled`.
    async fn set_book_state(
        &self,
        url: &str,
        previous: StateChange,
        new: CrawlState,
    ) -> StorageResult<Option<StateChange>>;

    /// Merge-upsert the book attributes keyed by URL. Existing edges and
    /// state are left untouched.
    async fn set_book(&self, url: &str, book: &Book) -> StorageResult<()>;

    /// Fetch a vertex with its outgoing edges priority-ordered ascending.
    /// `max_depth == 0` elides the edge list. Returns `None` for URLs whose
    /// attributes were never stored.
    async fn book(&self, url: &str, max_depth: u32) -> StorageResult<Option<Book>>;

    /// Record the directed edge `from -> to` with the given priority.
    /// A no-op when the `(from, to)` edge already exists (the original
    /// priority is preserved) or when the target book was never stored.
    async fn link_books(&self, from: &str, to: &str, priority: usize) -> StorageResult<()>;
}
