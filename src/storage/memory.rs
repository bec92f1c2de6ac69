//! In-process storage backend backed by reader/writer-locked maps.

use crate::book::{Book, Edge};
use crate::state::{CrawlState, StateChange};
use crate::storage::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Concurrent map backend. The state map write lock is what makes the CAS
/// atomic; the books map has its own lock so linking never contends with
/// state transitions.
#[derive(Default)]
pub struct MemoryStorage {
    books: RwLock<HashMap<String, Book>>,
    state: RwLock<HashMap<String, StateChange>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> StorageResult<()> {
        self.books.write().clear();
        self.state.write().clear();
        Ok(())
    }

    async fn book_state(&self, url: &str) -> StorageResult<StateChange> {
        Ok(self.state.read().get(url).copied().unwrap_or_default())
    }

    async fn set_book_state(
        &self,
        url: &str,
        previous: StateChange,
        new: CrawlState,
    ) -> StorageResult<Option<StateChange>> {
        let mut state = self.state.write();

        let current = state.get(url).copied().unwrap_or_default();
        if current != previous {
            return Ok(None);
        }

        let mut when = Utc::now();
        // Timestamps must advance strictly per vertex so a touch CAS never
        // leaves the witness unchanged.
        if when <= current.when {
            when = current.when + chrono::Duration::nanoseconds(1);
        }

        let next = StateChange { state: new, when };
        state.insert(url.to_string(), next);
        Ok(Some(next))
    }

    async fn set_book(&self, url: &str, book: &Book) -> StorageResult<()> {
        let mut books = self.books.write();
        match books.get_mut(url) {
            Some(existing) => {
                let edges = std::mem::take(&mut existing.also_read);
                let mut updated = book.clone();
                updated.also_read = edges;
                *existing = updated;
            }
            None => {
                let mut inserted = book.clone();
                inserted.also_read.clear();
                books.insert(url.to_string(), inserted);
            }
        }
        Ok(())
    }

    async fn book(&self, url: &str, max_depth: u32) -> StorageResult<Option<Book>> {
        let books = self.books.read();
        Ok(books.get(url).map(|book| {
            let mut book = book.clone();
            if max_depth == 0 {
                book.also_read.clear();
            }
            book
        }))
    }

    async fn link_books(&self, from: &str, to: &str, priority: usize) -> StorageResult<()> {
        let mut books = self.books.write();

        if !books.contains_key(from) {
            return Err(StorageError::BookNotFound(from.to_string()));
        }
        // Filtered-out targets were never stored; the edge is dropped.
        if !books.contains_key(to) {
            return Ok(());
        }

        let book = books
            .get_mut(from)
            .ok_or_else(|| StorageError::BookNotFound(from.to_string()))?;
        if book.also_read.iter().any(|edge| edge.to == to) {
            return Ok(());
        }
        book.also_read.push(Edge {
            from: from.to_string(),
            to: to.to_string(),
            priority,
        });
        book.also_read.sort_by_key(|edge| edge.priority);
        Ok(())
    }
}
