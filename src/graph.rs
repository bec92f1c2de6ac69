//! Read-side assembly of the crawled graph for rendering.

use crate::book::Book;
use crate::storage::{Storage, StorageError, StorageResult};
use std::collections::{HashMap, VecDeque};

/// In-memory view of the recommendation graph reachable from a root.
#[derive(Debug, Clone)]
pub struct BookGraph {
    pub root: Book,
    /// Every reachable vertex, sorted by the "Title by Author" identity for
    /// deterministic output.
    pub all: Vec<Book>,
    /// `by_depth[i]` holds the vertices whose minimum distance from the
    /// root is i, each level sorted like `all`.
    pub by_depth: Vec<Vec<Book>>,
}

impl BookGraph {
    /// Breadth-first traversal over stored edges, fetching each vertex
    /// once. A vertex reachable at several depths is assigned its minimum.
    pub async fn assemble(
        storage: &dyn Storage,
        root_url: &str,
        max_depth: u32,
    ) -> StorageResult<Self> {
        let mut books: HashMap<String, Book> = HashMap::new();
        let mut depth_of: HashMap<String, u32> = HashMap::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        queue.push_back((root_url.to_string(), 0));

        while let Some((url, depth)) = queue.pop_front() {
            if depth_of.contains_key(&url) {
                continue;
            }
            let Some(book) = storage.book(&url, 1).await? else {
                continue;
            };
            if depth < max_depth {
                for edge in &book.also_read {
                    if !depth_of.contains_key(&edge.to) {
                        queue.push_back((edge.to.clone(), depth + 1));
                    }
                }
            }
            depth_of.insert(url.clone(), depth);
            books.insert(url, book);
        }

        let root = books
            .get(root_url)
            .cloned()
            .ok_or_else(|| StorageError::BookNotFound(root_url.to_string()))?;

        let mut all: Vec<Book> = books.values().cloned().collect();
        all.sort_by_key(|book| book.to_string());

        let levels = depth_of.values().copied().max().unwrap_or(0) as usize + 1;
        let mut by_depth: Vec<Vec<Book>> = vec![Vec::new(); levels];
        for book in &all {
            let depth = depth_of[&book.url] as usize;
            by_depth[depth].push(book.clone());
        }

        Ok(BookGraph {
            root,
            all,
            by_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn book(url: &str, title: &str) -> Book {
        let mut book = Book::new(url);
        book.title = title.to_string();
        book.author = "Author".to_string();
        book
    }

    async fn seeded_storage() -> MemoryStorage {
        // a -> b[0], a -> c[1], b -> c[0], c -> a[0]
        let storage = MemoryStorage::new();
        for (url, title) in [("u:a", "Alpha"), ("u:b", "Beta"), ("u:c", "Gamma")] {
            storage.set_book(url, &book(url, title)).await.unwrap();
        }
        storage.link_books("u:a", "u:b", 0).await.unwrap();
        storage.link_books("u:a", "u:c", 1).await.unwrap();
        storage.link_books("u:b", "u:c", 0).await.unwrap();
        storage.link_books("u:c", "u:a", 0).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_all_is_sorted_by_identity() {
        let storage = seeded_storage().await;
        let graph = BookGraph::assemble(&storage, "u:a", 3).await.unwrap();
        let titles: Vec<&str> = graph.all.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Beta", "Gamma"]);
        assert_eq!(graph.root.title, "Alpha");
    }

    #[tokio::test]
    async fn test_vertices_get_minimum_depth() {
        let storage = seeded_storage().await;
        let graph = BookGraph::assemble(&storage, "u:a", 3).await.unwrap();

        // Gamma is reachable at depth 1 (a -> c) and depth 2 (a -> b -> c);
        // the minimum wins.
        assert_eq!(graph.by_depth.len(), 2);
        assert_eq!(graph.by_depth[0].len(), 1);
        assert_eq!(graph.by_depth[0][0].title, "Alpha");
        let level1: Vec<&str> = graph.by_depth[1].iter().map(|b| b.title.as_str()).collect();
        assert_eq!(level1, vec!["Beta", "Gamma"]);
    }

    #[tokio::test]
    async fn test_depth_bound_cuts_traversal() {
        let storage = seeded_storage().await;
        let graph = BookGraph::assemble(&storage, "u:a", 0).await.unwrap();
        assert_eq!(graph.all.len(), 1);
        assert_eq!(graph.by_depth.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_root_errors() {
        let storage = MemoryStorage::new();
        let result = BookGraph::assemble(&storage, "u:none", 3).await;
        assert!(matches!(result, Err(StorageError::BookNotFound(_))));
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let storage = MemoryStorage::new();
        storage.set_book("u:a", &book("u:a", "Alpha")).await.unwrap();
        storage.set_book("u:b", &book("u:b", "Beta")).await.unwrap();
        storage.link_books("u:a", "u:b", 0).await.unwrap();
        storage.link_books("u:b", "u:a", 0).await.unwrap();

        let graph = BookGraph::assemble(&storage, "u:a", 10).await.unwrap();
        assert_eq!(graph.all.len(), 2);
    }
}
