//! Book vertex and recommendation edge data model.
//!
//! Books are plain values identified by URL. Edges reference their endpoints
//! by URL rather than by pointer, so the recommendation graph can contain
//! cycles without cyclic ownership: storage holds the one authoritative
//! URL -> Book map and edges are `(from, to, priority)` triples.

use serde::{Deserialize, Serialize};

/// A book vertex. The URL is the sole identity; two fetches yielding the
/// same URL denote the same vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,

    pub author: String,
    pub author_url: String,

    /// Average rating in scaled integer hundredths (4.23 -> 423), -1 unknown.
    pub rating: i32,
    /// Total number of user ratings, -1 unknown.
    pub ratings_total: i32,
    /// Per-star rating counts for 1 through 5 stars, -1 unknown.
    pub ratings_by_star: [i32; 5],

    /// Number of written reviews, -1 unknown.
    pub reviews: i32,

    /// Page count, -1 unknown.
    pub pages: i32,

    /// Genre shelf names in page order.
    pub genres: Vec<String>,

    /// Canonical absolute URL; unique key.
    pub url: String,

    /// Outgoing recommendation edges, priority-ordered ascending.
    pub also_read: Vec<Edge>,
}

impl Book {
    pub fn new(url: impl Into<String>) -> Self {
        Book {
            title: String::new(),
            author: String::new(),
            author_url: String::new(),
            rating: -1,
            ratings_total: -1,
            ratings_by_star: [-1; 5],
            reviews: -1,
            pages: -1,
            genres: Vec::new(),
            url: url.into(),
            also_read: Vec::new(),
        }
    }
}

impl std::fmt::Display for Book {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} by {}", self.title, self.author)
    }
}

/// A directed recommendation edge. Priority is the 0-based position at which
/// the target URL appeared on the source book's related-books page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub priority: usize,
}

/// Attributes extracted from a single book page, before the vertex is
/// persisted or linked into the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct BookAttributes {
    pub title: String,
    pub author: String,
    pub author_url: String,
    pub rating: i32,
    pub ratings_total: i32,
    pub ratings_by_star: [i32; 5],
    pub reviews: i32,
    pub pages: i32,
    pub genres: Vec<String>,
}

impl BookAttributes {
    /// Materialize a `Book` vertex for the given URL, with no edges yet.
    pub fn into_book(self, url: impl Into<String>) -> Book {
        Book {
            title: self.title,
            author: self.author,
            author_url: self.author_url,
            rating: self.rating,
            ratings_total: self.ratings_total,
            ratings_by_star: self.ratings_by_star,
            reviews: self.reviews,
            pages: self.pages,
            genres: self.genres,
            url: url.into(),
            also_read: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_book_uses_unknown_sentinels() {
        let book = Book::new("https://books.test/book/show/1");
        assert_eq!(book.rating, -1);
        assert_eq!(book.ratings_total, -1);
        assert_eq!(book.ratings_by_star, [-1; 5]);
        assert_eq!(book.reviews, -1);
        assert_eq!(book.pages, -1);
        assert!(book.genres.is_empty());
        assert!(book.also_read.is_empty());
    }

    #[test]
    fn test_display_identity() {
        let mut book = Book::new("https://books.test/book/show/1");
        book.title = "Dune".to_string();
        book.author = "Frank Herbert".to_string();
        assert_eq!(book.to_string(), "Dune by Frank Herbert");
    }
}
