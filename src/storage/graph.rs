//! Graph database storage backend over the bolt protocol.
//!
//! Books are `(:Book)` nodes keyed by a unique `url` property, authors are
//! `(:Person)` nodes with `(:Person)-[:AUTHORED]->(:Book)` relationships,
//! and recommendations are `(:Book)-[:ALSO_READ {priority}]->(:Book)`
//! relationships. The crawl state witness lives on the book node as
//! `crawlState` plus `crawlStateChanged` in epoch milliseconds, so the CAS
//! comparison is an exact integer match.

use crate::book::{Book, Edge};
use crate::state::{CrawlState, StateChange};
use crate::storage::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, ConfigBuilder, Graph, Node, Query};
use parking_lot::RwLock;
use std::time::Duration;

pub const DEFAULT_GRAPH_DB_URL: &str = "neo4j://localhost:7687";

const INIT_STATEMENTS: &[&str] = &[
    "CREATE CONSTRAINT IF NOT EXISTS FOR (b:Book) REQUIRE b.url IS UNIQUE",
    "CREATE CONSTRAINT IF NOT EXISTS FOR (p:Person) REQUIRE p.url IS UNIQUE",
    "CREATE INDEX IF NOT EXISTS FOR (b:Book) ON (b.title)",
];

/// Transient faults (lost connections, leader switches, deadlocks) surface
/// as query errors; each statement is re-run a bounded number of times.
const MAX_QUERY_ATTEMPTS: u32 = 3;
const QUERY_RETRY_WAIT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct GraphDbConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

impl Default for GraphDbConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GRAPH_DB_URL.to_string(),
            user: String::new(),
            password: String::new(),
        }
    }
}

pub struct GraphDbStorage {
    config: GraphDbConfig,
    driver: RwLock<Option<Graph>>,
}

impl GraphDbStorage {
    pub fn new(config: GraphDbConfig) -> Self {
        Self {
            config,
            driver: RwLock::new(None),
        }
    }

    fn driver(&self) -> StorageResult<Graph> {
        self.driver
            .read()
            .clone()
            .ok_or(StorageError::NotInitialized)
    }

    async fn run_write(&self, cypher: &str, q: Query) -> StorageResult<()> {
        let driver = self.driver()?;
        let mut attempt = 1;
        loop {
            match driver.run(q.clone()).await {
                Ok(()) => return Ok(()),
                Err(error) if attempt < MAX_QUERY_ATTEMPTS => {
                    tracing::warn!(query = cypher, attempt, %error, "retrying graph-db query");
                    tokio::time::sleep(QUERY_RETRY_WAIT).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(StorageError::Query {
                        query: cypher.to_string(),
                        message: error.to_string(),
                    })
                }
            }
        }
    }

    async fn fetch_rows(&self, cypher: &str, q: Query) -> StorageResult<Vec<neo4rs::Row>> {
        let driver = self.driver()?;
        let mut attempt = 1;
        loop {
            let result = async {
                let mut stream = driver.execute(q.clone()).await?;
                let mut rows = Vec::new();
                while let Some(row) = stream.next().await? {
                    rows.push(row);
                }
                Ok::<_, neo4rs::Error>(rows)
            }
            .await;

            match result {
                Ok(rows) => return Ok(rows),
                Err(error) if attempt < MAX_QUERY_ATTEMPTS => {
                    tracing::warn!(query = cypher, attempt, %error, "retrying graph-db query");
                    tokio::time::sleep(QUERY_RETRY_WAIT).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(StorageError::Query {
                        query: cypher.to_string(),
                        message: error.to_string(),
                    })
                }
            }
        }
    }
}

/// Epoch milliseconds for the persisted witness timestamp.
fn to_millis(when: DateTime<Utc>) -> i64 {
    when.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn node_book(node: &Node, author: String, author_url: String) -> Book {
    let url: String = node.get("url").unwrap_or_default();
    let mut book = Book::new(url);
    book.title = node.get("title").unwrap_or_default();
    book.author = author;
    book.author_url = author_url;
    book.rating = node.get::<i64>("rating").unwrap_or(-1) as i32;
    book.ratings_total = node.get::<i64>("ratings").unwrap_or(-1) as i32;
    book.reviews = node.get::<i64>("reviews").unwrap_or(-1) as i32;
    book.pages = node.get::<i64>("pages").unwrap_or(-1) as i32;
    book.genres = node.get::<Vec<String>>("genres").unwrap_or_default();
    let stars = node.get::<Vec<i64>>("ratingsByStar").unwrap_or_default();
    for (slot, value) in book.ratings_by_star.iter_mut().zip(stars) {
        *slot = value as i32;
    }
    book
}

#[async_trait]
impl Storage for GraphDbStorage {
    async fn initialize(&self) -> StorageResult<()> {
        let mut builder = ConfigBuilder::default().uri(self.config.url.clone());
        if !self.config.user.is_empty() {
            builder = builder
                .user(self.config.user.clone())
                .password(self.config.password.clone());
        }
        let config = builder
            .build()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let driver = Graph::connect(config)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;
        *self.driver.write() = Some(driver);

        for statement in INIT_STATEMENTS {
            self.run_write(statement, query(statement)).await?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> StorageResult<()> {
        *self.driver.write() = None;
        Ok(())
    }

    async fn book_state(&self, url: &str) -> StorageResult<StateChange> {
        let cypher = "MATCH (b:Book {url: $url}) \
                      RETURN b.crawlState AS state, b.crawlStateChanged AS changed";
        let rows = self
            .fetch_rows(cypher, query(cypher).param("url", url))
            .await?;

        let Some(row) = rows.first() else {
            return Ok(StateChange::default());
        };
        let state = row.get::<i64>("state").unwrap_or(0);
        let changed = row.get::<i64>("changed").unwrap_or(0);
        Ok(StateChange {
            state: CrawlState::from_i64(state).unwrap_or(CrawlState::NotCrawled),
            when: from_millis(changed),
        })
    }

    async fn set_book_state(
        &self,
        url: &str,
        previous: StateChange,
        new: CrawlState,
    ) -> StorageResult<Option<StateChange>> {
        // Single-statement CAS: the vertex is merge-created carrying the
        // caller's witness, then updated only when that witness still
        // matches by both state and timestamp.
        let cypher = "MERGE (b:Book {url: $url}) \
                      ON CREATE SET b.crawlState = $prev_state, b.crawlStateChanged = $prev_changed \
                      WITH b \
                      WHERE b.crawlState = $prev_state AND b.crawlStateChanged = $prev_changed \
                      SET b.crawlState = $new_state, b.crawlStateChanged = $new_changed \
                      RETURN b.crawlState AS state";

        let prev_millis = to_millis(previous.when);
        let new_millis = to_millis(Utc::now()).max(prev_millis + 1);
        let rows = self
            .fetch_rows(
                cypher,
                query(cypher)
                    .param("url", url)
                    .param("prev_state", previous.state as i64)
                    .param("prev_changed", prev_millis)
                    .param("new_state", new as i64)
                    .param("new_changed", new_millis),
            )
            .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(StateChange {
            state: new,
            when: from_millis(new_millis),
        }))
    }

    async fn set_book(&self, url: &str, book: &Book) -> StorageResult<()> {
        let cypher = if book.author_url.is_empty() {
            "MERGE (b:Book {url: $url}) \
             SET b.title = $title, b.rating = $rating, b.ratings = $ratings, \
                 b.ratingsByStar = $ratings_by_star, b.reviews = $reviews, \
                 b.pages = $pages, b.genres = $genres"
        } else {
            "MERGE (b:Book {url: $url}) \
             SET b.title = $title, b.rating = $rating, b.ratings = $ratings, \
                 b.ratingsByStar = $ratings_by_star, b.reviews = $reviews, \
                 b.pages = $pages, b.genres = $genres \
             MERGE (p:Person {url: $author_url}) \
             SET p.name = $author \
             MERGE (p)-[:AUTHORED]->(b)"
        };

        let stars: Vec<i64> = book.ratings_by_star.iter().map(|v| *v as i64).collect();
        let mut q = query(cypher)
            .param("url", url)
            .param("title", book.title.as_str())
            .param("rating", book.rating as i64)
            .param("ratings", book.ratings_total as i64)
            .param("ratings_by_star", stars)
            .param("reviews", book.reviews as i64)
            .param("pages", book.pages as i64)
            .param("genres", book.genres.clone());
        if !book.author_url.is_empty() {
            q = q
                .param("author_url", book.author_url.as_str())
                .param("author", book.author.as_str());
        }
        self.run_write(cypher, q).await
    }

    async fn book(&self, url: &str, max_depth: u32) -> StorageResult<Option<Book>> {
        // State-only vertices (claimed but never stored) have no title and
        // are reported as absent, matching the in-memory backend.
        let cypher = "MATCH (b:Book {url: $url}) \
                      WHERE b.title IS NOT NULL \
                      OPTIONAL MATCH (p:Person)-[:AUTHORED]->(b) \
                      RETURN b, p.name AS author, p.url AS author_url";
        let rows = self
            .fetch_rows(cypher, query(cypher).param("url", url))
            .await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let node: Node = row.get("b").map_err(|e| StorageError::Query {
            query: cypher.to_string(),
            message: e.to_string(),
        })?;
        let author = row.get::<String>("author").unwrap_or_default();
        let author_url = row.get::<String>("author_url").unwrap_or_default();
        let mut book = node_book(&node, author, author_url);

        if max_depth > 0 {
            let edge_cypher = "MATCH (b:Book {url: $url})-[r:ALSO_READ]->(o:Book) \
                               WHERE o.title IS NOT NULL \
                               RETURN r.priority AS priority, o.url AS url \
                               ORDER BY priority ASC";
            let edge_rows = self
                .fetch_rows(edge_cypher, query(edge_cypher).param("url", url))
                .await?;
            for edge_row in edge_rows {
                let priority = edge_row.get::<i64>("priority").unwrap_or(0);
                let to = edge_row.get::<String>("url").unwrap_or_default();
                book.also_read.push(Edge {
                    from: book.url.clone(),
                    to,
                    priority: priority as usize,
                });
            }
        }

        Ok(Some(book))
    }

    async fn link_books(&self, from: &str, to: &str, priority: usize) -> StorageResult<()> {
        // MERGE without properties plus ON CREATE keeps an existing edge's
        // priority and never produces duplicates.
        let cypher = "MATCH (b:Book {url: $from}), (o:Book {url: $to}) \
                      WHERE b.title IS NOT NULL AND o.title IS NOT NULL \
                      MERGE (b)-[r:ALSO_READ]->(o) \
                      ON CREATE SET r.priority = $priority";
        self.run_write(
            cypher,
            query(cypher)
                .param("from", from)
                .param("to", to)
                .param("priority", priority as i64),
        )
        .await
    }
}
