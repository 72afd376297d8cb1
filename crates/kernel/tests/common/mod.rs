#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Collections here run the real finders, joiner and paginator. Only the
//! database is replaced, by a [`RecordingExecutor`] that serves canned rows
//! and keeps the SQL it was handed.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use listing_kernel::{
    CollectionError, CollectionResult, EntityRepository, ListRequest, ListingConfig, QueryExecutor,
    ResourceCollection, SchemaRegistry,
};
use listing_test_utils::BLOG_SCHEMA;

/// Executor returning a fixed count and page, recording every statement.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    total: u64,
    rows: Vec<Value>,
    counts: Mutex<Vec<String>>,
    pages: Mutex<Vec<String>>,
    fail_next_count: AtomicBool,
}

impl RecordingExecutor {
    pub fn new(total: u64, rows: Vec<Value>) -> Self {
        Self {
            total,
            rows,
            ..Self::default()
        }
    }

    /// Make the next count query fail as a lost connection would.
    pub fn failing_once(self) -> Self {
        self.fail_next_count.store(true, Ordering::SeqCst);
        self
    }

    pub fn count_sql(&self) -> Vec<String> {
        self.counts.lock().unwrap().clone()
    }

    pub fn page_sql(&self) -> Vec<String> {
        self.pages.lock().unwrap().clone()
    }

    /// The single page statement that was run.
    pub fn last_page_sql(&self) -> String {
        self.page_sql().pop().expect("no page query ran")
    }

    /// The single count statement that was run.
    pub fn last_count_sql(&self) -> String {
        self.count_sql().pop().expect("no count query ran")
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn count(&self, sql: &str) -> CollectionResult<u64> {
        self.counts.lock().unwrap().push(sql.to_string());
        if self.fail_next_count.swap(false, Ordering::SeqCst) {
            return Err(CollectionError::Internal(anyhow::anyhow!("connection reset")));
        }
        Ok(self.total)
    }

    async fn fetch(&self, sql: &str) -> CollectionResult<Vec<Value>> {
        self.pages.lock().unwrap().push(sql.to_string());
        Ok(self.rows.clone())
    }
}

/// The blog schema shared by integration tests.
pub fn blog_schema() -> Arc<SchemaRegistry> {
    Arc::new(SchemaRegistry::from_toml(BLOG_SCHEMA).expect("blog schema should parse"))
}

pub fn article_repository() -> EntityRepository {
    EntityRepository::new(blog_schema(), "Article").expect("Article should exist")
}

/// Build an Article collection with default configuration.
pub fn article_collection(
    query: &str,
    executor: Arc<RecordingExecutor>,
) -> ResourceCollection {
    ResourceCollection::new(
        article_repository(),
        ListRequest::from_query_string(query),
        &ListingConfig::default(),
        executor,
    )
    .expect("default configuration should build")
}
