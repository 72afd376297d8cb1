//! Query execution seam.
//!
//! The listing kernel never talks to a database directly: it renders the
//! count and page statements to PostgreSQL SQL and hands the strings to a
//! [`QueryExecutor`].

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::CollectionResult;

/// Executes composed statements.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a `SELECT COUNT(...)` query.
    async fn count(&self, sql: &str) -> CollectionResult<u64>;

    /// Run a page query, one JSON object per row.
    async fn fetch(&self, sql: &str) -> CollectionResult<Vec<serde_json::Value>>;
}

/// PostgreSQL executor backed by a sqlx pool.
#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool of at most `max_connections` to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to PostgreSQL")?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn count(&self, sql: &str) -> CollectionResult<u64> {
        tracing::debug!(%sql, "executing count query");

        let total: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }

    async fn fetch(&self, sql: &str) -> CollectionResult<Vec<serde_json::Value>> {
        tracing::debug!(%sql, "executing page query");

        let rows: Vec<serde_json::Value> =
            sqlx::query_scalar(&format!("SELECT row_to_json(t) FROM ({sql}) t"))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}

/// Executor that renders statements without running them.
///
/// Counts are reported as zero and pages as empty.
#[derive(Debug, Default)]
pub struct ExplainExecutor {
    statements: std::sync::Mutex<Vec<String>>,
}

impl ExplainExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered SQL in execution order.
    pub fn statements(&self) -> Vec<String> {
        match self.statements.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, sql: &str) {
        let sql = sql.to_string();
        match self.statements.lock() {
            Ok(mut guard) => guard.push(sql),
            Err(poisoned) => poisoned.into_inner().push(sql),
        }
    }
}

#[async_trait]
impl QueryExecutor for ExplainExecutor {
    async fn count(&self, sql: &str) -> CollectionResult<u64> {
        self.record(sql);
        Ok(0)
    }

    async fn fetch(&self, sql: &str) -> CollectionResult<Vec<serde_json::Value>> {
        self.record(sql);
        Ok(Vec::new())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn assert_shareable<T: Send + Sync>() {}

    #[tokio::test]
    async fn explain_records_sql_in_order() {
        assert_shareable::<ExplainExecutor>();
        let executor = ExplainExecutor::new();

        assert_eq!(executor.count("SELECT COUNT(*) FROM \"article\"").await.unwrap(), 0);
        assert!(executor.fetch("SELECT * FROM \"article\" LIMIT 10").await.unwrap().is_empty());

        assert_eq!(
            executor.statements(),
            vec![
                "SELECT COUNT(*) FROM \"article\"".to_string(),
                "SELECT * FROM \"article\" LIMIT 10".to_string(),
            ]
        );
    }
}
