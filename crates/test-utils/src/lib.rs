//! Listing test utilities.
//!
//! Helpers for integration testing: schema fixtures, row builders,
//! and assertion utilities for composed SQL and JSON output.

use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Blog schema used across integration tests.
///
/// `Article` has many `Comment`s, each `Comment` has one `Author`, and
/// `Article` also links straight to an `Author` through `writer` and
/// through `editor`.
pub const BLOG_SCHEMA: &str = r#"
[[entities]]
name = "Article"
table = "article"
fields = { id = "integer", title = "text", rating = "float", published = "boolean", created = "timestamp", writer_id = "integer", editor_id = "integer" }
associations = [
    { name = "comments", target = "Comment", local_field = "id", foreign_field = "article_id" },
    { name = "writer", target = "Author", local_field = "writer_id", foreign_field = "id" },
    { name = "editor", target = "Author", local_field = "editor_id", foreign_field = "id" },
]

[[entities]]
name = "Comment"
table = "comment"
fields = { id = "integer", article_id = "integer", author_id = "integer", body = "text" }
associations = [
    { name = "author", target = "Author", local_field = "author_id", foreign_field = "id" },
]

[[entities]]
name = "Author"
table = "author"
fields = { id = "integer", name = "text" }
"#;

/// Create a test article row with default values.
pub fn test_article(id: i64, title: &str) -> TestRow {
    TestRow {
        values: serde_json::json!({
            "id": id,
            "title": title,
            "rating": 0.0,
            "published": true,
            "created": "2024-01-01T00:00:00Z",
            "writer_id": 1,
            "editor_id": 2,
        }),
    }
}

/// `count` article rows with ids starting at `first_id`.
pub fn article_rows(first_id: i64, count: usize) -> Vec<JsonValue> {
    (0..count)
        .map(|n| {
            let id = first_id + n as i64;
            test_article(id, &format!("Article {id}")).build()
        })
        .collect()
}

/// A JSON row builder for fixture pages.
#[derive(Debug, Clone)]
pub struct TestRow {
    values: JsonValue,
}

impl TestRow {
    /// Set or replace a column.
    pub fn with(mut self, column: &str, value: JsonValue) -> Self {
        if let Some(obj) = self.values.as_object_mut() {
            obj.insert(column.to_string(), value);
        }
        self
    }

    /// Add a projected sort column, as a grouped page query returns it.
    pub fn with_sort_column(self, index: usize, value: JsonValue) -> Self {
        self.with(&format!("__sort_{index}"), value)
    }

    /// Tag the row with a random external reference.
    pub fn with_reference(self) -> Self {
        self.with("reference", JsonValue::String(Uuid::now_v7().to_string()))
    }

    pub fn build(self) -> JsonValue {
        self.values
    }
}

/// Render `pairs` as a query string, keys and values left unencoded.
pub fn query_string(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Assertion helpers for SQL and JSON output.
pub mod assert {
    use serde_json::Value;

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "Expected JSON to have key '{}', got: {}",
            key,
            value
        );
    }

    /// Assert that a JSON value lacks a specific key.
    pub fn lacks_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_none(),
            "Expected JSON not to have key '{}', got: {}",
            key,
            value
        );
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{}'\nActual: {}",
            needle,
            haystack
        );
    }

    /// Assert that `first` appears before `second` in `haystack`.
    pub fn in_order(haystack: &str, first: &str, second: &str) {
        let a = haystack.find(first);
        let b = haystack.find(second);
        assert!(
            matches!((a, b), (Some(a), Some(b)) if a < b),
            "Expected '{}' before '{}'\nActual: {}",
            first,
            second,
            haystack
        );
    }
}
