#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Resource collection integration tests.
//!
//! Each test drives a full index request through the finders, the joiner
//! and the paginator, then checks the SQL handed to the executor.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{RecordingExecutor, article_collection, article_repository};
use listing_kernel::{
    AnchorStrategy, CollectionError, CollectionResult, EntityRepository, ErrorCategory,
    FieldManager, Finder, FinderCollection, ListRequest, ListingConfig, Paginator, QueryState,
    RelationJoiner, ResourceCollection,
};
use listing_test_utils::{article_rows, assert, query_string, test_article};
use url::Url;

/// Registers fixed relations, the way a custom finder would.
struct RegisterRelations(Vec<(&'static str, &'static str, &'static str)>);

impl Finder for RegisterRelations {
    fn name(&self) -> &'static str {
        "relations"
    }

    fn apply(
        &self,
        _query: &mut QueryState,
        _request: &ListRequest,
        fields: &mut FieldManager,
    ) -> CollectionResult<()> {
        for (entity, alias, source) in &self.0 {
            fields.register_relation(entity, alias, source)?;
        }
        Ok(())
    }
}

fn collection_with_relations(
    query: &str,
    relations: Vec<(&'static str, &'static str, &'static str)>,
    strategy: AnchorStrategy,
    executor: Arc<RecordingExecutor>,
) -> ResourceCollection {
    let mut finders = FinderCollection::from_names(&["filter", "sort"]).unwrap();
    finders.push(Box::new(RegisterRelations(relations)));

    ResourceCollection::with_parts(
        article_repository(),
        ListRequest::from_query_string(query),
        finders,
        RelationJoiner::new(strategy),
        Paginator::new(10, 100),
        executor,
    )
}

// -------------------------------------------------------------------------
// Full pipeline
// -------------------------------------------------------------------------

#[tokio::test]
async fn second_page_over_joined_relations() {
    let executor = Arc::new(RecordingExecutor::new(25, article_rows(11, 10)));
    let mut collection = collection_with_relations(
        "page[number]=2&page[size]=10",
        vec![("Comment", "c", "Article"), ("Author", "a", "Comment")],
        AnchorStrategy::Declared,
        executor.clone(),
    );

    collection.handle_index_request().await.unwrap();

    assert_eq!(collection.total_items(), Some(25));
    assert_eq!(collection.page(), Some(2));
    assert_eq!(collection.size(), Some(10));
    assert_eq!(collection.paginator().offset(), Some(10));

    let links = collection.links().unwrap();
    assert_eq!(links.first, 1);
    assert_eq!(links.last, 3);
    assert_eq!(links.prev, Some(1));
    assert_eq!(links.next, Some(3));

    let page = executor.last_page_sql();
    assert::contains(&page, "LEFT JOIN \"comment\" AS \"c\" ON \"r\".\"id\" = \"c\".\"article_id\"");
    assert::contains(&page, "LEFT JOIN \"author\" AS \"a\" ON \"c\".\"author_id\" = \"a\".\"id\"");
    assert::in_order(&page, "AS \"c\"", "AS \"a\"");
    assert::contains(&page, "GROUP BY \"r\".\"id\"");
    assert!(!page.contains("SELECT DISTINCT"));
    assert::contains(&page, "LIMIT 10");
    assert::contains(&page, "OFFSET 10");

    let count = executor.last_count_sql();
    assert::contains(&count, "COUNT(DISTINCT \"r\".\"id\")");
    assert::contains(&count, "LEFT JOIN \"author\" AS \"a\"");
    assert!(!count.contains("LIMIT"));
    assert!(!count.contains("OFFSET"));

    let joins: Vec<String> = collection
        .query()
        .unwrap()
        .joins()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(joins, vec!["r.comments AS c", "c.author AS a"]);
}

#[tokio::test]
async fn empty_collection_has_single_page() {
    let executor = Arc::new(RecordingExecutor::new(0, Vec::new()));
    let mut collection = article_collection("filter[title]=nothing", executor.clone());

    collection.handle_index_request().await.unwrap();

    assert_eq!(collection.total_items(), Some(0));
    let links = collection.links().unwrap();
    assert_eq!(links.last, 1);
    assert_eq!(links.prev, None);
    assert_eq!(links.next, None);
    assert_eq!(collection.take_items().unwrap().count(), 0);
}

#[tokio::test]
async fn filters_and_sorts_reach_both_statements() {
    let executor = Arc::new(RecordingExecutor::new(3, article_rows(1, 3)));
    let query = query_string(&[
        ("filter[published]", "true"),
        ("filter[rating][gte]", "4.5"),
        ("sort", "-created"),
    ]);
    let mut collection = article_collection(&query, executor.clone());

    collection.handle_index_request().await.unwrap();

    let count = executor.last_count_sql();
    let page = executor.last_page_sql();
    for sql in [&count, &page] {
        assert::contains(sql, "\"r\".\"published\" = TRUE");
        assert::contains(sql, "\"r\".\"rating\" >= 4.5");
    }
    assert::contains(&count, "COUNT(*)");
    assert!(!count.contains("ORDER BY"));
    assert::contains(&page, "ORDER BY \"r\".\"created\" DESC");
    assert!(!page.contains("DISTINCT"));
}

#[tokio::test]
async fn filter_on_relation_path_joins_each_hop() {
    let executor = Arc::new(RecordingExecutor::new(1, article_rows(1, 1)));
    let mut collection = article_collection("filter[comments.author.name]=ada", executor.clone());

    collection.handle_index_request().await.unwrap();

    let page = executor.last_page_sql();
    assert::contains(&page, "LEFT JOIN \"comment\" AS \"comments\"");
    assert::contains(
        &page,
        "LEFT JOIN \"author\" AS \"comments_author\" ON \"comments\".\"author_id\" = \"comments_author\".\"id\"",
    );
    assert::contains(&page, "\"comments_author\".\"name\" = 'ada'");

    let fields = collection.field_manager();
    assert_eq!(fields.root_entity(), Some("Article"));
    assert_eq!(fields.alias_of("Comment"), Some("comments"));
    assert_eq!(fields.alias_of("Author"), Some("comments_author"));
}

#[tokio::test]
async fn sparse_fieldset_projects_primary_key() {
    let executor = Arc::new(RecordingExecutor::new(1, article_rows(1, 1)));
    let mut collection = article_collection("fields[Article]=title", executor.clone());

    collection.handle_index_request().await.unwrap();

    let page = executor.last_page_sql();
    assert::contains(&page, "SELECT \"r\".\"id\", \"r\".\"title\" FROM");
}

#[tokio::test]
async fn page_size_is_capped() {
    let executor = Arc::new(RecordingExecutor::new(500, article_rows(1, 100)));
    let mut collection = article_collection("page[size]=1000", executor.clone());

    collection.handle_index_request().await.unwrap();

    assert_eq!(collection.size(), Some(100));
    assert_eq!(collection.links().unwrap().last, 5);
    assert::contains(&executor.last_page_sql(), "LIMIT 100");
}

// -------------------------------------------------------------------------
// Page items
// -------------------------------------------------------------------------

#[tokio::test]
async fn items_are_single_pass() {
    let executor = Arc::new(RecordingExecutor::new(2, article_rows(1, 2)));
    let mut collection = article_collection("", executor);

    assert!(collection.take_items().is_none());
    collection.handle_index_request().await.unwrap();

    let items: Vec<_> = collection.take_items().unwrap().collect();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1]["title"], "Article 2");
    assert!(collection.take_items().is_none());
}

#[tokio::test]
async fn items_never_exceed_page_size() {
    let executor = Arc::new(RecordingExecutor::new(40, article_rows(1, 12)));
    let mut collection = article_collection("page[size]=10", executor);

    collection.handle_index_request().await.unwrap();

    let items = collection.take_items().unwrap();
    assert_eq!(items.len(), 10);
}

#[tokio::test]
async fn projected_sort_columns_are_stripped() {
    let rows = vec![
        test_article(1, "First")
            .with_sort_column(0, serde_json::json!("Ada"))
            .build(),
        test_article(2, "Second")
            .with_sort_column(0, serde_json::json!("Grace"))
            .build(),
    ];
    let executor = Arc::new(RecordingExecutor::new(2, rows));
    let mut collection = article_collection("include=comments&sort=comments.body", executor.clone());

    collection.handle_index_request().await.unwrap();

    assert::contains(
        &executor.last_page_sql(),
        "MIN(\"comments\".\"body\") AS \"__sort_0\"",
    );
    for item in collection.take_items().unwrap() {
        assert::has_key(&item, "title");
        assert::lacks_key(&item, "__sort_0");
    }
}

#[tokio::test]
async fn to_many_sort_groups_roots() {
    let executor = Arc::new(RecordingExecutor::new(2, article_rows(1, 2)));
    let mut collection = article_collection("sort=-comments.body,title", executor.clone());

    collection.handle_index_request().await.unwrap();

    let page = executor.last_page_sql();
    assert!(!page.contains("DISTINCT"), "{page}");
    assert::contains(&page, "MAX(\"comments\".\"body\") AS \"__sort_0\"");
    assert::contains(&page, "GROUP BY \"r\".\"id\", \"r\".\"created\"");
    assert::in_order(&page, "GROUP BY", "ORDER BY \"__sort_0\" DESC, \"r\".\"title\" ASC");
    assert::contains(&executor.last_count_sql(), "COUNT(DISTINCT \"r\".\"id\")");
}

// -------------------------------------------------------------------------
// Phase ordering
// -------------------------------------------------------------------------

#[tokio::test]
async fn handling_twice_is_invalid_state() {
    let executor = Arc::new(RecordingExecutor::new(1, article_rows(1, 1)));
    let mut collection = article_collection("", executor.clone());

    collection.handle_index_request().await.unwrap();
    let err = collection.handle_index_request().await.unwrap_err();

    assert!(matches!(err, CollectionError::InvalidState(_)));
    assert_eq!(executor.count_sql().len(), 1);
    assert_eq!(collection.total_items(), Some(1));
}

#[tokio::test]
async fn reopened_query_does_not_change_counted_shape() {
    let executor = Arc::new(RecordingExecutor::new(7, article_rows(1, 7)));
    let mut collection = article_collection("filter[title]=rust", executor.clone());
    collection.handle_index_request().await.unwrap();

    let frozen = collection.query().unwrap();
    let before = frozen.count_sql();

    let mut reopened = frozen.reopen();
    reopened.and_where(sea_query::Expr::cust("1 = 0"));
    assert_eq!(reopened.condition_count(), 2);

    let frozen = collection.query().unwrap();
    assert_eq!(frozen.count_sql(), before);
    assert_eq!(frozen.condition_count(), 1);
    assert_eq!(executor.last_count_sql(), before);
    assert_eq!(collection.total_items(), Some(7));
}

#[tokio::test]
async fn finder_order_follows_configuration() {
    let config = ListingConfig {
        finders: vec!["sort".to_string(), "filter".to_string()],
        ..ListingConfig::default()
    };
    let executor = Arc::new(RecordingExecutor::new(0, Vec::new()));
    let mut collection = ResourceCollection::new(
        article_repository(),
        ListRequest::from_query_string("filter[ghost]=1&sort=phantom"),
        &config,
        executor,
    )
    .unwrap();

    assert_eq!(collection.finders().names(), vec!["sort", "filter"]);
    let err = collection.handle_index_request().await.unwrap_err();
    assert!(matches!(err, CollectionError::UnknownField(ref f) if f == "phantom"));
}

#[test]
fn unknown_finder_in_configuration() {
    let config = ListingConfig {
        finders: vec!["filter".to_string(), "paginate".to_string()],
        ..ListingConfig::default()
    };
    let executor = Arc::new(RecordingExecutor::default());
    let err = ResourceCollection::new(
        article_repository(),
        ListRequest::new(),
        &config,
        executor,
    )
    .unwrap_err();
    assert::contains(&err.to_string(), "paginate");
}

// -------------------------------------------------------------------------
// Join anchoring
// -------------------------------------------------------------------------

#[tokio::test]
async fn declared_anchors_ignore_discovery_order() {
    let executor = Arc::new(RecordingExecutor::new(1, article_rows(1, 1)));
    let mut collection = collection_with_relations(
        "",
        vec![("Author", "a", "Comment"), ("Comment", "c", "Article")],
        AnchorStrategy::Declared,
        executor.clone(),
    );

    collection.handle_index_request().await.unwrap();

    let page = executor.last_page_sql();
    assert::in_order(&page, "AS \"c\"", "AS \"a\"");
    assert::contains(&page, "ON \"c\".\"author_id\" = \"a\".\"id\"");
}

#[tokio::test]
async fn sequential_anchors_chain_in_discovery_order() {
    let executor = Arc::new(RecordingExecutor::new(1, article_rows(1, 1)));
    let mut collection = collection_with_relations(
        "",
        vec![("Comment", "c", "Article"), ("Author", "a", "Comment")],
        AnchorStrategy::Sequential,
        executor.clone(),
    );

    collection.handle_index_request().await.unwrap();
    assert::contains(
        &executor.last_page_sql(),
        "ON \"c\".\"author_id\" = \"a\".\"id\"",
    );
}

#[tokio::test]
async fn sequential_anchor_missing_is_invalid_graph() {
    let executor = Arc::new(RecordingExecutor::new(1, article_rows(1, 1)));
    let mut collection = collection_with_relations(
        "",
        vec![("Author", "a", "Comment"), ("Comment", "c", "Article")],
        AnchorStrategy::Sequential,
        executor.clone(),
    );

    let err = collection.handle_index_request().await.unwrap_err();
    assert!(matches!(err, CollectionError::InvalidGraph(_)));
    assert!(executor.count_sql().is_empty());
}

#[tokio::test]
async fn dangling_relation_is_invalid_graph() {
    let executor = Arc::new(RecordingExecutor::new(1, article_rows(1, 1)));
    let mut collection = collection_with_relations(
        "",
        vec![("Author", "a", "Comment")],
        AnchorStrategy::Declared,
        executor.clone(),
    );

    let err = collection.handle_index_request().await.unwrap_err();
    assert!(matches!(err, CollectionError::InvalidGraph(_)));
    assert_eq!(err.category(), ErrorCategory::Internal);
}

// -------------------------------------------------------------------------
// Failures
// -------------------------------------------------------------------------

#[tokio::test]
async fn unknown_field_fails_before_any_query() {
    let executor = Arc::new(RecordingExecutor::new(5, article_rows(1, 5)));
    let mut collection = article_collection("filter[comments.ghost]=x", executor.clone());

    let err = collection.handle_index_request().await.unwrap_err();

    assert!(matches!(err, CollectionError::UnknownField(ref f) if f == "comments.ghost"));
    assert_eq!(err.category(), ErrorCategory::BadRequest);
    assert!(executor.count_sql().is_empty());
    assert!(executor.page_sql().is_empty());
    assert!(collection.query().is_none());
}

#[tokio::test]
async fn conflicting_relation_sources() {
    let executor = Arc::new(RecordingExecutor::new(1, article_rows(1, 1)));
    let mut collection = article_collection(
        "filter[comments.author.name]=ada&filter[writer.name]=grace",
        executor,
    );

    let err = collection.handle_index_request().await.unwrap_err();
    assert!(matches!(err, CollectionError::Conflict { ref entity, .. } if entity == "Author"));
}

#[tokio::test]
async fn second_association_to_joined_entity_conflicts() {
    let executor = Arc::new(RecordingExecutor::new(1, article_rows(1, 1)));
    let mut collection = article_collection(
        "filter[writer.name]=ada&filter[editor.name]=grace",
        executor.clone(),
    );

    let err = collection.handle_index_request().await.unwrap_err();

    assert!(matches!(
        err,
        CollectionError::Conflict { ref entity, ref reason }
            if entity == "Author" && reason.contains("'editor'")
    ));
    assert!(executor.count_sql().is_empty());
}

/// Registers a relation on its first run only.
struct RegisterOnce(AtomicBool);

impl Finder for RegisterOnce {
    fn name(&self) -> &'static str {
        "register_once"
    }

    fn apply(
        &self,
        _query: &mut QueryState,
        _request: &ListRequest,
        fields: &mut FieldManager,
    ) -> CollectionResult<()> {
        if !self.0.swap(true, Ordering::SeqCst) {
            fields.register_relation("Comment", "c", "Article")?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn retry_after_failed_count_starts_from_clean_graph() {
    let executor = Arc::new(RecordingExecutor::new(3, article_rows(1, 3)).failing_once());
    let mut finders = FinderCollection::from_names(&["filter", "sort"]).unwrap();
    finders.push(Box::new(RegisterOnce(AtomicBool::new(false))));
    let mut collection = ResourceCollection::with_parts(
        article_repository(),
        ListRequest::from_query_string(""),
        finders,
        RelationJoiner::new(AnchorStrategy::Declared),
        Paginator::new(10, 100),
        executor.clone(),
    );

    let err = collection.handle_index_request().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Internal);
    assert!(collection.query().is_none());
    assert::contains(&executor.last_count_sql(), "LEFT JOIN \"comment\" AS \"c\"");

    collection.handle_index_request().await.unwrap();

    assert_eq!(collection.total_items(), Some(3));
    assert_eq!(collection.field_manager().len(), 1);
    assert!(collection.query().unwrap().joins().is_empty());
    assert!(!executor.last_count_sql().contains("LEFT JOIN"));
    assert!(!executor.last_page_sql().contains("LEFT JOIN"));
}

#[tokio::test]
async fn malformed_page_parameter() {
    let executor = Arc::new(RecordingExecutor::new(1, article_rows(1, 1)));
    let mut collection = article_collection("page[number]=0", executor);

    let err = collection.handle_index_request().await.unwrap_err();
    assert_eq!(err.parameter(), Some("page[number]"));
    assert_eq!(err.category(), ErrorCategory::BadRequest);
}

#[test]
fn unknown_root_entity() {
    let err = EntityRepository::new(common::blog_schema(), "Ghost").unwrap_err();
    assert!(matches!(err, CollectionError::EntityNotFound(ref name) if name == "Ghost"));
    assert_eq!(err.category(), ErrorCategory::NotFound);
}

// -------------------------------------------------------------------------
// Links
// -------------------------------------------------------------------------

#[tokio::test]
async fn link_urls_carry_request_parameters() {
    let executor = Arc::new(RecordingExecutor::new(25, article_rows(11, 10)));
    let mut collection = article_collection("filter[title]=rust&page=2&size=10", executor);
    let base = Url::parse("https://example.test/articles").unwrap();

    assert!(collection.link_urls(&base).is_none());
    collection.handle_index_request().await.unwrap();

    let urls = collection.link_urls(&base).unwrap();
    assert_eq!(
        urls.next.as_deref(),
        Some("https://example.test/articles?filter%5Btitle%5D=rust&page%5Bnumber%5D=3&page%5Bsize%5D=10")
    );
    assert::contains(&urls.first, "page%5Bnumber%5D=1");
    assert::contains(&urls.last, "page%5Bnumber%5D=3");
    assert::contains(urls.prev.as_deref().unwrap(), "page%5Bnumber%5D=1");
}
