//! Listing Kernel Library
//!
//! Composes one collection-listing request into a single query: finders add
//! predicates and sorts, the joiner adds the relations they need, and the
//! paginator counts and fetches one page of the frozen result.
//! The `listing` binary explains composed queries without a database.

pub mod collection;
pub mod config;
pub mod error;
pub mod executor;
pub mod field_manager;
pub mod finder;
pub mod joiner;
pub mod paginator;
pub mod query;
pub mod repository;
pub mod request;
pub mod schema;

pub use collection::ResourceCollection;
pub use config::ListingConfig;
pub use error::{CollectionError, CollectionResult, ErrorCategory};
pub use executor::{ExplainExecutor, PgExecutor, QueryExecutor};
pub use field_manager::{FieldManager, ROOT_ALIAS, RelationEntry, RelationId, ResolvedField};
pub use finder::{Finder, FinderCollection};
pub use joiner::{AnchorStrategy, RelationJoiner};
pub use paginator::{LinkSet, PageItems, PaginationLinks, Paginator};
pub use query::{FrozenQuery, JoinClause, QueryState, SortClause};
pub use repository::EntityRepository;
pub use request::{FilterOperator, FilterParam, ListRequest, SortDirection, SortParam};
pub use schema::{Association, EntitySchema, FieldKind, SchemaRegistry};
