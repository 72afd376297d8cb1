//! Finder pipeline.
//!
//! Finders inspect the request and mutate the query in the filter phase:
//! - FilterFinder: `filter[...]` predicates
//! - SortFinder: `sort` ordering
//! - IncludeFinder: `include` relation chains
//! - FieldsFinder: `fields[Entity]` sparse fieldsets
//!
//! Finders never paginate or join; those are later phases.

mod fields;
mod filter;
mod include;
mod sort;

use anyhow::Result;

use crate::error::CollectionResult;
use crate::field_manager::FieldManager;
use crate::query::QueryState;
use crate::request::ListRequest;

pub use fields::FieldsFinder;
pub use filter::FilterFinder;
pub use include::IncludeFinder;
pub use sort::SortFinder;

/// A request handler in the filter phase.
pub trait Finder: Send + Sync {
    /// Name used in configuration.
    fn name(&self) -> &'static str;

    /// Mutate `query` from `request`, registering any relations on `fields`.
    fn apply(
        &self,
        query: &mut QueryState,
        request: &ListRequest,
        fields: &mut FieldManager,
    ) -> CollectionResult<()>;
}

/// Built-in finder by configuration name.
pub fn builtin(name: &str) -> Option<Box<dyn Finder>> {
    match name {
        "filter" => Some(Box::new(FilterFinder)),
        "sort" => Some(Box::new(SortFinder)),
        "include" => Some(Box::new(IncludeFinder)),
        "fields" => Some(Box::new(FieldsFinder)),
        _ => None,
    }
}

/// Ordered chain of finders.
#[derive(Default)]
pub struct FinderCollection {
    finders: Vec<Box<dyn Finder>>,
}

impl FinderCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the chain from configured names, in order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut collection = Self::new();
        for name in names {
            let name = name.as_ref();
            let finder =
                builtin(name).ok_or_else(|| anyhow::anyhow!("unknown finder: {name}"))?;
            collection.push(finder);
        }
        Ok(collection)
    }

    pub fn push(&mut self, finder: Box<dyn Finder>) {
        self.finders.push(finder);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.finders.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.finders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finders.is_empty()
    }

    /// Run every finder in order. The first failure stops the chain.
    pub fn handle_query(
        &self,
        query: &mut QueryState,
        request: &ListRequest,
        fields: &mut FieldManager,
    ) -> CollectionResult<()> {
        for finder in &self.finders {
            finder.apply(query, request, fields)?;
            tracing::debug!(
                finder = finder.name(),
                relations = fields.len(),
                conditions = query.condition_count(),
                "finder applied"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for FinderCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinderCollection")
            .field("finders", &self.names())
            .finish()
    }
}
