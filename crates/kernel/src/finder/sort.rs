//! `sort` ordering.

use super::Finder;
use crate::error::CollectionResult;
use crate::field_manager::FieldManager;
use crate::query::QueryState;
use crate::request::ListRequest;

/// Appends an ORDER BY entry per `sort` field, in request order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortFinder;

impl Finder for SortFinder {
    fn name(&self) -> &'static str {
        "sort"
    }

    fn apply(
        &self,
        query: &mut QueryState,
        request: &ListRequest,
        fields: &mut FieldManager,
    ) -> CollectionResult<()> {
        for sort in request.sorts()? {
            let field = fields.resolve_field(&sort.path)?;
            query.add_order_by(&field.alias, &field.column, sort.direction);
        }
        Ok(())
    }
}
