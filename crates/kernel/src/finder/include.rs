//! `include` relation chains.

use super::Finder;
use crate::error::CollectionResult;
use crate::field_manager::FieldManager;
use crate::query::QueryState;
use crate::request::ListRequest;

/// Registers every hop of each `include` path as a relation.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeFinder;

impl Finder for IncludeFinder {
    fn name(&self) -> &'static str {
        "include"
    }

    fn apply(
        &self,
        _query: &mut QueryState,
        request: &ListRequest,
        fields: &mut FieldManager,
    ) -> CollectionResult<()> {
        for path in request.includes()? {
            let entity = fields.resolve_relation_path(&path)?;
            tracing::debug!(%path, %entity, "relation included");
        }
        Ok(())
    }
}
