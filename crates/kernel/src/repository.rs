//! Entity repository: entry point for queries scoped to one entity.

use std::sync::Arc;

use crate::error::CollectionResult;
use crate::query::QueryState;
use crate::schema::{EntitySchema, SchemaRegistry};

/// Repository for a single entity type.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    schema: Arc<SchemaRegistry>,
    entity: String,
}

impl EntityRepository {
    /// Create a repository for `entity`, failing with `EntityNotFound` when
    /// the schema does not know it.
    pub fn new(schema: Arc<SchemaRegistry>, entity: &str) -> CollectionResult<Self> {
        schema.entity(entity)?;
        Ok(Self {
            schema,
            entity: entity.to_string(),
        })
    }

    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    pub fn entity_schema(&self) -> CollectionResult<&EntitySchema> {
        self.schema.entity(&self.entity)
    }

    /// Start a query selecting from this entity under `root_alias`.
    pub fn create_query_builder(&self, root_alias: &str) -> CollectionResult<QueryState> {
        let root = self.entity_schema()?;
        Ok(QueryState::new(Arc::clone(&self.schema), root, root_alias))
    }
}
