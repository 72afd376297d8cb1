//! Relation joiner: turns the relation graph into LEFT JOINs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CollectionError, CollectionResult};
use crate::field_manager::{FieldManager, RelationEntry, RelationId};
use crate::query::{JoinClause, QueryState};

/// How the anchor alias of each join is chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnchorStrategy {
    /// Anchor at the alias of the declared source entity. Parents are
    /// always joined before their children, whatever the discovery order.
    #[default]
    Declared,
    /// Anchor relations whose source is not the root at the previously
    /// joined relation, in discovery order.
    Sequential,
}

/// Applies the joins a [`FieldManager`] graph requires.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationJoiner {
    strategy: AnchorStrategy,
}

impl RelationJoiner {
    pub fn new(strategy: AnchorStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> AnchorStrategy {
        self.strategy
    }

    /// Add one LEFT JOIN per non-root relation. Returns the applied joins in
    /// order.
    pub fn apply(
        &self,
        query: &mut QueryState,
        fields: &FieldManager,
    ) -> CollectionResult<Vec<JoinClause>> {
        let joins = match self.strategy {
            AnchorStrategy::Declared => self.apply_declared(query, fields)?,
            AnchorStrategy::Sequential => self.apply_sequential(query, fields)?,
        };

        tracing::debug!(
            strategy = ?self.strategy,
            joins = joins.len(),
            "relations joined"
        );
        Ok(joins)
    }

    fn apply_declared(
        &self,
        query: &mut QueryState,
        fields: &FieldManager,
    ) -> CollectionResult<Vec<JoinClause>> {
        let mut joined: HashSet<RelationId> = HashSet::new();
        let mut pending: Vec<RelationId> = Vec::new();
        for id in fields.relation_ids() {
            if fields.is_root(id) {
                joined.insert(id);
            } else {
                pending.push(id);
            }
        }

        let mut joins = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let mut next = Vec::new();
            for id in pending.iter().copied() {
                let ready = fields.parent(id).filter(|p| joined.contains(p));
                let Some(parent) = ready else {
                    next.push(id);
                    continue;
                };

                let entry = relation(fields, id)?;
                let anchor = relation(fields, parent)?;
                joins.push(join_relation(query, fields, entry, &anchor.alias)?);
                joined.insert(id);
            }

            if next.len() == pending.len() {
                let entry = relation(fields, next[0])?;
                return Err(CollectionError::InvalidGraph(format!(
                    "relation '{}' is joined from '{}', which is not connected to the root",
                    entry.entity, entry.source_entity
                )));
            }
            pending = next;
        }

        Ok(joins)
    }

    fn apply_sequential(
        &self,
        query: &mut QueryState,
        fields: &FieldManager,
    ) -> CollectionResult<Vec<JoinClause>> {
        let Some(root) = fields.root_entity() else {
            return Err(CollectionError::InvalidState(
                "root entity not set".to_string(),
            ));
        };
        let root_alias = query.root_alias().to_string();

        let mut processed: Vec<String> = Vec::new();
        let mut joins = Vec::new();
        for entry in fields.relations() {
            if entry.entity == root {
                continue;
            }

            let anchor = if entry.source_entity == root {
                root_alias.clone()
            } else {
                processed.last().cloned().ok_or_else(|| {
                    CollectionError::InvalidGraph(format!(
                        "relation '{}' needs a joined anchor for '{}', but none was joined before it",
                        entry.entity, entry.source_entity
                    ))
                })?
            };

            joins.push(join_relation(query, fields, entry, &anchor)?);
            processed.push(entry.alias.clone());
        }

        Ok(joins)
    }
}

fn relation(fields: &FieldManager, id: RelationId) -> CollectionResult<&RelationEntry> {
    fields.relation(id).ok_or_else(|| {
        CollectionError::InvalidGraph(format!("relation #{} does not exist", id.index()))
    })
}

fn join_relation(
    query: &mut QueryState,
    fields: &FieldManager,
    entry: &RelationEntry,
    anchor: &str,
) -> CollectionResult<JoinClause> {
    let association = match &entry.association {
        Some(name) => name.clone(),
        None => {
            let anchor_entity = query.alias_entity(anchor).ok_or_else(|| {
                CollectionError::InvalidGraph(format!("join anchor '{anchor}' is not joined"))
            })?;
            let schema = fields.schema().unwrap_or_else(|| query.schema());
            schema
                .entity(anchor_entity)?
                .association_to(&entry.entity)
                .map(|a| a.name.clone())
                .ok_or_else(|| {
                    CollectionError::InvalidGraph(format!(
                        "entity '{anchor_entity}' has no association to '{}'",
                        entry.entity
                    ))
                })?
        }
    };

    let clause = query.left_join(anchor, &association, &entry.alias)?.clone();
    tracing::debug!(join = %clause, entity = %entry.entity, "relation joined");
    Ok(clause)
}
