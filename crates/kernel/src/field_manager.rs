//! Field and relation bookkeeping for one listing request.
//!
//! The FieldManager owns the relation graph: an arena of relation nodes keyed
//! by entity name, each carrying an explicit parent pointer to the node it is
//! joined from. The root entity occupies the first node under [`ROOT_ALIAS`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CollectionError, CollectionResult};
use crate::schema::{FieldKind, SchemaRegistry, is_valid_identifier};

/// Alias of the root entity in every composed query.
pub const ROOT_ALIAS: &str = "r";

/// Index of a relation node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(usize);

impl RelationId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Record that `entity` must be joined under `alias`, reachable from
/// `source_entity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEntry {
    pub entity: String,
    pub alias: String,
    pub source_entity: String,
    /// Association on the source entity used for the join, when known.
    pub association: Option<String>,
}

#[derive(Debug, Clone)]
struct RelationNode {
    entry: RelationEntry,
    parent: Option<RelationId>,
}

/// A field path resolved against the relation graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub entity: String,
    pub alias: String,
    pub column: String,
    pub kind: FieldKind,
}

/// Tracks the root entity, requested fields, and required relations.
#[derive(Debug, Default)]
pub struct FieldManager {
    schema: Option<Arc<SchemaRegistry>>,
    nodes: Vec<RelationNode>,
    by_entity: HashMap<String, RelationId>,
    by_alias: HashMap<String, RelationId>,
    fields: HashMap<String, Vec<String>>,
}

impl FieldManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the schema used to resolve field paths.
    pub fn set_schema(&mut self, schema: Arc<SchemaRegistry>) {
        self.schema = Some(schema);
    }

    pub fn schema(&self) -> Option<&Arc<SchemaRegistry>> {
        self.schema.as_ref()
    }

    /// Record the root entity. Setting the same root again is a no-op.
    pub fn set_root_entity(&mut self, entity: &str) -> CollectionResult<()> {
        if let Some(root) = self.root_entity() {
            if root == entity {
                return Ok(());
            }
            return Err(CollectionError::InvalidState(format!(
                "root entity already set to '{root}', cannot change it to '{entity}'"
            )));
        }

        if self.by_entity.contains_key(entity) || self.by_alias.contains_key(ROOT_ALIAS) {
            return Err(CollectionError::InvalidState(format!(
                "relations registered before root entity '{entity}'"
            )));
        }

        tracing::debug!(entity, "root entity set");
        self.push_node(RelationEntry {
            entity: entity.to_string(),
            alias: ROOT_ALIAS.to_string(),
            source_entity: entity.to_string(),
            association: None,
        });
        Ok(())
    }

    pub fn root_entity(&self) -> Option<&str> {
        self.nodes.first().map(|n| n.entry.entity.as_str())
    }

    /// Register a relation to be joined.
    ///
    /// Identical registrations are idempotent. A different source or alias for
    /// an already registered entity is a conflict.
    pub fn register_relation(
        &mut self,
        entity: &str,
        alias: &str,
        source_entity: &str,
    ) -> CollectionResult<RelationId> {
        self.register(entity, alias, source_entity, None)
    }

    fn register(
        &mut self,
        entity: &str,
        alias: &str,
        source_entity: &str,
        association: Option<&str>,
    ) -> CollectionResult<RelationId> {
        if self.root_entity().is_none() {
            return Err(CollectionError::InvalidState(format!(
                "cannot register relation '{entity}' before the root entity"
            )));
        }

        if let Some(&id) = self.by_entity.get(entity) {
            let existing = &self.nodes[id.0].entry;
            if existing.source_entity != source_entity {
                return Err(CollectionError::conflict(
                    entity,
                    format!(
                        "already joined from '{}', not '{source_entity}'",
                        existing.source_entity
                    ),
                ));
            }
            if let (Some(joined), Some(requested)) = (existing.association.as_deref(), association)
                && joined != requested
            {
                return Err(CollectionError::conflict(
                    entity,
                    format!("already joined through '{joined}', not '{requested}'"),
                ));
            }
            if existing.alias != alias {
                return Err(CollectionError::conflict(
                    entity,
                    format!("already joined as '{}', not '{alias}'", existing.alias),
                ));
            }
            if existing.association.is_none()
                && let Some(name) = association
            {
                self.nodes[id.0].entry.association = Some(name.to_string());
            }
            return Ok(id);
        }

        if !is_valid_identifier(alias) {
            return Err(CollectionError::InvalidGraph(format!(
                "alias '{alias}' for relation '{entity}' is not a valid identifier"
            )));
        }
        if let Some(&other) = self.by_alias.get(alias) {
            return Err(CollectionError::conflict(
                entity,
                format!(
                    "alias '{alias}' is already used by '{}'",
                    self.nodes[other.0].entry.entity
                ),
            ));
        }
        if entity == source_entity {
            return Err(CollectionError::InvalidGraph(format!(
                "relation '{entity}' cannot be joined from itself"
            )));
        }

        tracing::debug!(entity, alias, source = source_entity, "relation registered");
        Ok(self.push_node(RelationEntry {
            entity: entity.to_string(),
            alias: alias.to_string(),
            source_entity: source_entity.to_string(),
            association: association.map(str::to_string),
        }))
    }

    fn push_node(&mut self, entry: RelationEntry) -> RelationId {
        let id = RelationId(self.nodes.len());
        let parent = if id.0 == 0 {
            None
        } else {
            self.by_entity.get(&entry.source_entity).copied()
        };

        // Nodes registered ahead of their source get their parent now
        for node in self.nodes.iter_mut().skip(1) {
            if node.parent.is_none() && node.entry.source_entity == entry.entity {
                node.parent = Some(id);
            }
        }

        self.by_entity.insert(entry.entity.clone(), id);
        self.by_alias.insert(entry.alias.clone(), id);
        self.nodes.push(RelationNode { entry, parent });
        id
    }

    /// Relation entries in discovery order, root first.
    pub fn relations(&self) -> impl Iterator<Item = &RelationEntry> {
        self.nodes.iter().map(|n| &n.entry)
    }

    /// Relation ids in discovery order, root first.
    pub fn relation_ids(&self) -> impl Iterator<Item = RelationId> {
        (0..self.nodes.len()).map(RelationId)
    }

    pub fn relation(&self, id: RelationId) -> Option<&RelationEntry> {
        self.nodes.get(id.0).map(|n| &n.entry)
    }

    /// Node this relation is joined from. `None` for the root, and for a
    /// relation whose source was never registered.
    pub fn parent(&self, id: RelationId) -> Option<RelationId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn relation_id(&self, entity: &str) -> Option<RelationId> {
        self.by_entity.get(entity).copied()
    }

    pub fn alias_of(&self, entity: &str) -> Option<&str> {
        self.relation_id(entity)
            .and_then(|id| self.relation(id))
            .map(|e| e.alias.as_str())
    }

    pub fn is_root(&self, id: RelationId) -> bool {
        id.0 == 0 && !self.nodes.is_empty()
    }

    /// Number of registered entries, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether any relation besides the root must be joined.
    pub fn has_joins(&self) -> bool {
        self.nodes.len() > 1
    }

    /// Resolve a dotted path (`comments.author.name`) to a column, registering
    /// every association hop as a relation.
    pub fn resolve_field(&mut self, path: &str) -> CollectionResult<ResolvedField> {
        let segments = split_path(path)?;
        let Some((column, hops)) = segments.split_last() else {
            return Err(CollectionError::UnknownField(path.to_string()));
        };

        let (entity, alias) = self.walk_associations(path, hops)?;
        let schema = self.require_schema()?;
        let kind = schema
            .entity(&entity)?
            .field(column)
            .ok_or_else(|| CollectionError::UnknownField(path.to_string()))?;

        Ok(ResolvedField {
            entity,
            alias,
            column: (*column).to_string(),
            kind,
        })
    }

    /// Resolve a dotted association path (`comments.author`), registering
    /// every hop. Returns the entity at the end of the path.
    pub fn resolve_relation_path(&mut self, path: &str) -> CollectionResult<String> {
        let segments = split_path(path)?;
        let (entity, _) = self.walk_associations(path, &segments)?;
        Ok(entity)
    }

    fn walk_associations(
        &mut self,
        path: &str,
        hops: &[&str],
    ) -> CollectionResult<(String, String)> {
        let schema = Arc::clone(self.require_schema()?);
        let Some(root) = self.root_entity().map(str::to_string) else {
            return Err(CollectionError::InvalidState(
                "root entity not set".to_string(),
            ));
        };

        let mut entity = root;
        let mut alias = ROOT_ALIAS.to_string();
        for (depth, hop) in hops.iter().enumerate() {
            let assoc = schema
                .entity(&entity)?
                .association(hop)
                .ok_or_else(|| CollectionError::UnknownField(path.to_string()))?;
            let target = schema.entity(&assoc.target)?;

            let next_alias = match self.relation_id(&target.name).and_then(|id| self.relation(id)) {
                // Reuse the alias already chosen for this entity and association
                Some(existing)
                    if existing.source_entity == entity
                        && existing
                            .association
                            .as_deref()
                            .is_none_or(|name| name == assoc.name) =>
                {
                    existing.alias.clone()
                }
                _ => hops[..=depth].join("_"),
            };

            self.register(&target.name, &next_alias, &entity, Some(&assoc.name))?;
            entity = target.name.clone();
            alias = next_alias;
        }

        Ok((entity, alias))
    }

    fn require_schema(&self) -> CollectionResult<&Arc<SchemaRegistry>> {
        self.schema.as_ref().ok_or_else(|| {
            CollectionError::InvalidState("field manager has no schema attached".to_string())
        })
    }

    /// Request a field of an already joined entity for projection.
    pub fn add_field(&mut self, entity: &str, field: &str) -> CollectionResult<()> {
        let qualified = format!("{entity}.{field}");
        if !self.by_entity.contains_key(entity) {
            return Err(CollectionError::UnknownField(qualified));
        }
        let schema = self.require_schema()?;
        if schema.entity(entity)?.field(field).is_none() {
            return Err(CollectionError::UnknownField(qualified));
        }

        let requested = self.fields.entry(entity.to_string()).or_default();
        if !requested.iter().any(|f| f == field) {
            requested.push(field.to_string());
        }
        Ok(())
    }

    /// Fields requested for an entity, in request order.
    pub fn requested_fields(&self, entity: &str) -> Option<&[String]> {
        self.fields.get(entity).map(Vec::as_slice)
    }
}

fn split_path(path: &str) -> CollectionResult<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(CollectionError::UnknownField(path.to_string()));
    }
    Ok(segments)
}
