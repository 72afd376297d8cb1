//! Entity schema registry.
//!
//! Describes the relational entity graph a listing can query:
//! - EntitySchema: table, primary key, typed fields, associations
//! - Association: a named, directed link to another entity
//! - SchemaRegistry: lookup by entity name, loaded from TOML

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{CollectionError, CollectionResult};

/// Storage kind of a field, used to coerce request values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

/// Named link from one entity to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Association {
    /// Association name used in field paths (e.g. "comments").
    pub name: String,

    /// Target entity name (e.g. "Comment").
    pub target: String,

    /// Column on the owning entity.
    pub local_field: String,

    /// Column on the target entity.
    pub foreign_field: String,
}

/// Metadata for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity name (e.g. "Article").
    pub name: String,

    /// Backing table.
    pub table: String,

    /// Primary key column.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    /// Columns and their kinds.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldKind>,

    /// Outgoing associations.
    #[serde(default)]
    pub associations: Vec<Association>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl EntitySchema {
    pub fn field(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).copied()
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name == name)
    }

    /// First association whose target is `entity`.
    pub fn association_to(&self, entity: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.target == entity)
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    entities: Vec<EntitySchema>,
}

/// Registry of entity schemas, keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: HashMap<String, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from entity definitions and validate it.
    pub fn from_entities(entities: Vec<EntitySchema>) -> Result<Self> {
        let mut registry = Self::new();
        for entity in entities {
            registry.insert(entity);
        }

        let errors = registry.validate();
        if !errors.is_empty() {
            anyhow::bail!("Schema validation failed: {}", errors.join("; "));
        }
        Ok(registry)
    }

    /// Parse a registry from a TOML document with `[[entities]]` tables.
    pub fn from_toml(source: &str) -> Result<Self> {
        let file: SchemaFile = toml::from_str(source).context("failed to parse schema TOML")?;
        Self::from_entities(file.entities)
    }

    pub fn insert(&mut self, entity: EntitySchema) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn get(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.get(name)
    }

    /// Look up an entity, failing with `EntityNotFound`.
    pub fn entity(&self, name: &str) -> CollectionResult<&EntitySchema> {
        self.entities
            .get(name)
            .ok_or_else(|| CollectionError::EntityNotFound(name.to_string()))
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Validate identifiers and cross-entity references.
    ///
    /// Returns a list of validation errors. Empty list means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut names: Vec<&String> = self.entities.keys().collect();
        names.sort();

        for name in names {
            let Some(entity) = self.entities.get(name) else {
                continue;
            };

            if !is_valid_identifier(&entity.name) {
                errors.push(format!("Entity name '{}' is invalid", entity.name));
            }
            if !is_valid_identifier(&entity.table) {
                errors.push(format!(
                    "Table name '{}' of entity '{}' is invalid",
                    entity.table, entity.name
                ));
            }
            if !entity.fields.contains_key(&entity.primary_key) {
                errors.push(format!(
                    "Primary key '{}' is not a field of entity '{}'",
                    entity.primary_key, entity.name
                ));
            }
            for field in entity.fields.keys() {
                if !is_valid_identifier(field) {
                    errors.push(format!(
                        "Field '{}' of entity '{}' is invalid",
                        field, entity.name
                    ));
                }
            }

            for assoc in &entity.associations {
                if !is_valid_identifier(&assoc.name) {
                    errors.push(format!(
                        "Association '{}' of entity '{}' is invalid",
                        assoc.name, entity.name
                    ));
                }
                if entity.fields.contains_key(&assoc.name) {
                    errors.push(format!(
                        "Association '{}' of entity '{}' shadows a field",
                        assoc.name, entity.name
                    ));
                }
                if !entity.fields.contains_key(&assoc.local_field) {
                    errors.push(format!(
                        "Association '{}.{}' local field '{}' does not exist",
                        entity.name, assoc.name, assoc.local_field
                    ));
                }
                match self.entities.get(&assoc.target) {
                    None => errors.push(format!(
                        "Association '{}.{}' targets unknown entity '{}'",
                        entity.name, assoc.name, assoc.target
                    )),
                    Some(target) if !target.fields.contains_key(&assoc.foreign_field) => {
                        errors.push(format!(
                            "Association '{}.{}' foreign field '{}' does not exist on '{}'",
                            entity.name, assoc.name, assoc.foreign_field, target.name
                        ));
                    }
                    Some(_) => {}
                }
            }
        }

        errors
    }
}

/// Validate a SQL identifier: letter or underscore first, then alphanumerics
/// or underscores.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
