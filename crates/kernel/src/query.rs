//! Phase-typed query state built on SeaQuery.
//!
//! A listing query moves through two phases:
//! - [`QueryState`]: mutable. Finders add predicates and sorts, the joiner
//!   adds joins.
//! - [`FrozenQuery`]: produced by [`QueryState::finalize_filters`], which
//!   consumes the mutable phase. It only renders count and page statements,
//!   so nothing can change the shape the paginator counts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sea_query::{
    Alias, Asterisk, Expr, Func, JoinType, Order, PostgresQueryBuilder, Query,
    SelectStatement, SimpleExpr,
};

use crate::error::{CollectionError, CollectionResult};
use crate::field_manager::FieldManager;
use crate::request::SortDirection;
use crate::schema::{EntitySchema, SchemaRegistry};

/// Prefix of projected sort columns that are not part of the entity.
pub const SORT_COLUMN_PREFIX: &str = "__sort_";

/// One applied `LEFT JOIN source_alias.association AS alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub source_alias: String,
    pub association: String,
    pub alias: String,
    pub entity: String,
    pub table: String,
}

impl fmt::Display for JoinClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} AS {}", self.source_alias, self.association, self.alias)
    }
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    pub alias: String,
    pub column: String,
    pub direction: SortDirection,
}

/// Mutable query for the filter and join phases.
#[derive(Debug, Clone)]
pub struct QueryState {
    schema: Arc<SchemaRegistry>,
    root_entities: Vec<String>,
    root_alias: String,
    primary_key: String,
    root_columns: Vec<String>,
    /// FROM, JOINs and WHERE only. Projection and ordering are added on freeze.
    statement: SelectStatement,
    aliases: HashMap<String, String>,
    joins: Vec<JoinClause>,
    sorts: Vec<SortClause>,
    conditions: usize,
}

impl QueryState {
    pub(crate) fn new(schema: Arc<SchemaRegistry>, root: &EntitySchema, root_alias: &str) -> Self {
        let mut statement = Query::select();
        statement.from_as(Alias::new(&root.table), Alias::new(root_alias));

        Self {
            schema,
            root_entities: vec![root.name.clone()],
            root_alias: root_alias.to_string(),
            primary_key: root.primary_key.clone(),
            root_columns: root.fields.keys().cloned().collect(),
            statement,
            aliases: HashMap::from([(root_alias.to_string(), root.name.clone())]),
            joins: Vec::new(),
            sorts: Vec::new(),
            conditions: 0,
        }
    }

    /// Schema the query resolves entities against.
    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    pub fn root_entities(&self) -> &[String] {
        &self.root_entities
    }

    pub fn root_alias(&self) -> &str {
        &self.root_alias
    }

    /// Entity bound to an alias in this query.
    pub fn alias_entity(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    /// Add a WHERE condition, ANDed with the existing ones.
    pub fn and_where(&mut self, condition: SimpleExpr) {
        self.statement.and_where(condition);
        self.conditions += 1;
    }

    pub fn condition_count(&self) -> usize {
        self.conditions
    }

    /// Append an ORDER BY entry.
    pub fn add_order_by(&mut self, alias: &str, column: &str, direction: SortDirection) {
        self.sorts.push(SortClause {
            alias: alias.to_string(),
            column: column.to_string(),
            direction,
        });
    }

    pub fn sorts(&self) -> &[SortClause] {
        &self.sorts
    }

    /// `LEFT JOIN source_alias.association AS alias`.
    pub fn left_join(
        &mut self,
        source_alias: &str,
        association: &str,
        alias: &str,
    ) -> CollectionResult<&JoinClause> {
        let source_entity = self.alias_entity(source_alias).ok_or_else(|| {
            CollectionError::InvalidGraph(format!(
                "join anchor '{source_alias}' is not part of the query"
            ))
        })?;
        if self.aliases.contains_key(alias) {
            return Err(CollectionError::InvalidGraph(format!(
                "alias '{alias}' is already joined"
            )));
        }

        let source = self.schema.entity(source_entity)?;
        let assoc = source.association(association).ok_or_else(|| {
            CollectionError::InvalidGraph(format!(
                "entity '{}' has no association '{association}'",
                source.name
            ))
        })?;
        let target = self.schema.entity(&assoc.target)?;

        let on = Expr::col((Alias::new(source_alias), Alias::new(&assoc.local_field)))
            .equals((Alias::new(alias), Alias::new(&assoc.foreign_field)));
        self.statement.join_as(
            JoinType::LeftJoin,
            Alias::new(&target.table),
            Alias::new(alias),
            on,
        );

        let clause = JoinClause {
            source_alias: source_alias.to_string(),
            association: association.to_string(),
            alias: alias.to_string(),
            entity: target.name.clone(),
            table: target.table.clone(),
        };
        self.aliases.insert(alias.to_string(), target.name.clone());
        self.joins.push(clause);

        let index = self.joins.len() - 1;
        Ok(&self.joins[index])
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    /// Close the filter and join phases.
    ///
    /// Projects the root's requested fields (primary key always included) or
    /// every root column. With joins present the page is grouped by the
    /// projected root columns so each root row appears once, and sorts on
    /// joined columns are projected as `MIN`/`MAX` aggregates named `__sort_N`.
    pub fn finalize_filters(self, fields: &FieldManager) -> FrozenQuery {
        let root_entity = self.root_entities[0].clone();
        let grouped = !self.joins.is_empty();
        let root = Alias::new(&self.root_alias);

        let mut projected: Vec<String> = Vec::new();
        if let Some(requested) = fields.requested_fields(&root_entity) {
            projected.push(self.primary_key.clone());
            for field in requested {
                if !projected.contains(field) {
                    projected.push(field.clone());
                }
            }
        } else if grouped {
            projected.push(self.primary_key.clone());
            for column in &self.root_columns {
                if !projected.contains(column) {
                    projected.push(column.clone());
                }
            }
        }

        let mut page = self.statement.clone();
        if projected.is_empty() {
            page.column((root.clone(), Asterisk));
        } else {
            for column in &projected {
                page.column((root.clone(), Alias::new(column)));
            }
        }
        if grouped {
            for column in &projected {
                page.group_by_col((root.clone(), Alias::new(column)));
            }
        }

        let mut sort_columns = Vec::new();
        for sort in &self.sorts {
            let order = match sort.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            let column = Expr::col((Alias::new(&sort.alias), Alias::new(&sort.column)));
            let on_root = sort.alias == self.root_alias;

            if grouped && !on_root {
                // One row per root: order by the first value in sort order.
                let name = format!("{SORT_COLUMN_PREFIX}{}", sort_columns.len());
                let aggregate = match sort.direction {
                    SortDirection::Asc => Func::min(column),
                    SortDirection::Desc => Func::max(column),
                };
                page.expr_as(aggregate, Alias::new(&name));
                page.order_by(Alias::new(&name), order);
                sort_columns.push(name);
                continue;
            }
            if grouped && !projected.contains(&sort.column) {
                page.group_by_col((root.clone(), Alias::new(&sort.column)));
            }
            page.order_by_expr(column.into(), order);
        }

        let mut count = self.statement.clone();
        if grouped {
            count.expr(Func::count_distinct(Expr::col((
                root.clone(),
                Alias::new(&self.primary_key),
            ))));
        } else {
            count.expr(Expr::col(Asterisk).count());
        }

        tracing::debug!(
            root = %root_entity,
            joins = self.joins.len(),
            conditions = self.conditions,
            sorts = self.sorts.len(),
            grouped,
            "query filters finalized"
        );

        FrozenQuery {
            page,
            count,
            sort_columns,
            state: self,
        }
    }
}

/// Query whose filter and join shape is final.
#[derive(Debug, Clone)]
pub struct FrozenQuery {
    state: QueryState,
    page: SelectStatement,
    count: SelectStatement,
    sort_columns: Vec<String>,
}

impl FrozenQuery {
    /// Page statement with LIMIT/OFFSET applied.
    pub fn page_statement(&self, limit: u64, offset: u64) -> SelectStatement {
        let mut page = self.page.clone();
        page.limit(limit);
        page.offset(offset);
        page
    }

    /// COUNT over the filtered and joined shape, without limit or offset.
    pub fn count_sql(&self) -> String {
        self.count.to_string(PostgresQueryBuilder)
    }

    pub fn page_sql(&self, limit: u64, offset: u64) -> String {
        self.page_statement(limit, offset)
            .to_string(PostgresQueryBuilder)
    }

    /// Projected `__sort_N` column names.
    pub fn sort_columns(&self) -> &[String] {
        &self.sort_columns
    }

    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        self.state.schema()
    }

    pub fn root_entities(&self) -> &[String] {
        self.state.root_entities()
    }

    pub fn joins(&self) -> &[JoinClause] {
        self.state.joins()
    }

    pub fn sorts(&self) -> &[SortClause] {
        self.state.sorts()
    }

    pub fn condition_count(&self) -> usize {
        self.state.condition_count()
    }

    /// A detached mutable copy of the filter phase. Changes to it never
    /// reach this query or anything already executed from it.
    pub fn reopen(&self) -> QueryState {
        self.state.clone()
    }
}
