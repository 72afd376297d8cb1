//! `filter[...]` predicates.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sea_query::{Alias, Expr, SimpleExpr, Value};

use super::Finder;
use crate::error::{CollectionError, CollectionResult};
use crate::field_manager::{FieldManager, ResolvedField};
use crate::query::QueryState;
use crate::request::{FilterOperator, FilterParam, ListRequest};
use crate::schema::FieldKind;

/// Turns each `filter[...]` parameter into a WHERE condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterFinder;

impl Finder for FilterFinder {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn apply(
        &self,
        query: &mut QueryState,
        request: &ListRequest,
        fields: &mut FieldManager,
    ) -> CollectionResult<()> {
        for param in request.filters()? {
            let field = fields.resolve_field(&param.path)?;
            let condition = build_condition(&param, &field)?;
            tracing::debug!(
                parameter = %param.parameter,
                alias = %field.alias,
                column = %field.column,
                operator = ?param.operator,
                "filter applied"
            );
            query.and_where(condition);
        }
        Ok(())
    }
}

/// Build a single filter condition.
fn build_condition(param: &FilterParam, field: &ResolvedField) -> CollectionResult<SimpleExpr> {
    let column = Expr::col((Alias::new(&field.alias), Alias::new(&field.column)));

    let condition = match param.operator {
        FilterOperator::Eq => column.eq(typed_value(param, field.kind, &param.value)?),
        FilterOperator::Neq => column.ne(typed_value(param, field.kind, &param.value)?),
        FilterOperator::Gt => column.gt(typed_value(param, field.kind, &param.value)?),
        FilterOperator::Gte => column.gte(typed_value(param, field.kind, &param.value)?),
        FilterOperator::Lt => column.lt(typed_value(param, field.kind, &param.value)?),
        FilterOperator::Lte => column.lte(typed_value(param, field.kind, &param.value)?),
        FilterOperator::Like => {
            if field.kind != FieldKind::Text {
                return Err(CollectionError::invalid_filter(
                    &param.parameter,
                    "pattern matching needs a text field",
                ));
            }
            column.like(param.value.clone())
        }
        FilterOperator::In => {
            let mut values = Vec::new();
            for raw in param.value.split(',').map(str::trim) {
                if raw.is_empty() {
                    return Err(CollectionError::invalid_filter(
                        &param.parameter,
                        "empty list entry",
                    ));
                }
                values.push(typed_value(param, field.kind, raw)?);
            }
            column.is_in(values)
        }
        FilterOperator::Null => match parse_bool(&param.value) {
            Some(true) => column.is_null(),
            Some(false) => column.is_not_null(),
            None => {
                return Err(CollectionError::invalid_filter(
                    &param.parameter,
                    "expected true or false",
                ));
            }
        },
    };

    Ok(condition)
}

/// Coerce a raw request value to the field's kind.
fn typed_value(param: &FilterParam, kind: FieldKind, raw: &str) -> CollectionResult<Value> {
    let invalid = |expected: &str| {
        CollectionError::invalid_filter(
            &param.parameter,
            format!("'{raw}' is not a valid {expected}"),
        )
    };

    match kind {
        FieldKind::Text => Ok(Value::from(raw.to_string())),
        FieldKind::Timestamp => parse_timestamp(raw).ok_or_else(|| invalid("timestamp")),
        FieldKind::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid("integer")),
        FieldKind::Float => raw
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| invalid("number")),
        FieldKind::Boolean => parse_bool(raw)
            .map(Value::from)
            .ok_or_else(|| invalid("boolean")),
    }
}

/// RFC 3339, a naive date-time, or a bare date.
fn parse_timestamp(raw: &str) -> Option<Value> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(Value::from(at));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Value::from(at));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(Value::from)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
