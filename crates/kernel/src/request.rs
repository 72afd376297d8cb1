//! Read-only listing request parameters.
//!
//! Parameters follow the JSON:API query conventions:
//! - `filter[path]=value` and `filter[path][op]=value`
//! - `sort=-created,title`
//! - `fields[Entity]=a,b`
//! - `include=comments.author`
//! - `page[number]=2&page[size]=10`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CollectionError, CollectionResult};

/// Page number parameter names, preferred first.
pub const PAGE_NUMBER_KEYS: [&str; 2] = ["page[number]", "page"];

/// Page size parameter names, preferred first.
pub const PAGE_SIZE_KEYS: [&str; 2] = ["page[size]", "size"];

/// Comparison operators accepted in `filter[path][op]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Exact match.
    Eq,
    /// Not equal.
    Neq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Pattern match with `%` wildcards.
    Like,
    /// Value in comma-separated list.
    In,
    /// `true` for IS NULL, `false` for IS NOT NULL.
    Null,
}

impl FromStr for FilterOperator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "eq" => FilterOperator::Eq,
            "neq" => FilterOperator::Neq,
            "gt" => FilterOperator::Gt,
            "gte" => FilterOperator::Gte,
            "lt" => FilterOperator::Lt,
            "lte" => FilterOperator::Lte,
            "like" => FilterOperator::Like,
            "in" => FilterOperator::In,
            "null" => FilterOperator::Null,
            _ => return Err(()),
        })
    }
}

/// One parsed `filter[...]` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParam {
    /// Raw parameter name, for error reporting.
    pub parameter: String,
    /// Field path, e.g. `comments.body`.
    pub path: String,
    pub operator: FilterOperator,
    pub value: String,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One entry of the `sort` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortParam {
    pub path: String,
    pub direction: SortDirection,
}

/// Key/value request parameters in the order they were received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    params: Vec<(String, String)>,
}

impl ListRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` query string.
    pub fn from_query_string(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self {
            params: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First present key among `keys`, with its value.
    pub fn get_any<'a>(&'a self, keys: &[&'a str]) -> Option<(&'a str, &'a str)> {
        keys.iter()
            .find_map(|key| self.get(key).map(|value| (*key, value)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Encode back to a query string, skipping parameters named in `skip`.
    pub fn to_query_string_without(&self, skip: &[&str]) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in self.iter().filter(|(k, _)| !skip.contains(k)) {
            serializer.append_pair(k, v);
        }
        serializer.finish()
    }

    /// Parse every `filter[...]` parameter.
    pub fn filters(&self) -> CollectionResult<Vec<FilterParam>> {
        let mut filters = Vec::new();
        for (key, value) in self.iter() {
            if key != "filter" && !key.starts_with("filter[") {
                continue;
            }
            let (path, op) = parse_bracket_key(key, "filter")?;
            let operator = match op {
                Some(op) => op.parse().map_err(|()| {
                    CollectionError::invalid_filter(key, format!("unknown operator '{op}'"))
                })?,
                None if value.contains('%') => FilterOperator::Like,
                None => FilterOperator::Eq,
            };
            filters.push(FilterParam {
                parameter: key.to_string(),
                path: path.to_string(),
                operator,
                value: value.to_string(),
            });
        }
        Ok(filters)
    }

    /// Parse the `sort` parameter.
    pub fn sorts(&self) -> CollectionResult<Vec<SortParam>> {
        let Some(value) = self.get("sort") else {
            return Ok(Vec::new());
        };

        value
            .split(',')
            .map(str::trim)
            .map(|entry| {
                let (path, direction) = match entry.strip_prefix('-') {
                    Some(path) => (path, SortDirection::Desc),
                    None => (entry, SortDirection::Asc),
                };
                if path.is_empty() {
                    return Err(CollectionError::invalid_filter("sort", "empty sort field"));
                }
                Ok(SortParam {
                    path: path.to_string(),
                    direction,
                })
            })
            .collect()
    }

    /// Parse every `fields[Entity]` parameter into `(entity, fields)`.
    pub fn sparse_fields(&self) -> CollectionResult<Vec<(String, Vec<String>)>> {
        let mut sets = Vec::new();
        for (key, value) in self.iter() {
            if key != "fields" && !key.starts_with("fields[") {
                continue;
            }
            let (entity, extra) = parse_bracket_key(key, "fields")?;
            if extra.is_some() {
                return Err(CollectionError::invalid_filter(
                    key,
                    "expected fields[Entity]",
                ));
            }
            sets.push((entity.to_string(), split_list(key, value)?));
        }
        Ok(sets)
    }

    /// Parse the `include` parameter into relation paths.
    pub fn includes(&self) -> CollectionResult<Vec<String>> {
        match self.get("include") {
            Some(value) => split_list("include", value),
            None => Ok(Vec::new()),
        }
    }
}

impl fmt::Display for ListRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string_without(&[]))
    }
}

/// Split `family[name]` or `family[name][sub]` into `(name, sub)`.
fn parse_bracket_key<'a>(
    key: &'a str,
    family: &str,
) -> CollectionResult<(&'a str, Option<&'a str>)> {
    let malformed = || CollectionError::invalid_filter(key, format!("expected {family}[name]"));

    let rest = key
        .strip_prefix(family)
        .and_then(|r| r.strip_prefix('['))
        .ok_or_else(malformed)?;
    let (name, tail) = rest.split_once(']').ok_or_else(malformed)?;
    if name.is_empty() || name.contains('[') {
        return Err(malformed());
    }
    if tail.is_empty() {
        return Ok((name, None));
    }

    let sub = tail
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .filter(|s| !s.is_empty() && !s.contains(['[', ']']))
        .ok_or_else(malformed)?;
    Ok((name, Some(sub)))
}

fn split_list(parameter: &str, value: &str) -> CollectionResult<Vec<String>> {
    value
        .split(',')
        .map(str::trim)
        .map(|item| {
            if item.is_empty() {
                Err(CollectionError::invalid_filter(parameter, "empty list entry"))
            } else {
                Ok(item.to_string())
            }
        })
        .collect()
}
