// ==============================================================================
// database/query.rs - Record Query Engine
// ==============================================================================
// Description: Operator-driven filtering with sorting and pagination over
//              database records
// Author: Matt Barham
// Created: 2026-03-02
// Modified: 2026-06-11
// Version: 1.1.0
// ==============================================================================

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::database::DatabaseRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl Default for SortDirection {
    fn default() -> Self {
        SortDirection::Ascending
    }
}

/// One filter clause; all clauses of a query must match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFilter {
    pub field: String,
    pub operator: QueryOperator,
    pub value: Value,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
    #[serde(default)]
    pub sort_field: Option<String>,
    #[serde(default)]
    pub sort_direction: SortDirection,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Invalid regex pattern '{0}'")]
    InvalidRegex(String),
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Coerce a value to a number: JSON numbers directly, strings by parsing
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn matches_filter(record: &DatabaseRecord, filter: &QueryFilter) -> Result<bool, QueryError> {
    let value = match record.value(&filter.field) {
        Some(value) => value,
        None => return Ok(false),
    };

    match filter.operator {
        QueryOperator::Gt | QueryOperator::Lt | QueryOperator::Gte | QueryOperator::Lte => {
            // Numeric operators coerce both operands
            let (left, right) = match (as_number(value), as_number(&filter.value)) {
                (Some(left), Some(right)) => (left, right),
                _ => return Ok(false),
            };
            Ok(match filter.operator {
                QueryOperator::Gt => left > right,
                QueryOperator::Lt => left < right,
                QueryOperator::Gte => left >= right,
                QueryOperator::Lte => left <= right,
                _ => unreachable!(),
            })
        }
        QueryOperator::Regex => {
            let pattern = render(&filter.value);
            let full_pattern = if filter.case_sensitive {
                pattern.clone()
            } else {
                format!("(?i){}", pattern)
            };
            let regex = Regex::new(&full_pattern)
                .map_err(|_| QueryError::InvalidRegex(pattern))?;
            Ok(regex.is_match(&render(value)))
        }
        QueryOperator::Equals
        | QueryOperator::Contains
        | QueryOperator::StartsWith
        | QueryOperator::EndsWith => {
            let mut left = render(value);
            let mut right = render(&filter.value);
            if !filter.case_sensitive {
                left = left.to_lowercase();
                right = right.to_lowercase();
            }
            Ok(match filter.operator {
                QueryOperator::Equals => left == right,
                QueryOperator::Contains => left.contains(&right),
                QueryOperator::StartsWith => left.starts_with(&right),
                QueryOperator::EndsWith => left.ends_with(&right),
                _ => unreachable!(),
            })
        }
    }
}

/// Apply filters, sorting, and offset/limit pagination
pub fn apply_query<'a>(
    records: impl IntoIterator<Item = &'a DatabaseRecord>,
    query: &Query,
) -> Result<Vec<&'a DatabaseRecord>, QueryError> {
    let mut matched: Vec<&DatabaseRecord> = Vec::new();
    for record in records {
        let mut keep = true;
        for filter in &query.filters {
            if !matches_filter(record, filter)? {
                keep = false;
                break;
            }
        }
        if keep {
            matched.push(record);
        }
    }

    if let Some(sort_field) = &query.sort_field {
        matched.sort_by(|a, b| {
            let left = a.value(sort_field);
            let right = b.value(sort_field);
            let ordering = match (left.and_then(as_number), right.and_then(as_number)) {
                (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Equal),
                _ => {
                    let l = left.map(render).unwrap_or_default();
                    let r = right.map(render).unwrap_or_default();
                    l.cmp(&r)
                }
            };
            match query.sort_direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
    }

    let results = matched
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(results)
}
