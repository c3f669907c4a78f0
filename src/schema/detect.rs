// ==============================================================================
// schema/detect.rs - Schema Auto-Detection
// ==============================================================================
// Description: Infers a schema from sampled records by testing candidate
//              field types in specificity order
// Author: Matt Barham
// Created: 2026-02-17
// Modified: 2026-05-20
// Version: 1.0.1
// ==============================================================================

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::schema::fields::{DatabaseSchema, FieldDefinition, FieldType};

/// Candidate types tested in specificity order; string is the fallback.
/// Numeric inference distinguishes frequency and position separately.
const CANDIDATES: &[FieldType] = &[
    FieldType::Rsid,
    FieldType::Chromosome,
    FieldType::Genotype,
    FieldType::Allele,
    FieldType::Gene,
    FieldType::Boolean,
];

/// Positions are large integers; anything smaller stays a plain number
const POSITION_MIN: u64 = 10_000;

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Non-empty sampled values for one column
fn column_values(column: &str, samples: &[HashMap<String, Value>]) -> Vec<String> {
    samples
        .iter()
        .filter_map(|record| {
            record
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(column))
                .map(|(_, value)| render(value))
        })
        .filter(|value| !value.is_empty())
        .collect()
}

fn infer_type(values: &[String]) -> FieldType {
    if values.is_empty() {
        return FieldType::String;
    }

    for candidate in CANDIDATES {
        if values
            .iter()
            .all(|value| candidate.normalize(value).is_ok())
        {
            return *candidate;
        }
    }

    // Numeric: frequency for decimals in [0,1], position for large integers
    let numbers: Option<Vec<f64>> = values.iter().map(|v| v.parse::<f64>().ok()).collect();
    if let Some(numbers) = numbers {
        let all_unit_interval = numbers.iter().all(|n| (0.0..=1.0).contains(n));
        let any_fractional = numbers.iter().any(|n| n.fract() != 0.0);
        if all_unit_interval && any_fractional {
            return FieldType::Frequency;
        }

        let all_integral = numbers.iter().all(|n| n.fract() == 0.0 && *n >= 0.0);
        if all_integral && numbers.iter().all(|n| *n >= POSITION_MIN as f64) {
            return FieldType::Position;
        }

        return FieldType::Number;
    }

    FieldType::String
}

/// Infer a schema from sampled records.
///
/// `columns` preserves the source column order (CSV headers or first-seen
/// JSON keys). A field is required only if every sampled record carries a
/// non-empty value for it. The primary key prefers a detected rsid field,
/// else any required string field, else the first column.
pub fn detect_schema(
    name: &str,
    columns: &[String],
    samples: &[HashMap<String, Value>],
) -> DatabaseSchema {
    let mut fields = Vec::with_capacity(columns.len());

    for column in columns {
        let values = column_values(column, samples);
        let field_type = infer_type(&values);
        let required = !samples.is_empty() && values.len() == samples.len();

        debug!(
            "Detected field '{}' as {} (required: {})",
            column,
            field_type.as_str(),
            required
        );
        fields.push(FieldDefinition::new(column, field_type, required));
    }

    let primary_key = fields
        .iter()
        .find(|f| f.field_type == FieldType::Rsid)
        .or_else(|| {
            fields
                .iter()
                .find(|f| f.required && f.field_type == FieldType::String)
        })
        .map(|f| f.name.clone())
        .or_else(|| columns.first().cloned())
        .map(|name| vec![name])
        .unwrap_or_default();

    DatabaseSchema::new(&Uuid::new_v4().to_string(), name, fields, primary_key)
}
