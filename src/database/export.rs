// ==============================================================================
// database/export.rs - Database Export
// ==============================================================================
// Description: Exports database records to JSON, CSV, or TSV
// Author: Matt Barham
// Created: 2026-03-03
// Modified: 2026-05-28
// Version: 1.0.1
// ==============================================================================

use serde_json::Value;
use thiserror::Error;

use crate::database::DatabaseRecord;
use crate::schema::DatabaseSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Tsv,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Pretty-print JSON output
    pub pretty: bool,
    /// Emit the header row for CSV/TSV
    pub include_header: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Json,
            pretty: false,
            include_header: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Delimited export failed: {0}")]
    Delimited(String),
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Export records in schema field order. Values containing the delimiter,
/// quotes, or newlines are quoted with doubled internal quotes; the output
/// re-imports through the same schema unchanged.
pub fn export_records(
    schema: &DatabaseSchema,
    records: &[DatabaseRecord],
    options: &ExportOptions,
) -> Result<String, ExportError> {
    match options.format {
        ExportFormat::Json => export_json(schema, records, options.pretty),
        ExportFormat::Csv => export_delimited(schema, records, b',', options.include_header),
        ExportFormat::Tsv => export_delimited(schema, records, b'\t', options.include_header),
    }
}

fn export_json(
    schema: &DatabaseSchema,
    records: &[DatabaseRecord],
    pretty: bool,
) -> Result<String, ExportError> {
    let objects: Vec<Value> = records
        .iter()
        .map(|record| {
            let mut object = serde_json::Map::new();
            for field in &schema.fields {
                if let Some(value) = record.value(&field.name) {
                    object.insert(field.name.clone(), value.clone());
                }
            }
            Value::Object(object)
        })
        .collect();

    let rendered = if pretty {
        serde_json::to_string_pretty(&objects)?
    } else {
        serde_json::to_string(&objects)?
    };
    Ok(rendered)
}

fn export_delimited(
    schema: &DatabaseSchema,
    records: &[DatabaseRecord],
    delimiter: u8,
    include_header: bool,
) -> Result<String, ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(Vec::new());

    if include_header {
        let header: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        writer
            .write_record(&header)
            .map_err(|e| ExportError::Delimited(e.to_string()))?;
    }

    for record in records {
        let row: Vec<String> = schema
            .fields
            .iter()
            .map(|field| {
                record
                    .value(&field.name)
                    .map(render)
                    .unwrap_or_default()
            })
            .collect();
        writer
            .write_record(&row)
            .map_err(|e| ExportError::Delimited(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Delimited(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Delimited(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::predefined_schema;
    use std::collections::HashMap;

    fn record(pairs: &[(&str, Value)]) -> DatabaseRecord {
        let values: HashMap<String, Value> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        DatabaseRecord {
            id: uuid::Uuid::new_v4().to_string(),
            database_id: "db".to_string(),
            values,
        }
    }

    #[test]
    fn test_json_export_field_order_and_pretty() {
        let schema = predefined_schema("frequency").unwrap();
        let records = vec![record(&[
            ("rsid", Value::String("rs1".to_string())),
            (
                "frequency",
                Value::Number(serde_json::Number::from_f64(0.25).unwrap()),
            ),
        ])];

        let compact = export_records(&schema, &records, &ExportOptions::default()).unwrap();
        assert!(compact.contains("\"rsid\":\"rs1\""));

        let pretty = export_records(
            &schema,
            &records,
            &ExportOptions {
                pretty: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(pretty.contains('\n'));
    }

    #[test]
    fn test_csv_export_quotes_embedded_delimiters() {
        let schema = predefined_schema("clinvar").unwrap();
        let records = vec![record(&[
            ("rsid", Value::String("rs1".to_string())),
            ("condition", Value::String("contains, comma \"x\"".to_string())),
            ("significance", Value::String("pathogenic".to_string())),
        ])];

        let csv = export_records(
            &schema,
            &records,
            &ExportOptions {
                format: ExportFormat::Csv,
                ..Default::default()
            },
        )
        .unwrap();

        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("rsid,"));
        let data = lines.next().unwrap();
        assert!(data.contains("\"contains, comma \"\"x\"\"\""));
    }

    #[test]
    fn test_header_can_be_omitted() {
        let schema = predefined_schema("frequency").unwrap();
        let records = vec![record(&[("rsid", Value::String("rs1".to_string()))])];

        let tsv = export_records(
            &schema,
            &records,
            &ExportOptions {
                format: ExportFormat::Tsv,
                include_header: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(tsv.starts_with("rs1"));
    }
}
