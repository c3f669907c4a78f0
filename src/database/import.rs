// ==============================================================================
// database/import.rs - Import Pipeline
// ==============================================================================
// Description: Format sniffing, row extraction (CSV/TSV/JSON/VCF), schema
//              resolution, and batch validation for database imports
// Author: Matt Barham
// Created: 2026-03-03
// Modified: 2026-07-02
// Version: 1.2.0
// ==============================================================================

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::schema::{
    detect_schema, predefined_schema, validate_record, DatabaseSchema, FieldError, SchemaError,
};

/// Bounded sample of failing rows carried on a strict-mode rejection
pub const ERROR_SAMPLE_LIMIT: usize = 5;

/// Rows sampled for schema auto-detection
const DETECTION_SAMPLE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Json,
    Csv,
    Tsv,
    Vcf,
}

impl ImportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportFormat::Json => "JSON",
            ImportFormat::Csv => "CSV",
            ImportFormat::Tsv => "TSV",
            ImportFormat::Vcf => "VCF",
        }
    }
}

/// Raw rows plus source column order
#[derive(Debug, Clone, Default)]
pub struct ParsedRows {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, Value>>,
}

/// How the import resolves its schema
#[derive(Debug, Clone)]
pub enum SchemaSpec {
    /// Use this schema as given
    Explicit(DatabaseSchema),
    /// One of the predefined reference schemas
    Named(String),
    /// Auto-detect from the imported rows
    Auto { name: String },
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub schema: SchemaSpec,
    /// Drop invalid records instead of rejecting the whole import
    pub skip_invalid: bool,
    /// Optional source-field -> schema-field mapping
    pub mapping: Option<HashMap<String, String>>,
}

impl ImportOptions {
    pub fn auto(name: &str) -> Self {
        Self {
            schema: SchemaSpec::Auto {
                name: name.to_string(),
            },
            skip_invalid: false,
            mapping: None,
        }
    }

    pub fn named(schema_name: &str) -> Self {
        Self {
            schema: SchemaSpec::Named(schema_name.to_string()),
            skip_invalid: false,
            mapping: None,
        }
    }
}

/// Validation errors for one failing row
#[derive(Debug, Clone)]
pub struct RowErrors {
    /// 1-based row number in source order
    pub row: usize,
    pub errors: Vec<FieldError>,
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to parse {format} content: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("Unknown predefined schema '{0}'")]
    UnknownSchema(String),

    #[error("Schema is invalid: {0}")]
    Schema(#[from] SchemaError),

    #[error("{invalid} of {total} records failed validation")]
    InvalidRecords {
        total: usize,
        invalid: usize,
        /// First few failing rows with their field errors
        sample: Vec<RowErrors>,
    },
}

/// Detect the import format by file extension, then by content sniffing:
/// leading '[' or '{' is JSON, a VCF fileformat or #CHROM header is VCF, a
/// tab in the first data line is TSV, anything else is CSV.
pub fn detect_import_format(filename: Option<&str>, content: &str) -> ImportFormat {
    if let Some(filename) = filename {
        let lower = filename.to_lowercase();
        if lower.ends_with(".json") {
            return ImportFormat::Json;
        }
        if lower.ends_with(".tsv") || lower.ends_with(".tab") {
            return ImportFormat::Tsv;
        }
        if lower.ends_with(".vcf") {
            return ImportFormat::Vcf;
        }
        if lower.ends_with(".csv") {
            return ImportFormat::Csv;
        }
    }

    let trimmed = content.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return ImportFormat::Json;
    }
    if trimmed.starts_with("##fileformat=VCF")
        || content.lines().take(200).any(|l| l.starts_with("#CHROM"))
    {
        return ImportFormat::Vcf;
    }
    let first_data_line = content
        .lines()
        .find(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'));
    if first_data_line.map(|l| l.contains('\t')).unwrap_or(false) {
        return ImportFormat::Tsv;
    }
    ImportFormat::Csv
}

/// Parse text content into rows according to the detected format
pub fn parse_rows(format: ImportFormat, content: &str) -> Result<ParsedRows, ImportError> {
    match format {
        ImportFormat::Csv => parse_delimited(content, b','),
        ImportFormat::Tsv => parse_delimited(content, b'\t'),
        ImportFormat::Json => parse_json(content),
        ImportFormat::Vcf => parse_vcf(content),
    }
}

/// Delimited parsing handles quoted fields containing the delimiter,
/// embedded quotes via doubling, and '#'-prefixed comment lines.
fn parse_delimited(content: &str, delimiter: u8) -> Result<ParsedRows, ImportError> {
    let format = if delimiter == b'\t' { "TSV" } else { "CSV" };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| ImportError::Parse {
            format,
            message: e.to_string(),
        })?
        .iter()
        .map(String::from)
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ImportError::Parse {
            format,
            message: e.to_string(),
        })?;
        let mut row = HashMap::new();
        for (column, value) in columns.iter().zip(record.iter()) {
            row.insert(column.clone(), Value::String(value.to_string()));
        }
        rows.push(row);
    }

    Ok(ParsedRows { columns, rows })
}

fn parse_json(content: &str) -> Result<ParsedRows, ImportError> {
    let parsed: Value = serde_json::from_str(content).map_err(|e| ImportError::Parse {
        format: "JSON",
        message: e.to_string(),
    })?;

    let objects: Vec<serde_json::Map<String, Value>> = match parsed {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(object) => Ok(object),
                other => Err(ImportError::Parse {
                    format: "JSON",
                    message: format!("expected an array of objects, found {}", other),
                }),
            })
            .collect::<Result<_, _>>()?,
        Value::Object(object) => vec![object],
        other => {
            return Err(ImportError::Parse {
                format: "JSON",
                message: format!("expected an array or object, found {}", other),
            })
        }
    };

    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::with_capacity(objects.len());
    for object in objects {
        for key in object.keys() {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(key)) {
                columns.push(key.clone());
            }
        }
        rows.push(object.into_iter().collect());
    }

    Ok(ParsedRows { columns, rows })
}

/// VCF rows expose the fixed columns plus INFO key=value pairs exploded into
/// synthetic columns; flag keys become "true".
fn parse_vcf(content: &str) -> Result<ParsedRows, ImportError> {
    const FIXED: [&str; 8] = [
        "CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO",
    ];

    let mut columns: Vec<String> = FIXED.iter().map(|c| c.to_string()).collect();
    let mut rows = Vec::new();

    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 8 {
            return Err(ImportError::Parse {
                format: "VCF",
                message: format!("expected at least 8 columns, found {}", fields.len()),
            });
        }

        let mut row = HashMap::new();
        for (column, value) in FIXED.iter().zip(fields.iter()) {
            row.insert(column.to_string(), Value::String(value.to_string()));
        }

        for pair in fields[7].split(';') {
            if pair.is_empty() || pair == "." {
                continue;
            }
            let (key, value) = match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair.to_string(), "true".to_string()),
            };
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(&key)) {
                columns.push(key.clone());
            }
            row.insert(key, Value::String(value));
        }

        rows.push(row);
    }

    Ok(ParsedRows { columns, rows })
}

/// Resolve the schema for an import: explicit object, predefined name, or
/// auto-detection over a sample of the parsed rows.
pub fn resolve_schema(spec: &SchemaSpec, rows: &ParsedRows) -> Result<DatabaseSchema, ImportError> {
    let schema = match spec {
        SchemaSpec::Explicit(schema) => schema.clone(),
        SchemaSpec::Named(name) => {
            predefined_schema(name).ok_or_else(|| ImportError::UnknownSchema(name.clone()))?
        }
        SchemaSpec::Auto { name } => {
            let sample: Vec<HashMap<String, Value>> = rows
                .rows
                .iter()
                .take(DETECTION_SAMPLE_SIZE)
                .cloned()
                .collect();
            let schema = detect_schema(name, &rows.columns, &sample);
            debug!(
                "Auto-detected schema '{}' with {} field(s)",
                name,
                schema.fields.len()
            );
            schema
        }
    };
    schema.validate()?;
    Ok(schema)
}

/// Validate every row against the schema. In strict mode any invalid record
/// rejects the whole import with a bounded failing-row sample; in lenient
/// mode invalid records are dropped and counted.
pub fn validate_rows(
    schema: &DatabaseSchema,
    rows: &[HashMap<String, Value>],
    mapping: Option<&HashMap<String, String>>,
    skip_invalid: bool,
) -> Result<(Vec<HashMap<String, Value>>, usize), ImportError> {
    let mut valid = Vec::with_capacity(rows.len());
    let mut invalid = 0usize;
    let mut sample: Vec<RowErrors> = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let validation = validate_record(schema, row, mapping);
        if validation.is_valid() {
            valid.push(validation.values);
        } else {
            invalid += 1;
            if sample.len() < ERROR_SAMPLE_LIMIT {
                sample.push(RowErrors {
                    row: index + 1,
                    errors: validation.errors,
                });
            }
        }
    }

    if invalid > 0 && !skip_invalid {
        return Err(ImportError::InvalidRecords {
            total: rows.len(),
            invalid,
            sample,
        });
    }

    Ok((valid, invalid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldErrorCode;

    #[test]
    fn test_format_detection_by_extension() {
        assert_eq!(
            detect_import_format(Some("db.json"), ""),
            ImportFormat::Json
        );
        assert_eq!(detect_import_format(Some("db.tsv"), ""), ImportFormat::Tsv);
        assert_eq!(detect_import_format(Some("db.vcf"), ""), ImportFormat::Vcf);
        assert_eq!(detect_import_format(Some("db.csv"), ""), ImportFormat::Csv);
    }

    #[test]
    fn test_format_detection_by_content() {
        assert_eq!(
            detect_import_format(None, "[{\"rsid\": \"rs1\"}]"),
            ImportFormat::Json
        );
        assert_eq!(
            detect_import_format(None, "##fileformat=VCFv4.2\n"),
            ImportFormat::Vcf
        );
        assert_eq!(
            detect_import_format(None, "rsid\tgene\nrs1\tCFTR\n"),
            ImportFormat::Tsv
        );
        assert_eq!(
            detect_import_format(None, "rsid,gene\nrs1,CFTR\n"),
            ImportFormat::Csv
        );
    }

    #[test]
    fn test_csv_quoted_fields_and_comments() {
        let content = "# comment line\nrsid,condition\nrs1,\"contains, comma\"\nrs2,\"say \"\"hi\"\"\"\n";
        let parsed = parse_rows(ImportFormat::Csv, content).unwrap();

        assert_eq!(parsed.columns, vec!["rsid", "condition"]);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(
            parsed.rows[0].get("condition"),
            Some(&Value::String("contains, comma".to_string()))
        );
        assert_eq!(
            parsed.rows[1].get("condition"),
            Some(&Value::String("say \"hi\"".to_string()))
        );
    }

    #[test]
    fn test_json_array_of_objects() {
        let content = r#"[{"rsid": "rs1", "frequency": 0.5}, {"rsid": "rs2"}]"#;
        let parsed = parse_rows(ImportFormat::Json, content).unwrap();

        assert_eq!(parsed.rows.len(), 2);
        assert!(parsed.columns.iter().any(|c| c == "rsid"));
        assert!(parsed.columns.iter().any(|c| c == "frequency"));

        let bad = parse_rows(ImportFormat::Json, "[1, 2]");
        assert!(matches!(bad.unwrap_err(), ImportError::Parse { .. }));
    }

    #[test]
    fn test_vcf_info_explodes_to_synthetic_columns() {
        let content = "##fileformat=VCFv4.2\n\
                       #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
                       1\t82154\trs4477212\tA\tG\t.\tPASS\tAF=0.02;DB;GENE=CFTR\n";
        let parsed = parse_rows(ImportFormat::Vcf, content).unwrap();

        assert_eq!(parsed.rows.len(), 1);
        let row = &parsed.rows[0];
        assert_eq!(row.get("ID"), Some(&Value::String("rs4477212".to_string())));
        assert_eq!(row.get("AF"), Some(&Value::String("0.02".to_string())));
        assert_eq!(row.get("DB"), Some(&Value::String("true".to_string())));
        assert_eq!(row.get("GENE"), Some(&Value::String("CFTR".to_string())));
        assert!(parsed.columns.iter().any(|c| c == "AF"));
    }

    #[test]
    fn test_strict_mode_rejects_with_bounded_sample() {
        let schema = predefined_schema("frequency").unwrap();
        let content = "rsid,frequency\n\
                       rs1,0.5\n\
                       rs2,1.5\n\
                       rs3,2.5\n\
                       rs4,3.5\n\
                       rs5,4.5\n\
                       rs6,5.5\n\
                       rs7,6.5\n";
        let parsed = parse_rows(ImportFormat::Csv, content).unwrap();
        let result = validate_rows(&schema, &parsed.rows, None, false);

        match result.unwrap_err() {
            ImportError::InvalidRecords {
                total,
                invalid,
                sample,
            } => {
                assert_eq!(total, 7);
                assert_eq!(invalid, 6);
                assert_eq!(sample.len(), ERROR_SAMPLE_LIMIT);
                assert_eq!(sample[0].row, 2);
                assert_eq!(sample[0].errors[0].code, FieldErrorCode::OutOfRange);
            }
            other => panic!("Expected InvalidRecords, got {:?}", other),
        }
    }

    #[test]
    fn test_lenient_mode_drops_invalid() {
        let schema = predefined_schema("frequency").unwrap();
        let content = "rsid,frequency\nrs1,0.5\nrs2,1.5\n";
        let parsed = parse_rows(ImportFormat::Csv, content).unwrap();

        let (valid, skipped) = validate_rows(&schema, &parsed.rows, None, true).unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_resolve_named_and_auto_schema() {
        let parsed = parse_rows(ImportFormat::Csv, "rsid,frequency\nrs1,0.5\n").unwrap();

        let named = resolve_schema(&SchemaSpec::Named("frequency".to_string()), &parsed).unwrap();
        assert_eq!(named.id, "frequency");

        let auto = resolve_schema(
            &SchemaSpec::Auto {
                name: "my-db".to_string(),
            },
            &parsed,
        )
        .unwrap();
        assert_eq!(auto.name, "my-db");
        assert_eq!(auto.primary_key, vec!["rsid".to_string()]);

        let unknown = resolve_schema(&SchemaSpec::Named("nope".to_string()), &parsed);
        assert!(matches!(unknown.unwrap_err(), ImportError::UnknownSchema(_)));
    }
}
