// ==============================================================================
// schema/validate.rs - Record Validation
// ==============================================================================
// Description: Validates raw records against a schema and detects duplicate
//              primary keys
// Author: Matt Barham
// Created: 2026-02-16
// Modified: 2026-05-20
// Version: 1.1.0
// ==============================================================================

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::schema::fields::{DatabaseSchema, FieldErrorCode};

/// One field-scoped validation error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: FieldErrorCode,
    pub message: String,
}

/// Outcome of validating a single record
#[derive(Debug, Clone, Default)]
pub struct RecordValidation {
    /// Normalized values keyed by schema field name
    pub values: HashMap<String, Value>,
    pub errors: Vec<FieldError>,
}

impl RecordValidation {
    /// A record is valid only with zero field errors
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Render a raw JSON value as the string the type normalizers consume.
/// Null renders as an empty string (treated as missing).
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Resolve the raw value for a schema field: through the explicit
/// source-field -> schema-field mapping when given, else by case-insensitive
/// name match.
fn resolve_value<'a>(
    raw: &'a HashMap<String, Value>,
    field_name: &str,
    mapping: Option<&HashMap<String, String>>,
) -> Option<&'a Value> {
    if let Some(mapping) = mapping {
        if let Some((source_key, _)) = mapping
            .iter()
            .find(|(_, target)| target.eq_ignore_ascii_case(field_name))
        {
            if let Some(value) = raw.get(source_key) {
                return Some(value);
            }
        }
    }
    raw.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(field_name))
        .map(|(_, value)| value)
}

/// Validate one raw record against a schema.
///
/// For each declared field: locate the input value (case-insensitively or
/// through `mapping`), enforce required-ness, the type's canonical pattern,
/// any custom pattern, and any enumerated allowed values. Produces normalized
/// values or coded field errors.
pub fn validate_record(
    schema: &DatabaseSchema,
    raw: &HashMap<String, Value>,
    mapping: Option<&HashMap<String, String>>,
) -> RecordValidation {
    let mut validation = RecordValidation::default();

    for field in &schema.fields {
        let raw_value = resolve_value(raw, &field.name, mapping);
        let rendered = raw_value.map(value_to_string).unwrap_or_default();

        if rendered.trim().is_empty() {
            if field.required {
                validation.errors.push(FieldError {
                    field: field.name.clone(),
                    code: FieldErrorCode::RequiredMissing,
                    message: format!("Required field '{}' is missing", field.name),
                });
            }
            continue;
        }

        let normalized = match field.field_type.normalize(&rendered) {
            Ok(value) => value,
            Err(code) => {
                validation.errors.push(FieldError {
                    field: field.name.clone(),
                    code,
                    message: format!(
                        "Field '{}' rejected value '{}' ({})",
                        field.name,
                        rendered.trim(),
                        code.as_str()
                    ),
                });
                continue;
            }
        };

        let normalized_str = value_to_string(&normalized);

        if let Some(pattern) = &field.pattern {
            // Patterns are compiled and checked by DatabaseSchema::validate;
            // an uncompilable pattern here counts as a mismatch.
            let matched = Regex::new(pattern)
                .map(|re| re.is_match(&normalized_str))
                .unwrap_or(false);
            if !matched {
                validation.errors.push(FieldError {
                    field: field.name.clone(),
                    code: FieldErrorCode::PatternMismatch,
                    message: format!(
                        "Field '{}' value '{}' does not match pattern '{}'",
                        field.name, normalized_str, pattern
                    ),
                });
                continue;
            }
        }

        if let Some(allowed) = &field.allowed_values {
            let permitted = allowed
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(&normalized_str));
            if !permitted {
                validation.errors.push(FieldError {
                    field: field.name.clone(),
                    code: FieldErrorCode::InvalidValue,
                    message: format!(
                        "Field '{}' value '{}' is not an allowed value",
                        field.name, normalized_str
                    ),
                });
                continue;
            }
        }

        validation.values.insert(field.name.clone(), normalized);
    }

    validation
}

/// Join a record's primary-key values (in schema-declared order) into one
/// composite key
pub fn composite_key(schema: &DatabaseSchema, values: &HashMap<String, Value>) -> String {
    schema
        .primary_key
        .iter()
        .map(|key| {
            values
                .get(key)
                .map(value_to_string)
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Find composite primary keys that occur more than once across a batch of
/// validated records. Each offending key is reported once.
pub fn find_duplicate_keys(
    schema: &DatabaseSchema,
    records: &[HashMap<String, Value>],
) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for values in records {
        *counts.entry(composite_key(schema, values)).or_insert(0) += 1;
    }

    let mut duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, _)| key)
        .collect();
    duplicates.sort();
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fields::{predefined_schema, FieldDefinition, FieldType};

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_valid_record_normalizes_values() {
        let schema = predefined_schema("clinvar").unwrap();
        let record = raw(&[
            ("RSID", "RS123"),
            ("gene", "cftr"),
            ("condition", "Cystic fibrosis"),
            ("Significance", "Likely Pathogenic"),
        ]);

        let validation = validate_record(&schema, &record, None);
        assert!(validation.is_valid(), "errors: {:?}", validation.errors);
        assert_eq!(
            validation.values.get("rsid"),
            Some(&Value::String("rs123".to_string()))
        );
        assert_eq!(
            validation.values.get("gene"),
            Some(&Value::String("CFTR".to_string()))
        );
        assert_eq!(
            validation.values.get("significance"),
            Some(&Value::String("likely_pathogenic".to_string()))
        );
    }

    #[test]
    fn test_required_missing() {
        let schema = predefined_schema("clinvar").unwrap();
        let record = raw(&[("rsid", "rs123"), ("condition", "x")]);

        let validation = validate_record(&schema, &record, None);
        assert!(!validation.is_valid());
        assert!(validation
            .errors
            .iter()
            .any(|e| e.field == "significance" && e.code == FieldErrorCode::RequiredMissing));
    }

    #[test]
    fn test_frequency_out_of_range() {
        let schema = predefined_schema("frequency").unwrap();
        let record = raw(&[("rsid", "rs1"), ("frequency", "1.5")]);

        let validation = validate_record(&schema, &record, None);
        assert!(!validation.is_valid());
        assert_eq!(validation.errors[0].code, FieldErrorCode::OutOfRange);
        assert_eq!(validation.errors[0].code.as_str(), "VALUE_OUT_OF_RANGE");
    }

    #[test]
    fn test_allowed_values_enforced() {
        let schema = predefined_schema("pharmgkb").unwrap();
        let record = raw(&[
            ("rsid", "rs1"),
            ("gene", "CYP2C19"),
            ("drug", "clopidogrel"),
            ("evidence_level", "9Z"),
        ]);

        let validation = validate_record(&schema, &record, None);
        assert!(validation
            .errors
            .iter()
            .any(|e| e.field == "evidence_level" && e.code == FieldErrorCode::InvalidValue));
    }

    #[test]
    fn test_custom_pattern_mismatch() {
        let mut field = FieldDefinition::new("code", FieldType::String, true);
        field.pattern = Some("^[A-Z]{3}$".to_string());
        let schema = DatabaseSchema::new("t", "t", vec![field], vec!["code".to_string()]);

        let ok = validate_record(&schema, &raw(&[("code", "ABC")]), None);
        assert!(ok.is_valid());

        let bad = validate_record(&schema, &raw(&[("code", "toolong")]), None);
        assert_eq!(bad.errors[0].code, FieldErrorCode::PatternMismatch);
    }

    #[test]
    fn test_explicit_field_mapping() {
        let schema = predefined_schema("frequency").unwrap();
        let record = raw(&[("snp_id", "rs77"), ("af", "0.12")]);
        let mapping: HashMap<String, String> = [
            ("snp_id".to_string(), "rsid".to_string()),
            ("af".to_string(), "frequency".to_string()),
        ]
        .into_iter()
        .collect();

        let validation = validate_record(&schema, &record, Some(&mapping));
        assert!(validation.is_valid(), "errors: {:?}", validation.errors);
        assert_eq!(
            validation.values.get("rsid"),
            Some(&Value::String("rs77".to_string()))
        );
    }

    #[test]
    fn test_duplicate_primary_keys() {
        let schema = predefined_schema("frequency").unwrap();
        let records: Vec<HashMap<String, Value>> = vec![
            raw(&[("rsid", "rs1"), ("frequency", "0.1")]),
            raw(&[("rsid", "rs2"), ("frequency", "0.2")]),
            raw(&[("rsid", "rs1"), ("frequency", "0.3")]),
        ]
        .into_iter()
        .map(|r| validate_record(&schema, &r, None).values)
        .collect();

        let duplicates = find_duplicate_keys(&schema, &records);
        assert_eq!(duplicates, vec!["rs1".to_string()]);
    }

    #[test]
    fn test_composite_key_order_follows_schema() {
        let schema = predefined_schema("pharmgkb").unwrap();
        let record = raw(&[
            ("rsid", "rs1"),
            ("gene", "CYP2C19"),
            ("drug", "clopidogrel"),
            ("evidence_level", "1A"),
        ]);
        let validation = validate_record(&schema, &record, None);
        assert_eq!(
            composite_key(&schema, &validation.values),
            "rs1|clopidogrel"
        );
    }
}
