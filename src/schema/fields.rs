// ==============================================================================
// schema/fields.rs - Field Types and Schema Definitions
// ==============================================================================
// Description: Canonical field types with validation and normalization,
//              schema structure, and the predefined reference schemas
// Author: Matt Barham
// Created: 2026-02-16
// Modified: 2026-07-02
// Version: 1.2.0
// ==============================================================================

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{is_valid_allele, is_valid_rsid, normalize_chromosome};

/// Typed field kinds with canonical validation and normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Rsid,
    Chromosome,
    Position,
    Genotype,
    Allele,
    Gene,
    Significance,
    Frequency,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Rsid => "rsid",
            FieldType::Chromosome => "chromosome",
            FieldType::Position => "position",
            FieldType::Genotype => "genotype",
            FieldType::Allele => "allele",
            FieldType::Gene => "gene",
            FieldType::Significance => "significance",
            FieldType::Frequency => "frequency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "string" => Some(FieldType::String),
            "number" => Some(FieldType::Number),
            "boolean" => Some(FieldType::Boolean),
            "rsid" => Some(FieldType::Rsid),
            "chromosome" => Some(FieldType::Chromosome),
            "position" => Some(FieldType::Position),
            "genotype" => Some(FieldType::Genotype),
            "allele" => Some(FieldType::Allele),
            "gene" => Some(FieldType::Gene),
            "significance" => Some(FieldType::Significance),
            "frequency" => Some(FieldType::Frequency),
            _ => None,
        }
    }

    /// Validate and normalize a raw string into the canonical typed value.
    ///
    /// Normalizations: rsid lowercase; chromosome stripped/uppercased with
    /// M mapped to MT; genotype/allele/gene uppercase; significance lowercase
    /// with spaces as underscores; number/position/frequency parsed numeric,
    /// frequency range-checked to [0,1].
    pub fn normalize(&self, raw: &str) -> Result<Value, FieldErrorCode> {
        let trimmed = raw.trim();
        match self {
            FieldType::String => Ok(Value::String(trimmed.to_string())),
            FieldType::Number => {
                let number: f64 = trimmed
                    .parse()
                    .map_err(|_| FieldErrorCode::InvalidType)?;
                serde_json::Number::from_f64(number)
                    .map(Value::Number)
                    .ok_or(FieldErrorCode::InvalidType)
            }
            FieldType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(FieldErrorCode::InvalidType),
            },
            FieldType::Rsid => {
                let lower = trimmed.to_lowercase();
                if is_valid_rsid(&lower) {
                    Ok(Value::String(lower))
                } else {
                    Err(FieldErrorCode::InvalidFormat)
                }
            }
            FieldType::Chromosome => normalize_chromosome(trimmed)
                .map(Value::String)
                .ok_or(FieldErrorCode::InvalidValue),
            FieldType::Position => {
                let position: u64 = trimmed
                    .parse()
                    .map_err(|_| FieldErrorCode::InvalidType)?;
                Ok(Value::Number(serde_json::Number::from(position)))
            }
            FieldType::Genotype => {
                let upper = trimmed.to_uppercase();
                let length = upper.chars().count();
                if (1..=2).contains(&length) && upper.chars().all(is_valid_allele) {
                    Ok(Value::String(upper))
                } else {
                    Err(FieldErrorCode::InvalidFormat)
                }
            }
            FieldType::Allele => {
                let upper = trimmed.to_uppercase();
                let mut chars = upper.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if is_valid_allele(c) => Ok(Value::String(upper)),
                    _ => Err(FieldErrorCode::InvalidFormat),
                }
            }
            FieldType::Gene => {
                let upper = trimmed.to_uppercase();
                let valid = upper
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_alphabetic())
                    .unwrap_or(false)
                    && upper
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-');
                if valid {
                    Ok(Value::String(upper))
                } else {
                    Err(FieldErrorCode::InvalidFormat)
                }
            }
            FieldType::Significance => {
                if trimmed.is_empty() {
                    return Err(FieldErrorCode::InvalidValue);
                }
                Ok(Value::String(trimmed.to_lowercase().replace(' ', "_")))
            }
            FieldType::Frequency => {
                let frequency: f64 = trimmed
                    .parse()
                    .map_err(|_| FieldErrorCode::InvalidType)?;
                if !(0.0..=1.0).contains(&frequency) {
                    return Err(FieldErrorCode::OutOfRange);
                }
                serde_json::Number::from_f64(frequency)
                    .map(Value::Number)
                    .ok_or(FieldErrorCode::InvalidType)
            }
        }
    }
}

/// Structured validation error codes, field-scoped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldErrorCode {
    #[serde(rename = "REQUIRED_MISSING")]
    RequiredMissing,
    #[serde(rename = "INVALID_TYPE")]
    InvalidType,
    #[serde(rename = "INVALID_FORMAT")]
    InvalidFormat,
    #[serde(rename = "INVALID_VALUE")]
    InvalidValue,
    #[serde(rename = "VALUE_OUT_OF_RANGE")]
    OutOfRange,
    #[serde(rename = "PATTERN_MISMATCH")]
    PatternMismatch,
}

impl FieldErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldErrorCode::RequiredMissing => "REQUIRED_MISSING",
            FieldErrorCode::InvalidType => "INVALID_TYPE",
            FieldErrorCode::InvalidFormat => "INVALID_FORMAT",
            FieldErrorCode::InvalidValue => "INVALID_VALUE",
            FieldErrorCode::OutOfRange => "VALUE_OUT_OF_RANGE",
            FieldErrorCode::PatternMismatch => "PATTERN_MISMATCH",
        }
    }
}

/// One declared field of a schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Additional custom regex the normalized value must match
    #[serde(default)]
    pub pattern: Option<String>,
    /// Enumerated allowed values (compared case-insensitively)
    #[serde(default)]
    pub allowed_values: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: &str, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required,
            pattern: None,
            allowed_values: None,
            description: None,
        }
    }
}

/// Schema-structure errors detected before any record is validated
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema has no fields")]
    NoFields,

    #[error("Duplicate field name '{0}'")]
    DuplicateField(String),

    #[error("Primary-key field '{0}' is not declared")]
    UnknownKeyField(String),

    #[error("Index field '{0}' is not declared")]
    UnknownIndexField(String),

    #[error("Field '{field}' has invalid pattern: {pattern}")]
    InvalidPattern { field: String, pattern: String },
}

/// A named schema: ordered fields plus primary-key and index declarations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub id: String,
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<String>,
}

impl DatabaseSchema {
    pub fn new(id: &str, name: &str, fields: Vec<FieldDefinition>, primary_key: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            fields,
            primary_key,
            indexes: Vec::new(),
        }
    }

    /// Look up a declared field by name (case-insensitive)
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Check structural integrity: every primary-key and index field must be
    /// declared, names must be unique, custom patterns must compile.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::NoFields);
        }

        let mut seen: Vec<String> = Vec::new();
        for field in &self.fields {
            let lower = field.name.to_lowercase();
            if seen.contains(&lower) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            seen.push(lower);

            if let Some(pattern) = &field.pattern {
                if Regex::new(pattern).is_err() {
                    return Err(SchemaError::InvalidPattern {
                        field: field.name.clone(),
                        pattern: pattern.clone(),
                    });
                }
            }
        }

        for key in &self.primary_key {
            if self.field(key).is_none() {
                return Err(SchemaError::UnknownKeyField(key.clone()));
            }
        }
        for index in &self.indexes {
            if self.field(index).is_none() {
                return Err(SchemaError::UnknownIndexField(index.clone()));
            }
        }

        Ok(())
    }
}

/// Look up one of the predefined reference schemas by name
pub fn predefined_schema(name: &str) -> Option<DatabaseSchema> {
    match name.to_ascii_lowercase().as_str() {
        "clinvar" => {
            let mut schema = DatabaseSchema::new(
                "clinvar",
                "ClinVar",
                vec![
                    FieldDefinition::new("rsid", FieldType::Rsid, true),
                    FieldDefinition::new("gene", FieldType::Gene, false),
                    FieldDefinition::new("condition", FieldType::String, true),
                    FieldDefinition::new("significance", FieldType::Significance, true),
                    FieldDefinition::new("review_stars", FieldType::Number, false),
                    FieldDefinition::new("chromosome", FieldType::Chromosome, false),
                    FieldDefinition::new("position", FieldType::Position, false),
                ],
                vec!["rsid".to_string()],
            );
            schema.indexes = vec!["gene".to_string()];
            Some(schema)
        }
        "pharmgkb" => {
            let mut evidence = FieldDefinition::new("evidence_level", FieldType::String, true);
            evidence.allowed_values = Some(
                ["1A", "1B", "2A", "2B", "3", "4"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            );
            let mut schema = DatabaseSchema::new(
                "pharmgkb",
                "PharmGKB",
                vec![
                    FieldDefinition::new("rsid", FieldType::Rsid, true),
                    FieldDefinition::new("gene", FieldType::Gene, true),
                    FieldDefinition::new("drug", FieldType::String, true),
                    evidence,
                    FieldDefinition::new("has_regulatory_label", FieldType::Boolean, false),
                    FieldDefinition::new("recommendation", FieldType::String, false),
                ],
                vec!["rsid".to_string(), "drug".to_string()],
            );
            schema.indexes = vec!["gene".to_string()];
            Some(schema)
        }
        "gwas" => {
            let mut schema = DatabaseSchema::new(
                "gwas",
                "GWAS Catalog",
                vec![
                    FieldDefinition::new("rsid", FieldType::Rsid, true),
                    FieldDefinition::new("trait", FieldType::String, true),
                    FieldDefinition::new("risk_allele", FieldType::Allele, false),
                    FieldDefinition::new("p_value", FieldType::Number, true),
                    FieldDefinition::new("effect_size", FieldType::Number, false),
                ],
                vec!["rsid".to_string(), "trait".to_string()],
            );
            schema.indexes = vec!["trait".to_string()];
            Some(schema)
        }
        "frequency" => Some(DatabaseSchema::new(
            "frequency",
            "Population Frequency",
            vec![
                FieldDefinition::new("rsid", FieldType::Rsid, true),
                FieldDefinition::new("allele", FieldType::Allele, false),
                FieldDefinition::new("frequency", FieldType::Frequency, true),
            ],
            vec!["rsid".to_string()],
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsid_normalizes_lowercase() {
        assert_eq!(
            FieldType::Rsid.normalize("RS4477212").unwrap(),
            Value::String("rs4477212".to_string())
        );
        assert_eq!(
            FieldType::Rsid.normalize("xyz").unwrap_err(),
            FieldErrorCode::InvalidFormat
        );
    }

    #[test]
    fn test_chromosome_normalization() {
        assert_eq!(
            FieldType::Chromosome.normalize("chr7").unwrap(),
            Value::String("7".to_string())
        );
        assert_eq!(
            FieldType::Chromosome.normalize("m").unwrap(),
            Value::String("MT".to_string())
        );
        assert_eq!(
            FieldType::Chromosome.normalize("25").unwrap_err(),
            FieldErrorCode::InvalidValue
        );
    }

    #[test]
    fn test_significance_normalization() {
        assert_eq!(
            FieldType::Significance.normalize("Likely Pathogenic").unwrap(),
            Value::String("likely_pathogenic".to_string())
        );
    }

    #[test]
    fn test_frequency_range_check() {
        assert!(FieldType::Frequency.normalize("0.25").is_ok());
        assert!(FieldType::Frequency.normalize("0").is_ok());
        assert!(FieldType::Frequency.normalize("1").is_ok());
        assert_eq!(
            FieldType::Frequency.normalize("1.5").unwrap_err(),
            FieldErrorCode::OutOfRange
        );
        assert_eq!(
            FieldType::Frequency.normalize("-0.1").unwrap_err(),
            FieldErrorCode::OutOfRange
        );
        assert_eq!(
            FieldType::Frequency.normalize("abc").unwrap_err(),
            FieldErrorCode::InvalidType
        );
    }

    #[test]
    fn test_genotype_and_allele_uppercase() {
        assert_eq!(
            FieldType::Genotype.normalize("ag").unwrap(),
            Value::String("AG".to_string())
        );
        assert_eq!(
            FieldType::Allele.normalize("t").unwrap(),
            Value::String("T".to_string())
        );
        assert!(FieldType::Genotype.normalize("AGT").is_err());
        assert!(FieldType::Allele.normalize("AG").is_err());
    }

    #[test]
    fn test_boolean_spellings() {
        assert_eq!(FieldType::Boolean.normalize("YES").unwrap(), Value::Bool(true));
        assert_eq!(FieldType::Boolean.normalize("0").unwrap(), Value::Bool(false));
        assert!(FieldType::Boolean.normalize("maybe").is_err());
    }

    #[test]
    fn test_schema_integrity() {
        let schema = DatabaseSchema::new(
            "t",
            "test",
            vec![FieldDefinition::new("rsid", FieldType::Rsid, true)],
            vec!["rsid".to_string()],
        );
        assert!(schema.validate().is_ok());

        let bad_key = DatabaseSchema::new(
            "t",
            "test",
            vec![FieldDefinition::new("rsid", FieldType::Rsid, true)],
            vec!["nope".to_string()],
        );
        assert!(matches!(
            bad_key.validate().unwrap_err(),
            SchemaError::UnknownKeyField(_)
        ));

        let empty = DatabaseSchema::new("t", "test", vec![], vec![]);
        assert!(matches!(empty.validate().unwrap_err(), SchemaError::NoFields));
    }

    #[test]
    fn test_predefined_schemas_are_valid() {
        for name in ["clinvar", "pharmgkb", "gwas", "frequency"] {
            let schema = predefined_schema(name).unwrap();
            schema.validate().unwrap();
        }
        assert!(predefined_schema("nonexistent").is_none());
    }
}
