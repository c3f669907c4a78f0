// ==============================================================================
// schema/mod.rs - Schema & Validation Engine
// ==============================================================================
// Description: Typed field schemas, record validation, and auto-detection
// Author: Matt Barham
// Created: 2026-02-16
// Modified: 2026-06-30
// Version: 1.1.0
// ==============================================================================

pub mod detect;
pub mod fields;
pub mod validate;

pub use detect::detect_schema;
pub use fields::{
    predefined_schema, DatabaseSchema, FieldDefinition, FieldErrorCode, FieldType, SchemaError,
};
pub use validate::{find_duplicate_keys, validate_record, FieldError, RecordValidation};
