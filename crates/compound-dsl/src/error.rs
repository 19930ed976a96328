use std::fmt;

use thiserror::Error;

use crate::validation::{Diagnostic, ValidationReport};

/// All possible errors that can occur while processing a compound action
#[derive(Error, Debug)]
pub enum DslError {
    /// Errors that occur during YAML parsing
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Errors that occur during JSON processing
    #[error("JSON processing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML that parses but does not describe a compound action
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// The workflow cannot be written as YAML
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Validation found errors and the caller asked for a clean workflow
    #[error("{}", ErrorListFormat(.0))]
    ValidationFailed(Vec<Diagnostic>),
}

// Helper struct to format a list of diagnostics
struct ErrorListFormat<'a>(&'a [Diagnostic]);

impl fmt::Display for ErrorListFormat<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed ({} issues):", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, err)?;
        }
        Ok(())
    }
}

impl DslError {
    /// Collect the error-severity diagnostics of a report
    pub fn from_report(report: &ValidationReport) -> Self {
        let errors = report
            .all()
            .into_iter()
            .filter(|d| d.is_error())
            .cloned()
            .collect();
        DslError::ValidationFailed(errors)
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            DslError::YamlError(_) => "ERR_DSL_YAML_PARSE",
            DslError::JsonError(_) => "ERR_DSL_JSON_PARSE",
            DslError::Parse(_) => "ERR_DSL_INVALID_DOCUMENT",
            DslError::Serialization(err) => err.error_code(),
            DslError::ValidationFailed(errors) if errors.len() == 1 => errors[0].code,
            DslError::ValidationFailed(_) => "ERR_DSL_VALIDATION_MULTIPLE",
        }
    }
}

/// Raised when a workflow would produce a schema-invalid document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// A field the wire format requires is blank or absent
    #[error("{step}: required field '{field}' is missing")]
    MissingField { step: String, field: String },

    /// Script code over the byte ceiling
    #[error("{step}: script code is {size} bytes, exceeding the limit of {limit} bytes")]
    CodeTooLarge {
        step: String,
        size: usize,
        limit: usize,
    },
}

impl SerializationError {
    pub fn missing(step: impl Into<String>, field: impl Into<String>) -> Self {
        SerializationError::MissingField {
            step: step.into(),
            field: field.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            SerializationError::MissingField { .. } => "ERR_DSL_SERIALIZE_MISSING_FIELD",
            SerializationError::CodeTooLarge { .. } => "ERR_DSL_SERIALIZE_CODE_TOO_LARGE",
        }
    }
}

/// A structural problem in a compound action document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid compound action at {path}: {message}")]
pub struct ParseError {
    /// Location in the document (e.g., "steps[2].for")
    pub path: String,
    pub message: String,
}

impl ParseError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ParseError {
            path: path.into(),
            message: message.into(),
        }
    }
}
