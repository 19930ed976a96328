use std::error::Error;
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::apithon::{MAX_CODE_BYTES, WARNING_MARGIN};
use crate::context::DataContext;
use crate::workflow::Workflow;

mod compliance;
pub mod data_reference;
pub mod naming;

pub use compliance::ComplianceValidator;
pub use data_reference::{validate_data_references, DataReferenceValidator};

/// How serious a diagnostic is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Must be fixed before the workflow is usable
    Error,
    /// Probably a mistake
    Warning,
    /// Improvement worth considering
    Suggestion,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Suggestion => "suggestion",
        };
        f.write_str(name)
    }
}

/// Report bucket a diagnostic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MandatoryField,
    Naming,
    Apithon,
    Generic,
    DataReference,
    Warning,
    Suggestion,
}

/// Represents a finding of a workflow validator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Error code (one of [`error_codes`])
    pub code: &'static str,

    pub category: Category,

    pub severity: Severity,

    /// Human-readable message, prefixed with the step label
    pub message: String,

    /// Optional wire path of the offending field (e.g., "steps[1].script.code")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Diagnostic {
    /// An error in the given category
    pub fn error(category: Category, code: &'static str, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            category,
            severity: Severity::Error,
            message: message.into(),
            path: None,
        }
    }

    pub fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            category: Category::Warning,
            severity: Severity::Warning,
            message: message.into(),
            path: None,
        }
    }

    pub fn suggestion(code: &'static str, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            category: Category::Suggestion,
            severity: Severity::Suggestion,
            message: message.into(),
            path: None,
        }
    }

    /// Attach the wire path of the offending field
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: {} (at {})", self.code, self.message, path)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl Error for Diagnostic {}

/// Validation error codes
pub mod error_codes {
    /// Mandatory field missing or blank
    pub const MISSING_REQUIRED_FIELD: &str = "ERR_DSL_VALIDATION_MISSING_REQUIRED_FIELD";

    /// Output key does not follow the naming rules
    pub const INVALID_OUTPUT_KEY: &str = "ERR_DSL_VALIDATION_INVALID_OUTPUT_KEY";

    /// Output key is a reserved word
    pub const RESERVED_OUTPUT_KEY: &str = "ERR_DSL_VALIDATION_RESERVED_OUTPUT_KEY";

    /// Output key declared by more than one step
    pub const DUPLICATE_OUTPUT_KEY: &str = "ERR_DSL_VALIDATION_DUPLICATE_OUTPUT_KEY";

    /// Malformed action name
    pub const INVALID_ACTION_NAME: &str = "ERR_DSL_VALIDATION_INVALID_ACTION_NAME";

    /// Loop `each` / `index` is not an identifier
    pub const INVALID_LOOP_VARIABLE: &str = "ERR_DSL_VALIDATION_INVALID_LOOP_VARIABLE";

    /// Script violates the APIthon rules
    pub const APITHON_VIOLATION: &str = "ERR_DSL_VALIDATION_APITHON";

    /// APIthon warning (byte limit, unknown function)
    pub const APITHON_WARNING: &str = "ERR_DSL_VALIDATION_APITHON_WARNING";

    /// Container step without the children it needs
    pub const INVALID_STRUCTURE: &str = "ERR_DSL_VALIDATION_INVALID_STRUCTURE";

    /// Container branch without steps
    pub const EMPTY_BRANCH: &str = "ERR_DSL_VALIDATION_EMPTY_BRANCH";

    /// Workflow without steps
    pub const EMPTY_WORKFLOW: &str = "ERR_DSL_VALIDATION_EMPTY_WORKFLOW";

    /// Reference to data not available at that point of the workflow
    pub const UNAVAILABLE_DATA_REFERENCE: &str = "ERR_DSL_VALIDATION_UNAVAILABLE_DATA_REFERENCE";

    /// `data.` reference that cannot be parsed as a path
    pub const INVALID_DATA_REFERENCE: &str = "ERR_DSL_VALIDATION_INVALID_DATA_REFERENCE";

    /// Example JSON output is not valid JSON
    pub const INVALID_JSON_OUTPUT: &str = "ERR_DSL_VALIDATION_INVALID_JSON_OUTPUT";

    /// `delay_seconds` is not an integer
    pub const INVALID_DELAY: &str = "ERR_DSL_VALIDATION_INVALID_DELAY";

    /// Catch status code outside 100-599
    pub const INVALID_STATUS_CODE: &str = "ERR_DSL_VALIDATION_INVALID_STATUS_CODE";

    /// Loop source that is not a data reference
    pub const SUSPICIOUS_LOOP_SOURCE: &str = "ERR_DSL_VALIDATION_SUSPICIOUS_LOOP_SOURCE";

    /// Replacement for an offending output key
    pub const OUTPUT_KEY_SUGGESTION: &str = "ERR_DSL_VALIDATION_OUTPUT_KEY_SUGGESTION";

    pub const MISSING_DESCRIPTION: &str = "ERR_DSL_VALIDATION_MISSING_DESCRIPTION";

    pub const MISSING_RAISE_MESSAGE: &str = "ERR_DSL_VALIDATION_MISSING_RAISE_MESSAGE";
}

/// A trait for validators that check specific aspects of a workflow
pub trait Validator {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Validate the workflow and return every diagnostic found
    fn validate(&self, workflow: &Workflow) -> Vec<Diagnostic>;
}

/// Knobs for [`validate_workflow`]
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOptions {
    /// Require lowercase snake_case output keys (`^[a-z][a-z0-9_]*$`)
    pub strict_output_keys: bool,

    pub max_code_bytes: usize,

    pub byte_limit_warning_margin: usize,

    /// Inputs known to exist when the compound action starts
    pub initial_inputs: IndexMap<String, Value>,

    pub check_data_references: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        ValidationOptions {
            strict_output_keys: true,
            max_code_bytes: MAX_CODE_BYTES,
            byte_limit_warning_margin: WARNING_MARGIN,
            initial_inputs: IndexMap::new(),
            check_data_references: true,
        }
    }
}

/// Categorised outcome of validating a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub mandatory_field_errors: Vec<Diagnostic>,
    pub naming_errors: Vec<Diagnostic>,
    pub apithon_errors: Vec<Diagnostic>,
    /// Structural and other errors without a dedicated bucket
    pub errors: Vec<Diagnostic>,
    pub data_reference_errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub suggestions: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a diagnostic under its category
    pub fn push(&mut self, diagnostic: Diagnostic) {
        let bucket = match diagnostic.category {
            Category::MandatoryField => &mut self.mandatory_field_errors,
            Category::Naming => &mut self.naming_errors,
            Category::Apithon => &mut self.apithon_errors,
            Category::Generic => &mut self.errors,
            Category::DataReference => &mut self.data_reference_errors,
            Category::Warning => &mut self.warnings,
            Category::Suggestion => &mut self.suggestions,
        };
        bucket.push(diagnostic);
    }

    pub fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, diagnostics: I) {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }

    fn buckets(&self) -> [&Vec<Diagnostic>; 7] {
        [
            &self.mandatory_field_errors,
            &self.naming_errors,
            &self.apithon_errors,
            &self.errors,
            &self.data_reference_errors,
            &self.warnings,
            &self.suggestions,
        ]
    }

    /// Every diagnostic, errors first
    pub fn all(&self) -> Vec<&Diagnostic> {
        self.buckets().into_iter().flatten().collect()
    }

    pub fn error_count(&self) -> usize {
        self.all().iter().filter(|d| d.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn suggestion_count(&self) -> usize {
        self.suggestions.len()
    }

    /// True when no diagnostic has error severity
    pub fn is_valid(&self) -> bool {
        self.error_count() == 0
    }

    /// Missing mandatory data and structural errors; the other categories are advisory
    pub fn blocking_errors(&self) -> Vec<&Diagnostic> {
        self.mandatory_field_errors
            .iter()
            .chain(&self.errors)
            .filter(|d| d.is_error())
            .collect()
    }

    /// One-line summary, e.g. "2 errors, 1 warning, 0 suggestions"
    pub fn summary(&self) -> String {
        let plural = |n: usize, word: &str| {
            if n == 1 {
                format!("{} {}", n, word)
            } else {
                format!("{} {}s", n, word)
            }
        };
        format!(
            "{}, {}, {}",
            plural(self.error_count(), "error"),
            plural(self.warning_count(), "warning"),
            plural(self.suggestion_count(), "suggestion")
        )
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())?;
        for (i, diagnostic) in self.all().iter().enumerate() {
            write!(f, "\n  {}. [{}] {}", i + 1, diagnostic.severity, diagnostic)?;
        }
        Ok(())
    }
}

/// Run every registered validator over `workflow`
pub fn validate_workflow(workflow: &Workflow, options: &ValidationOptions) -> ValidationReport {
    let mut validators: Vec<Box<dyn Validator>> =
        vec![Box::new(ComplianceValidator::from_options(options))];
    if options.check_data_references {
        let context = DataContext::new(options.initial_inputs.clone());
        validators.push(Box::new(DataReferenceValidator::new(context)));
    }

    let mut report = ValidationReport::new();
    for validator in validators {
        let diagnostics = validator.validate(workflow);
        debug!(
            validator = validator.name(),
            count = diagnostics.len(),
            "validation pass finished"
        );
        report.extend(diagnostics);
    }
    report
}
