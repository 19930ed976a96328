//! # Compound DSL
//!
//! Tooling for Compound Action workflows: an ordered list of steps that is
//! validated, then written out as YAML for the workflow engine to run.
//! This crate models the workflow, checks it, and serializes it.
//!
//! ## Features
//!
//! * Typed workflow model with nested control flow (switch, loops, parallel, try/catch)
//! * Static APIthon checks for script steps (syntax, banned constructs, size)
//! * Compliance checks for mandatory fields, output key naming and structure
//! * Data reference checks against the outputs available at each step
//! * Byte-stable YAML serialization with type-preserving quoting
//!
//! ## Example
//!
//! ```
//! use compound_dsl::workflow::{ActionStep, ScriptStep, Workflow};
//! use compound_dsl::{serialize, validate_workflow, ValidationOptions};
//!
//! let workflow = Workflow::new()
//!     .with_step(
//!         ActionStep::new("mw.get_user_by_email", "user_info")
//!             .with_input_arg("email", "data.input_email"),
//!     )
//!     .with_step(ScriptStep::new("return data.user_info", "summary"));
//!
//! let report = validate_workflow(&workflow, &ValidationOptions::default());
//! assert!(report.is_valid(), "{}", report);
//!
//! let yaml = serialize(&workflow, Some("lookup_user")).unwrap();
//! assert!(yaml.starts_with("action_name: lookup_user\nsteps:\n"));
//! ```

mod error;

pub mod apithon;
pub mod context;
pub mod parser;
pub mod utils;
pub mod validation;
pub mod workflow;
pub mod yaml;

pub use apithon::{ApithonIssue, ApithonValidator};
pub use context::DataContext;
pub use error::{DslError, ParseError, SerializationError};
pub use parser::{parse_compound_action, CompoundAction};
pub use validation::{
    validate_data_references, validate_workflow, Diagnostic, Severity, ValidationOptions,
    ValidationReport, Validator,
};
pub use workflow::{Step, Workflow};
pub use yaml::{serialize, SerializerOptions, YamlSerializer};

/// Validate a workflow and serialize it only if it has no errors.
///
/// Warnings and suggestions do not block. The action name comes from
/// `serializer_options`.
///
/// # Errors
///
/// * `DslError::ValidationFailed` with every error-severity diagnostic
/// * `DslError::Serialization` if the workflow cannot be written
///
/// # Examples
///
/// ```
/// use compound_dsl::workflow::{ActionStep, Workflow};
/// use compound_dsl::{validate_and_serialize, DslError, SerializerOptions, ValidationOptions};
///
/// let workflow = Workflow::new().with_step(ActionStep::new("mw.send", "2nd_result"));
/// let result = validate_and_serialize(
///     &workflow,
///     &ValidationOptions::default(),
///     &SerializerOptions::default(),
/// );
///
/// match result {
///     Err(DslError::ValidationFailed(errors)) => assert_eq!(errors.len(), 1),
///     other => panic!("expected a validation failure, got {:?}", other),
/// }
/// ```
pub fn validate_and_serialize(
    workflow: &Workflow,
    validation_options: &ValidationOptions,
    serializer_options: &SerializerOptions,
) -> Result<String, DslError> {
    let report = validate_workflow(workflow, validation_options);
    if !report.is_valid() {
        return Err(DslError::from_report(&report));
    }
    Ok(YamlSerializer::new(serializer_options.clone()).serialize(workflow)?)
}

/// Parse a compound action document and validate its workflow
pub fn parse_and_validate(
    yaml_str: &str,
    options: &ValidationOptions,
) -> Result<(CompoundAction, ValidationReport), DslError> {
    let action = parse_compound_action(yaml_str)?;
    let report = validate_workflow(&action.workflow, options);
    Ok((action, report))
}

/// Returns a version string for the Compound DSL crate
///
/// # Examples
///
/// ```
/// use compound_dsl::version;
///
/// let ver = version();
/// assert!(ver.starts_with("0."));
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ActionStep, ScriptStep};

    fn create_test_workflow() -> Workflow {
        Workflow::new()
            .with_step(
                ActionStep::new("mw.get_user_by_email", "user_info")
                    .with_input_arg("email", "data.input_email"),
            )
            .with_step(ScriptStep::new("return {'x': data.user_info.id}", "user_id"))
    }

    #[test]
    fn test_validate_and_serialize_valid_workflow() {
        let result = validate_and_serialize(
            &create_test_workflow(),
            &ValidationOptions::default(),
            &SerializerOptions::default().with_action_name("lookup"),
        );
        let yaml = result.expect("valid workflow should serialize");
        assert!(yaml.starts_with("action_name: lookup\n"), "got:\n{}", yaml);
    }

    #[test]
    fn test_validation_errors_block_serialization() {
        let workflow = create_test_workflow().with_step(ScriptStep::new("import os", "imported"));
        let result = validate_and_serialize(
            &workflow,
            &ValidationOptions::default(),
            &SerializerOptions::default(),
        );
        let err = result.unwrap_err();
        assert!(matches!(err, DslError::ValidationFailed(_)));
        assert!(err.to_string().contains("Step 3"), "got: {}", err);
    }

    #[test]
    fn test_parse_and_validate() {
        let yaml = serialize(&create_test_workflow(), Some("lookup")).unwrap();
        let (action, report) = parse_and_validate(&yaml, &ValidationOptions::default()).unwrap();
        assert_eq!(action.action_name, "lookup");
        assert!(report.is_valid(), "Unexpected issues: {}", report);
    }

    #[test]
    fn test_version_function() {
        let ver = version();
        assert!(!ver.is_empty(), "Version string should not be empty");
        assert!(ver.contains('.'), "Version string should contain at least one dot");
    }
}
