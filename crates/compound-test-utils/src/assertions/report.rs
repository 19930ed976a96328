//! Assertions over validation reports.

use compound_dsl::validation::Category;
use compound_dsl::{Diagnostic, ValidationReport};

/// Error type for report assertion failures
#[derive(Debug, thiserror::Error)]
pub enum AssertionError {
    #[error("Expected no errors, found {count}:\n{report}")]
    UnexpectedErrors { count: usize, report: String },
    #[error("No diagnostic with code {code} containing '{needle}' in:\n{report}")]
    DiagnosticNotFound {
        code: String,
        needle: String,
        report: String,
    },
    #[error("Expected no {category:?} diagnostics, found: {found}")]
    UnexpectedCategory { category: Category, found: String },
}

/// Asserts that a report has no error-severity diagnostics.
pub fn assert_no_errors(report: &ValidationReport) -> Result<(), AssertionError> {
    if report.is_valid() {
        return Ok(());
    }
    Err(AssertionError::UnexpectedErrors {
        count: report.error_count(),
        report: report.to_string(),
    })
}

/// Asserts that a report holds a diagnostic with `code` whose message contains `needle`.
///
/// # Returns
///
/// The first matching diagnostic, for further checks
pub fn assert_has_diagnostic<'a>(
    report: &'a ValidationReport,
    code: &str,
    needle: &str,
) -> Result<&'a Diagnostic, AssertionError> {
    report
        .all()
        .into_iter()
        .find(|d| d.code == code && d.message.contains(needle))
        .ok_or_else(|| AssertionError::DiagnosticNotFound {
            code: code.to_string(),
            needle: needle.to_string(),
            report: report.to_string(),
        })
}

/// Asserts that no diagnostic of `category` was reported.
pub fn assert_no_category(report: &ValidationReport, category: Category) -> Result<(), AssertionError> {
    let found: Vec<String> = report
        .all()
        .into_iter()
        .filter(|d| d.category == category)
        .map(|d| d.message.clone())
        .collect();
    if found.is_empty() {
        Ok(())
    } else {
        Err(AssertionError::UnexpectedCategory {
            category,
            found: found.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compound_dsl::validation::error_codes;

    fn create_test_report() -> ValidationReport {
        let mut report = ValidationReport::new();
        report.push(Diagnostic::warning(
            error_codes::INVALID_DELAY,
            "Step 2: delay_seconds is not an integer",
        ));
        report
    }

    #[test]
    fn test_warnings_do_not_fail_assert_no_errors() {
        assert!(assert_no_errors(&create_test_report()).is_ok());
    }

    #[test]
    fn test_assert_has_diagnostic() {
        let report = create_test_report();
        assert!(assert_has_diagnostic(&report, error_codes::INVALID_DELAY, "Step 2").is_ok());
        assert!(assert_has_diagnostic(&report, error_codes::INVALID_DELAY, "Step 3").is_err());
        assert!(assert_no_category(&report, Category::Warning).is_err());
        assert!(assert_no_category(&report, Category::Naming).is_ok());
    }
}
