//! Static checks for APIthon, the restricted Python dialect used by script steps.
//!
//! Two independent passes feed one deduplicated set of issues: a regex scan
//! over the raw text ([`patterns`]) and rule checks over a real parse tree
//! ([`rules`]). Syntax is checked by parsing the code as a function body, so
//! a top-level `return` is legal. Nothing here executes code.

pub mod ast;
mod semantic;
pub mod parser;
mod patterns;
pub mod rules;

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use crate::validation::Severity;

pub use parser::parse_apithon_body;

/// Maximum UTF-8 size of a script
pub const MAX_CODE_BYTES: usize = 4096;

/// A warning is raised once code is within this many bytes of the limit
pub const WARNING_MARGIN: usize = 100;

/// First syntax error found in a script; `line` is 1-based in the original source
#[derive(Error, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        SyntaxError {
            line,
            message: message.into(),
        }
    }
}

/// One finding of the APIthon validator.
///
/// Variants are keyed by kind so that a regex hit and an AST hit for the
/// same construct collapse into a single issue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ApithonIssue {
    EmptyCode,
    Syntax(SyntaxError),
    CodeTooLarge { size: usize, limit: usize },
    ImportStatement,
    ClassDefinition,
    FunctionDefinition,
    PrivateIdentifier,
    DangerousBuiltin(String),
    FileAccess,
    SystemAccess(String),
    ApproachingByteLimit { size: usize, limit: usize },
    UnknownFunction(String),
}

impl ApithonIssue {
    /// Stable identifier of the check that produced the issue
    pub fn rule_id(&self) -> &'static str {
        match self {
            ApithonIssue::EmptyCode => "empty-code",
            ApithonIssue::Syntax(_) => "syntax",
            ApithonIssue::CodeTooLarge { .. } => "byte-limit",
            ApithonIssue::ImportStatement => "no-import",
            ApithonIssue::ClassDefinition => "no-class",
            ApithonIssue::FunctionDefinition => "no-function-definition",
            ApithonIssue::PrivateIdentifier => "no-private-identifier",
            ApithonIssue::DangerousBuiltin(_) => "no-dangerous-builtin",
            ApithonIssue::FileAccess => "no-file-access",
            ApithonIssue::SystemAccess(_) => "no-system-access",
            ApithonIssue::ApproachingByteLimit { .. } => "byte-limit-warning",
            ApithonIssue::UnknownFunction(_) => "unknown-function",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ApithonIssue::ApproachingByteLimit { .. } | ApithonIssue::UnknownFunction(_) => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity() == Severity::Error
    }

    /// Canonical, user-facing message
    pub fn message(&self) -> String {
        match self {
            ApithonIssue::EmptyCode => "Code cannot be empty".to_string(),
            ApithonIssue::Syntax(err) => {
                format!("Syntax error on line {}: {}", err.line, err.message)
            }
            ApithonIssue::CodeTooLarge { size, limit } => format!(
                "Code size {} bytes exceeds the APIthon limit of {} bytes",
                size, limit
            ),
            ApithonIssue::ImportStatement => {
                "Import statements are not allowed in APIthon".to_string()
            }
            ApithonIssue::ClassDefinition => {
                "Class definitions are not allowed in APIthon".to_string()
            }
            ApithonIssue::FunctionDefinition => {
                "Function definitions are not allowed in APIthon".to_string()
            }
            ApithonIssue::PrivateIdentifier => {
                "Private identifiers (names starting with '_') are not allowed in APIthon"
                    .to_string()
            }
            ApithonIssue::DangerousBuiltin(name) => {
                format!("Use of built-in '{}' is not allowed in APIthon", name)
            }
            ApithonIssue::FileAccess => {
                "File operations (open, file) are not allowed in APIthon".to_string()
            }
            ApithonIssue::SystemAccess(module) => {
                format!("System access through '{}' is not allowed in APIthon", module)
            }
            ApithonIssue::ApproachingByteLimit { size, limit } => format!(
                "Code size {} bytes is approaching the APIthon limit of {} bytes",
                size, limit
            ),
            ApithonIssue::UnknownFunction(name) => format!(
                "Function '{}' is not an allowed built-in and is not defined in the script",
                name
            ),
        }
    }
}

impl fmt::Display for ApithonIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// APIthon validator with configurable byte limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApithonValidator {
    max_code_bytes: usize,
    warning_margin: usize,
}

impl Default for ApithonValidator {
    fn default() -> Self {
        ApithonValidator {
            max_code_bytes: MAX_CODE_BYTES,
            warning_margin: WARNING_MARGIN,
        }
    }
}

impl ApithonValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_code_bytes: usize, warning_margin: usize) -> Self {
        ApithonValidator {
            max_code_bytes,
            warning_margin,
        }
    }

    pub fn max_code_bytes(&self) -> usize {
        self.max_code_bytes
    }

    /// Every issue in `code`, errors and warnings, in a stable order
    pub fn validate(&self, code: &str) -> Vec<ApithonIssue> {
        self.validate_with_names(code, std::iter::empty::<&str>())
    }

    /// Like [`validate`](Self::validate), treating `names` as bound in the
    /// script's scope (a script step's input arguments, for example)
    pub fn validate_with_names<'a, I>(&self, code: &str, names: I) -> Vec<ApithonIssue>
    where
        I: IntoIterator<Item = &'a str>,
    {
        if code.trim().is_empty() {
            return vec![ApithonIssue::EmptyCode];
        }

        let mut issues = BTreeSet::new();
        issues.extend(self.check_size(code));
        issues.extend(patterns::scan(code));

        match parse_apithon_body(code) {
            Ok(module) => {
                let known: HashSet<&str> = names.into_iter().collect();
                issues.extend(rules::check_module(&module, &known));
            }
            Err(err) => {
                trace!(line = err.line, "APIthon syntax error: {}", err.message);
                issues.insert(ApithonIssue::Syntax(err));
            }
        }

        debug!(bytes = code.len(), issues = issues.len(), "validated APIthon code");
        issues.into_iter().collect()
    }

    /// Syntax only: empty code or the first syntax error
    pub fn validate_syntax(&self, code: &str) -> Vec<ApithonIssue> {
        if code.trim().is_empty() {
            return vec![ApithonIssue::EmptyCode];
        }
        match parse_apithon_body(code) {
            Ok(_) => Vec::new(),
            Err(err) => vec![ApithonIssue::Syntax(err)],
        }
    }

    /// Byte-limit error or warning for `code`, if any
    pub fn check_size(&self, code: &str) -> Option<ApithonIssue> {
        let size = code.len();
        let limit = self.max_code_bytes;
        if size > limit {
            Some(ApithonIssue::CodeTooLarge { size, limit })
        } else if size > limit.saturating_sub(self.warning_margin) {
            Some(ApithonIssue::ApproachingByteLimit { size, limit })
        } else {
            None
        }
    }
}

/// Validate `code` with the default limits
pub fn validate(code: &str) -> Vec<ApithonIssue> {
    ApithonValidator::default().validate(code)
}

/// Check only the syntax of `code`
pub fn validate_syntax(code: &str) -> Vec<ApithonIssue> {
    ApithonValidator::default().validate_syntax(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(issues: &[ApithonIssue]) -> Vec<String> {
        issues.iter().map(ApithonIssue::message).collect()
    }

    #[test]
    fn test_empty_code_short_circuits() {
        assert_eq!(validate(""), vec![ApithonIssue::EmptyCode]);
        assert_eq!(validate("  \n\t "), vec![ApithonIssue::EmptyCode]);
        assert_eq!(validate_syntax("   "), vec![ApithonIssue::EmptyCode]);
    }

    #[test]
    fn test_valid_code_has_no_issues() {
        let code = "total = sum(item['price'] for item in data.items)\nreturn {'total': total}";
        assert!(validate(code).is_empty(), "unexpected issues: {:?}", validate(code));
    }

    #[test]
    fn test_top_level_return_is_not_a_syntax_error() {
        assert!(validate_syntax("return {'a': 1}").is_empty());
        assert!(validate_syntax("x = 1\nreturn x").is_empty());
    }

    #[test]
    fn test_syntax_error_line_numbers() {
        let issues = validate_syntax("x = 1\ny = (2 +\n");
        assert_eq!(issues.len(), 1);
        match &issues[0] {
            ApithonIssue::Syntax(err) => assert_eq!(err.line, 2),
            other => panic!("expected syntax error, got {:?}", other),
        }

        let issues = validate_syntax("x = 1\n\nif x\n    return 2");
        match &issues[0] {
            ApithonIssue::Syntax(err) => assert_eq!(err.line, 3),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_forbidden_constructs_detected_independently() {
        let cases = [
            ("import os", "Import"),
            ("from json import loads", "Import"),
            ("class Foo:\n    pass", "Class"),
            ("def f():\n    pass", "Function"),
            ("_x = 1", "Private"),
            ("eval('1')", "eval"),
            ("open('f')", "File"),
            ("os.system('ls')", "System"),
        ];
        for (code, keyword) in cases {
            let issues = validate(code);
            let all = messages(&issues).join(" | ");
            assert!(all.contains(keyword), "{:?} should mention {:?}, got {}", code, keyword, all);
        }
    }

    #[test]
    fn test_regex_and_ast_hits_are_deduplicated() {
        let issues = validate("import json\nimport re");
        let imports = issues
            .iter()
            .filter(|i| **i == ApithonIssue::ImportStatement)
            .count();
        assert_eq!(imports, 1);

        let issues = validate("a = eval('1')\nb = exec('2')\nc = eval('3')");
        let builtins: Vec<_> = issues
            .iter()
            .filter_map(|i| match i {
                ApithonIssue::DangerousBuiltin(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(builtins, vec!["eval", "exec"]);
    }

    #[test]
    fn test_byte_limits() {
        let validator = ApithonValidator::default();
        let at_limit = format!("x = '{}'", "a".repeat(MAX_CODE_BYTES - 6));
        assert_eq!(at_limit.len(), MAX_CODE_BYTES);
        let issues = validator.validate(&at_limit);
        assert!(issues.iter().all(|i| !i.is_error()), "4096 bytes must not error: {:?}", issues);
        assert!(issues.iter().any(|i| matches!(i, ApithonIssue::ApproachingByteLimit { .. })));

        let over = format!("x = '{}'", "a".repeat(MAX_CODE_BYTES - 2));
        assert_eq!(over.len(), 4100);
        assert!(validator
            .validate(&over)
            .contains(&ApithonIssue::CodeTooLarge { size: 4100, limit: MAX_CODE_BYTES }));

        let small = "x = 1";
        assert_eq!(validator.check_size(small), None);
        assert!(validator.check_size(&"a".repeat(3997)).is_some());
        assert_eq!(validator.check_size(&"a".repeat(3996)), None);
    }

    #[test]
    fn test_byte_limit_counts_utf8_bytes() {
        let validator = ApithonValidator::with_limits(10, 2);
        assert_eq!(
            validator.check_size("ééé€"),
            Some(ApithonIssue::ApproachingByteLimit { size: 9, limit: 10 })
        );
        // four chars, twelve bytes
        assert_eq!(
            validator.check_size("€€€€"),
            Some(ApithonIssue::CodeTooLarge { size: 12, limit: 10 })
        );
    }

    #[test]
    fn test_unknown_function_is_a_warning() {
        let issues = validate("return frobnicate(1)");
        assert_eq!(issues, vec![ApithonIssue::UnknownFunction("frobnicate".into())]);
        assert_eq!(issues[0].severity(), Severity::Warning);

        let validator = ApithonValidator::default();
        assert!(validator
            .validate_with_names("return formatter(1)", ["formatter"])
            .is_empty());
        assert!(validate("helper = len\nreturn helper([1])").is_empty());
    }

    #[test]
    fn test_never_panics_on_garbage() {
        let inputs = [
            "(((", ")))", "'''", "\"", "\\", "if", "for x in", "x = [1, 2", "@", "lambda", "\t\tx",
            "return return", "def", "class", "€€€", "\u{0}", "x = 1 +", "try:", "else:",
        ];
        for input in inputs {
            let _ = validate(input);
            let _ = validate_syntax(input);
        }
    }
}
