//! Regex scan over raw APIthon text.
//!
//! Runs whether or not the code parses, so forbidden constructs are still
//! reported for broken scripts. Matches inside string literals count.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use super::ApithonIssue;

struct ForbiddenPattern {
    regex: Regex,
    issue: fn(&Captures) -> ApithonIssue,
}

fn captured_name(captures: &Captures) -> String {
    captures
        .get(1)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

lazy_static! {
    static ref FORBIDDEN_PATTERNS: Vec<ForbiddenPattern> = vec![
        ForbiddenPattern {
            regex: Regex::new(r"(?m)^\s*import\s+\w").unwrap(),
            issue: |_| ApithonIssue::ImportStatement,
        },
        ForbiddenPattern {
            regex: Regex::new(r"(?m)^\s*from\s+[\w.]+\s+import\b").unwrap(),
            issue: |_| ApithonIssue::ImportStatement,
        },
        ForbiddenPattern {
            regex: Regex::new(r"\b__import__\s*\(").unwrap(),
            issue: |_| ApithonIssue::ImportStatement,
        },
        ForbiddenPattern {
            regex: Regex::new(r"(?m)^\s*class\s+\w+").unwrap(),
            issue: |_| ApithonIssue::ClassDefinition,
        },
        ForbiddenPattern {
            regex: Regex::new(r"(?m)^\s*(?:async\s+)?def\s+\w+\s*\(").unwrap(),
            issue: |_| ApithonIssue::FunctionDefinition,
        },
        ForbiddenPattern {
            regex: Regex::new(r"\b_\w*").unwrap(),
            issue: |_| ApithonIssue::PrivateIdentifier,
        },
        ForbiddenPattern {
            regex: Regex::new(
                r"\b(eval|exec|compile|globals|locals|vars|dir|hasattr|getattr|setattr|delattr)\s*\("
            ).unwrap(),
            issue: |captures| ApithonIssue::DangerousBuiltin(captured_name(captures)),
        },
        ForbiddenPattern {
            regex: Regex::new(r"\b(?:open|file)\s*\(").unwrap(),
            issue: |_| ApithonIssue::FileAccess,
        },
        ForbiddenPattern {
            regex: Regex::new(r"(?:^|[^\w.])(os|sys|subprocess)\.").unwrap(),
            issue: |captures| ApithonIssue::SystemAccess(captured_name(captures)),
        },
    ];
}

/// Every forbidden construct the regex table finds in `code`
pub fn scan(code: &str) -> Vec<ApithonIssue> {
    FORBIDDEN_PATTERNS
        .iter()
        .flat_map(|pattern| {
            pattern
                .regex
                .captures_iter(code)
                .map(move |captures| (pattern.issue)(&captures))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_finds_each_construct() {
        assert_eq!(scan("import os"), vec![ApithonIssue::ImportStatement]);
        assert_eq!(scan("  from a.b import c"), vec![ApithonIssue::ImportStatement]);
        assert_eq!(scan("class A:\n  pass"), vec![ApithonIssue::ClassDefinition]);
        assert_eq!(scan("async def run(x):"), vec![ApithonIssue::FunctionDefinition]);
        assert_eq!(scan("open ('x')"), vec![ApithonIssue::FileAccess]);
        assert_eq!(
            scan("getattr(x, 'y')"),
            vec![ApithonIssue::DangerousBuiltin("getattr".into())]
        );
        assert_eq!(
            scan("r = subprocess.run(cmd)"),
            vec![ApithonIssue::SystemAccess("subprocess".into())]
        );
    }

    #[test]
    fn test_private_identifier_matches_whole_words_only() {
        assert!(scan("_secret = 1").contains(&ApithonIssue::PrivateIdentifier));
        assert!(scan("x = '_hidden'").contains(&ApithonIssue::PrivateIdentifier));
        assert!(scan("first_name = 1_000").is_empty());
    }

    #[test]
    fn test_near_misses_are_ignored() {
        assert!(scan("important = True").is_empty());
        assert!(scan("classify(x)").is_empty());
        assert!(scan("x = data.os.name").is_empty());
        assert!(scan("reopen(x)").is_empty());
        assert!(scan("evaluate(x)").is_empty());
        assert!(scan("result = default_value").is_empty());
    }

    #[test]
    fn test_dunder_import() {
        let issues = scan("m = __import__('os')");
        assert!(issues.contains(&ApithonIssue::ImportStatement));
        assert!(issues.contains(&ApithonIssue::PrivateIdentifier));
    }
}
