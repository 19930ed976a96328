//! Naming rules for output keys, action names and loop variables.

use std::collections::HashSet;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::apithon::parser::is_keyword;

/// Output keys that would shadow engine-provided names
pub const RESERVED_OUTPUT_KEYS: &[&str] = &[
    "data",
    "input",
    "output",
    "error",
    "requestor",
    "mw",
    "meta_info",
    "user",
    "workflow",
    "action",
    "script",
    "step",
    "result",
    "response",
];

const MIN_ACTION_NAME_LEN: usize = 3;

lazy_static! {
    static ref STRICT_OUTPUT_KEY_REGEX: Regex = Regex::new(r"^[a-z][a-z0-9_]*$").unwrap();
    static ref RELAXED_OUTPUT_KEY_REGEX: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap();
    static ref IDENTIFIER_REGEX: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Why an output key was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKeyProblem {
    StartsWithDigit,
    StartsWithUnderscore,
    /// Fails the strict (or relaxed) format
    InvalidFormat { strict: bool },
    Reserved,
}

impl OutputKeyProblem {
    pub fn is_reserved(&self) -> bool {
        matches!(self, OutputKeyProblem::Reserved)
    }
}

impl fmt::Display for OutputKeyProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKeyProblem::StartsWithDigit => f.write_str("must not start with a digit"),
            OutputKeyProblem::StartsWithUnderscore => {
                f.write_str("must not start with an underscore")
            }
            OutputKeyProblem::InvalidFormat { strict: true } => f.write_str(
                "must be lowercase snake_case (a letter followed by lowercase letters, digits or underscores)",
            ),
            OutputKeyProblem::InvalidFormat { strict: false } => f.write_str(
                "must start with a letter and contain only letters, digits or underscores",
            ),
            OutputKeyProblem::Reserved => f.write_str("is a reserved name"),
        }
    }
}

pub fn is_reserved_output_key(key: &str) -> bool {
    RESERVED_OUTPUT_KEYS.contains(&key)
}

/// First rule a non-sentinel output key breaks, if any
pub fn check_output_key(key: &str, strict: bool) -> Option<OutputKeyProblem> {
    let first = key.chars().next()?;
    if first.is_ascii_digit() {
        return Some(OutputKeyProblem::StartsWithDigit);
    }
    if first == '_' {
        return Some(OutputKeyProblem::StartsWithUnderscore);
    }
    let format = if strict {
        &*STRICT_OUTPUT_KEY_REGEX
    } else {
        &*RELAXED_OUTPUT_KEY_REGEX
    };
    if !format.is_match(key) {
        return Some(OutputKeyProblem::InvalidFormat { strict });
    }
    if is_reserved_output_key(key) {
        return Some(OutputKeyProblem::Reserved);
    }
    None
}

/// snake_case rendition of `key` that passes [`check_output_key`] in strict mode.
///
/// `"userInfo"` -> `"user_info"`, `"2nd-result"` -> `"output_2nd_result"`,
/// `"data"` -> `"data_output"`.
pub fn suggest_output_key(key: &str) -> String {
    let mut snake = String::with_capacity(key.len() + 4);
    let mut previous: Option<char> = None;
    for c in key.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase()
                && previous.map_or(false, |p| p.is_ascii_lowercase() || p.is_ascii_digit())
            {
                snake.push('_');
            }
            snake.push(c.to_ascii_lowercase());
        } else if !snake.ends_with('_') {
            snake.push('_');
        }
        previous = Some(c);
    }

    let trimmed = snake.trim_matches('_');
    let mut suggestion = if trimmed.is_empty() {
        "output".to_string()
    } else {
        trimmed.to_string()
    };
    if suggestion.starts_with(|c: char| c.is_ascii_digit()) {
        suggestion.insert_str(0, "output_");
    }
    if is_reserved_output_key(&suggestion) {
        suggestion.push_str("_output");
    }
    suggestion
}

/// `<key>_<n>` with the smallest `n >= 2` not already in `taken`
pub fn dedupe_output_key(key: &str, taken: &HashSet<String>) -> String {
    (2..)
        .map(|n| format!("{}_{}", key, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| format!("{}_copy", key))
}

/// Problem with an action name, described for the diagnostic message
pub fn check_action_name(name: &str) -> Option<String> {
    if name.chars().any(char::is_whitespace) {
        return Some(format!("action name '{}' must not contain whitespace", name));
    }
    if name == "mw." {
        return Some("action name 'mw.' is incomplete".to_string());
    }
    if name.chars().count() < MIN_ACTION_NAME_LEN {
        return Some(format!(
            "action name '{}' is too short (minimum {} characters)",
            name, MIN_ACTION_NAME_LEN
        ));
    }
    None
}

/// Whether `name` can be used as a loop variable
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER_REGEX.is_match(name) && !is_keyword(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_output_key() {
        assert_eq!(check_output_key("user_info", true), None);
        assert_eq!(check_output_key("step2_result", true), None);
        assert_eq!(
            check_output_key("2nd", true),
            Some(OutputKeyProblem::StartsWithDigit)
        );
        assert_eq!(
            check_output_key("_hidden", true),
            Some(OutputKeyProblem::StartsWithUnderscore)
        );
        assert_eq!(
            check_output_key("userInfo", true),
            Some(OutputKeyProblem::InvalidFormat { strict: true })
        );
        assert_eq!(check_output_key("userInfo", false), None);
        assert_eq!(
            check_output_key("user-info", false),
            Some(OutputKeyProblem::InvalidFormat { strict: false })
        );
        assert_eq!(check_output_key("data", true), Some(OutputKeyProblem::Reserved));
        assert_eq!(check_output_key("", true), None, "blank keys are a mandatory-field concern");
    }

    #[test]
    fn test_suggest_output_key() {
        assert_eq!(suggest_output_key("userInfo"), "user_info");
        assert_eq!(suggest_output_key("User Info!"), "user_info");
        assert_eq!(suggest_output_key("_private"), "private");
        assert_eq!(suggest_output_key("2nd-result"), "output_2nd_result");
        assert_eq!(suggest_output_key("result"), "result_output");
        assert_eq!(suggest_output_key("---"), "output");
        for key in ["userInfo", "2nd-result", "result", "---", "HTTPStatus"] {
            let suggestion = suggest_output_key(key);
            assert_eq!(
                check_output_key(&suggestion, true),
                None,
                "suggestion '{}' for '{}' should itself be valid",
                suggestion,
                key
            );
        }
    }

    #[test]
    fn test_dedupe_output_key() {
        let mut taken: HashSet<String> = ["user".to_string()].into_iter().collect();
        assert_eq!(dedupe_output_key("user", &taken), "user_2");
        taken.insert("user_2".to_string());
        assert_eq!(dedupe_output_key("user", &taken), "user_3");
    }

    #[test]
    fn test_check_action_name() {
        assert_eq!(check_action_name("mw.get_user_by_email"), None);
        assert_eq!(check_action_name("send_email"), None);
        assert!(check_action_name("mw get user").unwrap().contains("whitespace"));
        assert!(check_action_name("mw.").unwrap().contains("incomplete"));
        assert!(check_action_name("ab").unwrap().contains("too short"));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("item"));
        assert!(is_identifier("_i"));
        assert!(!is_identifier("2x"));
        assert!(!is_identifier("user.name"));
        assert!(!is_identifier("for"));
    }
}
