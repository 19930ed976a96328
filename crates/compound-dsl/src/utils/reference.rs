use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

/// Prefix of a reference into workflow data
pub const DATA_PREFIX: &str = "data.";

/// Prefix of a reference into runtime metadata
pub const META_INFO_PREFIX: &str = "meta_info.";

lazy_static! {
    // `$CONCAT(`, `$LOWERCASE (` ...
    static ref DSL_FUNCTION_CALL_REGEX: Regex = Regex::new(
        r"\$[A-Z][A-Z0-9_]*\s*\("
    ).unwrap();

    // A data / meta_info reference used as an operand of a comparison
    static ref COMPARISON_REGEX: Regex = Regex::new(
        r"(?:^|[^\w.])(?:data|meta_info)\.[\w.\[\]]+\s*(?:==|!=|>=|<=|>|<)|(?:==|!=|>=|<=|>|<)\s*(?:data|meta_info)\.\w"
    ).unwrap();

    // A data / meta_info reference combined with a logical or arithmetic operator
    static ref OPERATOR_REGEX: Regex = Regex::new(
        r"(?:^|[^\w.])(?:data|meta_info)\.[\w.\[\]]+\s+(?:and|or|in|not in|\+|-|\*|/|%)\s+|(?:^|\s)(?:not|and|or)\s+(?:data|meta_info)\.\w"
    ).unwrap();

    // Leading reference path of a `data.` expression
    static ref DATA_PATH_REGEX: Regex = Regex::new(
        r"^data\.([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+|\[\d+\])*)"
    ).unwrap();

    static ref NUMERIC_LITERAL_REGEX: Regex = Regex::new(
        r"^[+-]?(?:\d[\d_]*(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?$"
    ).unwrap();

    static ref BOOLEAN_LITERAL_REGEX: Regex = Regex::new(
        r"^(?i:true|false)$"
    ).unwrap();
}

/// Whether a string is a DSL expression evaluated by the workflow engine.
///
/// This is a best-effort classifier kept byte-compatible with what the
/// consuming engine expects: a literal that happens to start with `data.`
/// is still treated as an expression.
pub fn is_dsl_expression(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    trimmed.starts_with(DATA_PREFIX)
        || trimmed.starts_with(META_INFO_PREFIX)
        || DSL_FUNCTION_CALL_REGEX.is_match(trimmed)
        || COMPARISON_REGEX.is_match(trimmed)
        || OPERATOR_REGEX.is_match(trimmed)
}

/// Whether a string spells a bare number or boolean (`"30"`, `"true"`, `"False"`)
pub fn looks_like_literal(value: &str) -> bool {
    NUMERIC_LITERAL_REGEX.is_match(value) || BOOLEAN_LITERAL_REGEX.is_match(value)
}

/// Whether a string is a reference into workflow data or metadata
pub fn is_data_reference(value: &str) -> bool {
    let trimmed = value.trim_start();
    trimmed.starts_with(DATA_PREFIX) || trimmed.starts_with(META_INFO_PREFIX)
}

/// The leading reference path of a `data.` expression, without the prefix.
///
/// - `"data.user.email"` -> `Some("user.email")`
/// - `"data.items[0].id == 3"` -> `Some("items[0].id")`
/// - `"meta_info.user"` -> `None`
pub fn extract_data_path(value: &str) -> Option<&str> {
    DATA_PATH_REGEX
        .captures(value.trim_start())
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// First segment of a data path: `"user.emails[0]"` -> `"user"`
pub fn root_segment(path: &str) -> &str {
    let end = path.find(|c| c == '.' || c == '[').unwrap_or(path.len());
    &path[..end]
}

/// Every string under `value` that starts with `data.`, depth-first
pub fn collect_data_references(value: &Value) -> Vec<&str> {
    let mut references = Vec::new();
    collect_into(value, &mut references);
    references
}

fn collect_into<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) if s.trim_start().starts_with(DATA_PREFIX) => out.push(s),
        Value::Array(items) => items.iter().for_each(|item| collect_into(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_into(item, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dsl_expressions() {
        assert!(is_dsl_expression("data.input_email"));
        assert!(is_dsl_expression("meta_info.user.email_addr"));
        assert!(is_dsl_expression("$CONCAT(data.first, ' ', data.last)"));
        assert!(is_dsl_expression("$LOWERCASE (\"ABC\")"));
        assert!(is_dsl_expression("data.user.age > 18"));
        assert!(is_dsl_expression("18 <= data.user.age"));
        assert!(is_dsl_expression("data.a and data.b"));
        assert!(is_dsl_expression("not data.flag"));
        assert!(is_dsl_expression("  data.padded"));
    }

    #[test]
    fn test_plain_strings_are_not_dsl() {
        assert!(!is_dsl_expression(""));
        assert!(!is_dsl_expression("hello world"));
        assert!(!is_dsl_expression("mw.get_user_by_email"));
        assert!(!is_dsl_expression("metadata.field"));
        assert!(!is_dsl_expression("x > 3"));
        assert!(!is_dsl_expression("$5 price"));
        assert!(!is_dsl_expression("userdata.value == 1"));
    }

    #[test]
    fn test_literal_detection() {
        assert!(looks_like_literal("30"));
        assert!(looks_like_literal("-1.5"));
        assert!(looks_like_literal("1e3"));
        assert!(looks_like_literal("true"));
        assert!(looks_like_literal("False"));
        assert!(looks_like_literal("TRUE"));
        assert!(!looks_like_literal("30 seconds"));
        assert!(!looks_like_literal("yes"));
        assert!(!looks_like_literal(""));
    }

    #[test]
    fn test_extract_data_path() {
        assert_eq!(extract_data_path("data.user.email"), Some("user.email"));
        assert_eq!(extract_data_path("data.items[0].id == 3"), Some("items[0].id"));
        assert_eq!(extract_data_path("meta_info.user"), None);
        assert_eq!(extract_data_path("data."), None);
        assert_eq!(root_segment("items[0].id"), "items");
        assert_eq!(root_segment("user.email"), "user");
        assert_eq!(root_segment("plain"), "plain");
    }

    #[test]
    fn test_collect_data_references_recurses() {
        let value = json!({
            "a": "data.one",
            "b": ["literal", "data.two", {"c": "data.three"}],
            "d": 5
        });
        assert_eq!(collect_data_references(&value), vec!["data.one", "data.two", "data.three"]);
    }
}
