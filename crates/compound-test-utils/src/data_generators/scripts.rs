//! Generators for APIthon scripts.

/// Snippets that each break exactly one APIthon rule, paired with a word
/// the resulting diagnostic mentions.
pub const FORBIDDEN_SNIPPETS: &[(&str, &str)] = &[
    ("import os", "Import"),
    ("class Foo:\n pass", "Class"),
    ("def f():\n pass", "Function"),
    ("_x = 1", "Private"),
    ("eval('1')", "eval"),
    ("open('f')", "File"),
];

/// Creates a valid single-line script of exactly `bytes` UTF-8 bytes.
///
/// The script is a string assignment padded with `a`; `bytes` must be at
/// least 6.
pub fn create_script_of_size(bytes: usize) -> String {
    let overhead = "x = ''".len();
    format!("x = '{}'", "a".repeat(bytes.saturating_sub(overhead)))
}

/// Creates a multi-line script that sums a list from the data context.
pub fn create_multiline_script(source: &str) -> String {
    format!(
        "total = 0\nfor item in data.{}:\n    total = total + item\nreturn total\n",
        source
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_script_of_size() {
        assert_eq!(create_script_of_size(4096).len(), 4096);
        assert_eq!(create_script_of_size(4100).len(), 4100);
    }
}
