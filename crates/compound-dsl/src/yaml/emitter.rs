//! Block-style YAML writer for [`YamlNode`] trees.
//!
//! Mappings and sequences are written in block style with two-space
//! indentation; sequences are indented under their parent key. Empty
//! collections are written in flow style (`{}` / `[]`).

use std::fmt::Write;

use lazy_static::lazy_static;
use regex::Regex;

use super::node::{ScalarStyle, YamlNode};

const INDENT: usize = 2;

lazy_static! {
    // Plain scalars a YAML 1.1 or 1.2 loader would not read back as a string
    static ref NON_STRING_PLAIN_REGEX: Regex = Regex::new(
        r"(?x)^(?:
            ~ | null | Null | NULL
          | y | Y | yes | Yes | YES | n | N | no | No | NO
          | true | True | TRUE | false | False | FALSE
          | on | On | ON | off | Off | OFF
          | [-+]?(?:0b[01_]+ | 0o?[0-7_]+ | 0x[0-9a-fA-F_]+ | [0-9][0-9_]* )
          | [-+]?[1-9][0-9_]*(?::[0-5]?[0-9])+(?:\.[0-9_]*)?
          | [-+]?(?:[0-9][0-9_]*)?\.[0-9_]*(?:[eE][-+]?[0-9]+)?
          | [-+]?[0-9][0-9_]*(?:\.[0-9_]*)?[eE][-+]?[0-9]+
          | [-+]?\.(?:inf|Inf|INF)
          | \.(?:nan|NaN|NAN)
          | = | <<
        )$"
    ).unwrap();

    static ref TIMESTAMP_PREFIX_REGEX: Regex = Regex::new(r"^[0-9]{4}-[0-9]{1,2}-[0-9]{1,2}").unwrap();
}

/// Render a document tree as YAML text ending in a newline
pub fn emit(node: &YamlNode) -> String {
    let mut out = String::new();
    match node {
        YamlNode::Mapping(entries) if !entries.is_empty() => {
            emit_mapping(entries.iter(), 0, false, &mut out)
        }
        YamlNode::Sequence(items) if !items.is_empty() => emit_sequence(items, 0, false, &mut out),
        scalar => {
            emit_inline(scalar, 0, &mut out);
            out.push('\n');
        }
    }
    out
}

/// `inline_first`: the first key continues a `- ` already written
fn emit_mapping<'a, I>(entries: I, indent: usize, inline_first: bool, out: &mut String)
where
    I: Iterator<Item = (&'a String, &'a YamlNode)>,
{
    for (i, (key, value)) in entries.enumerate() {
        if !(inline_first && i == 0) {
            push_indent(indent, out);
        }
        out.push_str(&render_key(key));
        out.push(':');
        emit_value(value, indent, out);
    }
}

fn emit_sequence(items: &[YamlNode], indent: usize, inline_first: bool, out: &mut String) {
    for (i, item) in items.iter().enumerate() {
        if !(inline_first && i == 0) {
            push_indent(indent, out);
        }
        out.push_str("- ");
        match item {
            YamlNode::Mapping(entries) if !entries.is_empty() => {
                emit_mapping(entries.iter(), indent + INDENT, true, out)
            }
            YamlNode::Sequence(nested) if !nested.is_empty() => {
                emit_sequence(nested, indent + INDENT, true, out)
            }
            scalar => {
                emit_inline(scalar, indent, out);
                out.push('\n');
            }
        }
    }
}

/// Everything after `key:` for a value whose key sits at `indent`
fn emit_value(value: &YamlNode, indent: usize, out: &mut String) {
    match value {
        YamlNode::Mapping(entries) if !entries.is_empty() => {
            out.push('\n');
            emit_mapping(entries.iter(), indent + INDENT, false, out);
        }
        YamlNode::Sequence(items) if !items.is_empty() => {
            out.push('\n');
            emit_sequence(items, indent + INDENT, false, out);
        }
        scalar => {
            out.push(' ');
            emit_inline(scalar, indent, out);
            out.push('\n');
        }
    }
}

/// Scalars and empty collections; the caller writes the final newline
fn emit_inline(node: &YamlNode, indent: usize, out: &mut String) {
    match node {
        YamlNode::Null => out.push_str("null"),
        YamlNode::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        YamlNode::Number(n) => out.push_str(n),
        YamlNode::Mapping(_) => out.push_str("{}"),
        YamlNode::Sequence(_) => out.push_str("[]"),
        YamlNode::String { value, style } => match style {
            ScalarStyle::Literal if literal_is_representable(value) => {
                emit_literal(value, indent + INDENT, out)
            }
            ScalarStyle::DoubleQuoted => out.push_str(&double_quoted(value)),
            ScalarStyle::SingleQuoted if !needs_escapes(value) => {
                out.push_str(&single_quoted(value))
            }
            ScalarStyle::Plain if plain_is_safe(value) => out.push_str(value),
            _ => out.push_str(&quoted(value)),
        },
    }
}

fn emit_literal(value: &str, content_indent: usize, out: &mut String) {
    let (body, chomp) = match value.strip_suffix('\n') {
        Some(rest) if rest.ends_with('\n') => (rest, "+"),
        Some(rest) => (rest, ""),
        None => (value, "-"),
    };

    out.push('|');
    // An indentation indicator is needed when the first line starts with a space
    let first_content_line = body.lines().find(|line| !line.is_empty());
    if first_content_line.map_or(false, |line| line.starts_with(' ')) {
        let _ = write!(out, "{}", INDENT);
    }
    out.push_str(chomp);

    for line in body.split('\n') {
        out.push('\n');
        if !line.is_empty() {
            push_indent(content_indent, out);
            out.push_str(line);
        }
    }
}

fn push_indent(indent: usize, out: &mut String) {
    out.extend(std::iter::repeat(' ').take(indent));
}

fn render_key(key: &str) -> String {
    if plain_is_safe(key) {
        key.to_string()
    } else {
        quoted(key)
    }
}

/// Single quotes where possible, double quotes when escapes are needed
fn quoted(value: &str) -> String {
    if needs_escapes(value) {
        double_quoted(value)
    } else {
        single_quoted(value)
    }
}

fn is_special_char(c: char) -> bool {
    (c.is_control() && c != '\t') || matches!(c, '\u{feff}' | '\u{2028}' | '\u{2029}')
}

fn needs_escapes(value: &str) -> bool {
    value.chars().any(is_special_char)
}

/// A block scalar needs at least one content character to carry its chomping
fn literal_is_representable(value: &str) -> bool {
    value.chars().any(|c| c != '\n')
        && !value.chars().any(|c| c != '\n' && is_special_char(c))
        && !value
            .split('\n')
            .any(|line| !line.is_empty() && line.trim().is_empty())
}

/// Whether `value` reads back as the same string when written unquoted
pub(crate) fn plain_is_safe(value: &str) -> bool {
    let first = match value.chars().next() {
        Some(c) => c,
        None => return false,
    };
    if value != value.trim() || value.contains('\t') || needs_escapes(value) {
        return false;
    }
    match first {
        '-' | '?' | ':' => {
            let second = value.chars().nth(1);
            if second.map_or(true, |c| c == ' ') {
                return false;
            }
        }
        ',' | '[' | ']' | '{' | '}' | '#' | '&' | '*' | '!' | '|' | '>' | '\'' | '"' | '%'
        | '@' | '`' => return false,
        _ => {}
    }
    if value.contains(": ") || value.contains(" #") || value.ends_with(':') {
        return false;
    }
    if value.starts_with("---") || value.starts_with("...") {
        return false;
    }
    !(NON_STRING_PLAIN_REGEX.is_match(value) || TIMESTAMP_PREFIX_REGEX.is_match(value))
}

fn single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c if is_special_char(c) => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(value: &str) -> YamlNode {
        YamlNode::text(value)
    }

    #[test]
    fn test_nested_mapping_and_sequence_layout() {
        let doc = YamlNode::mapping()
            .with("action_name", text("compound_action"))
            .with(
                "steps",
                YamlNode::Sequence(vec![YamlNode::mapping().with(
                    "action",
                    YamlNode::mapping()
                        .with("action_name", text("mw.get_user_by_email"))
                        .with("output_key", text("user_info"))
                        .with(
                            "input_args",
                            YamlNode::mapping()
                                .with("email", text("data.input_email"))
                                .with("timeout", text("30")),
                        ),
                )]),
            );

        let expected = "\
action_name: compound_action
steps:
  - action:
      action_name: mw.get_user_by_email
      output_key: user_info
      input_args:
        email: \"data.input_email\"
        timeout: '30'
";
        assert_eq!(emit(&doc), expected);
    }

    #[test]
    fn test_literal_block_chomping() {
        let doc = YamlNode::mapping()
            .with("clip", text("a\nb\n"))
            .with("strip", text("a\nb"))
            .with("keep", text("a\n\n"));
        let expected = "clip: |\n  a\n  b\nstrip: |-\n  a\n  b\nkeep: |+\n  a\n\n";
        assert_eq!(emit(&doc), expected);

        for (key, value) in [("clip", "a\nb\n"), ("strip", "a\nb"), ("keep", "a\n\n")] {
            let parsed: serde_yaml::Value = serde_yaml::from_str(&emit(&doc)).unwrap();
            assert_eq!(parsed[key].as_str(), Some(value), "round trip of '{}'", key);
        }
    }

    #[test]
    fn test_newline_only_text_is_double_quoted() {
        let doc = YamlNode::mapping()
            .with("one", text("\n"))
            .with("two", text("\n\n"));
        let rendered = emit(&doc);
        assert_eq!(rendered, "one: \"\\n\"\ntwo: \"\\n\\n\"\n");

        let parsed: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(parsed["one"].as_str(), Some("\n"), "single newline must survive");
        assert_eq!(parsed["two"].as_str(), Some("\n\n"));
    }

    #[test]
    fn test_literal_block_with_indented_first_line() {
        let doc = YamlNode::mapping().with("code", text("  x = 1\ny = 2"));
        let rendered = emit(&doc);
        assert_eq!(rendered, "code: |2-\n    x = 1\n  y = 2\n");
        let parsed: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(parsed["code"].as_str(), Some("  x = 1\ny = 2"));
    }

    #[test]
    fn test_literal_block_in_sequence_item() {
        let doc = YamlNode::mapping().with(
            "steps",
            YamlNode::Sequence(vec![YamlNode::mapping().with(
                "script",
                YamlNode::mapping()
                    .with("code", text("x = 1\nreturn x"))
                    .with("output_key", text("result")),
            )]),
        );
        let expected = "\
steps:
  - script:
      code: |-
        x = 1
        return x
      output_key: result
";
        assert_eq!(emit(&doc), expected);
    }

    #[test]
    fn test_empty_collections_use_flow_style() {
        let doc = YamlNode::mapping()
            .with(
                "steps",
                YamlNode::Sequence(vec![
                    YamlNode::mapping().with("return", YamlNode::mapping()),
                    YamlNode::mapping().with("raise", YamlNode::mapping()),
                ]),
            )
            .with("list", YamlNode::Sequence(vec![]));
        assert_eq!(
            emit(&doc),
            "steps:\n  - return: {}\n  - raise: {}\nlist: []\n"
        );
    }

    #[test]
    fn test_plain_scalars_that_need_quotes() {
        assert!(plain_is_safe("hello world"));
        assert!(plain_is_safe("mw.get_user_by_email"));
        assert!(plain_is_safe("-dash"));
        assert!(!plain_is_safe(""));
        assert!(!plain_is_safe("yes"));
        assert!(!plain_is_safe("null"));
        assert!(!plain_is_safe("0x1F"));
        assert!(!plain_is_safe("2024-01-05"));
        assert!(!plain_is_safe("key: value"));
        assert!(!plain_is_safe("- item"));
        assert!(!plain_is_safe("#comment"));
        assert!(!plain_is_safe(" padded"));
        assert!(!plain_is_safe("ends with colon:"));

        let doc = YamlNode::mapping()
            .with("a", text("yes"))
            .with("b", text("it's: here"))
            .with("c", text("tab\there"))
            .with("d", text(""));
        assert_eq!(
            emit(&doc),
            "a: 'yes'\nb: 'it''s: here'\nc: 'tab\there'\nd: ''\n"
        );
    }

    #[test]
    fn test_double_quoted_escapes() {
        assert_eq!(double_quoted("data.x == \"a\\b\""), "\"data.x == \\\"a\\\\b\\\"\"");
        assert_eq!(double_quoted("bell\u{7}"), "\"bell\\u0007\"");
    }

    #[test]
    fn test_emitted_scalars_read_back_unchanged() {
        let values = [
            "plain",
            "yes",
            "30",
            "True",
            "data.user.email",
            "$CONCAT(data.a, \"-\", data.b)",
            "it's",
            "a: b",
            "[not a list]",
            "carriage\rreturn",
            "multi\nline\n",
            "~",
            "",
        ];
        let mut doc = YamlNode::mapping();
        for (i, value) in values.iter().enumerate() {
            doc = doc.with(format!("k{}", i), text(value));
        }
        let parsed: serde_yaml::Value = serde_yaml::from_str(&emit(&doc)).unwrap();
        for (i, value) in values.iter().enumerate() {
            assert_eq!(
                parsed[format!("k{}", i).as_str()].as_str(),
                Some(*value),
                "value {:?} did not survive",
                value
            );
        }
    }
}
