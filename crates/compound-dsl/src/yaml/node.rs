use indexmap::IndexMap;
use serde_json::Value;

use crate::utils::reference::{is_dsl_expression, looks_like_literal};

/// How a string scalar is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    /// Unquoted, unless YAML would read it as something other than a string
    Plain,
    SingleQuoted,
    DoubleQuoted,
    /// `|` block scalar
    Literal,
}

impl ScalarStyle {
    /// Style the wire format asks for.
    ///
    /// Multi-line text is a literal block, DSL expressions are double-quoted,
    /// numbers and booleans spelled as strings are single-quoted.
    pub fn for_text(value: &str) -> Self {
        if value.contains('\n') {
            ScalarStyle::Literal
        } else if is_dsl_expression(value) {
            ScalarStyle::DoubleQuoted
        } else if looks_like_literal(value) {
            ScalarStyle::SingleQuoted
        } else {
            ScalarStyle::Plain
        }
    }
}

/// Ordered YAML document tree
#[derive(Debug, Clone, PartialEq)]
pub enum YamlNode {
    Null,
    Bool(bool),
    /// Pre-rendered number
    Number(String),
    String { value: String, style: ScalarStyle },
    Sequence(Vec<YamlNode>),
    Mapping(IndexMap<String, YamlNode>),
}

impl YamlNode {
    /// String scalar styled by [`ScalarStyle::for_text`]
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        let style = ScalarStyle::for_text(&value);
        YamlNode::String { value, style }
    }

    pub fn int(value: i64) -> Self {
        YamlNode::Number(value.to_string())
    }

    pub fn mapping() -> Self {
        YamlNode::Mapping(IndexMap::new())
    }

    /// Builder-style insert; a no-op on anything but a mapping
    pub fn with(mut self, key: impl Into<String>, value: YamlNode) -> Self {
        if let YamlNode::Mapping(entries) = &mut self {
            entries.insert(key.into(), value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&YamlNode> {
        match self {
            YamlNode::Mapping(entries) => entries.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            YamlNode::String { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[YamlNode]> {
        match self {
            YamlNode::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Keys of a mapping, in order
    pub fn keys(&self) -> Vec<&str> {
        match self {
            YamlNode::Mapping(entries) => entries.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&Value> for YamlNode {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => YamlNode::Null,
            Value::Bool(b) => YamlNode::Bool(*b),
            Value::Number(n) => YamlNode::Number(render_number(n)),
            Value::String(s) => YamlNode::text(s.as_str()),
            Value::Array(items) => YamlNode::Sequence(items.iter().map(YamlNode::from).collect()),
            Value::Object(map) => YamlNode::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), YamlNode::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Integers as-is; floats always carry a `.` or exponent so they read back as floats
fn render_number(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_nan() => ".nan".to_string(),
        Some(f) if f.is_infinite() => {
            if f > 0.0 {
                ".inf".to_string()
            } else {
                "-.inf".to_string()
            }
        }
        Some(f) => {
            let rendered = f.to_string();
            if rendered.contains(|c| c == '.' || c == 'e' || c == 'E') {
                rendered
            } else {
                format!("{}.0", rendered)
            }
        }
        None => n.to_string(),
    }
}
