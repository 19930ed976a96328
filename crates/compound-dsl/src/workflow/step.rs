use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ArgumentMap, SENTINEL_OUTPUT_KEY};

/// Raw JSON sample of what a step returns, supplied by the author.
///
/// The text is kept verbatim; parsing happens on first access and the
/// result is cached for the lifetime of the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonOutput {
    raw: String,

    #[serde(skip)]
    parsed: OnceCell<Option<Value>>,
}

impl JsonOutput {
    /// Wrap raw JSON text
    pub fn new(raw: impl Into<String>) -> Self {
        JsonOutput {
            raw: raw.into(),
            parsed: OnceCell::new(),
        }
    }

    /// The text exactly as the author provided it
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether the author left the sample blank
    pub fn is_blank(&self) -> bool {
        self.raw.trim().is_empty()
    }

    /// Parsed JSON value, or `None` when the text is blank or not valid JSON
    pub fn parsed(&self) -> Option<&Value> {
        self.parsed
            .get_or_init(|| {
                if self.is_blank() {
                    None
                } else {
                    serde_json::from_str(&self.raw).ok()
                }
            })
            .as_ref()
    }

    /// The parse failure for non-blank text that is not valid JSON
    pub fn parse_error(&self) -> Option<serde_json::Error> {
        if self.is_blank() {
            return None;
        }
        serde_json::from_str::<Value>(&self.raw).err()
    }
}

impl PartialEq for JsonOutput {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl From<&str> for JsonOutput {
    fn from(s: &str) -> Self {
        JsonOutput::new(s)
    }
}

impl From<String> for JsonOutput {
    fn from(s: String) -> Self {
        JsonOutput::new(s)
    }
}

/// Calls a named action (`mw.*` built-ins or connector actions)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    /// Fully qualified action name, e.g. `mw.get_user_by_email`
    #[serde(default)]
    pub action_name: String,

    /// Key under which the action result is exposed as `data.<output_key>`
    #[serde(default)]
    pub output_key: String,

    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Arguments passed to the action (DSL expressions or literals)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub input_args: ArgumentMap,

    /// Delay settings; `delay_seconds` is emitted as an integer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_config: Option<ArgumentMap>,

    /// Progress messages shown to the requestor while the action runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_updates: Option<ArgumentMap>,

    /// Example of the action's output, used for data-reference checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_provided_json_output: Option<JsonOutput>,
}

impl ActionStep {
    /// Create an action step with its two mandatory fields
    pub fn new(action_name: impl Into<String>, output_key: impl Into<String>) -> Self {
        ActionStep {
            action_name: action_name.into(),
            output_key: output_key.into(),
            ..Default::default()
        }
    }

    /// Add (or replace) an input argument
    pub fn with_input_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_args.insert(name.into(), value.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the delay configuration
    pub fn with_delay_config(mut self, delay_config: ArgumentMap) -> Self {
        self.delay_config = Some(delay_config);
        self
    }

    /// Set the progress updates
    pub fn with_progress_updates(mut self, progress_updates: ArgumentMap) -> Self {
        self.progress_updates = Some(progress_updates);
        self
    }

    /// Attach an example JSON output
    pub fn with_json_output(mut self, raw: impl Into<String>) -> Self {
        self.user_provided_json_output = Some(JsonOutput::new(raw));
        self
    }
}

/// Runs an APIthon script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    /// APIthon source; a bare top-level `return` is allowed
    #[serde(default)]
    pub code: String,

    #[serde(default)]
    pub output_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Variables injected into the script scope
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub input_args: ArgumentMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_provided_json_output: Option<JsonOutput>,
}

impl ScriptStep {
    /// Create a script step with its two mandatory fields
    pub fn new(code: impl Into<String>, output_key: impl Into<String>) -> Self {
        ScriptStep {
            code: code.into(),
            output_key: output_key.into(),
            ..Default::default()
        }
    }

    pub fn with_input_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_args.insert(name.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_json_output(mut self, raw: impl Into<String>) -> Self {
        self.user_provided_json_output = Some(JsonOutput::new(raw));
        self
    }
}

/// Ends the compound action and shapes its result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnStep {
    /// Result key → DSL expression or literal
    #[serde(default)]
    pub output_mapper: ArgumentMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ReturnStep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping from a result key to an expression
    pub fn with_mapping(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.output_mapper.insert(key.into(), value.into());
        self
    }
}

/// Aborts the compound action with an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaiseStep {
    #[serde(default = "super::sentinel_output_key")]
    pub output_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RaiseStep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_output_key(mut self, output_key: impl Into<String>) -> Self {
        self.output_key = output_key.into();
        self
    }
}

impl Default for RaiseStep {
    fn default() -> Self {
        RaiseStep {
            output_key: SENTINEL_OUTPUT_KEY.to_string(),
            message: None,
            description: None,
        }
    }
}
