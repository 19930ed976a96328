use serde_json::Value;
use serde_yaml::{Mapping, Value as YamlValue};
use tracing::debug;

use crate::error::{DslError, ParseError};
use crate::workflow::{
    ActionStep, ArgumentMap, CatchBlock, DefaultCase, ForLoopStep, ParallelBranch,
    ParallelForLoop, ParallelStep, RaiseStep, ReturnStep, ScriptStep, Step,
    SwitchCase, SwitchStep, TryCatchStep, Workflow, DEFAULT_ACTION_NAME, SENTINEL_OUTPUT_KEY,
};

const STEP_TAGS: &[&str] = &[
    "action",
    "script",
    "switch",
    "for",
    "parallel",
    "return",
    "raise",
    "try_catch",
];

/// A compound action document: its name and its workflow
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundAction {
    pub action_name: String,
    pub workflow: Workflow,
}

/// Parse a compound action YAML document into the workflow model.
///
/// This is the inverse of [`crate::yaml::serialize`]: a document written by
/// the serializer parses back to a workflow that serializes to the same text.
/// Only structure is checked here; use the validators for everything else.
///
/// # Arguments
///
/// * `yaml_str` - A YAML string with `action_name` and `steps` keys
///
/// # Returns
///
/// A `Result` containing either the parsed `CompoundAction` or a `DslError`
pub fn parse_compound_action(yaml_str: &str) -> Result<CompoundAction, DslError> {
    let document: YamlValue = serde_yaml::from_str(yaml_str)?;
    let root = document
        .as_mapping()
        .ok_or_else(|| ParseError::new("$", "document must be a mapping"))?;

    let action_name = optional_string(root, "action_name", "$")?
        .unwrap_or_else(|| DEFAULT_ACTION_NAME.to_string());
    let steps = root
        .get("steps")
        .ok_or_else(|| ParseError::new("$", "missing 'steps'"))?;
    let workflow = Workflow::from_steps(parse_steps(steps, "steps")?);

    debug!(action_name = %action_name, steps = workflow.len(), "parsed compound action");
    Ok(CompoundAction {
        action_name,
        workflow,
    })
}

fn parse_steps(value: &YamlValue, path: &str) -> Result<Vec<Step>, ParseError> {
    let items = value
        .as_sequence()
        .ok_or_else(|| ParseError::new(path, "expected a list of steps"))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_step(item, &format!("{}[{}]", path, i)))
        .collect()
}

fn parse_step(value: &YamlValue, path: &str) -> Result<Step, ParseError> {
    let entry = value
        .as_mapping()
        .ok_or_else(|| ParseError::new(path, "step must be a mapping"))?;

    let mut tag = None;
    for key in entry.keys() {
        let key = key
            .as_str()
            .ok_or_else(|| ParseError::new(path, "step keys must be strings"))?;
        if STEP_TAGS.contains(&key) {
            if tag.is_some() {
                return Err(ParseError::new(path, "step has more than one type"));
            }
            tag = Some(key);
        } else if key != "output_key" {
            return Err(ParseError::new(path, format!("unknown step type '{}'", key)));
        }
    }
    let tag = tag.ok_or_else(|| ParseError::new(path, "step has no type"))?;
    if tag != "switch" && entry.contains_key("output_key") {
        return Err(ParseError::new(
            path,
            format!("'output_key' belongs inside the {} step", tag),
        ));
    }

    let body_path = format!("{}.{}", path, tag);
    let empty = Mapping::new();
    let body = match entry.get(tag) {
        Some(YamlValue::Mapping(body)) => body,
        Some(YamlValue::Null) | None => &empty,
        Some(_) => return Err(ParseError::new(body_path, "expected a mapping")),
    };

    let step = match tag {
        "action" => Step::Action(ActionStep {
            action_name: required_string(body, "action_name", &body_path)?,
            output_key: required_string(body, "output_key", &body_path)?,
            description: optional_string(body, "description", &body_path)?,
            input_args: optional_map(body, "input_args", &body_path)?.unwrap_or_default(),
            delay_config: optional_map(body, "delay_config", &body_path)?,
            progress_updates: optional_map(body, "progress_updates", &body_path)?,
            user_provided_json_output: None,
        }),
        "script" => Step::Script(ScriptStep {
            code: required_string(body, "code", &body_path)?,
            output_key: required_string(body, "output_key", &body_path)?,
            description: optional_string(body, "description", &body_path)?,
            input_args: optional_map(body, "input_args", &body_path)?.unwrap_or_default(),
            user_provided_json_output: None,
        }),
        "switch" => Step::Switch(parse_switch(body, &body_path, entry, path)?),
        "for" => Step::ForLoop(ForLoopStep {
            each: required_string(body, "each", &body_path)?,
            index: optional_string(body, "index", &body_path)?,
            in_source: required_string(body, "in", &body_path)?,
            output_key: required_string(body, "output_key", &body_path)?,
            steps: nested_steps(body, "steps", &body_path)?,
            description: None,
        }),
        "parallel" => Step::Parallel(parse_parallel(body, &body_path)?),
        "return" => Step::Return(ReturnStep {
            output_mapper: optional_map(body, "output_mapper", &body_path)?.unwrap_or_default(),
            description: None,
        }),
        "raise" => Step::Raise(RaiseStep {
            output_key: optional_string(body, "output_key", &body_path)?
                .unwrap_or_else(|| SENTINEL_OUTPUT_KEY.to_string()),
            message: optional_string(body, "message", &body_path)?,
            description: None,
        }),
        "try_catch" => Step::TryCatch(parse_try_catch(body, &body_path)?),
        _ => return Err(ParseError::new(path, format!("unknown step type '{}'", tag))),
    };
    Ok(step)
}

fn parse_switch(body: &Mapping, path: &str, entry: &Mapping, step_path: &str) -> Result<SwitchStep, ParseError> {
    let mut cases = Vec::new();
    if let Some(value) = body.get("cases") {
        let items = value
            .as_sequence()
            .ok_or_else(|| ParseError::new(format!("{}.cases", path), "expected a list"))?;
        for (i, item) in items.iter().enumerate() {
            let case_path = format!("{}.cases[{}]", path, i);
            let case = item
                .as_mapping()
                .ok_or_else(|| ParseError::new(&case_path, "expected a mapping"))?;
            cases.push(SwitchCase::new(
                required_string(case, "condition", &case_path)?,
                nested_steps(case, "steps", &case_path)?,
            ));
        }
    }

    let default = match body.get("default") {
        Some(value) => {
            let default_path = format!("{}.default", path);
            let default = value
                .as_mapping()
                .ok_or_else(|| ParseError::new(&default_path, "expected a mapping"))?;
            Some(DefaultCase {
                steps: nested_steps(default, "steps", &default_path)?,
            })
        }
        None => None,
    };

    Ok(SwitchStep {
        cases,
        default,
        output_key: optional_string(entry, "output_key", step_path)?
            .unwrap_or_else(|| SENTINEL_OUTPUT_KEY.to_string()),
        description: None,
    })
}

fn parse_parallel(body: &Mapping, path: &str) -> Result<ParallelStep, ParseError> {
    match (body.get("for"), body.get("branches")) {
        (Some(_), Some(_)) => Err(ParseError::new(
            path,
            "parallel takes either 'for' or 'branches', not both",
        )),
        (Some(value), None) => {
            let for_path = format!("{}.for", path);
            let for_loop = value
                .as_mapping()
                .ok_or_else(|| ParseError::new(&for_path, "expected a mapping"))?;
            Ok(ParallelStep::for_loop(ParallelForLoop {
                each: required_string(for_loop, "each", &for_path)?,
                index: optional_string(for_loop, "index_key", &for_path)?,
                in_source: required_string(for_loop, "in", &for_path)?,
                output_key: required_string(for_loop, "output_key", &for_path)?,
                steps: match for_loop.get("steps") {
                    Some(_) => nested_steps(for_loop, "steps", &for_path)?,
                    None => Vec::new(),
                },
            }))
        }
        (None, Some(value)) => {
            let branches_path = format!("{}.branches", path);
            let items = value
                .as_sequence()
                .ok_or_else(|| ParseError::new(&branches_path, "expected a list"))?;
            let mut branches = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let branch_path = format!("{}[{}]", branches_path, i);
                let branch = item
                    .as_mapping()
                    .ok_or_else(|| ParseError::new(&branch_path, "expected a mapping"))?;
                branches.push(ParallelBranch {
                    name: optional_string(branch, "name", &branch_path)?,
                    steps: nested_steps(branch, "steps", &branch_path)?,
                });
            }
            Ok(ParallelStep::branches(branches))
        }
        (None, None) => Err(ParseError::new(path, "parallel needs 'for' or 'branches'")),
    }
}

fn parse_try_catch(body: &Mapping, path: &str) -> Result<TryCatchStep, ParseError> {
    let try_path = format!("{}.try", path);
    let try_block = body
        .get("try")
        .and_then(YamlValue::as_mapping)
        .ok_or_else(|| ParseError::new(&try_path, "missing 'try' block"))?;
    let mut step = TryCatchStep::new(nested_steps(try_block, "steps", &try_path)?);

    if let Some(value) = body.get("catch") {
        let catch_path = format!("{}.catch", path);
        let catch = value
            .as_mapping()
            .ok_or_else(|| ParseError::new(&catch_path, "expected a mapping"))?;
        let on_status_code = match catch.get("on_status_code") {
            Some(YamlValue::Sequence(codes)) => codes.iter().map(yaml_to_json).collect(),
            Some(YamlValue::Null) | None => Vec::new(),
            Some(single) => vec![yaml_to_json(single)],
        };
        step.catch_block = Some(CatchBlock {
            on_status_code,
            steps: nested_steps(catch, "steps", &catch_path)?,
        });
    }
    Ok(step)
}

fn nested_steps(map: &Mapping, key: &str, path: &str) -> Result<Vec<Step>, ParseError> {
    let nested_path = format!("{}.{}", path, key);
    match map.get(key) {
        Some(value) => parse_steps(value, &nested_path),
        None => Err(ParseError::new(path, format!("missing '{}'", key))),
    }
}

fn required_string(map: &Mapping, key: &str, path: &str) -> Result<String, ParseError> {
    optional_string(map, key, path)?
        .ok_or_else(|| ParseError::new(path, format!("missing '{}'", key)))
}

/// Scalars are read as text (`output_key: 42` gives `"42"`); null means absent
fn optional_string(map: &Mapping, key: &str, path: &str) -> Result<Option<String>, ParseError> {
    match map.get(key) {
        None | Some(YamlValue::Null) => Ok(None),
        Some(YamlValue::String(s)) => Ok(Some(s.clone())),
        Some(YamlValue::Number(n)) => Ok(Some(n.to_string())),
        Some(YamlValue::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(ParseError::new(
            format!("{}.{}", path, key),
            "expected a string",
        )),
    }
}

fn optional_map(map: &Mapping, key: &str, path: &str) -> Result<Option<ArgumentMap>, ParseError> {
    match map.get(key) {
        None | Some(YamlValue::Null) => Ok(None),
        Some(YamlValue::Mapping(entries)) => Ok(Some(
            entries
                .iter()
                .map(|(k, v)| (key_to_string(k), yaml_to_json(v)))
                .collect(),
        )),
        Some(_) => Err(ParseError::new(
            format!("{}.{}", path, key),
            "expected a mapping",
        )),
    }
}

fn key_to_string(key: &YamlValue) -> String {
    match key {
        YamlValue::String(s) => s.clone(),
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Convert a YAML value to JSON, keeping mapping order
pub fn yaml_to_json(value: &YamlValue) -> Value {
    match value {
        YamlValue::Null => Value::Null,
        YamlValue::Bool(b) => Value::Bool(*b),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        YamlValue::String(s) => Value::String(s.clone()),
        YamlValue::Sequence(items) => Value::Array(items.iter().map(yaml_to_json).collect()),
        YamlValue::Mapping(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (key_to_string(k), yaml_to_json(v)))
                .collect(),
        ),
        YamlValue::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yaml::serialize;
    use serde_json::json;

    #[test]
    fn test_parse_minimal_document() {
        let yaml = r#"
action_name: lookup_user
steps:
  - action:
      action_name: mw.get_user_by_email
      output_key: user_info
      input_args:
        email: "data.input_email"
        retries: 3
"#;
        let parsed = parse_compound_action(yaml).unwrap();
        assert_eq!(parsed.action_name, "lookup_user");
        assert_eq!(parsed.workflow.len(), 1);
        match &parsed.workflow.steps[0] {
            Step::Action(action) => {
                assert_eq!(action.action_name, "mw.get_user_by_email");
                assert_eq!(action.input_args.get("email"), Some(&json!("data.input_email")));
                assert_eq!(action.input_args.get("retries"), Some(&json!(3)));
            }
            other => panic!("Expected action step, got {:?}", other),
        }
    }

    #[test]
    fn test_quoted_literal_stays_a_string() {
        let yaml = "steps:\n  - action:\n      action_name: mw.wait\n      output_key: _\n      input_args:\n        timeout: '30'\n";
        let parsed = parse_compound_action(yaml).unwrap();
        assert_eq!(parsed.action_name, DEFAULT_ACTION_NAME);
        assert_eq!(
            parsed.workflow.steps[0].input_args().and_then(|a| a.get("timeout")),
            Some(&json!("30"))
        );
    }

    #[test]
    fn test_switch_output_key_sits_beside_tag() {
        let yaml = r#"
steps:
  - switch:
      cases:
        - condition: "data.ok"
          steps:
            - raise:
                message: stop
    output_key: decision
"#;
        let parsed = parse_compound_action(yaml).unwrap();
        assert_eq!(parsed.workflow.steps[0].output_key(), Some("decision"));
    }

    #[test]
    fn test_structural_errors_carry_paths() {
        let cases = [
            ("action_name: x\n", "$", "missing 'steps'"),
            ("steps:\n  - loop: {}\n", "steps[0]", "unknown step type 'loop'"),
            ("steps:\n  - just a string\n", "steps[0]", "step must be a mapping"),
            (
                "steps:\n  - try_catch:\n      try:\n        steps:\n          - for:\n              each: x\n              output_key: y\n              steps: []\n",
                "steps[0].try_catch.try.steps[0].for",
                "missing 'in'",
            ),
            (
                "steps:\n  - parallel:\n      branches: []\n      for: {}\n",
                "steps[0].parallel",
                "parallel takes either 'for' or 'branches', not both",
            ),
        ];
        for (yaml, path, message) in cases {
            match parse_compound_action(yaml) {
                Err(DslError::Parse(err)) => {
                    assert_eq!(err.path, path, "path for {:?}", yaml);
                    assert_eq!(err.message, message, "message for {:?}", yaml);
                }
                other => panic!("Expected ParseError for {:?}, got {:?}", yaml, other),
            }
        }
    }

    #[test]
    fn test_invalid_yaml_syntax() {
        let result = parse_compound_action("steps: [\n  - broken");
        match result {
            Err(DslError::YamlError(_)) => {}
            other => panic!("Expected YamlError, got {:?}", other),
        }
    }

    #[test]
    fn test_serializer_output_round_trips() {
        let workflow = Workflow::new()
            .with_step(
                ActionStep::new("mw.get_user_by_email", "user_info")
                    .with_input_arg("email", "data.input_email")
                    .with_input_arg("timeout", "30"),
            )
            .with_step(ScriptStep::new("x = data.user_info\nreturn x\n", "result"))
            .with_step(
                TryCatchStep::new(vec![ActionStep::new("mw.risky", "_").into()])
                    .with_catch(vec![json!(500)], vec![RaiseStep::new().with_message("failed").into()]),
            );
        let first = serialize(&workflow, Some("round_trip")).unwrap();
        let parsed = parse_compound_action(&first).unwrap();
        assert_eq!(parsed.action_name, "round_trip");
        assert_eq!(parsed.workflow, workflow);
        assert_eq!(serialize(&parsed.workflow, Some("round_trip")).unwrap(), first);
    }
}
