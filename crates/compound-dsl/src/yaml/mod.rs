//! Writes a [`Workflow`] in the compound action YAML wire format.
//!
//! The document has exactly two top-level keys, `action_name` then `steps`.
//! Each step is a single-key mapping from its type tag to its fields, in a
//! fixed order. Missing mandatory data stops serialization with a
//! [`SerializationError`]; APIthon problems in script code do not.

mod emitter;
mod node;

pub use node::{ScalarStyle, YamlNode};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::apithon::MAX_CODE_BYTES;
use crate::error::SerializationError;
use crate::utils::coerce_int;
use crate::workflow::{
    ActionStep, ArgumentMap, ForLoopStep, ParallelForLoop, ParallelMode, ParallelStep, RaiseStep,
    ReturnStep, ScriptStep, Step, StepLocation, SwitchStep, TryCatchStep, Workflow,
    DEFAULT_ACTION_NAME, SENTINEL_OUTPUT_KEY,
};

/// Options for [`YamlSerializer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerOptions {
    /// Value of the top-level `action_name` key
    pub action_name: String,

    /// Write blank mandatory strings as `''` instead of failing
    pub allow_blank_fields: bool,

    /// Hard ceiling on script code size, in UTF-8 bytes
    pub max_code_bytes: usize,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        SerializerOptions {
            action_name: DEFAULT_ACTION_NAME.to_string(),
            allow_blank_fields: false,
            max_code_bytes: MAX_CODE_BYTES,
        }
    }
}

impl SerializerOptions {
    pub fn with_action_name(mut self, action_name: impl Into<String>) -> Self {
        self.action_name = action_name.into();
        self
    }

    pub fn allow_blank_fields(mut self, allow: bool) -> Self {
        self.allow_blank_fields = allow;
        self
    }
}

/// Serializer from the workflow model to YAML text
#[derive(Debug, Clone, Default)]
pub struct YamlSerializer {
    options: SerializerOptions,
}

impl YamlSerializer {
    pub fn new(options: SerializerOptions) -> Self {
        YamlSerializer { options }
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    /// Serialize `workflow` to YAML text
    pub fn serialize(&self, workflow: &Workflow) -> Result<String, SerializationError> {
        let document = self.to_node(workflow).map_err(|err| {
            warn!(error = %err, "workflow cannot be serialized");
            err
        })?;
        let yaml = emitter::emit(&document);
        debug!(steps = workflow.len(), bytes = yaml.len(), "serialized workflow");
        Ok(yaml)
    }

    /// The ordered document tree that [`serialize`](Self::serialize) writes
    pub fn to_node(&self, workflow: &Workflow) -> Result<YamlNode, SerializationError> {
        let action_name = if self.options.action_name.trim().is_empty() {
            DEFAULT_ACTION_NAME
        } else {
            self.options.action_name.as_str()
        };
        let steps = self.steps_node(&workflow.steps, None)?;
        Ok(YamlNode::mapping()
            .with("action_name", YamlNode::text(action_name))
            .with("steps", steps))
    }

    fn steps_node(
        &self,
        steps: &[Step],
        parent: Option<(&StepLocation, &str)>,
    ) -> Result<YamlNode, SerializationError> {
        let mut nodes = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let location = match parent {
                Some((parent, container)) => parent.child(container, index),
                None => StepLocation::root(index),
            };
            trace!(step = %location.label, kind = step.type_tag(), "serializing step");
            nodes.push(self.step_node(step, &location)?);
        }
        Ok(YamlNode::Sequence(nodes))
    }

    fn step_node(&self, step: &Step, location: &StepLocation) -> Result<YamlNode, SerializationError> {
        let body = match step {
            Step::Action(action) => self.action_node(action, location)?,
            Step::Script(script) => self.script_node(script, location)?,
            Step::Switch(switch) => return self.switch_node(switch, location),
            Step::ForLoop(for_loop) => self.for_node(for_loop, location)?,
            Step::Parallel(parallel) => self.parallel_node(parallel, location)?,
            Step::Return(ret) => return_node(ret),
            Step::Raise(raise) => raise_node(raise),
            Step::TryCatch(try_catch) => self.try_catch_node(try_catch, location)?,
        };
        Ok(YamlNode::mapping().with(step.type_tag(), body))
    }

    /// A mandatory string field, or the error naming it
    fn required(&self, value: &str, location: &StepLocation, field: &str) -> Result<YamlNode, SerializationError> {
        if value.trim().is_empty() && !self.options.allow_blank_fields {
            return Err(SerializationError::missing(location.label.as_str(), field));
        }
        Ok(YamlNode::text(value))
    }

    fn action_node(&self, action: &ActionStep, location: &StepLocation) -> Result<YamlNode, SerializationError> {
        let mut node = YamlNode::mapping()
            .with("action_name", self.required(&action.action_name, location, "action_name")?)
            .with("output_key", self.required(&action.output_key, location, "output_key")?);

        if !action.input_args.is_empty() {
            node = node.with("input_args", map_node(&action.input_args));
        }
        if let Some(description) = non_empty(&action.description) {
            node = node.with("description", YamlNode::text(description));
        }
        if let Some(delay) = action.delay_config.as_ref().filter(|d| !d.is_empty()) {
            node = node.with("delay_config", delay_config_node(delay));
        }
        if let Some(progress) = action.progress_updates.as_ref().filter(|p| !p.is_empty()) {
            node = node.with("progress_updates", map_node(progress));
        }
        Ok(node)
    }

    fn script_node(&self, script: &ScriptStep, location: &StepLocation) -> Result<YamlNode, SerializationError> {
        let code = self.required(&script.code, location, "code")?;
        let size = script.code.len();
        if size > self.options.max_code_bytes {
            return Err(SerializationError::CodeTooLarge {
                step: location.label.clone(),
                size,
                limit: self.options.max_code_bytes,
            });
        }

        let mut node = YamlNode::mapping()
            .with("code", code)
            .with("output_key", self.required(&script.output_key, location, "output_key")?);
        if !script.input_args.is_empty() {
            node = node.with("input_args", map_node(&script.input_args));
        }
        if let Some(description) = non_empty(&script.description) {
            node = node.with("description", YamlNode::text(description));
        }
        Ok(node)
    }

    /// Switch is the one step whose `output_key` sits beside the tag
    fn switch_node(&self, switch: &SwitchStep, location: &StepLocation) -> Result<YamlNode, SerializationError> {
        if switch.cases.is_empty() && switch.default.is_none() {
            return Err(SerializationError::missing(location.label.as_str(), "cases"));
        }

        let mut cases = Vec::with_capacity(switch.cases.len());
        for (i, case) in switch.cases.iter().enumerate() {
            let condition = self.required(&case.condition, location, &format!("cases[{}].condition", i))?;
            let container = format!("switch.cases[{}].steps", i);
            cases.push(
                YamlNode::mapping()
                    .with("condition", condition)
                    .with("steps", self.steps_node(&case.steps, Some((location, &container)))?),
            );
        }

        let mut body = YamlNode::mapping().with("cases", YamlNode::Sequence(cases));
        if let Some(default) = &switch.default {
            body = body.with(
                "default",
                YamlNode::mapping().with(
                    "steps",
                    self.steps_node(&default.steps, Some((location, "switch.default.steps")))?,
                ),
            );
        }

        let mut node = YamlNode::mapping().with("switch", body);
        if let Some(key) = registered(&switch.output_key) {
            node = node.with("output_key", YamlNode::text(key));
        }
        Ok(node)
    }

    fn for_node(&self, for_loop: &ForLoopStep, location: &StepLocation) -> Result<YamlNode, SerializationError> {
        let mut node = YamlNode::mapping().with("each", self.required(&for_loop.each, location, "each")?);
        if let Some(index) = non_empty(&for_loop.index) {
            node = node.with("index", YamlNode::text(index));
        }
        Ok(node
            .with("in", self.required(&for_loop.in_source, location, "in")?)
            .with("output_key", self.required(&for_loop.output_key, location, "output_key")?)
            .with("steps", self.steps_node(&for_loop.steps, Some((location, "for.steps")))?))
    }

    fn parallel_node(&self, parallel: &ParallelStep, location: &StepLocation) -> Result<YamlNode, SerializationError> {
        match &parallel.mode {
            ParallelMode::ForLoop(for_loop) => Ok(YamlNode::mapping()
                .with("for", self.parallel_for_node(for_loop, location)?)),
            ParallelMode::Branches(branches) => {
                if branches.is_empty() {
                    return Err(SerializationError::missing(location.label.as_str(), "branches"));
                }
                let mut nodes = Vec::with_capacity(branches.len());
                for (i, branch) in branches.iter().enumerate() {
                    let container = format!("parallel.branches[{}].steps", i);
                    let mut node = YamlNode::mapping()
                        .with("steps", self.steps_node(&branch.steps, Some((location, &container)))?);
                    if let Some(name) = non_empty(&branch.name) {
                        node = node.with("name", YamlNode::text(name));
                    }
                    nodes.push(node);
                }
                Ok(YamlNode::mapping().with("branches", YamlNode::Sequence(nodes)))
            }
        }
    }

    fn parallel_for_node(&self, for_loop: &ParallelForLoop, location: &StepLocation) -> Result<YamlNode, SerializationError> {
        let mut node = YamlNode::mapping()
            .with("each", self.required(&for_loop.each, location, "each")?)
            .with("in", self.required(&for_loop.in_source, location, "in")?);
        if let Some(index) = non_empty(&for_loop.index) {
            node = node.with("index_key", YamlNode::text(index));
        }
        node = node.with("output_key", self.required(&for_loop.output_key, location, "output_key")?);
        if !for_loop.steps.is_empty() {
            node = node.with(
                "steps",
                self.steps_node(&for_loop.steps, Some((location, "parallel.for.steps")))?,
            );
        }
        Ok(node)
    }

    fn try_catch_node(&self, try_catch: &TryCatchStep, location: &StepLocation) -> Result<YamlNode, SerializationError> {
        if try_catch.try_steps.is_empty() {
            return Err(SerializationError::missing(location.label.as_str(), "try.steps"));
        }
        let mut node = YamlNode::mapping().with(
            "try",
            YamlNode::mapping().with(
                "steps",
                self.steps_node(&try_catch.try_steps, Some((location, "try_catch.try.steps")))?,
            ),
        );

        if let Some(catch) = &try_catch.catch_block {
            let mut catch_node = YamlNode::mapping();
            if !catch.on_status_code.is_empty() {
                let codes = catch.on_status_code.iter().map(status_code_node).collect();
                catch_node = catch_node.with("on_status_code", YamlNode::Sequence(codes));
            }
            catch_node = catch_node.with(
                "steps",
                self.steps_node(&catch.steps, Some((location, "try_catch.catch.steps")))?,
            );
            node = node.with("catch", catch_node);
        }
        Ok(node)
    }
}

fn return_node(ret: &ReturnStep) -> YamlNode {
    if ret.output_mapper.is_empty() {
        YamlNode::mapping()
    } else {
        YamlNode::mapping().with("output_mapper", map_node(&ret.output_mapper))
    }
}

fn raise_node(raise: &RaiseStep) -> YamlNode {
    let mut node = YamlNode::mapping();
    if let Some(key) = registered(&raise.output_key) {
        node = node.with("output_key", YamlNode::text(key));
    }
    if let Some(message) = non_empty(&raise.message) {
        node = node.with("message", YamlNode::text(message));
    }
    node
}

fn map_node(map: &ArgumentMap) -> YamlNode {
    YamlNode::Mapping(
        map.iter()
            .map(|(key, value)| (key.clone(), YamlNode::from(value)))
            .collect(),
    )
}

/// `delay_seconds` is always an integer on the wire; 0 when it has no integer reading
fn delay_config_node(delay: &ArgumentMap) -> YamlNode {
    YamlNode::Mapping(
        delay
            .iter()
            .map(|(key, value)| {
                let node = if key == "delay_seconds" {
                    YamlNode::int(coerce_int(value).unwrap_or(0))
                } else {
                    YamlNode::from(value)
                };
                (key.clone(), node)
            })
            .collect(),
    )
}

fn status_code_node(code: &Value) -> YamlNode {
    match coerce_int(code) {
        Some(status) if !code.is_boolean() => YamlNode::int(status),
        _ => YamlNode::from(code),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Output key worth writing: neither blank nor the sentinel
fn registered(key: &str) -> Option<&str> {
    Some(key).filter(|k| !k.trim().is_empty() && *k != SENTINEL_OUTPUT_KEY)
}

/// Serialize with default options and an optional `action_name`
pub fn serialize(workflow: &Workflow, action_name: Option<&str>) -> Result<String, SerializationError> {
    let mut options = SerializerOptions::default();
    if let Some(name) = action_name {
        options.action_name = name.to_string();
    }
    YamlSerializer::new(options).serialize(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ParallelBranch, SwitchCase};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn create_test_workflow() -> Workflow {
        Workflow::new()
            .with_step(
                ActionStep::new("mw.get_user_by_email", "user_info")
                    .with_input_arg("email", "data.input_email"),
            )
            .with_step(ScriptStep::new("return {'x': data.user_info.id}", "result"))
    }

    #[test]
    fn test_two_step_document() {
        let yaml = serialize(&create_test_workflow(), None).unwrap();
        let expected = "\
action_name: compound_action
steps:
  - action:
      action_name: mw.get_user_by_email
      output_key: user_info
      input_args:
        email: \"data.input_email\"
  - script:
      code: 'return {''x'': data.user_info.id}'
      output_key: result
";
        assert_eq!(yaml, expected);
    }

    #[test]
    fn test_action_optional_fields_in_order() {
        let mut delay = ArgumentMap::new();
        delay.insert("delay_seconds".into(), json!("45"));
        let mut progress = ArgumentMap::new();
        progress.insert("on_pending".into(), json!("Working on it"));
        let action = ActionStep::new("mw.create_ticket", "ticket")
            .with_input_arg("timeout", "30")
            .with_description("Open a ticket")
            .with_delay_config(delay)
            .with_progress_updates(progress);

        let node = YamlSerializer::default()
            .to_node(&Workflow::new().with_step(action))
            .unwrap();
        let action_node = node.get("steps").and_then(|s| s.as_sequence()).unwrap()[0]
            .get("action")
            .unwrap();
        assert_eq!(
            action_node.keys(),
            vec![
                "action_name",
                "output_key",
                "input_args",
                "description",
                "delay_config",
                "progress_updates"
            ]
        );
        assert_eq!(
            action_node.get("delay_config").and_then(|d| d.get("delay_seconds")),
            Some(&YamlNode::int(45))
        );
    }

    #[test]
    fn test_bad_delay_becomes_zero() {
        let mut delay = ArgumentMap::new();
        delay.insert("delay_seconds".into(), json!("soon"));
        let workflow = Workflow::new()
            .with_step(ActionStep::new("mw.wait", "_").with_delay_config(delay));
        let yaml = serialize(&workflow, None).unwrap();
        assert!(yaml.contains("delay_seconds: 0\n"), "got:\n{}", yaml);
    }

    #[test]
    fn test_control_flow_shapes() {
        let lookup = || Step::from(ActionStep::new("mw.lookup", "_"));
        let workflow = Workflow::new()
            .with_step(SwitchStep {
                cases: vec![SwitchCase::new("data.count > 1", vec![lookup()])],
                default: Some(crate::workflow::DefaultCase { steps: vec![lookup()] }),
                output_key: "decision".into(),
                description: None,
            })
            .with_step(ForLoopStep::new("item", "data.items", "results", vec![lookup()]).with_index("i"))
            .with_step(ParallelStep::branches(vec![ParallelBranch {
                name: Some("left".into()),
                steps: vec![lookup()],
            }]))
            .with_step(
                TryCatchStep::new(vec![lookup()])
                    .with_catch(vec![json!("404"), json!("teapot")], vec![RaiseStep::new().into()]),
            )
            .with_step(ReturnStep::new().with_mapping("count", "data.count"));

        let yaml = serialize(&workflow, Some("handle_items")).unwrap();
        let expected = "\
action_name: handle_items
steps:
  - switch:
      cases:
        - condition: \"data.count > 1\"
          steps:
            - action:
                action_name: mw.lookup
                output_key: _
      default:
        steps:
          - action:
              action_name: mw.lookup
              output_key: _
    output_key: decision
  - for:
      each: item
      index: i
      in: \"data.items\"
      output_key: results
      steps:
        - action:
            action_name: mw.lookup
            output_key: _
  - parallel:
      branches:
        - steps:
            - action:
                action_name: mw.lookup
                output_key: _
          name: left
  - try_catch:
      try:
        steps:
          - action:
              action_name: mw.lookup
              output_key: _
      catch:
        on_status_code:
          - 404
          - teapot
        steps:
          - raise: {}
  - return:
      output_mapper:
        count: \"data.count\"
";
        assert_eq!(yaml, expected);
    }

    #[test]
    fn test_parallel_for_uses_index_key() {
        let parallel = ParallelStep::for_loop(ParallelForLoop {
            each: "user".into(),
            index: Some("n".into()),
            in_source: "data.users".into(),
            output_key: "greetings".into(),
            steps: vec![],
        });
        let node = YamlSerializer::default()
            .to_node(&Workflow::new().with_step(parallel))
            .unwrap();
        let for_node = node.get("steps").and_then(|s| s.as_sequence()).unwrap()[0]
            .get("parallel")
            .and_then(|p| p.get("for"))
            .unwrap();
        assert_eq!(for_node.keys(), vec!["each", "in", "index_key", "output_key"]);
    }

    #[test]
    fn test_raise_and_switch_sentinel_keys_are_omitted() {
        let workflow = Workflow::new()
            .with_step(SwitchStep::new().with_default(vec![RaiseStep::new().with_message("stop").into()]))
            .with_step(RaiseStep::new().with_output_key("failure"));
        let yaml = serialize(&workflow, None).unwrap();
        assert!(!yaml.contains("output_key: _"), "got:\n{}", yaml);
        assert!(yaml.contains("message: stop"));
        assert!(yaml.contains("  - raise:\n      output_key: failure\n"));
    }

    #[test]
    fn test_missing_fields_block_serialization() {
        let cases: Vec<(Workflow, &str)> = vec![
            (Workflow::new().with_step(ActionStep::new("", "out")), "action_name"),
            (Workflow::new().with_step(ScriptStep::new("return 1", " ")), "output_key"),
            (Workflow::new().with_step(ScriptStep::new("", "out")), "code"),
            (Workflow::new().with_step(SwitchStep::new()), "cases"),
            (
                Workflow::new().with_step(SwitchStep::new().with_case("", vec![])),
                "cases[0].condition",
            ),
            (
                Workflow::new().with_step(ForLoopStep::new("x", "", "out", vec![])),
                "in",
            ),
            (Workflow::new().with_step(TryCatchStep::new(vec![])), "try.steps"),
            (Workflow::new().with_step(ParallelStep::branches(vec![])), "branches"),
        ];
        for (workflow, field) in cases {
            match serialize(&workflow, None) {
                Err(SerializationError::MissingField { step, field: missing }) => {
                    assert_eq!(step, "Step 1");
                    assert_eq!(missing, field);
                }
                other => panic!("expected missing '{}', got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_nested_missing_field_names_nested_step() {
        let workflow = Workflow::new().with_step(TryCatchStep::new(vec![
            ActionStep::new("mw.ok", "a").into(),
            ActionStep::new("mw.ok", "").into(),
        ]));
        assert_eq!(
            serialize(&workflow, None),
            Err(SerializationError::missing("Step 1.2", "output_key"))
        );
    }

    #[test]
    fn test_allow_blank_fields_writes_empty_strings() {
        let serializer = YamlSerializer::new(SerializerOptions::default().allow_blank_fields(true));
        let yaml = serializer
            .serialize(&Workflow::new().with_step(ActionStep::new("", "")))
            .unwrap();
        assert!(yaml.contains("action_name: ''\n      output_key: ''\n"), "got:\n{}", yaml);
    }

    #[test]
    fn test_code_size_limit_blocks_but_apithon_errors_do_not() {
        let too_big = format!("x = 1\n{}", "#".repeat(MAX_CODE_BYTES));
        let workflow = Workflow::new().with_step(ScriptStep::new(too_big, "out"));
        assert!(matches!(
            serialize(&workflow, None),
            Err(SerializationError::CodeTooLarge { .. })
        ));

        let workflow = Workflow::new().with_step(ScriptStep::new("import os", "out"));
        assert!(serialize(&workflow, None).is_ok());
    }

    #[test]
    fn test_serialize_is_idempotent() {
        let workflow = create_test_workflow();
        assert_eq!(serialize(&workflow, None), serialize(&workflow, None));
    }
}
