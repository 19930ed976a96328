mod control;
mod step;

pub use control::{
    CatchBlock, DefaultCase, ForLoopStep, ParallelBranch, ParallelForLoop, ParallelMode,
    ParallelStep, SwitchCase, SwitchStep, TryCatchStep,
};
pub use step::{ActionStep, JsonOutput, RaiseStep, ReturnStep, ScriptStep};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output key meaning "result discarded"
pub const SENTINEL_OUTPUT_KEY: &str = "_";

/// `action_name` emitted when the caller does not supply one
pub const DEFAULT_ACTION_NAME: &str = "compound_action";

/// Ordered argument map (insertion order is preserved on the wire)
pub type ArgumentMap = IndexMap<String, Value>;

pub(crate) fn sentinel_output_key() -> String {
    SENTINEL_OUTPUT_KEY.to_string()
}

/// A single workflow step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Action(ActionStep),
    Script(ScriptStep),
    Switch(SwitchStep),
    #[serde(rename = "for")]
    ForLoop(ForLoopStep),
    Parallel(ParallelStep),
    Return(ReturnStep),
    Raise(RaiseStep),
    TryCatch(TryCatchStep),
}

impl Step {
    /// The tag used for this step on the wire
    pub fn type_tag(&self) -> &'static str {
        match self {
            Step::Action(_) => "action",
            Step::Script(_) => "script",
            Step::Switch(_) => "switch",
            Step::ForLoop(_) => "for",
            Step::Parallel(_) => "parallel",
            Step::Return(_) => "return",
            Step::Raise(_) => "raise",
            Step::TryCatch(_) => "try_catch",
        }
    }

    /// The declared output key, if the variant has one
    pub fn output_key(&self) -> Option<&str> {
        match self {
            Step::Action(s) => Some(&s.output_key),
            Step::Script(s) => Some(&s.output_key),
            Step::Switch(s) => Some(&s.output_key),
            Step::ForLoop(s) => Some(&s.output_key),
            Step::Parallel(s) => match &s.mode {
                ParallelMode::ForLoop(f) => Some(&f.output_key),
                ParallelMode::Branches(_) => Some(&s.output_key),
            },
            Step::Raise(s) => Some(&s.output_key),
            Step::Return(_) | Step::TryCatch(_) => None,
        }
    }

    /// The output key later steps can reference, i.e. neither blank nor `"_"`
    pub fn registered_output_key(&self) -> Option<&str> {
        self.output_key()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != SENTINEL_OUTPUT_KEY)
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Step::Action(s) => s.description.as_deref(),
            Step::Script(s) => s.description.as_deref(),
            Step::Switch(s) => s.description.as_deref(),
            Step::ForLoop(s) => s.description.as_deref(),
            Step::Parallel(s) => s.description.as_deref(),
            Step::Return(s) => s.description.as_deref(),
            Step::Raise(s) => s.description.as_deref(),
            Step::TryCatch(s) => s.description.as_deref(),
        }
    }

    /// The author's example output, if the variant carries one
    pub fn json_output(&self) -> Option<&JsonOutput> {
        match self {
            Step::Action(s) => s.user_provided_json_output.as_ref(),
            Step::Script(s) => s.user_provided_json_output.as_ref(),
            _ => None,
        }
    }

    /// Parsed example output (lazily parsed and cached)
    pub fn parsed_json_output(&self) -> Option<&Value> {
        self.json_output().and_then(JsonOutput::parsed)
    }

    /// Input arguments, for the variants that take them
    pub fn input_args(&self) -> Option<&ArgumentMap> {
        match self {
            Step::Action(s) => Some(&s.input_args),
            Step::Script(s) => Some(&s.input_args),
            _ => None,
        }
    }

    /// Nested step lists in execution order, each with its wire path
    /// relative to this step (e.g. `switch.cases[0].steps`).
    pub fn child_lists(&self) -> Vec<(String, &[Step])> {
        match self {
            Step::Switch(s) => {
                let mut lists: Vec<(String, &[Step])> = s
                    .cases
                    .iter()
                    .enumerate()
                    .map(|(i, case)| (format!("switch.cases[{}].steps", i), case.steps.as_slice()))
                    .collect();
                if let Some(default) = &s.default {
                    lists.push(("switch.default.steps".to_string(), default.steps.as_slice()));
                }
                lists
            }
            Step::ForLoop(s) => vec![("for.steps".to_string(), s.steps.as_slice())],
            Step::Parallel(s) => match &s.mode {
                ParallelMode::ForLoop(f) => {
                    vec![("parallel.for.steps".to_string(), f.steps.as_slice())]
                }
                ParallelMode::Branches(branches) => branches
                    .iter()
                    .enumerate()
                    .map(|(i, b)| (format!("parallel.branches[{}].steps", i), b.steps.as_slice()))
                    .collect(),
            },
            Step::TryCatch(s) => {
                let mut lists = vec![("try_catch.try.steps".to_string(), s.try_steps.as_slice())];
                if let Some(catch) = &s.catch_block {
                    lists.push(("try_catch.catch.steps".to_string(), catch.steps.as_slice()));
                }
                lists
            }
            Step::Action(_) | Step::Script(_) | Step::Return(_) | Step::Raise(_) => Vec::new(),
        }
    }
}

macro_rules! impl_from_step {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Step {
                fn from(step: $ty) -> Self {
                    Step::$variant(step)
                }
            }
        )*
    };
}

impl_from_step! {
    Action => ActionStep,
    Script => ScriptStep,
    Switch => SwitchStep,
    ForLoop => ForLoopStep,
    Parallel => ParallelStep,
    Return => ReturnStep,
    Raise => RaiseStep,
    TryCatch => TryCatchStep,
}

/// Where a step sits in the workflow tree.
///
/// `label` is the human form used in diagnostics (`Step 2`, `Step 2.1`);
/// `path` is the wire location (`steps[1].switch.cases[0].steps[0]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLocation {
    pub label: String,
    pub path: String,
    pub depth: usize,
}

impl StepLocation {
    /// Location of a top-level step (zero-based index)
    pub fn root(index: usize) -> Self {
        StepLocation {
            label: format!("Step {}", index + 1),
            path: format!("steps[{}]", index),
            depth: 0,
        }
    }

    /// Location of the `index`-th step inside one of this step's child lists
    pub fn child(&self, container: &str, index: usize) -> Self {
        StepLocation {
            label: format!("{}.{}", self.label, index + 1),
            path: format!("{}.{}[{}]", self.path, container, index),
            depth: self.depth + 1,
        }
    }
}

/// An ordered list of steps; list order is execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Workflow { steps }
    }

    /// Append a step
    pub fn push(&mut self, step: impl Into<Step>) {
        self.steps.push(step.into());
    }

    /// Append a step, builder style
    pub fn with_step(mut self, step: impl Into<Step>) -> Self {
        self.push(step);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Visit every step depth-first in execution order
    pub fn walk<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(&'a Step, &StepLocation),
    {
        for (index, step) in self.steps.iter().enumerate() {
            walk_step(step, &StepLocation::root(index), &mut visit);
        }
    }

    /// Every step with its location, depth-first
    pub fn flatten(&self) -> Vec<(&Step, StepLocation)> {
        let mut all = Vec::new();
        self.walk(|step, location| all.push((step, location.clone())));
        all
    }

    /// Every registered output key (blank and `"_"` excluded) with the step declaring it
    pub fn output_keys(&self) -> Vec<(&str, StepLocation)> {
        let mut keys = Vec::new();
        self.walk(|step, location| {
            if let Some(key) = step.registered_output_key() {
                keys.push((key, location.clone()));
            }
        });
        keys
    }
}

fn walk_step<'a, F>(step: &'a Step, location: &StepLocation, visit: &mut F)
where
    F: FnMut(&'a Step, &StepLocation),
{
    visit(step, location);
    for (container, children) in step.child_lists() {
        for (index, child) in children.iter().enumerate() {
            walk_step(child, &location.child(&container, index), visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_workflow() -> Workflow {
        Workflow::new()
            .with_step(ActionStep::new("mw.get_user_by_email", "user_info"))
            .with_step(
                SwitchStep::new()
                    .with_case(
                        "data.user_info.active == true",
                        vec![ScriptStep::new("return 1", "flag").into()],
                    )
                    .with_default(vec![RaiseStep::new().with_message("inactive").into()]),
            )
            .with_step(ReturnStep::new().with_mapping("flag", "data.flag"))
    }

    #[test]
    fn test_walk_visits_nested_steps_in_order() {
        let workflow = create_test_workflow();
        let flattened = workflow.flatten();

        let labels: Vec<&str> = flattened.iter().map(|(_, l)| l.label.as_str()).collect();
        assert_eq!(labels, vec!["Step 1", "Step 2", "Step 2.1", "Step 2.1", "Step 3"]);

        let paths: Vec<&str> = flattened.iter().map(|(_, l)| l.path.as_str()).collect();
        assert_eq!(paths[2], "steps[1].switch.cases[0].steps[0]");
        assert_eq!(paths[3], "steps[1].switch.default.steps[0]");
    }

    #[test]
    fn test_registered_output_key_skips_sentinel_and_blank() {
        assert_eq!(Step::from(SwitchStep::new()).registered_output_key(), None);
        assert_eq!(Step::from(ActionStep::new("mw.x", "  ")).registered_output_key(), None);
        assert_eq!(
            Step::from(ActionStep::new("mw.x", "user")).registered_output_key(),
            Some("user")
        );
        assert_eq!(Step::from(ReturnStep::new()).output_key(), None);
    }

    #[test]
    fn test_output_keys_include_nested() {
        let workflow = create_test_workflow();
        let keys: Vec<&str> = workflow.output_keys().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["user_info", "flag"]);
    }

    #[test]
    fn test_json_output_is_parsed_lazily() {
        let step: Step = ActionStep::new("mw.x", "user")
            .with_json_output(r#"{"id": 7, "emails": ["a@b.c"]}"#)
            .into();
        let parsed = step.parsed_json_output().expect("valid json");
        assert_eq!(parsed["id"], 7);

        let broken: Step = ActionStep::new("mw.x", "user").with_json_output("{not json").into();
        assert!(broken.parsed_json_output().is_none());
        assert!(broken.json_output().and_then(JsonOutput::parse_error).is_some());
    }

    #[test]
    fn test_step_serde_uses_wire_tags() {
        let step: Step = ForLoopStep::new("item", "data.items", "results", vec![]).into();
        let json = serde_json::to_value(&step).unwrap();
        assert!(json.get("for").is_some(), "expected 'for' tag, got {}", json);

        let back: Step = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);
    }
}
