use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{sentinel_output_key, Step, SENTINEL_OUTPUT_KEY};

/// A guarded branch of a switch step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// DSL condition, e.g. `data.user.age > 18`
    #[serde(default)]
    pub condition: String,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl SwitchCase {
    pub fn new(condition: impl Into<String>, steps: Vec<Step>) -> Self {
        SwitchCase {
            condition: condition.into(),
            steps,
        }
    }
}

/// Branch taken when no case matches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultCase {
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Conditional branching over an ordered list of cases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchStep {
    #[serde(default)]
    pub cases: Vec<SwitchCase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultCase>,

    /// `"_"` unless the switch result is referenced later
    #[serde(default = "sentinel_output_key")]
    pub output_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SwitchStep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_case(mut self, condition: impl Into<String>, steps: Vec<Step>) -> Self {
        self.cases.push(SwitchCase::new(condition, steps));
        self
    }

    pub fn with_default(mut self, steps: Vec<Step>) -> Self {
        self.default = Some(DefaultCase { steps });
        self
    }

    pub fn with_output_key(mut self, output_key: impl Into<String>) -> Self {
        self.output_key = output_key.into();
        self
    }
}

impl Default for SwitchStep {
    fn default() -> Self {
        SwitchStep {
            cases: Vec::new(),
            default: None,
            output_key: SENTINEL_OUTPUT_KEY.to_string(),
            description: None,
        }
    }
}

/// Sequential iteration over a list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForLoopStep {
    /// Name bound to the current item inside the body
    #[serde(default)]
    pub each: String,

    /// Optional name bound to the current index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Expression producing the list (`in` on the wire)
    #[serde(default)]
    pub in_source: String,

    #[serde(default)]
    pub output_key: String,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ForLoopStep {
    pub fn new(
        each: impl Into<String>,
        in_source: impl Into<String>,
        output_key: impl Into<String>,
        steps: Vec<Step>,
    ) -> Self {
        ForLoopStep {
            each: each.into(),
            in_source: in_source.into(),
            output_key: output_key.into(),
            steps,
            ..Default::default()
        }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }
}

/// Parallel iteration over a list (`parallel.for` on the wire)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelForLoop {
    #[serde(default)]
    pub each: String,

    /// Emitted as `index_key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    #[serde(default)]
    pub in_source: String,

    #[serde(default)]
    pub output_key: String,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One independently executed list of steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelBranch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// The two mutually exclusive shapes of a parallel step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelMode {
    ForLoop(ParallelForLoop),
    Branches(Vec<ParallelBranch>),
}

/// Concurrent execution of branches or loop iterations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelStep {
    pub mode: ParallelMode,

    #[serde(default = "sentinel_output_key")]
    pub output_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParallelStep {
    /// Parallel step running each list of steps as its own branch
    pub fn branches(branches: Vec<ParallelBranch>) -> Self {
        ParallelStep {
            mode: ParallelMode::Branches(branches),
            output_key: SENTINEL_OUTPUT_KEY.to_string(),
            description: None,
        }
    }

    /// Parallel step iterating over `in_source`
    pub fn for_loop(for_loop: ParallelForLoop) -> Self {
        ParallelStep {
            mode: ParallelMode::ForLoop(for_loop),
            output_key: SENTINEL_OUTPUT_KEY.to_string(),
            description: None,
        }
    }
}

/// Error handler attached to a try/catch step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatchBlock {
    /// Status codes the handler applies to; ints where possible
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_status_code: Vec<Value>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Runs `try_steps` and, on failure, the optional catch block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TryCatchStep {
    #[serde(default)]
    pub try_steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch_block: Option<CatchBlock>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TryCatchStep {
    pub fn new(try_steps: Vec<Step>) -> Self {
        TryCatchStep {
            try_steps,
            ..Default::default()
        }
    }

    pub fn with_catch(mut self, on_status_code: Vec<Value>, steps: Vec<Step>) -> Self {
        self.catch_block = Some(CatchBlock {
            on_status_code,
            steps,
        });
        self
    }
}
