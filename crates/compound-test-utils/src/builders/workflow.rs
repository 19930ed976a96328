//! Fluent construction of workflows for tests.

use compound_dsl::workflow::{
    ActionStep, ForLoopStep, ParallelBranch, ParallelStep, RaiseStep, ReturnStep, ScriptStep,
    Step, SwitchStep, TryCatchStep, Workflow,
};
use compound_dsl::ValidationOptions;
use indexmap::IndexMap;
use serde_json::{json, Value};

/// Builder for a workflow plus the inputs it starts with
#[derive(Debug, Clone, Default)]
pub struct WorkflowBuilder {
    steps: Vec<Step>,
    inputs: IndexMap<String, Value>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action step with the given input arguments
    pub fn action(mut self, action_name: &str, output_key: &str, input_args: &[(&str, Value)]) -> Self {
        let mut step = ActionStep::new(action_name, output_key);
        for (name, value) in input_args {
            step = step.with_input_arg(*name, value.clone());
        }
        self.steps.push(step.into());
        self
    }

    pub fn script(mut self, code: &str, output_key: &str) -> Self {
        self.steps.push(ScriptStep::new(code, output_key).into());
        self
    }

    /// Add any prepared step
    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Declare an input that exists when the workflow starts
    pub fn input(mut self, name: &str, value: Value) -> Self {
        self.inputs.insert(name.to_string(), value);
        self
    }

    pub fn build(self) -> Workflow {
        Workflow::from_steps(self.steps)
    }

    /// The workflow and validation options seeded with the declared inputs
    pub fn build_with_options(self) -> (Workflow, ValidationOptions) {
        let options = ValidationOptions {
            initial_inputs: self.inputs,
            ..ValidationOptions::default()
        };
        (Workflow::from_steps(self.steps), options)
    }
}

/// A user lookup followed by a script that reads its result
pub fn create_two_step_workflow() -> Workflow {
    WorkflowBuilder::new()
        .action(
            "mw.get_user_by_email",
            "user_info",
            &[("email", json!("data.input_email"))],
        )
        .script("return {'x': data.user_info.id}", "result")
        .build()
}

/// A lookup step reading `data.<source>` into `output_key`
pub fn create_lookup_step(source: &str, output_key: &str) -> Step {
    ActionStep::new("mw.lookup_record", output_key)
        .with_input_arg("id", format!("data.{}", source))
        .into()
}

/// One step of every kind, nested the way real workflows nest them
pub fn create_control_flow_workflow() -> Workflow {
    WorkflowBuilder::new()
        .action("mw.list_tickets", "tickets", &[("status", json!("open"))])
        .step(ForLoopStep::new(
            "ticket",
            "data.tickets",
            "ticket_details",
            vec![create_lookup_step("ticket.id", "detail")],
        ))
        .step(
            SwitchStep::new()
                .with_case(
                    "data.ticket_details.length > 0",
                    vec![ScriptStep::new("count = len(data.ticket_details)\nreturn count\n", "total").into()],
                )
                .with_default(vec![RaiseStep::new().with_message("no tickets").into()]),
        )
        .step(ParallelStep::branches(vec![
            ParallelBranch {
                name: Some("notify".into()),
                steps: vec![ActionStep::new("mw.send_notification", "_")
                    .with_input_arg("message", "done")
                    .into()],
            },
            ParallelBranch {
                name: None,
                steps: vec![ActionStep::new("mw.audit", "_").into()],
            },
        ]))
        .step(
            TryCatchStep::new(vec![ActionStep::new("mw.close_tickets", "closed")
                .with_input_arg("tickets", "data.tickets")
                .into()])
            .with_catch(vec![json!(500)], vec![RaiseStep::new().with_message("close failed").into()]),
        )
        .step(ReturnStep::new().with_mapping("closed", "data.closed"))
        .build()
}
