//! Checks that every `data.` reference points at data available when the step runs.
//!
//! Steps are walked in execution order with a running [`DataContext`]: a step
//! sees the initial inputs plus the outputs of the steps before it, never its
//! own or later ones.

use indexmap::IndexSet;
use tracing::{debug, trace};

use super::{error_codes, Category, Diagnostic, Validator};
use crate::context::{ContextEntry, DataContext};
use crate::utils::reference::{
    collect_data_references, extract_data_path, root_segment, DATA_PREFIX,
};
use crate::workflow::{ParallelMode, Step, StepLocation, Workflow};

/// Validator for data references between steps
#[derive(Debug, Clone, Default)]
pub struct DataReferenceValidator {
    initial_context: DataContext,
}

impl Validator for DataReferenceValidator {
    fn name(&self) -> &'static str {
        "data-reference"
    }

    fn validate(&self, workflow: &Workflow) -> Vec<Diagnostic> {
        let mut context = self.initial_context.clone();
        for name in infer_inputs(workflow) {
            if context.entry(&name).is_none() {
                trace!(input = %name, "inferred workflow input");
                context = context.with_placeholder_input(name);
            }
        }

        let mut diagnostics = Vec::new();
        check_steps(&workflow.steps, None, &mut context, &mut diagnostics);
        debug!(
            references_failed = diagnostics.len(),
            "data reference validation finished"
        );
        diagnostics
    }
}

impl DataReferenceValidator {
    /// Validator whose first step sees `initial_context`
    pub fn new(initial_context: DataContext) -> Self {
        DataReferenceValidator { initial_context }
    }
}

/// Shorthand for `DataReferenceValidator::new(context.clone()).validate(workflow)`
pub fn validate_data_references(workflow: &Workflow, context: &DataContext) -> Vec<Diagnostic> {
    DataReferenceValidator::new(context.clone()).validate(workflow)
}

/// Root names referenced from `input_args` that no step produces and that
/// are not loop variables.
///
/// These are taken to be inputs of the compound action itself.
pub fn infer_inputs(workflow: &Workflow) -> Vec<String> {
    let mut produced: IndexSet<&str> =
        workflow.output_keys().into_iter().map(|(key, _)| key).collect();
    workflow.walk(|step, _| produced.extend(loop_variables(step).into_iter().flatten()));

    let mut inferred: IndexSet<String> = IndexSet::new();
    workflow.walk(|step, _| {
        let args = match step.input_args() {
            Some(args) => args,
            None => return,
        };
        for value in args.values() {
            for reference in collect_data_references(value) {
                if let Some(path) = extract_data_path(reference) {
                    let root = root_segment(path);
                    if !produced.contains(root) {
                        inferred.insert(root.to_string());
                    }
                }
            }
        }
    });

    inferred.into_iter().collect()
}

fn loop_variables(step: &Step) -> [Option<&str>; 2] {
    match step {
        Step::ForLoop(for_loop) => [Some(for_loop.each.as_str()), for_loop.index.as_deref()],
        Step::Parallel(parallel) => match &parallel.mode {
            ParallelMode::ForLoop(for_loop) => {
                [Some(for_loop.each.as_str()), for_loop.index.as_deref()]
            }
            ParallelMode::Branches(_) => [None, None],
        },
        _ => [None, None],
    }
}

fn check_steps(
    steps: &[Step],
    parent: Option<(&StepLocation, &str)>,
    context: &mut DataContext,
    out: &mut Vec<Diagnostic>,
) {
    for (index, step) in steps.iter().enumerate() {
        let location = match parent {
            Some((parent, container)) => parent.child(container, index),
            None => StepLocation::root(index),
        };
        check_step(step, &location, context, out);

        if let Some(key) = step.registered_output_key() {
            *context = match step.parsed_json_output() {
                Some(value) => context.with_step_output(key, value.clone()),
                None => context.with_opaque_output(key),
            };
        }
    }
}

fn check_step(step: &Step, location: &StepLocation, context: &mut DataContext, out: &mut Vec<Diagnostic>) {
    trace!(step = %location.label, kind = step.type_tag(), "checking data references");

    if let Some(args) = step.input_args() {
        let tag = step.type_tag();
        for (name, value) in args {
            let field = format!("input argument '{}'", name);
            let wire = format!("{}.input_args.{}", tag, name);
            for reference in collect_data_references(value) {
                check_reference(reference, &field, &wire, location, context, out);
            }
        }
    }

    match step {
        Step::Switch(switch) => {
            for (i, case) in switch.cases.iter().enumerate() {
                check_expression(
                    &case.condition,
                    &format!("case {} condition", i + 1),
                    &format!("switch.cases[{}].condition", i),
                    location,
                    context,
                    out,
                );
                let container = format!("switch.cases[{}].steps", i);
                check_steps(&case.steps, Some((location, &container)), context, out);
            }
            if let Some(default) = &switch.default {
                check_steps(&default.steps, Some((location, "switch.default.steps")), context, out);
            }
        }
        Step::ForLoop(for_loop) => {
            check_expression(&for_loop.in_source, "loop source", "for.in", location, context, out);
            check_loop_body(&for_loop.steps, &loop_variables(step), location, "for.steps", context, out);
        }
        Step::Parallel(parallel) => match &parallel.mode {
            ParallelMode::ForLoop(for_loop) => {
                check_expression(
                    &for_loop.in_source,
                    "loop source",
                    "parallel.for.in",
                    location,
                    context,
                    out,
                );
                check_loop_body(
                    &for_loop.steps,
                    &loop_variables(step),
                    location,
                    "parallel.for.steps",
                    context,
                    out,
                );
            }
            ParallelMode::Branches(branches) => {
                for (i, branch) in branches.iter().enumerate() {
                    let container = format!("parallel.branches[{}].steps", i);
                    check_steps(&branch.steps, Some((location, &container)), context, out);
                }
            }
        },
        Step::Return(ret) => {
            for (key, value) in &ret.output_mapper {
                let field = format!("output mapper '{}'", key);
                let wire = format!("return.output_mapper.{}", key);
                for reference in collect_data_references(value) {
                    check_reference(reference, &field, &wire, location, context, out);
                }
            }
        }
        Step::TryCatch(try_catch) => {
            check_steps(&try_catch.try_steps, Some((location, "try_catch.try.steps")), context, out);
            if let Some(catch) = &try_catch.catch_block {
                check_steps(&catch.steps, Some((location, "try_catch.catch.steps")), context, out);
            }
        }
        Step::Action(_) | Step::Script(_) | Step::Raise(_) => {}
    }
}

/// Walk a loop body with the loop variables visible, then carry the
/// outputs it registered (but not the loop variables) back out
fn check_loop_body(
    steps: &[Step],
    loop_vars: &[Option<&str>],
    location: &StepLocation,
    container: &str,
    context: &mut DataContext,
    out: &mut Vec<Diagnostic>,
) {
    let mut body = loop_vars
        .iter()
        .flatten()
        .fold(context.clone(), |ctx, var| ctx.with_opaque_output(var));
    check_steps(steps, Some((location, container)), &mut body, out);

    let mut produced = Vec::new();
    collect_output_keys(steps, &mut produced);
    for key in produced {
        *context = match body.entry(key) {
            Some(ContextEntry::Known(value)) => context.with_step_output(key, value.clone()),
            _ => context.with_opaque_output(key),
        };
    }
}

fn collect_output_keys<'a>(steps: &'a [Step], out: &mut Vec<&'a str>) {
    for step in steps {
        if let Some(key) = step.registered_output_key() {
            out.push(key);
        }
        for (_, children) in step.child_lists() {
            collect_output_keys(children, out);
        }
    }
}

/// Conditions and loop sources: only a leading `data.` reference is checked
fn check_expression(
    expression: &str,
    field: &str,
    wire: &str,
    location: &StepLocation,
    context: &DataContext,
    out: &mut Vec<Diagnostic>,
) {
    if expression.trim_start().starts_with(DATA_PREFIX) {
        check_reference(expression, field, wire, location, context, out);
    }
}

fn check_reference(
    reference: &str,
    field: &str,
    wire: &str,
    location: &StepLocation,
    context: &DataContext,
    out: &mut Vec<Diagnostic>,
) {
    let path = format!("{}.{}", location.path, wire);
    match extract_data_path(reference) {
        Some(data_path) if !context.is_path_available(data_path) => {
            out.push(
                Diagnostic::error(
                    Category::DataReference,
                    error_codes::UNAVAILABLE_DATA_REFERENCE,
                    format!(
                        "{}: {} references unavailable data path 'data.{}'",
                        location.label, field, data_path
                    ),
                )
                .at(path),
            );
        }
        Some(_) => {}
        None => {
            out.push(
                Diagnostic::error(
                    Category::DataReference,
                    error_codes::INVALID_DATA_REFERENCE,
                    format!(
                        "{}: {} contains a malformed data reference '{}'",
                        location.label,
                        field,
                        reference.trim()
                    ),
                )
                .at(path),
            );
        }
    }
}
