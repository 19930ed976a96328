use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::trace;

use super::naming::{
    check_action_name, check_output_key, dedupe_output_key, is_identifier, suggest_output_key,
};
use super::{error_codes, Category, Diagnostic, ValidationOptions, Validator};
use crate::apithon::ApithonValidator;
use crate::utils::coerce_int;
use crate::utils::reference::is_data_reference;
use crate::workflow::{
    ActionStep, ForLoopStep, JsonOutput, ParallelMode, ParallelStep, RaiseStep, ReturnStep,
    ScriptStep, Step, StepLocation, SwitchStep, TryCatchStep, Workflow, SENTINEL_OUTPUT_KEY,
};

/// Checks required fields, structure, naming and script rules of every step
#[derive(Debug, Clone)]
pub struct ComplianceValidator {
    strict_output_keys: bool,
    apithon: ApithonValidator,
}

impl Default for ComplianceValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for ComplianceValidator {
    fn name(&self) -> &'static str {
        "compliance"
    }

    fn validate(&self, workflow: &Workflow) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if workflow.is_empty() {
            diagnostics.push(
                Diagnostic::warning(error_codes::EMPTY_WORKFLOW, "Workflow has no steps")
                    .at("steps"),
            );
        }

        workflow.walk(|step, location| {
            trace!(step = %location.label, kind = step.type_tag(), "checking step");
            diagnostics.extend(self.check_step(step, location));
        });

        diagnostics.extend(self.check_duplicate_output_keys(workflow));
        diagnostics
    }
}

impl ComplianceValidator {
    /// Strict output keys and the default APIthon byte limits
    pub fn new() -> Self {
        Self::from_options(&ValidationOptions::default())
    }

    pub fn from_options(options: &ValidationOptions) -> Self {
        ComplianceValidator {
            strict_output_keys: options.strict_output_keys,
            apithon: ApithonValidator::with_limits(
                options.max_code_bytes,
                options.byte_limit_warning_margin,
            ),
        }
    }

    /// Switch between the strict and relaxed output-key formats
    pub fn with_strict_output_keys(mut self, strict: bool) -> Self {
        self.strict_output_keys = strict;
        self
    }

    fn check_step(&self, step: &Step, location: &StepLocation) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        match step {
            Step::Action(action) => self.check_action(action, location, &mut out),
            Step::Script(script) => self.check_script(script, location, &mut out),
            Step::Switch(switch) => self.check_switch(switch, location, &mut out),
            Step::ForLoop(for_loop) => self.check_for_loop(for_loop, location, &mut out),
            Step::Parallel(parallel) => self.check_parallel(parallel, location, &mut out),
            Step::Return(ret) => self.check_return(ret, location, &mut out),
            Step::Raise(raise) => self.check_raise(raise, location, &mut out),
            Step::TryCatch(try_catch) => self.check_try_catch(try_catch, location, &mut out),
        }
        out
    }

    fn check_action(&self, action: &ActionStep, location: &StepLocation, out: &mut Vec<Diagnostic>) {
        if action.action_name.trim().is_empty() {
            out.push(missing(location, "action.action_name", "action_name"));
        } else if let Some(problem) = check_action_name(&action.action_name) {
            out.push(
                Diagnostic::error(
                    Category::Naming,
                    error_codes::INVALID_ACTION_NAME,
                    format!("{}: {}", location.label, problem),
                )
                .at(field_path(location, "action.action_name")),
            );
        }

        self.check_output_key(&action.output_key, location, "action.output_key", true, out);

        if let Some(json) = &action.user_provided_json_output {
            check_json_output(json, location, "action", out);
        }

        if let Some(delay) = action
            .delay_config
            .as_ref()
            .and_then(|config| config.get("delay_seconds"))
        {
            if coerce_int(delay).is_none() {
                out.push(
                    Diagnostic::warning(
                        error_codes::INVALID_DELAY,
                        format!(
                            "{}: delay_seconds {} is not an integer and will be written as 0",
                            location.label, delay
                        ),
                    )
                    .at(field_path(location, "action.delay_config.delay_seconds")),
                );
            }
        }

        check_description(action.description.as_deref(), location, "action", out);
    }

    fn check_script(&self, script: &ScriptStep, location: &StepLocation, out: &mut Vec<Diagnostic>) {
        if script.code.trim().is_empty() {
            out.push(missing(location, "script.code", "code"));
        } else {
            let names = script.input_args.keys().map(String::as_str);
            for issue in self.apithon.validate_with_names(&script.code, names) {
                let message = format!("{}: {}", location.label, issue);
                let diagnostic = if issue.is_error() {
                    Diagnostic::error(Category::Apithon, error_codes::APITHON_VIOLATION, message)
                } else {
                    Diagnostic::warning(error_codes::APITHON_WARNING, message)
                };
                out.push(diagnostic.at(field_path(location, "script.code")));
            }
        }

        self.check_output_key(&script.output_key, location, "script.output_key", true, out);

        if let Some(json) = &script.user_provided_json_output {
            check_json_output(json, location, "script", out);
        }

        check_description(script.description.as_deref(), location, "script", out);
    }

    fn check_switch(&self, switch: &SwitchStep, location: &StepLocation, out: &mut Vec<Diagnostic>) {
        if switch.cases.is_empty() && switch.default.is_none() {
            out.push(
                Diagnostic::error(
                    Category::Generic,
                    error_codes::INVALID_STRUCTURE,
                    format!("{}: switch needs at least one case or a default", location.label),
                )
                .at(field_path(location, "switch")),
            );
        }

        for (i, case) in switch.cases.iter().enumerate() {
            if case.condition.trim().is_empty() {
                out.push(missing(
                    location,
                    &format!("switch.cases[{}].condition", i),
                    &format!("case {} condition", i + 1),
                ));
            }
            if case.steps.is_empty() {
                out.push(
                    Diagnostic::warning(
                        error_codes::EMPTY_BRANCH,
                        format!("{}: switch case {} has no steps", location.label, i + 1),
                    )
                    .at(field_path(location, &format!("switch.cases[{}].steps", i))),
                );
            }
        }

        if let Some(default) = &switch.default {
            if default.steps.is_empty() {
                out.push(
                    Diagnostic::warning(
                        error_codes::EMPTY_BRANCH,
                        format!("{}: switch default has no steps", location.label),
                    )
                    .at(field_path(location, "switch.default.steps")),
                );
            }
        }

        self.check_output_key(&switch.output_key, location, "output_key", false, out);
    }

    fn check_for_loop(&self, for_loop: &ForLoopStep, location: &StepLocation, out: &mut Vec<Diagnostic>) {
        self.check_loop_header(
            LoopHeader {
                each: &for_loop.each,
                index: for_loop.index.as_deref(),
                in_source: &for_loop.in_source,
                output_key: &for_loop.output_key,
                body_len: for_loop.steps.len(),
            },
            location,
            "for",
            out,
        );
    }

    fn check_parallel(&self, parallel: &ParallelStep, location: &StepLocation, out: &mut Vec<Diagnostic>) {
        match &parallel.mode {
            ParallelMode::ForLoop(for_loop) => self.check_loop_header(
                LoopHeader {
                    each: &for_loop.each,
                    index: for_loop.index.as_deref(),
                    in_source: &for_loop.in_source,
                    output_key: &for_loop.output_key,
                    body_len: for_loop.steps.len(),
                },
                location,
                "parallel.for",
                out,
            ),
            ParallelMode::Branches(branches) => {
                if branches.is_empty() {
                    out.push(
                        Diagnostic::error(
                            Category::Generic,
                            error_codes::INVALID_STRUCTURE,
                            format!("{}: parallel needs at least one branch", location.label),
                        )
                        .at(field_path(location, "parallel.branches")),
                    );
                }
                for (i, branch) in branches.iter().enumerate() {
                    if branch.steps.is_empty() {
                        out.push(
                            Diagnostic::error(
                                Category::Generic,
                                error_codes::EMPTY_BRANCH,
                                format!("{}: parallel branch {} has no steps", location.label, i + 1),
                            )
                            .at(field_path(location, &format!("parallel.branches[{}].steps", i))),
                        );
                    }
                }
                self.check_output_key(&parallel.output_key, location, "output_key", false, out);
            }
        }
    }

    fn check_loop_header(
        &self,
        header: LoopHeader<'_>,
        location: &StepLocation,
        prefix: &str,
        out: &mut Vec<Diagnostic>,
    ) {
        if header.each.trim().is_empty() {
            out.push(missing(location, &format!("{}.each", prefix), "each"));
        } else {
            check_loop_variable(header.each, location, &format!("{}.each", prefix), out);
        }
        if let Some(index) = header.index.filter(|index| !index.trim().is_empty()) {
            check_loop_variable(index, location, &format!("{}.index", prefix), out);
        }

        let in_path = format!("{}.in", prefix);
        if header.in_source.trim().is_empty() {
            out.push(missing(location, &in_path, "in_source"));
        } else if !is_data_reference(header.in_source) {
            out.push(
                Diagnostic::warning(
                    error_codes::SUSPICIOUS_LOOP_SOURCE,
                    format!(
                        "{}: loop source '{}' is not a data. or meta_info. reference",
                        location.label, header.in_source
                    ),
                )
                .at(field_path(location, &in_path)),
            );
        }

        self.check_output_key(
            header.output_key,
            location,
            &format!("{}.output_key", prefix),
            true,
            out,
        );

        if header.body_len == 0 {
            out.push(
                Diagnostic::error(
                    Category::Generic,
                    error_codes::INVALID_STRUCTURE,
                    format!("{}: loop needs at least one step", location.label),
                )
                .at(field_path(location, &format!("{}.steps", prefix))),
            );
        }
    }

    fn check_return(&self, ret: &ReturnStep, location: &StepLocation, out: &mut Vec<Diagnostic>) {
        if ret.output_mapper.is_empty() {
            out.push(missing(location, "return.output_mapper", "output_mapper"));
        }
    }

    fn check_raise(&self, raise: &RaiseStep, location: &StepLocation, out: &mut Vec<Diagnostic>) {
        if raise.message.as_deref().map_or(true, |m| m.trim().is_empty()) {
            out.push(
                Diagnostic::suggestion(
                    error_codes::MISSING_RAISE_MESSAGE,
                    format!("{}: add a message to explain why the workflow stops", location.label),
                )
                .at(field_path(location, "raise.message")),
            );
        }
        self.check_output_key(&raise.output_key, location, "raise.output_key", false, out);
    }

    fn check_try_catch(&self, try_catch: &TryCatchStep, location: &StepLocation, out: &mut Vec<Diagnostic>) {
        if try_catch.try_steps.is_empty() {
            out.push(
                Diagnostic::error(
                    Category::Generic,
                    error_codes::INVALID_STRUCTURE,
                    format!("{}: try block needs at least one step", location.label),
                )
                .at(field_path(location, "try_catch.try.steps")),
            );
        }

        let catch = match &try_catch.catch_block {
            Some(catch) => catch,
            None => return,
        };
        if catch.steps.is_empty() {
            out.push(
                Diagnostic::error(
                    Category::Generic,
                    error_codes::INVALID_STRUCTURE,
                    format!("{}: catch block needs at least one step", location.label),
                )
                .at(field_path(location, "try_catch.catch.steps")),
            );
        }
        for (i, code) in catch.on_status_code.iter().enumerate() {
            if let Some(message) = status_code_problem(code) {
                out.push(
                    Diagnostic::warning(
                        error_codes::INVALID_STATUS_CODE,
                        format!("{}: {}", location.label, message),
                    )
                    .at(field_path(location, &format!("try_catch.catch.on_status_code[{}]", i))),
                );
            }
        }
    }

    /// Blank keys are an error only where the key is required; `"_"` is always exempt
    fn check_output_key(
        &self,
        key: &str,
        location: &StepLocation,
        wire_field: &str,
        required: bool,
        out: &mut Vec<Diagnostic>,
    ) {
        if key.trim().is_empty() {
            if required {
                out.push(missing(location, wire_field, "output_key"));
            }
            return;
        }
        if key == SENTINEL_OUTPUT_KEY {
            return;
        }

        if let Some(problem) = check_output_key(key, self.strict_output_keys) {
            let suggestion = suggest_output_key(key);
            let code = if problem.is_reserved() {
                error_codes::RESERVED_OUTPUT_KEY
            } else {
                error_codes::INVALID_OUTPUT_KEY
            };
            let path = field_path(location, wire_field);
            out.push(
                Diagnostic::error(
                    Category::Naming,
                    code,
                    format!(
                        "{}: output key '{}' {} (suggested: '{}')",
                        location.label, key, problem, suggestion
                    ),
                )
                .at(path.clone()),
            );
            out.push(
                Diagnostic::suggestion(
                    error_codes::OUTPUT_KEY_SUGGESTION,
                    format!(
                        "{}: rename output key '{}' to '{}'",
                        location.label, key, suggestion
                    ),
                )
                .at(path),
            );
        }
    }

    fn check_duplicate_output_keys(&self, workflow: &Workflow) -> Vec<Diagnostic> {
        let mut by_key: IndexMap<&str, Vec<(StepLocation, &'static str)>> = IndexMap::new();
        for (step, location) in workflow.flatten() {
            if let Some(key) = step.registered_output_key() {
                by_key
                    .entry(key)
                    .or_default()
                    .push((location, output_key_field(step)));
            }
        }

        let mut taken: HashSet<String> = by_key.keys().map(|key| key.to_string()).collect();
        let mut diagnostics = Vec::new();

        for (key, uses) in by_key.iter().filter(|(_, uses)| uses.len() > 1) {
            let labels: Vec<&str> = uses.iter().map(|(loc, _)| loc.label.as_str()).collect();

            let mut renames = Vec::new();
            for (location, wire_field) in &uses[1..] {
                let replacement = dedupe_output_key(key, &taken);
                taken.insert(replacement.clone());
                renames.push((location, *wire_field, replacement));
            }

            let (first_dup, first_field, first_suggestion) = &renames[0];
            diagnostics.push(
                Diagnostic::error(
                    Category::Naming,
                    error_codes::DUPLICATE_OUTPUT_KEY,
                    format!(
                        "Output key '{}' is used by multiple steps: {} (suggested: '{}')",
                        key,
                        labels.join(", "),
                        first_suggestion
                    ),
                )
                .at(field_path(first_dup, first_field)),
            );
            for (location, wire_field, replacement) in &renames {
                diagnostics.push(
                    Diagnostic::suggestion(
                        error_codes::OUTPUT_KEY_SUGGESTION,
                        format!(
                            "{}: rename duplicate output key '{}' to '{}'",
                            location.label, key, replacement
                        ),
                    )
                    .at(field_path(location, wire_field)),
                );
            }
        }
        diagnostics
    }
}

struct LoopHeader<'a> {
    each: &'a str,
    index: Option<&'a str>,
    in_source: &'a str,
    output_key: &'a str,
    body_len: usize,
}

fn field_path(location: &StepLocation, wire_field: &str) -> String {
    format!("{}.{}", location.path, wire_field)
}

fn missing(location: &StepLocation, wire_field: &str, field: &str) -> Diagnostic {
    Diagnostic::error(
        Category::MandatoryField,
        error_codes::MISSING_REQUIRED_FIELD,
        format!("{}: {} is required", location.label, field),
    )
    .at(field_path(location, wire_field))
}

/// Wire location of a step's output key, relative to the step
fn output_key_field(step: &Step) -> &'static str {
    match step {
        Step::Action(_) => "action.output_key",
        Step::Script(_) => "script.output_key",
        Step::ForLoop(_) => "for.output_key",
        Step::Parallel(p) if matches!(p.mode, ParallelMode::ForLoop(_)) => "parallel.for.output_key",
        Step::Raise(_) => "raise.output_key",
        _ => "output_key",
    }
}

fn check_loop_variable(name: &str, location: &StepLocation, wire_field: &str, out: &mut Vec<Diagnostic>) {
    if !is_identifier(name) {
        out.push(
            Diagnostic::error(
                Category::Naming,
                error_codes::INVALID_LOOP_VARIABLE,
                format!("{}: loop variable '{}' is not a valid identifier", location.label, name),
            )
            .at(field_path(location, wire_field)),
        );
    }
}

fn check_json_output(json: &JsonOutput, location: &StepLocation, tag: &str, out: &mut Vec<Diagnostic>) {
    if let Some(err) = json.parse_error() {
        out.push(
            Diagnostic::warning(
                error_codes::INVALID_JSON_OUTPUT,
                format!(
                    "{}: user_provided_json_output is not valid JSON ({}); later references cannot be checked against it",
                    location.label, err
                ),
            )
            .at(field_path(location, &format!("{}.user_provided_json_output", tag))),
        );
    }
}

fn check_description(description: Option<&str>, location: &StepLocation, tag: &str, out: &mut Vec<Diagnostic>) {
    if description.map_or(true, |d| d.trim().is_empty()) {
        out.push(
            Diagnostic::suggestion(
                error_codes::MISSING_DESCRIPTION,
                format!("{}: add a description to this {} step", location.label, tag),
            )
            .at(field_path(location, &format!("{}.description", tag))),
        );
    }
}

fn status_code_problem(code: &Value) -> Option<String> {
    match coerce_int(code) {
        Some(status) if (100..=599).contains(&status) => None,
        Some(status) => Some(format!("status code {} is outside 100-599", status)),
        None => Some(format!("status code {} is not an integer", code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Severity;
    use crate::workflow::{ParallelBranch, ParallelForLoop};
    use serde_json::json;

    fn create_test_action(output_key: &str) -> ActionStep {
        ActionStep::new("mw.get_user_by_email", output_key)
            .with_input_arg("email", "data.input_email")
            .with_description("Look up the user")
    }

    fn create_test_script(code: &str, output_key: &str) -> ScriptStep {
        ScriptStep::new(code, output_key).with_description("Compute something")
    }

    fn validate(workflow: &Workflow) -> Vec<Diagnostic> {
        ComplianceValidator::new().validate(workflow)
    }

    fn codes(diagnostics: &[Diagnostic]) -> Vec<&'static str> {
        diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_clean_workflow_has_no_diagnostics() {
        let workflow = Workflow::new()
            .with_step(create_test_action("user_info"))
            .with_step(create_test_script("return data.user_info", "summary"));
        let diagnostics = validate(&workflow);
        assert!(diagnostics.is_empty(), "unexpected diagnostics: {:#?}", diagnostics);
    }

    #[test]
    fn test_blank_required_fields() {
        let workflow = Workflow::new()
            .with_step(ActionStep::new("  ", "").with_description("x"))
            .with_step(ScriptStep::new("", "out").with_description("y"));
        let diagnostics = validate(&workflow);
        let mandatory: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.category == Category::MandatoryField)
            .map(|d| d.message.as_str())
            .collect();
        assert_eq!(
            mandatory,
            vec![
                "Step 1: action_name is required",
                "Step 1: output_key is required",
                "Step 2: code is required",
            ]
        );
        assert_eq!(
            diagnostics[0].path.as_deref(),
            Some("steps[0].action.action_name")
        );
    }

    #[test]
    fn test_output_key_naming_with_suggestion() {
        let workflow = Workflow::new().with_step(create_test_action("userInfo"));
        let diagnostics = validate(&workflow);
        assert_eq!(
            codes(&diagnostics),
            vec![error_codes::INVALID_OUTPUT_KEY, error_codes::OUTPUT_KEY_SUGGESTION]
        );
        assert!(diagnostics[0].message.contains("suggested: 'user_info'"));
        assert_eq!(diagnostics[1].severity, Severity::Suggestion);

        let relaxed = ComplianceValidator::new().with_strict_output_keys(false);
        assert!(relaxed.validate(&workflow).is_empty());
    }

    #[test]
    fn test_reserved_output_key() {
        let workflow = Workflow::new().with_step(create_test_action("data"));
        let diagnostics = validate(&workflow);
        assert_eq!(diagnostics[0].code, error_codes::RESERVED_OUTPUT_KEY);
        assert!(diagnostics[0].message.contains("'data_output'"));
    }

    #[test]
    fn test_duplicate_output_keys_name_every_step() {
        let workflow = Workflow::new()
            .with_step(create_test_action("user"))
            .with_step(create_test_action("user"))
            .with_step(
                TryCatchStep::new(vec![create_test_action("user").into()])
                    .with_catch(vec![json!(404)], vec![RaiseStep::new().with_message("nope").into()]),
            );
        let diagnostics = validate(&workflow);
        let duplicates: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.code == error_codes::DUPLICATE_OUTPUT_KEY)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(
            duplicates[0].message,
            "Output key 'user' is used by multiple steps: Step 1, Step 2, Step 3.1 (suggested: 'user_2')"
        );
        let renames: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.code == error_codes::OUTPUT_KEY_SUGGESTION)
            .map(|d| d.message.as_str())
            .collect();
        assert_eq!(
            renames,
            vec![
                "Step 2: rename duplicate output key 'user' to 'user_2'",
                "Step 3.1: rename duplicate output key 'user' to 'user_3'",
            ]
        );
    }

    #[test]
    fn test_sentinel_output_key_may_repeat() {
        let workflow = Workflow::new()
            .with_step(create_test_action("_"))
            .with_step(create_test_action("_"));
        assert!(validate(&workflow).is_empty());
    }

    #[test]
    fn test_action_name_format() {
        let workflow = Workflow::new().with_step(
            ActionStep::new("mw.", "out").with_description("incomplete name"),
        );
        let diagnostics = validate(&workflow);
        assert_eq!(codes(&diagnostics), vec![error_codes::INVALID_ACTION_NAME]);
        assert_eq!(diagnostics[0].message, "Step 1: action name 'mw.' is incomplete");
    }

    #[test]
    fn test_script_issues_are_split_by_severity() {
        let workflow = Workflow::new()
            .with_step(create_test_script("import os\nreturn mystery(1)", "out"));
        let diagnostics = validate(&workflow);
        let apithon: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.category == Category::Apithon)
            .collect();
        assert_eq!(apithon.len(), 1);
        assert_eq!(
            apithon[0].message,
            "Step 1: Import statements are not allowed in APIthon"
        );
        assert!(diagnostics
            .iter()
            .any(|d| d.code == error_codes::APITHON_WARNING && d.message.contains("mystery")));
    }

    #[test]
    fn test_script_input_args_are_known_names() {
        let script = create_test_script("return helper(1)", "out").with_input_arg("helper", 1);
        let workflow = Workflow::new().with_step(script);
        assert!(validate(&workflow).is_empty());
    }

    #[test]
    fn test_structural_errors() {
        let workflow = Workflow::new()
            .with_step(SwitchStep::new())
            .with_step(ForLoopStep::new("item", "data.items", "results", vec![]))
            .with_step(ParallelStep::branches(vec![]))
            .with_step(TryCatchStep::new(vec![]).with_catch(vec![], vec![]));
        let generic: Vec<_> = validate(&workflow)
            .into_iter()
            .filter(|d| d.category == Category::Generic)
            .map(|d| d.message)
            .collect();
        assert_eq!(
            generic,
            vec![
                "Step 1: switch needs at least one case or a default",
                "Step 2: loop needs at least one step",
                "Step 3: parallel needs at least one branch",
                "Step 4: try block needs at least one step",
                "Step 4: catch block needs at least one step",
            ]
        );
    }

    #[test]
    fn test_switch_case_checks() {
        let switch = SwitchStep::new()
            .with_case("", vec![create_test_action("a").into()])
            .with_case("data.flag", vec![]);
        let diagnostics = validate(&Workflow::new().with_step(switch));
        assert_eq!(
            codes(&diagnostics),
            vec![error_codes::MISSING_REQUIRED_FIELD, error_codes::EMPTY_BRANCH]
        );
        assert_eq!(diagnostics[0].message, "Step 1: case 1 condition is required");
        assert_eq!(diagnostics[1].severity, Severity::Warning);
    }

    #[test]
    fn test_loop_header_checks() {
        let for_loop = ForLoopStep::new("item.name", "items", "results", vec![create_test_action("x").into()])
            .with_index("2i");
        let diagnostics = validate(&Workflow::new().with_step(for_loop));
        assert_eq!(
            codes(&diagnostics),
            vec![
                error_codes::INVALID_LOOP_VARIABLE,
                error_codes::INVALID_LOOP_VARIABLE,
                error_codes::SUSPICIOUS_LOOP_SOURCE,
            ]
        );

        let parallel = ParallelStep::for_loop(ParallelForLoop {
            each: String::new(),
            index: None,
            in_source: "data.items".to_string(),
            output_key: "results".to_string(),
            steps: vec![create_test_action("x").into()],
        });
        let diagnostics = validate(&Workflow::new().with_step(parallel));
        assert_eq!(codes(&diagnostics), vec![error_codes::MISSING_REQUIRED_FIELD]);
        assert_eq!(diagnostics[0].path.as_deref(), Some("steps[0].parallel.for.each"));
    }

    #[test]
    fn test_parallel_branch_without_steps() {
        let parallel = ParallelStep::branches(vec![
            ParallelBranch {
                name: Some("first".into()),
                steps: vec![create_test_action("a").into()],
            },
            ParallelBranch {
                name: None,
                steps: vec![],
            },
        ]);
        let diagnostics = validate(&Workflow::new().with_step(parallel));
        assert_eq!(codes(&diagnostics), vec![error_codes::EMPTY_BRANCH]);
        assert_eq!(diagnostics[0].message, "Step 1: parallel branch 2 has no steps");
    }

    #[test]
    fn test_added_warnings_and_suggestions() {
        let mut delay = crate::workflow::ArgumentMap::new();
        delay.insert("delay_seconds".into(), json!("soon"));
        let action = ActionStep::new("mw.send_message", "sent")
            .with_delay_config(delay)
            .with_json_output("{not json");
        let try_catch = TryCatchStep::new(vec![create_test_action("a").into()])
            .with_catch(vec![json!("404"), json!(42), json!("oops")], vec![RaiseStep::new().into()]);
        let workflow = Workflow::new()
            .with_step(action)
            .with_step(try_catch)
            .with_step(ReturnStep::new());

        let diagnostics = validate(&workflow);
        assert_eq!(
            codes(&diagnostics),
            vec![
                error_codes::INVALID_JSON_OUTPUT,
                error_codes::INVALID_DELAY,
                error_codes::MISSING_DESCRIPTION,
                error_codes::INVALID_STATUS_CODE,
                error_codes::INVALID_STATUS_CODE,
                error_codes::MISSING_RAISE_MESSAGE,
                error_codes::MISSING_REQUIRED_FIELD,
            ]
        );
    }

    #[test]
    fn test_empty_workflow_warns() {
        let diagnostics = validate(&Workflow::new());
        assert_eq!(codes(&diagnostics), vec![error_codes::EMPTY_WORKFLOW]);
    }
}
