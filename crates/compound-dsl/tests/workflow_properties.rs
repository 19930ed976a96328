use compound_dsl::apithon::{self, ApithonIssue};
use compound_dsl::validation::{error_codes, Category};
use compound_dsl::workflow::{ActionStep, ForLoopStep, ScriptStep, Workflow};
use compound_dsl::{serialize, validate_workflow, ValidationOptions};
use compound_test_utils::assertions::{
    assert_document_shape, assert_has_diagnostic, assert_no_category, assert_no_errors,
    assert_step_tags,
};
use compound_test_utils::builders::{create_two_step_workflow, WorkflowBuilder};
use compound_test_utils::data_generators::{
    create_multiline_script, create_script_of_size, FORBIDDEN_SNIPPETS,
};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_serialize_is_idempotent() {
    let workflow = compound_test_utils::builders::create_control_flow_workflow();
    let first = serialize(&workflow, Some("tickets")).unwrap();
    let second = serialize(&workflow, Some("tickets")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_single_action_document_shape() {
    let workflow = Workflow::new().with_step(ActionStep::new("mw.ping", "pong"));
    let yaml = serialize(&workflow, None).unwrap();

    assert_document_shape(&yaml).unwrap();
    assert_step_tags(&yaml, &["action"]).unwrap();
}

#[test]
fn test_top_level_return_is_legal() {
    assert!(apithon::validate_syntax("return {'a': 1}").is_empty());
}

#[test]
fn test_syntax_error_reports_original_line() {
    let issues = apithon::validate_syntax("x = ; return 1");
    assert_eq!(issues.len(), 1, "Expected one issue, got {:?}", issues);
    match &issues[0] {
        ApithonIssue::Syntax(err) => assert_eq!(err.line, 1),
        other => panic!("Expected a syntax error, got {:?}", other),
    }

    let issues = apithon::validate_syntax("a = 1\nb = 2\nc = (\nreturn a");
    match issues.as_slice() {
        [ApithonIssue::Syntax(err)] => {
            assert_eq!(err.line, 3, "the unclosed '(' opens on line 3");
            assert_eq!(err.message, "'(' was never closed");
        }
        other => panic!("Expected a single syntax error, got {:?}", other),
    }
}

#[test]
fn test_each_forbidden_construct_is_reported() {
    for (code, keyword) in FORBIDDEN_SNIPPETS {
        let issues = apithon::validate(code);
        assert!(
            issues.iter().any(|issue| issue.message().contains(keyword)),
            "Expected an issue mentioning '{}' for {:?}, got {:?}",
            keyword,
            code,
            issues
        );
    }
}

#[test]
fn test_byte_limit_boundary() {
    let at_limit = apithon::validate(&create_script_of_size(4096));
    assert!(
        !at_limit.iter().any(|i| matches!(i, ApithonIssue::CodeTooLarge { .. })),
        "4096 bytes should be accepted, got {:?}",
        at_limit
    );
    assert!(at_limit.iter().all(|i| !i.is_error()), "got {:?}", at_limit);

    let over_limit = apithon::validate(&create_script_of_size(4100));
    let too_large: Vec<_> = over_limit
        .iter()
        .filter(|i| matches!(i, ApithonIssue::CodeTooLarge { .. }))
        .collect();
    assert_eq!(too_large.len(), 1, "got {:?}", over_limit);
}

#[test]
fn test_dsl_and_literal_quoting() {
    let workflow = WorkflowBuilder::new()
        .action("mw.get_user_by_email", "user_info", &[("email", json!("data.input_email"))])
        .action("mw.wait", "waited", &[("timeout", json!("30"))])
        .build();
    let yaml = serialize(&workflow, None).unwrap();

    assert!(yaml.contains("email: \"data.input_email\"\n"), "got:\n{}", yaml);
    assert!(yaml.contains("timeout: '30'\n"), "got:\n{}", yaml);
}

#[test]
fn test_duplicate_output_keys_name_both_steps() {
    let workflow = WorkflowBuilder::new()
        .action("mw.first", "profile", &[])
        .action("mw.second", "profile", &[])
        .action("mw.third", "_", &[])
        .action("mw.fourth", "_", &[])
        .build();
    let report = validate_workflow(&workflow, &ValidationOptions::default());

    let duplicate = assert_has_diagnostic(&report, error_codes::DUPLICATE_OUTPUT_KEY, "'profile'").unwrap();
    assert_eq!(duplicate.category, Category::Naming);
    assert!(duplicate.message.contains("Step 1"), "{}", duplicate.message);
    assert!(duplicate.message.contains("Step 2"), "{}", duplicate.message);
    assert_eq!(report.naming_errors.len(), 1, "Sentinel keys must not collide: {}", report);
}

#[test]
fn test_forward_reference_from_loop_source() {
    let loop_step = ForLoopStep::new(
        "item",
        "data.step2_output",
        "processed",
        vec![ActionStep::new("mw.process", "_").with_input_arg("item", "data.item").into()],
    );
    let producer = ActionStep::new("mw.produce", "step2_output");

    let forward = Workflow::new().with_step(loop_step.clone()).with_step(producer.clone());
    let report = validate_workflow(&forward, &ValidationOptions::default());
    assert_has_diagnostic(&report, error_codes::UNAVAILABLE_DATA_REFERENCE, "data.step2_output")
        .unwrap();

    let backward = Workflow::new().with_step(producer).with_step(loop_step);
    let report = validate_workflow(&backward, &ValidationOptions::default());
    assert_no_category(&report, Category::DataReference).unwrap();
}

#[test]
fn test_multiline_code_uses_literal_block() {
    let multiline = Workflow::new().with_step(ScriptStep::new(create_multiline_script("items"), "total"));
    let yaml = serialize(&multiline, None).unwrap();
    assert!(yaml.contains("code: |\n"), "got:\n{}", yaml);

    let single = Workflow::new().with_step(ScriptStep::new("return 1", "one"));
    let yaml = serialize(&single, None).unwrap();
    assert!(!yaml.contains("code: |"), "got:\n{}", yaml);
    assert!(yaml.contains("code: return 1\n"), "got:\n{}", yaml);
}

#[test]
fn test_two_step_user_lookup() {
    let workflow = create_two_step_workflow();
    let options = ValidationOptions {
        initial_inputs: [("input_email".to_string(), json!("a@example.com"))]
            .into_iter()
            .collect(),
        ..ValidationOptions::default()
    };

    let report = validate_workflow(&workflow, &options);
    assert_no_category(&report, Category::DataReference).unwrap();
    // "result" is a reserved word; that is the only problem
    assert_has_diagnostic(&report, error_codes::RESERVED_OUTPUT_KEY, "Step 2").unwrap();
    assert_eq!(report.error_count(), 1, "{}", report);

    let yaml = serialize(&workflow, Some("lookup_user")).unwrap();
    assert_step_tags(&yaml, &["action", "script"]).unwrap();
    let action_at = yaml.find("- action:").unwrap();
    let script_at = yaml.find("- script:").unwrap();
    assert!(action_at < script_at);
}

#[test]
fn test_control_flow_workflow_is_valid() {
    let workflow = compound_test_utils::builders::create_control_flow_workflow();
    let report = validate_workflow(&workflow, &ValidationOptions::default());
    assert_no_errors(&report).unwrap();
}
