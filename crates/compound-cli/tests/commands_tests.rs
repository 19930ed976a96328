use std::fs;
use std::path::{Path, PathBuf};

use compound_cli::{run, Command, CompoundConfig, Outcome, ReportFormat};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const TWO_STEP_JSON: &str = r#"{
  "steps": [
    {"action": {"action_name": "mw.get_user_by_email", "output_key": "user_info",
                "input_args": {"email": "data.input_email"}}},
    {"script": {"code": "return {'x': data.user_info.id}", "output_key": "user_id"}}
  ]
}"#;

fn create_test_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("Failed to write test file");
    path
}

fn run_command(command: Command) -> (anyhow::Result<Outcome>, String) {
    let mut out = Vec::new();
    let result = run(&command, &CompoundConfig::default(), &mut out);
    (result, String::from_utf8(out).expect("output should be UTF-8"))
}

fn generate_to_stdout(workflow: &Path, action_name: Option<&str>) -> (anyhow::Result<Outcome>, String) {
    run_command(Command::Generate {
        workflow: workflow.to_path_buf(),
        action_name: action_name.map(str::to_string),
        output: None,
        skip_validation: false,
    })
}

#[test]
fn test_validate_clean_workflow() {
    let dir = TempDir::new().unwrap();
    let workflow = create_test_file(&dir, "flow.json", TWO_STEP_JSON);
    let inputs = create_test_file(&dir, "inputs.json", r#"{"input_email": "a@example.com"}"#);

    let (result, output) = run_command(Command::Validate {
        workflow,
        inputs: Some(inputs),
        format: ReportFormat::Text,
    });
    assert_eq!(result.unwrap(), Outcome::Clean);
    assert!(output.starts_with("0 errors"), "got:\n{}", output);
}

#[test]
fn test_validate_reports_problems_as_json() {
    let dir = TempDir::new().unwrap();
    let workflow = create_test_file(
        &dir,
        "flow.json",
        r#"{"steps": [{"script": {"code": "import os", "output_key": "Bad-Key"}}]}"#,
    );

    let (result, output) = run_command(Command::Validate {
        workflow,
        inputs: None,
        format: ReportFormat::Json,
    });
    assert_eq!(result.unwrap(), Outcome::Problems);

    let report: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(report["apithon_errors"].as_array().map(Vec::len), Some(1));
    assert_eq!(report["naming_errors"].as_array().map(Vec::len), Some(1));
}

#[test]
fn test_generate_then_parse_round_trip() {
    let dir = TempDir::new().unwrap();
    let workflow = create_test_file(&dir, "flow.json", TWO_STEP_JSON);

    let (result, yaml) = generate_to_stdout(&workflow, Some("lookup_user"));
    assert_eq!(result.unwrap(), Outcome::Clean);
    assert!(yaml.starts_with("action_name: lookup_user\nsteps:\n"), "got:\n{}", yaml);
    assert!(yaml.contains("email: \"data.input_email\"\n"), "got:\n{}", yaml);

    let yaml_path = create_test_file(&dir, "lookup.yaml", &yaml);
    let (result, json) = run_command(Command::Parse { yaml: yaml_path.clone() });
    assert_eq!(result.unwrap(), Outcome::Clean);

    // The parsed model feeds straight back into generate
    let json_path = create_test_file(&dir, "parsed.json", &json);
    let (result, regenerated) = generate_to_stdout(&json_path, None);
    assert_eq!(result.unwrap(), Outcome::Clean);
    assert_eq!(regenerated, yaml);

    let (result, from_yaml) = generate_to_stdout(&yaml_path, None);
    assert_eq!(result.unwrap(), Outcome::Clean);
    assert_eq!(from_yaml, yaml);
}

#[test]
fn test_generate_refuses_invalid_workflow() {
    let dir = TempDir::new().unwrap();
    let workflow = create_test_file(
        &dir,
        "flow.json",
        r#"{"steps": [{"for": {"each": "item", "in_source": "data.items", "output_key": "results", "steps": []}}]}"#,
    );

    let (result, output) = generate_to_stdout(&workflow, None);
    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("validation errors"), "got: {:#}", err);
    assert!(format!("{:#}", err).contains("at least one step"), "got: {:#}", err);
    assert!(output.is_empty());

    let (result, output) = run_command(Command::Generate {
        workflow,
        action_name: None,
        output: None,
        skip_validation: true,
    });
    assert_eq!(result.unwrap(), Outcome::Clean);
    assert!(output.contains("output_key: results\n"), "got:\n{}", output);
}

#[test]
fn test_generate_ignores_advisory_errors() {
    let dir = TempDir::new().unwrap();
    let workflow = create_test_file(
        &dir,
        "flow.json",
        r#"{"steps": [
          {"switch": {"cases": [{"condition": "data.flag == true",
                                 "steps": [{"script": {"code": "import os", "output_key": "2nd"}}]}]}}
        ]}"#,
    );

    // naming, APIthon and data-reference errors are reported but do not block
    let (result, _) = run_command(Command::Validate {
        workflow: workflow.clone(),
        inputs: None,
        format: ReportFormat::Text,
    });
    assert_eq!(result.unwrap(), Outcome::Problems);

    let (result, yaml) = generate_to_stdout(&workflow, None);
    assert_eq!(result.unwrap(), Outcome::Clean);
    assert!(yaml.contains("import os"), "got:\n{}", yaml);
    assert!(yaml.contains("output_key: 2nd\n"), "got:\n{}", yaml);
}

#[test]
fn test_generate_writes_output_file() {
    let dir = TempDir::new().unwrap();
    let workflow = create_test_file(&dir, "flow.json", TWO_STEP_JSON);
    let target = dir.path().join("out.yaml");

    let (result, output) = run_command(Command::Generate {
        workflow,
        action_name: None,
        output: Some(target.clone()),
        skip_validation: false,
    });
    assert_eq!(result.unwrap(), Outcome::Clean);
    assert!(output.is_empty());

    let written = fs::read_to_string(target).unwrap();
    assert!(written.starts_with("action_name: compound_action\n"), "got:\n{}", written);
}

#[test]
fn test_check_script() {
    let dir = TempDir::new().unwrap();
    let clean = create_test_file(&dir, "ok.py", "total = sum(data.values)\nreturn total\n");
    let (result, output) = run_command(Command::CheckScript { script: clean });
    assert_eq!(result.unwrap(), Outcome::Clean);
    assert_eq!(output, "OK: no issues\n");

    let bad = create_test_file(&dir, "bad.py", "import os\nreturn os.getcwd()\n");
    let (result, output) = run_command(Command::CheckScript { script: bad });
    assert_eq!(result.unwrap(), Outcome::Problems);
    assert!(output.contains("error: Import statements are not allowed"), "got:\n{}", output);
}

#[test]
fn test_unknown_extension_is_an_error() {
    let dir = TempDir::new().unwrap();
    let workflow = create_test_file(&dir, "flow.txt", TWO_STEP_JSON);
    let (result, _) = generate_to_stdout(&workflow, None);
    assert!(result.unwrap_err().to_string().contains("Cannot tell the format"));
}
