//! Command implementations
//!
//! Each command writes its result to `out` and reports whether the input was
//! clean. I/O and malformed input are errors; validation findings are not.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use compound_dsl::{
    parse_compound_action, validate_workflow, ApithonValidator, DslError, ValidationReport,
    Workflow, YamlSerializer,
};
use compound_monitoring::LogExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::cli::{Command, ReportFormat};
use crate::config::CompoundConfig;

/// How a command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    /// The command ran but found errors in its input
    Problems,
}

/// A workflow as stored in a model file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,

    #[serde(flatten)]
    pub workflow: Workflow,
}

/// Load a workflow by extension: model JSON, or compound action YAML
pub fn load_workflow(path: &Path) -> Result<WorkflowFile> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("json") => serde_json::from_str(&text)
            .map_err(DslError::from)
            .with_context(|| format!("Invalid workflow JSON in {}", path.display())),
        Some("yaml") | Some("yml") => {
            let action = parse_compound_action(&text)
                .with_context(|| format!("Invalid compound action in {}", path.display()))?;
            Ok(WorkflowFile {
                action_name: Some(action.action_name),
                workflow: action.workflow,
            })
        }
        _ => bail!(
            "Cannot tell the format of {}; use a .json, .yaml or .yml file",
            path.display()
        ),
    }
}

fn load_inputs(path: &Path) -> Result<IndexMap<String, Value>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read inputs file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Inputs file {} must hold a JSON object", path.display()))
}

/// Run one command
pub fn run(command: &Command, config: &CompoundConfig, out: &mut dyn Write) -> Result<Outcome> {
    match command {
        Command::Validate {
            workflow,
            inputs,
            format,
        } => validate(workflow, inputs.as_deref(), *format, config, out),
        Command::Generate {
            workflow,
            action_name,
            output,
            skip_validation,
        } => generate(
            workflow,
            action_name.as_deref(),
            output.as_deref(),
            *skip_validation,
            config,
            out,
        ),
        Command::CheckScript { script } => check_script(script, config, out),
        Command::Parse { yaml } => parse(yaml, out),
    }
}

fn validate(
    path: &Path,
    inputs: Option<&Path>,
    format: ReportFormat,
    config: &CompoundConfig,
    out: &mut dyn Write,
) -> Result<Outcome> {
    let file = load_workflow(path)?;
    let mut options = config.validation_options();
    if let Some(inputs) = inputs {
        options.initial_inputs = load_inputs(inputs)?;
    }

    let report = validate_workflow(&file.workflow, &options);
    info!(file = %path.display(), summary = %report.summary(), "validated workflow");
    write_report(&report, format, out)?;

    Ok(if report.is_valid() {
        Outcome::Clean
    } else {
        Outcome::Problems
    })
}

fn write_report(report: &ValidationReport, format: ReportFormat, out: &mut dyn Write) -> Result<()> {
    match format {
        ReportFormat::Text => writeln!(out, "{}", report)?,
        ReportFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(report)?)?,
    }
    Ok(())
}

fn generate(
    path: &Path,
    action_name: Option<&str>,
    output: Option<&Path>,
    skip_validation: bool,
    config: &CompoundConfig,
    out: &mut dyn Write,
) -> Result<Outcome> {
    let file = load_workflow(path)?;

    if !skip_validation {
        let report = validate_workflow(&file.workflow, &config.validation_options());
        let blocking = report.blocking_errors();
        if !blocking.is_empty() {
            let errors = blocking.into_iter().cloned().collect();
            return Err::<Outcome, _>(DslError::ValidationFailed(errors))
                .log_err("refusing to generate an invalid workflow")
                .with_context(|| format!("{} has validation errors", path.display()));
        }
        for diagnostic in report.all() {
            warn!(file = %path.display(), "{}", diagnostic);
        }
    }

    let mut options = config.serializer_options();
    if let Some(name) = action_name.or(file.action_name.as_deref()) {
        options.action_name = name.to_string();
    }
    let yaml = YamlSerializer::new(options)
        .serialize(&file.workflow)
        .map_err(DslError::from)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;

    match output {
        Some(output) => {
            fs::write(output, &yaml)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!(file = %output.display(), bytes = yaml.len(), "wrote compound action");
        }
        None => out.write_all(yaml.as_bytes())?,
    }
    Ok(Outcome::Clean)
}

fn check_script(path: &Path, config: &CompoundConfig, out: &mut dyn Write) -> Result<Outcome> {
    let code = fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    let validator =
        ApithonValidator::with_limits(config.max_code_bytes, config.byte_limit_warning_margin);
    let issues = validator.validate(&code);

    if issues.is_empty() {
        writeln!(out, "OK: no issues")?;
        return Ok(Outcome::Clean);
    }
    for issue in &issues {
        writeln!(out, "{}: {}", issue.severity(), issue)?;
    }
    Ok(if issues.iter().any(|issue| issue.is_error()) {
        Outcome::Problems
    } else {
        Outcome::Clean
    })
}

fn parse(path: &Path, out: &mut dyn Write) -> Result<Outcome> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let action = parse_compound_action(&text)
        .with_context(|| format!("Invalid compound action in {}", path.display()))?;
    let file = WorkflowFile {
        action_name: Some(action.action_name),
        workflow: action.workflow,
    };
    writeln!(out, "{}", serde_json::to_string_pretty(&file)?)?;
    Ok(Outcome::Clean)
}
