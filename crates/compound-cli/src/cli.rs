//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Validate, generate and inspect Compound Action workflows
#[derive(Parser, Debug)]
#[command(name = "compound", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON); defaults to ./compound.* when present
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "warn,compound_dsl=trace"
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a workflow and print the report; exits with 1 when it has errors
    Validate {
        /// Workflow file: model JSON (.json) or compound action YAML (.yaml/.yml)
        workflow: PathBuf,

        /// JSON object of inputs available when the workflow starts
        #[arg(long)]
        inputs: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },

    /// Write a workflow as compound action YAML
    Generate {
        workflow: PathBuf,

        /// Top-level action_name; overrides the configured default
        #[arg(long)]
        action_name: Option<String>,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Serialize even when validation finds errors
        #[arg(long)]
        skip_validation: bool,
    },

    /// Run the APIthon checks on a script file
    CheckScript { script: PathBuf },

    /// Read compound action YAML and print the workflow model as JSON
    Parse { yaml: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate_arguments() {
        let cli = Cli::parse_from([
            "compound",
            "--log-filter",
            "debug",
            "generate",
            "flow.json",
            "--action-name",
            "lookup",
            "-o",
            "out.yaml",
        ]);
        assert_eq!(cli.log_filter.as_deref(), Some("debug"));
        match cli.command {
            Command::Generate {
                workflow,
                action_name,
                output,
                skip_validation,
            } => {
                assert_eq!(workflow, PathBuf::from("flow.json"));
                assert_eq!(action_name.as_deref(), Some("lookup"));
                assert_eq!(output, Some(PathBuf::from("out.yaml")));
                assert!(!skip_validation);
            }
            other => panic!("Expected generate, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_defaults_to_text() {
        let cli = Cli::parse_from(["compound", "validate", "flow.yaml"]);
        match cli.command {
            Command::Validate { format, inputs, .. } => {
                assert_eq!(format, ReportFormat::Text);
                assert!(inputs.is_none());
            }
            other => panic!("Expected validate, got {:?}", other),
        }
    }
}
