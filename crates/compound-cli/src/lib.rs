//! Command-line front end for Compound Action workflows.
//!
//! The `compound` binary validates workflow files, writes them as compound
//! action YAML, checks APIthon scripts and reads generated YAML back.

pub mod cli;
pub mod commands;
pub mod config;

pub use cli::{Cli, Command, ReportFormat};
pub use commands::{load_workflow, run, Outcome, WorkflowFile};
pub use config::{CompoundConfig, ConfigError};
