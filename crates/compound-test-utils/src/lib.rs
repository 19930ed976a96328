//! Testing utilities for Compound Action workflow tooling.
//!
//! This crate provides workflow builders, assertion helpers for validation
//! reports and serialized documents, and generators for APIthon scripts and
//! YAML documents.

pub mod assertions;
pub mod builders;
pub mod data_generators;

pub use assertions::{AssertionError, DocumentAssertionError};
pub use builders::WorkflowBuilder;
