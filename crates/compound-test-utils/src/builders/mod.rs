//! Builders for setting up workflows in tests.
//!
//! This module provides a fluent builder for workflows and ready-made
//! workflows for the common scenarios.

mod workflow;

// Re-export all builders for easy access
pub use workflow::*;
