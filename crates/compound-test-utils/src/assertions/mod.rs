//! Assertion utilities for validation reports and serialized documents.
//!
//! Each helper returns a `Result` so tests can chain them with `?` or
//! unwrap them with a readable failure message.

mod document;
mod report;

// Re-export all assertion helpers for easy access
pub use document::*;
pub use report::*;
