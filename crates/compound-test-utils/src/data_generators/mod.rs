//! Test data generators for Compound Action tooling.
//!
//! This module provides functions for generating APIthon scripts and
//! compound action YAML documents.

mod documents;
mod scripts;

// Re-export all data generators for easy access
pub use documents::*;
pub use scripts::*;
