//! Assertion utilities for serialized compound action documents.

use serde_yaml::Value;

/// Error type for document assertion failures
#[derive(Debug, thiserror::Error)]
pub enum DocumentAssertionError {
    #[error("Document is not valid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("Invalid document structure: {0}")]
    InvalidStructure(String),
    #[error("Top-level keys are {actual:?}, expected {expected:?}")]
    TopLevelKeys {
        actual: Vec<String>,
        expected: Vec<String>,
    },
    #[error("Step tags are {actual:?}, expected {expected:?}")]
    StepTags {
        actual: Vec<String>,
        expected: Vec<String>,
    },
}

/// Parse `yaml` and return its `steps` list
fn steps_of(yaml: &str) -> Result<Vec<Value>, DocumentAssertionError> {
    let document: Value = serde_yaml::from_str(yaml)?;
    document
        .get("steps")
        .and_then(Value::as_sequence)
        .cloned()
        .ok_or_else(|| DocumentAssertionError::InvalidStructure("missing 'steps' list".to_string()))
}

fn mapping_keys(value: &Value) -> Option<Vec<String>> {
    value.as_mapping().map(|map| {
        map.keys()
            .map(|k| k.as_str().unwrap_or_default().to_string())
            .collect()
    })
}

/// Asserts that a document has exactly `action_name` then `steps` at the top level.
pub fn assert_document_shape(yaml: &str) -> Result<(), DocumentAssertionError> {
    let document: Value = serde_yaml::from_str(yaml)?;
    let actual = mapping_keys(&document)
        .ok_or_else(|| DocumentAssertionError::InvalidStructure("root is not a mapping".to_string()))?;
    let expected = vec!["action_name".to_string(), "steps".to_string()];
    if actual != expected {
        return Err(DocumentAssertionError::TopLevelKeys { actual, expected });
    }
    steps_of(yaml).map(|_| ())
}

/// Asserts that every top-level step is a single-key mapping and the keys are `expected`, in order.
///
/// A switch entry may carry `output_key` beside its tag; that key is ignored.
pub fn assert_step_tags(yaml: &str, expected: &[&str]) -> Result<(), DocumentAssertionError> {
    let mut actual = Vec::new();
    for (i, step) in steps_of(yaml)?.iter().enumerate() {
        let keys: Vec<String> = mapping_keys(step)
            .ok_or_else(|| DocumentAssertionError::InvalidStructure(format!("steps[{}] is not a mapping", i)))?
            .into_iter()
            .filter(|k| k != "output_key")
            .collect();
        if keys.len() != 1 {
            return Err(DocumentAssertionError::InvalidStructure(format!(
                "steps[{}] has keys {:?}",
                i, keys
            )));
        }
        actual.extend(keys);
    }
    let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        return Err(DocumentAssertionError::StepTags { actual, expected });
    }
    Ok(())
}
