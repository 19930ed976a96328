//! Simulated runtime data visible to a step.
//!
//! A [`DataContext`] is an immutable snapshot: registering a step output
//! returns a new context and leaves the original untouched, so the view a
//! given step had can be kept and inspected on its own.

use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::workflow::SENTINEL_OUTPUT_KEY;

/// Errors raised while resolving a dotted path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The path is well formed but nothing exists at it
    #[error("Path not found: '{path}' (no '{segment}' available)")]
    PathNotFound { path: String, segment: String },

    /// The path itself cannot be parsed
    #[error("Invalid data path: '{0}'")]
    InvalidPath(String),
}

/// A value registered in the context
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEntry {
    /// A concrete value whose shape is checked when walking into it
    Known(Value),
    /// Shape unknown (inferred inputs, loop variables, outputs without an example);
    /// any sub-path resolves
    Opaque,
}

/// Outcome of a successful lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    Value(&'a Value),
    Opaque,
}

/// One segment of a data path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Split `user.emails[0].address` into key/index segments
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, ContextError> {
    let invalid = || ContextError::InvalidPath(path.to_string());
    if path.trim().is_empty() {
        return Err(invalid());
    }

    let mut segments = Vec::new();
    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if key.is_empty() {
            // `[0]` directly after a dot, or an empty segment
            if segments.is_empty() || rest.is_empty() {
                return Err(invalid());
            }
        } else {
            segments.push(PathSegment::Key(key.to_string()));
        }
        while !rest.is_empty() {
            let close = rest.find(']').ok_or_else(invalid)?;
            let index = rest[1..close].trim().parse::<usize>().map_err(|_| invalid())?;
            segments.push(PathSegment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(invalid());
            }
        }
    }
    Ok(segments)
}

/// Inputs and step outputs available at one point of a workflow
#[derive(Debug, Clone, Default)]
pub struct DataContext {
    initial_inputs: Arc<IndexMap<String, ContextEntry>>,
    step_outputs: Arc<IndexMap<String, ContextEntry>>,
}

impl DataContext {
    /// Context seeded with concrete input values
    pub fn new(initial_inputs: IndexMap<String, Value>) -> Self {
        let inputs = initial_inputs
            .into_iter()
            .map(|(name, value)| (name, ContextEntry::Known(value)))
            .collect();
        DataContext {
            initial_inputs: Arc::new(inputs),
            step_outputs: Arc::new(IndexMap::new()),
        }
    }

    /// Context with the given input names, shapes unknown
    pub fn with_input_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .fold(DataContext::default(), |ctx, name| ctx.with_placeholder_input(name))
    }

    pub fn initial_inputs(&self) -> &IndexMap<String, ContextEntry> {
        &self.initial_inputs
    }

    pub fn step_outputs(&self) -> &IndexMap<String, ContextEntry> {
        &self.step_outputs
    }

    /// New snapshot with an input of unknown shape added
    pub fn with_placeholder_input(&self, name: impl Into<String>) -> Self {
        let mut inputs = (*self.initial_inputs).clone();
        inputs.insert(name.into(), ContextEntry::Opaque);
        DataContext {
            initial_inputs: Arc::new(inputs),
            step_outputs: Arc::clone(&self.step_outputs),
        }
    }

    /// New snapshot with an input value added
    pub fn with_input(&self, name: impl Into<String>, value: Value) -> Self {
        let mut inputs = (*self.initial_inputs).clone();
        inputs.insert(name.into(), ContextEntry::Known(value));
        DataContext {
            initial_inputs: Arc::new(inputs),
            step_outputs: Arc::clone(&self.step_outputs),
        }
    }

    /// New snapshot with a step output registered.
    ///
    /// The sentinel key `"_"` and blank keys are never registered.
    pub fn with_step_output(&self, output_key: &str, value: Value) -> Self {
        self.register(output_key, ContextEntry::Known(value))
    }

    /// New snapshot with a step output of unknown shape registered
    pub fn with_opaque_output(&self, output_key: &str) -> Self {
        self.register(output_key, ContextEntry::Opaque)
    }

    fn register(&self, output_key: &str, entry: ContextEntry) -> Self {
        let key = output_key.trim();
        if key.is_empty() || key == SENTINEL_OUTPUT_KEY {
            return self.clone();
        }
        let mut outputs = (*self.step_outputs).clone();
        outputs.insert(key.to_string(), entry);
        DataContext {
            initial_inputs: Arc::clone(&self.initial_inputs),
            step_outputs: Arc::new(outputs),
        }
    }

    /// Top-level entry for a name; step outputs shadow inputs
    pub fn entry(&self, name: &str) -> Option<&ContextEntry> {
        self.step_outputs
            .get(name)
            .or_else(|| self.initial_inputs.get(name))
    }

    /// Walk a dotted path (without the `data.` prefix)
    pub fn resolve(&self, path: &str) -> Result<Resolution<'_>, ContextError> {
        let segments = parse_path(path)?;
        let not_found = |segment: String| ContextError::PathNotFound {
            path: path.to_string(),
            segment,
        };

        let mut segments = segments.into_iter();
        let root = match segments.next() {
            Some(PathSegment::Key(key)) => key,
            _ => return Err(ContextError::InvalidPath(path.to_string())),
        };

        let mut current = match self.entry(&root) {
            Some(ContextEntry::Opaque) => return Ok(Resolution::Opaque),
            Some(ContextEntry::Known(value)) => value,
            None => return Err(not_found(root)),
        };

        for segment in segments {
            current = match (&segment, current) {
                (PathSegment::Key(key), Value::Object(map)) => {
                    map.get(key).ok_or_else(|| not_found(key.clone()))?
                }
                (PathSegment::Index(index), Value::Array(items)) => items
                    .get(*index)
                    .ok_or_else(|| not_found(format!("[{}]", index)))?,
                (PathSegment::Key(key), _) => return Err(not_found(key.clone())),
                (PathSegment::Index(index), _) => return Err(not_found(format!("[{}]", index))),
            };
        }

        Ok(Resolution::Value(current))
    }

    /// Whether `path` resolves in this snapshot
    pub fn is_path_available(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    /// Every path that resolves to a known value, down to `max_depth` segments.
    ///
    /// Opaque entries contribute their top-level name only. Paths are
    /// returned without the `data.` prefix, inputs first.
    pub fn available_paths(&self, max_depth: usize) -> Vec<String> {
        let mut paths = Vec::new();
        let names = self
            .initial_inputs
            .keys()
            .filter(|name| !self.step_outputs.contains_key(*name))
            .chain(self.step_outputs.keys());
        for name in names {
            paths.push(name.clone());
            if let Some(ContextEntry::Known(value)) = self.entry(name) {
                collect_paths(value, name, 1, max_depth, &mut paths);
            }
        }
        paths
    }
}

fn collect_paths(value: &Value, prefix: &str, depth: usize, max_depth: usize, out: &mut Vec<String>) {
    if depth >= max_depth {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = format!("{}.{}", prefix, key);
                out.push(path.clone());
                collect_paths(child, &path, depth + 1, max_depth, out);
            }
        }
        Value::Array(items) => {
            if let Some(first) = items.first() {
                let path = format!("{}[0]", prefix);
                out.push(path.clone());
                collect_paths(first, &path, depth + 1, max_depth, out);
            }
        }
        _ => {}
    }
}
