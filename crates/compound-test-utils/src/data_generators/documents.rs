//! Generators for compound action YAML documents.

/// Creates a minimal valid compound action document.
pub fn create_minimal_document() -> String {
    r#"action_name: minimal_action
steps:
  - action:
      action_name: mw.ping
      output_key: pong
"#
    .to_string()
}

/// Creates a document with the given action name and one script step per
/// `(code, output_key)` pair.
///
/// Code is written single-quoted, so it must fit on one line.
pub fn create_script_document(action_name: &str, scripts: &[(&str, &str)]) -> String {
    let mut yaml = format!("action_name: {}\nsteps:\n", action_name);
    for (code, output_key) in scripts {
        yaml.push_str(&format!(
            "  - script:\n      code: '{}'\n      output_key: {}\n",
            code.replace('\'', "''"),
            output_key
        ));
    }
    yaml
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_script_document_escapes_quotes() {
        let yaml = create_script_document("demo", &[("return {'a': 1}", "result")]);
        assert!(yaml.contains("code: 'return {''a'': 1}'"), "got:\n{}", yaml);
    }
}
