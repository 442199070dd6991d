//! Runbook parser.
//!
//! Parses YAML runbook manifests into [`Runbook`] structs and rejects
//! structural errors at load time.

use std::collections::HashSet;
use std::path::Path;

use super::Runbook;
use crate::deps::DependencyGraph;
use crate::error::LoadError;

/// Parse a runbook from a file.
pub fn parse_runbook(path: &Path) -> Result<Runbook, LoadError> {
    let content = std::fs::read_to_string(path)
        .map_err(|source| LoadError::Read { path: path.to_path_buf(), source })?;
    parse_runbook_str(&content)
}

/// Parse a runbook from a string.
pub fn parse_runbook_str(content: &str) -> Result<Runbook, LoadError> {
    let runbook: Runbook = serde_yaml::from_str(content)?;
    validate_runbook(&runbook)?;
    Ok(runbook)
}

/// Check if a block id only uses `[A-Za-z0-9_-]`.
pub fn is_valid_block_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate a runbook for structural errors.
fn validate_runbook(runbook: &Runbook) -> Result<(), LoadError> {
    if runbook.blocks.is_empty() {
        return Err(LoadError::Empty);
    }

    let mut seen = HashSet::new();
    for (i, block) in runbook.blocks.iter().enumerate() {
        if block.id.trim().is_empty() {
            return Err(LoadError::EmptyId(i + 1));
        }
        if !is_valid_block_id(&block.id) {
            return Err(LoadError::InvalidId(block.id.clone()));
        }
        if !seen.insert(block.id.as_str()) {
            return Err(LoadError::DuplicateId(block.id.clone()));
        }
    }

    Ok(())
}

/// Non-fatal problems found by linting a runbook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintReport {
    /// Human-readable warnings
    pub warnings: Vec<String>,
    /// Cycle error, if the dependency graph has one
    pub cycle: Option<String>,
}

impl LintReport {
    /// Check if nothing was found.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.cycle.is_none()
    }
}

/// Lint a loaded runbook: unknown references, undefined variables, dangling
/// `inputs` links and cycles.
pub fn lint_runbook(runbook: &Runbook) -> LintReport {
    let mut report = LintReport::default();
    let graph = DependencyGraph::build(runbook.block_bodies());

    for (block, reference) in graph.unknown_references() {
        report
            .warnings
            .push(format!("Block '{block}' references unknown block '{}'", reference.block_id));
    }

    let declared: HashSet<&str> = runbook
        .variables
        .iter()
        .flatten()
        .map(|(name, _)| name.as_str())
        .collect();
    for block in &runbook.blocks {
        for name in super::render::variable_names(&block.body) {
            if !declared.contains(name.as_str()) {
                report
                    .warnings
                    .push(format!("Block '{}' uses undeclared variable '{name}'", block.id));
            }
        }
    }

    for block in &runbook.blocks {
        if let Some(ref inputs) = block.inputs {
            if runbook.block(inputs).is_none() {
                report
                    .warnings
                    .push(format!("Block '{}' takes inputs from unknown block '{inputs}'", block.id));
            }
        }
    }

    if let Err(e) = graph.validate() {
        report.cycle = Some(e.to_string());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_runbook() {
        let yaml = r#"
name: test
blocks:
  - id: step1
    body: echo "hello"
"#;

        let runbook = parse_runbook_str(yaml).unwrap();
        assert_eq!(runbook.name, "test");
        assert_eq!(runbook.blocks.len(), 1);
    }

    #[test]
    fn test_parse_no_blocks_fails() {
        let yaml = r"
name: test
blocks: []
";
        assert!(matches!(parse_runbook_str(yaml), Err(LoadError::Empty)));
    }

    #[test]
    fn test_duplicate_ids_fail() {
        let yaml = r"
name: test
blocks:
  - id: a
    body: 'true'
  - id: a
    body: 'false'
";
        assert!(matches!(parse_runbook_str(yaml), Err(LoadError::DuplicateId(id)) if id == "a"));
    }

    #[test]
    fn test_invalid_ids_fail() {
        let yaml = r"
name: test
blocks:
  - id: 'has space'
    body: 'true'
";
        assert!(matches!(parse_runbook_str(yaml), Err(LoadError::InvalidId(_))));

        let yaml = r"
name: test
blocks:
  - id: ''
    body: 'true'
";
        assert!(matches!(parse_runbook_str(yaml), Err(LoadError::EmptyId(1))));
    }

    #[test]
    fn test_invalid_yaml_fails() {
        assert!(matches!(parse_runbook_str("name: [unclosed"), Err(LoadError::Yaml(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = parse_runbook(Path::new("/no/such/runbook.yaml")).unwrap_err();
        assert!(matches!(err, LoadError::Read { .. }));
    }

    #[test]
    fn test_lint_runbook() {
        let yaml = r"
name: lint
variables:
  Known:
    default: x
blocks:
  - id: a
    body: echo {{ ._blocks.b.outputs.y }} {{ .Known }} {{ .Unknown }}
  - id: b
    body: echo {{ ._blocks.a.outputs.x }} {{ ._blocks.ghost.outputs.z }}
";
        let runbook = parse_runbook_str(yaml).unwrap();
        let report = lint_runbook(&runbook);

        assert!(!report.is_clean());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().any(|w| w.contains("ghost")));
        assert!(report.warnings.iter().any(|w| w.contains("Unknown")));
        assert_eq!(report.cycle.as_deref(), Some("Dependency cycle detected: a -> b -> a"));
    }

    #[test]
    fn test_lint_inputs_link() {
        let yaml = r"
name: forms
blocks:
  - id: region-form
    body: 'true'
  - id: deploy
    inputs: region-form
    body: 'true'
  - id: teardown
    inputs: missing-form
    body: 'true'
";
        let runbook = parse_runbook_str(yaml).unwrap();
        let report = lint_runbook(&runbook);

        assert_eq!(
            report.warnings,
            vec!["Block 'teardown' takes inputs from unknown block 'missing-form'".to_string()]
        );
        assert!(report.cycle.is_none());
    }
}
