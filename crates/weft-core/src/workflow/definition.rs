//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts YAML and JSON documents into the canonical `WorkflowDefinition`,
//! validates the structural constraints every registered workflow must meet,
//! and discovers workflow files on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use weft_types::workflow::{WorkflowDefinition, WorkflowTask};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a workflow definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// The definition declares no tasks.
    #[error("workflow '{0}' must have at least one task")]
    EmptyTasks(String),

    /// Two top-level tasks share an ID.
    #[error("duplicate task ID: '{0}'")]
    DuplicateTaskId(String),

    /// A task depends on an ID that is not declared.
    #[error("task '{task_id}' depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: String, dependency: String },

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated, normalized `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    prepare_definition(def)
}

/// Parse a JSON string into a validated, normalized `WorkflowDefinition`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    prepare_definition(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Normalize then validate. Every definition entering the registry goes
/// through here.
pub fn prepare_definition(
    mut def: WorkflowDefinition,
) -> Result<WorkflowDefinition, DefinitionError> {
    normalize_definition(&mut def);
    validate_definition(&def)?;
    Ok(def)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// A definition is rejected when, and only when:
/// - it has no tasks
/// - two top-level tasks share an ID
/// - a `depends_on` entry names an undeclared task
///
/// Cycles are not rejected here; the executor reports them at run time.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if def.tasks.is_empty() {
        return Err(DefinitionError::EmptyTasks(def.name.clone()));
    }

    let mut seen_ids = HashSet::new();
    for task in &def.tasks {
        if !seen_ids.insert(task.id.as_str()) {
            return Err(DefinitionError::DuplicateTaskId(task.id.clone()));
        }
    }

    for task in &def.tasks {
        for dep in &task.depends_on {
            if !seen_ids.contains(dep.as_str()) {
                return Err(DefinitionError::UnknownDependency {
                    task_id: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Deduplicate every `depends_on` list, keeping first occurrences.
pub fn normalize_definition(def: &mut WorkflowDefinition) {
    for task in &mut def.tasks {
        normalize_task(task);
    }
}

fn normalize_task(task: &mut WorkflowTask) {
    let mut seen = HashSet::new();
    task.depends_on.retain(|dep| seen.insert(dep.clone()));
    for nested in &mut task.tasks {
        normalize_task(nested);
    }
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a file, choosing the format by extension.
///
/// `.json` files are parsed as JSON; everything else as YAML.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_workflow_json(&content),
        _ => parse_workflow_yaml(&content),
    }
}

/// Save a workflow definition to a YAML file.
///
/// Creates parent directories if they don't exist.
pub fn save_workflow_file(path: &Path, def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all workflow files (`.yaml`, `.yml`, `.json`) under `base_dir`.
///
/// Files that fail to parse or validate are skipped with a warning.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, DefinitionError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }
        let is_workflow = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json"));
        if !is_workflow {
            continue;
        }
        match load_workflow_file(&path) {
            Ok(def) => results.push((path, def)),
            Err(err) => {
                tracing::warn!(?path, %err, "skipping unparseable workflow file");
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
