//! Named store of validated workflow definitions.

use std::sync::Arc;

use dashmap::DashMap;
use weft_types::workflow::WorkflowDefinition;

use super::definition::{DefinitionError, prepare_definition};

/// Concurrent name -> definition map.
///
/// Definitions are validated on the way in and shared immutably afterwards;
/// an execution keeps its `Arc` even if the name is re-registered or removed.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    definitions: DashMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a definition, replacing any previous one of the same name.
    pub fn register(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<Arc<WorkflowDefinition>, DefinitionError> {
        let definition = Arc::new(prepare_definition(definition)?);
        let replaced = self
            .definitions
            .insert(definition.name.clone(), Arc::clone(&definition))
            .is_some();
        tracing::info!(
            workflow = definition.name.as_str(),
            tasks = definition.tasks.len(),
            replaced,
            "registered workflow"
        );
        Ok(definition)
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.definitions.remove(name).is_some();
        if removed {
            tracing::info!(workflow = name, "unregistered workflow");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(name).map(|d| Arc::clone(d.value()))
    }

    /// All definitions, sorted by name.
    pub fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut all: Vec<_> = self
            .definitions
            .iter()
            .map(|d| Arc::clone(d.value()))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::workflow::WorkflowTask;

    fn workflow(name: &str, tasks: Vec<WorkflowTask>) -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new(name);
        def.tasks = tasks;
        def
    }

    #[test]
    fn test_register_and_get() {
        let registry = WorkflowRegistry::new();
        registry
            .register(workflow("alpha", vec![WorkflowTask::function("a", "echo")]))
            .unwrap();

        let def = registry.get("alpha").unwrap();
        assert_eq!(def.tasks.len(), 1);
        assert!(registry.get("beta").is_none());
    }

    #[test]
    fn test_register_invalid_is_not_stored() {
        let registry = WorkflowRegistry::new();
        let err = registry.register(workflow("empty", vec![])).unwrap_err();
        assert!(matches!(err, DefinitionError::EmptyTasks(_)));
        assert!(registry.get("empty").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reregister_replaces_but_old_arc_survives() {
        let registry = WorkflowRegistry::new();
        let first = registry
            .register(workflow("wf", vec![WorkflowTask::function("a", "echo")]))
            .unwrap();
        registry
            .register(workflow(
                "wf",
                vec![
                    WorkflowTask::function("a", "echo"),
                    WorkflowTask::function("b", "echo"),
                ],
            ))
            .unwrap();

        assert_eq!(first.tasks.len(), 1);
        assert_eq!(registry.get("wf").unwrap().tasks.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_sorted_and_unregister() {
        let registry = WorkflowRegistry::new();
        for name in ["charlie", "alpha", "bravo"] {
            registry
                .register(workflow(name, vec![WorkflowTask::function("t", "echo")]))
                .unwrap();
        }
        let names: Vec<String> = registry.list().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);

        assert!(registry.unregister("bravo"));
        assert!(!registry.unregister("bravo"));
        assert_eq!(registry.len(), 2);
    }
}
