//! `WorkflowEngine`: the owned facade over registries, executions, and the
//! background supervisor.
//!
//! Every background unit (execution drivers and the monitor) is spawned on
//! the engine's `TaskTracker` and observes the engine's root
//! `CancellationToken`, so `shutdown` can stop and join all of them.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use weft_types::config::EngineConfig;
use weft_types::event::EngineEvent;
use weft_types::execution::{ExecutionFilter, ExecutionSummary, WorkflowExecution};
use weft_types::workflow::WorkflowDefinition;

use crate::event::EventBus;
use crate::workflow::definition::load_workflow_file;
use crate::workflow::executor::DagExecutor;
use crate::workflow::functions::{FunctionError, FunctionRegistry};
use crate::workflow::invoker::{
    AgentInvoker, ToolInvoker, UnconfiguredAgentInvoker, UnconfiguredToolInvoker,
};
use crate::workflow::manager::ExecutionManager;
use crate::workflow::monitor::ExecutionMonitor;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::runner::TaskRunner;
use crate::workflow::step_runner::StepRunner;

pub use crate::workflow::manager::EngineError;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`WorkflowEngine`].
///
/// Invokers default to implementations that fail every call, so workflows
/// that only use functions, conditions, and delays need no setup.
pub struct WorkflowEngineBuilder {
    agents: Arc<dyn AgentInvoker>,
    tools: Arc<dyn ToolInvoker>,
    config: EngineConfig,
}

impl Default for WorkflowEngineBuilder {
    fn default() -> Self {
        Self {
            agents: Arc::new(UnconfiguredAgentInvoker),
            tools: Arc::new(UnconfiguredToolInvoker),
            config: EngineConfig::default(),
        }
    }
}

impl WorkflowEngineBuilder {
    pub fn agent_invoker(mut self, agents: Arc<dyn AgentInvoker>) -> Self {
        self.agents = agents;
        self
    }

    pub fn tool_invoker(mut self, tools: Arc<dyn ToolInvoker>) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Wire the engine and start its monitor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> WorkflowEngine {
        let config = self.config;
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let events = EventBus::new(config.event_capacity);
        let workflows = Arc::new(WorkflowRegistry::new());
        let functions = Arc::new(FunctionRegistry::new());

        let steps = StepRunner::new(self.agents, self.tools, Arc::clone(&functions))
            .with_default_timeout(config.default_task_timeout_secs);
        let runner = TaskRunner::new(Arc::new(steps), events.clone());
        let executor = DagExecutor::new(runner, events.clone());
        let executions = Arc::new(ExecutionManager::new(
            Arc::clone(&workflows),
            executor,
            tracker.clone(),
            shutdown.clone(),
        ));

        let monitor = ExecutionMonitor::new(
            Arc::clone(&executions),
            config.monitor_interval(),
            config.retention(),
        );
        tracker.spawn(monitor.run(shutdown.clone()));

        tracing::info!(
            monitor_interval_secs = config.monitor_interval_secs,
            retention_secs = config.retention_secs,
            "workflow engine started"
        );

        WorkflowEngine {
            config,
            workflows,
            functions,
            executions,
            events,
            tracker,
            shutdown,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Registers workflow definitions and runs them.
pub struct WorkflowEngine {
    config: EngineConfig,
    workflows: Arc<WorkflowRegistry>,
    functions: Arc<FunctionRegistry>,
    executions: Arc<ExecutionManager>,
    events: EventBus,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -- Definitions --

    /// Validate and register a definition, replacing one with the same name.
    pub fn register_workflow(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<Arc<WorkflowDefinition>, EngineError> {
        Ok(self.workflows.register(definition)?)
    }

    /// Load a YAML or JSON definition from disk and register it.
    pub fn register_workflow_file(
        &self,
        path: &Path,
    ) -> Result<Arc<WorkflowDefinition>, EngineError> {
        let definition = load_workflow_file(path)?;
        self.register_workflow(definition)
    }

    pub fn unregister_workflow(&self, name: &str) -> bool {
        self.workflows.unregister(name)
    }

    pub fn get_workflow(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(name)
    }

    /// Registered definitions, sorted by name.
    pub fn list_workflows(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.workflows.list()
    }

    // -- Functions --

    pub fn register_function<F, E>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Map<String, Value>) -> Result<Value, E> + Send + Sync + 'static,
        E: Into<FunctionError>,
    {
        self.functions.register(name, f);
    }

    pub fn register_async_function<F, Fut, E>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<FunctionError>,
    {
        self.functions.register_async(name, f);
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    // -- Executions --

    /// Start a run of a registered workflow. Returns its execution ID
    /// without waiting for it to finish.
    pub fn execute_workflow(
        &self,
        name: &str,
        variables: HashMap<String, Value>,
        execution_id: Option<String>,
    ) -> Result<String, EngineError> {
        self.executions.execute(name, variables, execution_id)
    }

    pub async fn get_execution(&self, execution_id: &str) -> Option<WorkflowExecution> {
        self.executions.get(execution_id).await
    }

    pub async fn get_execution_status(
        &self,
        execution_id: &str,
    ) -> Result<ExecutionSummary, EngineError> {
        self.executions.status(execution_id).await
    }

    /// Cancel a RUNNING execution. `true` only for the call that cancelled it.
    pub async fn cancel_execution(&self, execution_id: &str) -> bool {
        self.executions.cancel(execution_id).await
    }

    pub async fn list_executions(&self, filter: &ExecutionFilter) -> Vec<WorkflowExecution> {
        self.executions.list(filter).await
    }

    pub async fn wait_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<WorkflowExecution, EngineError> {
        self.executions.wait(execution_id).await
    }

    /// Subscribe to lifecycle events of every execution.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // -- Lifecycle --

    /// Stop the monitor, cancel running executions, and wait for every
    /// background unit to exit.
    pub async fn shutdown(&self) {
        tracing::info!(tracked = self.tracker.len(), "shutting down workflow engine");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("workflow engine stopped");
    }
}

impl Drop for WorkflowEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
