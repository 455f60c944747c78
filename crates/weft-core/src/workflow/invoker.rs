//! Collaborator traits for agent and tool calls.
//!
//! The engine never talks to an LLM or a tool server itself. Hosts implement
//! `AgentInvoker` and `ToolInvoker` and hand them to the engine builder; the
//! agent and tool executors call through these traits. Both are object safe
//! (boxed futures) so the engine can hold them as `Arc<dyn ...>`.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

/// Boxed future returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors reported by agent and tool invokers.
#[derive(Debug, Error)]
pub enum InvokerError {
    /// No invoker of this kind was given to the engine.
    #[error("no {0} invoker configured")]
    NotConfigured(&'static str),

    /// The call reached the collaborator and failed.
    #[error("{0}")]
    Failed(String),
}

/// Sends a message to a named agent and returns its textual reply.
pub trait AgentInvoker: Send + Sync {
    /// `context` carries `execution_id`, `workflow_name`, `task_id` and the
    /// resolved `parameters` of the calling task.
    fn invoke(
        &self,
        agent_name: &str,
        message: &str,
        context: Value,
    ) -> BoxFuture<'_, Result<String, InvokerError>>;
}

/// Calls a named external tool with structured arguments.
pub trait ToolInvoker: Send + Sync {
    fn call(&self, tool_name: &str, arguments: Value) -> BoxFuture<'_, Result<Value, InvokerError>>;
}

/// Agent invoker used when the host configures none. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredAgentInvoker;

impl AgentInvoker for UnconfiguredAgentInvoker {
    fn invoke(
        &self,
        _agent_name: &str,
        _message: &str,
        _context: Value,
    ) -> BoxFuture<'_, Result<String, InvokerError>> {
        Box::pin(async { Err(InvokerError::NotConfigured("agent")) })
    }
}

/// Tool invoker used when the host configures none. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredToolInvoker;

impl ToolInvoker for UnconfiguredToolInvoker {
    fn call(&self, _tool_name: &str, _arguments: Value) -> BoxFuture<'_, Result<Value, InvokerError>> {
        Box::pin(async { Err(InvokerError::NotConfigured("tool")) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unconfigured_invokers_fail() {
        let err = UnconfiguredAgentInvoker
            .invoke("writer", "hi", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no agent invoker configured");

        let err = UnconfiguredToolInvoker
            .call("search", json!({"q": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokerError::NotConfigured("tool")));
    }
}
