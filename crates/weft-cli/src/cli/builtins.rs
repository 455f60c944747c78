//! Local stand-ins used by `weft run`: echo invokers and a few built-in
//! functions.

use serde_json::{Map, Value, json};
use weft_core::WorkflowEngine;
use weft_core::workflow::invoker::{AgentInvoker, BoxFuture, InvokerError, ToolInvoker};

/// Replies with the message it was sent, prefixed by the agent name.
pub struct EchoAgent;

impl AgentInvoker for EchoAgent {
    fn invoke(
        &self,
        agent_name: &str,
        message: &str,
        _context: Value,
    ) -> BoxFuture<'_, Result<String, InvokerError>> {
        let reply = format!("[{agent_name}] {message}");
        Box::pin(async move { Ok(reply) })
    }
}

/// Returns the tool name and the arguments it was called with.
pub struct EchoTool;

impl ToolInvoker for EchoTool {
    fn call(&self, tool_name: &str, arguments: Value) -> BoxFuture<'_, Result<Value, InvokerError>> {
        let result = json!({ "tool": tool_name, "arguments": arguments });
        Box::pin(async move { Ok(result) })
    }
}

/// Register `echo`, `sum`, and `fail`.
pub fn register(engine: &WorkflowEngine) {
    engine.register_function("echo", |args| Ok::<_, String>(echo(args)));
    engine.register_function("sum", sum);
    engine.register_function("fail", fail);
}

fn echo(args: Map<String, Value>) -> Value {
    Value::Object(args)
}

/// Sum `values` (an array) or, without it, every numeric parameter.
fn sum(args: Map<String, Value>) -> Result<Value, String> {
    let numbers: Vec<&Value> = match args.get("values") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => return Err(format!("'values' must be an array, got {other}")),
        None => args.values().filter(|v| v.is_number()).collect(),
    };

    let mut total = 0.0;
    for value in numbers {
        total += value
            .as_f64()
            .ok_or_else(|| format!("cannot add non-number {value}"))?;
    }

    if total.fract() == 0.0 && total.abs() < i64::MAX as f64 {
        Ok(json!({ "result": total as i64 }))
    } else {
        Ok(json!({ "result": total }))
    }
}

fn fail(args: Map<String, Value>) -> Result<Value, String> {
    let message = args
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("failed on purpose");
    Err(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn sum_values_array() {
        assert_eq!(sum(args(json!({"values": [1, 2, 3]}))).unwrap(), json!({"result": 6}));
        assert_eq!(
            sum(args(json!({"values": [0.5, 0.25]}))).unwrap(),
            json!({"result": 0.75})
        );
    }

    #[test]
    fn sum_numeric_parameters() {
        let out = sum(args(json!({"a": 2, "b": 40, "label": "x"}))).unwrap();
        assert_eq!(out, json!({"result": 42}));
    }

    #[test]
    fn sum_rejects_bad_input() {
        assert!(sum(args(json!({"values": "nope"}))).is_err());
        assert!(sum(args(json!({"values": [1, "two"]}))).is_err());
    }

    #[test]
    fn fail_uses_message() {
        assert_eq!(fail(args(json!({"message": "bad"}))).unwrap_err(), "bad");
        assert_eq!(fail(Map::new()).unwrap_err(), "failed on purpose");
    }

    #[tokio::test]
    async fn echo_invokers() {
        let reply = EchoAgent
            .invoke("writer", "hello", Value::Null)
            .await
            .unwrap();
        assert_eq!(reply, "[writer] hello");

        let out = EchoTool.call("search", json!({"q": "rust"})).await.unwrap();
        assert_eq!(out, json!({"tool": "search", "arguments": {"q": "rust"}}));
    }
}
