//! Host-registered functions callable from `function` tasks.
//!
//! Functions take the task's resolved parameters as a JSON object and return
//! a JSON value. Synchronous and asynchronous callables share one registry;
//! both are stored behind the same boxed-future signature.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use super::invoker::BoxFuture;

/// Error type returned by registered functions.
pub type FunctionError = Box<dyn std::error::Error + Send + Sync>;

type Callable = dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, FunctionError>>
    + Send
    + Sync;

/// A resolved, cheaply clonable handle to a registered function.
#[derive(Clone)]
pub struct FunctionHandle {
    name: Arc<str>,
    callable: Arc<Callable>,
}

impl FunctionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, args: Map<String, Value>) -> Result<Value, FunctionError> {
        (self.callable)(args).await
    }
}

impl std::fmt::Debug for FunctionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionHandle").field("name", &self.name).finish()
    }
}

/// Concurrent name -> function map.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, FunctionHandle>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous function. It runs inline on the calling task.
    pub fn register<F, E>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Map<String, Value>) -> Result<Value, E> + Send + Sync + 'static,
        E: Into<FunctionError>,
    {
        let callable: Arc<Callable> = Arc::new(move |args| {
            let result = f(args).map_err(Into::into);
            Box::pin(async move { result })
        });
        self.insert(name.into(), callable);
    }

    /// Register an asynchronous function.
    pub fn register_async<F, Fut, E>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<FunctionError>,
    {
        let callable: Arc<Callable> = Arc::new(move |args| {
            let fut = f(args);
            Box::pin(async move { fut.await.map_err(Into::into) })
        });
        self.insert(name.into(), callable);
    }

    fn insert(&self, name: String, callable: Arc<Callable>) {
        let handle = FunctionHandle {
            name: Arc::from(name.as_str()),
            callable,
        };
        if self.functions.insert(name.clone(), handle).is_some() {
            tracing::debug!(function = name.as_str(), "replaced registered function");
        }
    }

    pub fn resolve(&self, name: &str) -> Option<FunctionHandle> {
        self.functions.get(name).map(|f| f.value().clone())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|f| f.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
