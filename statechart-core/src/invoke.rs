//! Long-running invocations started when a state is entered.
//!
//! An invocation runs on its own task. When it finishes the engine turns the
//! result into a `done.invoke.<id>` or `error.invoke.<id>` event and processes
//! it like any other event, unless the invoking state has been exited in the
//! meantime, in which case the result is discarded.

use crate::resolve::ValueExpr;
use crate::value::DataValue;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Resolved input or result payload of an invocation.
pub type Payload = BTreeMap<String, DataValue>;

/// Outcome of an invocation. Failure is data, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokableResult {
    Success { data: Payload },
    Failure { data: Payload, cause: Option<String> },
}

impl InvokableResult {
    pub fn success(data: Payload) -> Self {
        InvokableResult::Success { data }
    }

    pub fn failure(data: Payload) -> Self {
        InvokableResult::Failure { data, cause: None }
    }

    /// A failure with an `error` entry holding `message`, and the same text as cause.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        let mut data = Payload::new();
        data.insert("error".to_string(), DataValue::String(message.clone()));
        InvokableResult::Failure {
            data,
            cause: Some(message),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InvokableResult::Success { .. })
    }

    pub fn data(&self) -> &Payload {
        match self {
            InvokableResult::Success { data } | InvokableResult::Failure { data, .. } => data,
        }
    }

    fn from_panic(panic: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "invocation panicked".to_string()
        };
        InvokableResult::error(format!("panic: {}", message))
    }
}

/// A unit of asynchronous work a state can invoke.
pub trait Invokable: Send + Sync {
    fn execute(&self, input: Payload) -> BoxFuture<'static, InvokableResult>;
}

/// Runs an invokable, converting a panic anywhere in it into a failure.
pub async fn run_guarded(task: Arc<dyn Invokable>, input: Payload) -> InvokableResult {
    AssertUnwindSafe(async move { task.execute(input).await })
        .catch_unwind()
        .await
        .unwrap_or_else(InvokableResult::from_panic)
}

/// An invocation declared on a state.
#[derive(Clone)]
pub struct InvokableDefinition {
    pub id: String,
    pub task: Arc<dyn Invokable>,
    pub input: BTreeMap<String, ValueExpr>,
}

impl InvokableDefinition {
    pub fn new(id: impl Into<String>, task: Arc<dyn Invokable>) -> Self {
        Self {
            id: id.into(),
            task,
            input: BTreeMap::new(),
        }
    }

    /// Adds an input entry resolved when the invocation starts.
    pub fn with_input(mut self, key: impl Into<String>, value: ValueExpr) -> Self {
        self.input.insert(key.into(), value);
        self
    }
}

impl fmt::Debug for InvokableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokableDefinition")
            .field("id", &self.id)
            .field("input", &self.input)
            .finish()
    }
}

/// Adapts an async closure into an [`Invokable`].
pub struct FnInvokable<F> {
    f: F,
}

impl<F, Fut> FnInvokable<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = InvokableResult> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Invokable for FnInvokable<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = InvokableResult> + Send + 'static,
{
    fn execute(&self, input: Payload) -> BoxFuture<'static, InvokableResult> {
        (self.f)(input).boxed()
    }
}

/// Wraps an async closure as a shareable invokable.
pub fn invokable_fn<F, Fut>(f: F) -> Arc<dyn Invokable>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = InvokableResult> + Send + 'static,
{
    Arc::new(FnInvokable::new(f))
}

/// Races an invokable against a timer and reports a failure on expiry.
pub struct WithTimeout {
    inner: Arc<dyn Invokable>,
    timeout: Duration,
}

impl WithTimeout {
    pub fn new(inner: Arc<dyn Invokable>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl Invokable for WithTimeout {
    fn execute(&self, input: Payload) -> BoxFuture<'static, InvokableResult> {
        let work = self.inner.execute(input);
        let timeout = self.timeout;
        async move {
            match tokio::time::timeout(timeout, work).await {
                Ok(result) => result,
                Err(_) => InvokableResult::error(format!("timed out after {:?}", timeout)),
            }
        }
        .boxed()
    }
}
