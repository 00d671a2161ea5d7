//! Actions run on entry, on exit and during transitions.

use crate::context::Context;
use crate::error::CoreError;
use crate::event::Event;
use crate::resolve::ValueExpr;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Transforms a context given the event being processed.
///
/// Actions must not hold state between calls. An error aborts the event that
/// triggered the action and nothing it produced is kept.
pub trait Action: Send + Sync + fmt::Debug {
    fn execute(&self, ctx: &Context, event: &Event) -> Result<Context, CoreError>;
}

/// Stores a resolved value under `key`, replacing any previous value.
#[derive(Debug, Clone)]
pub struct Assign {
    pub key: String,
    pub value: ValueExpr,
}

impl Assign {
    pub fn new(key: impl Into<String>, value: ValueExpr) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl Action for Assign {
    fn execute(&self, ctx: &Context, event: &Event) -> Result<Context, CoreError> {
        let value = self.value.resolve(ctx, event)?;
        Ok(ctx.put(self.key.clone(), value))
    }
}

/// Destination for [`Log`] messages.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Sends messages to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::info!(target: "statechart::log", "{}", message);
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl LogSink for MemorySink {
    fn log(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

/// Writes a fixed message to a sink. The context passes through unchanged.
#[derive(Clone)]
pub struct Log {
    pub message: String,
    sink: Arc<dyn LogSink>,
}

impl Log {
    /// Logs through `tracing`.
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_sink(message, Arc::new(TracingSink))
    }

    pub fn with_sink(message: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            message: message.into(),
            sink,
        }
    }
}

impl fmt::Debug for Log {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Log").field("message", &self.message).finish()
    }
}

impl Action for Log {
    fn execute(&self, ctx: &Context, _event: &Event) -> Result<Context, CoreError> {
        self.sink.log(&self.message);
        Ok(ctx.clone())
    }
}

/// Adapts a closure into an [`Action`].
pub struct FnAction<F> {
    name: String,
    f: F,
}

impl<F> FnAction<F>
where
    F: Fn(&Context, &Event) -> Result<Context, CoreError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnAction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAction").field("name", &self.name).finish()
    }
}

impl<F> Action for FnAction<F>
where
    F: Fn(&Context, &Event) -> Result<Context, CoreError> + Send + Sync,
{
    fn execute(&self, ctx: &Context, event: &Event) -> Result<Context, CoreError> {
        (self.f)(ctx, event)
    }
}

/// Runs actions in order, threading the context through each.
pub fn run_actions(
    actions: &[Arc<dyn Action>],
    ctx: Context,
    event: &Event,
) -> Result<Context, CoreError> {
    actions
        .iter()
        .try_fold(ctx, |ctx, action| action.execute(&ctx, event))
}
