//! # statechart-core
//!
//! Hierarchical state machine interpreter.
//!
//! This crate provides:
//! - Typed values, immutable contexts and events
//! - Value expressions (`{context.x}`, `{event.x}`, literals)
//! - Guard expression parsing and evaluation
//! - Entry, exit and transition actions
//! - Definition validation
//! - A synchronous interpreter and an async engine with invocations

pub mod action;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod event;
pub mod guard;
pub mod invoke;
pub mod machine;
pub mod resolve;
pub mod value;

pub use action::{Action, Assign, FnAction, Log, LogSink, MemorySink, TracingSink};
pub use context::Context;
pub use definition::{State, StateMachineDefinition, Transition};
pub use engine::{EngineConfig, StateMachineEngine, StateMachineOutput};
pub use error::CoreError;
pub use event::Event;
pub use guard::{Guard, GuardEvaluator};
pub use invoke::{
    invokable_fn, FnInvokable, Invokable, InvokableDefinition, InvokableResult, Payload,
    WithTimeout,
};
pub use machine::{Completion, Interpreter, PendingInvocation, Step};
pub use resolve::ValueExpr;
pub use value::DataValue;
