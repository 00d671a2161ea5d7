//! # statechart-loader
//!
//! Reads statechart documents (JSON or YAML) into validated
//! [`StateMachineDefinition`](statechart_core::StateMachineDefinition)s.
//!
//! The loader owns everything the core does not: file formats, the action
//! type table and the invokable registry.

pub mod document;
pub mod error;
pub mod loader;

pub use document::{InvokeDocument, MachineDocument, StateDocument, TransitionDocument};
pub use error::LoadError;
pub use loader::{decode_guard, decode_value, ActionDecoder, Loader};
