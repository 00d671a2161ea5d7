//! Synchronous statechart interpreter.
//!
//! The interpreter owns the active leaf and the context and applies one event
//! at a time. It never runs invocations itself: entering a leaf that invokes
//! returns a [`PendingInvocation`] for the caller to run, and the caller
//! hands the result back through [`Interpreter::complete`].

use crate::action::run_actions;
use crate::context::Context;
use crate::definition::{StateMachineDefinition, Transition};
use crate::engine::StateMachineOutput;
use crate::error::CoreError;
use crate::event::{Event, INIT_EVENT};
use crate::guard::GuardEvaluator;
use crate::invoke::{run_guarded, Invokable, InvokableResult, Payload};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An invocation that must be started by the caller.
pub struct PendingInvocation {
    /// State that declared the invocation.
    pub state_id: String,
    /// Epoch of that state when the invocation started.
    pub epoch: u64,
    pub invoke_id: String,
    pub task: Arc<dyn Invokable>,
    pub input: Payload,
}

impl PendingInvocation {
    /// Runs the task to completion, catching panics.
    pub async fn run(self) -> Completion {
        let result = run_guarded(self.task, self.input).await;
        Completion {
            state_id: self.state_id,
            epoch: self.epoch,
            invoke_id: self.invoke_id,
            result,
        }
    }
}

impl fmt::Debug for PendingInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingInvocation")
            .field("state_id", &self.state_id)
            .field("epoch", &self.epoch)
            .field("invoke_id", &self.invoke_id)
            .field("input", &self.input)
            .finish()
    }
}

/// A finished invocation waiting to be delivered.
#[derive(Debug, Clone)]
pub struct Completion {
    pub state_id: String,
    pub epoch: u64,
    pub invoke_id: String,
    pub result: InvokableResult,
}

impl Completion {
    /// Converts the result into its synthetic event.
    pub fn to_event(&self) -> Event {
        match &self.result {
            InvokableResult::Success { data } => Event::done_invoke(&self.invoke_id, data.clone()),
            InvokableResult::Failure { data, .. } => {
                Event::error_invoke(&self.invoke_id, data.clone())
            }
        }
    }
}

/// Result of processing one event.
#[derive(Debug, Default)]
pub struct Step {
    /// True if a transition was taken.
    pub transitioned: bool,

    /// Invocation declared by the newly entered leaf.
    pub invocation: Option<PendingInvocation>,
}

/// Holds the active leaf and context and applies events to them.
pub struct Interpreter {
    definition: Arc<StateMachineDefinition>,
    state: String,
    context: Context,
    epochs: HashMap<String, u64>,
}

impl Interpreter {
    /// Enters the definition's initial state, cascading down to a leaf.
    pub fn start(definition: Arc<StateMachineDefinition>) -> Result<(Self, Step), CoreError> {
        let event = Event::new(INIT_EVENT);
        let path = ancestry(&definition, &definition.initial)?.to_vec();
        let (leaf, context) = enter(
            &definition,
            &path,
            definition.initial_context.clone(),
            &event,
        )?;

        let mut interpreter = Self {
            definition,
            state: leaf,
            context,
            epochs: HashMap::new(),
        };
        tracing::debug!(state = %interpreter.state, "entered initial state");

        let invocation = interpreter.prepare_invocation(&event);
        Ok((
            interpreter,
            Step {
                transitioned: true,
                invocation,
            },
        ))
    }

    /// Active leaf state id.
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn definition(&self) -> &Arc<StateMachineDefinition> {
        &self.definition
    }

    /// Current invocation epoch of a state.
    pub fn epoch(&self, state_id: &str) -> u64 {
        self.epochs.get(state_id).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> StateMachineOutput {
        StateMachineOutput {
            state: self.state.clone(),
            context: self.context.clone(),
        }
    }

    /// Applies one event.
    ///
    /// On error the state and context are left exactly as they were.
    pub fn process(&mut self, event: &Event) -> Result<Step, CoreError> {
        let Some((declaring, transition)) = self.select(event)? else {
            tracing::debug!(
                state = %self.state,
                event = %event.event_type,
                "no transition for event"
            );
            return Ok(Step::default());
        };

        self.take(&declaring, &transition, event)?;

        Ok(Step {
            transitioned: true,
            invocation: self.prepare_invocation(event),
        })
    }

    /// Delivers an invocation result.
    ///
    /// Returns `Ok(None)` when the invoking state has been exited since the
    /// invocation started; the result is dropped.
    pub fn complete(&mut self, completion: Completion) -> Result<Option<Step>, CoreError> {
        let current = self.epoch(&completion.state_id);
        if current != completion.epoch {
            tracing::debug!(
                state = %completion.state_id,
                invoke = %completion.invoke_id,
                epoch = completion.epoch,
                current,
                "discarding stale invocation result"
            );
            return Ok(None);
        }

        if let InvokableResult::Failure {
            cause: Some(cause), ..
        } = &completion.result
        {
            tracing::debug!(invoke = %completion.invoke_id, %cause, "invocation failed");
        }

        self.process(&completion.to_event()).map(Some)
    }

    /// Finds the transition to take, walking from the active leaf outwards.
    fn select(&self, event: &Event) -> Result<Option<(String, Transition)>, CoreError> {
        let active = ancestry(&self.definition, &self.state)?;

        for level in active.iter().rev() {
            let state = self
                .definition
                .state(level)
                .ok_or_else(|| CoreError::UnknownState {
                    state: level.clone(),
                })?;

            for transition in state.transitions_for(&event.event_type) {
                if GuardEvaluator::evaluate_opt(transition.guard.as_ref(), &self.context, event)? {
                    return Ok(Some((level.clone(), transition.clone())));
                }
            }
        }

        Ok(None)
    }

    /// Runs exit, transition and entry actions on a working context and
    /// commits only if all of them succeed.
    fn take(
        &mut self,
        declaring: &str,
        transition: &Transition,
        event: &Event,
    ) -> Result<(), CoreError> {
        let definition = Arc::clone(&self.definition);
        let active = ancestry(&definition, &self.state)?;
        let source = ancestry(&definition, declaring)?;
        let target = ancestry(&definition, &transition.target)?;

        // Depth of the deepest state that is a proper ancestor of both ends.
        let domain = source
            .iter()
            .zip(target)
            .take_while(|(a, b)| a == b)
            .count()
            .min(source.len() - 1)
            .min(target.len() - 1);

        let exited = &active[domain..];
        let mut ctx = self.context.clone();
        for id in exited.iter().rev() {
            let state = definition
                .state(id)
                .ok_or_else(|| CoreError::UnknownState { state: id.clone() })?;
            ctx = run_actions(&state.on_exit, ctx, event)?;
        }

        ctx = run_actions(&transition.actions, ctx, event)?;

        let (leaf, ctx) = enter(&definition, &target[domain..], ctx, event)?;

        for id in exited {
            *self.epochs.entry(id.clone()).or_default() += 1;
        }

        tracing::debug!(
            from = %self.state,
            to = %leaf,
            event = %event.event_type,
            "transition"
        );
        self.state = leaf;
        self.context = ctx;

        Ok(())
    }

    fn prepare_invocation(&mut self, event: &Event) -> Option<PendingInvocation> {
        let invoke = self.definition.state(&self.state)?.invoke.as_ref()?;

        let input: Payload = invoke
            .input
            .iter()
            .filter_map(|(key, expr)| {
                expr.try_resolve(&self.context, event)
                    .map(|value| (key.clone(), value))
            })
            .collect();

        let epoch = self.epochs.entry(self.state.clone()).or_default();
        *epoch += 1;

        tracing::debug!(
            state = %self.state,
            invoke = %invoke.id,
            epoch = *epoch,
            "starting invocation"
        );

        Some(PendingInvocation {
            state_id: self.state.clone(),
            epoch: *epoch,
            invoke_id: invoke.id.clone(),
            task: Arc::clone(&invoke.task),
            input,
        })
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("state", &self.state)
            .field("context", &self.context)
            .field("epochs", &self.epochs)
            .finish()
    }
}

fn ancestry<'a>(
    definition: &'a StateMachineDefinition,
    id: &str,
) -> Result<&'a [String], CoreError> {
    definition
        .ancestry(id)
        .ok_or_else(|| CoreError::UnknownState {
            state: id.to_string(),
        })
}

/// Enters each state of `path` outermost first, then follows `initial`
/// down to a leaf. Returns the leaf id and the resulting context.
fn enter(
    definition: &StateMachineDefinition,
    path: &[String],
    mut ctx: Context,
    event: &Event,
) -> Result<(String, Context), CoreError> {
    let unknown = |id: &str| CoreError::UnknownState {
        state: id.to_string(),
    };

    let mut current = None;
    for id in path {
        let state = definition.state(id).ok_or_else(|| unknown(id))?;
        ctx = run_actions(&state.on_entry, ctx, event)?;
        current = Some(state);
    }

    let mut state = current.ok_or_else(|| unknown(""))?;
    while let Some(initial) = &state.initial {
        state = definition.state(initial).ok_or_else(|| unknown(initial))?;
        ctx = run_actions(&state.on_entry, ctx, event)?;
    }

    Ok((state.id.clone(), ctx))
}
