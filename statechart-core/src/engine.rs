//! State machine engine - runs an interpreter on its own task.
//!
//! All mutations happen on one run loop. External events arrive through a
//! bounded mailbox and invocation results through a `JoinSet` owned by the
//! loop; both are drained by the same `select!`, so an event is always
//! processed to completion before the next one starts.

use crate::context::Context;
use crate::definition::StateMachineDefinition;
use crate::error::CoreError;
use crate::event::Event;
use crate::machine::{Completion, Interpreter, Step};
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pending `send` calls buffered before callers wait.
    pub mailbox_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

/// Snapshot of the active leaf and context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateMachineOutput {
    pub state: String,
    pub context: Context,
}

enum Command {
    Send {
        event: Event,
        reply: oneshot::Sender<Result<StateMachineOutput, CoreError>>,
    },
}

/// Handle to a running state machine.
///
/// Must be created inside a tokio runtime. Dropping the handle stops the run
/// loop and aborts invocations still in flight.
pub struct StateMachineEngine {
    id: Uuid,
    definition: Arc<StateMachineDefinition>,
    mailbox: mpsc::Sender<Command>,
    output: Arc<watch::Sender<StateMachineOutput>>,
    run_loop: JoinHandle<()>,
}

impl StateMachineEngine {
    /// Creates an engine with the default configuration.
    pub fn new(definition: Arc<StateMachineDefinition>) -> Result<Self, CoreError> {
        Self::with_config(definition, EngineConfig::default())
    }

    /// Creates an engine and enters the initial state.
    ///
    /// Fails outside a tokio runtime, or if an entry action of the initial
    /// cascade fails.
    pub fn with_config(
        definition: Arc<StateMachineDefinition>,
        config: EngineConfig,
    ) -> Result<Self, CoreError> {
        let runtime = Handle::try_current().map_err(|e| CoreError::RuntimeUnavailable {
            reason: e.to_string(),
        })?;
        let id = Uuid::new_v4();
        let (interpreter, step) = Interpreter::start(Arc::clone(&definition))?;

        let (output, _) = watch::channel(interpreter.snapshot());
        let output = Arc::new(output);
        let (mailbox, commands) = mpsc::channel(config.mailbox_capacity.max(1));

        tracing::info!(engine = %id, state = %interpreter.state(), "engine started");

        let mut run_loop = RunLoop {
            id,
            interpreter,
            commands,
            invocations: JoinSet::new(),
            output: Arc::clone(&output),
        };
        run_loop.spawn_invocation(step);
        let run_loop = runtime.spawn(run_loop.run());

        Ok(Self {
            id,
            definition,
            mailbox,
            output,
            run_loop,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn definition(&self) -> &Arc<StateMachineDefinition> {
        &self.definition
    }

    /// Processes an event and returns the resulting snapshot.
    ///
    /// Invocations started by the event keep running after this returns.
    /// An evaluation error leaves the machine unchanged.
    pub async fn send(&self, event: Event) -> Result<StateMachineOutput, CoreError> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(Command::Send { event, reply })
            .await
            .map_err(|_| CoreError::EngineStopped)?;
        response.await.map_err(|_| CoreError::EngineStopped)?
    }

    /// Subscribes to snapshots. The receiver holds the latest snapshot and
    /// is notified of later ones; intermediate values may be skipped.
    pub fn subscribe(&self) -> watch::Receiver<StateMachineOutput> {
        self.output.subscribe()
    }

    /// Returns the latest published snapshot.
    pub fn snapshot(&self) -> StateMachineOutput {
        self.output.borrow().clone()
    }
}

impl Drop for StateMachineEngine {
    fn drop(&mut self) {
        self.run_loop.abort();
    }
}

struct RunLoop {
    id: Uuid,
    interpreter: Interpreter,
    commands: mpsc::Receiver<Command>,
    invocations: JoinSet<Completion>,
    output: Arc<watch::Sender<StateMachineOutput>>,
}

impl RunLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send { event, reply }) => {
                        let result = self.handle(&event);
                        let _ = reply.send(result);
                    }
                    None => break,
                },
                Some(joined) = self.invocations.join_next(), if !self.invocations.is_empty() => {
                    match joined {
                        Ok(completion) => self.deliver(completion),
                        Err(e) => tracing::error!(engine = %self.id, error = %e, "invocation task failed"),
                    }
                }
            }
        }

        tracing::info!(engine = %self.id, "engine stopped");
    }

    fn handle(&mut self, event: &Event) -> Result<StateMachineOutput, CoreError> {
        match self.interpreter.process(event) {
            Ok(step) => {
                self.apply(step);
                Ok(self.interpreter.snapshot())
            }
            Err(e) => {
                tracing::warn!(
                    engine = %self.id,
                    state = %self.interpreter.state(),
                    event = %event.event_type,
                    error = %e,
                    "event rejected"
                );
                Err(e)
            }
        }
    }

    fn deliver(&mut self, completion: Completion) {
        let invoke_id = completion.invoke_id.clone();
        match self.interpreter.complete(completion) {
            Ok(Some(step)) => self.apply(step),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    engine = %self.id,
                    invoke = %invoke_id,
                    error = %e,
                    "invocation result rejected"
                );
            }
        }
    }

    fn apply(&mut self, step: Step) {
        self.spawn_invocation(step);
        self.publish();
    }

    fn spawn_invocation(&mut self, step: Step) {
        if let Some(pending) = step.invocation {
            self.invocations.spawn(pending.run());
        }
    }

    fn publish(&self) {
        let snapshot = self.interpreter.snapshot();
        self.output.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
