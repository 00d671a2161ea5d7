//! Statechart definition types.
//!
//! A definition is a tree of states. Compound states hold substates and name
//! one of them as `initial`; leaf states hold none. Transitions name their
//! target by id and are resolved through the definition when taken, so the
//! tree never contains back-references.
//!
//! ```
//! use statechart_core::{Context, State, StateMachineDefinition, Transition};
//!
//! let definition = StateMachineDefinition::new(
//!     "idle",
//!     vec![
//!         State::new("idle").on("START", Transition::to("running")),
//!         State::new("running").on("STOP", Transition::to("idle")),
//!     ],
//!     Context::new(),
//! )
//! .unwrap();
//!
//! assert!(definition.is_leaf("running"));
//! ```

use crate::action::Action;
use crate::context::Context;
use crate::error::CoreError;
use crate::guard::Guard;
use crate::invoke::InvokableDefinition;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// A transition out of a state.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Target state id.
    pub target: String,

    /// Actions run between the exit and entry actions.
    pub actions: Vec<Arc<dyn Action>>,

    /// Optional guard; absent means always enabled.
    pub guard: Option<Guard>,
}

impl Transition {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            actions: Vec::new(),
            guard: None,
        }
    }

    pub fn with_action(mut self, action: impl Action + 'static) -> Self {
        self.actions.push(Arc::new(action));
        self
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }
}

/// A state in the machine.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub id: String,
    pub on_entry: Vec<Arc<dyn Action>>,
    pub on_exit: Vec<Arc<dyn Action>>,

    /// Candidate transitions per event type, in declared order.
    pub on: BTreeMap<String, Vec<Transition>>,

    pub invoke: Option<InvokableDefinition>,

    /// Initial substate; required exactly when `states` is non-empty.
    pub initial: Option<String>,

    pub states: BTreeMap<String, State>,

    /// Substate ids added more than once through `with_state`.
    duplicates: Vec<String>,
}

impl State {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_entry(mut self, action: impl Action + 'static) -> Self {
        self.on_entry.push(Arc::new(action));
        self
    }

    pub fn with_exit(mut self, action: impl Action + 'static) -> Self {
        self.on_exit.push(Arc::new(action));
        self
    }

    /// Appends a candidate transition for `event`.
    pub fn on(mut self, event: impl Into<String>, transition: Transition) -> Self {
        self.on.entry(event.into()).or_default().push(transition);
        self
    }

    pub fn with_invoke(mut self, invoke: InvokableDefinition) -> Self {
        self.invoke = Some(invoke);
        self
    }

    pub fn with_initial(mut self, initial: impl Into<String>) -> Self {
        self.initial = Some(initial.into());
        self
    }

    /// Adds a substate. Adding an id twice keeps the first state and fails
    /// validation of the definition.
    pub fn with_state(mut self, state: State) -> Self {
        if self.states.contains_key(&state.id) {
            self.duplicates.push(state.id);
        } else {
            self.states.insert(state.id.clone(), state);
        }
        self
    }

    pub fn is_compound(&self) -> bool {
        !self.states.is_empty()
    }

    /// Candidate transitions for an event type declared on this state.
    pub fn transitions_for(&self, event_type: &str) -> &[Transition] {
        self.on.get(event_type).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Validated and indexed machine definition.
#[derive(Debug, Clone)]
pub struct StateMachineDefinition {
    /// Top-level initial state.
    pub initial: String,

    /// Top-level states.
    pub states: BTreeMap<String, State>,

    /// Context a new engine starts with.
    pub initial_context: Context,

    /// State id -> ids from the top level down to the state itself.
    ancestry: HashMap<String, Vec<String>>,
}

impl StateMachineDefinition {
    /// Validates and indexes a definition.
    pub fn new(
        initial: impl Into<String>,
        states: impl IntoIterator<Item = State>,
        initial_context: Context,
    ) -> Result<Self, CoreError> {
        let mut keyed = BTreeMap::new();
        for state in states {
            if keyed.contains_key(&state.id) {
                return Err(duplicate_id(&state.id));
            }
            keyed.insert(state.id.clone(), state);
        }
        Self::from_parts(initial.into(), keyed, initial_context)
    }

    /// Validates and indexes a definition from an already keyed state map.
    pub fn from_parts(
        initial: String,
        states: BTreeMap<String, State>,
        initial_context: Context,
    ) -> Result<Self, CoreError> {
        if states.is_empty() {
            return Err(CoreError::InvalidDefinition {
                reason: "definition has no states".to_string(),
            });
        }

        if !states.contains_key(&initial) {
            return Err(CoreError::InvalidDefinition {
                reason: format!("initial state '{}' not in top-level states", initial),
            });
        }

        let mut ancestry = HashMap::new();
        index_states(&states, &mut Vec::new(), &mut ancestry)?;

        let definition = Self {
            initial,
            states,
            initial_context,
            ancestry,
        };
        definition.validate_targets()?;

        Ok(definition)
    }

    fn validate_targets(&self) -> Result<(), CoreError> {
        for path in self.ancestry.values() {
            let Some(state) = path.last().and_then(|id| self.state(id)) else {
                continue;
            };
            for (event, transitions) in &state.on {
                for t in transitions {
                    if !self.has_state(&t.target) {
                        return Err(CoreError::InvalidDefinition {
                            reason: format!(
                                "transition target '{}' (from '{}' on '{}') does not exist",
                                t.target, state.id, event
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Looks a state up by id anywhere in the tree.
    pub fn state(&self, id: &str) -> Option<&State> {
        let path = self.ancestry.get(id)?;
        let mut level = &self.states;
        let mut found = None;
        for segment in path {
            let state = level.get(segment)?;
            level = &state.states;
            found = Some(state);
        }
        found
    }

    /// Returns ids from the top level down to `id`, inclusive.
    pub fn ancestry(&self, id: &str) -> Option<&[String]> {
        self.ancestry.get(id).map(Vec::as_slice)
    }

    /// Returns the parent id of a nested state.
    pub fn parent(&self, id: &str) -> Option<&str> {
        let path = self.ancestry.get(id)?;
        path.len()
            .checked_sub(2)
            .map(|i| path[i].as_str())
    }

    /// Returns true if the given state exists anywhere in the tree.
    pub fn has_state(&self, id: &str) -> bool {
        self.ancestry.contains_key(id)
    }

    pub fn is_leaf(&self, id: &str) -> bool {
        self.state(id).is_some_and(|s| !s.is_compound())
    }

    /// Returns every event type handled while `id` is active, including
    /// those declared on its ancestors.
    pub fn events_from(&self, id: &str) -> Vec<&str> {
        let mut events = BTreeSet::new();
        for ancestor in self.ancestry(id).unwrap_or(&[]) {
            if let Some(state) = self.state(ancestor) {
                events.extend(state.on.keys().map(String::as_str));
            }
        }
        events.into_iter().collect()
    }

    /// Returns all state ids in the tree.
    pub fn state_ids(&self) -> impl Iterator<Item = &str> {
        self.ancestry.keys().map(String::as_str)
    }
}

fn index_states(
    states: &BTreeMap<String, State>,
    prefix: &mut Vec<String>,
    ancestry: &mut HashMap<String, Vec<String>>,
) -> Result<(), CoreError> {
    for (key, state) in states {
        if key != &state.id {
            return Err(CoreError::InvalidDefinition {
                reason: format!("state '{}' is registered under key '{}'", state.id, key),
            });
        }
        if state.id.is_empty() {
            return Err(CoreError::InvalidDefinition {
                reason: "state id must not be empty".to_string(),
            });
        }

        if let Some(id) = state.duplicates.first() {
            return Err(duplicate_id(id));
        }

        prefix.push(state.id.clone());
        if ancestry.insert(state.id.clone(), prefix.clone()).is_some() {
            return Err(duplicate_id(&state.id));
        }

        match (&state.initial, state.is_compound()) {
            (Some(initial), true) if !state.states.contains_key(initial) => {
                return Err(CoreError::InvalidDefinition {
                    reason: format!(
                        "initial state '{}' of '{}' is not one of its substates",
                        initial, state.id
                    ),
                });
            }
            (None, true) => {
                return Err(CoreError::InvalidDefinition {
                    reason: format!("compound state '{}' has no initial state", state.id),
                });
            }
            (Some(_), false) => {
                return Err(CoreError::InvalidDefinition {
                    reason: format!("leaf state '{}' declares an initial state", state.id),
                });
            }
            _ => {}
        }

        if state.invoke.is_some() && state.is_compound() {
            return Err(CoreError::InvalidDefinition {
                reason: format!("compound state '{}' cannot invoke; move it to a leaf", state.id),
            });
        }

        index_states(&state.states, prefix, ancestry)?;
        prefix.pop();
    }
    Ok(())
}

fn duplicate_id(id: &str) -> CoreError {
    CoreError::InvalidDefinition {
        reason: format!("duplicate state id '{}'", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Assign;
    use crate::resolve::ValueExpr;

    fn sample_definition() -> Result<StateMachineDefinition, CoreError> {
        StateMachineDefinition::new(
            "created",
            vec![
                State::new("created").on("PAY", Transition::to("paid")),
                State::new("paid")
                    .with_initial("packing")
                    .with_state(State::new("packing").on("PACKED", Transition::to("ready")))
                    .with_state(State::new("ready"))
                    .on(
                        "REFUND",
                        Transition::to("refunded")
                            .with_guard(Guard::parse("({context.refundable} == true)").unwrap()),
                    ),
                State::new("refunded")
                    .with_entry(Assign::new("refunded", ValueExpr::literal(true))),
            ],
            Context::new().put("refundable", true),
        )
    }

    #[test]
    fn test_build_definition() {
        let def = sample_definition().unwrap();

        assert_eq!(def.initial, "created");
        assert_eq!(def.states.len(), 3);
        assert_eq!(def.state_ids().count(), 5);
        assert_eq!(def.state("ready").map(|s| s.id.as_str()), Some("ready"));
    }

    #[test]
    fn test_ancestry_and_parent() {
        let def = sample_definition().unwrap();

        assert_eq!(
            def.ancestry("packing").unwrap(),
            &["paid".to_string(), "packing".to_string()]
        );
        assert_eq!(def.parent("packing"), Some("paid"));
        assert_eq!(def.parent("paid"), None);
        assert!(def.ancestry("nope").is_none());
    }

    #[test]
    fn test_leaf_and_compound() {
        let def = sample_definition().unwrap();
        assert!(def.is_leaf("packing"));
        assert!(!def.is_leaf("paid"));
        assert!(!def.is_leaf("missing"));
    }

    #[test]
    fn test_events_include_ancestors() {
        let def = sample_definition().unwrap();
        assert_eq!(def.events_from("packing"), vec!["PACKED", "REFUND"]);
        assert_eq!(def.events_from("created"), vec!["PAY"]);
    }

    #[test]
    fn test_invalid_initial_state() {
        let result = StateMachineDefinition::new("c", vec![State::new("a")], Context::new());
        assert!(matches!(result, Err(CoreError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_invalid_transition_target() {
        let result = StateMachineDefinition::new(
            "a",
            vec![State::new("a").on("GO", Transition::to("c"))],
            Context::new(),
        );
        assert!(matches!(result, Err(CoreError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_compound_requires_valid_initial() {
        let missing = StateMachineDefinition::new(
            "p",
            vec![State::new("p").with_state(State::new("c"))],
            Context::new(),
        );
        assert!(missing.is_err());

        let wrong = StateMachineDefinition::new(
            "p",
            vec![State::new("p")
                .with_initial("x")
                .with_state(State::new("c"))],
            Context::new(),
        );
        assert!(wrong.is_err());

        let leaf_with_initial =
            StateMachineDefinition::new("p", vec![State::new("p").with_initial("x")], Context::new());
        assert!(leaf_with_initial.is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = StateMachineDefinition::new(
            "a",
            vec![
                State::new("a")
                    .with_initial("b")
                    .with_state(State::new("b")),
                State::new("c").with_initial("b").with_state(State::new("b")),
            ],
            Context::new(),
        );
        assert!(matches!(result, Err(CoreError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_duplicate_top_level_ids_rejected() {
        let result = StateMachineDefinition::new(
            "a",
            vec![
                State::new("a").on("GO", Transition::to("b")),
                State::new("b"),
                State::new("a"),
            ],
            Context::new(),
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("duplicate state id 'a'"));
    }

    #[test]
    fn test_duplicate_substate_ids_rejected() {
        let parent = State::new("p")
            .with_initial("x")
            .with_state(State::new("x").on("GO", Transition::to("y")))
            .with_state(State::new("y"))
            .with_state(State::new("x"));
        assert_eq!(parent.states["x"].transitions_for("GO").len(), 1);

        let result = StateMachineDefinition::new("p", vec![parent], Context::new());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("duplicate state id 'x'"));
    }

    #[test]
    fn test_nested_target_resolves() {
        let def = StateMachineDefinition::new(
            "a",
            vec![
                State::new("a").on("DEEP", Transition::to("leaf")),
                State::new("outer")
                    .with_initial("inner")
                    .with_state(State::new("inner").with_initial("leaf").with_state(State::new("leaf"))),
            ],
            Context::new(),
        )
        .unwrap();
        assert_eq!(def.ancestry("leaf").unwrap().len(), 3);
    }
}
