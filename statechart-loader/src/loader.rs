//! Turns documents into validated definitions.
//!
//! Actions and structured guards are objects tagged by a `type` field. Each
//! action type maps to a decode function in a lookup table; hosts add their
//! own with [`Loader::with_action`].

use crate::document::{InvokeDocument, MachineDocument, StateDocument, TransitionDocument};
use crate::error::LoadError;
use serde::Deserialize;
use serde_json::{Map, Value};
use statechart_core::{
    Action, Assign, Context, DataValue, Guard, Invokable, InvokableDefinition, Log, LogSink,
    State, StateMachineDefinition, Transition, TracingSink, ValueExpr,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Decodes one action object.
pub type ActionDecoder =
    Arc<dyn Fn(&Map<String, Value>, &Loader) -> Result<Arc<dyn Action>, LoadError> + Send + Sync>;

/// Builds definitions from documents, resolving actions and invokables by name.
#[derive(Clone)]
pub struct Loader {
    actions: HashMap<String, ActionDecoder>,
    invokables: HashMap<String, Arc<dyn Invokable>>,
    log_sink: Arc<dyn LogSink>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<_> = self.actions.keys().collect();
        actions.sort();
        let mut invokables: Vec<_> = self.invokables.keys().collect();
        invokables.sort();
        f.debug_struct("Loader")
            .field("actions", &actions)
            .field("invokables", &invokables)
            .finish()
    }
}

impl Loader {
    /// A loader with the built-in `assign` and `log` actions and no invokables.
    pub fn new() -> Self {
        let mut actions: HashMap<String, ActionDecoder> = HashMap::new();
        actions.insert("assign".to_string(), Arc::new(decode_assign));
        actions.insert("log".to_string(), Arc::new(decode_log));

        Self {
            actions,
            invokables: HashMap::new(),
            log_sink: Arc::new(TracingSink),
        }
    }

    /// Registers a decoder for an action type, replacing any existing one.
    pub fn with_action<F>(mut self, action_type: impl Into<String>, decoder: F) -> Self
    where
        F: Fn(&Map<String, Value>, &Loader) -> Result<Arc<dyn Action>, LoadError>
            + Send
            + Sync
            + 'static,
    {
        self.actions.insert(action_type.into(), Arc::new(decoder));
        self
    }

    /// Registers an invokable under the name used by `invoke.src`.
    pub fn with_invokable(mut self, name: impl Into<String>, task: Arc<dyn Invokable>) -> Self {
        self.invokables.insert(name.into(), task);
        self
    }

    /// Sink used by `log` actions.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn log_sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.log_sink)
    }

    /// Loads a JSON document from a string.
    pub fn from_str(&self, json: &str) -> Result<StateMachineDefinition, LoadError> {
        let doc: MachineDocument = serde_json::from_str(json)?;
        self.from_document(doc)
    }

    /// Loads a YAML document from a string.
    pub fn from_yaml_str(&self, yaml: &str) -> Result<StateMachineDefinition, LoadError> {
        let doc: MachineDocument = serde_yaml::from_str(yaml)?;
        self.from_document(doc)
    }

    /// Loads a document from a JSON value.
    pub fn from_json(&self, json: &Value) -> Result<StateMachineDefinition, LoadError> {
        let doc = MachineDocument::deserialize(json)?;
        self.from_document(doc)
    }

    /// Loads a file. `.yaml` and `.yml` files are read as YAML, anything
    /// else as JSON.
    pub fn from_path(&self, path: impl AsRef<Path>) -> Result<StateMachineDefinition, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        tracing::debug!(path = %path.display(), yaml = is_yaml, "loading definition");

        if is_yaml {
            self.from_yaml_str(&text)
        } else {
            self.from_str(&text)
        }
    }

    /// Decodes and validates a parsed document.
    pub fn from_document(
        &self,
        doc: MachineDocument,
    ) -> Result<StateMachineDefinition, LoadError> {
        let context = doc
            .context
            .into_iter()
            .map(|(key, value)| {
                DataValue::try_from(value)
                    .map(|v| (key.clone(), v))
                    .map_err(|e| LoadError::invalid(&format!("context.{}", key), e.to_string()))
            })
            .collect::<Result<Context, LoadError>>()?;

        let states = self.decode_states(doc.states)?;
        let definition = StateMachineDefinition::from_parts(doc.initial, states, context)?;

        tracing::debug!(
            initial = %definition.initial,
            states = definition.state_ids().count(),
            "definition loaded"
        );
        Ok(definition)
    }

    fn decode_states(
        &self,
        states: BTreeMap<String, StateDocument>,
    ) -> Result<BTreeMap<String, State>, LoadError> {
        states
            .into_iter()
            .map(|(id, doc)| {
                let state = self.decode_state(&id, doc)?;
                Ok((id, state))
            })
            .collect()
    }

    fn decode_state(&self, id: &str, doc: StateDocument) -> Result<State, LoadError> {
        let mut state = State::new(id);
        state.on_entry = self.decode_actions(&doc.entry)?;
        state.on_exit = self.decode_actions(&doc.exit)?;
        state.initial = doc.initial;

        for (event, transitions) in doc.on {
            let decoded = transitions
                .0
                .into_iter()
                .map(|t| self.decode_transition(t))
                .collect::<Result<Vec<_>, _>>()?;
            state.on.insert(event, decoded);
        }

        if let Some(invoke) = doc.invoke {
            state.invoke = Some(self.decode_invoke(invoke)?);
        }

        state.states = self.decode_states(doc.states)?;
        Ok(state)
    }

    fn decode_transition(&self, doc: TransitionDocument) -> Result<Transition, LoadError> {
        let mut transition = Transition::to(doc.target);
        transition.actions = self.decode_actions(&doc.actions)?;
        transition.guard = doc.guard.as_ref().map(decode_guard).transpose()?;
        Ok(transition)
    }

    fn decode_invoke(&self, doc: InvokeDocument) -> Result<InvokableDefinition, LoadError> {
        let task = self
            .invokables
            .get(&doc.src)
            .cloned()
            .ok_or_else(|| LoadError::UnknownInvokable {
                src: doc.src.clone(),
            })?;

        let mut invoke = InvokableDefinition::new(doc.id(), task);
        for (key, value) in &doc.input {
            invoke = invoke.with_input(key.clone(), decode_value(value)?);
        }
        Ok(invoke)
    }

    fn decode_actions(&self, actions: &[Value]) -> Result<Vec<Arc<dyn Action>>, LoadError> {
        actions.iter().map(|a| self.decode_action(a)).collect()
    }

    /// Decodes one action object through the lookup table.
    pub fn decode_action(&self, action: &Value) -> Result<Arc<dyn Action>, LoadError> {
        let fields = action
            .as_object()
            .ok_or_else(|| LoadError::invalid("action", "expected an object"))?;
        let action_type = type_tag(fields, "action")?;

        let decoder = self
            .actions
            .get(action_type)
            .ok_or_else(|| LoadError::UnknownActionType {
                action_type: action_type.to_string(),
            })?;
        decoder(fields, self)
    }
}

fn decode_assign(fields: &Map<String, Value>, _loader: &Loader) -> Result<Arc<dyn Action>, LoadError> {
    let key = string_field(fields, "key", "assign action")?;
    let value = fields
        .get("value")
        .ok_or_else(|| LoadError::missing("value", "assign action"))?;
    Ok(Arc::new(Assign::new(key, decode_value(value)?)))
}

fn decode_log(fields: &Map<String, Value>, loader: &Loader) -> Result<Arc<dyn Action>, LoadError> {
    let message = string_field(fields, "message", "log action")?;
    Ok(Arc::new(Log::with_sink(message, loader.log_sink())))
}

/// Decodes a value: strings go through the expression parser, anything
/// else is a literal.
pub fn decode_value(value: &Value) -> Result<ValueExpr, LoadError> {
    match value {
        Value::String(s) => Ok(ValueExpr::parse(s)?),
        other => DataValue::try_from(other.clone())
            .map(ValueExpr::Literal)
            .map_err(|e| LoadError::invalid("value", e.to_string())),
    }
}

/// Decodes a guard string or a structured guard object.
pub fn decode_guard(value: &Value) -> Result<Guard, LoadError> {
    let fields = match value {
        Value::String(s) => return Ok(Guard::parse(s)?),
        Value::Object(fields) => fields,
        _ => return Err(LoadError::invalid("guard", "expected a string or an object")),
    };

    let guard_type = type_tag(fields, "guard")?;
    let operands = || -> Result<(ValueExpr, ValueExpr), LoadError> {
        let left = fields
            .get("left")
            .ok_or_else(|| LoadError::missing("left", format!("{} guard", guard_type)))?;
        let right = fields
            .get("right")
            .ok_or_else(|| LoadError::missing("right", format!("{} guard", guard_type)))?;
        Ok((decode_value(left)?, decode_value(right)?))
    };
    let children = || -> Result<Vec<Guard>, LoadError> {
        let guards = fields
            .get("guards")
            .and_then(Value::as_array)
            .ok_or_else(|| LoadError::missing("guards", format!("{} guard", guard_type)))?;
        if guards.len() < 2 {
            return Err(LoadError::invalid(
                "guards",
                format!("{} guard needs at least two operands", guard_type),
            ));
        }
        guards.iter().map(decode_guard).collect()
    };

    let guard = match guard_type {
        "equals" => operands().map(|(l, r)| Guard::equals(l, r))?,
        "not_equals" => operands().map(|(l, r)| Guard::not_equals(l, r))?,
        "greater_than" => operands().map(|(l, r)| Guard::greater_than(l, r))?,
        "less_than" => operands().map(|(l, r)| Guard::less_than(l, r))?,
        "greater_or_equal" => operands().map(|(l, r)| Guard::greater_or_equal(l, r))?,
        "less_or_equal" => operands().map(|(l, r)| Guard::less_or_equal(l, r))?,
        "and" => Guard::and(children()?),
        "or" => Guard::or(children()?),
        "not" => {
            let inner = fields
                .get("guard")
                .ok_or_else(|| LoadError::missing("guard", "not guard"))?;
            Guard::not(decode_guard(inner)?)
        }
        other => {
            return Err(LoadError::UnknownGuardType {
                guard_type: other.to_string(),
            })
        }
    };
    Ok(guard)
}

fn type_tag<'a>(fields: &'a Map<String, Value>, within: &str) -> Result<&'a str, LoadError> {
    string_field(fields, "type", within)
}

fn string_field<'a>(
    fields: &'a Map<String, Value>,
    field: &str,
    within: &str,
) -> Result<&'a str, LoadError> {
    match fields.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(LoadError::invalid(field, "expected a string")),
        None => Err(LoadError::missing(field, within)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use statechart_core::{
        invokable_fn, CoreError, Event, FnAction, InvokableResult, MemorySink, Payload,
        StateMachineEngine,
    };
    use std::io::Write;
    use std::time::Duration;

    const LOGIN: &str = r#"{
        "initial": "Idle",
        "context": { "attempts": 0 },
        "states": {
            "Idle": {
                "on": {
                    "SUBMIT": {
                        "target": "Loading",
                        "actions": [{ "type": "assign", "key": "user", "value": "{event.username}" }]
                    }
                }
            },
            "Loading": {
                "entry": [{ "type": "log", "message": "logging in" }],
                "invoke": { "id": "login", "src": "login", "input": { "user": "{context.user}" } },
                "on": {
                    "done.invoke.login": "Success",
                    "error.invoke.login": [{
                        "target": "Error",
                        "actions": [{ "type": "assign", "key": "error", "value": "{event.error}" }]
                    }]
                }
            },
            "Success": {},
            "Error": {}
        }
    }"#;

    fn login_task() -> Arc<dyn Invokable> {
        invokable_fn(|input: Payload| async move {
            match input.get("user").and_then(DataValue::as_str) {
                Some("ada") => {
                    let mut data = Payload::new();
                    data.insert("loggedIn".to_string(), DataValue::Bool(true));
                    InvokableResult::success(data)
                }
                _ => InvokableResult::error("Invalid username"),
            }
        })
    }

    async fn run_login(username: &str) -> statechart_core::StateMachineOutput {
        let sink = Arc::new(MemorySink::new());
        let loader = Loader::new()
            .with_invokable("login", login_task())
            .with_log_sink(sink.clone());
        let definition = loader.from_str(LOGIN).unwrap();
        let engine = StateMachineEngine::new(Arc::new(definition)).unwrap();

        engine
            .send(Event::new("SUBMIT").with("username", username))
            .await
            .unwrap();

        let mut rx = engine.subscribe();
        let output = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|o| o.state == "Success" || o.state == "Error"),
        )
        .await
        .expect("timed out")
        .expect("engine stopped")
        .clone();

        assert_eq!(sink.messages(), vec!["logging in".to_string()]);
        output
    }

    #[tokio::test]
    async fn test_login_document_success() {
        let output = run_login("ada").await;
        assert_eq!(output.state, "Success");
        assert_eq!(output.context.get("attempts"), Some(&DataValue::Int(0)));
    }

    #[tokio::test]
    async fn test_login_document_failure() {
        let output = run_login("mallory").await;
        assert_eq!(output.state, "Error");
        assert_eq!(
            output.context.get("error"),
            Some(&DataValue::from("Invalid username"))
        );
    }

    #[test]
    fn test_structured_guard() {
        let guard = decode_guard(&json!({
            "type": "and",
            "guards": [
                { "type": "greater_or_equal", "left": "{context.n}", "right": 3 },
                { "type": "not", "guard": "({context.blocked} == true)" }
            ]
        }))
        .unwrap();

        let ctx = Context::new().put("n", 3).put("blocked", false);
        assert!(guard.evaluate(&ctx, &Event::new("E")).unwrap());
        assert_eq!(
            guard,
            Guard::parse("(({context.n} >= 3) && !({context.blocked} == true))").unwrap()
        );
    }

    #[test]
    fn test_guard_errors() {
        assert!(matches!(
            decode_guard(&json!({ "type": "between", "left": 1, "right": 2 })),
            Err(LoadError::UnknownGuardType { .. })
        ));
        assert!(matches!(
            decode_guard(&json!({ "type": "equals", "left": 1 })),
            Err(LoadError::MissingField { .. })
        ));
        assert!(matches!(
            decode_guard(&json!("((a == b)")),
            Err(LoadError::Definition(CoreError::UnclosedParen { .. }))
        ));
    }

    #[test]
    fn test_unknown_action_type() {
        let result = Loader::new().from_json(&json!({
            "initial": "a",
            "states": { "a": { "entry": [{ "type": "shout" }] } }
        }));
        assert!(matches!(result, Err(LoadError::UnknownActionType { .. })));
    }

    #[test]
    fn test_unknown_invokable() {
        let result = Loader::new().from_str(LOGIN);
        assert!(matches!(
            result,
            Err(LoadError::UnknownInvokable { ref src }) if src == "login"
        ));
    }

    #[test]
    fn test_custom_action() {
        let loader = Loader::new().with_action("clear", |fields, _| {
            let key = fields
                .get("key")
                .and_then(Value::as_str)
                .ok_or_else(|| LoadError::missing("key", "clear action"))?
                .to_string();
            Ok(Arc::new(FnAction::new("clear", move |ctx: &Context, _: &Event| {
                Ok(ctx.remove(&key))
            })) as Arc<dyn Action>)
        });

        let action = loader
            .decode_action(&json!({ "type": "clear", "key": "token" }))
            .unwrap();
        let ctx = Context::new().put("token", "abc");
        let cleared = action.execute(&ctx, &Event::new("E")).unwrap();
        assert!(cleared.get("token").is_none());
    }

    #[test]
    fn test_definition_errors_surface() {
        let result = Loader::new().from_json(&json!({
            "initial": "a",
            "states": { "a": { "on": { "GO": "nowhere" } } }
        }));
        assert!(matches!(
            result,
            Err(LoadError::Definition(CoreError::InvalidDefinition { .. }))
        ));
    }

    #[test]
    fn test_null_context_value_rejected() {
        let result = Loader::new().from_json(&json!({
            "initial": "a",
            "context": { "x": null },
            "states": { "a": {} }
        }));
        assert!(matches!(result, Err(LoadError::InvalidField { .. })));
    }

    #[test]
    fn test_nested_states_and_literals() {
        let definition = Loader::new()
            .from_json(&json!({
                "initial": "outer",
                "states": {
                    "outer": {
                        "initial": "inner",
                        "states": {
                            "inner": {
                                "entry": [{ "type": "assign", "key": "limit", "value": 10 }]
                            }
                        }
                    }
                }
            }))
            .unwrap();

        assert_eq!(definition.parent("inner"), Some("outer"));
        let inner = definition.state("inner").unwrap();
        assert_eq!(inner.on_entry.len(), 1);
    }

    #[test]
    fn test_from_path_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("machine.json");
        std::fs::write(
            &json_path,
            r#"{ "initial": "a", "states": { "a": { "on": { "GO": "b" } }, "b": {} } }"#,
        )
        .unwrap();
        let from_json = Loader::new().from_path(&json_path).unwrap();
        assert!(from_json.has_state("b"));

        let yaml_path = dir.path().join("machine.yaml");
        let mut file = std::fs::File::create(&yaml_path).unwrap();
        writeln!(
            file,
            "initial: a\nstates:\n  a:\n    on:\n      GO:\n        - target: b\n          guard: \"({{event.ok}} == true)\"\n  b: {{}}"
        )
        .unwrap();
        drop(file);

        let from_yaml = Loader::new().from_path(&yaml_path).unwrap();
        let a = from_yaml.state("a").unwrap();
        assert!(a.transitions_for("GO")[0].guard.is_some());
    }

    #[test]
    fn test_missing_file() {
        let result = Loader::new().from_path("/definitely/not/here.json");
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }
}
