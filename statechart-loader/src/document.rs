//! Raw document shapes as read from JSON or YAML.
//!
//! Guards, actions and values stay as `serde_json::Value` here; the
//! [`Loader`](crate::Loader) turns them into core types.

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Top-level machine document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineDocument {
    /// Initial top-level state.
    pub initial: String,

    /// Initial context.
    #[serde(default)]
    pub context: Map<String, Value>,

    pub states: BTreeMap<String, StateDocument>,
}

/// A state and its substates.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateDocument {
    #[serde(default, alias = "onEntry")]
    pub entry: Vec<Value>,

    #[serde(default, alias = "onExit")]
    pub exit: Vec<Value>,

    /// Event type -> candidate transitions.
    #[serde(default)]
    pub on: BTreeMap<String, TransitionList>,

    #[serde(default)]
    pub invoke: Option<InvokeDocument>,

    #[serde(default)]
    pub initial: Option<String>,

    #[serde(default)]
    pub states: BTreeMap<String, StateDocument>,
}

/// A transition object.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionDocument {
    pub target: String,

    /// Guard string or structured guard object.
    #[serde(default)]
    pub guard: Option<Value>,

    #[serde(default)]
    pub actions: Vec<Value>,
}

impl TransitionDocument {
    fn to(target: &str) -> Self {
        Self {
            target: target.to_string(),
            guard: None,
            actions: Vec::new(),
        }
    }
}

/// Candidate transitions for one event. Can be a target string, a single
/// transition object, or an array of either.
#[derive(Debug, Clone, Default)]
pub struct TransitionList(pub Vec<TransitionDocument>);

impl<'de> Deserialize<'de> for TransitionList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer
            .deserialize_any(TransitionVisitor { allow_list: true })
            .map(TransitionList)
    }
}

/// A single transition in string or object form.
struct TransitionEntry(TransitionDocument);

impl<'de> Deserialize<'de> for TransitionEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut transitions =
            deserializer.deserialize_any(TransitionVisitor { allow_list: false })?;
        transitions
            .pop()
            .map(TransitionEntry)
            .ok_or_else(|| de::Error::custom("empty transition"))
    }
}

struct TransitionVisitor {
    allow_list: bool,
}

impl<'de> Visitor<'de> for TransitionVisitor {
    type Value = Vec<TransitionDocument>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        if self.allow_list {
            formatter.write_str("a target string, a transition object, or an array of them")
        } else {
            formatter.write_str("a target string or a transition object")
        }
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(vec![TransitionDocument::to(v)])
    }

    fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let transition =
            TransitionDocument::deserialize(de::value::MapAccessDeserializer::new(map))?;
        Ok(vec![transition])
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        if !self.allow_list {
            return Err(de::Error::invalid_type(de::Unexpected::Seq, &self));
        }
        let mut transitions = Vec::new();
        while let Some(TransitionEntry(t)) = seq.next_element()? {
            transitions.push(t);
        }
        Ok(transitions)
    }
}

/// An invocation declared on a state.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvokeDocument {
    /// Id used in `done.invoke.<id>` / `error.invoke.<id>`. Defaults to `src`.
    #[serde(default)]
    pub id: Option<String>,

    /// Name of a registered invokable.
    pub src: String,

    #[serde(default)]
    pub input: BTreeMap<String, Value>,
}

impl InvokeDocument {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.src)
    }
}
