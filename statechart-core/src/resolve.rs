//! Value expressions and their resolution.
//!
//! A value expression is one of:
//!
//! - `{context.a.b}` - dotted lookup into the machine context
//! - `{event.a.b}` - dotted lookup into the current event's data
//! - anything else - a literal, typed as the most specific parse:
//!   integer, then double, then `true`/`false`, then a `"quoted"` string
//!   (quotes removed), else the raw token as a string

use crate::context::Context;
use crate::error::CoreError;
use crate::event::Event;
use crate::value::DataValue;
use std::fmt;

/// Where a path expression looks its first segment up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Context,
    Event,
}

impl Root {
    fn as_str(self) -> &'static str {
        match self {
            Root::Context => "context",
            Root::Event => "event",
        }
    }
}

/// A parsed value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Literal(DataValue),
    Path { root: Root, segments: Vec<String> },
}

impl ValueExpr {
    /// Parses a single token.
    pub fn parse(token: &str) -> Result<Self, CoreError> {
        let token = token.trim();

        if let Some(body) = token.strip_prefix('{') {
            let body = body.strip_suffix('}').ok_or_else(|| CoreError::InvalidExpression {
                expression: token.to_string(),
                reason: "missing closing '}'".to_string(),
            })?;

            let (root, path) = if let Some(path) = body.strip_prefix("context.") {
                (Root::Context, path)
            } else if let Some(path) = body.strip_prefix("event.") {
                (Root::Event, path)
            } else {
                return Err(CoreError::InvalidExpression {
                    expression: token.to_string(),
                    reason: "reference must start with 'context.' or 'event.'".to_string(),
                });
            };

            let segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();
            if segments.iter().any(|s| s.is_empty()) {
                return Err(CoreError::InvalidExpression {
                    expression: token.to_string(),
                    reason: "empty path segment".to_string(),
                });
            }

            return Ok(ValueExpr::Path { root, segments });
        }

        Ok(ValueExpr::Literal(parse_literal(token)))
    }

    pub fn literal(value: impl Into<DataValue>) -> Self {
        ValueExpr::Literal(value.into())
    }

    /// A `{context.…}` reference built from a dotted path.
    pub fn context(path: &str) -> Self {
        ValueExpr::Path {
            root: Root::Context,
            segments: path.split('.').map(str::to_string).collect(),
        }
    }

    /// An `{event.…}` reference built from a dotted path.
    pub fn event(path: &str) -> Self {
        ValueExpr::Path {
            root: Root::Event,
            segments: path.split('.').map(str::to_string).collect(),
        }
    }

    /// Resolves the expression, failing when a reference does not resolve.
    pub fn resolve(&self, ctx: &Context, event: &Event) -> Result<DataValue, CoreError> {
        self.try_resolve(ctx, event)
            .ok_or_else(|| CoreError::UnresolvedReference {
                reference: self.to_string(),
            })
    }

    /// Resolves the expression, treating a missing reference as absence.
    pub fn try_resolve(&self, ctx: &Context, event: &Event) -> Option<DataValue> {
        match self {
            ValueExpr::Literal(value) => Some(value.clone()),
            ValueExpr::Path { root, segments } => {
                let (first, rest) = segments.split_first()?;
                let start = match root {
                    Root::Context => ctx.get(first),
                    Root::Event => event.get(first),
                }?;
                descend(start, rest).cloned()
            }
        }
    }
}

fn descend<'a>(mut current: &'a DataValue, path: &[String]) -> Option<&'a DataValue> {
    for segment in path {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn parse_literal(token: &str) -> DataValue {
    if let Ok(i) = token.parse::<i64>() {
        return i32::try_from(i)
            .map(DataValue::Int)
            .unwrap_or(DataValue::Long(i));
    }
    // Rust's f64 parser also accepts "inf" and "NaN"; those stay strings.
    if token.chars().any(|c| c.is_ascii_digit()) {
        if let Ok(f) = token.parse::<f64>() {
            return DataValue::Double(f);
        }
    }
    match token {
        "true" => DataValue::Bool(true),
        "false" => DataValue::Bool(false),
        _ => {
            if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
                DataValue::String(token[1..token.len() - 1].to_string())
            } else {
                DataValue::String(token.to_string())
            }
        }
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueExpr::Literal(value) => write!(f, "{}", value),
            ValueExpr::Path { root, segments } => {
                write!(f, "{{{}.{}}}", root.as_str(), segments.join("."))
            }
        }
    }
}
