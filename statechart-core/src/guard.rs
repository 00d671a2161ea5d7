//! Guard expression parsing and evaluation.
//!
//! Guards are boolean expressions over value expressions (see
//! [`crate::resolve`]). The expression language supports:
//!
//! - `(a == b)` - equality
//! - `(a != b)` - inequality
//! - `(a > b)`, `(a >= b)`, `(a < b)`, `(a <= b)` - ordering
//! - `((x) && (y))` - logical AND
//! - `((x) || (y))` - logical OR, binds looser than AND
//! - `!(x)` - logical NOT
//!
//! Every expression except a leading `!` must be wrapped in exactly one pair
//! of parentheses, so `{context.a} == 1` on its own is rejected while
//! `({context.a} == 1)` is accepted. The operands of a top-level `&&`/`||`
//! carry their own parentheses: `(a == b) && (c < d)` is accepted.
//!
//! Examples:
//! - `({context.attempts} < 3)`
//! - `(({event.user} != "") && ({context.enabled} == true))`
//! - `!({context.role} == "guest")`

use crate::context::Context;
use crate::error::CoreError;
use crate::event::Event;
use crate::resolve::ValueExpr;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    Equals(ValueExpr, ValueExpr),
    NotEquals(ValueExpr, ValueExpr),
    GreaterThan(ValueExpr, ValueExpr),
    LessThan(ValueExpr, ValueExpr),
    GreaterOrEqual(ValueExpr, ValueExpr),
    LessOrEqual(ValueExpr, ValueExpr),
    And(Vec<Guard>),
    Or(Vec<Guard>),
    Not(Box<Guard>),
}

impl Guard {
    /// Parses a guard expression from a string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::InvalidGuard {
                expression: String::new(),
                reason: "empty guard expression".to_string(),
            });
        }

        let parser = Parser::new(s);
        parser.check_balance()?;
        parser.parse_expr(s)
    }

    pub fn equals(left: ValueExpr, right: ValueExpr) -> Self {
        Guard::Equals(left, right)
    }

    pub fn not_equals(left: ValueExpr, right: ValueExpr) -> Self {
        Guard::NotEquals(left, right)
    }

    pub fn greater_than(left: ValueExpr, right: ValueExpr) -> Self {
        Guard::GreaterThan(left, right)
    }

    pub fn less_than(left: ValueExpr, right: ValueExpr) -> Self {
        Guard::LessThan(left, right)
    }

    pub fn greater_or_equal(left: ValueExpr, right: ValueExpr) -> Self {
        Guard::GreaterOrEqual(left, right)
    }

    pub fn less_or_equal(left: ValueExpr, right: ValueExpr) -> Self {
        Guard::LessOrEqual(left, right)
    }

    pub fn and(guards: Vec<Guard>) -> Self {
        Guard::And(guards)
    }

    pub fn or(guards: Vec<Guard>) -> Self {
        Guard::Or(guards)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(guard: Guard) -> Self {
        Guard::Not(Box::new(guard))
    }

    /// Evaluates the guard against a context and the triggering event.
    ///
    /// `And`/`Or` short-circuit left to right. A comparison between values of
    /// different families fails instead of yielding `false`.
    pub fn evaluate(&self, ctx: &Context, event: &Event) -> Result<bool, CoreError> {
        match self {
            Guard::Equals(l, r) => l.resolve(ctx, event)?.equals(&r.resolve(ctx, event)?),
            Guard::NotEquals(l, r) => Ok(!l.resolve(ctx, event)?.equals(&r.resolve(ctx, event)?)?),
            Guard::GreaterThan(l, r) => ordering(l, r, ctx, event).map(|o| o == Ordering::Greater),
            Guard::LessThan(l, r) => ordering(l, r, ctx, event).map(|o| o == Ordering::Less),
            Guard::GreaterOrEqual(l, r) => {
                ordering(l, r, ctx, event).map(|o| o != Ordering::Less)
            }
            Guard::LessOrEqual(l, r) => ordering(l, r, ctx, event).map(|o| o != Ordering::Greater),
            Guard::And(guards) => {
                for guard in guards {
                    if !guard.evaluate(ctx, event)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Guard::Or(guards) => {
                for guard in guards {
                    if guard.evaluate(ctx, event)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Guard::Not(inner) => Ok(!inner.evaluate(ctx, event)?),
        }
    }
}

fn ordering(
    left: &ValueExpr,
    right: &ValueExpr,
    ctx: &Context,
    event: &Event,
) -> Result<Ordering, CoreError> {
    left.resolve(ctx, event)?
        .compare(&right.resolve(ctx, event)?)
}

impl FromStr for Guard {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Guard::parse(s)
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, guards: &[Guard], op: &str| {
            write!(f, "(")?;
            for (i, guard) in guards.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", guard)?;
            }
            write!(f, ")")
        };

        match self {
            Guard::Equals(l, r) => write!(f, "({} == {})", l, r),
            Guard::NotEquals(l, r) => write!(f, "({} != {})", l, r),
            Guard::GreaterThan(l, r) => write!(f, "({} > {})", l, r),
            Guard::LessThan(l, r) => write!(f, "({} < {})", l, r),
            Guard::GreaterOrEqual(l, r) => write!(f, "({} >= {})", l, r),
            Guard::LessOrEqual(l, r) => write!(f, "({} <= {})", l, r),
            Guard::And(guards) => join(f, guards, "&&"),
            Guard::Or(guards) => join(f, guards, "||"),
            Guard::Not(inner) => write!(f, "!{}", inner),
        }
    }
}

/// Comparison operators, longest spellings first so that `>=` is never read
/// as `>` followed by a stray `=`.
const COMPARISONS: [(&str, fn(ValueExpr, ValueExpr) -> Guard); 6] = [
    ("==", Guard::Equals),
    ("!=", Guard::NotEquals),
    ("<=", Guard::LessOrEqual),
    (">=", Guard::GreaterOrEqual),
    ("<", Guard::LessThan),
    (">", Guard::GreaterThan),
];

/// Recursive descent parser over string slices.
///
/// Sub-expressions are located by scanning for operators at nesting depth 0,
/// skipping anything inside double quotes.
struct Parser<'a> {
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self { source }
    }

    fn error(&self, reason: impl Into<String>) -> CoreError {
        CoreError::InvalidGuard {
            expression: self.source.to_string(),
            reason: reason.into(),
        }
    }

    /// Single left-to-right pass validating parenthesis balance.
    fn check_balance(&self) -> Result<(), CoreError> {
        let mut depth = 0usize;
        let mut in_quote = false;

        for (position, c) in self.source.char_indices() {
            match c {
                '"' => in_quote = !in_quote,
                '(' if !in_quote => depth += 1,
                ')' if !in_quote => {
                    if depth == 0 {
                        return Err(CoreError::UnexpectedCloseParen {
                            expression: self.source.to_string(),
                            position,
                        });
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }

        if in_quote {
            return Err(self.error("unterminated string literal"));
        }
        if depth > 0 {
            return Err(CoreError::UnclosedParen {
                expression: self.source.to_string(),
                unclosed: depth,
            });
        }
        Ok(())
    }

    /// `expr := composite | "!" expr | "(" inner ")"`
    ///
    /// A top-level composite of enclosed operands such as `(a) && (b)` needs
    /// no outer pair.
    fn parse_expr(&self, s: &str) -> Result<Guard, CoreError> {
        let s = s.trim();

        if has_top_level_logic(s) {
            return self.parse_or(s);
        }

        if let Some(rest) = s.strip_prefix('!') {
            return Ok(Guard::Not(Box::new(self.parse_expr(rest)?)));
        }

        if !is_enclosed(s) {
            return Err(self.error(format!(
                "expression '{}' must be enclosed in parentheses",
                s
            )));
        }

        self.parse_inner(&s[1..s.len() - 1])
    }

    fn parse_inner(&self, s: &str) -> Result<Guard, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(self.error("empty parentheses"));
        }

        if has_top_level_logic(s) {
            return self.parse_or(s);
        }

        // Pure grouping or negation: unwrap and keep going.
        if s.starts_with('!') || is_enclosed(s) {
            return self.parse_expr(s);
        }

        self.parse_comparison(s)
    }

    fn parse_or(&self, s: &str) -> Result<Guard, CoreError> {
        match rfind_top_level(s, "||") {
            Some(pos) => {
                let left = self.parse_or(&s[..pos])?;
                let right = self.parse_and(&s[pos + 2..])?;
                Ok(chain(left, right, true))
            }
            None => self.parse_and(s),
        }
    }

    fn parse_and(&self, s: &str) -> Result<Guard, CoreError> {
        match rfind_top_level(s, "&&") {
            Some(pos) => {
                let left = self.parse_and(&s[..pos])?;
                let right = self.parse_expr(&s[pos + 2..])?;
                Ok(chain(left, right, false))
            }
            None => self.parse_expr(s),
        }
    }

    /// `comparison := operand op operand` with exactly one operator.
    fn parse_comparison(&self, s: &str) -> Result<Guard, CoreError> {
        let bytes = s.as_bytes();
        let mut found = Vec::new();
        let mut depth = 0i32;
        let mut in_quote = false;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'"' => in_quote = !in_quote,
                b'(' if !in_quote => depth += 1,
                b')' if !in_quote => depth -= 1,
                _ if !in_quote && depth == 0 => {
                    if let Some((token, build)) = COMPARISONS
                        .iter()
                        .find(|(token, _)| bytes[i..].starts_with(token.as_bytes()))
                    {
                        found.push((i, token.len(), *build));
                        i += token.len();
                        continue;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        let (pos, len, build) = match found.as_slice() {
            [] => return Err(self.error(format!("no comparison operator in '{}'", s))),
            [single] => *single,
            _ => {
                return Err(self.error(format!(
                    "expected exactly one comparison operator in '{}'",
                    s
                )))
            }
        };

        let left = s[..pos].trim();
        let right = s[pos + len..].trim();
        if left.is_empty() || right.is_empty() {
            return Err(self.error(format!("missing operand in '{}'", s)));
        }
        if left.ends_with(['=', '!']) || right.starts_with('=') {
            return Err(self.error(format!("malformed comparison operator in '{}'", s)));
        }
        if left.starts_with('(') || right.starts_with('(') {
            return Err(self.error(format!(
                "comparison operands cannot be grouped expressions in '{}'",
                s
            )));
        }

        Ok(build(ValueExpr::parse(left)?, ValueExpr::parse(right)?))
    }
}

/// Appends `right` to a left-leaning chain of the same operator.
fn chain(left: Guard, right: Guard, or: bool) -> Guard {
    match (left, or) {
        (Guard::Or(mut guards), true) => {
            guards.push(right);
            Guard::Or(guards)
        }
        (Guard::And(mut guards), false) => {
            guards.push(right);
            Guard::And(guards)
        }
        (left, true) => Guard::Or(vec![left, right]),
        (left, false) => Guard::And(vec![left, right]),
    }
}

/// Returns true when `s` is one parenthesized group: the `(` at the start is
/// closed by the `)` at the very end.
fn is_enclosed(s: &str) -> bool {
    if !s.starts_with('(') || !s.ends_with(')') {
        return false;
    }

    let mut depth = 0i32;
    let mut in_quote = false;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'"' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return i == s.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

fn has_top_level_logic(s: &str) -> bool {
    rfind_top_level(s, "||").is_some() || rfind_top_level(s, "&&").is_some()
}

/// Finds the rightmost `op` at nesting depth 0, scanning right to left.
fn rfind_top_level(s: &str, op: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let op = op.as_bytes();
    let mut depth = 0i32;
    let mut in_quote = false;

    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b'"' => in_quote = !in_quote,
            b')' if !in_quote => depth += 1,
            b'(' if !in_quote => depth -= 1,
            _ if !in_quote && depth == 0 && bytes[i..].starts_with(op) => return Some(i),
            _ => {}
        }
    }
    None
}

/// Guard evaluation helpers.
pub struct GuardEvaluator;

impl GuardEvaluator {
    /// Evaluates a guard against context and event.
    pub fn evaluate(guard: &Guard, ctx: &Context, event: &Event) -> Result<bool, CoreError> {
        guard.evaluate(ctx, event)
    }

    /// Evaluates an optional guard (None = always true).
    pub fn evaluate_opt(
        guard: Option<&Guard>,
        ctx: &Context,
        event: &Event,
    ) -> Result<bool, CoreError> {
        guard.map_or(Ok(true), |g| g.evaluate(ctx, event))
    }
}
