//! Transition rules: `(state, outcome pattern) -> next state | end`.

use std::{cmp::Ordering, fmt, sync::Arc};

use regex::Regex;

use crate::{
    error::{FlowError, Result},
    state::State,
};

/// Outcome pattern with `*` (any run of characters) and `?` (exactly one
/// character) wildcards.
#[derive(Clone, Debug)]
pub struct ExitPattern {
    raw: String,
    matcher: Option<Regex>,
}

impl ExitPattern {
    /// Pattern that matches any outcome.
    pub const ANY: &'static str = "*";

    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let matcher = if raw.contains(['*', '?']) {
            let mut expr = String::from("(?s)^");
            for ch in raw.chars() {
                match ch {
                    '*' => expr.push_str(".*"),
                    '?' => expr.push('.'),
                    other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
                }
            }
            expr.push('$');
            let regex = Regex::new(&expr).map_err(|e| {
                FlowError::configuration(format!("invalid transition pattern {raw:?}: {e}"))
            })?;
            Some(regex)
        } else {
            None
        };
        Ok(Self { raw, matcher })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, code: &str) -> bool {
        match &self.matcher {
            Some(regex) => regex.is_match(code),
            None => self.raw == code,
        }
    }

    /// True if the pattern contains no wildcards.
    pub fn is_exact(&self) -> bool {
        self.matcher.is_none()
    }
}

impl PartialEq for ExitPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ExitPattern {}

impl fmt::Display for ExitPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A rule leaving `state` on outcomes matching `pattern`, either to the state
/// named `next` or, when `next` is `None`, out of the flow.
#[derive(Clone, Debug)]
pub struct StateTransition {
    state: Arc<State>,
    pattern: ExitPattern,
    next: Option<String>,
}

impl StateTransition {
    pub fn new(state: Arc<State>, pattern: &str, next: Option<&str>) -> Result<Self> {
        Ok(Self {
            state,
            pattern: ExitPattern::new(pattern)?,
            next: next.map(str::to_string),
        })
    }

    /// Transition to the state named `next`.
    pub fn to(state: Arc<State>, pattern: &str, next: &str) -> Result<Self> {
        Self::new(state, pattern, Some(next))
    }

    /// Transition that ends the flow.
    pub fn end(state: Arc<State>, pattern: &str) -> Result<Self> {
        Self::new(state, pattern, None)
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    pub fn state_name(&self) -> &str {
        self.state.name()
    }

    pub fn pattern(&self) -> &ExitPattern {
        &self.pattern
    }

    pub fn next(&self) -> Option<&str> {
        self.next.as_deref()
    }

    pub fn is_end(&self) -> bool {
        self.next.is_none()
    }

    pub fn matches(&self, code: &str) -> bool {
        self.pattern.matches(code)
    }
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StateTransition: [state={}, pattern={}, next={}]",
            self.state_name(),
            self.pattern,
            self.next.as_deref().unwrap_or("<end>")
        )
    }
}

/// Ordering applied to the transitions leaving one state.
pub type TransitionComparator =
    Arc<dyn Fn(&StateTransition, &StateTransition) -> Ordering + Send + Sync>;

/// Most specific pattern first: fewer `*`, then fewer `?`, then longer,
/// then by text.
pub fn by_specificity(a: &StateTransition, b: &StateTransition) -> Ordering {
    let (a, b) = (a.pattern.as_str(), b.pattern.as_str());
    let (a_wild, b_wild) = (
        (a.matches('*').count(), a.matches('?').count()),
        (b.matches('*').count(), b.matches('?').count()),
    );
    a_wild
        .cmp(&b_wild)
        .then_with(|| b.len().cmp(&a.len()))
        .then_with(|| a.cmp(b))
}
