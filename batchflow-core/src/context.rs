//! Checkpoint context attached to job and step executions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{FlowError, Result};

/// Job context key naming the state a stopped job resumes from.
pub const RESUME_FROM_STATE_KEY: &str = "resume-from-state";

/// Job context key naming the step that was running when the job stopped.
pub const INTERRUPTED_STEP_KEY: &str = "interrupted-step-name";

/// Step context key set when a step execution is a re-run of an
/// interrupted one.
pub const RESTART_REQUESTED_KEY: &str = "restart-requested";

/// Key/value checkpoint data owned by an execution record.
///
/// Values are stored as JSON so the context can be persisted by whatever
/// backing store the executor uses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    entries: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value by key.
    pub fn put(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let json_value = serde_json::to_value(value)?;
        self.entries.insert(key.into(), json_value);
        Ok(())
    }

    /// Get a value by key and deserialize it.
    pub fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.entries
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(FlowError::from)
    }

    /// Get a string value, ignoring entries of other types.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// Get raw JSON value by key.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// True if the key holds a truthy value: `true`, a non-zero number or a
    /// non-empty string other than `"false"`.
    pub fn is_truthy(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(s)) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
            _ => false,
        }
    }

    /// Remove a value by key.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Check if a key exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Get all keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Merge another context into this one.
    ///
    /// Entries from the other context override existing values with the
    /// same keys.
    pub fn merge(&mut self, other: &ExecutionContext) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the context is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert the context to a JSON object.
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(&self.entries).map_err(FlowError::from)
    }
}

/// Builder for creating contexts with initial data.
#[derive(Default)]
pub struct ExecutionContextBuilder {
    context: ExecutionContext,
}

impl ExecutionContextBuilder {
    /// Create a new context builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value.
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Result<Self> {
        self.context.put(key, value)?;
        Ok(self)
    }

    /// Build the context.
    pub fn build(self) -> ExecutionContext {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cursor {
        offset: u64,
        file: String,
    }

    #[test]
    fn test_put_and_get() {
        let mut context = ExecutionContext::new();
        let cursor = Cursor {
            offset: 120,
            file: "input.csv".to_string(),
        };

        context.put("cursor", &cursor).unwrap();
        context.put(RESUME_FROM_STATE_KEY, "job.step2").unwrap();

        let restored: Cursor = context.get("cursor").unwrap().unwrap();
        assert_eq!(restored, cursor);
        assert_eq!(context.get_str(RESUME_FROM_STATE_KEY), Some("job.step2"));
        assert_eq!(context.get_str("cursor"), None);
        assert!(context.get::<Cursor>("missing").unwrap().is_none());

        assert!(context.remove("cursor").is_some());
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn test_truthiness() {
        let context = ExecutionContextBuilder::new()
            .with("yes", true)
            .unwrap()
            .with("no", false)
            .unwrap()
            .with("one", 1)
            .unwrap()
            .with("text", "false")
            .unwrap()
            .build();

        assert!(context.is_truthy("yes"));
        assert!(context.is_truthy("one"));
        assert!(!context.is_truthy("no"));
        assert!(!context.is_truthy("text"));
        assert!(!context.is_truthy("absent"));
    }

    #[test]
    fn test_merge_overrides() {
        let mut first = ExecutionContext::new();
        first.put("a", 1).unwrap();
        first.put("b", 2).unwrap();

        let mut second = ExecutionContext::new();
        second.put("b", 3).unwrap();

        first.merge(&second);
        assert_eq!(first.get::<i32>("a").unwrap(), Some(1));
        assert_eq!(first.get::<i32>("b").unwrap(), Some(3));
    }
}
