//! Proposed state transitions.

use aureus_core::{CommitId, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A proposed state change submitted for validation
///
/// Commits are immutable once built. The runner hands a commit to the gate
/// by value and gets it back inside the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit identifier
    pub id: CommitId,
    /// Proposed data
    pub data: Value,
    /// State before the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<Value>,
    /// Additional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Commit {
    /// Create a commit
    #[must_use]
    pub fn new(id: impl Into<CommitId>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            previous_state: None,
            metadata: None,
        }
    }

    /// Commit for a task's output, tagged with the task and tool
    #[must_use]
    pub fn for_task(task: &TaskId, tool: Option<&str>, data: Value) -> Self {
        let mut metadata = Map::new();
        metadata.insert("task_id".to_string(), Value::String(task.to_string()));
        if let Some(tool) = tool {
            metadata.insert("tool".to_string(), Value::String(tool.to_string()));
        }
        Self {
            id: CommitId::generate(),
            data,
            previous_state: None,
            metadata: Some(metadata),
        }
    }

    /// Set the previous state
    #[must_use]
    pub fn with_previous_state(mut self, state: Value) -> Self {
        self.previous_state = Some(state);
        self
    }

    /// Add a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.get_or_insert_with(Map::new).insert(key.into(), value);
        self
    }

    /// Look up a value in `data` by dotted path (`account.balance`)
    #[must_use]
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.data, |value, key| match value {
                Value::Object(map) => map.get(key),
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_lookup() {
        let commit = Commit::new("c1", json!({"account": {"balance": -5, "tags": ["a", "b"]}}));
        assert_eq!(commit.field("account.balance"), Some(&json!(-5)));
        assert_eq!(commit.field("account.tags.1"), Some(&json!("b")));
        assert_eq!(commit.field("account.missing"), None);
    }

    #[test]
    fn test_for_task_tags_metadata() {
        let commit = Commit::for_task(&TaskId::new("save"), Some("write_db"), json!({}));
        let metadata = commit.metadata.unwrap();
        assert_eq!(metadata["task_id"], json!("save"));
        assert_eq!(metadata["tool"], json!("write_db"));
        assert!(commit.id.as_str().starts_with("commit_"));
    }
}
