//! Identifiers for Aureus entities.
//!
//! Workflow, task, action, and principal ids are caller-chosen strings and
//! serialize transparently. Run ids are UUIDs minted by the engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string-like value
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow as str
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the id is empty or whitespace only
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Workflow identifier, unique per workflow definition
    WorkflowId
);

string_id!(
    /// Task identifier, unique within a workflow
    TaskId
);

string_id!(
    /// Action identifier evaluated by the policy guard
    ActionId
);

string_id!(
    /// Principal (actor) identifier
    PrincipalId
);

string_id!(
    /// Commit identifier submitted to a CRV gate
    CommitId
);

impl CommitId {
    /// Mint a fresh random commit id
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("commit_{}", Uuid::new_v4()))
    }
}

/// Run identifier - identifies a single workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_id_roundtrip_transparent() {
        let id = TaskId::new("transform");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"transform\"");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_blank_id() {
        assert!(TaskId::new("  ").is_blank());
        assert!(!TaskId::new("read").is_blank());
    }

    #[test]
    fn test_commit_id_generate_unique() {
        let a = CommitId::generate();
        let b = CommitId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("commit_"));
    }

    #[test]
    fn test_run_id_display() {
        let id = RunId::new();
        assert!(id.to_string().starts_with("run_"));
    }
}
