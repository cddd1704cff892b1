//! Recovery strategies for blocked commits.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What to do when a gate blocks a commit
///
/// Exactly one strategy applies per blocked commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Re-run the task with another tool
    RetryAltTool {
        /// Alternate tool
        tool_name: String,
        /// Re-runs allowed (>= 1)
        max_retries: u32,
    },
    /// Suspend until a human supplies input
    AskUser {
        /// Question for the human
        prompt: String,
    },
    /// Suspend until a human signs off
    Escalate {
        /// Why it was escalated
        reason: String,
    },
    /// Accept the commit anyway
    Ignore {
        /// Recorded justification
        justification: String,
    },
}

impl RecoveryStrategy {
    /// Strategy tag as it appears on the wire
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RetryAltTool { .. } => "retry_alt_tool",
            Self::AskUser { .. } => "ask_user",
            Self::Escalate { .. } => "escalate",
            Self::Ignore { .. } => "ignore",
        }
    }

    /// Whether the strategy suspends for a human
    #[must_use]
    pub const fn needs_human(&self) -> bool {
        matches!(self, Self::AskUser { .. } | Self::Escalate { .. })
    }

    /// Text shown to the human, if any
    #[must_use]
    pub fn prompt(&self) -> Option<&str> {
        match self {
            Self::AskUser { prompt } => Some(prompt),
            Self::Escalate { reason } => Some(reason),
            _ => None,
        }
    }

    /// Check bounds
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated bound
    pub fn check(&self) -> Result<(), String> {
        match self {
            Self::RetryAltTool { tool_name, .. } if tool_name.trim().is_empty() => {
                Err("retry_alt_tool needs a tool_name".to_string())
            }
            Self::RetryAltTool { max_retries: 0, .. } => {
                Err("retry_alt_tool max_retries must be at least 1".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Outcome of applying a recovery strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    /// Whether recovery produced an accepted commit
    pub success: bool,
    /// Strategy applied
    pub strategy: RecoveryStrategy,
    /// Human-readable outcome
    pub message: String,
    /// Data from the recovered commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_data: Option<Value>,
}

impl RecoveryResult {
    /// A successful recovery
    #[must_use]
    pub fn succeeded(strategy: RecoveryStrategy, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: true,
            strategy,
            message: message.into(),
            recovered_data: data,
        }
    }

    /// A failed recovery
    #[must_use]
    pub fn failed(strategy: RecoveryStrategy, message: impl Into<String>) -> Self {
        Self {
            success: false,
            strategy,
            message: message.into(),
            recovered_data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_decoding() {
        let strategy: RecoveryStrategy = serde_json::from_value(json!({
            "type": "retry_alt_tool",
            "tool_name": "backup_tool",
            "max_retries": 3
        }))
        .unwrap();
        assert_eq!(
            strategy,
            RecoveryStrategy::RetryAltTool {
                tool_name: "backup_tool".to_string(),
                max_retries: 3
            }
        );
        assert_eq!(strategy.kind(), "retry_alt_tool");
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let result: Result<RecoveryStrategy, _> =
            serde_json::from_value(json!({"type": "rollback_everything"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_check_bounds() {
        let zero = RecoveryStrategy::RetryAltTool {
            tool_name: "alt".to_string(),
            max_retries: 0,
        };
        assert!(zero.check().is_err());
        let ignore = RecoveryStrategy::Ignore {
            justification: "known flaky".to_string(),
        };
        assert!(ignore.check().is_ok());
        assert!(!ignore.needs_human());
    }

    #[test]
    fn test_prompt() {
        let ask = RecoveryStrategy::AskUser {
            prompt: "Confirm the balance".to_string(),
        };
        assert_eq!(ask.prompt(), Some("Confirm the balance"));
        assert!(ask.needs_human());
    }
}
