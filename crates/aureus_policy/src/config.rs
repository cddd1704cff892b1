//! Guard configuration.

use crate::principal::{Action, Principal};
use aureus_core::{DataZone, PrincipalId, RiskTier};
use serde::{Deserialize, Serialize};

/// Explicit rejection rule
///
/// A rule matches when every field it sets matches. `action` accepts a
/// trailing `*` as a prefix wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyRule {
    /// Principal the rule applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<PrincipalId>,
    /// Action name pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Data zone the rule protects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_zone: Option<DataZone>,
    /// Reason reported on rejection
    pub reason: String,
}

impl DenyRule {
    /// Deny actions whose name matches `pattern`
    #[must_use]
    pub fn action(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            principal: None,
            action: Some(pattern.into()),
            data_zone: None,
            reason: reason.into(),
        }
    }

    /// Restrict the rule to a principal
    #[must_use]
    pub fn for_principal(mut self, principal: impl Into<PrincipalId>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Restrict the rule to a data zone
    #[must_use]
    pub fn in_zone(mut self, zone: DataZone) -> Self {
        self.data_zone = Some(zone);
        self
    }

    /// Check the rule against an attempt
    #[must_use]
    pub fn matches(&self, principal: &Principal, action: &Action) -> bool {
        let principal_ok = self.principal.as_ref().is_none_or(|p| p == &principal.id);
        let action_ok = self.action.as_deref().is_none_or(|pattern| {
            pattern
                .strip_suffix('*')
                .map_or(pattern == action.name, |prefix| action.name.starts_with(prefix))
        });
        let zone_ok = self.data_zone.is_none_or(|zone| action.data_zone == Some(zone));
        principal_ok && action_ok && zone_ok
    }
}

/// Goal guard configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Lowest effective tier that needs human approval
    pub approval_threshold: RiskTier,
    /// Approval token lifetime in milliseconds
    pub token_ttl_ms: u64,
    /// How long a consumed or expired token stays queryable before the
    /// store drops it, in milliseconds
    pub token_retention_ms: u64,
    /// Prior rejections of the same principal and action that trigger an
    /// automatic rejection (0 disables)
    pub repeated_denial_limit: usize,
    /// Explicit rejection rules
    pub deny_rules: Vec<DenyRule>,
}

impl GuardConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            approval_threshold: RiskTier::High,
            token_ttl_ms: 300_000,
            token_retention_ms: 3_600_000,
            repeated_denial_limit: 3,
            deny_rules: Vec::new(),
        }
    }

    /// Set the approval threshold
    #[must_use]
    pub fn with_approval_threshold(mut self, tier: RiskTier) -> Self {
        self.approval_threshold = tier;
        self
    }

    /// Set the token lifetime
    #[must_use]
    pub fn with_token_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.token_ttl_ms = ttl_ms;
        self
    }

    /// Set how long settled tokens are kept
    #[must_use]
    pub fn with_token_retention_ms(mut self, retention_ms: u64) -> Self {
        self.token_retention_ms = retention_ms;
        self
    }

    /// Set the repeated-denial limit
    #[must_use]
    pub fn with_repeated_denial_limit(mut self, limit: usize) -> Self {
        self.repeated_denial_limit = limit;
        self
    }

    /// Add a deny rule
    #[must_use]
    pub fn with_deny_rule(mut self, rule: DenyRule) -> Self {
        self.deny_rules.push(rule);
        self
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_rule_patterns() {
        let agent = Principal::agent("agent-1");
        let delete = Action::new("a", "delete_database", RiskTier::Critical);
        assert!(DenyRule::action("delete_*", "no deletes").matches(&agent, &delete));
        assert!(!DenyRule::action("delete", "exact").matches(&agent, &delete));
        assert!(
            !DenyRule::action("delete_*", "other principal")
                .for_principal("agent-2")
                .matches(&agent, &delete)
        );
    }

    #[test]
    fn test_deny_rule_zone() {
        let agent = Principal::agent("agent-1");
        let rule = DenyRule {
            principal: None,
            action: None,
            data_zone: Some(DataZone::Restricted),
            reason: "restricted".to_string(),
        };
        let action = Action::new("a", "read_document", RiskTier::Low);
        assert!(!rule.matches(&agent, &action));
        assert!(rule.matches(&agent, &action.with_data_zone(DataZone::Restricted)));
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: GuardConfig = serde_json::from_str(r#"{"approval_threshold": "CRITICAL"}"#).unwrap();
        assert_eq!(config.approval_threshold, RiskTier::Critical);
        assert_eq!(config.token_ttl_ms, 300_000);
        assert_eq!(config.token_retention_ms, 3_600_000);
        assert_eq!(config.repeated_denial_limit, 3);
    }
}
