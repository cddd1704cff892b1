//! Permission types for principal authorization.

use crate::risk::{DataZone, Intent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Wildcard accepted in the action and resource fields of a granted permission
pub const WILDCARD: &str = "*";

/// A permission requirement or grant
///
/// Granted permissions may use `*` for action or resource, and a trailing
/// `/*` on the resource to grant a whole prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Action identifier (e.g. `write`)
    pub action: String,
    /// Resource identifier (e.g. `ledger/accounts`)
    pub resource: String,
    /// Optional intent restriction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    /// Optional data zone restriction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_zone: Option<DataZone>,
    /// Conditions that must hold in the action metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<BTreeMap<String, Value>>,
}

impl Permission {
    /// Create an unrestricted permission
    #[must_use]
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
            intent: None,
            data_zone: None,
            conditions: None,
        }
    }

    /// Restrict to an intent
    #[must_use]
    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    /// Restrict to a data zone
    #[must_use]
    pub fn with_data_zone(mut self, zone: DataZone) -> Self {
        self.data_zone = Some(zone);
        self
    }

    /// Add a condition on the action metadata
    #[must_use]
    pub fn with_condition(mut self, key: impl Into<String>, value: Value) -> Self {
        self.conditions
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }

    /// Check whether this granted permission covers `required`
    #[must_use]
    pub fn covers(&self, required: &Permission) -> bool {
        if self.action != WILDCARD && self.action != required.action {
            return false;
        }
        if !resource_matches(&self.resource, &required.resource) {
            return false;
        }
        if let Some(intent) = self.intent {
            if required.intent != Some(intent) {
                return false;
            }
        }
        if let Some(zone) = self.data_zone {
            if required.data_zone != Some(zone) {
                return false;
            }
        }
        true
    }

    /// Check the permission's conditions against action metadata
    ///
    /// Every condition key must be present with an equal value.
    #[must_use]
    pub fn conditions_hold(&self, metadata: &BTreeMap<String, Value>) -> bool {
        self.conditions.as_ref().map_or(true, |conditions| {
            conditions
                .iter()
                .all(|(key, expected)| metadata.get(key) == Some(expected))
        })
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.action, self.resource)
    }
}

fn resource_matches(granted: &str, required: &str) -> bool {
    if granted == WILDCARD || granted == required {
        return true;
    }
    granted
        .strip_suffix("/*")
        .is_some_and(|prefix| required.starts_with(prefix) && required[prefix.len()..].starts_with('/'))
}

/// A set of permissions granted to a principal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    permissions: Vec<Permission>,
}

impl PermissionSet {
    /// Create a new empty permission set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a permission
    pub fn grant(&mut self, permission: Permission) {
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
        }
    }

    /// Builder-style grant
    #[must_use]
    pub fn with(mut self, permission: Permission) -> Self {
        self.grant(permission);
        self
    }

    /// Check if any grant covers `required`
    #[must_use]
    pub fn allows(&self, required: &Permission) -> bool {
        self.permissions.iter().any(|p| p.covers(required))
    }

    /// Required permissions that no grant covers, in input order
    #[must_use]
    pub fn missing<'a>(&self, required: &'a [Permission]) -> Vec<&'a Permission> {
        required.iter().filter(|p| !self.allows(p)).collect()
    }

    /// Iterate over grants
    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }

    /// Number of grants
    #[must_use]
    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = Self::new();
        for permission in iter {
            set.grant(permission);
        }
        set
    }
}
