//! Principals and the actions they attempt.

use aureus_core::{ActionId, DataZone, Intent, Permission, PermissionSet, PrincipalId, RiskTier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Kind of actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    /// Autonomous agent
    Agent,
    /// Human operator
    Human,
    /// Backend service
    Service,
}

/// An actor attempting actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier
    pub id: PrincipalId,
    /// Actor kind
    #[serde(rename = "type")]
    pub kind: PrincipalKind,
    /// Granted permissions
    #[serde(default)]
    pub permissions: PermissionSet,
}

impl Principal {
    /// Create a principal with no permissions
    #[must_use]
    pub fn new(id: impl Into<PrincipalId>, kind: PrincipalKind) -> Self {
        Self {
            id: id.into(),
            kind,
            permissions: PermissionSet::new(),
        }
    }

    /// An agent principal
    #[must_use]
    pub fn agent(id: impl Into<PrincipalId>) -> Self {
        Self::new(id, PrincipalKind::Agent)
    }

    /// Grant a permission
    #[must_use]
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.grant(permission);
        self
    }
}

/// An action with its risk classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action identifier
    pub id: ActionId,
    /// Action name, used for classification and deny rules
    pub name: String,
    /// Declared risk tier
    pub risk_tier: RiskTier,
    /// Permissions the principal must hold
    #[serde(default)]
    pub required_permissions: Vec<Permission>,
    /// Action intent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    /// Data zone touched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_zone: Option<DataZone>,
    /// Tools the action may use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// Metadata matched against permission conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl Action {
    /// Create an action
    #[must_use]
    pub fn new(id: impl Into<ActionId>, name: impl Into<String>, risk_tier: RiskTier) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            risk_tier,
            required_permissions: Vec::new(),
            intent: None,
            data_zone: None,
            allowed_tools: None,
            metadata: None,
        }
    }

    /// Require a permission
    #[must_use]
    pub fn requiring(mut self, permission: Permission) -> Self {
        self.required_permissions.push(permission);
        self
    }

    /// Set the intent
    #[must_use]
    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    /// Set the data zone
    #[must_use]
    pub fn with_data_zone(mut self, zone: DataZone) -> Self {
        self.data_zone = Some(zone);
        self
    }

    /// Add a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }

    /// Metadata, empty when unset
    #[must_use]
    pub fn metadata_or_empty(&self) -> BTreeMap<String, Value> {
        self.metadata.clone().unwrap_or_default()
    }
}
