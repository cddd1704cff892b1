//! Approval channel between the engine and human-facing systems.
//!
//! Requests are announced on a broadcast channel. Each request has one
//! parked continuation; the first response for a key resumes it and later
//! responses find nothing to resume.

use aureus_core::{ActionId, PrincipalId, RiskTier, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot};

/// Announcements for human-facing systems
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ApprovalEvent {
    /// An action is parked until the token is approved
    TokenIssued {
        /// Token to approve
        token: String,
        /// Parked action
        action_id: ActionId,
        /// Requesting principal
        principal: PrincipalId,
        /// Effective risk tier
        risk_tier: RiskTier,
        /// When the token stops being accepted
        expires_at: DateTime<Utc>,
    },
    /// A blocked commit needs human input or sign-off
    RecoveryRequested {
        /// Request key to answer
        request: String,
        /// Task whose commit was blocked
        task_id: TaskId,
        /// `ask_user` or `escalate`
        strategy: String,
        /// Prompt or escalation reason
        prompt: String,
    },
    /// A token was consumed and the action approved
    TokenConsumed {
        /// Consumed token
        token: String,
    },
    /// A request was denied or expired
    Denied {
        /// Token or request key
        key: String,
        /// Why
        reason: String,
    },
}

/// A human's answer to a parked request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum HumanResponse {
    /// Let the action proceed
    Approve,
    /// Stop the action
    Deny {
        /// Why
        reason: String,
    },
    /// Supply input for an `ask_user` request
    Respond {
        /// Input data
        input: Value,
    },
}

/// Routes approval requests and responses
#[derive(Clone)]
pub struct ApprovalHub {
    events: broadcast::Sender<ApprovalEvent>,
    waiters: Arc<Mutex<HashMap<String, oneshot::Sender<HumanResponse>>>>,
}

impl ApprovalHub {
    /// Create a hub buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            events,
            waiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to announcements
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.events.subscribe()
    }

    /// Park a continuation under `key` and announce `event`
    ///
    /// The continuation is registered before the announcement goes out, so
    /// a subscriber answering immediately cannot miss it.
    #[must_use]
    pub fn request(&self, key: impl Into<String>, event: ApprovalEvent) -> oneshot::Receiver<HumanResponse> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock().unwrap_or_else(|p| p.into_inner());
            waiters.insert(key.into(), tx);
        }
        self.publish(event);
        rx
    }

    /// Resume the continuation parked under `key`
    ///
    /// Returns `false` if nothing is waiting (already answered, withdrawn,
    /// or never requested).
    pub fn respond(&self, key: &str, response: HumanResponse) -> bool {
        let waiter = {
            let mut waiters = self.waiters.lock().unwrap_or_else(|p| p.into_inner());
            waiters.remove(key)
        };
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop the continuation parked under `key`
    pub fn withdraw(&self, key: &str) {
        let mut waiters = self.waiters.lock().unwrap_or_else(|p| p.into_inner());
        waiters.remove(key);
    }

    /// Announce an event; having no subscribers is fine
    pub fn publish(&self, event: ApprovalEvent) {
        let _ = self.events.send(event);
    }

    /// Keys with a parked continuation
    #[must_use]
    pub fn pending(&self) -> Vec<String> {
        let waiters = self.waiters.lock().unwrap_or_else(|p| p.into_inner());
        waiters.keys().cloned().collect()
    }
}

impl Default for ApprovalHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl std::fmt::Debug for ApprovalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalHub")
            .field("pending", &self.pending().len())
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}
