//! Single-use approval tokens.
//!
//! Consumption is a check-and-mark under one lock, so concurrent attempts
//! to present the same token yield exactly one success.

use crate::error::GuardError;
use crate::principal::{Action, Principal};
use aureus_core::{ActionId, Clock, PrincipalId, SystemClock};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Token authorizing one parked action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalToken {
    /// Token string
    pub token: String,
    /// Action the token authorizes
    pub action_id: ActionId,
    /// Principal who requested the action
    pub principal: Principal,
    /// Expiry instant
    pub expires_at: DateTime<Utc>,
    /// Whether the token was consumed
    pub used: bool,
}

impl ApprovalToken {
    /// Whether the token has expired at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

struct Slot {
    token: ApprovalToken,
    action: Action,
    settled_at: Option<DateTime<Utc>>,
}

impl Slot {
    /// When the token stopped being usable, if it has
    fn settled(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.settled_at
            .or_else(|| self.token.is_expired_at(now).then_some(self.token.expires_at))
    }
}

/// Issued tokens and their consumption state
///
/// Consumed, revoked and expired tokens stay queryable for the retention
/// window, then the next issue drops them.
#[derive(Clone)]
pub struct TokenStore {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl TokenStore {
    /// Create an empty store on the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store on `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            clock,
            retention: Duration::hours(1),
        }
    }

    /// Keep settled tokens for `retention`
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Issue a token for `action`, valid for `ttl`
    pub fn issue(&self, action: &Action, principal: &Principal, ttl: Duration) -> ApprovalToken {
        let now = self.clock.now();
        let token = ApprovalToken {
            token: format!("apt_{}", uuid::Uuid::new_v4().simple()),
            action_id: action.id.clone(),
            principal: principal.clone(),
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            used: false,
        };
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        let pruned = prune(&mut slots, now, self.retention);
        if pruned > 0 {
            tracing::debug!(pruned, "settled approval tokens dropped");
        }
        slots.insert(
            token.token.clone(),
            Slot {
                token: token.clone(),
                action: action.clone(),
                settled_at: None,
            },
        );
        tracing::debug!(token = %token.token, action = %action.id, "approval token issued");
        token
    }

    /// Consume a token presented by `principal` for `action_id`
    ///
    /// A mismatch on either leaves the token usable by its rightful holder.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::UnknownToken`], [`GuardError::ApprovalTokenReused`],
    /// [`GuardError::TokenMismatch`] or [`GuardError::ApprovalExpired`]
    pub fn consume(
        &self,
        token: &str,
        action_id: &ActionId,
        principal: &PrincipalId,
    ) -> Result<(ApprovalToken, Action), GuardError> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        let slot = slots.get_mut(token).ok_or_else(|| GuardError::UnknownToken {
            token: token.to_string(),
        })?;
        if slot.token.used {
            return Err(GuardError::ApprovalTokenReused {
                token: token.to_string(),
            });
        }
        if *action_id != slot.token.action_id || *principal != slot.token.principal.id {
            return Err(GuardError::TokenMismatch {
                token: token.to_string(),
                expected: format!("{} by {}", slot.token.action_id, slot.token.principal.id),
                actual: format!("{action_id} by {principal}"),
            });
        }
        slot.token.used = true;
        slot.settled_at = Some(now);
        if slot.token.is_expired_at(now) {
            return Err(GuardError::ApprovalExpired {
                token: token.to_string(),
            });
        }
        Ok((slot.token.clone(), slot.action.clone()))
    }

    /// Drop tokens settled longer ago than the retention window
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        prune(&mut slots, now, self.retention)
    }

    /// Number of tokens held, settled ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark a token used without approving it
    ///
    /// # Errors
    ///
    /// Returns error if the token is unknown or already used
    pub fn revoke(&self, token: &str) -> Result<(ApprovalToken, Action), GuardError> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        let slot = slots.get_mut(token).ok_or_else(|| GuardError::UnknownToken {
            token: token.to_string(),
        })?;
        if slot.token.used {
            return Err(GuardError::ApprovalTokenReused {
                token: token.to_string(),
            });
        }
        slot.token.used = true;
        slot.settled_at = Some(self.clock.now());
        Ok((slot.token.clone(), slot.action.clone()))
    }

    /// Current state of a token
    #[must_use]
    pub fn get(&self, token: &str) -> Option<ApprovalToken> {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.get(token).map(|slot| slot.token.clone())
    }

    /// Token together with the action it was issued for
    #[must_use]
    pub fn parked(&self, token: &str) -> Option<(ApprovalToken, Action)> {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .get(token)
            .map(|slot| (slot.token.clone(), slot.action.clone()))
    }

    /// Tokens issued and not yet consumed
    #[must_use]
    pub fn outstanding(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.values().filter(|slot| !slot.token.used).count()
    }
}

fn prune(slots: &mut HashMap<String, Slot>, now: DateTime<Utc>, retention: Duration) -> usize {
    let before = slots.len();
    slots.retain(|_, slot| {
        slot.settled(now)
            .and_then(|at| at.checked_add_signed(retention))
            .is_none_or(|drop_at| now < drop_at)
    });
    before - slots.len()
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
