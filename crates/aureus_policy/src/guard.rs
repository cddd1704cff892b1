//! The goal guard.
//!
//! Each evaluation runs a fresh [`GuardFsm`] from `idle`. Deny rules, the
//! repeated-denial check and missing permissions reject outright. Otherwise
//! the effective risk tier (the higher of the declared tier and the
//! classifier's tier) decides between approval and parking the action
//! behind a single-use token.

use crate::audit::{AuditEntry, AuditLog, StateTransition};
use crate::classifier::{RiskAssessment, RiskClassifier, ScoreTableClassifier};
use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::hub::{ApprovalEvent, ApprovalHub, HumanResponse};
use crate::principal::{Action, Principal};
use crate::state::{GoalGuardState, GuardFsm};
use crate::token::{ApprovalToken, TokenStore};
use aureus_core::{ActionId, Clock, PrincipalId, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Guard decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardDecision {
    /// Whether the action may proceed now
    pub allowed: bool,
    /// Why
    pub reason: String,
    /// Whether the action waits for a human
    pub requires_human_approval: bool,
    /// Token to approve, when parked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_token: Option<String>,
    /// Risk detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl GuardDecision {
    /// The action may proceed
    #[must_use]
    pub fn approved(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            requires_human_approval: false,
            approval_token: None,
            metadata: None,
        }
    }

    /// The action must not proceed
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            ..Self::approved(reason)
        }
    }

    /// The action waits for `token`
    #[must_use]
    pub fn pending(reason: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            allowed: false,
            requires_human_approval: true,
            approval_token: Some(token.into()),
            ..Self::approved(reason)
        }
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A parked action's token and the continuation that resumes it
#[derive(Debug)]
pub struct PendingApproval {
    /// Token to present
    pub token: ApprovalToken,
    /// Resolves when a human answers through the hub
    pub response: oneshot::Receiver<HumanResponse>,
}

/// Everything one evaluation produced
#[derive(Debug)]
pub struct GuardEvaluation {
    /// State the evaluation ended in
    pub state: GoalGuardState,
    /// The decision
    pub decision: GuardDecision,
    /// Classifier output, when the evaluation got that far
    pub assessment: Option<RiskAssessment>,
    /// Parked continuation, when `state` is `pending_human`
    pub pending: Option<PendingApproval>,
}

/// Policy guard shared by every task in a run
#[derive(Clone)]
pub struct GoalGuard {
    config: Arc<GuardConfig>,
    classifier: Arc<dyn RiskClassifier>,
    tokens: TokenStore,
    audit: AuditLog,
    hub: ApprovalHub,
    clock: Arc<dyn Clock>,
}

impl GoalGuard {
    /// Create a guard with the score-table classifier
    #[must_use]
    pub fn new(config: GuardConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a guard reading time from `clock`
    #[must_use]
    pub fn with_clock(config: GuardConfig, clock: Arc<dyn Clock>) -> Self {
        let retention = chrono::Duration::milliseconds(
            i64::try_from(config.token_retention_ms).unwrap_or(i64::MAX),
        );
        Self {
            config: Arc::new(config),
            classifier: Arc::new(ScoreTableClassifier::new()),
            tokens: TokenStore::with_clock(Arc::clone(&clock)).with_retention(retention),
            audit: AuditLog::with_clock(Arc::clone(&clock)),
            hub: ApprovalHub::default(),
            clock,
        }
    }

    /// Use a different classifier
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn RiskClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Use a shared approval hub
    #[must_use]
    pub fn with_hub(mut self, hub: ApprovalHub) -> Self {
        self.hub = hub;
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// The audit log
    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The approval hub
    #[must_use]
    pub fn hub(&self) -> &ApprovalHub {
        &self.hub
    }

    /// The token store
    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Clock used for token expiry and audit timestamps
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// State a parked action left `pending_human` for, if it has
    #[must_use]
    pub fn resolution(&self, token: &str) -> Option<GoalGuardState> {
        self.audit
            .entries()
            .iter()
            .rev()
            .filter(|entry| entry.approval_token.as_deref() == Some(token))
            .find_map(|entry| {
                entry
                    .state_transition
                    .filter(|t| t.from == GoalGuardState::PendingHuman)
                    .map(|t| t.to)
            })
    }

    /// Evaluate `principal` attempting `action`
    ///
    /// # Errors
    ///
    /// Returns error only if the audit log cannot record a transition
    pub fn evaluate(&self, principal: &Principal, action: &Action) -> Result<GuardEvaluation, GuardError> {
        let mut fsm = GuardFsm::new();
        self.record(
            &mut fsm,
            GoalGuardState::Evaluating,
            principal,
            action,
            GuardDecision::rejected("evaluation started"),
            None,
        )?;

        if let Some(rule) = self
            .config
            .deny_rules
            .iter()
            .find(|rule| rule.matches(principal, action))
        {
            return self.reject(&mut fsm, principal, action, format!("denied by rule: {}", rule.reason));
        }

        let limit = self.config.repeated_denial_limit;
        if limit > 0 {
            let prior = self.audit.rejections_for(&principal.id, &action.name);
            if prior >= limit {
                return self.reject(
                    &mut fsm,
                    principal,
                    action,
                    format!("repeated denials: {prior} prior rejections of {}", action.name),
                );
            }
        }

        let missing = missing_permissions(principal, action);
        if !missing.is_empty() {
            return self.reject(
                &mut fsm,
                principal,
                action,
                format!("missing permissions: {}", missing.join(", ")),
            );
        }

        let assessment = self.classifier.classify(action, principal);
        let effective = action.risk_tier.max(assessment.tier);
        let mut metadata = Map::new();
        metadata.insert("risk_score".to_string(), json!(assessment.score));
        metadata.insert("classified_tier".to_string(), json!(assessment.tier));
        metadata.insert("effective_tier".to_string(), json!(effective));

        if effective >= self.config.approval_threshold {
            let ttl = chrono::Duration::milliseconds(
                i64::try_from(self.config.token_ttl_ms).unwrap_or(i64::MAX),
            );
            let token = self.tokens.issue(action, principal, ttl);
            let decision = GuardDecision::pending(
                format!("{effective} risk action requires human approval"),
                token.token.clone(),
            )
            .with_metadata(metadata);
            self.record(
                &mut fsm,
                GoalGuardState::PendingHuman,
                principal,
                action,
                decision.clone(),
                Some(token.token.clone()),
            )?;
            let response = self.hub.request(
                token.token.clone(),
                ApprovalEvent::TokenIssued {
                    token: token.token.clone(),
                    action_id: action.id.clone(),
                    principal: principal.id.clone(),
                    risk_tier: effective,
                    expires_at: token.expires_at,
                },
            );
            tracing::info!(
                action = %action.id,
                principal = %principal.id,
                tier = %effective,
                "action parked for human approval"
            );
            return Ok(GuardEvaluation {
                state: fsm.state(),
                decision,
                assessment: Some(assessment),
                pending: Some(PendingApproval { token, response }),
            });
        }

        let decision = GuardDecision::approved(format!("{effective} risk within threshold"))
            .with_metadata(metadata);
        self.record(
            &mut fsm,
            GoalGuardState::Approved,
            principal,
            action,
            decision.clone(),
            None,
        )?;
        tracing::debug!(action = %action.id, principal = %principal.id, tier = %effective, "action approved");
        Ok(GuardEvaluation {
            state: fsm.state(),
            decision,
            assessment: Some(assessment),
            pending: None,
        })
    }

    /// Present a token on behalf of `principal`, moving its parked action
    /// to `approved`
    ///
    /// # Errors
    ///
    /// Returns error if the token is unknown, reused or expired, or was
    /// issued for another action or principal. An expired token moves the
    /// action to `rejected`.
    pub fn approve(
        &self,
        token: &str,
        action_id: &ActionId,
        principal: &PrincipalId,
    ) -> Result<GuardDecision, GuardError> {
        match self.tokens.consume(token, action_id, principal) {
            Ok((issued, action)) => {
                let decision = GuardDecision::approved("approved by human");
                let mut fsm = GuardFsm::resume(GoalGuardState::PendingHuman);
                self.record(
                    &mut fsm,
                    GoalGuardState::Approved,
                    &issued.principal,
                    &action,
                    decision.clone(),
                    Some(issued.token.clone()),
                )?;
                self.hub.withdraw(token);
                self.hub.publish(ApprovalEvent::TokenConsumed {
                    token: issued.token,
                });
                tracing::info!(action = %action.id, "approval token consumed");
                Ok(decision)
            }
            Err(err @ GuardError::ApprovalExpired { .. }) => {
                if let Some((issued, action)) = self.tokens.parked(token) {
                    let mut fsm = GuardFsm::resume(GoalGuardState::PendingHuman);
                    self.record(
                        &mut fsm,
                        GoalGuardState::Rejected,
                        &issued.principal,
                        &action,
                        GuardDecision::rejected("approval token expired"),
                        Some(issued.token),
                    )?;
                }
                self.hub.withdraw(token);
                self.hub.publish(ApprovalEvent::Denied {
                    key: token.to_string(),
                    reason: "approval token expired".to_string(),
                });
                Err(err)
            }
            Err(err @ GuardError::ApprovalTokenReused { .. }) => {
                if let Some((issued, action)) = self.tokens.parked(token) {
                    self.audit.append(AuditEntry {
                        timestamp: self.clock.now(),
                        principal: issued.principal,
                        action,
                        decision: GuardDecision::rejected("approval token reuse attempted"),
                        state_transition: None,
                        approval_token: Some(issued.token),
                    })?;
                }
                tracing::warn!(token, "approval token reuse attempted");
                Err(err)
            }
            Err(err @ GuardError::TokenMismatch { .. }) => {
                tracing::warn!(token, error = %err, "approval token presented by the wrong party");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Refuse a parked action, moving it to `rejected`
    ///
    /// # Errors
    ///
    /// Returns error if the token is unknown or already used
    pub fn deny(&self, token: &str, reason: &str) -> Result<GuardDecision, GuardError> {
        let (issued, action) = self.tokens.revoke(token)?;
        let decision = GuardDecision::rejected(reason);
        let mut fsm = GuardFsm::resume(GoalGuardState::PendingHuman);
        self.record(
            &mut fsm,
            GoalGuardState::Rejected,
            &issued.principal,
            &action,
            decision.clone(),
            Some(issued.token),
        )?;
        self.hub.withdraw(token);
        self.hub.publish(ApprovalEvent::Denied {
            key: token.to_string(),
            reason: reason.to_string(),
        });
        tracing::info!(action = %action.id, reason, "parked action denied");
        Ok(decision)
    }

    fn reject(
        &self,
        fsm: &mut GuardFsm,
        principal: &Principal,
        action: &Action,
        reason: String,
    ) -> Result<GuardEvaluation, GuardError> {
        let decision = GuardDecision::rejected(reason);
        self.record(fsm, GoalGuardState::Rejected, principal, action, decision.clone(), None)?;
        tracing::info!(action = %action.id, principal = %principal.id, reason = %decision.reason, "action rejected");
        Ok(GuardEvaluation {
            state: fsm.state(),
            decision,
            assessment: None,
            pending: None,
        })
    }

    fn record(
        &self,
        fsm: &mut GuardFsm,
        to: GoalGuardState,
        principal: &Principal,
        action: &Action,
        decision: GuardDecision,
        approval_token: Option<String>,
    ) -> Result<(), GuardError> {
        let from = fsm.transition(to)?;
        self.audit.append(AuditEntry {
            timestamp: self.clock.now(),
            principal: principal.clone(),
            action: action.clone(),
            decision,
            state_transition: Some(StateTransition { from, to }),
            approval_token,
        })?;
        Ok(())
    }
}

impl std::fmt::Debug for GoalGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalGuard")
            .field("config", &self.config)
            .field("audit", &self.audit.len())
            .finish()
    }
}

/// Required permissions the principal does not hold with matching conditions
fn missing_permissions(principal: &Principal, action: &Action) -> Vec<String> {
    let metadata = action.metadata_or_empty();
    action
        .required_permissions
        .iter()
        .filter(|required| {
            !required.conditions_hold(&metadata)
                || !principal
                    .permissions
                    .iter()
                    .any(|granted| granted.covers(required) && granted.conditions_hold(&metadata))
        })
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::DeclaredTierClassifier;
    use crate::config::DenyRule;
    use aureus_core::{ManualClock, Permission, RiskTier};

    fn reader() -> Principal {
        Principal::agent("agent-1").with_permission(Permission::new("*", "*"))
    }

    fn action(name: &str, tier: RiskTier) -> Action {
        Action::new(format!("wf:{name}"), name, tier)
    }

    fn transitions(guard: &GoalGuard) -> Vec<(GoalGuardState, GoalGuardState)> {
        guard
            .audit()
            .entries()
            .iter()
            .filter_map(|e| e.state_transition.map(|t| (t.from, t.to)))
            .collect()
    }

    #[test]
    fn test_low_risk_approved() {
        let guard = GoalGuard::new(GuardConfig::default());
        let eval = guard.evaluate(&reader(), &action("read_document", RiskTier::Low)).unwrap();
        assert_eq!(eval.state, GoalGuardState::Approved);
        assert!(eval.decision.allowed);
        assert_eq!(
            transitions(&guard),
            vec![
                (GoalGuardState::Idle, GoalGuardState::Evaluating),
                (GoalGuardState::Evaluating, GoalGuardState::Approved),
            ]
        );
    }

    #[test]
    fn test_declared_critical_parks() {
        let guard = GoalGuard::new(GuardConfig::default());
        let eval = guard.evaluate(&reader(), &action("transform", RiskTier::Critical)).unwrap();
        assert_eq!(eval.state, GoalGuardState::PendingHuman);
        assert!(eval.decision.requires_human_approval);
        let pending = eval.pending.unwrap();
        assert_eq!(eval.decision.approval_token.as_deref(), Some(pending.token.token.as_str()));
        assert_eq!(guard.hub().pending(), vec![pending.token.token.clone()]);
    }

    #[test]
    fn test_classifier_escalates_but_never_downgrades() {
        let guard = GoalGuard::new(GuardConfig::default());
        let eval = guard.evaluate(&reader(), &action("delete_record", RiskTier::Low)).unwrap();
        assert_eq!(eval.state, GoalGuardState::PendingHuman);

        let guard = GoalGuard::new(GuardConfig::default());
        let admin = Principal::agent("admin-bot").with_permission(Permission::new("*", "*"));
        let eval = guard.evaluate(&admin, &action("read_document", RiskTier::High)).unwrap();
        assert_eq!(eval.state, GoalGuardState::PendingHuman);
    }

    #[test]
    fn test_missing_permission_rejected() {
        let guard = GoalGuard::new(GuardConfig::default());
        let principal = Principal::agent("agent-1").with_permission(Permission::new("read", "documents/*"));
        let act = action("update_record", RiskTier::Low).requiring(Permission::new("write", "records/1"));
        let eval = guard.evaluate(&principal, &act).unwrap();
        assert_eq!(eval.state, GoalGuardState::Rejected);
        assert!(eval.decision.reason.contains("write:records/1"));
    }

    #[test]
    fn test_permission_conditions() {
        let guard = GoalGuard::new(GuardConfig::default());
        let principal = Principal::agent("agent-1").with_permission(
            Permission::new("write", "records/*").with_condition("env", json!("staging")),
        );
        let base = action("update_record", RiskTier::Low).requiring(Permission::new("write", "records/1"));

        let prod = base.clone().with_metadata("env", json!("prod"));
        assert_eq!(guard.evaluate(&principal, &prod).unwrap().state, GoalGuardState::Rejected);

        let staging = base.with_metadata("env", json!("staging"));
        assert_eq!(guard.evaluate(&principal, &staging).unwrap().state, GoalGuardState::Approved);
    }

    #[test]
    fn test_deny_rule() {
        let config = GuardConfig::default().with_deny_rule(DenyRule::action("delete_*", "no deletes"));
        let guard = GoalGuard::new(config);
        let eval = guard.evaluate(&reader(), &action("delete_database", RiskTier::Low)).unwrap();
        assert_eq!(eval.state, GoalGuardState::Rejected);
        assert!(eval.assessment.is_none());
    }

    #[test]
    fn test_repeated_denials() {
        let guard = GoalGuard::new(GuardConfig::default().with_repeated_denial_limit(2));
        let nobody = Principal::agent("agent-9");
        let act = action("update_record", RiskTier::Low).requiring(Permission::new("write", "records/1"));
        for _ in 0..2 {
            let eval = guard.evaluate(&nobody, &act).unwrap();
            assert!(eval.decision.reason.starts_with("missing permissions"));
        }
        let eval = guard.evaluate(&nobody, &act).unwrap();
        assert!(eval.decision.reason.starts_with("repeated denials"));
    }

    #[test]
    fn test_approve_consumes_token() {
        let guard = GoalGuard::new(GuardConfig::default());
        let act = action("transform", RiskTier::Critical);
        let eval = guard.evaluate(&reader(), &act).unwrap();
        let token = eval.pending.unwrap().token.token;

        let decision = guard.approve(&token, &act.id, &reader().id).unwrap();
        assert!(decision.allowed);
        assert!(matches!(
            guard.approve(&token, &act.id, &reader().id),
            Err(GuardError::ApprovalTokenReused { .. })
        ));
        assert_eq!(
            transitions(&guard).last(),
            Some(&(GoalGuardState::PendingHuman, GoalGuardState::Approved))
        );
        assert_eq!(guard.resolution(&token), Some(GoalGuardState::Approved));
        guard.audit().verify().unwrap();
    }

    #[test]
    fn test_expired_token_rejects() {
        let clock = Arc::new(ManualClock::default());
        let guard = GoalGuard::with_clock(GuardConfig::default().with_token_ttl_ms(1_000), clock.clone())
            .with_classifier(Arc::new(DeclaredTierClassifier));
        let act = action("transform", RiskTier::High);
        let eval = guard.evaluate(&reader(), &act).unwrap();
        let token = eval.pending.unwrap().token.token;
        clock.advance(chrono::Duration::seconds(2));
        assert!(matches!(
            guard.approve(&token, &act.id, &reader().id),
            Err(GuardError::ApprovalExpired { .. })
        ));
        assert_eq!(
            transitions(&guard).last(),
            Some(&(GoalGuardState::PendingHuman, GoalGuardState::Rejected))
        );
    }

    #[test]
    fn test_deny_parked_action() {
        let guard = GoalGuard::new(GuardConfig::default());
        let act = action("transform", RiskTier::Critical);
        let eval = guard.evaluate(&reader(), &act).unwrap();
        let token = eval.pending.unwrap().token.token;
        assert_eq!(guard.resolution(&token), None);
        let decision = guard.deny(&token, "not today").unwrap();
        assert!(!decision.allowed);
        assert_eq!(guard.resolution(&token), Some(GoalGuardState::Rejected));
        assert!(guard.approve(&token, &act.id, &reader().id).is_err());
    }

    #[test]
    fn test_approve_requires_issuing_principal() {
        let guard = GoalGuard::new(GuardConfig::default());
        let alice = Principal::agent("alice").with_permission(Permission::new("*", "*"));
        let act = action("transfer_funds", RiskTier::Critical);
        let token = guard.evaluate(&alice, &act).unwrap().pending.unwrap().token.token;

        let err = guard
            .approve(&token, &act.id, &PrincipalId::new("mallory"))
            .unwrap_err();
        assert!(matches!(err, GuardError::TokenMismatch { .. }));
        assert_eq!(guard.resolution(&token), None);
        assert_eq!(guard.tokens().outstanding(), 1);

        assert!(guard.approve(&token, &act.id, &alice.id).unwrap().allowed);
        assert_eq!(guard.resolution(&token), Some(GoalGuardState::Approved));
    }

    #[test]
    fn test_approve_requires_parked_action() {
        let guard = GoalGuard::new(GuardConfig::default());
        let act = action("transfer_funds", RiskTier::Critical);
        let token = guard.evaluate(&reader(), &act).unwrap().pending.unwrap().token.token;

        let elsewhere = ActionId::new("wf:delete_database");
        assert!(matches!(
            guard.approve(&token, &elsewhere, &reader().id),
            Err(GuardError::TokenMismatch { .. })
        ));
        assert_eq!(guard.resolution(&token), None);
        assert!(guard.approve(&token, &act.id, &reader().id).is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_approvals_single_winner() {
        let guard = GoalGuard::new(GuardConfig::default());
        let act = action("transform", RiskTier::Critical);
        let eval = guard.evaluate(&reader(), &act).unwrap();
        let token = eval.pending.unwrap().token.token;

        let attempts: Vec<_> = (0..12)
            .map(|_| {
                let guard = guard.clone();
                let token = token.clone();
                let action_id = act.id.clone();
                tokio::spawn(async move { guard.approve(&token, &action_id, &reader().id) })
            })
            .collect();
        let mut outcomes = Vec::new();
        for attempt in attempts {
            outcomes.push(attempt.await.unwrap());
        }
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, GuardError::ApprovalTokenReused { .. })));
    }
}
