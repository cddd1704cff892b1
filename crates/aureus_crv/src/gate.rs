//! Commit gates.
//!
//! Validators run in the order the gate lists them. A commit passes only
//! if every validator is valid and, when a confidence threshold is set,
//! every confidence reaches it. With `block_on_failure` the first failure
//! stops evaluation and the commit is blocked; otherwise every validator
//! runs and a failing commit is let through with a warning.

use crate::commit::Commit;
use crate::error::CrvError;
use crate::recovery::RecoveryStrategy;
use crate::validator::{FailureTaxonomy, ValidationResult, ValidatorRegistry};
use aureus_core::{Clock, SystemClock, TaskId};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Gate name
    pub name: String,
    /// Validator names, run in order
    pub validators: Vec<String>,
    /// Block the commit on the first failure
    pub block_on_failure: bool,
    /// Minimum confidence in `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_confidence: Option<f64>,
    /// Strategy handed back when the commit is blocked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_strategy: Option<RecoveryStrategy>,
}

impl GateConfig {
    /// A blocking gate over `validators`
    #[must_use]
    pub fn blocking(name: impl Into<String>, validators: &[&str]) -> Self {
        Self {
            name: name.into(),
            validators: validators.iter().map(|v| (*v).to_string()).collect(),
            block_on_failure: true,
            required_confidence: None,
            recovery_strategy: None,
        }
    }

    /// A warn-only gate over `validators`
    #[must_use]
    pub fn advisory(name: impl Into<String>, validators: &[&str]) -> Self {
        Self {
            block_on_failure: false,
            ..Self::blocking(name, validators)
        }
    }

    /// Set the confidence threshold
    #[must_use]
    pub fn with_required_confidence(mut self, confidence: f64) -> Self {
        self.required_confidence = Some(confidence);
        self
    }

    /// Set the recovery strategy
    #[must_use]
    pub fn with_recovery(mut self, strategy: RecoveryStrategy) -> Self {
        self.recovery_strategy = Some(strategy);
        self
    }
}

/// Overall gate outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrvStatus {
    /// Every validator passed
    Passed,
    /// The commit was blocked
    Blocked,
    /// Failures were recorded but the commit was allowed
    Warning,
}

/// Detailed gate result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    /// Whether every validator passed
    pub passed: bool,
    /// Gate name
    pub gate_name: String,
    /// Results of the validators that ran, in order
    pub validation_results: Vec<ValidationResult>,
    /// Whether the commit was blocked
    pub blocked_commit: bool,
    /// When the gate ran
    pub timestamp: DateTime<Utc>,
    /// Strategy to apply to the blocked commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_strategy: Option<RecoveryStrategy>,
    /// passed, blocked or warning
    pub crv_status: CrvStatus,
    /// Code of the first failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<FailureTaxonomy>,
    /// Remediation of the first failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

/// A commit together with the gate's ruling on it
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    /// The commit may be applied
    Accepted {
        /// The commit
        commit: Commit,
        /// Gate detail (`passed` or `warning`)
        result: GateResult,
    },
    /// The commit must not be applied
    Blocked {
        /// The commit
        commit: Commit,
        /// Gate detail (`blocked`)
        result: GateResult,
    },
}

impl GateVerdict {
    /// Gate detail
    #[must_use]
    pub fn result(&self) -> &GateResult {
        match self {
            Self::Accepted { result, .. } | Self::Blocked { result, .. } => result,
        }
    }

    /// Whether the commit may be applied
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Split into commit and detail
    #[must_use]
    pub fn into_parts(self) -> (Commit, GateResult) {
        match self {
            Self::Accepted { commit, result } | Self::Blocked { commit, result } => (commit, result),
        }
    }
}

/// Evaluates commits against gate configurations
#[derive(Clone)]
pub struct Gate {
    registry: Arc<ValidatorRegistry>,
    clock: Arc<dyn Clock>,
}

impl Gate {
    /// Create a gate over a validator registry
    #[must_use]
    pub fn new(registry: ValidatorRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            clock: Arc::new(SystemClock),
        }
    }

    /// Read timestamps from `clock`
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Check that a configuration can run
    ///
    /// # Errors
    ///
    /// Returns error on an unknown validator, an out-of-range threshold or
    /// an invalid strategy
    pub fn check_config(&self, config: &GateConfig) -> Result<(), CrvError> {
        if let Some(name) = config
            .validators
            .iter()
            .find(|name| self.registry.get(name).is_none())
        {
            return Err(CrvError::UnknownValidator {
                gate: config.name.clone(),
                validator: name.clone(),
            });
        }
        if let Some(threshold) = config.required_confidence {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(CrvError::InvalidConfig {
                    gate: config.name.clone(),
                    reason: format!("required_confidence {threshold} is outside [0, 1]"),
                });
            }
        }
        if let Some(strategy) = &config.recovery_strategy {
            strategy.check().map_err(|reason| CrvError::InvalidConfig {
                gate: config.name.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Run the gate's validators over a commit
    ///
    /// # Errors
    ///
    /// Returns error if the configuration cannot run
    pub fn evaluate(&self, commit: &Commit, config: &GateConfig) -> Result<GateResult, CrvError> {
        self.check_config(config)?;

        let mut results = Vec::with_capacity(config.validators.len());
        let mut first_failure: Option<usize> = None;

        for name in &config.validators {
            let Some(validator) = self.registry.get(name) else {
                continue;
            };
            let mut result = validator.validate(commit).with_validator(name);
            if result.valid {
                if let Some(threshold) = config.required_confidence {
                    let confidence = result.effective_confidence();
                    if confidence < threshold {
                        result.valid = false;
                        result.failure_code = Some(FailureTaxonomy::LowConfidence);
                        result.reason = Some(format!(
                            "confidence {confidence} is below required {threshold}"
                        ));
                    }
                }
            }

            let failed = !result.valid;
            results.push(result);
            if failed && first_failure.is_none() {
                first_failure = Some(results.len() - 1);
                if config.block_on_failure {
                    break;
                }
            }
        }

        let failure = first_failure.map(|i| &results[i]);
        let failure_code = failure.and_then(|r| r.failure_code);
        let remediation = failure.and_then(|r| r.remediation.clone());
        let passed = failure.is_none();
        let blocked = !passed && config.block_on_failure;
        let crv_status = match (passed, blocked) {
            (true, _) => CrvStatus::Passed,
            (false, true) => CrvStatus::Blocked,
            (false, false) => CrvStatus::Warning,
        };

        tracing::debug!(
            gate = %config.name,
            commit = %commit.id,
            status = ?crv_status,
            ran = results.len(),
            "gate evaluated"
        );

        Ok(GateResult {
            passed,
            gate_name: config.name.clone(),
            validation_results: results,
            blocked_commit: blocked,
            timestamp: self.clock.now(),
            recovery_strategy: if blocked {
                config.recovery_strategy.clone()
            } else {
                None
            },
            crv_status,
            failure_code,
            remediation,
        })
    }

    /// Evaluate and hand the commit back with the verdict
    ///
    /// # Errors
    ///
    /// Returns error if the configuration cannot run
    pub fn submit(&self, commit: Commit, config: &GateConfig) -> Result<GateVerdict, CrvError> {
        let result = self.evaluate(&commit, config)?;
        Ok(if result.blocked_commit {
            GateVerdict::Blocked { commit, result }
        } else {
            GateVerdict::Accepted { commit, result }
        })
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate").field("registry", &self.registry).finish()
    }
}

/// Which gate guards which task's commits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateBindings {
    /// Gate for tasks without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<GateConfig>,
    /// Per-task gates
    #[serde(default)]
    pub tasks: IndexMap<TaskId, GateConfig>,
}

impl GateBindings {
    /// No gates
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate every task with `config` unless overridden
    #[must_use]
    pub fn with_default(mut self, config: GateConfig) -> Self {
        self.default = Some(config);
        self
    }

    /// Gate one task
    #[must_use]
    pub fn with_task(mut self, task: impl Into<TaskId>, config: GateConfig) -> Self {
        self.tasks.insert(task.into(), config);
        self
    }

    /// Gate for a task, if any
    #[must_use]
    pub fn for_task(&self, task: &TaskId) -> Option<&GateConfig> {
        self.tasks.get(task).or(self.default.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{FnValidator, NumericBound};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry(calls: Arc<AtomicUsize>) -> ValidatorRegistry {
        let counted = Arc::clone(&calls);
        ValidatorRegistry::with_builtins()
            .with(FnValidator::new("always_fail", |_: &Commit| {
                ValidationResult::fail(FailureTaxonomy::Conflict, "conflicts with ledger")
            }))
            .with(FnValidator::new("counted", move |_: &Commit| {
                counted.fetch_add(1, Ordering::SeqCst);
                ValidationResult::pass()
            }))
            .with(FnValidator::new("unsure", |_: &Commit| {
                ValidationResult::pass().with_confidence(0.4)
            }))
    }

    #[test]
    fn test_all_pass() {
        let gate = Gate::new(registry(Arc::new(AtomicUsize::new(0))));
        let config = GateConfig::blocking("ledger", &["balance_positive", "counted"]);
        let result = gate
            .evaluate(&Commit::new("c", json!({"balance": 5})), &config)
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.crv_status, CrvStatus::Passed);
        assert_eq!(result.validation_results.len(), 2);
        assert!(!result.blocked_commit);
    }

    #[test]
    fn test_block_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Gate::new(registry(Arc::clone(&calls)));
        let config = GateConfig::blocking("ledger", &["always_fail", "counted"]).with_recovery(
            RecoveryStrategy::Escalate {
                reason: "ledger conflict".to_string(),
            },
        );
        let verdict = gate.submit(Commit::new("c", json!({})), &config).unwrap();
        assert!(!verdict.is_accepted());
        let result = verdict.result();
        assert_eq!(result.crv_status, CrvStatus::Blocked);
        assert_eq!(result.failure_code, Some(FailureTaxonomy::Conflict));
        assert_eq!(result.validation_results.len(), 1);
        assert!(result.recovery_strategy.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_blocking_gate_never_accepts_with_any_failure() {
        let gate = Gate::new(registry(Arc::new(AtomicUsize::new(0))));
        for order in [
            vec!["counted", "always_fail", "balance_positive"],
            vec!["balance_positive", "counted", "always_fail"],
            vec!["always_fail"],
        ] {
            let config = GateConfig::blocking("g", &order);
            let verdict = gate
                .submit(Commit::new("c", json!({"balance": 1})), &config)
                .unwrap();
            assert!(!verdict.is_accepted());
        }
    }

    #[test]
    fn test_advisory_runs_all_and_warns() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Gate::new(registry(Arc::clone(&calls)));
        let config = GateConfig::advisory("ledger", &["always_fail", "counted"]).with_recovery(
            RecoveryStrategy::Ignore {
                justification: "advisory".to_string(),
            },
        );
        let verdict = gate.submit(Commit::new("c", json!({})), &config).unwrap();
        assert!(verdict.is_accepted());
        let result = verdict.result();
        assert_eq!(result.crv_status, CrvStatus::Warning);
        assert!(!result.passed);
        assert!(result.recovery_strategy.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_low_confidence_fails() {
        let gate = Gate::new(registry(Arc::new(AtomicUsize::new(0))));
        let config = GateConfig::blocking("sure", &["unsure"]).with_required_confidence(0.8);
        let result = gate.evaluate(&Commit::new("c", json!({})), &config).unwrap();
        assert_eq!(result.failure_code, Some(FailureTaxonomy::LowConfidence));
        assert!(result.blocked_commit);
    }

    #[test]
    fn test_missing_confidence_counts_as_full() {
        let gate = Gate::new(registry(Arc::new(AtomicUsize::new(0))));
        let config = GateConfig::blocking("sure", &["counted"]).with_required_confidence(1.0);
        assert!(gate.evaluate(&Commit::new("c", json!({})), &config).unwrap().passed);
    }

    #[test]
    fn test_unknown_validator() {
        let gate = Gate::new(ValidatorRegistry::new());
        let err = gate
            .evaluate(&Commit::new("c", json!({})), &GateConfig::blocking("g", &["nope"]))
            .unwrap_err();
        assert!(matches!(err, CrvError::UnknownValidator { .. }));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let gate = Gate::new(ValidatorRegistry::new());
        let config = GateConfig::blocking("g", &[]).with_required_confidence(1.5);
        assert!(matches!(
            gate.check_config(&config),
            Err(CrvError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_bindings_prefer_task_gate() {
        let bindings = GateBindings::new()
            .with_default(GateConfig::advisory("default", &[]))
            .with_task("save", GateConfig::blocking("save_gate", &["balance_positive"]));
        assert_eq!(bindings.for_task(&TaskId::new("save")).unwrap().name, "save_gate");
        assert_eq!(bindings.for_task(&TaskId::new("read")).unwrap().name, "default");
    }

    #[test]
    fn test_balance_gate_blocks_negative() {
        let gate = Gate::new(ValidatorRegistry::new().with(NumericBound::balance_positive()));
        let config = GateConfig::blocking("balance", &["balance_positive"]);
        let verdict = gate
            .submit(Commit::new("c", json!({"balance": -20})), &config)
            .unwrap();
        let (commit, result) = verdict.into_parts();
        assert_eq!(commit.data["balance"], json!(-20));
        assert_eq!(result.failure_code, Some(FailureTaxonomy::PolicyViolation));
    }
}
