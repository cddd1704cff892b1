//! Validators and the registry that names them.

use crate::commit::Commit;
use crate::error::CrvError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Stable failure codes for validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureTaxonomy {
    /// Required data is absent
    MissingData,
    /// Data conflicts with existing state
    Conflict,
    /// The change is outside the task's scope
    OutOfScope,
    /// Confidence is under the required threshold
    LowConfidence,
    /// The change violates a policy
    PolicyViolation,
    /// The producing tool misbehaved
    ToolError,
    /// Output differs between identical runs
    NonDeterminism,
}

impl FailureTaxonomy {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingData => "MISSING_DATA",
            Self::Conflict => "CONFLICT",
            Self::OutOfScope => "OUT_OF_SCOPE",
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::PolicyViolation => "POLICY_VIOLATION",
            Self::ToolError => "TOOL_ERROR",
            Self::NonDeterminism => "NON_DETERMINISM",
        }
    }
}

impl fmt::Display for FailureTaxonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one validator on one commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether validation passed
    pub valid: bool,
    /// Why
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Confidence in `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Additional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Failure code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<FailureTaxonomy>,
    /// Remediation hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ValidationResult {
    /// A passing result
    #[must_use]
    pub fn pass() -> Self {
        Self {
            valid: true,
            reason: None,
            confidence: None,
            metadata: None,
            failure_code: None,
            remediation: None,
        }
    }

    /// A failing result
    #[must_use]
    pub fn fail(code: FailureTaxonomy, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            failure_code: Some(code),
            ..Self::pass()
        }
    }

    /// Set the confidence, clamped to `[0, 1]`
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// Set the remediation hint
    #[must_use]
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    /// Tag with the validator's name
    #[must_use]
    pub fn with_validator(mut self, name: &str) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert("validator".to_string(), Value::String(name.to_string()));
        self
    }

    /// Confidence with absence read as full confidence
    #[must_use]
    pub fn effective_confidence(&self) -> f64 {
        self.confidence.unwrap_or(1.0)
    }
}

/// A named check over a commit
pub trait Validator: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Check the commit
    fn validate(&self, commit: &Commit) -> ValidationResult;
}

/// Requires the listed dotted paths to be present and non-null in `data`
#[derive(Debug, Clone)]
pub struct RequiredFields {
    name: String,
    fields: Vec<String>,
}

impl RequiredFields {
    /// Create the validator
    #[must_use]
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }
}

impl Validator for RequiredFields {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, commit: &Commit) -> ValidationResult {
        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| commit.field(f).is_none_or(Value::is_null))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            ValidationResult::pass()
        } else {
            ValidationResult::fail(
                FailureTaxonomy::MissingData,
                format!("missing fields: {}", missing.join(", ")),
            )
            .with_remediation("supply the missing fields and resubmit")
        }
    }
}

/// Requires a numeric field to lie within inclusive bounds
#[derive(Debug, Clone)]
pub struct NumericBound {
    name: String,
    field: String,
    min: Option<f64>,
    max: Option<f64>,
}

impl NumericBound {
    /// Create an unbounded check on `field`
    #[must_use]
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            min: None,
            max: None,
        }
    }

    /// Set the lower bound
    #[must_use]
    pub fn at_least(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Set the upper bound
    #[must_use]
    pub fn at_most(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// `balance_positive`: `data.balance` must not be negative
    #[must_use]
    pub fn balance_positive() -> Self {
        Self::new("balance_positive", "balance").at_least(0.0)
    }
}

impl Validator for NumericBound {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, commit: &Commit) -> ValidationResult {
        let Some(value) = commit.field(&self.field).and_then(Value::as_f64) else {
            return ValidationResult::fail(
                FailureTaxonomy::MissingData,
                format!("{} is missing or not a number", self.field),
            );
        };
        if let Some(min) = self.min.filter(|min| value < *min) {
            return ValidationResult::fail(
                FailureTaxonomy::PolicyViolation,
                format!("{} = {} is below {}", self.field, value, min),
            )
            .with_remediation(format!("keep {} at or above {}", self.field, min));
        }
        if let Some(max) = self.max.filter(|max| value > *max) {
            return ValidationResult::fail(
                FailureTaxonomy::PolicyViolation,
                format!("{} = {} is above {}", self.field, value, max),
            )
            .with_remediation(format!("keep {} at or below {}", self.field, max));
        }
        ValidationResult::pass()
    }
}

/// Validator backed by a closure
pub struct FnValidator<F> {
    name: String,
    func: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&Commit) -> ValidationResult + Send + Sync,
{
    /// Wrap a closure
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Commit) -> ValidationResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, commit: &Commit) -> ValidationResult {
        (self.func)(commit)
    }
}

/// Validators addressable by name from gate configurations
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: IndexMap<String, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in validators
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new().with(NumericBound::balance_positive())
    }

    /// Register a validator
    ///
    /// # Errors
    ///
    /// Returns error if the name is taken
    pub fn register(&mut self, validator: Arc<dyn Validator>) -> Result<(), CrvError> {
        let name = validator.name().to_string();
        if self.validators.contains_key(&name) {
            return Err(CrvError::DuplicateValidator { name });
        }
        self.validators.insert(name, validator);
        Ok(())
    }

    /// Register a validator, replacing any of the same name
    #[must_use]
    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.validators
            .insert(validator.name().to_string(), Arc::new(validator));
        self
    }

    /// Look up by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Validator>> {
        self.validators.get(name)
    }

    /// Registered names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.validators.keys().map(String::as_str)
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.validators.keys()).finish()
    }
}
