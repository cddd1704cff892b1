//! Risk classification.
//!
//! A classifier maps an action and principal to a score in `0..=100` and
//! the tier that score falls in. Classifiers are deterministic: the same
//! inputs always produce the same assessment.

use crate::principal::{Action, Principal};
use aureus_core::RiskTier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A classifier's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Score in `0..=100`
    pub score: u8,
    /// Tier for the score
    pub tier: RiskTier,
}

impl RiskAssessment {
    /// Assessment for a score, clamped to 100
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        let score = score.min(100);
        Self {
            score,
            tier: RiskTier::from_score(score),
        }
    }
}

/// Pluggable risk classifier
pub trait RiskClassifier: Send + Sync {
    /// Classify an action attempted by a principal
    fn classify(&self, action: &Action, principal: &Principal) -> RiskAssessment;
}

/// Trusts the action's declared tier
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredTierClassifier;

impl RiskClassifier for DeclaredTierClassifier {
    fn classify(&self, action: &Action, _principal: &Principal) -> RiskAssessment {
        let score = match action.risk_tier {
            RiskTier::Low => 10,
            RiskTier::Medium => 50,
            RiskTier::High => 80,
            RiskTier::Critical => 95,
        };
        RiskAssessment {
            score,
            tier: action.risk_tier,
        }
    }
}

const ACTION_SCORES: &[(&str, u8)] = &[
    ("read_document", 10),
    ("send_email", 25),
    ("create_task", 20),
    ("update_record", 35),
    ("delete_record", 85),
    ("delete_database", 95),
    ("execute_code", 90),
    ("modify_permissions", 80),
    ("transfer_funds", 95),
    ("access_admin", 85),
];

/// Scores actions from a name table, discounting trusted principals
#[derive(Debug, Clone)]
pub struct ScoreTableClassifier {
    scores: HashMap<String, u8>,
    default_score: u8,
    trusted_markers: Vec<String>,
    trusted_discount: u8,
}

impl ScoreTableClassifier {
    /// Classifier with the built-in action table
    #[must_use]
    pub fn new() -> Self {
        Self {
            scores: ACTION_SCORES
                .iter()
                .map(|(name, score)| ((*name).to_string(), *score))
                .collect(),
            default_score: 50,
            trusted_markers: vec!["admin".to_string(), "privileged".to_string()],
            trusted_discount: 15,
        }
    }

    /// Set or override the score for an action name
    #[must_use]
    pub fn with_score(mut self, action: impl Into<String>, score: u8) -> Self {
        self.scores.insert(action.into(), score.min(100));
        self
    }

    /// Score for names not in the table
    #[must_use]
    pub fn with_default_score(mut self, score: u8) -> Self {
        self.default_score = score.min(100);
        self
    }

    fn is_trusted(&self, principal: &Principal) -> bool {
        let id = principal.id.as_str().to_lowercase();
        self.trusted_markers.iter().any(|marker| id.contains(marker.as_str()))
    }
}

impl Default for ScoreTableClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskClassifier for ScoreTableClassifier {
    fn classify(&self, action: &Action, principal: &Principal) -> RiskAssessment {
        let base = self
            .scores
            .get(&action.name)
            .copied()
            .unwrap_or(self.default_score);
        let score = if self.is_trusted(principal) {
            base.saturating_sub(self.trusted_discount)
        } else {
            base
        };
        RiskAssessment::from_score(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(name: &str) -> Action {
        Action::new(format!("act-{name}"), name, RiskTier::Low)
    }

    #[test]
    fn test_table_scores() {
        let classifier = ScoreTableClassifier::new();
        let agent = Principal::agent("agent-1");
        assert_eq!(
            classifier.classify(&action("read_document"), &agent),
            RiskAssessment { score: 10, tier: RiskTier::Low }
        );
        assert_eq!(classifier.classify(&action("delete_record"), &agent).tier, RiskTier::High);
        assert_eq!(classifier.classify(&action("transfer_funds"), &agent).tier, RiskTier::Critical);
        assert_eq!(classifier.classify(&action("unheard_of"), &agent).tier, RiskTier::Medium);
    }

    #[test]
    fn test_trusted_discount() {
        let classifier = ScoreTableClassifier::new();
        let admin = Principal::agent("ops-Admin-3");
        let assessment = classifier.classify(&action("delete_record"), &admin);
        assert_eq!(assessment.score, 70);
        assert_eq!(assessment.tier, RiskTier::High);
        assert_eq!(classifier.classify(&action("read_document"), &admin).score, 0);
    }

    #[test]
    fn test_deterministic() {
        let classifier = ScoreTableClassifier::new();
        let agent = Principal::agent("agent-1");
        let first = classifier.classify(&action("send_email"), &agent);
        for _ in 0..10 {
            assert_eq!(classifier.classify(&action("send_email"), &agent), first);
        }
    }

    #[test]
    fn test_declared_tier() {
        let mut critical = action("anything");
        critical.risk_tier = RiskTier::Critical;
        let assessment = DeclaredTierClassifier.classify(&critical, &Principal::agent("a"));
        assert_eq!(assessment.tier, RiskTier::Critical);
    }
}
