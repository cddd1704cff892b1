//! Risk tiers, intents, and data zones.

use serde::{Deserialize, Serialize};

/// Risk tier for action classification
///
/// Ordered from least to most risky. Workflow specs spell tiers in upper
/// case (`"HIGH"`), policy records in lower case (`"high"`); both parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    /// Low risk, safe to run unattended
    #[serde(alias = "low")]
    Low,
    /// Medium risk
    #[serde(alias = "medium")]
    Medium,
    /// High risk
    #[serde(alias = "high")]
    High,
    /// Critical risk
    #[serde(alias = "critical")]
    Critical,
}

impl RiskTier {
    /// Map a 0..=100 risk score onto a tier
    ///
    /// Bands: low < 30 <= medium < 70 <= high < 90 <= critical.
    #[must_use]
    pub const fn from_score(score: u8) -> Self {
        match score {
            0..=29 => Self::Low,
            30..=69 => Self::Medium,
            70..=89 => Self::High,
            _ => Self::Critical,
        }
    }

    /// Lower-case name used in policy records
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Default for RiskTier {
    fn default() -> Self {
        Self::Low
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allowed intents for actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Read-only access
    Read,
    /// Mutation
    Write,
    /// Deletion
    Delete,
    /// Code or process execution
    Execute,
    /// Administrative operation
    Admin,
}

/// Data zones for resource isolation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataZone {
    /// Public data
    Public,
    /// Internal data
    Internal,
    /// Confidential data
    Confidential,
    /// Restricted data
    Restricted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(RiskTier::Low < RiskTier::Medium);
        assert!(RiskTier::High < RiskTier::Critical);
        assert_eq!(RiskTier::Medium.max(RiskTier::High), RiskTier::High);
    }

    #[test]
    fn test_tier_parses_both_cases() {
        let upper: RiskTier = serde_json::from_str("\"CRITICAL\"").unwrap();
        let lower: RiskTier = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(upper, RiskTier::Critical);
        assert_eq!(lower, RiskTier::Critical);
        assert_eq!(serde_json::to_string(&RiskTier::Low).unwrap(), "\"LOW\"");
    }

    #[test]
    fn test_from_score_bands() {
        assert_eq!(RiskTier::from_score(0), RiskTier::Low);
        assert_eq!(RiskTier::from_score(29), RiskTier::Low);
        assert_eq!(RiskTier::from_score(30), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(70), RiskTier::High);
        assert_eq!(RiskTier::from_score(95), RiskTier::Critical);
    }
}
