//! Publisher trust classification

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Low,
    Trusted,
}

impl TrustTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::Low => "low",
            TrustTier::Trusted => "trusted",
        }
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TrustTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(TrustTier::Low),
            "trusted" => Ok(TrustTier::Trusted),
            other => Err(format!("Invalid trust tier: {}", other)),
        }
    }
}

/// Publisher history captured at the moment of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherSnapshot {
    pub account_age_ms: i64,
    pub lifetime_skill_count: u64,
    pub skills_last_hour: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Minimum account age before a publisher can be trusted
    pub trusted_min_account_age_days: u32,
    /// Minimum number of skills before a publisher can be trusted
    pub trusted_min_lifetime_skills: u64,
    /// Skills in the last hour at or above this demote to low trust
    pub burst_threshold: u64,
    /// Accounts younger than this cannot publish at all
    pub min_account_age_days: u32,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            trusted_min_account_age_days: 30,
            trusted_min_lifetime_skills: 10,
            burst_threshold: 15,
            min_account_age_days: 1,
        }
    }
}

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Classify a publisher from an explicit snapshot; never reads ambient state.
pub fn classify(snapshot: &PublisherSnapshot, config: &TrustConfig) -> TrustTier {
    let old_enough =
        snapshot.account_age_ms >= i64::from(config.trusted_min_account_age_days) * MS_PER_DAY;
    let established = snapshot.lifetime_skill_count >= config.trusted_min_lifetime_skills;
    let bursting = snapshot.skills_last_hour >= config.burst_threshold;

    if old_enough && established && !bursting {
        TrustTier::Trusted
    } else {
        TrustTier::Low
    }
}

/// Days remaining until the account may publish, if it is still too young
pub fn days_until_publish_allowed(account_age_ms: i64, config: &TrustConfig) -> Option<u64> {
    let required = i64::from(config.min_account_age_days) * MS_PER_DAY;
    if account_age_ms >= required {
        None
    } else {
        let remaining = required - account_age_ms.max(0);
        Some(((remaining + MS_PER_DAY - 1) / MS_PER_DAY) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(days: i64, lifetime: u64, last_hour: u64) -> PublisherSnapshot {
        PublisherSnapshot {
            account_age_ms: days * MS_PER_DAY,
            lifetime_skill_count: lifetime,
            skills_last_hour: last_hour,
        }
    }

    #[test]
    fn test_new_account_is_low_trust() {
        assert_eq!(
            classify(&snapshot(2, 0, 0), &TrustConfig::default()),
            TrustTier::Low
        );
    }

    #[test]
    fn test_established_account_is_trusted() {
        assert_eq!(
            classify(&snapshot(45, 12, 1), &TrustConfig::default()),
            TrustTier::Trusted
        );
        assert_eq!(
            classify(&snapshot(45, 9, 0), &TrustConfig::default()),
            TrustTier::Low
        );
    }

    #[test]
    fn test_burst_demotes_trusted_account() {
        let config = TrustConfig::default();
        assert_eq!(
            classify(&snapshot(400, 200, config.burst_threshold), &config),
            TrustTier::Low
        );
    }

    #[test]
    fn test_days_until_publish_allowed() {
        let config = TrustConfig {
            min_account_age_days: 7,
            ..Default::default()
        };
        assert_eq!(days_until_publish_allowed(2 * MS_PER_DAY, &config), Some(5));
        assert_eq!(days_until_publish_allowed(2 * MS_PER_DAY + 1, &config), Some(5));
        assert_eq!(days_until_publish_allowed(7 * MS_PER_DAY, &config), None);
    }
}
