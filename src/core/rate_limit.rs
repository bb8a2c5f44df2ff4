//! Creation rate limiter for new skill slugs
//!
//! Exact sliding windows (one hour, one day) over a per-owner hit log. The
//! check and the increment share one compare-and-set write; losing that race
//! denies the publish instead of retrying.

use crate::core::model::{RateWindow, UserId};
use crate::core::service::ServiceError;
use crate::core::trust::TrustTier;
use crate::storage::{RateLimitStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCaps {
    pub hourly: u32,
    pub daily: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub low: RateCaps,
    pub trusted: RateCaps,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            low: RateCaps {
                hourly: 5,
                daily: 10,
            },
            trusted: RateCaps {
                hourly: 20,
                daily: 60,
            },
        }
    }
}

impl RateLimitConfig {
    pub fn caps(&self, tier: TrustTier) -> RateCaps {
        match tier {
            TrustTier::Low => self.low,
            TrustTier::Trusted => self.trusted,
        }
    }
}

fn window_key(owner: UserId) -> String {
    format!("skill-create:{}", owner)
}

/// Seconds until the oldest hit inside `window` slides out
fn retry_after(hits: &[DateTime<Utc>], window: Duration, now: DateTime<Utc>) -> u64 {
    hits.iter()
        .filter(|hit| **hit > now - window)
        .min()
        .map(|oldest| (*oldest + window - now).num_seconds().max(1) as u64)
        .unwrap_or(1)
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Count this creation against the owner's windows, or reject it
    pub async fn check_and_record(
        &self,
        owner: UserId,
        tier: TrustTier,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let key = window_key(owner);
        let mut window = self
            .store
            .get_rate_window(&key)
            .await?
            .unwrap_or_else(|| RateWindow {
                key: key.clone(),
                ..Default::default()
            });

        let day = Duration::days(1);
        let hour = Duration::hours(1);
        window.hits.retain(|hit| *hit > now - day);
        let last_hour = window.hits.iter().filter(|hit| **hit > now - hour).count();
        let last_day = window.hits.len();
        let caps = self.config.caps(tier);

        if last_hour >= caps.hourly as usize {
            return Err(ServiceError::RateLimited {
                message: format!(
                    "Hourly limit of {} new skills reached for {} trust publishers",
                    caps.hourly, tier
                ),
                retry_after_secs: retry_after(&window.hits, hour, now),
            });
        }
        if last_day >= caps.daily as usize {
            return Err(ServiceError::RateLimited {
                message: format!(
                    "Daily limit of {} new skills reached for {} trust publishers",
                    caps.daily, tier
                ),
                retry_after_secs: retry_after(&window.hits, day, now),
            });
        }

        window.hits.push(now);
        match self.store.put_rate_window(window).await {
            Ok(_) => {
                debug!(
                    "Recorded skill creation for {} ({} in last hour)",
                    owner,
                    last_hour + 1
                );
                Ok(())
            }
            Err(StoreError::Conflict(_)) => {
                warn!("Concurrent publish for {} lost rate-limit race", owner);
                Err(ServiceError::RateLimited {
                    message: "Concurrent publish in progress; try again shortly".to_string(),
                    retry_after_secs: 1,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
