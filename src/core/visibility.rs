//! Global visibility counter
//!
//! Best-effort cache of the number of publicly visible skills. Transitions
//! report a delta; a missing row triggers one paginated recount. Storage that
//! is not provisioned yet is tolerated silently.

use crate::core::clock::Clock;
use crate::core::model::{GlobalStats, ModerationFlag, ModerationStatus, Skill, GLOBAL_STATS_KEY};
use crate::core::service::ServiceError;
use crate::storage::{CounterStore, RegistryStore, StoreError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Not soft-deleted, status undefined or active, not malware-blocked
pub fn is_publicly_visible(skill: &Skill) -> bool {
    skill.soft_deleted_at.is_none()
        && matches!(
            skill.moderation_status,
            None | Some(ModerationStatus::Active)
        )
        && !skill
            .moderation_flags
            .contains(&ModerationFlag::BlockedMalware)
}

/// Counter delta implied by one mutation of a skill
pub fn visibility_delta(before: Option<&Skill>, after: Option<&Skill>) -> i64 {
    let was = before.map(is_publicly_visible).unwrap_or(false);
    let is = after.map(is_publicly_visible).unwrap_or(false);
    i64::from(is) - i64::from(was)
}

/// Where the counter lives, if anywhere
#[derive(Clone)]
pub enum CounterBackend {
    Available(Arc<dyn CounterStore>),
    /// No counter table in this deployment; adjustments are dropped
    Unavailable,
}

pub struct GlobalVisibilityCounter {
    backend: CounterBackend,
    registry: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl GlobalVisibilityCounter {
    pub fn new(
        backend: CounterBackend,
        registry: Arc<dyn RegistryStore>,
        clock: Arc<dyn Clock>,
        page_size: usize,
    ) -> Self {
        Self {
            backend,
            registry,
            clock,
            page_size: page_size.max(1),
        }
    }

    /// Apply a visibility delta after a committed transition. Never fails.
    pub async fn adjust(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        let store = match &self.backend {
            CounterBackend::Available(store) => store,
            CounterBackend::Unavailable => return,
        };

        match store.apply_global_stats_delta(delta, self.clock.now()).await {
            Ok(Some(count)) => debug!("Visible skill count adjusted by {} to {}", delta, count),
            Ok(None) => {
                // Cold start: the recount already reflects the committed change
                if let Err(e) = self.write_baseline(store.as_ref()).await {
                    warn!("Failed to seed visible skill count: {}", e);
                }
            }
            Err(StoreError::NotReady(what)) => {
                debug!("Counter storage not ready ({}), skipping adjust", what)
            }
            Err(e) => warn!("Failed to adjust visible skill count: {}", e),
        }
    }

    /// Current count, recounting when the cached row is missing
    pub async fn read(&self) -> Result<u64, ServiceError> {
        let store = match &self.backend {
            CounterBackend::Available(store) => store,
            CounterBackend::Unavailable => return self.recount().await,
        };
        match store.get_global_stats().await {
            Ok(Some(stats)) => Ok(stats.active_public_skill_count),
            Ok(None) => self.write_baseline(store.as_ref()).await,
            Err(StoreError::NotReady(_)) => self.recount().await,
            Err(e) => Err(e.into()),
        }
    }

    /// Full paginated scan of the skill table
    pub async fn recount(&self) -> Result<u64, ServiceError> {
        let mut count = 0u64;
        let mut cursor = None;
        loop {
            let page = self.registry.list_skills(cursor, self.page_size).await?;
            count += page.items.iter().filter(|s| is_publicly_visible(s)).count() as u64;
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(count)
    }

    async fn write_baseline(&self, store: &dyn CounterStore) -> Result<u64, ServiceError> {
        let count = self.recount().await?;
        let stats = GlobalStats {
            key: GLOBAL_STATS_KEY.to_string(),
            active_public_skill_count: count,
            updated_at: self.clock.now(),
        };
        match store.put_global_stats(stats).await {
            Ok(()) => {
                info!("Seeded visible skill count at {}", count);
                Ok(count)
            }
            Err(StoreError::NotReady(_)) => Ok(count),
            Err(e) => Err(e.into()),
        }
    }
}
