//! # FastSkill Moderation
//!
//! Trust and moderation lifecycle for skills published to a FastSkill
//! registry.
//!
//! ## Architecture
//!
//! The crate provides:
//! - A quality gate and trust classifier applied when a skill is created
//! - Scanner adapters (file reputation, LLM judge) run out-of-band
//! - A verdict arbiter folding scanner verdicts into one moderation state
//! - Moderator actions, user reports, bans and the ban cascade
//! - A batched, resumable hard-delete saga
//! - A cached count of publicly visible skills
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use fastskill_moderation::core::{
//!     CounterBackend, MemoryBlobStorage, ModerationConfig, ModerationService, QueueScheduler,
//!     ServicePorts, SystemClock,
//! };
//! use fastskill_moderation::storage::MemoryRegistryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryRegistryStore::new());
//!     let scheduler = Arc::new(QueueScheduler::new());
//!     let service = ModerationService::new(
//!         ServicePorts {
//!             store: store.clone(),
//!             rate_store: store.clone(),
//!             counter: CounterBackend::Available(store.clone()),
//!             scheduler: scheduler.clone(),
//!             blobs: Arc::new(MemoryBlobStorage::new()),
//!             clock: Arc::new(SystemClock),
//!             file_reputation: None,
//!             llm_judge: None,
//!         },
//!         ModerationConfig::default(),
//!     )?;
//!
//!     println!("{} skills visible", service.visible_skill_count().await?);
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod http;
pub mod scanners;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
#[doc(hidden)]
pub mod test_utils;

pub use core::service::{ModerationService, ServiceError, ServicePorts};
pub use core::ModerationConfig;

/// Version of the moderation service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging for the service (safe for testing)
pub fn init_logging() {
    // Only initialize logging once
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "fastskill_moderation=info".into());

        let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();

        // This will fail silently if already initialized
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::TestHarness;

    #[tokio::test]
    async fn test_service_initialization() {
        init_logging();
        let harness = TestHarness::new();
        assert_eq!(harness.service.visible_skill_count().await.unwrap(), 0);
        assert!(harness.service.file_reputation().is_some());
        assert!(harness.service.llm_judge().is_some());
    }
}
