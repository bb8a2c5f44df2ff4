//! Core moderation modules

pub mod arbiter;
pub mod ban;
pub mod blob_storage;
pub mod clock;
pub mod config;
pub mod hard_delete;
pub mod model;
pub mod moderation;
pub mod publish;
pub mod quality;
pub mod rate_limit;
pub mod scheduler;
pub mod service;
pub mod trust;
pub mod visibility;

// Re-export main types for convenience
pub use arbiter::{fold, reasons, FoldContext, FoldMode, ModerationState, Transition};
pub use ban::{BanService, CascadeStep};
pub use blob_storage::{
    create_blob_storage, BlobStorage, BlobStorageConfig, LocalBlobStorage, MemoryBlobStorage,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ModerationConfig;
pub use hard_delete::{HardDeletePhase, HardDeleteSaga, StepOutcome};
pub use model::*;
pub use moderation::{ModerationEngine, ModeratorAction, QueueHealth, ReportOutcome};
pub use publish::{PublishOutcome, PublishPipeline, PublishRequest, UploadedFile};
pub use quality::{QualityAssessment, QualityConfig, QualityDecision};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use scheduler::{QueueScheduler, ScheduledTask, TaskRunner, TaskScheduler, TokioScheduler};
pub use service::{ModerationService, ServiceContext, ServiceError, ServicePorts};
pub use trust::{classify, PublisherSnapshot, TrustConfig, TrustTier};
pub use visibility::{is_publicly_visible, CounterBackend, GlobalVisibilityCounter};
