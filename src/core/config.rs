//! Service configuration
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Values are layered: defaults, then an optional TOML file,
//! then `FASTSKILL_MODERATION__SECTION__KEY` environment variables.

use crate::core::blob_storage::BlobStorageConfig;
use crate::core::quality::QualityConfig;
use crate::core::rate_limit::RateLimitConfig;
use crate::core::service::ServiceError;
use crate::core::trust::TrustConfig;
use crate::scanners::ScannerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "FASTSKILL_MODERATION";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationPolicyConfig {
    /// Distinct reports that auto-hide a skill
    pub auto_hide_report_threshold: u32,
    /// Attempts for a compare-and-set skill write before giving up
    pub write_attempts: u32,
    /// Skills hidden per ban cascade batch
    pub ban_batch_size: usize,
}

impl Default for ModerationPolicyConfig {
    fn default() -> Self {
        Self {
            auto_hide_report_threshold: 3,
            write_attempts: 5,
            ban_batch_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardDeleteConfig {
    /// Rows removed per saga step
    pub batch_size: usize,
    /// How long a hard-deleted slug stays reserved for its previous owner
    pub slug_reservation_days: u32,
    /// Delay before each self-scheduled continuation
    pub continuation_delay_ms: u64,
}

impl Default for HardDeleteConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            slug_reservation_days: 30,
            continuation_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub max_bundle_bytes: u64,
    pub max_files: usize,
    /// File extensions accepted as text, besides files without extension
    pub text_extensions: Vec<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_bundle_bytes: 50 * 1024 * 1024,
            max_files: 200,
            text_extensions: [
                "md", "markdown", "txt", "json", "yaml", "yml", "toml", "py", "js", "ts", "sh",
                "rs", "go", "rb", "html", "css", "csv", "xml", "sql", "ini", "cfg",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed for CORS; empty allows none
    pub allowed_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub quality: QualityConfig,
    pub trust: TrustConfig,
    pub rate_limit: RateLimitConfig,
    pub scanners: ScannerConfig,
    pub moderation: ModerationPolicyConfig,
    pub hard_delete: HardDeleteConfig,
    pub publish: PublishConfig,
    /// Page size of the visibility recount scan
    pub recount_page_size: usize,
    pub storage: BlobStorageConfig,
    pub http: HttpConfig,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            quality: QualityConfig::default(),
            trust: TrustConfig::default(),
            rate_limit: RateLimitConfig::default(),
            scanners: ScannerConfig::default(),
            moderation: ModerationPolicyConfig::default(),
            hard_delete: HardDeleteConfig::default(),
            publish: PublishConfig::default(),
            recount_page_size: 500,
            storage: BlobStorageConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl ModerationConfig {
    /// Load defaults, then the optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ServiceError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: ModerationConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ServiceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.hard_delete.batch_size == 0 {
            return Err(ServiceError::Config(
                "hard_delete.batch_size must be at least 1".to_string(),
            ));
        }
        if self.moderation.write_attempts == 0 {
            return Err(ServiceError::Config(
                "moderation.write_attempts must be at least 1".to_string(),
            ));
        }
        if self.moderation.ban_batch_size == 0 {
            return Err(ServiceError::Config(
                "moderation.ban_batch_size must be at least 1".to_string(),
            ));
        }
        for (tier, caps) in [("low", self.rate_limit.low), ("trusted", self.rate_limit.trusted)] {
            if caps.hourly > caps.daily {
                return Err(ServiceError::Config(format!(
                    "rate_limit.{}: hourly cap exceeds daily cap",
                    tier
                )));
            }
        }
        if self.recount_page_size == 0 {
            return Err(ServiceError::Config(
                "recount_page_size must be at least 1".to_string(),
            ));
        }
        for (name, base_url) in [
            ("file_reputation", &self.scanners.file_reputation.base_url),
            ("llm_judge", &self.scanners.llm_judge.base_url),
        ] {
            let parsed = url::Url::parse(base_url).map_err(|e| {
                ServiceError::Config(format!("scanners.{}.base_url '{}': {}", name, base_url, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ServiceError::Config(format!(
                    "scanners.{}.base_url must be http or https",
                    name
                )));
            }
        }
        if self.scanners.retry.max_attempts == 0 {
            return Err(ServiceError::Config(
                "scanners.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ServiceError> {
        toml::to_string_pretty(self).map_err(|e| ServiceError::Config(e.to_string()))
    }
}
