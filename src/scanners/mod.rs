//! External scanner adapters
//!
//! Each adapter inspects one published version out-of-band and reports a
//! verdict through the arbiter. Adapters are idempotent: running one twice
//! for the same version re-applies the same verdict, which folds to a no-op.

pub mod bundle;
pub mod file_reputation;
pub mod llm_judge;
pub mod retry;

pub use bundle::{build_scan_bundle, fingerprint_files, ScanBundle};
pub use file_reputation::{
    AnalysisStats, FileReputationApi, FileReputationScanner, FileReport, VirusTotalClient,
};
pub use llm_judge::{
    build_prompt, parse_judgement, LlmJudgeApi, LlmJudgeScanner, LlmJudgement, OpenAiJudgeClient,
};
pub use retry::RetryPolicy;

use crate::core::arbiter::FoldMode;
use crate::core::blob_storage::BlobStorage;
use crate::core::model::{ScannerId, SkillVersion, Verdict};
use crate::core::service::ServiceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of one scanner task run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Version or skill is gone, or the analysis already went stale
    Skipped,
    /// Verdict recorded and folded into the skill
    Completed(Verdict),
    /// Another poll is scheduled
    Pending { next_attempt: u32 },
    /// Polls exhausted
    Stale,
    /// Scanner output unusable; recorded as an error, not retried
    Failed,
}

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("scanner rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("scanner server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("scanner transport error: {0}")]
    Transport(String),

    #[error("unparsable scanner response: {0}")]
    Parse(String),

    /// Non-retryable client error (bad key, payload too large, ...)
    #[error("scanner rejected request {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl ScannerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScannerError::RateLimited { .. } | ScannerError::Server { .. } | ScannerError::Transport(_)
        )
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ScannerError::RateLimited {
                retry_after_secs: None,
            }
        } else if status.is_server_error() {
            ScannerError::Server {
                status: status.as_u16(),
                body,
            }
        } else {
            ScannerError::Rejected {
                status: status.as_u16(),
                body,
            }
        }
    }
}

impl From<ScannerError> for ServiceError {
    fn from(e: ScannerError) -> Self {
        match e {
            ScannerError::Parse(msg) => ServiceError::Parse(msg),
            other => ServiceError::External(other.to_string()),
        }
    }
}

/// Turn a non-success response into a [`ScannerError`], honoring `Retry-After`
pub(crate) async fn error_from_response(response: reqwest::Response) -> ScannerError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    match ScannerError::from_status(status, body) {
        ScannerError::RateLimited { .. } => ScannerError::RateLimited {
            retry_after_secs: retry_after,
        },
        other => other,
    }
}

/// Read every stored file of a version as `(path, bytes)`
pub(crate) async fn load_version_files(
    blobs: &dyn BlobStorage,
    version: &SkillVersion,
) -> Result<Vec<(String, Vec<u8>)>, ServiceError> {
    let mut files = Vec::with_capacity(version.files.len());
    for file in &version.files {
        let bytes = blobs.download(&file.storage_id).await?;
        files.push((file.path.clone(), bytes));
    }
    Ok(files)
}

impl From<reqwest::Error> for ScannerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ScannerError::Parse(e.to_string())
        } else {
            ScannerError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileReputationConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub mode: FoldMode,
    /// Malicious engine detections needed for a malicious verdict
    pub malicious_threshold: u32,
    /// Suspicious engine detections needed for a suspicious verdict
    pub suspicious_threshold: u32,
}

impl Default for FileReputationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://www.virustotal.com".to_string(),
            api_key_env: "VT_API_KEY".to_string(),
            mode: FoldMode::Authoritative,
            malicious_threshold: 1,
            suspicious_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmJudgeConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub mode: FoldMode,
    /// Hard cap on the rendered prompt
    pub max_prompt_bytes: usize,
    /// Cap on any single file included in the prompt
    pub max_file_bytes: usize,
}

impl Default for LlmJudgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            mode: FoldMode::Authoritative,
            max_prompt_bytes: 64 * 1024,
            max_file_bytes: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Delay between polls for a pending analysis
    pub poll_interval_secs: u64,
    /// Polls before an analysis is marked stale
    pub max_poll_attempts: u32,
    /// Activate a pending skill once every scanner went stale
    pub activate_on_stale: bool,
    pub retry: RetryPolicy,
    pub file_reputation: FileReputationConfig,
    pub llm_judge: LlmJudgeConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_poll_attempts: 10,
            activate_on_stale: true,
            retry: RetryPolicy::default(),
            file_reputation: FileReputationConfig::default(),
            llm_judge: LlmJudgeConfig::default(),
        }
    }
}

impl ScannerConfig {
    pub fn mode(&self, scanner: ScannerId) -> FoldMode {
        match scanner {
            ScannerId::FileReputation => self.file_reputation.mode,
            ScannerId::LlmJudge => self.llm_judge.mode,
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }
}
