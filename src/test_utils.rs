//! Shared fixtures for unit and integration tests
//!
//! Not part of the public API.

#![allow(clippy::expect_used)]

use crate::core::blob_storage::MemoryBlobStorage;
use crate::core::clock::ManualClock;
use crate::core::config::ModerationConfig;
use crate::core::model::{User, UserRole, Verdict};
use crate::core::publish::{PublishOutcome, PublishRequest, UploadedFile};
use crate::core::scheduler::QueueScheduler;
use crate::core::service::{ModerationService, ServiceError, ServicePorts};
use crate::core::visibility::CounterBackend;
use crate::scanners::{
    AnalysisStats, FileReport, FileReputationApi, LlmJudgeApi, RetryPolicy, ScannerError,
};
use crate::storage::{MemoryRegistryStore, RegistryStore};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A SKILL.md that passes the quality gate for a low-trust publisher
pub fn sample_skill_md(slug: &str) -> String {
    format!(
        r#"---
name: {slug}
description: Extract tables and text from PDF reports into clean CSV files.
metadata:
  fastskill:
    requires:
      env: [PDF_WORKDIR]
      bins: [pdftotext]
---
# {slug}

Convert scanned invoices, quarterly statements and research papers into
structured spreadsheets. Pages are processed one at a time so very large
documents never exhaust memory on modest laptops.

## When to use

- A user uploads a PDF and asks for its tables as CSV
- Someone needs plain text from a report for later summarization
- Multiple statements must be merged into one ledger sorted by date

## Steps

1. Run `pdftotext -layout input.pdf out.txt` inside the working directory.
2. Detect column boundaries by scanning for aligned whitespace gaps.
3. Write each detected table to its own numbered CSV file.
4. Report row counts back so the user can verify nothing was dropped.

## Limitations

- Handwritten notes and rotated pages are skipped with a warning
- Encrypted files require the password supplied through an environment variable

## Output

Every CSV uses UTF-8, a header row, and comma separators. Totals are left
untouched; the agent never recalculates figures on its own.
"#
    )
}

/// A SKILL.md the quality gate rejects
pub fn spam_skill_md() -> String {
    "This skill helps you with many things.\n\nTODO: write [insert description here].\n"
        .to_string()
}

/// SKILL.md plus one helper script
pub fn sample_files(slug: &str) -> Vec<UploadedFile> {
    vec![
        UploadedFile::text("SKILL.md", sample_skill_md(slug)),
        UploadedFile::text(
            "scripts/extract.py",
            "import sys\n\nfor line in open(sys.argv[1]):\n    print(line.rstrip())\n",
        ),
    ]
}

pub fn publish_request(owner: &User, slug: &str, version: &str) -> PublishRequest {
    PublishRequest {
        owner_id: owner.id,
        slug: slug.to_string(),
        display_name: String::new(),
        version: version.to_string(),
        changelog: format!("Release {}", version),
        files: sample_files(slug),
        fork_of: None,
    }
}

/// Scripted answer of [`FakeFileReputation`]
#[derive(Debug, Clone, PartialEq)]
pub enum FakeFileReply {
    /// Hash never seen before
    Unknown,
    /// Known but the analysis is still queued
    Queued,
    Report(Verdict),
    /// Retryable server failure
    Unavailable,
}

/// In-process file reputation service
pub struct FakeFileReputation {
    reply: Mutex<FakeFileReply>,
    lookups: AtomicUsize,
    uploads: Mutex<Vec<String>>,
    reanalysis_requests: AtomicUsize,
}

impl FakeFileReputation {
    pub fn new(reply: FakeFileReply) -> Self {
        Self {
            reply: Mutex::new(reply),
            lookups: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
            reanalysis_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_reply(&self, reply: FakeFileReply) {
        if let Ok(mut guard) = self.reply.lock() {
            *guard = reply;
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn reanalysis_requests(&self) -> usize {
        self.reanalysis_requests.load(Ordering::SeqCst)
    }
}

fn stats_for(verdict: Verdict) -> AnalysisStats {
    match verdict {
        Verdict::Malicious => AnalysisStats {
            malicious: 5,
            suspicious: 1,
            harmless: 10,
            undetected: 50,
        },
        Verdict::Suspicious => AnalysisStats {
            malicious: 0,
            suspicious: 2,
            harmless: 10,
            undetected: 50,
        },
        Verdict::Clean | Verdict::Unknown => AnalysisStats {
            malicious: 0,
            suspicious: 0,
            harmless: 12,
            undetected: 54,
        },
    }
}

#[async_trait]
impl FileReputationApi for FakeFileReputation {
    async fn lookup(&self, _sha256: &str) -> Result<Option<FileReport>, ScannerError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .reply
            .lock()
            .map(|r| r.clone())
            .unwrap_or(FakeFileReply::Unavailable);
        match reply {
            FakeFileReply::Unknown => Ok(None),
            FakeFileReply::Queued => Ok(Some(FileReport {
                verdict: Verdict::Unknown,
                stats: AnalysisStats::default(),
                analysis_complete: false,
            })),
            FakeFileReply::Report(verdict) => Ok(Some(FileReport::from_stats(stats_for(verdict), 1, 1))),
            FakeFileReply::Unavailable => Err(ScannerError::Server {
                status: 503,
                body: "service unavailable".to_string(),
            }),
        }
    }

    async fn upload(&self, name: &str, _bytes: Vec<u8>) -> Result<(), ScannerError> {
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push(name.to_string());
        }
        Ok(())
    }

    async fn request_reanalysis(&self, _sha256: &str) -> Result<(), ScannerError> {
        self.reanalysis_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted answer of [`FakeLlmJudge`]
#[derive(Debug, Clone, PartialEq)]
pub enum FakeJudgeReply {
    Verdict(Verdict),
    /// Return this text verbatim
    Raw(String),
    /// Retryable server failure
    Unavailable,
    /// Permanent client error
    Rejected,
}

/// In-process LLM judge
pub struct FakeLlmJudge {
    reply: Mutex<FakeJudgeReply>,
    prompts: Mutex<Vec<String>>,
}

impl FakeLlmJudge {
    pub fn new(reply: FakeJudgeReply) -> Self {
        Self {
            reply: Mutex::new(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reply(&self, reply: FakeJudgeReply) {
        if let Ok(mut guard) = self.reply.lock() {
            *guard = reply;
        }
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }
}

pub fn judgement_json(verdict: Verdict) -> String {
    serde_json::json!({
        "verdict": verdict.as_str(),
        "confidence": 0.9,
        "summary": format!("Reviewed files look {}.", verdict.as_str()),
        "dimensions": [
            {"name": "purpose_alignment", "status": "ok", "detail": "Files match the description"}
        ],
        "guidance": null,
        "findings": [],
    })
    .to_string()
}

#[async_trait]
impl LlmJudgeApi for FakeLlmJudge {
    async fn judge(&self, _system: &str, prompt: &str) -> Result<String, ScannerError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let reply = self
            .reply
            .lock()
            .map(|r| r.clone())
            .unwrap_or(FakeJudgeReply::Unavailable);
        match reply {
            FakeJudgeReply::Verdict(verdict) => Ok(judgement_json(verdict)),
            FakeJudgeReply::Raw(text) => Ok(text),
            FakeJudgeReply::Unavailable => Err(ScannerError::Server {
                status: 502,
                body: "bad gateway".to_string(),
            }),
            FakeJudgeReply::Rejected => Err(ScannerError::Rejected {
                status: 400,
                body: "context length exceeded".to_string(),
            }),
        }
    }

    fn model(&self) -> &str {
        "fake-judge"
    }
}

/// Configuration tuned for tests: no retry waits and no similarity or
/// rate pressure from publishing several fixtures with one account.
pub fn test_config() -> ModerationConfig {
    let mut config = ModerationConfig::default();
    config.scanners.retry = RetryPolicy::immediate(2);
    config.scanners.poll_interval_secs = 0;
    config.scanners.max_poll_attempts = 3;
    config.quality.low.similar_quarantine_at = 1_000;
    config.quality.low.similar_reject_at = 1_000;
    config.quality.trusted.similar_quarantine_at = 1_000;
    config.quality.trusted.similar_reject_at = 1_000;
    config.quality.low.similarity_penalty = 0;
    config.quality.trusted.similarity_penalty = 0;
    config.rate_limit.low.hourly = 1_000;
    config.rate_limit.low.daily = 1_000;
    config.rate_limit.trusted.hourly = 1_000;
    config.rate_limit.trusted.daily = 1_000;
    config
}

/// A fully wired service over in-memory ports with scripted scanners
pub struct TestHarness {
    pub store: Arc<MemoryRegistryStore>,
    pub scheduler: Arc<QueueScheduler>,
    pub blobs: Arc<MemoryBlobStorage>,
    pub clock: Arc<ManualClock>,
    pub file_reputation: Arc<FakeFileReputation>,
    pub llm_judge: Arc<FakeLlmJudge>,
    pub service: Arc<ModerationService>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ModerationConfig) -> Self {
        Self::build(config, true, true)
    }

    /// Harness with only the given scanners wired in
    pub fn build(config: ModerationConfig, file_reputation: bool, llm_judge: bool) -> Self {
        let store = Arc::new(MemoryRegistryStore::new());
        let scheduler = Arc::new(QueueScheduler::new());
        let blobs = Arc::new(MemoryBlobStorage::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        ));
        let vt = Arc::new(FakeFileReputation::new(FakeFileReply::Report(Verdict::Clean)));
        let judge = Arc::new(FakeLlmJudge::new(FakeJudgeReply::Verdict(Verdict::Clean)));

        let service = ModerationService::new(
            ServicePorts {
                store: store.clone(),
                rate_store: store.clone(),
                counter: CounterBackend::Available(store.clone()),
                scheduler: scheduler.clone(),
                blobs: blobs.clone(),
                clock: clock.clone(),
                file_reputation: file_reputation.then(|| vt.clone() as Arc<dyn FileReputationApi>),
                llm_judge: llm_judge.then(|| judge.clone() as Arc<dyn LlmJudgeApi>),
            },
            config,
        )
        .expect("test configuration is valid");

        Self {
            store,
            scheduler,
            blobs,
            clock,
            file_reputation: vt,
            llm_judge: judge,
            service: Arc::new(service),
        }
    }

    /// Insert a user whose account is `age_days` old
    pub async fn user_aged(&self, handle: &str, role: UserRole, age_days: i64) -> User {
        let created_at = self.service.context().now() - Duration::days(age_days);
        self.store
            .insert_user(User::new(handle, role, created_at))
            .await
            .expect("insert user")
    }

    /// Regular publisher, old enough to publish but not trusted
    pub async fn user(&self, handle: &str) -> User {
        self.user_aged(handle, UserRole::User, 7).await
    }

    pub async fn moderator(&self, handle: &str) -> User {
        self.user_aged(handle, UserRole::Moderator, 365).await
    }

    pub async fn admin(&self, handle: &str) -> User {
        self.user_aged(handle, UserRole::Admin, 365).await
    }

    pub async fn publish(
        &self,
        owner: &User,
        slug: &str,
        version: &str,
    ) -> Result<PublishOutcome, ServiceError> {
        self.service
            .publisher()
            .publish(publish_request(owner, slug, version))
            .await
    }

    /// Run queued tasks until none are left
    pub async fn drain(&self) -> Result<usize, ServiceError> {
        self.scheduler.run_until_idle(&self.service, 10_000).await
    }
}
