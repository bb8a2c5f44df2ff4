//! File-reputation scanner (VirusTotal)
//!
//! The scanner looks a version's bundle up by SHA-256. Unknown bundles are
//! uploaded once and polled until a report exists or polls run out.

use crate::core::model::{ScanAnalysis, ScanVerdict, ScannerId, SkillVersion, Verdict, VersionId};
use crate::core::moderation::ModerationEngine;
use crate::core::scheduler::ScheduledTask;
use crate::core::service::{ServiceContext, ServiceError};
use crate::scanners::bundle::{build_scan_bundle, ScanBundle};
use crate::scanners::{
    error_from_response, load_version_files, FileReputationConfig, ScanOutcome, ScannerError,
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bundles above this size go through a one-off upload URL
const MAX_DIRECT_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Engine tallies from the last analysis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnalysisStats {
    pub malicious: u32,
    pub suspicious: u32,
    pub harmless: u32,
    pub undetected: u32,
}

impl AnalysisStats {
    pub fn total(&self) -> u32 {
        self.malicious + self.suspicious + self.harmless + self.undetected
    }
}

/// Report for a known file
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub verdict: Verdict,
    pub stats: AnalysisStats,
    /// False while the scanner still has the analysis queued
    pub analysis_complete: bool,
}

impl FileReport {
    pub fn from_stats(stats: AnalysisStats, malicious_threshold: u32, suspicious_threshold: u32) -> Self {
        let verdict = if stats.total() == 0 {
            Verdict::Unknown
        } else if stats.malicious >= malicious_threshold.max(1) {
            Verdict::Malicious
        } else if stats.suspicious >= suspicious_threshold.max(1) {
            Verdict::Suspicious
        } else {
            Verdict::Clean
        };
        Self {
            verdict,
            stats,
            analysis_complete: stats.total() > 0,
        }
    }

    pub fn evidence(&self) -> String {
        format!(
            "{} malicious, {} suspicious, {} harmless, {} undetected",
            self.stats.malicious, self.stats.suspicious, self.stats.harmless, self.stats.undetected
        )
    }
}

#[async_trait]
pub trait FileReputationApi: Send + Sync {
    /// Report for a SHA-256, or `None` when the scanner has never seen it
    async fn lookup(&self, sha256: &str) -> Result<Option<FileReport>, ScannerError>;

    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<(), ScannerError>;

    async fn request_reanalysis(&self, sha256: &str) -> Result<(), ScannerError>;
}

#[derive(Debug, Deserialize)]
struct VtFileResponse {
    data: VtFileData,
}

#[derive(Debug, Deserialize)]
struct VtFileData {
    #[serde(default)]
    attributes: VtFileAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct VtFileAttributes {
    #[serde(default)]
    last_analysis_stats: AnalysisStats,
}

#[derive(Debug, Deserialize)]
struct VtUploadUrlResponse {
    data: String,
}

/// VirusTotal v3 API client
pub struct VirusTotalClient {
    client: Client,
    base_url: String,
    api_key: String,
    malicious_threshold: u32,
    suspicious_threshold: u32,
}

impl VirusTotalClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            malicious_threshold: 1,
            suspicious_threshold: 1,
        }
    }

    pub fn with_thresholds(mut self, malicious: u32, suspicious: u32) -> Self {
        self.malicious_threshold = malicious;
        self.suspicious_threshold = suspicious;
        self
    }

    /// Build a client, reading the API key from the configured env var
    pub fn from_config(config: &FileReputationConfig) -> Result<Self, ServiceError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ServiceError::Config(format!(
                "File reputation scanner enabled but {} is not set",
                config.api_key_env
            ))
        })?;
        Ok(Self::new(config.base_url.clone(), api_key)
            .with_thresholds(config.malicious_threshold, config.suspicious_threshold))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v3/{}", self.base_url, path)
    }
}

#[async_trait]
impl FileReputationApi for VirusTotalClient {
    async fn lookup(&self, sha256: &str) -> Result<Option<FileReport>, ScannerError> {
        let response = self
            .client
            .get(self.url(&format!("files/{}", sha256)))
            .header("x-apikey", &self.api_key)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: VtFileResponse = response
            .json()
            .await
            .map_err(|e| ScannerError::Parse(format!("VirusTotal file report: {}", e)))?;
        Ok(Some(FileReport::from_stats(
            body.data.attributes.last_analysis_stats,
            self.malicious_threshold,
            self.suspicious_threshold,
        )))
    }

    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<(), ScannerError> {
        let url = if bytes.len() > MAX_DIRECT_UPLOAD_BYTES {
            let response = self
                .client
                .get(self.url("files/upload_url"))
                .header("x-apikey", &self.api_key)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }
            let body: VtUploadUrlResponse = response
                .json()
                .await
                .map_err(|e| ScannerError::Parse(format!("VirusTotal upload url: {}", e)))?;
            body.data
        } else {
            self.url("files")
        };

        let form = Form::new().part("file", Part::bytes(bytes).file_name(name.to_string()));
        let response = self
            .client
            .post(&url)
            .header("x-apikey", &self.api_key)
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }

    async fn request_reanalysis(&self, sha256: &str) -> Result<(), ScannerError> {
        let response = self
            .client
            .post(self.url(&format!("files/{}/analyse", sha256)))
            .header("x-apikey", &self.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }
}

/// Runs file-reputation scans for published versions
pub struct FileReputationScanner {
    ctx: Arc<ServiceContext>,
    engine: Arc<ModerationEngine>,
    api: Arc<dyn FileReputationApi>,
}

impl FileReputationScanner {
    pub fn new(
        ctx: Arc<ServiceContext>,
        engine: Arc<ModerationEngine>,
        api: Arc<dyn FileReputationApi>,
    ) -> Self {
        Self { ctx, engine, api }
    }

    /// One scan pass for a version; `attempt` counts prior polls
    pub async fn scan(&self, version_id: VersionId, attempt: u32) -> Result<ScanOutcome, ServiceError> {
        const SCANNER: ScannerId = ScannerId::FileReputation;

        let Some(version) = self.ctx.store.get_version(version_id).await? else {
            debug!("Version {} gone, skipping file reputation scan", version_id);
            return Ok(ScanOutcome::Skipped);
        };
        if version.soft_deleted_at.is_some() {
            return Ok(ScanOutcome::Skipped);
        }

        if let Some(analysis) = version.analysis(SCANNER) {
            if let Some(verdict) = version.cached_verdict(SCANNER) {
                // Re-fold in case an earlier run stored the analysis but stopped short
                let scan = ScanVerdict {
                    scanner: SCANNER,
                    verdict,
                    evidence: analysis.summary.clone(),
                    observed_at: analysis.checked_at.unwrap_or_else(|| self.ctx.now()),
                };
                self.engine.apply_scan_verdict(version_id, scan).await?;
                return Ok(ScanOutcome::Completed(verdict));
            }
            if analysis.status == crate::core::model::AnalysisStatus::Stale {
                return Ok(ScanOutcome::Skipped);
            }
        }

        let hash = match &version.bundle_hash {
            Some(hash) => hash.clone(),
            None => {
                let bundle = self.bundle(&version).await?;
                self.persist_hash(version_id, &bundle.sha256).await?;
                bundle.sha256
            }
        };

        let retry = &self.ctx.config.scanners.retry;
        let api = &self.api;
        let hash_ref = hash.as_str();
        let lookup = retry
            .run("file reputation lookup", move || api.lookup(hash_ref))
            .await;

        match lookup {
            Ok(Some(report)) if report.analysis_complete => {
                info!(
                    "File reputation verdict for version {}: {} ({})",
                    version_id,
                    report.verdict.as_str(),
                    report.evidence()
                );
                let now = self.ctx.now();
                let scan = ScanVerdict {
                    scanner: SCANNER,
                    verdict: report.verdict,
                    evidence: Some(report.evidence()),
                    observed_at: now,
                };
                let analysis = ScanAnalysis::completed(report.verdict, Some(report.evidence()), now);
                self.engine.record_verdict(version_id, scan, analysis).await?;
                Ok(ScanOutcome::Completed(report.verdict))
            }
            Ok(Some(_)) => {
                if attempt == 0 {
                    if let Err(e) = retry
                        .run("file reputation reanalysis", move || {
                            api.request_reanalysis(hash_ref)
                        })
                        .await
                    {
                        warn!("Reanalysis request for {} failed: {}", hash, e);
                    }
                }
                self.poll_later(version_id, attempt).await
            }
            Ok(None) => {
                if attempt == 0 {
                    let bundle = self.bundle(&version).await?;
                    let name = format!("{}.zip", bundle.sha256);
                    let bytes = bundle.bytes;
                    let name_ref = name.as_str();
                    let bytes_ref = &bytes;
                    if let Err(e) = retry
                        .run("file reputation upload", move || {
                            api.upload(name_ref, bytes_ref.clone())
                        })
                        .await
                    {
                        warn!("Upload of bundle {} failed: {}", hash, e);
                    } else {
                        info!("Uploaded bundle {} for version {}", hash, version_id);
                    }
                }
                self.poll_later(version_id, attempt).await
            }
            Err(e) => {
                warn!(
                    "File reputation lookup for version {} failed: {}",
                    version_id, e
                );
                self.poll_later(version_id, attempt).await
            }
        }
    }

    async fn bundle(&self, version: &SkillVersion) -> Result<ScanBundle, ServiceError> {
        let files = load_version_files(self.ctx.blobs.as_ref(), version).await?;
        build_scan_bundle(&files)
    }

    async fn persist_hash(&self, version_id: VersionId, hash: &str) -> Result<(), ServiceError> {
        self.ctx
            .update_version(version_id, |v| {
                if v.bundle_hash.as_deref() == Some(hash) {
                    return Ok(false);
                }
                v.bundle_hash = Some(hash.to_string());
                Ok(true)
            })
            .await?;
        Ok(())
    }

    async fn poll_later(&self, version_id: VersionId, attempt: u32) -> Result<ScanOutcome, ServiceError> {
        let next_attempt = attempt + 1;
        let scanners = &self.ctx.config.scanners;
        if next_attempt >= scanners.max_poll_attempts {
            self.engine
                .mark_stale(version_id, ScannerId::FileReputation, next_attempt)
                .await?;
            return Ok(ScanOutcome::Stale);
        }

        self.engine
            .mark_pending(version_id, ScannerId::FileReputation, next_attempt)
            .await?;
        self.ctx
            .scheduler
            .schedule(
                ScheduledTask::ScanFileReputation {
                    version_id,
                    attempt: next_attempt,
                },
                scanners.poll_interval(),
            )
            .await?;
        Ok(ScanOutcome::Pending { next_attempt })
    }
}
