//! Publish pipeline
//!
//! Validates an upload, applies publisher policy (account age, slug
//! reservations, trust tier, rate limits, quality gate), stores the files
//! and version, and dispatches the configured scanners. Scanning never
//! blocks a publish.

use crate::core::arbiter::{reasons, ModerationState};
use crate::core::moderation::{can_reset_to_pending, scan_task};
use crate::core::model::{
    DependentKind, DependentRow, ForkOf, ModerationFlag, ModerationStatus, ParsedMetadata,
    ScanAnalysis, Skill, SkillFile, SkillVersion, Slug, User, UserId,
};
use crate::core::quality::{evaluate, normalize_body, structure_fingerprint, QualityAssessment, QualityDecision};
use crate::core::rate_limit::RateLimiter;
use crate::core::service::{ServiceContext, ServiceError};
use crate::core::trust::{classify, days_until_publish_allowed, PublisherSnapshot, TrustTier};
use crate::core::visibility::visibility_delta;
use crate::scanners::bundle::{build_scan_bundle, fingerprint_files, sha256_hex};
use chrono::Duration as ChronoDuration;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One file of an upload
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub path: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

impl UploadedFile {
    pub fn text(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into().into_bytes(),
            content_type: Some("text/plain".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub owner_id: UserId,
    pub slug: String,
    pub display_name: String,
    pub version: String,
    pub changelog: String,
    pub files: Vec<UploadedFile>,
    pub fork_of: Option<ForkOf>,
}

#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub skill: Skill,
    pub version: SkillVersion,
    /// True when this publish created the skill
    pub created: bool,
    /// Trust tier and quality assessment, for new skills
    pub trust_tier: Option<TrustTier>,
    pub quality: Option<QualityAssessment>,
}

/// Split leading YAML frontmatter off a markdown document
fn split_frontmatter(text: &str) -> Option<&str> {
    let text = text.trim_start_matches('\u{feff}');
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;
    let end = rest.find("\n---")?;
    Some(&rest[..end])
}

fn value_lines(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(value_lines).collect(),
        Value::Object(map) => map
            .iter()
            .flat_map(|(key, v)| {
                value_lines(v)
                    .into_iter()
                    .map(move |line| format!("{}:{}", key, line))
            })
            .collect(),
        other => vec![other.to_string()],
    }
}

fn install_lines(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        other => vec![other.to_string()],
    }
}

/// Parse SKILL.md frontmatter into the metadata cached on a version.
///
/// Requirements and install specs are read from the top level or from one
/// level of vendor namespace under `metadata`.
pub fn parse_metadata(skill_md: &str) -> Result<ParsedMetadata, ServiceError> {
    let Some(raw) = split_frontmatter(skill_md) else {
        return Ok(ParsedMetadata::default());
    };
    let frontmatter: BTreeMap<String, Value> = if raw.trim().is_empty() {
        BTreeMap::new()
    } else {
        serde_yaml::from_str(raw)
            .map_err(|e| ServiceError::Validation(format!("Invalid SKILL.md frontmatter: {}", e)))?
    };

    let mut scopes: Vec<&serde_json::Map<String, Value>> = Vec::new();
    if let Some(Value::Object(metadata)) = frontmatter.get("metadata") {
        scopes.extend(metadata.values().filter_map(Value::as_object));
    }

    let mut requirements = Vec::new();
    let mut install = Vec::new();
    for key in ["requires", "requirements"] {
        if let Some(v) = frontmatter.get(key) {
            requirements.extend(value_lines(v));
        }
        for scope in &scopes {
            if let Some(v) = scope.get(key) {
                requirements.extend(value_lines(v));
            }
        }
    }
    if let Some(v) = frontmatter.get("install") {
        install.extend(install_lines(v));
    }
    for scope in &scopes {
        if let Some(v) = scope.get("install") {
            install.extend(install_lines(v));
        }
    }

    Ok(ParsedMetadata {
        description: frontmatter
            .get("description")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        frontmatter,
        requirements,
        install,
    })
}

pub struct PublishPipeline {
    ctx: Arc<ServiceContext>,
    limiter: RateLimiter,
}

impl PublishPipeline {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        let limiter = RateLimiter::new(ctx.rate_store.clone(), ctx.config.rate_limit.clone());
        Self { ctx, limiter }
    }

    fn validate_files(&self, files: &[UploadedFile]) -> Result<(), ServiceError> {
        let config = &self.ctx.config.publish;
        if files.is_empty() {
            return Err(ServiceError::Validation("Upload contains no files".to_string()));
        }
        if files.len() > config.max_files {
            return Err(ServiceError::Validation(format!(
                "Too many files ({} > {})",
                files.len(),
                config.max_files
            )));
        }
        let total: u64 = files.iter().map(|f| f.content.len() as u64).sum();
        if total > config.max_bundle_bytes {
            return Err(ServiceError::Validation(format!(
                "Bundle too large ({} bytes > {} bytes)",
                total, config.max_bundle_bytes
            )));
        }

        let mut seen = HashSet::new();
        for file in files {
            let path = file.path.as_str();
            if path.is_empty()
                || path.starts_with('/')
                || path.contains('\\')
                || path.split('/').any(|part| part.is_empty() || part == "." || part == "..")
            {
                return Err(ServiceError::Validation(format!("Invalid file path: '{}'", path)));
            }
            if !seen.insert(path.to_lowercase()) {
                return Err(ServiceError::Validation(format!("Duplicate file path: {}", path)));
            }
            let file_name = path.rsplit('/').next().unwrap_or(path);
            let text_extension = match file_name.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() => config
                    .text_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
                _ => true,
            };
            if !text_extension || std::str::from_utf8(&file.content).is_err() {
                return Err(ServiceError::Validation(format!(
                    "Only text files can be published: {}",
                    path
                )));
            }
        }

        if !files.iter().any(|f| f.path.eq_ignore_ascii_case("SKILL.md")) {
            return Err(ServiceError::Validation(
                "SKILL.md is required at the bundle root".to_string(),
            ));
        }
        Ok(())
    }

    /// Publish a new skill or a new version of an existing one
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishOutcome, ServiceError> {
        let slug = Slug::new(request.slug.trim())?;
        semver::Version::parse(request.version.trim()).map_err(|e| {
            ServiceError::Validation(format!("Invalid version '{}': {}", request.version, e))
        })?;
        self.validate_files(&request.files)?;

        let now = self.ctx.now();
        let owner = self
            .ctx
            .store
            .get_user(request.owner_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {}", request.owner_id)))?;
        if owner.is_banned() || owner.deleted_at.is_some() {
            return Err(ServiceError::Forbidden(format!(
                "{} cannot publish skills",
                owner.handle
            )));
        }
        let account_age_ms = (now - owner.created_at).num_milliseconds();
        if let Some(days) = days_until_publish_allowed(account_age_ms, &self.ctx.config.trust) {
            return Err(ServiceError::Policy {
                message: format!("Account too new to publish; try again in {} days", days),
                retry_after_secs: Some(days * 24 * 60 * 60),
            });
        }

        let skill_md = request
            .files
            .iter()
            .find(|f| f.path.eq_ignore_ascii_case("SKILL.md"))
            .map(|f| String::from_utf8_lossy(&f.content).into_owned())
            .unwrap_or_default();
        let parsed = parse_metadata(&skill_md)?;
        let display_name = Some(request.display_name.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                parsed
                    .frontmatter
                    .get("name")
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| slug.to_string());

        let existing = self.ctx.store.get_skill_by_slug(slug.as_str()).await?;
        if let Some(skill) = &existing {
            if skill.owner_user_id != owner.id {
                return Err(ServiceError::Conflict(format!(
                    "Slug '{}' is already taken",
                    slug
                )));
            }
            if skill.soft_deleted_at.is_some() {
                return Err(ServiceError::Forbidden(format!(
                    "Skill '{}' has been removed",
                    slug
                )));
            }
            let versions = self.ctx.store.list_versions(skill.id).await?;
            if versions.iter().any(|v| v.version == request.version.trim()) {
                return Err(ServiceError::Conflict(format!(
                    "Version {} of '{}' already exists",
                    request.version.trim(),
                    slug
                )));
            }
        } else if let Some(reservation) = self.ctx.store.get_slug_reservation(slug.as_str()).await? {
            if reservation.is_active(now) && reservation.original_owner_user_id != owner.id {
                return Err(ServiceError::Policy {
                    message: format!("Slug '{}' is reserved", slug),
                    retry_after_secs: Some(
                        (reservation.expires_at - now).num_seconds().max(1) as u64,
                    ),
                });
            }
        }

        let version_id = Uuid::new_v4();
        let (skill, created, trust_tier, quality) = match existing {
            Some(skill) => (skill, false, None, None),
            None => {
                let (skill, tier, assessment) = self
                    .create_skill(
                        &owner,
                        slug,
                        display_name.clone(),
                        &skill_md,
                        version_id,
                        request.fork_of.clone(),
                    )
                    .await?;
                (skill, true, Some(tier), Some(assessment))
            }
        };

        let mut files = Vec::with_capacity(request.files.len());
        let mut bundle_input = Vec::with_capacity(request.files.len());
        for upload in &request.files {
            let sha256 = sha256_hex(&upload.content);
            let storage_id = self.ctx.blobs.upload(&sha256, &upload.content).await?;
            files.push(SkillFile {
                path: upload.path.clone(),
                size: upload.content.len() as u64,
                sha256,
                storage_id,
                content_type: upload.content_type.clone(),
            });
            bundle_input.push((upload.path.clone(), upload.content.clone()));
        }
        let bundle = build_scan_bundle(&bundle_input)?;

        let mut version = SkillVersion {
            id: version_id,
            skill_id: skill.id,
            version: request.version.trim().to_string(),
            changelog: request.changelog.clone(),
            files,
            parsed,
            bundle_hash: Some(bundle.sha256),
            file_reputation: None,
            llm_judge: None,
            created_at: now,
            soft_deleted_at: None,
            revision: 0,
        };
        for scanner in &self.ctx.scanners {
            version.set_analysis(*scanner, ScanAnalysis::pending(0, now));
        }
        let version = self.ctx.store.insert_version(version).await?;

        let skill = if created {
            skill
        } else {
            self.attach_version(&skill, &display_name, version.id)
                .await?
        };

        let fingerprint = fingerprint_files(
            &version
                .files
                .iter()
                .map(|f| (f.path.clone(), f.sha256.clone()))
                .collect::<Vec<_>>(),
        );
        self.ctx
            .store
            .insert_dependent(
                DependentRow::new(DependentKind::Fingerprints, skill.id, now)
                    .with_version(version.id)
                    .with_key(fingerprint),
            )
            .await?;

        for scanner in &self.ctx.scanners {
            if let Err(e) = self
                .ctx
                .scheduler
                .schedule(scan_task(*scanner, version.id, 0), Duration::ZERO)
                .await
            {
                warn!(
                    "Failed to dispatch {} scan for version {}: {}",
                    scanner.as_str(),
                    version.id,
                    e
                );
            }
        }

        info!(
            "Published {}@{} by {} ({})",
            skill.slug,
            version.version,
            owner.handle,
            skill.reason()
        );
        Ok(PublishOutcome {
            skill,
            version,
            created,
            trust_tier,
            quality,
        })
    }

    async fn create_skill(
        &self,
        owner: &User,
        slug: Slug,
        display_name: String,
        skill_md: &str,
        version_id: Uuid,
        fork_of: Option<ForkOf>,
    ) -> Result<(Skill, TrustTier, QualityAssessment), ServiceError> {
        let now = self.ctx.now();
        let owner_id = owner.id;
        let lifetime_skill_count = self.ctx.store.count_skills_by_owner(owner_id).await?;
        let skills_last_hour = self
            .ctx
            .store
            .list_skills_by_owner_since(owner_id, now - ChronoDuration::hours(1))
            .await?
            .len() as u64;
        let snapshot = PublisherSnapshot {
            account_age_ms: (now - owner.created_at).num_milliseconds(),
            lifetime_skill_count,
            skills_last_hour,
        };
        let tier = classify(&snapshot, &self.ctx.config.trust);
        debug!("Publisher {} classified {} ({:?})", owner.handle, tier, snapshot);

        self.limiter.check_and_record(owner_id, tier, now).await?;

        let body = normalize_body(skill_md);
        let fingerprint = structure_fingerprint(&body);
        let window = ChronoDuration::hours(i64::from(self.ctx.config.quality.similarity_window_hours));
        let similar_recent_count = self
            .ctx
            .store
            .list_skills_by_owner_since(owner_id, now - window)
            .await?
            .iter()
            .filter(|s| {
                s.quality
                    .as_ref()
                    .map(|q| q.structure_fingerprint == fingerprint)
                    .unwrap_or(false)
            })
            .count() as u32;
        let assessment = evaluate(&body, tier, similar_recent_count, &self.ctx.config.quality);
        if assessment.decision == QualityDecision::Reject {
            info!(
                "Quality gate rejected {} from {} (score {}, {} similar)",
                slug, owner.handle, assessment.score, similar_recent_count
            );
            return Err(ServiceError::Policy {
                message: format!(
                    "SKILL.md did not pass the quality check (score {}); add concrete usage instructions and remove placeholder text",
                    assessment.score
                ),
                retry_after_secs: None,
            });
        }

        let state = if assessment.decision == QualityDecision::Quarantine {
            ModerationState::quarantined()
        } else {
            ModerationState::pending()
        };
        let mut skill = Skill::new(slug, display_name, owner_id, now);
        state.apply_to(&mut skill);
        skill.latest_version_id = Some(version_id);
        skill.quality = Some(assessment.clone());
        skill.fork_of = fork_of;

        let skill = self.ctx.store.insert_skill(skill).await?;
        self.ctx
            .counter
            .adjust(visibility_delta(None, Some(&skill)))
            .await;
        Ok((skill, tier, assessment))
    }

    /// Point an existing skill at its new latest version
    async fn attach_version(
        &self,
        skill: &Skill,
        display_name: &str,
        version_id: Uuid,
    ) -> Result<Skill, ServiceError> {
        let update = self
            .ctx
            .update_skill(skill.id, |s| {
                s.latest_version_id = Some(version_id);
                s.display_name = display_name.to_string();
                if can_reset_to_pending(s) {
                    s.moderation_flags.remove(&ModerationFlag::FlaggedSuspicious);
                    if s.moderation_status != Some(ModerationStatus::Removed) {
                        s.moderation_status = Some(ModerationStatus::Active);
                    }
                    s.moderation_reason = Some(reasons::PENDING_SCAN.to_string());
                }
                Ok(true)
            })
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Skill {}", skill.id)))?;
        Ok(update.after)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata_reads_nested_requirements() {
        let md = "---\nname: pdf-tools\ndescription: Merge and split PDFs\nmetadata:\n  clawdbot:\n    requires:\n      bins: [qpdf]\n      env: [PDF_TOKEN]\n    install:\n      - brew install qpdf\n      - kind: node\n        package: pdf-lib\n---\n# PDF Tools\n";
        let parsed = parse_metadata(md).unwrap();
        assert_eq!(parsed.description.as_deref(), Some("Merge and split PDFs"));
        assert_eq!(parsed.requirements, vec!["bins:qpdf", "env:PDF_TOKEN"]);
        assert_eq!(parsed.install.len(), 2);
        assert_eq!(parsed.install[0], "brew install qpdf");
        assert!(parsed.install[1].contains("pdf-lib"));
    }

    #[test]
    fn test_parse_metadata_without_frontmatter() {
        let parsed = parse_metadata("# Title\n\nBody").unwrap();
        assert!(parsed.frontmatter.is_empty());
        assert!(parsed.description.is_none());
    }

    #[test]
    fn test_parse_metadata_rejects_broken_yaml() {
        let err = parse_metadata("---\nname: [unclosed\n---\nbody").unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
