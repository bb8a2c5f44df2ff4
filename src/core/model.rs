//! Registry records touched by the moderation lifecycle

use crate::core::quality::{QualityAssessment, QualityDecision};
use crate::core::service::ServiceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

pub type UserId = Uuid;
pub type SkillId = Uuid;
pub type VersionId = Uuid;

/// Maximum length of a skill slug
pub const MAX_SLUG_LEN: usize = 64;

/// Validated registry slug
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slug(String);

impl Slug {
    /// Create a new slug with validation
    pub fn new(slug: impl Into<String>) -> Result<Self, ServiceError> {
        let slug = slug.into();
        if slug.trim().is_empty() {
            return Err(ServiceError::Validation("Slug cannot be empty".to_string()));
        }
        if slug.len() > MAX_SLUG_LEN {
            return Err(ServiceError::Validation(format!(
                "Slug too long (max {} characters)",
                MAX_SLUG_LEN
            )));
        }
        if !slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ServiceError::Validation(
                "Slug contains invalid characters (only lowercase letters, digits and dash allowed)"
                    .to_string(),
            ));
        }
        if slug.starts_with('-') || slug.ends_with('-') || slug.contains("--") {
            return Err(ServiceError::Validation(format!(
                "Slug '{}' must not start or end with a dash or contain consecutive dashes",
                slug
            )));
        }
        Ok(Self(slug))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Slug {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Slug {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Slug::new(s).map_err(serde::de::Error::custom)
    }
}

/// User roles in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Moderator,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Moderator => "moderator",
            UserRole::Admin => "admin",
        }
    }

    /// Moderators and admins bypass suspicious verdicts and auto-bans
    pub fn is_privileged(&self) -> bool {
        matches!(self, UserRole::Moderator | UserRole::Admin)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = ServiceError;

    fn from_str(role: &str) -> Result<Self, Self::Err> {
        match role.to_lowercase().as_str() {
            "user" => Ok(UserRole::User),
            "moderator" => Ok(UserRole::Moderator),
            "admin" => Ok(UserRole::Admin),
            _ => Err(ServiceError::Validation(format!("Invalid role: {}", role))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub handle: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub banned_at: Option<DateTime<Utc>>,
    pub ban_reason: Option<String>,
    pub revision: u64,
}

impl User {
    pub fn new(handle: impl Into<String>, role: UserRole, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle: handle.into(),
            role,
            created_at,
            deleted_at: None,
            banned_at: None,
            ban_reason: None,
            revision: 0,
        }
    }

    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }

    pub fn is_banned(&self) -> bool {
        self.banned_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub id: Uuid,
    pub user_id: UserId,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Moderation status of a skill. `None` on the record means the legacy
/// undefined state, which is treated as active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Active,
    Hidden,
    Removed,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Active => "active",
            ModerationStatus::Hidden => "hidden",
            ModerationStatus::Removed => "removed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModerationFlag {
    #[serde(rename = "blocked.malware")]
    BlockedMalware,
    #[serde(rename = "flagged.suspicious")]
    FlaggedSuspicious,
}

impl ModerationFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationFlag::BlockedMalware => "blocked.malware",
            ModerationFlag::FlaggedSuspicious => "flagged.suspicious",
        }
    }
}

/// Independent verdict providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScannerId {
    /// File-reputation scanner (VirusTotal)
    #[serde(rename = "vt")]
    FileReputation,
    /// LLM security judge
    #[serde(rename = "llm")]
    LlmJudge,
}

impl ScannerId {
    pub const ALL: [ScannerId; 2] = [ScannerId::FileReputation, ScannerId::LlmJudge];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerId::FileReputation => "vt",
            ScannerId::LlmJudge => "llm",
        }
    }

    pub fn parse(id: &str) -> Option<Self> {
        match id {
            "vt" => Some(ScannerId::FileReputation),
            "llm" => Some(ScannerId::LlmJudge),
            _ => None,
        }
    }

    /// Tie-break between scanners reporting the same severity; higher wins.
    pub fn rank(&self) -> u8 {
        match self {
            ScannerId::FileReputation => 2,
            ScannerId::LlmJudge => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Clean,
    Suspicious,
    Malicious,
    Unknown,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Clean => "clean",
            Verdict::Suspicious => "suspicious",
            Verdict::Malicious => "malicious",
            Verdict::Unknown => "unknown",
        }
    }

    pub fn parse(verdict: &str) -> Option<Self> {
        match verdict.trim().to_lowercase().as_str() {
            "clean" | "benign" | "harmless" => Some(Verdict::Clean),
            "suspicious" => Some(Verdict::Suspicious),
            "malicious" => Some(Verdict::Malicious),
            "unknown" => Some(Verdict::Unknown),
            _ => None,
        }
    }

    /// Ordering used by the arbiter; unknown carries no information.
    pub fn severity(&self) -> u8 {
        match self {
            Verdict::Unknown => 0,
            Verdict::Clean => 1,
            Verdict::Suspicious => 2,
            Verdict::Malicious => 3,
        }
    }
}

/// A scanner's judgement on one version, as handed to the arbiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanVerdict {
    pub scanner: ScannerId,
    pub verdict: Verdict,
    pub evidence: Option<String>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Completed,
    Stale,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDimension {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Per-scanner analysis cached on a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanAnalysis {
    pub status: AnalysisStatus,
    pub verdict: Option<Verdict>,
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<AnalysisDimension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub attempts: u32,
    pub checked_at: Option<DateTime<Utc>>,
}

impl ScanAnalysis {
    pub fn pending(attempts: u32, checked_at: DateTime<Utc>) -> Self {
        Self {
            status: AnalysisStatus::Pending,
            verdict: None,
            summary: None,
            confidence: None,
            dimensions: Vec::new(),
            guidance: None,
            findings: None,
            model: None,
            attempts,
            checked_at: Some(checked_at),
        }
    }

    pub fn completed(verdict: Verdict, summary: Option<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            status: AnalysisStatus::Completed,
            verdict: Some(verdict),
            summary,
            ..Self::pending(0, checked_at)
        }
    }

    pub fn stale(attempts: u32, checked_at: DateTime<Utc>) -> Self {
        Self {
            status: AnalysisStatus::Stale,
            ..Self::pending(attempts, checked_at)
        }
    }

    pub fn error(message: String, checked_at: DateTime<Utc>) -> Self {
        Self {
            status: AnalysisStatus::Error,
            summary: Some(message),
            ..Self::pending(0, checked_at)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillFile {
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub storage_id: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Metadata parsed from SKILL.md at publish time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMetadata {
    #[serde(default)]
    pub frontmatter: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
    /// Declared env vars and binaries the skill requires
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Declared install specs (package manager commands)
    #[serde(default)]
    pub install: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillVersion {
    pub id: VersionId,
    pub skill_id: SkillId,
    pub version: String,
    pub changelog: String,
    pub files: Vec<SkillFile>,
    pub parsed: ParsedMetadata,
    /// Deterministic hash of the scan bundle, stable across republishes
    pub bundle_hash: Option<String>,
    pub file_reputation: Option<ScanAnalysis>,
    pub llm_judge: Option<ScanAnalysis>,
    pub created_at: DateTime<Utc>,
    pub soft_deleted_at: Option<DateTime<Utc>>,
    pub revision: u64,
}

impl SkillVersion {
    pub fn analysis(&self, scanner: ScannerId) -> Option<&ScanAnalysis> {
        match scanner {
            ScannerId::FileReputation => self.file_reputation.as_ref(),
            ScannerId::LlmJudge => self.llm_judge.as_ref(),
        }
    }

    pub fn set_analysis(&mut self, scanner: ScannerId, analysis: ScanAnalysis) {
        match scanner {
            ScannerId::FileReputation => self.file_reputation = Some(analysis),
            ScannerId::LlmJudge => self.llm_judge = Some(analysis),
        }
    }

    /// Verdict from a completed analysis, if any
    pub fn cached_verdict(&self, scanner: ScannerId) -> Option<Verdict> {
        self.analysis(scanner)
            .filter(|a| a.status == AnalysisStatus::Completed)
            .and_then(|a| a.verdict)
    }

    pub fn primary_document(&self) -> Option<&SkillFile> {
        self.files
            .iter()
            .find(|f| f.path.eq_ignore_ascii_case("SKILL.md"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForkKind {
    Fork,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkOf {
    pub skill_id: SkillId,
    pub kind: ForkKind,
    pub version: Option<String>,
}

/// Moderation fields a ban overwrote, restored on unban
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanSnapshot {
    pub status: Option<ModerationStatus>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: SkillId,
    pub slug: Slug,
    pub display_name: String,
    pub owner_user_id: UserId,
    pub latest_version_id: Option<VersionId>,
    pub moderation_status: Option<ModerationStatus>,
    pub moderation_reason: Option<String>,
    pub moderation_flags: BTreeSet<ModerationFlag>,
    pub moderation_notes: Option<String>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub moderated_by: Option<UserId>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    /// Set when a moderator explicitly releases a quality quarantine
    pub quality_override_at: Option<DateTime<Utc>>,
    pub soft_deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ban_snapshot: Option<BanSnapshot>,
    /// Written together with a malware block, cleared once the block's
    /// audit entry and owner ban have run
    #[serde(default)]
    pub block_followup_pending: bool,
    pub report_count: u32,
    pub quality: Option<QualityAssessment>,
    pub canonical_skill_id: Option<SkillId>,
    pub fork_of: Option<ForkOf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: u64,
}

impl Skill {
    pub fn new(
        slug: Slug,
        display_name: impl Into<String>,
        owner_user_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            slug,
            display_name: display_name.into(),
            owner_user_id,
            latest_version_id: None,
            moderation_status: None,
            moderation_reason: None,
            moderation_flags: BTreeSet::new(),
            moderation_notes: None,
            moderated_at: None,
            moderated_by: None,
            last_reviewed_at: None,
            quality_override_at: None,
            soft_deleted_at: None,
            ban_snapshot: None,
            block_followup_pending: false,
            report_count: 0,
            quality: None,
            canonical_skill_id: None,
            fork_of: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.moderation_flags.contains(&ModerationFlag::BlockedMalware)
    }

    /// Quarantined by the quality gate and not yet released by a moderator
    pub fn is_quality_locked(&self) -> bool {
        self.quality_override_at.is_none()
            && self
                .quality
                .as_ref()
                .map(|q| q.decision == QualityDecision::Quarantine)
                .unwrap_or(false)
    }

    pub fn reason(&self) -> &str {
        self.moderation_reason.as_deref().unwrap_or("")
    }
}

/// Kinds of per-skill child rows removed by the hard-delete saga
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentKind {
    Fingerprints,
    Embeddings,
    Comments,
    Reports,
    Stars,
    Badges,
    DailyStats,
    StatEvents,
    Installs,
    RootInstalls,
}

impl DependentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependentKind::Fingerprints => "fingerprints",
            DependentKind::Embeddings => "embeddings",
            DependentKind::Comments => "comments",
            DependentKind::Reports => "reports",
            DependentKind::Stars => "stars",
            DependentKind::Badges => "badges",
            DependentKind::DailyStats => "daily_stats",
            DependentKind::StatEvents => "stat_events",
            DependentKind::Installs => "installs",
            DependentKind::RootInstalls => "root_installs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependentRow {
    pub id: Uuid,
    pub kind: DependentKind,
    pub skill_id: SkillId,
    pub version_id: Option<VersionId>,
    /// Acting user (reporter, starrer, installer)
    pub user_id: Option<UserId>,
    /// Kind-specific key (fingerprint hash, report reason, badge name)
    pub key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DependentRow {
    pub fn new(kind: DependentKind, skill_id: SkillId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            skill_id,
            version_id: None,
            user_id: None,
            key: None,
            created_at,
        }
    }

    pub fn with_version(mut self, version_id: VersionId) -> Self {
        self.version_id = Some(version_id);
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub skill_id: SkillId,
    pub score: f64,
}

/// Cached ranking of skills
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaderboard {
    pub id: Uuid,
    pub kind: String,
    pub period: String,
    pub entries: Vec<LeaderboardEntry>,
    pub updated_at: DateTime<Utc>,
    pub revision: u64,
}

/// Cooldown claim on a released slug
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlugReservation {
    pub slug: String,
    pub original_owner_user_id: UserId,
    pub deleted_skill_id: SkillId,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SlugReservation {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor_user_id: Option<UserId>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(
        actor_user_id: Option<UserId>,
        action: impl Into<String>,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
        metadata: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_user_id,
            action: action.into(),
            target_type: target_type.into(),
            target_id: target_id.into(),
            metadata,
            created_at,
        }
    }
}

/// Singleton cache of the public skill count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub key: String,
    pub active_public_skill_count: u64,
    pub updated_at: DateTime<Utc>,
}

pub const GLOBAL_STATS_KEY: &str = "default";

/// Sliding-window hit log for one rate-limit key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateWindow {
    pub key: String,
    pub hits: Vec<DateTime<Utc>>,
    pub revision: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_validation() {
        assert!(Slug::new("pdf-tools").is_ok());
        assert!(Slug::new("a1").is_ok());
        assert!(Slug::new("").is_err());
        assert!(Slug::new("PDF").is_err());
        assert!(Slug::new("-lead").is_err());
        assert!(Slug::new("trail-").is_err());
        assert!(Slug::new("double--dash").is_err());
        assert!(Slug::new("a".repeat(MAX_SLUG_LEN + 1)).is_err());
    }

    #[test]
    fn test_flag_serialization_uses_dotted_codes() {
        let flags: BTreeSet<ModerationFlag> =
            [ModerationFlag::BlockedMalware].into_iter().collect();
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(json, r#"["blocked.malware"]"#);
        assert_eq!(
            serde_json::to_string(&ScannerId::FileReputation).unwrap(),
            r#""vt""#
        );
    }

    #[test]
    fn test_cached_verdict_ignores_incomplete_analysis() {
        let now = Utc::now();
        let mut version = SkillVersion {
            id: Uuid::new_v4(),
            skill_id: Uuid::new_v4(),
            version: "1.0.0".to_string(),
            changelog: String::new(),
            files: Vec::new(),
            parsed: ParsedMetadata::default(),
            bundle_hash: None,
            file_reputation: Some(ScanAnalysis::pending(1, now)),
            llm_judge: Some(ScanAnalysis::completed(Verdict::Suspicious, None, now)),
            created_at: now,
            soft_deleted_at: None,
            revision: 0,
        };
        assert_eq!(version.cached_verdict(ScannerId::FileReputation), None);
        assert_eq!(
            version.cached_verdict(ScannerId::LlmJudge),
            Some(Verdict::Suspicious)
        );
        version.set_analysis(
            ScannerId::FileReputation,
            ScanAnalysis::completed(Verdict::Clean, None, now),
        );
        assert_eq!(
            version.cached_verdict(ScannerId::FileReputation),
            Some(Verdict::Clean)
        );
    }
}
