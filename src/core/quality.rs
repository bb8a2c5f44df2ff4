//! Quality gate for first-time skill publishes
//!
//! Heuristic anti-spam scoring over the primary instruction document. The
//! result is deterministic for identical body, trust tier and similarity
//! count; numeric thresholds are configuration, not protocol.

use crate::core::trust::TrustTier;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

static TEMPLATE_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)lorem ipsum",
        r"\bTODO\b|\bTBD\b|\bFIXME\b",
        r"(?i)your (skill )?description (goes )?here",
        r"(?i)\[(insert|your|add|describe) [^\]]*\]",
        r"\{\{\s*[A-Za-z_][A-Za-z0-9_]*\s*\}\}",
        r"(?i)\breplace (this|me)\b",
        r"(?i)as an ai (language )?model",
        r"(?i)this is an? (example|sample|template|placeholder) skill",
    ]
    .iter()
    .map(|pattern| {
        #[allow(clippy::expect_used)]
        Regex::new(pattern).expect("Invalid template marker regex")
    })
    .collect()
});

static GENERIC_SUMMARY: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(
        r"(?i)^(this|a|an|the)\s+(skill|tool|helper|agent|assistant)\s+(that\s+|which\s+)?(helps?|allows?|lets?|enables?|is used|can be used|provides?)\b",
    )
    .expect("Invalid generic summary regex")
});

/// Paragraphs shorter than this that open generically count as filler
const GENERIC_SUMMARY_MAX_WORDS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityDecision {
    Pass,
    Quarantine,
    Reject,
}

impl QualityDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityDecision::Pass => "pass",
            QualityDecision::Quarantine => "quarantine",
            QualityDecision::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySignals {
    pub body_chars: usize,
    pub body_words: usize,
    pub unique_word_ratio: f64,
    pub heading_count: usize,
    pub bullet_count: usize,
    pub template_marker_hits: usize,
    pub generic_summary: bool,
    pub cjk_chars: usize,
}

impl QualitySignals {
    /// CJK text has no word separators; two characters approximate a word.
    pub fn effective_words(&self) -> usize {
        self.body_words + self.cjk_chars / 2
    }
}

/// Snapshot stored on the skill at first publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub decision: QualityDecision,
    pub score: i32,
    pub trust_tier: TrustTier,
    pub similar_recent_count: u32,
    pub signals: QualitySignals,
    pub structure_fingerprint: String,
}

/// Per-tier decision thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Scores strictly below this are rejected
    pub reject_below: i32,
    /// Scores strictly below this are quarantined
    pub quarantine_below: i32,
    /// Similar recent skills at or above this count quarantine
    pub similar_quarantine_at: u32,
    /// Similar recent skills at or above this count reject
    pub similar_reject_at: u32,
    /// Score penalty per similar recent skill
    pub similarity_penalty: i32,
}

impl QualityThresholds {
    pub fn low_trust() -> Self {
        Self {
            reject_below: 20,
            quarantine_below: 40,
            similar_quarantine_at: 2,
            similar_reject_at: 4,
            similarity_penalty: 10,
        }
    }

    pub fn trusted() -> Self {
        Self {
            reject_below: 10,
            quarantine_below: 25,
            similar_quarantine_at: 5,
            similar_reject_at: 10,
            similarity_penalty: 4,
        }
    }
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self::low_trust()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Bodies shorter than this (in characters) are rejected outright
    pub min_body_chars: usize,
    /// Trailing window for the same-owner similarity count
    pub similarity_window_hours: u32,
    pub low: QualityThresholds,
    pub trusted: QualityThresholds,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_body_chars: 40,
            similarity_window_hours: 24,
            low: QualityThresholds::low_trust(),
            trusted: QualityThresholds::trusted(),
        }
    }
}

impl QualityConfig {
    pub fn thresholds(&self, tier: TrustTier) -> &QualityThresholds {
        match tier {
            TrustTier::Low => &self.low,
            TrustTier::Trusted => &self.trusted,
        }
    }
}

/// Strip YAML frontmatter and normalize line endings
pub fn normalize_body(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed = text.trim_start_matches('\u{feff}');
    if let Some(rest) = trimmed.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---") {
            let after = &rest[end + 4..];
            let after = after.strip_prefix('\n').unwrap_or(after);
            return after.trim().to_string();
        }
    }
    trimmed.trim().to_string()
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xAC00..=0xD7AF
        | 0xF900..=0xFAFF)
}

fn words(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() && !is_cjk(c) {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn is_heading(line: &str) -> Option<usize> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&level) && line[level..].starts_with(' ') {
        Some(level)
    } else {
        None
    }
}

fn is_bullet(line: &str) -> bool {
    line.starts_with("- ") || line.starts_with("* ") || line.starts_with("+ ")
}

fn is_numbered(line: &str) -> bool {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && (line[digits..].starts_with(". ") || line[digits..].starts_with(") "))
}

fn first_paragraph(body: &str) -> Option<String> {
    let mut paragraph = Vec::new();
    let mut in_code = false;
    for line in body.lines() {
        let line = line.trim();
        if line.starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if in_code || is_heading(line).is_some() {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        if line.is_empty() {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(line);
    }
    if paragraph.is_empty() {
        None
    } else {
        Some(paragraph.join(" "))
    }
}

/// Compute the raw quality signals of a normalized body
pub fn compute_signals(body: &str) -> QualitySignals {
    let tokens = words(body);
    let unique: HashSet<&str> = tokens.iter().map(|w| w.as_str()).collect();
    let unique_word_ratio = if tokens.is_empty() {
        0.0
    } else {
        unique.len() as f64 / tokens.len() as f64
    };

    let mut heading_count = 0;
    let mut bullet_count = 0;
    let mut in_code = false;
    for line in body.lines() {
        let line = line.trim_start();
        if line.starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if in_code {
            continue;
        }
        if is_heading(line).is_some() {
            heading_count += 1;
        } else if is_bullet(line) || is_numbered(line) {
            bullet_count += 1;
        }
    }

    let template_marker_hits = TEMPLATE_MARKERS
        .iter()
        .map(|re| re.find_iter(body).count())
        .sum();

    let generic_summary = first_paragraph(body)
        .map(|p| GENERIC_SUMMARY.is_match(&p) && words(&p).len() < GENERIC_SUMMARY_MAX_WORDS)
        .unwrap_or(false);

    QualitySignals {
        body_chars: body.chars().count(),
        body_words: tokens.len(),
        unique_word_ratio,
        heading_count,
        bullet_count,
        template_marker_hits,
        generic_summary,
        cjk_chars: body.chars().filter(|c| is_cjk(*c)).count(),
    }
}

fn paragraph_bucket(line: &str) -> &'static str {
    match words(line).len() + line.chars().filter(|c| is_cjk(*c)).count() / 2 {
        0..=5 => "p.s",
        6..=20 => "p.m",
        _ => "p.l",
    }
}

/// Shape of a document independent of its literal wording. Runs of the same
/// line shape collapse so adding one more bullet does not change the shape.
pub fn structure_fingerprint(body: &str) -> String {
    let mut shape: Vec<String> = Vec::new();
    let mut in_code = false;
    for raw in body.lines() {
        let line = raw.trim();
        let token = if line.starts_with("```") {
            in_code = !in_code;
            if in_code {
                Some("code".to_string())
            } else {
                None
            }
        } else if in_code || line.is_empty() {
            None
        } else if let Some(level) = is_heading(line) {
            Some(format!("h{}", level))
        } else if is_bullet(line) {
            Some("li".to_string())
        } else if is_numbered(line) {
            Some("ol".to_string())
        } else if line.starts_with('|') {
            Some("tbl".to_string())
        } else {
            Some(paragraph_bucket(line).to_string())
        };
        if let Some(token) = token {
            if shape.last() != Some(&token) {
                shape.push(token);
            }
        }
    }
    let digest = Sha256::digest(shape.join("\n").as_bytes());
    format!("{:x}", digest)[..32].to_string()
}

fn score(signals: &QualitySignals, thresholds: &QualityThresholds, similar: u32) -> i32 {
    let words = signals.effective_words();
    let length = (words / 10).min(30) as i32;
    let diversity = if words >= 20 {
        (signals.unique_word_ratio * 25.0).round() as i32
    } else {
        (signals.unique_word_ratio * 10.0).round() as i32
    };
    let structure =
        (signals.heading_count.min(5) * 4 + signals.bullet_count.min(10) * 2) as i32;

    let penalties = signals.template_marker_hits as i32 * 8
        + if signals.generic_summary { 10 } else { 0 }
        + similar as i32 * thresholds.similarity_penalty;

    (length + diversity + structure - penalties).clamp(0, 100)
}

/// Evaluate a normalized body for a publisher of the given trust tier
pub fn evaluate(
    body: &str,
    trust_tier: TrustTier,
    similar_recent_count: u32,
    config: &QualityConfig,
) -> QualityAssessment {
    let signals = compute_signals(body);
    let thresholds = config.thresholds(trust_tier);
    let score = score(&signals, thresholds, similar_recent_count);

    let decision = if signals.body_chars < config.min_body_chars
        || score < thresholds.reject_below
        || similar_recent_count >= thresholds.similar_reject_at
    {
        QualityDecision::Reject
    } else if score < thresholds.quarantine_below
        || similar_recent_count >= thresholds.similar_quarantine_at
    {
        QualityDecision::Quarantine
    } else {
        QualityDecision::Pass
    };

    QualityAssessment {
        decision,
        score,
        trust_tier,
        similar_recent_count,
        signals,
        structure_fingerprint: structure_fingerprint(body),
    }
}
