//! Verdict arbiter
//!
//! Folds independent, out-of-order scanner verdicts into one moderation state.
//! `fold` is a pure function: the stricter observation always governs, file
//! reputation outranks the LLM judge at equal severity, and re-applying a
//! verdict is a no-op. Storage and side effects live in `core::moderation`.

use crate::core::model::{
    ModerationFlag, ModerationStatus, ScanVerdict, ScannerId, Skill, Verdict,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Machine-readable moderation reason codes
pub mod reasons {
    pub const PENDING_SCAN: &str = "pending.scan";
    pub const PENDING_SCAN_STALE: &str = "pending.scan.stale";
    pub const QUALITY_LOW: &str = "quality.low";
    pub const USER_BANNED: &str = "user.banned";
    pub const REPORTS_AUTO_HIDDEN: &str = "reports.auto_hidden";
    pub const MANUAL_APPROVED: &str = "manual.approved";
    pub const MANUAL_HIDDEN: &str = "manual.hidden";
    pub const MANUAL_REMOVED: &str = "manual.removed";
    pub const MANUAL_MALWARE: &str = "manual.malware";
    pub const MANUAL_SOFT_DELETED: &str = "manual.soft_deleted";
    pub const MANUAL_RESTORED: &str = "manual.restored";
    pub const DELETED_HARD: &str = "deleted.hard";
}

/// Reason code naming the scanner that produced the governing verdict
pub fn scanner_reason(scanner: ScannerId, verdict: Verdict) -> String {
    format!("scanner.{}.{}", scanner.as_str(), verdict.as_str())
}

pub fn parse_scanner_reason(reason: &str) -> Option<(ScannerId, Verdict)> {
    let rest = reason.strip_prefix("scanner.")?;
    let (scanner, verdict) = rest.split_once('.')?;
    Some((ScannerId::parse(scanner)?, Verdict::parse(verdict)?))
}

/// Holds placed by automation (pending scans, scanner verdicts) may be lifted
/// by later verdicts; anything else was placed by a person or a policy.
pub fn is_automation_hold(reason: Option<&str>) -> bool {
    match reason {
        None => true,
        Some(r) => r.is_empty() || r.starts_with("pending.") || r.starts_with("scanner."),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationState {
    pub status: Option<ModerationStatus>,
    pub reason: Option<String>,
    pub flags: BTreeSet<ModerationFlag>,
}

impl ModerationState {
    pub fn from_skill(skill: &Skill) -> Self {
        Self {
            status: skill.moderation_status,
            reason: skill.moderation_reason.clone(),
            flags: skill.moderation_flags.clone(),
        }
    }

    pub fn pending() -> Self {
        Self {
            status: Some(ModerationStatus::Active),
            reason: Some(reasons::PENDING_SCAN.to_string()),
            flags: BTreeSet::new(),
        }
    }

    pub fn quarantined() -> Self {
        Self {
            status: Some(ModerationStatus::Hidden),
            reason: Some(reasons::QUALITY_LOW.to_string()),
            flags: BTreeSet::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.flags.contains(&ModerationFlag::BlockedMalware)
    }

    pub fn apply_to(&self, skill: &mut Skill) {
        skill.moderation_status = self.status;
        skill.moderation_reason = self.reason.clone();
        skill.moderation_flags = self.flags.clone();
    }
}

/// How much authority a scanner's verdict carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldMode {
    /// Verdicts may activate, flag, or block
    #[default]
    Authoritative,
    /// Verdicts may only escalate: malicious hides, suspicious flags while
    /// leaving the skill visible, clean changes nothing
    EscalateOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldContext {
    /// Owner is a moderator or admin
    pub privileged_owner: bool,
    /// Skill is held in quality quarantine
    pub quality_locked: bool,
    /// Latest completed verdicts cached by the other scanners
    pub other_verdicts: Vec<(ScannerId, Verdict)>,
    pub mode: FoldMode,
}

/// The observation that decides the outcome. `scanner == None` marks a flag
/// already on the record without scanner provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Governing {
    verdict: Verdict,
    scanner: Option<ScannerId>,
}

impl Governing {
    fn key(&self) -> (u8, u8) {
        (
            self.verdict.severity(),
            self.scanner.map(|s| s.rank()).unwrap_or(0),
        )
    }
}

fn governing_observation(
    state: &ModerationState,
    incoming: &ScanVerdict,
    ctx: &FoldContext,
) -> Governing {
    let mut observations = vec![Governing {
        verdict: incoming.verdict,
        scanner: Some(incoming.scanner),
    }];

    for (scanner, verdict) in &ctx.other_verdicts {
        if *scanner != incoming.scanner && *verdict != Verdict::Unknown {
            observations.push(Governing {
                verdict: *verdict,
                scanner: Some(*scanner),
            });
        }
    }

    // The record's own reason is another scanner's observation unless it came
    // from the incoming scanner, whose new verdict supersedes it.
    let existing = state.reason.as_deref().and_then(parse_scanner_reason);
    match existing {
        Some((scanner, verdict)) if scanner != incoming.scanner => {
            observations.push(Governing {
                verdict,
                scanner: Some(scanner),
            });
        }
        Some(_) => {}
        None => {
            if state.flags.contains(&ModerationFlag::FlaggedSuspicious) {
                observations.push(Governing {
                    verdict: Verdict::Suspicious,
                    scanner: None,
                });
            }
        }
    }

    observations
        .into_iter()
        .max_by_key(|g| g.key())
        .unwrap_or(Governing {
            verdict: incoming.verdict,
            scanner: Some(incoming.scanner),
        })
}

/// Fold one scanner verdict into the current moderation state.
pub fn fold(state: &ModerationState, incoming: &ScanVerdict, ctx: &FoldContext) -> ModerationState {
    if incoming.verdict == Verdict::Unknown {
        return state.clone();
    }

    if ctx.mode == FoldMode::EscalateOnly {
        return escalate(state, incoming, ctx);
    }

    let governing = governing_observation(state, incoming, ctx);

    if state.is_blocked() || governing.verdict == Verdict::Malicious {
        return blocked_state(state, governing);
    }

    let (flags, verdict_reason) = match (governing.verdict, governing.scanner) {
        (Verdict::Suspicious, None) => (
            [ModerationFlag::FlaggedSuspicious].into_iter().collect(),
            state.reason.clone(),
        ),
        (Verdict::Suspicious, Some(scanner)) if ctx.privileged_owner => (
            BTreeSet::new(),
            Some(scanner_reason(scanner, Verdict::Clean)),
        ),
        (Verdict::Suspicious, Some(scanner)) => (
            [ModerationFlag::FlaggedSuspicious].into_iter().collect(),
            Some(scanner_reason(scanner, Verdict::Suspicious)),
        ),
        (verdict, Some(scanner)) => (BTreeSet::new(), Some(scanner_reason(scanner, verdict))),
        (_, None) => (BTreeSet::new(), state.reason.clone()),
    };

    if ctx.quality_locked {
        return ModerationState {
            status: Some(ModerationStatus::Hidden),
            reason: Some(reasons::QUALITY_LOW.to_string()),
            flags,
        };
    }

    let automation_owned = matches!(
        state.status,
        None | Some(ModerationStatus::Active)
    ) || (state.status == Some(ModerationStatus::Hidden)
        && is_automation_hold(state.reason.as_deref()));

    if automation_owned {
        ModerationState {
            status: Some(ModerationStatus::Active),
            reason: verdict_reason,
            flags,
        }
    } else {
        // Manual holds and removals keep their status and reason
        ModerationState {
            status: state.status,
            reason: state.reason.clone(),
            flags,
        }
    }
}

fn blocked_state(state: &ModerationState, governing: Governing) -> ModerationState {
    let reason = match (governing.verdict, governing.scanner) {
        (Verdict::Malicious, Some(scanner)) => Some(scanner_reason(scanner, Verdict::Malicious)),
        _ => state.reason.clone(),
    };
    let status = match state.status {
        Some(ModerationStatus::Removed) => Some(ModerationStatus::Removed),
        _ => Some(ModerationStatus::Hidden),
    };
    ModerationState {
        status,
        reason,
        flags: [ModerationFlag::BlockedMalware].into_iter().collect(),
    }
}

fn escalate(state: &ModerationState, incoming: &ScanVerdict, ctx: &FoldContext) -> ModerationState {
    match incoming.verdict {
        Verdict::Malicious => blocked_state(
            state,
            Governing {
                verdict: Verdict::Malicious,
                scanner: Some(incoming.scanner),
            },
        ),
        Verdict::Suspicious if !state.is_blocked() && !ctx.privileged_owner => {
            let mut next = state.clone();
            next.flags.insert(ModerationFlag::FlaggedSuspicious);
            if !ctx.quality_locked && is_automation_hold(state.reason.as_deref()) {
                next.reason = Some(scanner_reason(incoming.scanner, Verdict::Suspicious));
            }
            next
        }
        _ => state.clone(),
    }
}

/// Before/after pair for one committed moderation write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub before: ModerationState,
    pub after: ModerationState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }

    pub fn became_blocked(&self) -> bool {
        !self.before.is_blocked() && self.after.is_blocked()
    }
}
