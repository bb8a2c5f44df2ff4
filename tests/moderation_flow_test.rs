//! End-to-end moderation lifecycle over the in-memory service

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Duration;
use fastskill_moderation::core::arbiter::scanner_reason;
use fastskill_moderation::core::{
    reasons, ModerationFlag, ModerationState, ModerationStatus, ModeratorAction, ScanAnalysis,
    ScanVerdict, ScannerId, ServiceError, TrustTier, UploadedFile, UserRole, Verdict,
};
use fastskill_moderation::storage::RegistryStore;
use fastskill_moderation::test_utils::{
    publish_request, spam_skill_md, test_config, FakeFileReply, FakeJudgeReply, TestHarness,
};

async fn assert_counter_consistent(harness: &TestHarness) {
    let cached = harness.service.visible_skill_count().await.unwrap();
    let recounted = harness.service.context().counter.recount().await.unwrap();
    assert_eq!(cached, recounted, "cached visible count drifted from recount");
}

#[tokio::test]
async fn test_publish_starts_pending_and_clean_scans_settle() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;

    let outcome = harness.publish(&alice, "pdf-tools", "1.0.0").await.unwrap();
    assert!(outcome.created);
    assert_eq!(outcome.skill.reason(), reasons::PENDING_SCAN);
    assert_eq!(outcome.skill.moderation_status, Some(ModerationStatus::Active));
    assert_eq!(outcome.trust_tier, Some(TrustTier::Low));
    assert_eq!(harness.service.visible_skill_count().await.unwrap(), 1);

    let queue = harness.service.engine().queue_health().await.unwrap();
    assert_eq!(queue.pending, 1);

    let ran = harness.drain().await.unwrap();
    assert_eq!(ran, 2, "one task per configured scanner");

    let skill = harness
        .store
        .get_skill_by_slug("pdf-tools")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(skill.moderation_status, Some(ModerationStatus::Active));
    assert_eq!(
        skill.reason(),
        scanner_reason(ScannerId::FileReputation, Verdict::Clean)
    );
    assert!(skill.moderation_flags.is_empty());
    assert_eq!(harness.llm_judge.calls(), 1);
    assert!(harness.llm_judge.prompts()[0].contains("pdf-tools"));
    assert_eq!(harness.service.engine().queue_health().await.unwrap().pending, 0);
    assert_counter_consistent(&harness).await;
}

#[tokio::test]
async fn test_rerunning_scans_is_a_noop() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let outcome = harness.publish(&alice, "pdf-tools", "1.0.0").await.unwrap();
    harness.drain().await.unwrap();
    let settled = harness.store.get_skill(outcome.skill.id).await.unwrap().unwrap();

    harness
        .service
        .file_reputation()
        .unwrap()
        .scan(outcome.version.id, 0)
        .await
        .unwrap();
    harness
        .service
        .llm_judge()
        .unwrap()
        .scan(outcome.version.id, 0)
        .await
        .unwrap();

    let again = harness.store.get_skill(outcome.skill.id).await.unwrap().unwrap();
    assert_eq!(again.revision, settled.revision);
    assert_eq!(harness.llm_judge.calls(), 1, "cached verdict is reused");
}

#[tokio::test]
async fn test_malicious_file_verdict_beats_clean_judge_in_any_order() {
    let harness = TestHarness::build(test_config(), false, false);
    let alice = harness.user("alice").await;
    let bob = harness.user("bob").await;
    let first = harness.publish(&alice, "first-tool", "1.0.0").await.unwrap();
    let second = harness.publish(&bob, "second-tool", "1.0.0").await.unwrap();
    let now = harness.service.context().now();

    let verdict = |scanner, verdict| {
        (
            ScanVerdict {
                scanner,
                verdict,
                evidence: None,
                observed_at: now,
            },
            ScanAnalysis::completed(verdict, None, now),
        )
    };
    let engine = harness.service.engine();

    for (scanner, v) in [
        (ScannerId::FileReputation, Verdict::Malicious),
        (ScannerId::LlmJudge, Verdict::Clean),
    ] {
        let (scan, analysis) = verdict(scanner, v);
        engine
            .record_verdict(first.version.id, scan, analysis)
            .await
            .unwrap();
    }
    for (scanner, v) in [
        (ScannerId::LlmJudge, Verdict::Clean),
        (ScannerId::FileReputation, Verdict::Malicious),
    ] {
        let (scan, analysis) = verdict(scanner, v);
        engine
            .record_verdict(second.version.id, scan, analysis)
            .await
            .unwrap();
    }

    let first = harness.store.get_skill(first.skill.id).await.unwrap().unwrap();
    let second = harness.store.get_skill(second.skill.id).await.unwrap().unwrap();
    assert_eq!(
        ModerationState::from_skill(&first),
        ModerationState::from_skill(&second)
    );
    assert!(first.is_blocked());
    assert_eq!(first.moderation_status, Some(ModerationStatus::Hidden));
    assert_eq!(
        first.reason(),
        scanner_reason(ScannerId::FileReputation, Verdict::Malicious)
    );
    assert_counter_consistent(&harness).await;
}

#[tokio::test]
async fn test_suspicious_judge_flags_regular_owner_but_not_admin() {
    let harness = TestHarness::new();
    harness
        .llm_judge
        .set_reply(FakeJudgeReply::Verdict(Verdict::Suspicious));
    let alice = harness.user("alice").await;
    let admin = harness.admin("root").await;

    let flagged = harness.publish(&alice, "shell-helper", "1.0.0").await.unwrap();
    let trusted = harness.publish(&admin, "admin-helper", "1.0.0").await.unwrap();
    harness.drain().await.unwrap();

    let flagged = harness.store.get_skill(flagged.skill.id).await.unwrap().unwrap();
    assert!(flagged
        .moderation_flags
        .contains(&ModerationFlag::FlaggedSuspicious));
    assert_eq!(flagged.moderation_status, Some(ModerationStatus::Active));
    assert_eq!(
        flagged.reason(),
        scanner_reason(ScannerId::LlmJudge, Verdict::Suspicious)
    );

    let trusted = harness.store.get_skill(trusted.skill.id).await.unwrap().unwrap();
    assert!(trusted.moderation_flags.is_empty());
    assert_eq!(trusted.moderation_status, Some(ModerationStatus::Active));
    assert_eq!(
        trusted.reason(),
        scanner_reason(ScannerId::LlmJudge, Verdict::Clean)
    );
}

#[tokio::test]
async fn test_malware_auto_bans_owner_and_unban_restores_other_skills() {
    let harness = TestHarness::new();
    let mallory = harness.user("mallory").await;
    let moderator = harness.moderator("mod").await;

    let infected = harness.publish(&mallory, "infected", "1.0.0").await.unwrap();
    let innocent = harness.publish(&mallory, "innocent", "1.0.0").await.unwrap();
    harness.drain().await.unwrap();
    assert_eq!(harness.service.visible_skill_count().await.unwrap(), 2);

    harness
        .file_reputation
        .set_reply(FakeFileReply::Report(Verdict::Malicious));
    harness.publish(&mallory, "infected", "1.1.0").await.unwrap();
    harness.drain().await.unwrap();

    let user = harness.store.get_user(mallory.id).await.unwrap().unwrap();
    assert!(user.is_banned());

    let infected_skill = harness.store.get_skill(infected.skill.id).await.unwrap().unwrap();
    assert!(infected_skill.is_blocked());
    assert_eq!(
        infected_skill.reason(),
        scanner_reason(ScannerId::FileReputation, Verdict::Malicious)
    );
    assert!(infected_skill.soft_deleted_at.is_none());

    let innocent_skill = harness.store.get_skill(innocent.skill.id).await.unwrap().unwrap();
    assert_eq!(innocent_skill.reason(), reasons::USER_BANNED);
    assert!(innocent_skill.soft_deleted_at.is_some());
    assert!(innocent_skill.ban_snapshot.is_some());
    assert_eq!(harness.service.visible_skill_count().await.unwrap(), 0);

    let err = harness
        .publish(&mallory, "another-one", "1.0.0")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let restored = harness
        .service
        .bans()
        .unban_user(moderator.id, mallory.id)
        .await
        .unwrap();
    assert_eq!(restored, 1);

    let innocent_skill = harness.store.get_skill(innocent.skill.id).await.unwrap().unwrap();
    assert_eq!(
        innocent_skill.reason(),
        scanner_reason(ScannerId::FileReputation, Verdict::Clean)
    );
    assert_eq!(innocent_skill.moderation_status, Some(ModerationStatus::Active));
    assert!(innocent_skill.soft_deleted_at.is_none());
    assert!(innocent_skill.ban_snapshot.is_none());

    let infected_skill = harness.store.get_skill(infected.skill.id).await.unwrap().unwrap();
    assert!(infected_skill.is_blocked(), "unban never clears a malware block");
    assert_eq!(harness.service.visible_skill_count().await.unwrap(), 1);
    assert_counter_consistent(&harness).await;
}

#[tokio::test]
async fn test_manual_ban_requires_moderator_and_skips_privileged_users() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let bob = harness.user("bob").await;
    let moderator = harness.moderator("mod").await;
    let admin = harness.admin("root").await;

    let err = harness
        .service
        .bans()
        .ban_user(bob.id, alice.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let err = harness
        .service
        .bans()
        .ban_user(moderator.id, admin.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    assert!(harness
        .service
        .bans()
        .ban_user(moderator.id, alice.id, Some("spam".to_string()))
        .await
        .unwrap());
    assert!(!harness
        .service
        .bans()
        .ban_user(moderator.id, alice.id, None)
        .await
        .unwrap());

    let logs = harness.store.list_audit_logs(&alice.id.to_string()).await.unwrap();
    assert!(logs.iter().any(|l| l.action == "user.ban"));
}

#[tokio::test]
async fn test_ban_cascade_pages_through_skills() {
    let mut config = test_config();
    config.moderation.ban_batch_size = 2;
    let harness = TestHarness::with_config(config);
    let spammer = harness.user("spammer").await;
    let moderator = harness.moderator("mod").await;

    for i in 0..5 {
        harness
            .publish(&spammer, &format!("tool-{}", i), "1.0.0")
            .await
            .unwrap();
    }
    harness.drain().await.unwrap();

    harness
        .service
        .bans()
        .ban_user(moderator.id, spammer.id, None)
        .await
        .unwrap();
    assert_eq!(harness.drain().await.unwrap(), 3);

    let page = harness
        .store
        .list_skills_by_owner(spammer.id, None, 100)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 5);
    assert!(page
        .items
        .iter()
        .all(|s| s.reason() == reasons::USER_BANNED && s.soft_deleted_at.is_some()));
    assert_eq!(harness.service.visible_skill_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reports_auto_hide_at_threshold() {
    let harness = TestHarness::new();
    let owner = harness.user("owner").await;
    let skill = harness.publish(&owner, "noisy", "1.0.0").await.unwrap().skill;
    harness.drain().await.unwrap();

    let engine = harness.service.engine();
    let mut reporters = Vec::new();
    for name in ["r1", "r2", "r3"] {
        reporters.push(harness.user(name).await);
    }

    let first = engine
        .report_skill(reporters[0].id, skill.id, "steals tokens")
        .await
        .unwrap();
    assert_eq!(first.report_count, 1);
    assert!(!first.auto_hidden);

    let dup = engine
        .report_skill(reporters[0].id, skill.id, "again")
        .await
        .unwrap_err();
    assert!(matches!(dup, ServiceError::Conflict(_)));

    engine
        .report_skill(reporters[1].id, skill.id, "phishing link")
        .await
        .unwrap();
    let third = engine
        .report_skill(reporters[2].id, skill.id, "malware")
        .await
        .unwrap();
    assert_eq!(third.report_count, 3);
    assert!(third.auto_hidden);

    let hidden = harness.store.get_skill(skill.id).await.unwrap().unwrap();
    assert_eq!(hidden.moderation_status, Some(ModerationStatus::Hidden));
    assert_eq!(hidden.reason(), reasons::REPORTS_AUTO_HIDDEN);
    assert_eq!(harness.service.visible_skill_count().await.unwrap(), 0);

    let empty = engine
        .report_skill(harness.user("r4").await.id, skill.id, "   ")
        .await
        .unwrap_err();
    assert!(matches!(empty, ServiceError::Validation(_)));
}

#[tokio::test]
async fn test_reports_do_not_override_manual_approval() {
    let harness = TestHarness::new();
    let owner = harness.user("owner").await;
    let moderator = harness.moderator("mod").await;
    let skill = harness.publish(&owner, "contested", "1.0.0").await.unwrap().skill;
    harness.drain().await.unwrap();

    harness
        .service
        .engine()
        .moderate(moderator.id, skill.id, ModeratorAction::Approve, None)
        .await
        .unwrap();
    for name in ["r1", "r2", "r3", "r4"] {
        let reporter = harness.user(name).await;
        let outcome = harness
            .service
            .engine()
            .report_skill(reporter.id, skill.id, "dislike")
            .await
            .unwrap();
        assert!(!outcome.auto_hidden);
    }
    let skill = harness.store.get_skill(skill.id).await.unwrap().unwrap();
    assert_eq!(skill.reason(), reasons::MANUAL_APPROVED);
    assert_eq!(skill.moderation_status, Some(ModerationStatus::Active));
}

#[tokio::test]
async fn test_unavailable_scanner_goes_stale_and_releases_skill() {
    let harness = TestHarness::build(test_config(), true, false);
    harness.file_reputation.set_reply(FakeFileReply::Unavailable);
    let owner = harness.user("owner").await;
    let outcome = harness.publish(&owner, "slow-scan", "1.0.0").await.unwrap();

    assert_eq!(harness.drain().await.unwrap(), 3);

    let skill = harness.store.get_skill(outcome.skill.id).await.unwrap().unwrap();
    assert_eq!(skill.reason(), reasons::PENDING_SCAN_STALE);
    assert_eq!(skill.moderation_status, Some(ModerationStatus::Active));

    let queue = harness.service.engine().queue_health().await.unwrap();
    assert_eq!(queue.pending, 0);
    assert_eq!(queue.stale, 1);
}

#[tokio::test]
async fn test_unknown_bundle_is_uploaded_once_then_rescan_settles() {
    let harness = TestHarness::build(test_config(), true, false);
    harness.file_reputation.set_reply(FakeFileReply::Unknown);
    let owner = harness.user("owner").await;
    let moderator = harness.moderator("mod").await;
    let outcome = harness.publish(&owner, "fresh-bundle", "1.0.0").await.unwrap();
    harness.drain().await.unwrap();

    assert_eq!(harness.file_reputation.uploads().len(), 1);
    assert_eq!(harness.file_reputation.lookups(), 3);
    let skill = harness.store.get_skill(outcome.skill.id).await.unwrap().unwrap();
    assert_eq!(skill.reason(), reasons::PENDING_SCAN_STALE);

    harness
        .file_reputation
        .set_reply(FakeFileReply::Report(Verdict::Clean));
    let scanners = harness
        .service
        .engine()
        .rescan(moderator.id, outcome.version.id)
        .await
        .unwrap();
    assert_eq!(scanners, vec![ScannerId::FileReputation]);
    harness.drain().await.unwrap();

    let skill = harness.store.get_skill(outcome.skill.id).await.unwrap().unwrap();
    assert_eq!(
        skill.reason(),
        scanner_reason(ScannerId::FileReputation, Verdict::Clean)
    );
}

#[tokio::test]
async fn test_queued_analysis_requests_reanalysis() {
    let harness = TestHarness::build(test_config(), true, false);
    harness.file_reputation.set_reply(FakeFileReply::Queued);
    let owner = harness.user("owner").await;
    harness.publish(&owner, "queued", "1.0.0").await.unwrap();
    harness.drain().await.unwrap();

    assert_eq!(harness.file_reputation.reanalysis_requests(), 1);
    assert!(harness.file_reputation.uploads().is_empty());
}

#[tokio::test]
async fn test_malformed_judge_output_is_recorded_as_error() {
    let harness = TestHarness::build(test_config(), false, true);
    harness
        .llm_judge
        .set_reply(FakeJudgeReply::Raw("I think it is fine".to_string()));
    let owner = harness.user("owner").await;
    let outcome = harness.publish(&owner, "chatty", "1.0.0").await.unwrap();
    harness.drain().await.unwrap();

    assert_eq!(harness.llm_judge.calls(), 1, "parse errors are not retried");
    let version = harness.store.get_version(outcome.version.id).await.unwrap().unwrap();
    assert!(version.cached_verdict(ScannerId::LlmJudge).is_none());
    let skill = harness.store.get_skill(outcome.skill.id).await.unwrap().unwrap();
    assert_eq!(skill.reason(), reasons::PENDING_SCAN_STALE);
}

#[tokio::test]
async fn test_rescan_requires_moderator() {
    let harness = TestHarness::new();
    let owner = harness.user("owner").await;
    let outcome = harness.publish(&owner, "mine", "1.0.0").await.unwrap();

    let err = harness
        .service
        .engine()
        .rescan(owner.id, outcome.version.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
}

#[tokio::test]
async fn test_quality_quarantine_holds_until_approved() {
    let mut config = test_config();
    config.quality.low.quarantine_below = 1_000;
    let harness = TestHarness::with_config(config);
    let owner = harness.user("owner").await;
    let moderator = harness.moderator("mod").await;

    let outcome = harness.publish(&owner, "borderline", "1.0.0").await.unwrap();
    assert_eq!(outcome.skill.moderation_status, Some(ModerationStatus::Hidden));
    assert_eq!(outcome.skill.reason(), reasons::QUALITY_LOW);
    assert_eq!(harness.service.visible_skill_count().await.unwrap(), 0);

    harness.drain().await.unwrap();
    let skill = harness.store.get_skill(outcome.skill.id).await.unwrap().unwrap();
    assert_eq!(skill.reason(), reasons::QUALITY_LOW, "clean scans keep the lock");
    assert!(skill.is_quality_locked());

    let approved = harness
        .service
        .engine()
        .moderate(
            moderator.id,
            skill.id,
            ModeratorAction::Approve,
            Some("reviewed by hand".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(approved.moderation_status, Some(ModerationStatus::Active));
    assert!(!approved.is_quality_locked());
    assert_eq!(approved.moderation_notes.as_deref(), Some("reviewed by hand"));
    assert_eq!(harness.service.visible_skill_count().await.unwrap(), 1);
    assert_counter_consistent(&harness).await;
}

#[tokio::test]
async fn test_spam_is_rejected_by_quality_gate() {
    let harness = TestHarness::new();
    let owner = harness.user("owner").await;
    let mut request = publish_request(&owner, "spammy", "1.0.0");
    request.files = vec![UploadedFile::text("SKILL.md", spam_skill_md())];

    let err = harness.service.publisher().publish(request).await.unwrap_err();
    assert!(matches!(err, ServiceError::Policy { .. }));
    assert!(harness.store.get_skill_by_slug("spammy").await.unwrap().is_none());
    assert!(harness.scheduler.is_empty());
}

#[tokio::test]
async fn test_hourly_rate_limit_applies_to_new_skills_only() {
    let mut config = test_config();
    config.rate_limit.low.hourly = 2;
    config.rate_limit.low.daily = 10;
    let harness = TestHarness::with_config(config);
    let owner = harness.user("owner").await;

    harness.publish(&owner, "one", "1.0.0").await.unwrap();
    harness.publish(&owner, "two", "1.0.0").await.unwrap();
    let err = harness.publish(&owner, "three", "1.0.0").await.unwrap_err();
    match err {
        ServiceError::RateLimited {
            retry_after_secs, ..
        } => assert!(retry_after_secs > 0 && retry_after_secs <= 3600),
        other => panic!("expected rate limit, got {:?}", other),
    }

    // New versions of existing skills are not capped
    harness.publish(&owner, "one", "1.1.0").await.unwrap();

    harness.clock.advance(Duration::minutes(61));
    harness.publish(&owner, "three", "1.0.0").await.unwrap();
}

#[tokio::test]
async fn test_established_publisher_is_trusted() {
    let harness = TestHarness::new();
    let veteran = harness.user_aged("veteran", UserRole::User, 60).await;
    let newcomer = harness.user("newcomer").await;

    for i in 0..10 {
        harness
            .publish(&veteran, &format!("vet-{}", i), "1.0.0")
            .await
            .unwrap();
        harness
            .publish(&newcomer, &format!("new-{}", i), "1.0.0")
            .await
            .unwrap();
    }
    let vet = harness.publish(&veteran, "vet-10", "1.0.0").await.unwrap();
    assert_eq!(vet.trust_tier, Some(TrustTier::Trusted));
    let new = harness.publish(&newcomer, "new-10", "1.0.0").await.unwrap();
    assert_eq!(new.trust_tier, Some(TrustTier::Low), "account too young");
}

#[tokio::test]
async fn test_fresh_account_cannot_publish() {
    let harness = TestHarness::new();
    let fresh = harness.user_aged("fresh", UserRole::User, 0).await;
    let err = harness.publish(&fresh, "too-soon", "1.0.0").await.unwrap_err();
    match err {
        ServiceError::Policy {
            retry_after_secs, ..
        } => assert_eq!(retry_after_secs, Some(24 * 60 * 60)),
        other => panic!("expected policy error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_new_version_resets_scanner_reason_to_pending() {
    let harness = TestHarness::new();
    let owner = harness.user("owner").await;
    harness.publish(&owner, "evolving", "1.0.0").await.unwrap();
    harness.drain().await.unwrap();

    let next = harness.publish(&owner, "evolving", "1.1.0").await.unwrap();
    assert!(!next.created);
    assert_eq!(next.skill.reason(), reasons::PENDING_SCAN);
    assert_eq!(next.skill.latest_version_id, Some(next.version.id));

    let dup = harness.publish(&owner, "evolving", "1.1.0").await.unwrap_err();
    assert!(matches!(dup, ServiceError::Conflict(_)));

    let intruder = harness.user("intruder").await;
    let taken = harness.publish(&intruder, "evolving", "2.0.0").await.unwrap_err();
    assert!(matches!(taken, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn test_file_reputation_by_hash_updates_matching_versions() {
    let harness = TestHarness::build(test_config(), false, false);
    let owner = harness.user("owner").await;
    let outcome = harness.publish(&owner, "hashed", "1.0.0").await.unwrap();
    let hash = outcome.version.bundle_hash.clone().unwrap();

    let applied = harness
        .service
        .engine()
        .apply_file_reputation_by_hash(&hash, Verdict::Suspicious, Some("2 engines".to_string()))
        .await
        .unwrap();
    assert_eq!(applied, 1);

    let skill = harness.store.get_skill(outcome.skill.id).await.unwrap().unwrap();
    assert!(skill
        .moderation_flags
        .contains(&ModerationFlag::FlaggedSuspicious));
    assert_eq!(
        skill.reason(),
        scanner_reason(ScannerId::FileReputation, Verdict::Suspicious)
    );
}

#[tokio::test]
async fn test_restore_never_reactivates_a_malware_block() {
    let harness = TestHarness::new();
    let admin = harness.admin("root").await;
    let moderator = harness.moderator("mod").await;
    let outcome = harness.publish(&admin, "admin-tool", "1.0.0").await.unwrap();
    harness.drain().await.unwrap();
    let engine = harness.service.engine();

    for action in [
        ModeratorAction::MarkMalware,
        ModeratorAction::SoftDelete,
        ModeratorAction::Restore,
    ] {
        engine
            .moderate(moderator.id, outcome.skill.id, action, None)
            .await
            .unwrap();
    }

    let skill = harness.store.get_skill(outcome.skill.id).await.unwrap().unwrap();
    assert!(skill.soft_deleted_at.is_none());
    assert!(skill.is_blocked());
    assert_eq!(skill.moderation_status, Some(ModerationStatus::Hidden));
    assert_eq!(harness.service.visible_skill_count().await.unwrap(), 0);

    let approved = engine
        .moderate(moderator.id, outcome.skill.id, ModeratorAction::Approve, None)
        .await
        .unwrap();
    assert!(!approved.is_blocked());
    assert_eq!(approved.moderation_status, Some(ModerationStatus::Active));
    assert_eq!(harness.service.visible_skill_count().await.unwrap(), 1);
    assert_counter_consistent(&harness).await;
}

#[tokio::test]
async fn test_restore_refused_while_owner_is_banned() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let moderator = harness.moderator("mod").await;
    let outcome = harness.publish(&alice, "alice-tool", "1.0.0").await.unwrap();
    harness.drain().await.unwrap();
    harness
        .service
        .bans()
        .ban_user(moderator.id, alice.id, None)
        .await
        .unwrap();
    harness.drain().await.unwrap();

    let err = harness
        .service
        .engine()
        .moderate(moderator.id, outcome.skill.id, ModeratorAction::Restore, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    let skill = harness.store.get_skill(outcome.skill.id).await.unwrap().unwrap();
    assert_eq!(skill.reason(), reasons::USER_BANNED);
    assert!(skill.ban_snapshot.is_some());

    let restored = harness
        .service
        .bans()
        .unban_user(moderator.id, alice.id)
        .await
        .unwrap();
    assert_eq!(restored, 1);
    assert_counter_consistent(&harness).await;
}

#[tokio::test]
async fn test_block_followup_left_by_interrupted_run_is_finished_on_retry() {
    let harness = TestHarness::new();
    let mallory = harness.user("mallory").await;
    let moderator = harness.moderator("mod").await;
    let infected = harness.publish(&mallory, "infected", "1.0.0").await.unwrap();
    let other = harness.publish(&mallory, "other", "1.0.0").await.unwrap();
    harness.drain().await.unwrap();

    // Block committed, but the run failed before banning the owner
    let mut skill = harness.store.get_skill(infected.skill.id).await.unwrap().unwrap();
    skill.moderation_flags = [ModerationFlag::BlockedMalware].into_iter().collect();
    skill.moderation_status = Some(ModerationStatus::Hidden);
    skill.moderation_reason = Some(scanner_reason(ScannerId::FileReputation, Verdict::Malicious));
    skill.block_followup_pending = true;
    harness.store.update_skill(skill).await.unwrap();

    let now = harness.service.context().now();
    let malicious = || ScanVerdict {
        scanner: ScannerId::FileReputation,
        verdict: Verdict::Malicious,
        evidence: Some("7 engines".to_string()),
        observed_at: now,
    };
    let engine = harness.service.engine();
    let transition = engine
        .apply_scan_verdict(infected.version.id, malicious())
        .await
        .unwrap()
        .unwrap();
    assert!(!transition.changed());

    let user = harness.store.get_user(mallory.id).await.unwrap().unwrap();
    assert!(user.is_banned());
    let skill = harness.store.get_skill(infected.skill.id).await.unwrap().unwrap();
    assert!(!skill.block_followup_pending);
    let logs = harness
        .store
        .list_audit_logs(&infected.skill.id.to_string())
        .await
        .unwrap();
    assert!(logs.iter().any(|l| l.action == "skill.blocked"));

    harness.drain().await.unwrap();
    let other_skill = harness.store.get_skill(other.skill.id).await.unwrap().unwrap();
    assert_eq!(other_skill.reason(), reasons::USER_BANNED);

    // Finished follow-ups do not re-ban after a moderator lifts the ban
    harness
        .service
        .bans()
        .unban_user(moderator.id, mallory.id)
        .await
        .unwrap();
    engine
        .apply_scan_verdict(infected.version.id, malicious())
        .await
        .unwrap();
    let user = harness.store.get_user(mallory.id).await.unwrap().unwrap();
    assert!(!user.is_banned());
}

#[tokio::test]
async fn test_auto_ban_of_banned_owner_reruns_cascade() {
    let harness = TestHarness::new();
    let mallory = harness.user("mallory").await;
    let moderator = harness.moderator("mod").await;
    let outcome = harness.publish(&mallory, "leftover", "1.0.0").await.unwrap();
    harness.drain().await.unwrap();

    // Ban committed without its cascade
    let mut user = harness.store.get_user(mallory.id).await.unwrap().unwrap();
    user.banned_at = Some(harness.service.context().now());
    harness.store.update_user(user).await.unwrap();

    let newly_banned = harness
        .service
        .bans()
        .auto_ban(mallory.id, "infected")
        .await
        .unwrap();
    assert!(!newly_banned);
    assert_eq!(harness.drain().await.unwrap(), 1);

    let skill = harness.store.get_skill(outcome.skill.id).await.unwrap().unwrap();
    assert_eq!(skill.reason(), reasons::USER_BANNED);
    assert!(skill.soft_deleted_at.is_some());
    let restored = harness
        .service
        .bans()
        .unban_user(moderator.id, mallory.id)
        .await
        .unwrap();
    assert_eq!(restored, 1);
}
