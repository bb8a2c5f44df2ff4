//! In-memory registry store
//!
//! Reference backend used by the server binary and tests. All tables sit
//! behind one `RwLock`, so every write is a serializable transaction.

use crate::core::model::{
    ApiToken, AuditLog, DependentKind, DependentRow, GlobalStats, Leaderboard, RateWindow, Skill,
    SkillId, SkillVersion, SlugReservation, User, UserId, VersionId,
};
use crate::storage::{
    BatchResult, CounterStore, Page, RateLimitStore, RegistryStore, SkillReference, StoreError,
    StoreResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    tokens: Vec<ApiToken>,
    skills: BTreeMap<SkillId, Skill>,
    slugs: HashMap<String, SkillId>,
    versions: BTreeMap<VersionId, SkillVersion>,
    dependents: BTreeMap<Uuid, DependentRow>,
    leaderboards: BTreeMap<Uuid, Leaderboard>,
    reservations: HashMap<String, SlugReservation>,
    audit_logs: Vec<AuditLog>,
    global_stats: Option<GlobalStats>,
    rate_windows: HashMap<String, RateWindow>,
}

pub struct MemoryRegistryStore {
    tables: RwLock<Tables>,
    counter_ready: AtomicBool,
    fail_next_rate_write: AtomicBool,
}

impl Default for MemoryRegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            counter_ready: AtomicBool::new(true),
            fail_next_rate_write: AtomicBool::new(false),
        }
    }

    /// Simulate a counter table that has not been provisioned yet
    pub fn set_counter_ready(&self, ready: bool) {
        self.counter_ready.store(ready, Ordering::SeqCst);
    }

    /// Make the next rate-window write lose a concurrent race
    pub fn fail_next_rate_write(&self) {
        self.fail_next_rate_write.store(true, Ordering::SeqCst);
    }

    fn check_counter_ready(&self) -> StoreResult<()> {
        if self.counter_ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotReady("globalStats".to_string()))
        }
    }
}

fn paginate<T: Clone>(
    map: &BTreeMap<Uuid, T>,
    cursor: Option<Uuid>,
    limit: usize,
    filter: impl Fn(&T) -> bool,
) -> Page<T> {
    let lower = match cursor {
        Some(c) => Bound::Excluded(c),
        None => Bound::Unbounded,
    };
    let mut items = Vec::new();
    let mut last = None;
    let mut has_more = false;
    for (id, value) in map.range((lower, Bound::Unbounded)) {
        if !filter(value) {
            continue;
        }
        if items.len() == limit {
            has_more = true;
            break;
        }
        items.push(value.clone());
        last = Some(*id);
    }
    Page {
        items,
        next_cursor: if has_more { last } else { None },
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user {}", user.id)));
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, mut user: User) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        let current = tables
            .users
            .get(&user.id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user.id)))?;
        if current.revision != user.revision {
            return Err(StoreError::Conflict(format!("user {}", user.id)));
        }
        user.revision += 1;
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn insert_token(&self, token: ApiToken) -> StoreResult<()> {
        self.tables.write().await.tokens.push(token);
        Ok(())
    }

    async fn list_tokens(&self, user_id: UserId) -> StoreResult<Vec<ApiToken>> {
        Ok(self
            .tables
            .read()
            .await
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn revoke_tokens(&self, user_id: UserId, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut tables = self.tables.write().await;
        let mut revoked = 0;
        for token in tables
            .tokens
            .iter_mut()
            .filter(|t| t.user_id == user_id && t.revoked_at.is_none())
        {
            token.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn get_skill(&self, id: SkillId) -> StoreResult<Option<Skill>> {
        Ok(self.tables.read().await.skills.get(&id).cloned())
    }

    async fn get_skill_by_slug(&self, slug: &str) -> StoreResult<Option<Skill>> {
        let tables = self.tables.read().await;
        Ok(tables
            .slugs
            .get(slug)
            .and_then(|id| tables.skills.get(id))
            .cloned())
    }

    async fn insert_skill(&self, skill: Skill) -> StoreResult<Skill> {
        let mut tables = self.tables.write().await;
        if tables.slugs.contains_key(skill.slug.as_str()) {
            return Err(StoreError::Conflict(format!("slug {}", skill.slug)));
        }
        tables.slugs.insert(skill.slug.to_string(), skill.id);
        tables.skills.insert(skill.id, skill.clone());
        Ok(skill)
    }

    async fn update_skill(&self, mut skill: Skill) -> StoreResult<Skill> {
        let mut tables = self.tables.write().await;
        let current = tables
            .skills
            .get(&skill.id)
            .ok_or_else(|| StoreError::NotFound(format!("skill {}", skill.id)))?;
        if current.revision != skill.revision {
            return Err(StoreError::Conflict(format!("skill {}", skill.id)));
        }
        if current.slug != skill.slug {
            return Err(StoreError::Backend("slug is immutable".to_string()));
        }
        skill.revision += 1;
        tables.skills.insert(skill.id, skill.clone());
        Ok(skill)
    }

    async fn delete_skill(&self, id: SkillId) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.skills.remove(&id) {
            Some(skill) => {
                tables.slugs.remove(skill.slug.as_str());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_skills(&self, cursor: Option<Uuid>, limit: usize) -> StoreResult<Page<Skill>> {
        let tables = self.tables.read().await;
        Ok(paginate(&tables.skills, cursor, limit, |_| true))
    }

    async fn list_skills_by_owner(
        &self,
        owner: UserId,
        cursor: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Page<Skill>> {
        let tables = self.tables.read().await;
        Ok(paginate(&tables.skills, cursor, limit, |s| {
            s.owner_user_id == owner
        }))
    }

    async fn list_skills_by_owner_since(
        &self,
        owner: UserId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Skill>> {
        let tables = self.tables.read().await;
        Ok(tables
            .skills
            .values()
            .filter(|s| s.owner_user_id == owner && s.created_at >= since)
            .cloned()
            .collect())
    }

    async fn count_skills_by_owner(&self, owner: UserId) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .skills
            .values()
            .filter(|s| s.owner_user_id == owner && s.soft_deleted_at.is_none())
            .count() as u64)
    }

    async fn list_skills_by_reason(
        &self,
        reason: &str,
        cursor: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Page<Skill>> {
        let tables = self.tables.read().await;
        Ok(paginate(&tables.skills, cursor, limit, |s| {
            s.moderation_reason.as_deref() == Some(reason)
        }))
    }

    async fn list_skills_referencing(
        &self,
        target: SkillId,
        reference: SkillReference,
        limit: usize,
    ) -> StoreResult<Vec<Skill>> {
        let tables = self.tables.read().await;
        Ok(tables
            .skills
            .values()
            .filter(|s| match reference {
                SkillReference::Canonical => s.canonical_skill_id == Some(target),
                SkillReference::Fork => {
                    s.fork_of.as_ref().map(|f| f.skill_id) == Some(target)
                }
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_version(&self, id: VersionId) -> StoreResult<Option<SkillVersion>> {
        Ok(self.tables.read().await.versions.get(&id).cloned())
    }

    async fn insert_version(&self, version: SkillVersion) -> StoreResult<SkillVersion> {
        let mut tables = self.tables.write().await;
        let duplicate = tables
            .versions
            .values()
            .any(|v| v.skill_id == version.skill_id && v.version == version.version);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "version {} of skill {}",
                version.version, version.skill_id
            )));
        }
        tables.versions.insert(version.id, version.clone());
        Ok(version)
    }

    async fn update_version(&self, mut version: SkillVersion) -> StoreResult<SkillVersion> {
        let mut tables = self.tables.write().await;
        let current = tables
            .versions
            .get(&version.id)
            .ok_or_else(|| StoreError::NotFound(format!("version {}", version.id)))?;
        if current.revision != version.revision {
            return Err(StoreError::Conflict(format!("version {}", version.id)));
        }
        version.revision += 1;
        tables.versions.insert(version.id, version.clone());
        Ok(version)
    }

    async fn list_versions(&self, skill_id: SkillId) -> StoreResult<Vec<SkillVersion>> {
        let tables = self.tables.read().await;
        let mut versions: Vec<SkillVersion> = tables
            .versions
            .values()
            .filter(|v| v.skill_id == skill_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.created_at);
        Ok(versions)
    }

    async fn list_versions_by_bundle_hash(&self, hash: &str) -> StoreResult<Vec<SkillVersion>> {
        let tables = self.tables.read().await;
        Ok(tables
            .versions
            .values()
            .filter(|v| v.bundle_hash.as_deref() == Some(hash))
            .cloned()
            .collect())
    }

    async fn delete_versions_batch(
        &self,
        skill_id: SkillId,
        limit: usize,
    ) -> StoreResult<BatchResult> {
        let mut tables = self.tables.write().await;
        let matching: Vec<VersionId> = tables
            .versions
            .values()
            .filter(|v| v.skill_id == skill_id)
            .map(|v| v.id)
            .collect();
        let deleted = matching.len().min(limit);
        for id in matching.iter().take(limit) {
            tables.versions.remove(id);
        }
        Ok(BatchResult {
            deleted,
            has_more: matching.len() > limit,
        })
    }

    async fn insert_dependent(&self, row: DependentRow) -> StoreResult<()> {
        self.tables.write().await.dependents.insert(row.id, row);
        Ok(())
    }

    async fn list_dependents(
        &self,
        kind: DependentKind,
        skill_id: SkillId,
    ) -> StoreResult<Vec<DependentRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .dependents
            .values()
            .filter(|r| r.kind == kind && r.skill_id == skill_id)
            .cloned()
            .collect())
    }

    async fn delete_dependents_batch(
        &self,
        kind: DependentKind,
        skill_id: SkillId,
        limit: usize,
    ) -> StoreResult<BatchResult> {
        let mut tables = self.tables.write().await;
        let matching: Vec<Uuid> = tables
            .dependents
            .values()
            .filter(|r| r.kind == kind && r.skill_id == skill_id)
            .map(|r| r.id)
            .collect();
        let deleted = matching.len().min(limit);
        for id in matching.iter().take(limit) {
            tables.dependents.remove(id);
        }
        Ok(BatchResult {
            deleted,
            has_more: matching.len() > limit,
        })
    }

    async fn insert_leaderboard(&self, leaderboard: Leaderboard) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .leaderboards
            .insert(leaderboard.id, leaderboard);
        Ok(())
    }

    async fn list_leaderboards_containing(
        &self,
        skill_id: SkillId,
        limit: usize,
    ) -> StoreResult<Vec<Leaderboard>> {
        let tables = self.tables.read().await;
        Ok(tables
            .leaderboards
            .values()
            .filter(|l| l.entries.iter().any(|e| e.skill_id == skill_id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_leaderboard(&self, mut leaderboard: Leaderboard) -> StoreResult<Leaderboard> {
        let mut tables = self.tables.write().await;
        let current = tables
            .leaderboards
            .get(&leaderboard.id)
            .ok_or_else(|| StoreError::NotFound(format!("leaderboard {}", leaderboard.id)))?;
        if current.revision != leaderboard.revision {
            return Err(StoreError::Conflict(format!("leaderboard {}", leaderboard.id)));
        }
        leaderboard.revision += 1;
        tables.leaderboards.insert(leaderboard.id, leaderboard.clone());
        Ok(leaderboard)
    }

    async fn get_slug_reservation(&self, slug: &str) -> StoreResult<Option<SlugReservation>> {
        Ok(self.tables.read().await.reservations.get(slug).cloned())
    }

    async fn put_slug_reservation(&self, reservation: SlugReservation) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .reservations
            .insert(reservation.slug.clone(), reservation);
        Ok(())
    }

    async fn insert_audit_log(&self, entry: AuditLog) -> StoreResult<()> {
        self.tables.write().await.audit_logs.push(entry);
        Ok(())
    }

    async fn list_audit_logs(&self, target_id: &str) -> StoreResult<Vec<AuditLog>> {
        Ok(self
            .tables
            .read()
            .await
            .audit_logs
            .iter()
            .filter(|a| a.target_id == target_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CounterStore for MemoryRegistryStore {
    async fn get_global_stats(&self) -> StoreResult<Option<GlobalStats>> {
        self.check_counter_ready()?;
        Ok(self.tables.read().await.global_stats.clone())
    }

    async fn put_global_stats(&self, stats: GlobalStats) -> StoreResult<()> {
        self.check_counter_ready()?;
        self.tables.write().await.global_stats = Some(stats);
        Ok(())
    }

    async fn apply_global_stats_delta(
        &self,
        delta: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<u64>> {
        self.check_counter_ready()?;
        let mut tables = self.tables.write().await;
        match tables.global_stats.as_mut() {
            Some(stats) => {
                let next = (stats.active_public_skill_count as i64 + delta).max(0) as u64;
                stats.active_public_skill_count = next;
                stats.updated_at = now;
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RateLimitStore for MemoryRegistryStore {
    async fn get_rate_window(&self, key: &str) -> StoreResult<Option<RateWindow>> {
        Ok(self.tables.read().await.rate_windows.get(key).cloned())
    }

    async fn put_rate_window(&self, mut window: RateWindow) -> StoreResult<RateWindow> {
        if self.fail_next_rate_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict(format!("rate window {}", window.key)));
        }
        let mut tables = self.tables.write().await;
        let current_revision = tables.rate_windows.get(&window.key).map(|w| w.revision);
        let expected = if window.revision == 0 {
            None
        } else {
            Some(window.revision)
        };
        if current_revision != expected {
            return Err(StoreError::Conflict(format!("rate window {}", window.key)));
        }
        window.revision += 1;
        tables.rate_windows.insert(window.key.clone(), window.clone());
        Ok(window)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::model::{Slug, UserRole};

    #[tokio::test]
    async fn test_update_skill_rejects_stale_revision() {
        let store = MemoryRegistryStore::new();
        let owner = store
            .insert_user(User::new("alice", UserRole::User, Utc::now()))
            .await
            .unwrap();
        let skill = store
            .insert_skill(Skill::new(
                Slug::new("demo").unwrap(),
                "Demo",
                owner.id,
                Utc::now(),
            ))
            .await
            .unwrap();

        let first = store.update_skill(skill.clone()).await.unwrap();
        assert_eq!(first.revision, 1);
        let err = store.update_skill(skill).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_insert_skill_enforces_unique_slug() {
        let store = MemoryRegistryStore::new();
        let owner = Uuid::new_v4();
        let slug = Slug::new("taken").unwrap();
        store
            .insert_skill(Skill::new(slug.clone(), "A", owner, Utc::now()))
            .await
            .unwrap();
        let err = store
            .insert_skill(Skill::new(slug, "B", owner, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_pagination_visits_every_skill_once() {
        let store = MemoryRegistryStore::new();
        let owner = Uuid::new_v4();
        for i in 0..7 {
            store
                .insert_skill(Skill::new(
                    Slug::new(format!("skill-{}", i)).unwrap(),
                    "S",
                    owner,
                    Utc::now(),
                ))
                .await
                .unwrap();
        }
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.list_skills(cursor, 3).await.unwrap();
            seen.extend(page.items.into_iter().map(|s| s.id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 7);
    }

    #[tokio::test]
    async fn test_batch_delete_reports_remaining_rows() {
        let store = MemoryRegistryStore::new();
        let skill_id = Uuid::new_v4();
        for _ in 0..5 {
            store
                .insert_dependent(DependentRow::new(DependentKind::Stars, skill_id, Utc::now()))
                .await
                .unwrap();
        }
        let first = store
            .delete_dependents_batch(DependentKind::Stars, skill_id, 3)
            .await
            .unwrap();
        assert_eq!(first, BatchResult { deleted: 3, has_more: true });
        let second = store
            .delete_dependents_batch(DependentKind::Stars, skill_id, 3)
            .await
            .unwrap();
        assert_eq!(second, BatchResult { deleted: 2, has_more: false });
        let third = store
            .delete_dependents_batch(DependentKind::Stars, skill_id, 3)
            .await
            .unwrap();
        assert_eq!(third, BatchResult::default());
    }

    #[tokio::test]
    async fn test_rate_window_compare_and_set() {
        let store = MemoryRegistryStore::new();
        let window = RateWindow {
            key: "k".to_string(),
            hits: vec![Utc::now()],
            revision: 0,
        };
        let saved = store.put_rate_window(window.clone()).await.unwrap();
        assert_eq!(saved.revision, 1);
        assert!(matches!(
            store.put_rate_window(window).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_counter_not_ready() {
        let store = MemoryRegistryStore::new();
        store.set_counter_ready(false);
        assert!(matches!(
            store.get_global_stats().await,
            Err(StoreError::NotReady(_))
        ));
    }
}
