//! Process-local [`PointStore`] used for development (`STORAGE_BACKEND=memory`) and the test
//! suite. Writers hold the store's write lock for the whole lifetime of their transaction, so
//! awards are serialized exactly like the row lock serializes them in Postgres.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::instrument;

use crate::db::models::aggregate::UserPointsAggregate;
use crate::db::models::leaderboard::{Standing, StandingsQuery, Window};
use crate::db::models::member::{Member, UserId};
use crate::db::models::points::{EventId, NewPointEvent, PointEvent};
use crate::db::repositories::{PointStore, PointTx};
use crate::db::{StorageError, StoreResult};
use crate::engine::level::level_of;

#[derive(Debug, Clone, Default)]
pub struct MemoryPointStore {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    members: HashMap<UserId, Member>,
    aggregates: HashMap<UserId, UserPointsAggregate>,
    events: Vec<PointEvent>,
    uploads: Vec<Upload>,
    last_event_id: i64,
}

#[derive(Debug, Clone)]
struct Upload {
    user_id: UserId,
    approved: bool,
    created_at: DateTime<Utc>,
}

pub struct MemoryTx {
    state: OwnedRwLockWriteGuard<MemoryState>,
    events: Vec<PointEvent>,
    aggregates: HashMap<UserId, UserPointsAggregate>,
}

impl MemoryPointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a user the way the account features would
    pub async fn add_member(&self, member: Member) {
        let mut state = self.state.write().await;
        state.members.insert(member.id, member);
    }

    /// Records a resource upload the way the upload feature would; only approved uploads count
    /// towards ranking tie-breaks.
    pub async fn add_upload(&self, user_id: UserId, approved: bool, created_at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        state.uploads.push(Upload {
            user_id,
            approved,
            created_at,
        });
    }

    /// Registers every member listed in a JSON file (an array of [`Member`]), returning how
    /// many were loaded
    #[instrument(skip(self))]
    pub async fn load_members(&self, path: &str) -> StoreResult<usize> {
        let raw = tokio::fs::read(path).await?;
        let members: Vec<Member> = serde_json::from_slice(&raw)?;

        let mut state = self.state.write().await;
        let count = members.len();
        state
            .members
            .extend(members.into_iter().map(|member| (member.id, member)));

        Ok(count)
    }

    /// Number of ledger rows for a user, committed ones only
    pub async fn event_count(&self, user_id: UserId) -> usize {
        let state = self.state.read().await;
        state.events.iter().filter(|e| e.user_id == user_id).count()
    }
}

impl MemoryState {
    fn uploads_for(&self, user_id: UserId, window: Option<Window>) -> i64 {
        self.uploads
            .iter()
            .filter(|u| u.user_id == user_id && u.approved)
            .filter(|u| window.is_none_or(|w| w.contains(u.created_at)))
            .count() as i64
    }

    fn events_in(&self, window: Option<Window>) -> impl Iterator<Item = &PointEvent> {
        self.events
            .iter()
            .filter(move |e| window.is_none_or(|w| w.contains(e.created_at)))
    }
}

#[async_trait]
impl PointStore for MemoryPointStore {
    async fn begin(&self) -> StoreResult<Box<dyn PointTx>> {
        let state = Arc::clone(&self.state).write_owned().await;

        Ok(Box::new(MemoryTx {
            state,
            events: Vec::new(),
            aggregates: HashMap::new(),
        }))
    }

    async fn member(&self, user_id: UserId) -> StoreResult<Option<Member>> {
        Ok(self.state.read().await.members.get(&user_id).cloned())
    }

    async fn aggregate(&self, user_id: UserId) -> StoreResult<Option<UserPointsAggregate>> {
        Ok(self.state.read().await.aggregates.get(&user_id).cloned())
    }

    async fn ledger_sum(&self, user_id: UserId, window: Option<Window>) -> StoreResult<i64> {
        let state = self.state.read().await;
        Ok(state
            .events_in(window)
            .filter(|e| e.user_id == user_id)
            .map(|e| e.points)
            .sum())
    }

    async fn ledger_sums(&self, window: Window) -> StoreResult<Vec<(UserId, i64)>> {
        let state = self.state.read().await;

        let mut sums: HashMap<UserId, i64> = HashMap::new();
        for event in state.events_in(Some(window)) {
            *sums.entry(event.user_id).or_default() += event.points;
        }

        let mut sums: Vec<(UserId, i64)> = sums.into_iter().collect();
        sums.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(sums)
    }

    async fn recent_events(&self, user_id: UserId, limit: i64) -> StoreResult<Vec<PointEvent>> {
        let state = self.state.read().await;

        let mut events: Vec<PointEvent> = state
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        events.truncate(limit.max(0) as usize);

        Ok(events)
    }

    #[instrument(skip(self))]
    async fn standings(&self, query: &StandingsQuery) -> StoreResult<Vec<Standing>> {
        let state = self.state.read().await;

        let mut windowed: HashMap<UserId, i64> = HashMap::new();
        if query.window.is_some() {
            for event in state.events_in(query.window) {
                *windowed.entry(event.user_id).or_default() += event.points;
            }
        }

        let standings = state
            .aggregates
            .values()
            .filter_map(|aggregate| {
                let member = state.members.get(&aggregate.user_id)?;
                if !member.is_student() {
                    return None;
                }
                if let Some(group) = &query.group {
                    if member.group.as_ref() != Some(group) {
                        return None;
                    }
                }

                let points = match query.window {
                    Some(_) => *windowed.get(&aggregate.user_id)?,
                    None => aggregate.points,
                };

                Some(Standing {
                    user_id: aggregate.user_id,
                    display_name: member.display_name.clone(),
                    group: member.group.clone(),
                    level: aggregate.level,
                    points,
                    uploads: state.uploads_for(aggregate.user_id, query.window),
                })
            })
            .collect();

        Ok(standings)
    }
}

impl MemoryTx {
    fn current(&self, user_id: UserId) -> Option<&UserPointsAggregate> {
        self.aggregates
            .get(&user_id)
            .or_else(|| self.state.aggregates.get(&user_id))
    }
}

#[async_trait]
impl PointTx for MemoryTx {
    async fn get_or_create(
        &mut self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<UserPointsAggregate> {
        if let Some(existing) = self.current(user_id) {
            return Ok(existing.clone());
        }

        let created = UserPointsAggregate::empty(user_id, at);
        self.aggregates.insert(user_id, created.clone());
        Ok(created)
    }

    async fn append(&mut self, event: NewPointEvent) -> StoreResult<EventId> {
        let id = EventId(self.state.last_event_id + self.events.len() as i64 + 1);
        self.events.push(event.into_event(id));
        Ok(id)
    }

    async fn apply_delta(
        &mut self,
        user_id: UserId,
        delta: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<UserPointsAggregate> {
        let current = self
            .current(user_id)
            .ok_or(StorageError::MissingAggregate(user_id))?;

        let points = current
            .points
            .checked_add(delta)
            .ok_or(StorageError::TotalOverflow(user_id))?;
        let updated = UserPointsAggregate {
            user_id,
            points,
            level: level_of(points),
            last_updated: at,
        };

        self.aggregates.insert(user_id, updated.clone());
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            mut state,
            events,
            aggregates,
        } = *self;

        state.last_event_id += events.len() as i64;
        state.events.extend(events);
        state.aggregates.extend(aggregates);

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        // staged writes are dropped together with the guard
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::db::models::member::Role;
    use crate::db::models::points::ActionKind;

    fn event(user: i64, points: i64, at: DateTime<Utc>) -> NewPointEvent {
        NewPointEvent {
            user_id: UserId(user),
            points,
            action_kind: ActionKind::Comment,
            description: None,
            created_at: at,
        }
    }

    async fn award(store: &MemoryPointStore, user: i64, points: i64, at: DateTime<Utc>) {
        let mut tx = store.begin().await.unwrap();
        tx.get_or_create(UserId(user), at).await.unwrap();
        tx.append(event(user, points, at)).await.unwrap();
        tx.apply_delta(UserId(user), points, at).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = MemoryPointStore::new();

        let first = store.get_or_create(UserId(1)).await.unwrap();
        let second = store.get_or_create(UserId(1)).await.unwrap();

        assert_eq!(first.points, 0);
        assert_eq!(first.level, 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryPointStore::new();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        tx.get_or_create(UserId(1), now).await.unwrap();
        tx.append(event(1, 10, now)).await.unwrap();
        tx.apply_delta(UserId(1), 10, now).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.event_count(UserId(1)).await, 0);
        assert_eq!(store.aggregate(UserId(1)).await.unwrap(), None);

        // dropping without commit behaves the same
        let mut tx = store.begin().await.unwrap();
        tx.get_or_create(UserId(1), now).await.unwrap();
        drop(tx);

        assert_eq!(store.aggregate(UserId(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_apply_delta_needs_aggregate() {
        let store = MemoryPointStore::new();

        let mut tx = store.begin().await.unwrap();
        let err = tx.apply_delta(UserId(3), 5, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingAggregate(UserId(3))));
    }

    #[tokio::test]
    async fn test_event_ids_increase_across_transactions() {
        let store = MemoryPointStore::new();
        let now = Utc::now();
        award(&store, 1, 5, now).await;
        award(&store, 1, 5, now + Duration::seconds(1)).await;

        let events = store.recent_events(UserId(1), 10).await.unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_window_sums() {
        let store = MemoryPointStore::new();
        let october = Utc.with_ymd_and_hms(2026, 10, 10, 9, 0, 0).unwrap();
        let september = Utc.with_ymd_and_hms(2026, 9, 28, 9, 0, 0).unwrap();

        award(&store, 1, 40, september).await;
        award(&store, 1, 15, october).await;
        award(&store, 2, 30, october).await;

        let window = Window::month_of(october);
        assert_eq!(store.ledger_sum(UserId(1), None).await.unwrap(), 55);
        assert_eq!(store.ledger_sum(UserId(1), Some(window)).await.unwrap(), 15);
        assert_eq!(
            store.ledger_sums(window).await.unwrap(),
            vec![(UserId(2), 30), (UserId(1), 15)]
        );
    }

    #[tokio::test]
    async fn test_standings_filters() {
        let store = MemoryPointStore::new();
        let now = Utc.with_ymd_and_hms(2026, 10, 10, 9, 0, 0).unwrap();

        store
            .add_member(Member::student(1, "Ana", Some("Physics")))
            .await;
        store
            .add_member(Member::student(2, "Ben", Some("Chemistry")))
            .await;
        award(&store, 1, 20, now).await;
        award(&store, 2, 30, now - Duration::days(40)).await;
        store.add_upload(UserId(1), true, now).await;
        store.add_upload(UserId(1), false, now).await;

        let overall = store.standings(&StandingsQuery::default()).await.unwrap();
        assert_eq!(overall.len(), 2);

        let physics = store
            .standings(&StandingsQuery::grouped("Physics"))
            .await
            .unwrap();
        assert_eq!(physics.len(), 1);
        assert_eq!(physics[0].uploads, 1);

        let monthly = store
            .standings(&StandingsQuery::windowed(Window::month_of(now)))
            .await
            .unwrap();
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].user_id, UserId(1));
        assert_eq!(monthly[0].points, 20);
    }

    #[tokio::test]
    async fn test_apply_delta_refuses_overflow() {
        let store = MemoryPointStore::new();
        let now = Utc::now();
        award(&store, 1, i64::MAX, now).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.apply_delta(UserId(1), 1, now).await.unwrap_err();
        assert!(matches!(err, StorageError::TotalOverflow(UserId(1))));
        drop(tx);

        let aggregate = store.aggregate(UserId(1)).await.unwrap().unwrap();
        assert_eq!(aggregate.points, i64::MAX);
    }

    #[tokio::test]
    async fn test_load_members_from_json() {
        let path = std::env::temp_dir().join(format!(
            "eduhub-points-members-{}.json",
            std::process::id()
        ));
        let raw = r#"[
            { "id": 4, "display_name": "Dana", "role": "student", "group": "Chemistry" },
            { "id": 5, "display_name": "Eli", "role": "admin", "group": null }
        ]"#;
        tokio::fs::write(&path, raw).await.unwrap();

        let store = MemoryPointStore::new();
        let loaded = store.load_members(path.to_str().unwrap()).await;
        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(loaded.unwrap(), 2);

        let dana = store.member(UserId(4)).await.unwrap().unwrap();
        assert_eq!(dana.role, Role::Student);
        assert_eq!(dana.group.as_deref(), Some("Chemistry"));

        let missing = store.load_members("/nonexistent/members.json").await;
        assert!(matches!(missing, Err(StorageError::SeedRead(_))));
    }
}
