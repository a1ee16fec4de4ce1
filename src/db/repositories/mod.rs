use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Result as SqlxResult, Transaction};
use tracing::instrument;

use crate::db::StoreResult;
use crate::db::models::aggregate::UserPointsAggregate;
use crate::db::models::leaderboard::{Standing, StandingsQuery, Window};
use crate::db::models::member::{Member, UserId};
use crate::db::models::points::{EventId, NewPointEvent, PointEvent};

pub mod aggregate;
pub mod leaderboard;
pub mod ledger;

/// Storage seam for the points engine.
///
/// Reads go straight to the store and may observe a slightly stale snapshot; every write goes
/// through a [`PointTx`] so that a ledger entry and its aggregate update land together or not
/// at all.
#[async_trait]
pub trait PointStore: Send + Sync {
    /// Opens a unit of work. Dropping the returned transaction without calling
    /// [`PointTx::commit`] discards everything staged in it.
    async fn begin(&self) -> StoreResult<Box<dyn PointTx>>;

    async fn member(&self, user_id: UserId) -> StoreResult<Option<Member>>;

    async fn aggregate(&self, user_id: UserId) -> StoreResult<Option<UserPointsAggregate>>;

    /// Returns the user's aggregate row, creating the default one (0 points, level 1) first if it
    /// doesn't exist yet.
    async fn get_or_create(&self, user_id: UserId) -> StoreResult<UserPointsAggregate> {
        let mut tx = self.begin().await?;
        let aggregate = tx.get_or_create(user_id, Utc::now()).await?;
        tx.commit().await?;

        Ok(aggregate)
    }

    /// Sum of a user's ledger entries, optionally restricted to `window`
    async fn ledger_sum(&self, user_id: UserId, window: Option<Window>) -> StoreResult<i64>;

    /// Per-user ledger sums inside `window`, highest first (ties by user id)
    async fn ledger_sums(&self, window: Window) -> StoreResult<Vec<(UserId, i64)>>;

    /// Most recent ledger entries for a user, newest first
    async fn recent_events(&self, user_id: UserId, limit: i64) -> StoreResult<Vec<PointEvent>>;

    /// Unranked standings for every user matching `query` (students with an aggregate row,
    /// restricted by group and, when windowed, to users with activity inside the window).
    async fn standings(&self, query: &StandingsQuery) -> StoreResult<Vec<Standing>>;
}

/// One atomic award: everything staged here becomes visible on `commit` or not at all.
#[async_trait]
pub trait PointTx: Send {
    async fn get_or_create(
        &mut self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<UserPointsAggregate>;

    async fn append(&mut self, event: NewPointEvent) -> StoreResult<EventId>;

    /// Adds `delta` to the user's total, recomputes the level and stamps `last_updated`. The
    /// aggregate row must already exist; concurrent calls for one user serialize.
    async fn apply_delta(
        &mut self,
        user_id: UserId,
        delta: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<UserPointsAggregate>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

pub struct Tx<'a> {
    inner: Option<Transaction<'a, Postgres>>,
}

impl<'a> Tx<'a> {
    /// "Automatic" transaction handler: commits when `f` hands back `Ok`, rolls back (by drop)
    /// otherwise.
    #[instrument(skip(pool, f))]
    pub async fn with_tx<F, Fut, T>(pool: &Pool<Postgres>, f: F) -> SqlxResult<T>
    where
        F: FnOnce(Tx<'static>) -> Fut,
        Fut: Future<Output = (Tx<'static>, SqlxResult<T>)>,
    {
        let tx = Tx::begin(pool).await?;
        let (mut tx, result) = f(tx).await;

        match result {
            Ok(val) => {
                tx.commit().await?;
                Ok(val)
            }
            Err(e) => {
                tracing::trace!(error = ?e, "transacted query failure");
                Err(e)
            }
        }
    }

    #[instrument(skip(pool))]
    pub async fn begin(pool: &Pool<Postgres>) -> SqlxResult<Tx<'static>> {
        let inner = pool.begin().await?;
        Ok(Tx { inner: Some(inner) })
    }

    #[instrument(skip(self))]
    pub async fn commit(&mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.commit().await
        } else {
            Err(sqlx::Error::Protocol("Transaction already completed".into()))
        }
    }

    #[instrument(skip(self))]
    pub async fn rollback(&mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.rollback().await
        } else {
            Err(sqlx::Error::Protocol("Transaction already completed".into()))
        }
    }

    pub(crate) fn inner_mut(&mut self) -> SqlxResult<&mut Transaction<'a, Postgres>> {
        self.inner
            .as_mut()
            .ok_or_else(|| sqlx::Error::Protocol("Transaction already completed".into()))
    }
}

pub mod sql_fragment {
    pub const AGGREGATE_FIELDS: &str = r#"
        user_id,
        points,
        level,
        last_updated
    "#;

    pub const EVENT_FIELDS: &str = r#"
        id,
        user_id,
        points,
        action_kind,
        description,
        created_at
    "#;

    pub const MEMBER_FIELDS: &str = r#"
        id,
        TRIM(first_name || ' ' || last_name) AS display_name,
        role,
        department
    "#;
}
