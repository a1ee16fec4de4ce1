use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::instrument;

use crate::db::models::aggregate::UserPointsAggregate;
use crate::db::models::leaderboard::{Standing, StandingsQuery, Window};
use crate::db::models::member::{Member, UserId};
use crate::db::models::points::{EventId, NewPointEvent, PointEvent};
use crate::db::repositories::aggregate::AggregateRepository;
use crate::db::repositories::leaderboard::LeaderboardRepository;
use crate::db::repositories::ledger::LedgerRepository;
use crate::db::repositories::{PointStore, PointTx, Tx};
use crate::db::{StorageError, StoreResult};
use crate::engine::level::level_of;

/// Postgres-backed store over the `point_events` / `user_points` tables
#[derive(Debug)]
pub struct PgPointStore {
    pool: &'static Pool<Postgres>,
    ledger: LedgerRepository,
    aggregates: AggregateRepository,
    leaderboard: LeaderboardRepository,
}

pub struct PgTx {
    tx: Tx<'static>,
}

impl PgPointStore {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self {
            pool,
            ledger: LedgerRepository::new(pool),
            aggregates: AggregateRepository::new(pool),
            leaderboard: LeaderboardRepository::new(pool),
        }
    }
}

#[async_trait]
impl PointStore for PgPointStore {
    #[instrument(skip(self))]
    async fn begin(&self) -> StoreResult<Box<dyn PointTx>> {
        let tx = Tx::begin(self.pool).await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn member(&self, user_id: UserId) -> StoreResult<Option<Member>> {
        Ok(self.aggregates.member(user_id).await?)
    }

    async fn aggregate(&self, user_id: UserId) -> StoreResult<Option<UserPointsAggregate>> {
        Ok(self.aggregates.get(user_id).await?)
    }

    #[instrument(skip(self))]
    async fn get_or_create(&self, user_id: UserId) -> StoreResult<UserPointsAggregate> {
        let aggregate = Tx::with_tx(self.pool, |mut tx| async move {
            let result = tx.ensure_aggregate(user_id, Utc::now()).await;
            (tx, result)
        })
        .await?;

        Ok(aggregate)
    }

    async fn ledger_sum(&self, user_id: UserId, window: Option<Window>) -> StoreResult<i64> {
        Ok(self.ledger.sum_for_user(user_id, window).await?)
    }

    async fn ledger_sums(&self, window: Window) -> StoreResult<Vec<(UserId, i64)>> {
        Ok(self.ledger.sums_by_user(window).await?)
    }

    async fn recent_events(&self, user_id: UserId, limit: i64) -> StoreResult<Vec<PointEvent>> {
        Ok(self.ledger.recent_for_user(user_id, limit).await?)
    }

    async fn standings(&self, query: &StandingsQuery) -> StoreResult<Vec<Standing>> {
        Ok(self.leaderboard.standings(query).await?)
    }
}

#[async_trait]
impl PointTx for PgTx {
    async fn get_or_create(
        &mut self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<UserPointsAggregate> {
        Ok(self.tx.ensure_aggregate(user_id, at).await?)
    }

    async fn append(&mut self, event: NewPointEvent) -> StoreResult<EventId> {
        Ok(self.tx.insert_event(&event).await?)
    }

    #[instrument(skip(self))]
    async fn apply_delta(
        &mut self,
        user_id: UserId,
        delta: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<UserPointsAggregate> {
        // the row lock serializes concurrent awards for this user until commit
        let current = self
            .tx
            .lock_aggregate(user_id)
            .await?
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

        Ok(self.tx.write_aggregate(&updated).await?)
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        Ok(self.tx.commit().await?)
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        Ok(self.tx.rollback().await?)
    }
}
