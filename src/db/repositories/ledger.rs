use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::leaderboard::Window;
use crate::db::models::member::UserId;
use crate::db::models::points::{EventId, NewPointEvent, PointEvent, PointEventRow};
use crate::db::repositories::Tx;

/// Read side of the `point_events` ledger. Inserts only happen inside a [`Tx`].
#[derive(Debug)]
pub struct LedgerRepository {
    pool: &'static Pool<Postgres>,
}

impl LedgerRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn sum_for_user(&self, user_id: UserId, window: Option<Window>) -> SqlxResult<i64> {
        let (start, end) = window.map(|w| (w.start, w.end)).unzip();

        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(points), 0)::BIGINT
            FROM point_events
            WHERE user_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_one(self.pool)
        .await
    }

    #[instrument(skip(self))]
    pub async fn sums_by_user(&self, window: Window) -> SqlxResult<Vec<(UserId, i64)>> {
        sqlx::query_as::<_, (UserId, i64)>(
            r#"
            SELECT user_id, SUM(points)::BIGINT AS points
            FROM point_events
            WHERE created_at >= $1
              AND created_at < $2
            GROUP BY user_id
            ORDER BY points DESC, user_id ASC
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(self.pool)
        .await
    }

    #[instrument(skip(self))]
    pub async fn recent_for_user(&self, user_id: UserId, limit: i64) -> SqlxResult<Vec<PointEvent>> {
        let rows = sqlx::query_as::<_, PointEventRow>(&format!(
            "SELECT {} FROM point_events WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
            sql_fragment::EVENT_FIELDS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(PointEvent::from).collect())
    }
}

impl Tx<'_> {
    #[instrument(skip(self, event), fields(user_id = %event.user_id, points = event.points))]
    pub async fn insert_event(&mut self, event: &NewPointEvent) -> SqlxResult<EventId> {
        sqlx::query_scalar::<_, EventId>(
            r#"
            INSERT INTO point_events (
                user_id,
                points,
                action_kind,
                description,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(event.user_id)
        .bind(event.points)
        .bind(event.action_kind.as_str())
        .bind(event.description.as_deref())
        .bind(event.created_at)
        .fetch_one(&mut **self.inner_mut()?)
        .await
    }
}
