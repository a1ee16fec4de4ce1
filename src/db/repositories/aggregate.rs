use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::aggregate::UserPointsAggregate;
use crate::db::models::member::{Member, MemberRow, UserId};
use crate::db::repositories::Tx;

#[derive(Debug)]
pub struct AggregateRepository {
    pool: &'static Pool<Postgres>,
}

impl AggregateRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, user_id: UserId) -> SqlxResult<Option<UserPointsAggregate>> {
        sqlx::query_as::<_, UserPointsAggregate>(&format!(
            "SELECT {} FROM user_points WHERE user_id = $1",
            sql_fragment::AGGREGATE_FIELDS
        ))
        .bind(user_id)
        .fetch_optional(self.pool)
        .await
    }

    #[instrument(skip(self))]
    pub async fn member(&self, user_id: UserId) -> SqlxResult<Option<Member>> {
        let row = sqlx::query_as::<_, MemberRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            sql_fragment::MEMBER_FIELDS
        ))
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Member::from))
    }
}

impl Tx<'_> {
    /// Inserts the default `(points = 0, level = 1)` row if the user has none, then returns the
    /// current row.
    #[instrument(skip(self))]
    pub async fn ensure_aggregate(
        &mut self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> SqlxResult<UserPointsAggregate> {
        let conn = self.inner_mut()?;

        sqlx::query(
            r#"
            INSERT INTO user_points (
                user_id,
                points,
                level,
                last_updated
            )
            VALUES ($1, 0, 1, $2)
            ON CONFLICT (user_id)
            DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&mut **conn)
        .await?;

        sqlx::query_as::<_, UserPointsAggregate>(&format!(
            "SELECT {} FROM user_points WHERE user_id = $1",
            sql_fragment::AGGREGATE_FIELDS
        ))
        .bind(user_id)
        .fetch_one(&mut **conn)
        .await
    }

    /// Reads the user's row under a row lock held until this transaction ends
    #[instrument(skip(self))]
    pub async fn lock_aggregate(
        &mut self,
        user_id: UserId,
    ) -> SqlxResult<Option<UserPointsAggregate>> {
        sqlx::query_as::<_, UserPointsAggregate>(&format!(
            "SELECT {} FROM user_points WHERE user_id = $1 FOR UPDATE",
            sql_fragment::AGGREGATE_FIELDS
        ))
        .bind(user_id)
        .fetch_optional(&mut **self.inner_mut()?)
        .await
    }

    #[instrument(skip(self, aggregate), fields(user_id = %aggregate.user_id, points = aggregate.points))]
    pub async fn write_aggregate(
        &mut self,
        aggregate: &UserPointsAggregate,
    ) -> SqlxResult<UserPointsAggregate> {
        sqlx::query_as::<_, UserPointsAggregate>(&format!(
            r#"
            UPDATE user_points
            SET points = $2,
                level = $3,
                last_updated = $4
            WHERE user_id = $1
            RETURNING {}
            "#,
            sql_fragment::AGGREGATE_FIELDS
        ))
        .bind(aggregate.user_id)
        .bind(aggregate.points)
        .bind(aggregate.level)
        .bind(aggregate.last_updated)
        .fetch_one(&mut **self.inner_mut()?)
        .await
    }
}
