use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use crate::constants::{RESOURCE_APPROVED, ROLE_STUDENT};
use crate::db::models::leaderboard::{Standing, StandingsQuery};

/// Builds the per-scope population the ranking service orders. One statement serves every
/// scope; the scope only decides which of the window and group parameters are bound.
#[derive(Debug)]
pub struct LeaderboardRepository {
    pool: &'static Pool<Postgres>,
}

impl LeaderboardRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn standings(&self, query: &StandingsQuery) -> SqlxResult<Vec<Standing>> {
        let (start, end) = query.window.map(|w| (w.start, w.end)).unzip();

        sqlx::query_as::<_, Standing>(
            r#"
            WITH windowed AS (
                SELECT
                    user_id,
                    SUM(points)::BIGINT AS points
                FROM point_events
                WHERE $1::timestamptz IS NOT NULL
                  AND created_at >= $1
                  AND created_at < $2
                GROUP BY user_id
            )
            SELECT
                u.id AS user_id,
                TRIM(u.first_name || ' ' || u.last_name) AS display_name,
                u.department AS "group",
                up.level AS level,
                CASE
                    WHEN $1::timestamptz IS NULL THEN up.points
                    ELSE COALESCE(w.points, 0)
                END AS points,
                (
                    SELECT COUNT(*)
                    FROM resources r
                    WHERE r.user_id = u.id
                      AND r.status = $4
                      AND ($1::timestamptz IS NULL OR (r.created_at >= $1 AND r.created_at < $2))
                ) AS uploads
            FROM users u
            JOIN user_points up ON up.user_id = u.id
            LEFT JOIN windowed w ON w.user_id = u.id
            WHERE u.role = $5
              AND ($3::text IS NULL OR u.department = $3)
              AND ($1::timestamptz IS NULL OR w.user_id IS NOT NULL)
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(query.group.as_deref())
        .bind(RESOURCE_APPROVED)
        .bind(ROLE_STUDENT)
        .fetch_all(self.pool)
        .await
    }
}
