use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::member::UserId;
use crate::constants::MIN_LEVEL;

/// Running total and derived level for one user (`user_points` table)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserPointsAggregate {
    pub user_id: UserId,
    pub points: i64,
    pub level: i32,
    pub last_updated: DateTime<Utc>,
}

impl UserPointsAggregate {
    /// The row a user gets before their first award
    pub fn empty(user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            points: 0,
            level: MIN_LEVEL,
            last_updated: at,
        }
    }
}
