use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::level::level_of;
use super::{EngineError, EngineResult, InvalidInput};
use crate::db::{StorageError, StoreResult};
use crate::db::models::aggregate::UserPointsAggregate;
use crate::db::models::member::UserId;
use crate::db::models::points::{ActionKind, EventId, NewPointEvent, PointEvent};
use crate::db::repositories::{PointStore, PointTx};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardResult {
    pub event_id: EventId,
    pub aggregate: UserPointsAggregate,
    pub previous_level: i32,
    pub leveled_up: bool,
}

/// Ledger/aggregate agreement for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub user_id: UserId,
    pub ledger_total: i64,
    pub aggregate_total: i64,
    pub consistent: bool,
}

/// Turns user actions into ledger entries and keeps each user's aggregate in step with them
#[derive(Clone)]
pub struct AwardService {
    store: Arc<dyn PointStore>,
}

impl AwardService {
    pub fn new(store: Arc<dyn PointStore>) -> Self {
        Self { store }
    }

    /// Appends a ledger entry for `user_id` and applies the same delta to their aggregate, both
    /// inside one transaction.
    pub async fn award(
        &self,
        user_id: UserId,
        points: i64,
        action_kind: ActionKind,
        description: Option<String>,
    ) -> EngineResult<AwardResult> {
        self.award_at(user_id, points, action_kind, description, Utc::now())
            .await
    }

    /// Same as [`AwardService::award`] using the action's default point value
    pub async fn award_action(
        &self,
        user_id: UserId,
        action_kind: ActionKind,
        description: Option<String>,
    ) -> EngineResult<AwardResult> {
        let points = action_kind
            .default_points()
            .ok_or_else(|| InvalidInput::NoDefaultPoints(action_kind.to_string()))?;

        self.award(user_id, points, action_kind, description).await
    }

    /// Awarding is a side effect of the caller's primary action; a failure here is logged and
    /// swallowed so the action itself still succeeds.
    pub async fn award_best_effort(
        &self,
        user_id: UserId,
        points: i64,
        action_kind: ActionKind,
        description: Option<String>,
    ) -> Option<AwardResult> {
        match self.award(user_id, points, action_kind, description).await {
            Ok(result) => Some(result),
            Err(EngineError::InvalidInput(reason)) => {
                tracing::warn!(%user_id, %reason, "point award rejected");
                None
            }
            Err(EngineError::Storage(e)) => {
                tracing::error!(%user_id, error = ?e, "point award failed, nothing was written");
                None
            }
        }
    }

    #[instrument(skip(self, description))]
    pub async fn award_at(
        &self,
        user_id: UserId,
        points: i64,
        action_kind: ActionKind,
        description: Option<String>,
        at: DateTime<Utc>,
    ) -> EngineResult<AwardResult> {
        validate(points, &action_kind)?;

        if self.store.member(user_id).await?.is_none() {
            return Err(InvalidInput::UnknownUser(user_id).into());
        }

        let event = NewPointEvent {
            user_id,
            points,
            action_kind,
            description: description.filter(|d| !d.trim().is_empty()),
            created_at: at,
        };

        let mut tx = self.store.begin().await?;
        match record(tx.as_mut(), event).await {
            Ok((event_id, aggregate)) => {
                tx.commit().await?;

                let previous_level = level_of(aggregate.points - points);
                let leveled_up = aggregate.level > previous_level;
                tracing::info!(
                    event_id = %event_id,
                    points,
                    total = aggregate.points,
                    level = aggregate.level,
                    leveled_up,
                    "points awarded"
                );

                Ok(AwardResult {
                    event_id,
                    previous_level,
                    leveled_up,
                    aggregate,
                })
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = ?rollback_err, "explicit rollback failed, dropping transaction");
                }
                tracing::error!(error = ?e, "award transaction rolled back");
                match e {
                    StorageError::TotalOverflow(user) => {
                        Err(InvalidInput::PointsOverflow(user).into())
                    }
                    other => Err(other.into()),
                }
            }
        }
    }

    /// Compares a user's all-time ledger sum with their aggregate total
    #[instrument(skip(self))]
    pub async fn audit(&self, user_id: UserId) -> EngineResult<LedgerAudit> {
        let ledger_total = self.store.ledger_sum(user_id, None).await?;
        let aggregate_total = self
            .store
            .aggregate(user_id)
            .await?
            .map(|a| a.points)
            .unwrap_or_default();

        let consistent = ledger_total == aggregate_total;
        if !consistent {
            tracing::error!(ledger_total, aggregate_total, "ledger and aggregate disagree");
        }

        Ok(LedgerAudit {
            user_id,
            ledger_total,
            aggregate_total,
            consistent,
        })
    }

    pub async fn points_of(&self, user_id: UserId) -> EngineResult<Option<UserPointsAggregate>> {
        Ok(self.store.aggregate(user_id).await?)
    }

    /// Newest ledger entries first
    pub async fn history(&self, user_id: UserId, limit: i64) -> EngineResult<Vec<PointEvent>> {
        if limit <= 0 {
            return Err(InvalidInput::InvalidLimit(limit).into());
        }
        if self.store.member(user_id).await?.is_none() {
            return Err(InvalidInput::UnknownUser(user_id).into());
        }

        Ok(self.store.recent_events(user_id, limit).await?)
    }
}

fn validate(points: i64, action_kind: &ActionKind) -> Result<(), InvalidInput> {
    if points <= 0 {
        return Err(InvalidInput::NonPositivePoints(points));
    }

    match action_kind {
        ActionKind::Other(kind) if kind.trim().is_empty() => Err(InvalidInput::EmptyAction),
        _ => Ok(()),
    }
}

/// Ledger append plus aggregate update, staged on `tx`
async fn record(
    tx: &mut dyn PointTx,
    event: NewPointEvent,
) -> StoreResult<(EventId, UserPointsAggregate)> {
    let (user_id, points, at) = (event.user_id, event.points, event.created_at);

    tx.get_or_create(user_id, at).await?;
    let event_id = tx.append(event).await?;
    let aggregate = tx.apply_delta(user_id, points, at).await?;

    Ok((event_id, aggregate))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate_rejects_non_positive() {
        assert_eq!(
            validate(0, &ActionKind::Upload),
            Err(InvalidInput::NonPositivePoints(0))
        );
        assert_eq!(
            validate(-5, &ActionKind::Comment),
            Err(InvalidInput::NonPositivePoints(-5))
        );
        assert!(validate(1, &ActionKind::Download).is_ok());
    }

    #[test]
    fn test_validate_accepts_any_positive_rating_total() {
        assert!(validate(5, &ActionKind::RatingReceived).is_ok());
        assert!(validate(95, &ActionKind::RatingReceived).is_ok());
    }

    #[test]
    fn test_validate_empty_custom_action() {
        assert_eq!(
            validate(3, &ActionKind::Other("  ".into())),
            Err(InvalidInput::EmptyAction)
        );
    }
}
