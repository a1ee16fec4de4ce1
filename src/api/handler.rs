use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::server::{AppState, JsonResult, RouteError};
use crate::constants::MAX_HISTORY_LIMIT;
use crate::db::models::{HistoryParams, LeaderboardParams, ScopeParam};
use crate::db::prelude::{ActionKind, LeaderboardView, PointEvent, Rank, UserId};
use crate::engine::{AwardResult, EngineError, LevelProgress, Scope, ScopeKind};

#[derive(Debug, Clone, Deserialize)]
pub struct AwardRequest {
    pub user_id: i64,
    pub action: ActionKind,
    /// Falls back to the action's default value when absent
    #[serde(default)]
    pub points: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankResponse {
    pub user_id: UserId,
    pub scope: ScopeKind,
    pub rank: Rank,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointsSummary {
    pub user_id: UserId,
    pub points: i64,
    pub level: i32,
    pub progress: LevelProgress,
    pub rank: Rank,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Runs an engine call under the request deadline. A deadline hit mid-award drops the open
/// transaction, which rolls it back.
async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, RouteError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<RouteError>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| RouteError::Timeout(limit))?
        .map_err(Into::into)
}

fn parse_scope(scope: Option<&str>) -> Result<ScopeKind, RouteError> {
    Ok(scope.unwrap_or_default().parse::<ScopeKind>()?)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[instrument(skip(state, body), fields(user_id = body.user_id, action = %body.action, points = body.points))]
pub async fn award_points(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AwardRequest>,
) -> JsonResult<AwardResult> {
    let awards = &state.engine.awards;
    let user_id = UserId(body.user_id);

    let result = match body.points {
        Some(points) => {
            bounded(
                state.request_timeout,
                awards.award(user_id, points, body.action, body.description),
            )
            .await?
        }
        None => {
            bounded(
                state.request_timeout,
                awards.award_action(user_id, body.action, body.description),
            )
            .await?
        }
    };

    Ok(Json(result))
}

#[instrument(skip(state))]
pub async fn leaderboard(
    Query(params): Query<LeaderboardParams>,
    State(state): State<Arc<AppState>>,
) -> JsonResult<LeaderboardView> {
    let kind = parse_scope(params.scope.as_deref())?;

    // a page that can't be built in time renders its empty state, same as a storage failure
    let view = match bounded(
        state.request_timeout,
        state
            .engine
            .ranking
            .leaderboard_view(kind, params.limit, params.user_id.map(UserId)),
    )
    .await
    {
        Err(RouteError::Timeout(after)) => {
            tracing::error!(scope = %kind, ?after, "leaderboard timed out, serving empty view");
            LeaderboardView::unavailable(kind.as_str())
        }
        other => other?,
    };

    Ok(Json(view))
}

#[instrument(skip(state))]
pub async fn user_rank(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<ScopeParam>,
) -> JsonResult<RankResponse> {
    let kind = parse_scope(params.scope.as_deref())?;
    let user_id = UserId(id);
    let ranking = &state.engine.ranking;

    let rank = bounded(state.request_timeout, async {
        match ranking.resolve_scope(kind, Some(user_id)).await? {
            Some(scope) => ranking.rank_of(user_id, &scope).await,
            None => Ok::<_, EngineError>(Rank::NotRanked),
        }
    })
    .await?;

    Ok(Json(RankResponse {
        user_id,
        scope: kind,
        rank,
    }))
}

#[instrument(skip(state))]
pub async fn user_points(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> JsonResult<PointsSummary> {
    let user_id = UserId(id);
    let engine = &state.engine;

    let (rank, aggregate) = bounded(state.request_timeout, async {
        futures::try_join!(
            engine.ranking.rank_of(user_id, &Scope::Overall),
            engine.awards.points_of(user_id),
        )
    })
    .await?;

    let points = aggregate.as_ref().map_or(0, |a| a.points);
    let progress = LevelProgress::for_points(points);

    Ok(Json(PointsSummary {
        user_id,
        points,
        level: aggregate.as_ref().map_or(progress.level, |a| a.level),
        progress,
        rank,
        last_updated: aggregate.map(|a| a.last_updated),
    }))
}

#[instrument(skip(state))]
pub async fn user_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<HistoryParams>,
) -> JsonResult<Vec<PointEvent>> {
    let limit = params.limit.min(MAX_HISTORY_LIMIT);

    let events = bounded(
        state.request_timeout,
        state.engine.awards.history(UserId(id), limit),
    )
    .await?;

    Ok(Json(events))
}
