//! Leaderboards and per-user ranks.
//!
//! Every scope goes through the same path: the scope turns into a [`StandingsQuery`], the store
//! returns the unranked population for it, and [`rank_standings`] orders and numbers it.

use core::cmp::Ordering;
use core::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{EngineError, EngineResult, InvalidInput, RankingLimits};
use crate::db::models::leaderboard::{
    LeaderboardEntry, LeaderboardView, Rank, Standing, StandingsQuery, Window,
};
use crate::db::models::member::UserId;
use crate::db::repositories::PointStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Overall,
    /// Current calendar month (UTC)
    Monthly,
    /// Users sharing a department
    Group(String),
}

/// A scope as requested, before a group scope has been bound to the requester's group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Overall,
    Monthly,
    Group,
}

#[derive(Clone)]
pub struct RankingService {
    store: Arc<dyn PointStore>,
    limits: RankingLimits,
}

impl Scope {
    pub fn kind(&self) -> ScopeKind {
        match self {
            Scope::Overall => ScopeKind::Overall,
            Scope::Monthly => ScopeKind::Monthly,
            Scope::Group(_) => ScopeKind::Group,
        }
    }

    /// The population filter and window this scope ranks over, evaluated at `now`
    pub fn query(&self, now: DateTime<Utc>) -> StandingsQuery {
        match self {
            Scope::Overall => StandingsQuery::default(),
            Scope::Monthly => StandingsQuery::windowed(Window::month_of(now)),
            Scope::Group(group) => StandingsQuery::grouped(group.clone()),
        }
    }
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Overall => "overall",
            ScopeKind::Monthly => "monthly",
            ScopeKind::Group => "group",
        }
    }
}

impl FromStr for ScopeKind {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "overall" => Ok(ScopeKind::Overall),
            "monthly" => Ok(ScopeKind::Monthly),
            "group" | "department" => Ok(ScopeKind::Group),
            _ => Err(InvalidInput::UnknownScope(s.to_string())),
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Group(group) => write!(f, "group:{group}"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Leaderboard order: points descending, approved uploads descending, display name ascending.
/// User id is the last resort so fully tied users still come back in a stable order.
pub fn compare_standings(a: &Standing, b: &Standing) -> Ordering {
    b.points
        .cmp(&a.points)
        .then_with(|| b.uploads.cmp(&a.uploads))
        .then_with(|| a.display_name.cmp(&b.display_name))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

fn tied(a: &Standing, b: &Standing) -> bool {
    a.points == b.points && a.uploads == b.uploads && a.display_name == b.display_name
}

/// Orders a scope's population and numbers it with competition ranking: users tied on every
/// ranking key share a rank, and the next distinct user's rank is their 1-based position.
pub fn rank_standings(mut standings: Vec<Standing>) -> Vec<LeaderboardEntry> {
    standings.sort_by(compare_standings);

    let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(standings.len());
    let mut previous: Option<Standing> = None;
    let mut rank = 0;

    for (position, standing) in standings.into_iter().enumerate() {
        let is_tie = previous.as_ref().is_some_and(|p| tied(p, &standing));
        if !is_tie {
            rank = position as i64 + 1;
        }

        previous = Some(standing.clone());
        entries.push(standing.into_entry(rank));
    }

    entries
}

impl RankingService {
    pub fn new(store: Arc<dyn PointStore>, limits: RankingLimits) -> Self {
        Self {
            store,
            limits: limits.normalized(),
        }
    }

    pub fn limits(&self) -> RankingLimits {
        self.limits
    }

    /// Validates a requested page size, falling back to the default and capping at the maximum
    pub fn page_limit(&self, limit: Option<i64>) -> Result<i64, InvalidInput> {
        match limit {
            None => Ok(self.limits.default_limit),
            Some(l) if l <= 0 => Err(InvalidInput::InvalidLimit(l)),
            Some(l) => Ok(l.min(self.limits.max_limit)),
        }
    }

    /// Binds a requested scope to a concrete one. Group scope takes the requester's department;
    /// `None` means the requester has no group and so nothing to rank against.
    #[instrument(skip(self))]
    pub async fn resolve_scope(
        &self,
        kind: ScopeKind,
        requester: Option<UserId>,
    ) -> EngineResult<Option<Scope>> {
        match kind {
            ScopeKind::Overall => Ok(Some(Scope::Overall)),
            ScopeKind::Monthly => Ok(Some(Scope::Monthly)),
            ScopeKind::Group => {
                let requester = requester.ok_or(InvalidInput::GroupNeedsRequester)?;
                let member = self
                    .store
                    .member(requester)
                    .await?
                    .ok_or(InvalidInput::UnknownUser(requester))?;

                Ok(member.group.map(Scope::Group))
            }
        }
    }

    /// The full ranked population of `scope` as of `now`, no paging applied
    #[instrument(skip(self))]
    pub async fn ranked_at(
        &self,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<LeaderboardEntry>> {
        let standings = self.store.standings(&scope.query(now)).await?;
        Ok(rank_standings(standings))
    }

    pub async fn leaderboard(
        &self,
        scope: &Scope,
        limit: Option<i64>,
    ) -> EngineResult<Vec<LeaderboardEntry>> {
        self.leaderboard_at(scope, limit, Utc::now()).await
    }

    pub async fn leaderboard_at(
        &self,
        scope: &Scope,
        limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<LeaderboardEntry>> {
        let limit = self.page_limit(limit)?;

        let mut entries = self.ranked_at(scope, now).await?;
        entries.truncate(limit as usize);

        Ok(entries)
    }

    pub async fn standing_of(
        &self,
        user_id: UserId,
        scope: &Scope,
    ) -> EngineResult<Option<LeaderboardEntry>> {
        self.standing_of_at(user_id, scope, Utc::now()).await
    }

    /// The user's own leaderboard entry, independent of any page limit
    #[instrument(skip(self))]
    pub async fn standing_of_at(
        &self,
        user_id: UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<LeaderboardEntry>> {
        if self.store.member(user_id).await?.is_none() {
            return Err(InvalidInput::UnknownUser(user_id).into());
        }

        let entries = self.ranked_at(scope, now).await?;
        Ok(entries.into_iter().find(|e| e.user_id == user_id))
    }

    pub async fn rank_of(&self, user_id: UserId, scope: &Scope) -> EngineResult<Rank> {
        self.rank_of_at(user_id, scope, Utc::now()).await
    }

    pub async fn rank_of_at(
        &self,
        user_id: UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> EngineResult<Rank> {
        Ok(self
            .standing_of_at(user_id, scope, now)
            .await?
            .map_or(Rank::NotRanked, |entry| Rank::Ranked(entry.rank)))
    }

    pub async fn leaderboard_view(
        &self,
        kind: ScopeKind,
        limit: Option<i64>,
        requester: Option<UserId>,
    ) -> Result<LeaderboardView, InvalidInput> {
        self.leaderboard_view_at(kind, limit, requester, Utc::now())
            .await
    }

    /// Leaderboard page for rendering. Storage failures degrade to an empty, unavailable view;
    /// only bad input is reported as an error.
    #[instrument(skip(self))]
    pub async fn leaderboard_view_at(
        &self,
        kind: ScopeKind,
        limit: Option<i64>,
        requester: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<LeaderboardView, InvalidInput> {
        let limit = self.page_limit(limit)?;

        let scope = match self.resolve_scope(kind, requester).await {
            Ok(Some(scope)) => scope,
            Ok(None) => {
                return Ok(LeaderboardView {
                    scope: kind.to_string(),
                    entries: Vec::new(),
                    requester_rank: requester.map(|_| Rank::NotRanked),
                    available: true,
                });
            }
            Err(EngineError::InvalidInput(e)) => return Err(e),
            Err(EngineError::Storage(e)) => {
                tracing::error!(error = ?e, scope = %kind, "leaderboard unavailable");
                return Ok(LeaderboardView::unavailable(kind.as_str()));
            }
        };

        let mut entries = match self.ranked_at(&scope, now).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = ?e, %scope, "leaderboard unavailable");
                return Ok(LeaderboardView::unavailable(kind.as_str()));
            }
        };

        let requester_rank = requester.map(|id| {
            entries
                .iter()
                .find(|e| e.user_id == id)
                .map_or(Rank::NotRanked, |e| Rank::Ranked(e.rank))
        });
        entries.truncate(limit as usize);

        Ok(LeaderboardView {
            scope: kind.to_string(),
            entries,
            requester_rank,
            available: true,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn standing(id: i64, name: &str, points: i64, uploads: i64) -> Standing {
        Standing {
            user_id: UserId(id),
            display_name: name.to_string(),
            group: None,
            level: crate::engine::level_of(points),
            points,
            uploads,
        }
    }

    fn ranks(entries: &[LeaderboardEntry]) -> Vec<(i64, i64)> {
        entries.iter().map(|e| (e.user_id.0, e.rank)).collect()
    }

    #[test]
    fn test_points_then_uploads_then_name() {
        let entries = rank_standings(vec![
            standing(1, "Cara", 50, 1),
            standing(2, "Abel", 80, 0),
            standing(3, "Bea", 50, 3),
            standing(4, "Ada", 50, 1),
        ]);

        assert_eq!(ranks(&entries), vec![(2, 1), (3, 2), (4, 3), (1, 4)]);
    }

    #[test]
    fn test_full_ties_share_rank_and_next_takes_position() {
        let entries = rank_standings(vec![
            standing(7, "Sam", 120, 2),
            standing(3, "Sam", 120, 2),
            standing(9, "Kit", 90, 0),
            standing(5, "Lou", 90, 0),
        ]);

        // identical on every key: same rank, ordered by id; next distinct entry is 3rd
        assert_eq!(ranks(&entries), vec![(3, 1), (7, 1), (9, 3), (5, 4)]);
    }

    #[test]
    fn test_ranking_is_order_independent() {
        let population = vec![
            standing(1, "A", 10, 0),
            standing(2, "B", 10, 0),
            standing(3, "C", 30, 1),
            standing(4, "A", 10, 0),
        ];
        let mut reversed = population.clone();
        reversed.reverse();

        assert_eq!(rank_standings(population), rank_standings(reversed));
    }

    #[test]
    fn test_empty_population() {
        assert!(rank_standings(Vec::new()).is_empty());
    }

    #[test]
    fn test_scope_kind_parsing() {
        assert_eq!("overall".parse::<ScopeKind>(), Ok(ScopeKind::Overall));
        assert_eq!("".parse::<ScopeKind>(), Ok(ScopeKind::Overall));
        assert_eq!("Monthly".parse::<ScopeKind>(), Ok(ScopeKind::Monthly));
        assert_eq!("department".parse::<ScopeKind>(), Ok(ScopeKind::Group));
        assert_eq!("group".parse::<ScopeKind>(), Ok(ScopeKind::Group));
        assert_eq!(
            "weekly".parse::<ScopeKind>(),
            Err(InvalidInput::UnknownScope("weekly".into()))
        );
    }

    #[test]
    fn test_scope_queries() {
        let now = Utc::now();

        assert_eq!(Scope::Overall.query(now), StandingsQuery::default());
        assert_eq!(
            Scope::Monthly.query(now).window,
            Some(Window::month_of(now))
        );
        assert_eq!(
            Scope::Group("Physics".into()).query(now),
            StandingsQuery::grouped("Physics")
        );
    }

    fn service(default_limit: i64, max_limit: i64) -> RankingService {
        RankingService::new(
            Arc::new(crate::db::memory::MemoryPointStore::new()),
            RankingLimits {
                default_limit,
                max_limit,
            },
        )
    }

    #[test]
    fn test_default_limit_stays_within_bounds() {
        assert_eq!(service(500, 100).page_limit(None), Ok(100));
        assert_eq!(service(0, 100).page_limit(None), Ok(1));
        assert_eq!(service(-3, 0).page_limit(None), Ok(1));
        assert_eq!(service(20, 100).page_limit(None), Ok(20));

        assert_eq!(service(500, 100).page_limit(Some(250)), Ok(100));
        assert_eq!(
            service(500, 100).page_limit(Some(0)),
            Err(InvalidInput::InvalidLimit(0))
        );
    }
}
