use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::member::UserId;

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Population and window a store should return standings for. Built by a leaderboard scope;
/// `None` means "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandingsQuery {
    pub window: Option<Window>,
    pub group: Option<String>,
}

/// One user's unranked standing inside a scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Standing {
    pub user_id: UserId,
    pub display_name: String,
    pub group: Option<String>,
    pub level: i32,
    /// Scope-appropriate sum: the running total, or the windowed ledger sum
    pub points: i64,
    /// Approved uploads, windowed the same way as `points`
    pub uploads: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub user_id: UserId,
    pub display_name: String,
    pub group: Option<String>,
    pub level: i32,
    pub points: i64,
    pub uploads: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "rank", rename_all = "snake_case")]
pub enum Rank {
    Ranked(i64),
    NotRanked,
}

/// What a leaderboard page renders. `available` is false when the read failed and the page
/// should show its empty state instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardView {
    pub scope: String,
    pub entries: Vec<LeaderboardEntry>,
    pub requester_rank: Option<Rank>,
    pub available: bool,
}

impl Window {
    /// The calendar month (UTC) containing `now`
    pub fn month_of(now: DateTime<Utc>) -> Self {
        let start = first_of_month(now.year(), now.month());
        let end = if now.month() == 12 {
            first_of_month(now.year() + 1, 1)
        } else {
            first_of_month(now.year(), now.month() + 1)
        };

        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

fn first_of_month(year: i32, month: u32) -> DateTime<Utc> {
    // day 1 of a month in 1..=12 always exists
    let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default();
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

impl StandingsQuery {
    pub fn windowed(window: Window) -> Self {
        Self {
            window: Some(window),
            group: None,
        }
    }

    pub fn grouped(group: impl Into<String>) -> Self {
        Self {
            window: None,
            group: Some(group.into()),
        }
    }
}

impl Standing {
    pub fn into_entry(self, rank: i64) -> LeaderboardEntry {
        LeaderboardEntry {
            rank,
            user_id: self.user_id,
            display_name: self.display_name,
            group: self.group,
            level: self.level,
            points: self.points,
            uploads: self.uploads,
        }
    }
}

impl LeaderboardView {
    pub fn unavailable(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            entries: Vec::new(),
            requester_rank: None,
            available: false,
        }
    }
}
