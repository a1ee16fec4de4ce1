use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod leaderboard;
pub mod member;
pub mod points;

#[inline]
fn default_history_limit() -> i64 {
    crate::constants::DEFAULT_HISTORY_LIMIT
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaderboardParams {
    #[serde(default)]
    pub scope: Option<String>,
    /// Whose rank to report alongside the page; also selects the group for group scope
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScopeParam {
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}
