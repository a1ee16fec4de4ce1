use std::sync::Arc;

use thiserror::Error;

use crate::db::StorageError;
use crate::db::models::member::UserId;
use crate::db::repositories::PointStore;

pub mod award;
pub mod level;
pub mod ranking;


pub use award::{AwardResult, AwardService, LedgerAudit};
pub use level::{LevelProgress, level_of};
pub use ranking::{RankingService, Scope, ScopeKind};

pub type EngineResult<T> = core::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

/// Rejections that happen before anything is written
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("point delta must be positive, got {0}")]
    NonPositivePoints(i64),

    #[error("unknown user '{0}'")]
    UnknownUser(UserId),

    #[error("action kind must not be empty")]
    EmptyAction,

    #[error("no default point value for action '{0}'")]
    NoDefaultPoints(String),

    #[error("unknown leaderboard scope '{0}'")]
    UnknownScope(String),

    #[error("leaderboard limit must be positive, got {0}")]
    InvalidLimit(i64),

    #[error("group leaderboard needs a requesting user")]
    GroupNeedsRequester,

    #[error("award would push the point total of user '{0}' past its maximum")]
    PointsOverflow(UserId),
}

/// Ranking limits handed to the engine by whoever builds it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingLimits {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for RankingLimits {
    fn default() -> Self {
        Self {
            default_limit: crate::constants::DEFAULT_LEADERBOARD_LIMIT,
            max_limit: crate::constants::MAX_LEADERBOARD_LIMIT,
        }
    }
}

impl RankingLimits {
    /// Keeps the default page size inside `1..=max_limit`
    pub fn normalized(self) -> Self {
        let max_limit = self.max_limit.max(1);
        Self {
            default_limit: self.default_limit.clamp(1, max_limit),
            max_limit,
        }
    }
}

/// The gamification engine: awarding and ranking over one shared store
#[derive(Clone)]
pub struct PointsEngine {
    store: Arc<dyn PointStore>,
    pub awards: AwardService,
    pub ranking: RankingService,
}

impl PointsEngine {
    pub fn new(store: Arc<dyn PointStore>, limits: RankingLimits) -> Self {
        Self {
            awards: AwardService::new(Arc::clone(&store)),
            ranking: RankingService::new(Arc::clone(&store), limits),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn PointStore> {
        &self.store
    }
}

impl core::fmt::Debug for PointsEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PointsEngine").finish_non_exhaustive()
    }
}
