// default point values handed out per action
pub const POINTS_UPLOAD: i64 = 10;
pub const POINTS_DOWNLOAD: i64 = 1;
pub const POINTS_COMMENT: i64 = 2;
pub const POINTS_ANSWER: i64 = 5;

/// `(minimum points, level)`, highest band first. Evaluated top-down, first match wins.
pub const LEVEL_THRESHOLDS: [(i64, i32); 5] = [(5000, 5), (1000, 4), (500, 3), (100, 2), (0, 1)];
pub const MIN_LEVEL: i32 = 1;
pub const MAX_LEVEL: i32 = 5;

pub const DEFAULT_LEADERBOARD_LIMIT: i64 = 50;
pub const MAX_LEADERBOARD_LIMIT: i64 = 100;
pub const DEFAULT_HISTORY_LIMIT: i64 = 20;
pub const MAX_HISTORY_LIMIT: i64 = 100;

pub const ROLE_STUDENT: &str = "student";
pub const RESOURCE_APPROVED: &str = "approved";
