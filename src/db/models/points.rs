use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::member::UserId;
use crate::constants::{POINTS_ANSWER, POINTS_COMMENT, POINTS_DOWNLOAD, POINTS_UPLOAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct EventId(pub i64);

/// What a ledger entry was granted for. Stored as plain text so new kinds need no schema change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Upload,
    Download,
    Comment,
    Answer,
    RatingReceived,
    Other(String),
}

/// Ledger entry; never updated or deleted once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointEvent {
    pub id: EventId,
    pub user_id: UserId,
    pub points: i64,
    pub action_kind: ActionKind,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A ledger entry before the store has assigned it an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPointEvent {
    pub user_id: UserId,
    pub points: i64,
    pub action_kind: ActionKind,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PointEventRow {
    pub id: EventId,
    pub user_id: UserId,
    pub points: i64,
    pub action_kind: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Upload => "upload",
            ActionKind::Download => "download",
            ActionKind::Comment => "comment",
            ActionKind::Answer => "answer",
            ActionKind::RatingReceived => "rating_received",
            ActionKind::Other(kind) => kind,
        }
    }

    /// Points granted when the caller doesn't supply an explicit amount. Ratings carry their own
    /// value, so they (and custom kinds) have none.
    pub fn default_points(&self) -> Option<i64> {
        match self {
            ActionKind::Upload => Some(POINTS_UPLOAD),
            ActionKind::Download => Some(POINTS_DOWNLOAD),
            ActionKind::Comment => Some(POINTS_COMMENT),
            ActionKind::Answer => Some(POINTS_ANSWER),
            ActionKind::RatingReceived | ActionKind::Other(_) => None,
        }
    }
}

impl NewPointEvent {
    pub fn into_event(self, id: EventId) -> PointEvent {
        PointEvent {
            id,
            user_id: self.user_id,
            points: self.points,
            action_kind: self.action_kind,
            description: self.description,
            created_at: self.created_at,
        }
    }
}

impl From<PointEventRow> for PointEvent {
    fn from(row: PointEventRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            points: row.points,
            action_kind: ActionKind::from(row.action_kind),
            description: row.description,
            created_at: row.created_at,
        }
    }
}

impl From<&str> for ActionKind {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "upload" | "resource upload" => ActionKind::Upload,
            "download" | "resource download" => ActionKind::Download,
            "comment" => ActionKind::Comment,
            "answer" => ActionKind::Answer,
            "rating_received" | "rating" => ActionKind::RatingReceived,
            _ => ActionKind::Other(value.trim().to_string()),
        }
    }
}

impl From<String> for ActionKind {
    fn from(value: String) -> Self {
        ActionKind::from(value.as_str())
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ActionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ActionKind::from(raw))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_action_kind_text_form() {
        assert_eq!(ActionKind::from("upload"), ActionKind::Upload);
        assert_eq!(ActionKind::from("Resource Download"), ActionKind::Download);
        assert_eq!(ActionKind::from("rating_received"), ActionKind::RatingReceived);
        assert_eq!(
            ActionKind::from("badge_bonus"),
            ActionKind::Other("badge_bonus".into())
        );
        assert_eq!(ActionKind::RatingReceived.as_str(), "rating_received");
        assert_eq!(ActionKind::Other("streak".into()).to_string(), "streak");
    }

    #[test]
    fn test_default_points() {
        assert_eq!(ActionKind::Upload.default_points(), Some(10));
        assert_eq!(ActionKind::Download.default_points(), Some(1));
        assert_eq!(ActionKind::RatingReceived.default_points(), None);
        assert_eq!(ActionKind::Other("x".into()).default_points(), None);
    }

    #[test]
    fn test_action_kind_json() {
        let json = serde_json::to_string(&ActionKind::RatingReceived).unwrap();
        assert_eq!(json, "\"rating_received\"");

        let kind: ActionKind = serde_json::from_str("\"comment\"").unwrap();
        assert_eq!(kind, ActionKind::Comment);
    }
}
