use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::ROLE_STUDENT;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

/// Identity of a platform user as seen by the points engine. Owned by the account features, read
/// here only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
    /// Department, the attribute group leaderboards are scoped by
    pub group: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemberRow {
    pub id: UserId,
    pub display_name: String,
    pub role: String,
    pub department: Option<String>,
}

impl Member {
    pub fn student(id: i64, display_name: &str, group: Option<&str>) -> Self {
        Self {
            id: UserId(id),
            display_name: display_name.to_string(),
            role: Role::Student,
            group: group.map(String::from),
        }
    }

    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Self {
        Self {
            id: row.id,
            display_name: row.display_name,
            // anything that isn't a student is staff as far as ranking is concerned
            role: row.role.parse().unwrap_or(Role::Admin),
            group: row.department.filter(|d| !d.is_empty()),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ROLE_STUDENT => Ok(Role::Student),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        UserId(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
