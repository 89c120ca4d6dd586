mod schema;

pub use schema::{Database, DistinctField};

use crate::library::book::ReadingStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Unique username.
    pub username: String,
    /// Unique email, trimmed and lowercased.
    pub email: String,
    /// Argon2 password hash.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Avatar reference (URL or uploads path).
    pub avatar: Option<String>,
    /// Display preferences.
    pub preferences: Preferences,
    /// Cached per-status book counts.
    pub stats: UserStats,
    /// Administrator flag.
    pub is_admin: bool,
    /// Account creation time.
    pub created_at: DateTime<Utc>,
    /// Last successful login.
    pub last_login: Option<DateTime<Utc>>,
}

/// UI theme preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Light theme.
    #[default]
    Light,
    /// Dark theme.
    Dark,
    /// Follow the system setting.
    System,
}

impl Theme {
    /// Stored literal.
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "system" => Ok(Theme::System),
            other => Err(format!("Unknown theme: {}", other)),
        }
    }
}

/// Per-user preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// UI theme.
    #[serde(default)]
    pub theme: Theme,
    /// Status preselected for new books.
    #[serde(default)]
    pub default_status: ReadingStatus,
}

/// Denormalized snapshot of a user's book counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    /// All books.
    pub total_books: u32,
    /// Books with status Read.
    pub books_read: u32,
    /// Books with status Reading.
    pub currently_reading: u32,
    /// Books with status To Read.
    pub want_to_read: u32,
}

/// Per-status counts within [`BookStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    /// To Read.
    pub to_read: u32,
    /// Reading.
    pub reading: u32,
    /// Read.
    pub read: u32,
}

/// Live aggregate over a user's books.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookStats {
    /// Number of books.
    pub total_books: u32,
    /// Mean rating over rated books, one decimal.
    pub average_rating: Option<f64>,
    /// Sum of known page counts.
    pub total_pages: u64,
    /// Sum of page counts of finished books.
    pub pages_read: u64,
    /// Books finished in the current calendar year.
    pub read_this_year: u32,
    /// Counts by status.
    pub by_status: StatusCounts,
}

/// Timestamp helper, in milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time at the millisecond precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    millis_to_datetime(now_millis())
}

/// Convert a millisecond timestamp to DateTime.
pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}
