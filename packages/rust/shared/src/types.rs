//! Core domain types: the summarization session and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for session identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new time-sortable session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
///
/// `pending → streaming → {completed | error}`, or `pending → error` when
/// extraction fails. `completed` and `error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Streaming,
    Completed,
    Error,
}

impl SessionStatus {
    /// Column value stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether moving from `self` to `next` follows the state machine.
    /// Re-asserting the current non-terminal state is allowed.
    pub fn can_advance_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Streaming)
                | (Pending, Error)
                | (Streaming, Streaming)
                | (Streaming, Completed)
                | (Streaming, Error)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "streaming" => Ok(Self::Streaming),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One attempt to summarize a URL, as persisted and as returned over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    /// Original submitted URL, exactly as received.
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub status: SessionStatus,
    /// Failure detail; only meaningful when `status` is `error`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// True when a finished summary exists for this session.
    pub fn has_completed_summary(&self) -> bool {
        self.status == SessionStatus::Completed && self.summary.is_some()
    }
}

// ---------------------------------------------------------------------------
// SessionPatch
// ---------------------------------------------------------------------------

/// Partial update for a session. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub status: Option<SessionStatus>,
    pub error: Option<String>,
}

impl SessionPatch {
    /// Extraction succeeded; generation is about to start.
    pub fn streaming(title: Option<String>) -> Self {
        Self {
            title,
            status: Some(SessionStatus::Streaming),
            ..Self::default()
        }
    }

    /// Generation finished with the full text.
    pub fn completed(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            status: Some(SessionStatus::Completed),
            ..Self::default()
        }
    }

    /// Terminal failure with a human-readable message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            status: Some(SessionStatus::Error),
            ..Self::default()
        }
    }
}
