//! Turso Embedded / libSQL storage layer for summarization sessions.
//!
//! The [`SessionStore`] trait is the record-store seam the pipeline writes
//! through; [`Storage`] implements it on a local libSQL database.
//!
//! **Access rules:**
//! - Server: read-write (sole writer) via [`Storage::open`]
//! - Admin CLI read paths: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};
use libsql::{Connection, Database, params};
use tracing::debug;

use pagebrief_shared::{PageBriefError, Result, Session, SessionId, SessionPatch, SessionStatus};

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Durable record of every summarization attempt.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new `pending` session for `url`.
    async fn create(&self, url: &str) -> Result<Session>;

    /// Merge the provided fields into the session and bump `updated_at`.
    /// Fails with `NotFound` for an unknown id.
    async fn update(&self, id: SessionId, patch: SessionPatch) -> Result<()>;

    /// Point lookup. Fails with `NotFound` for an unknown id.
    async fn get(&self, id: SessionId) -> Result<Session>;

    /// All sessions newest-first, optionally filtered by a case-insensitive
    /// substring of `url`, `title` or `summary`.
    async fn list(&self, filter: Option<&str>) -> Result<Vec<Session>>;

    /// Permanently remove a session. Fails with `NotFound` if absent.
    async fn delete(&self, id: SessionId) -> Result<()>;

    /// The newest session recorded for exactly this URL, if any.
    async fn latest_for_url(&self, url: &str) -> Result<Option<Session>>;
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

const SESSION_COLUMNS: &str = "id, url, title, summary, status, error, created_at, updated_at";

/// Error recorded on sessions left unfinished by a previous process.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted before completion";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PageBriefError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(PageBriefError::storage)?;

        let conn = db.connect().map_err(PageBriefError::storage)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(PageBriefError::storage)?;

        let conn = db.connect().map_err(PageBriefError::storage)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Mark every `pending` or `streaming` session as failed.
    ///
    /// Call once at server start, before accepting submissions: any such row
    /// belongs to a process that exited before finalizing it.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        self.check_writable()?;
        let recovered = self
            .conn
            .execute(
                "UPDATE sessions SET status = ?1, error = ?2, updated_at = ?3
                 WHERE status IN (?4, ?5)",
                params![
                    SessionStatus::Error.as_str(),
                    INTERRUPTED_MESSAGE,
                    format_ts(&now_micros()),
                    SessionStatus::Pending.as_str(),
                    SessionStatus::Streaming.as_str(),
                ],
            )
            .await
            .map_err(PageBriefError::storage)?;

        if recovered > 0 {
            tracing::warn!(recovered, "marked interrupted sessions as failed");
        }
        Ok(recovered)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PageBriefError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PageBriefError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    async fn query_sessions(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Session>> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(PageBriefError::storage)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(PageBriefError::storage)? {
            results.push(row_to_session(&row)?);
        }
        Ok(results)
    }
}

#[async_trait]
impl SessionStore for Storage {
    async fn create(&self, url: &str) -> Result<Session> {
        self.check_writable()?;
        let id = SessionId::new();
        let now = now_micros();
        self.conn
            .execute(
                "INSERT INTO sessions (id, url, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    url,
                    SessionStatus::Pending.as_str(),
                    format_ts(&now),
                    format_ts(&now),
                ],
            )
            .await
            .map_err(PageBriefError::storage)?;

        debug!(session_id = %id, url, "session created");

        Ok(Session {
            id,
            url: url.to_string(),
            title: None,
            summary: None,
            status: SessionStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update(&self, id: SessionId, patch: SessionPatch) -> Result<()> {
        self.check_writable()?;
        let current = self.get(id).await?;

        if let Some(next) = patch.status {
            if !current.status.can_advance_to(next) {
                return Err(PageBriefError::validation(format!(
                    "illegal status transition {} -> {next} for session {id}",
                    current.status
                )));
            }
        }

        // updated_at must strictly increase even when the clock has not moved.
        let now = now_micros();
        let updated_at = if now > current.updated_at {
            now
        } else {
            current.updated_at + TimeDelta::microseconds(1)
        };

        let changed = self
            .conn
            .execute(
                "UPDATE sessions SET
                   title = COALESCE(?1, title),
                   summary = COALESCE(?2, summary),
                   status = COALESCE(?3, status),
                   error = COALESCE(?4, error),
                   updated_at = ?5
                 WHERE id = ?6",
                params![
                    patch.title,
                    patch.summary,
                    patch.status.map(|s| s.as_str()),
                    patch.error,
                    format_ts(&updated_at),
                    id.to_string(),
                ],
            )
            .await
            .map_err(PageBriefError::storage)?;

        // Deleted between the read and the write.
        if changed == 0 {
            return Err(PageBriefError::not_found(id));
        }
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Session> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        self.query_sessions(&sql, params![id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PageBriefError::not_found(id))
    }

    async fn list(&self, filter: Option<&str>) -> Result<Vec<Session>> {
        let sql =
            format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC, id DESC");
        let sessions = self.query_sessions(&sql, params![]).await?;

        // SQLite LIKE only folds ASCII, so matching happens here.
        Ok(match filter.map(str::trim).filter(|f| !f.is_empty()) {
            Some(text) => {
                let needle = text.to_lowercase();
                sessions
                    .into_iter()
                    .filter(|s| matches_filter(s, &needle))
                    .collect()
            }
            None => sessions,
        })
    }

    async fn delete(&self, id: SessionId) -> Result<()> {
        self.check_writable()?;
        let deleted = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(PageBriefError::storage)?;

        if deleted == 0 {
            return Err(PageBriefError::not_found(id));
        }
        debug!(session_id = %id, "session deleted");
        Ok(())
    }

    async fn latest_for_url(&self, url: &str) -> Result<Option<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE url = ?1
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        Ok(self.query_sessions(&sql, params![url]).await?.into_iter().next())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Current time at the precision stored in the database.
fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so that lexical order equals chronological order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PageBriefError::Storage(format!("invalid date: {e}")))
}

/// Case-insensitive substring match on url, title or summary. `needle` is
/// already lowercased.
fn matches_filter(session: &Session, needle: &str) -> bool {
    [
        Some(session.url.as_str()),
        session.title.as_deref(),
        session.summary.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(needle))
}

/// Convert a database row to a [`Session`].
fn row_to_session(row: &libsql::Row) -> Result<Session> {
    let id: String = row.get(0).map_err(PageBriefError::storage)?;
    let status: String = row.get(4).map_err(PageBriefError::storage)?;
    let created_at: String = row.get(6).map_err(PageBriefError::storage)?;
    let updated_at: String = row.get(7).map_err(PageBriefError::storage)?;

    Ok(Session {
        id: id
            .parse()
            .map_err(|e| PageBriefError::Storage(format!("invalid session id '{id}': {e}")))?,
        url: row.get::<String>(1).map_err(PageBriefError::storage)?,
        title: row.get::<String>(2).ok(),
        summary: row.get::<String>(3).ok(),
        status: status.parse().map_err(PageBriefError::Storage)?,
        error: row.get::<String>(5).ok(),
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}
