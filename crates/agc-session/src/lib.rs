//! Append-only SQLite session store. `sessions` holds one row per session;
//! `messages` is append-only and ordered by a per-session `seq` used both
//! as insertion order and as the pagination cursor.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MIN_LIMIT: u32 = 1;
const MAX_LIMIT: u32 = 200;
const DEFAULT_LIMIT: u32 = 50;
const BUSY_TIMEOUT_MS: u32 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("invalid cursor: {0}")]
    CursorInvalid(String),
    #[error("background task failed: {0}")]
    Join(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub config_json: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub session_id: String,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub role: String,
    pub content: String,
    pub multipart_json: Option<serde_json::Value>,
    pub tool_calls_json: Option<serde_json::Value>,
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionUpdate {
    pub title: Option<String>,
    pub config_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct PageMetadata {
    pub total: i64,
    pub limit_used: u32,
    /// Set only when older messages remain.
    pub prev_cursor: Option<String>,
}

/// Single-writer connection, shared via a blocking mutex and driven through
/// `spawn_blocking` so callers never block the async runtime on sqlite I/O.
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            open_and_migrate(&path)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap();
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn create(&self, session: Session) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, title, created_at, config_json) VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.id,
                    session.title,
                    session.created_at.to_rfc3339(),
                    serde_json::to_string(&session.config_json).unwrap_or_else(|_| "{}".into()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn append_message(&self, session_id: &str, message: MessageRecord) -> Result<i64, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let next_seq: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .unwrap_or(1);
            conn.execute(
                "INSERT INTO messages (session_id, seq, created_at, role, content, multipart_json, tool_calls_json, tool_call_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session_id,
                    next_seq,
                    message.created_at.to_rfc3339(),
                    message.role,
                    message.content,
                    message.multipart_json.map(|v| serde_json::to_string(&v).unwrap_or_default()),
                    message.tool_calls_json.map(|v| serde_json::to_string(&v).unwrap_or_default()),
                    message.tool_call_id,
                ],
            )?;
            Ok(next_seq)
        })
        .await
    }

    pub async fn update(&self, session_id: &str, delta: SessionUpdate) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            if let Some(title) = delta.title {
                conn.execute("UPDATE sessions SET title = ?1 WHERE id = ?2", params![title, session_id])?;
            }
            if let Some(config) = delta.config_json {
                conn.execute(
                    "UPDATE sessions SET config_json = ?1 WHERE id = ?2",
                    params![serde_json::to_string(&config).unwrap_or_else(|_| "{}".into()), session_id],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT id, title, created_at FROM sessions ORDER BY created_at DESC")?;
            let rows = stmt.query_map([], |row| {
                let created_at: String = row.get(2)?;
                Ok(SessionSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: parse_rfc3339(&created_at),
                })
            })?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Result<Session, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, title, created_at, config_json FROM sessions WHERE id = ?1",
                    params![id],
                    |row| {
                        let created_at: String = row.get(2)?;
                        let config_json: String = row.get(3)?;
                        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?, created_at, config_json))
                    },
                )
                .optional()?;
            match row {
                Some((id, title, created_at, config_json)) => Ok(Session {
                    id,
                    title,
                    created_at: parse_rfc3339(&created_at),
                    config_json: serde_json::from_str(&config_json).unwrap_or(serde_json::Value::Null),
                }),
                None => Err(StoreError::NotFound(id)),
            }
        })
        .await
    }

    /// `before_cursor`, when present and non-empty, must parse as a
    /// positive integer denoting a `seq` position; messages with
    /// `seq < before_cursor` are returned. An empty cursor is treated the
    /// same as no cursor at all (the zero value decodes without error).
    /// With no cursor, the most recent `limit` messages are returned.
    /// `limit` is clamped to `[1, 200]`; `0` and absent both default to 50.
    pub async fn page_messages(
        &self,
        session_id: &str,
        before_cursor: Option<String>,
        limit: Option<u32>,
    ) -> Result<(Vec<MessageRecord>, PageMetadata), StoreError> {
        let session_id = session_id.to_string();
        let limit_used = limit.filter(|&n| n != 0).unwrap_or(DEFAULT_LIMIT).clamp(MIN_LIMIT, MAX_LIMIT);
        let before: Option<i64> = match before_cursor {
            Some(s) if s.is_empty() => None,
            Some(s) => Some(s.parse::<i64>().map_err(|_| StoreError::CursorInvalid(s))?),
            None => None,
        };

        self.with_conn(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;

            let mut rows = match before {
                Some(cursor) => {
                    let mut stmt = conn.prepare(
                        "SELECT session_id, seq, created_at, role, content, multipart_json, tool_calls_json, tool_call_id
                         FROM messages WHERE session_id = ?1 AND seq < ?2 ORDER BY seq DESC LIMIT ?3",
                    )?;
                    let result = collect_messages(stmt.query(params![session_id, cursor, limit_used])?)?;
                    result
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT session_id, seq, created_at, role, content, multipart_json, tool_calls_json, tool_call_id
                         FROM messages WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2",
                    )?;
                    let result = collect_messages(stmt.query(params![session_id, limit_used])?)?;
                    result
                }
            };
            rows.reverse();

            let prev_cursor = rows
                .first()
                .filter(|m| m.seq > 1)
                .map(|m| m.seq.to_string());

            Ok((rows, PageMetadata { total, limit_used, prev_cursor }))
        })
        .await
    }

    pub async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(())
        })
        .await
    }
}

fn collect_messages(mut rows: rusqlite::Rows<'_>) -> Result<Vec<MessageRecord>, rusqlite::Error> {
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let created_at: String = row.get(2)?;
        let multipart: Option<String> = row.get(5)?;
        let tool_calls: Option<String> = row.get(6)?;
        out.push(MessageRecord {
            session_id: row.get(0)?,
            seq: row.get(1)?,
            created_at: parse_rfc3339(&created_at),
            role: row.get(3)?,
            content: row.get(4)?,
            multipart_json: multipart.and_then(|s| serde_json::from_str(&s).ok()),
            tool_calls_json: tool_calls.and_then(|s| serde_json::from_str(&s).ok()),
            tool_call_id: row.get(7)?,
        });
    }
    Ok(out)
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn open_and_migrate(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS as u64))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            title TEXT,
            created_at TEXT NOT NULL,
            config_json TEXT NOT NULL DEFAULT '{}'
         );
         CREATE TABLE IF NOT EXISTS messages (
            session_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            multipart_json TEXT,
            tool_calls_json TEXT,
            tool_call_id TEXT,
            PRIMARY KEY (session_id, seq),
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
         );",
    )?;
    debug!(path = %path.display(), "session store migrated");
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Session {
        Session { id: id.to_string(), title: None, created_at: Utc::now(), config_json: serde_json::json!({}) }
    }

    fn message(role: &str, content: &str) -> MessageRecord {
        MessageRecord {
            session_id: String::new(),
            seq: 0,
            created_at: Utc::now(),
            role: role.to_string(),
            content: content.to_string(),
            multipart_json: None,
            tool_calls_json: None,
            tool_call_id: None,
        }
    }

    async fn open_tmp() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("sessions.db")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn create_and_get_roundtrips() {
        let (store, _dir) = open_tmp().await;
        store.create(session("s1")).await.unwrap();
        let got = store.get("s1").await.unwrap();
        assert_eq!(got.id, "s1");
    }

    #[tokio::test]
    async fn get_missing_session_errors() {
        let (store, _dir) = open_tmp().await;
        assert!(matches!(store.get("missing").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn append_message_assigns_increasing_seq() {
        let (store, _dir) = open_tmp().await;
        store.create(session("s1")).await.unwrap();
        let seq1 = store.append_message("s1", message("user", "hi")).await.unwrap();
        let seq2 = store.append_message("s1", message("assistant", "hello")).await.unwrap();
        assert_eq!(seq1, 1);
        assert_eq!(seq2, 2);
    }

    #[tokio::test]
    async fn update_changes_title() {
        let (store, _dir) = open_tmp().await;
        store.create(session("s1")).await.unwrap();
        store.update("s1", SessionUpdate { title: Some("new title".into()), config_json: None }).await.unwrap();
        assert_eq!(store.get("s1").await.unwrap().title.as_deref(), Some("new title"));
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let (store, _dir) = open_tmp().await;
        store.create(session("s1")).await.unwrap();
        store.append_message("s1", message("user", "hi")).await.unwrap();
        store.delete("s1").await.unwrap();
        let (page, meta) = store.page_messages("s1", None, None).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(meta.total, 0);
    }

    #[tokio::test]
    async fn page_messages_with_no_cursor_returns_most_recent() {
        let (store, _dir) = open_tmp().await;
        store.create(session("s1")).await.unwrap();
        for i in 0..5 {
            store.append_message("s1", message("user", &format!("m{i}"))).await.unwrap();
        }
        let (page, meta) = store.page_messages("s1", None, Some(2)).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "m3");
        assert_eq!(page[1].content, "m4");
        assert_eq!(meta.total, 5);
        assert_eq!(meta.limit_used, 2);
        assert!(meta.prev_cursor.is_some());
    }

    #[tokio::test]
    async fn successive_pages_walk_backward_without_overlap_or_gap() {
        let (store, _dir) = open_tmp().await;
        store.create(session("s1")).await.unwrap();
        for i in 0..10 {
            store.append_message("s1", message("user", &format!("m{i}"))).await.unwrap();
        }
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let (page, meta) = store.page_messages("s1", cursor.clone(), Some(3)).await.unwrap();
            let contents: Vec<String> = page.iter().map(|m| m.content.clone()).collect();
            seen.splice(0..0, contents);
            match meta.prev_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn limit_is_clamped_to_max() {
        let (store, _dir) = open_tmp().await;
        store.create(session("s1")).await.unwrap();
        let (_, meta) = store.page_messages("s1", None, Some(10_000)).await.unwrap();
        assert_eq!(meta.limit_used, 200);
    }

    #[tokio::test]
    async fn limit_zero_falls_back_to_default() {
        let (store, _dir) = open_tmp().await;
        store.create(session("s1")).await.unwrap();
        let (_, meta) = store.page_messages("s1", None, Some(0)).await.unwrap();
        assert_eq!(meta.limit_used, DEFAULT_LIMIT);
    }

    #[tokio::test]
    async fn empty_cursor_behaves_like_no_cursor() {
        let (store, _dir) = open_tmp().await;
        store.create(session("s1")).await.unwrap();
        for i in 0..3 {
            store.append_message("s1", message("user", &format!("m{i}"))).await.unwrap();
        }
        let (page, _meta) = store.page_messages("s1", Some(String::new()), None).await.unwrap();
        assert_eq!(page.len(), 3);
    }

    #[tokio::test]
    async fn malformed_cursor_is_cursor_invalid_not_generic_sqlite_error() {
        let (store, _dir) = open_tmp().await;
        store.create(session("s1")).await.unwrap();
        let err = store.page_messages("s1", Some("not-a-number".into()), None).await.unwrap_err();
        assert!(matches!(err, StoreError::CursorInvalid(_)));
    }

    #[tokio::test]
    async fn list_orders_by_created_at_descending() {
        let (store, _dir) = open_tmp().await;
        store.create(session("s1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create(session("s2")).await.unwrap();
        let summaries = store.list().await.unwrap();
        assert_eq!(summaries[0].id, "s2");
    }
}
