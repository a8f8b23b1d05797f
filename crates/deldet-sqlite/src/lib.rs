//! SQLite adapter for the message ledger.
//!
//! The detector shares this database with the relay coordinator, so the
//! connection uses WAL mode and a busy timeout, and startup tolerates a
//! co-located process still holding the file.

use std::{cmp, path::Path, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{info, warn};

use deldet_core::{
    domain::{ChatId, MappingId, MessageId, SeenMessage, TrackedMessage},
    ports::{MarkOutcome, MessageLedger},
    Error, Result,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tracked_messages (
    message_id  INTEGER PRIMARY KEY,
    chat_id     INTEGER NOT NULL,
    mapping_id  TEXT,
    content     TEXT NOT NULL DEFAULT '',
    is_deleted  INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    deleted_at  TEXT
);
CREATE INDEX IF NOT EXISTS idx_tracked_messages_mapping
    ON tracked_messages (mapping_id);
";

#[derive(Debug)]
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::init(conn)
    }

    /// In-memory database, mainly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn)
    }

    /// Open with capped exponential backoff. A co-located process may
    /// still be starting and holding the database locked; crashing
    /// immediately would just make the supervisor spin.
    pub async fn open_with_retries(path: &Path, max_attempts: u32) -> Result<Self> {
        let mut delay = Duration::from_secs(2);
        for attempt in 1..=max_attempts.max(1) {
            match Self::open(path) {
                Ok(ledger) => {
                    if attempt > 1 {
                        info!(attempt, "storage opened after retries");
                    }
                    return Ok(ledger);
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "storage not ready, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = cmp::min(delay.mul_f64(1.5), Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("loop returns on the final attempt")
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(storage_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(storage_err)?;
        conn.busy_timeout(Duration::from_millis(5000))
            .map_err(storage_err)?;
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl MessageLedger for SqliteLedger {
    async fn record_seen(&self, msg: &SeenMessage) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO tracked_messages (message_id, chat_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                msg.message_id.0,
                msg.chat_id.0,
                msg.preview,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn attach_mapping(&self, id: MessageId, mapping: &MappingId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tracked_messages SET mapping_id = ?2
             WHERE message_id = ?1 AND mapping_id IS NULL",
            params![id.0, mapping.0],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn mark_deleted(&self, id: MessageId) -> Result<MarkOutcome> {
        let conn = self.conn.lock().await;

        // Conditional update + affected-row count: exactly one caller
        // can flip is_deleted, no matter how many race.
        let changed = conn
            .execute(
                "UPDATE tracked_messages SET is_deleted = 1, deleted_at = ?2
                 WHERE message_id = ?1 AND is_deleted = 0",
                params![id.0, Utc::now().to_rfc3339()],
            )
            .map_err(storage_err)?;

        if changed == 1 {
            // Mapping as of mark time; it may have been attached after
            // the message was first seen.
            let mapping: Option<String> = conn
                .query_row(
                    "SELECT mapping_id FROM tracked_messages WHERE message_id = ?1",
                    params![id.0],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            return Ok(MarkOutcome::Marked {
                mapping_id: mapping.map(MappingId),
            });
        }

        let exists: Option<i32> = conn
            .query_row(
                "SELECT 1 FROM tracked_messages WHERE message_id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;

        if exists.is_some() {
            Ok(MarkOutcome::AlreadyDeleted)
        } else {
            Ok(MarkOutcome::NotTracked)
        }
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<TrackedMessage>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT message_id, chat_id, mapping_id, content, is_deleted, created_at, deleted_at
                 FROM tracked_messages WHERE message_id = ?1",
                params![id.0],
                row_to_raw,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(raw_to_tracked).transpose()
    }

    async fn find_by_mapping(&self, mapping: &MappingId) -> Result<Option<TrackedMessage>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT message_id, chat_id, mapping_id, content, is_deleted, created_at, deleted_at
                 FROM tracked_messages WHERE mapping_id = ?1",
                params![mapping.0],
                row_to_raw,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(raw_to_tracked).transpose()
    }
}

type RawRow = (i32, i64, Option<String>, String, bool, String, Option<String>);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn raw_to_tracked(raw: RawRow) -> Result<TrackedMessage> {
    let (message_id, chat_id, mapping_id, preview, is_deleted, created_at, deleted_at) = raw;
    Ok(TrackedMessage {
        message_id: MessageId(message_id),
        chat_id: ChatId(chat_id),
        mapping_id: mapping_id.map(MappingId),
        preview,
        is_deleted,
        created_at: parse_ts(&created_at)?,
        deleted_at: deleted_at.as_deref().map(parse_ts).transpose()?,
    })
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("bad timestamp {s:?}: {e}")))
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use deldet_core::domain::OriginClass;

    use super::*;

    fn seen(id: i32) -> SeenMessage {
        SeenMessage {
            chat_id: ChatId(-100),
            message_id: MessageId(id),
            origin: OriginClass::Human,
            preview: "preview".to_string(),
        }
    }

    fn ledger() -> SqliteLedger {
        SqliteLedger::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn record_seen_is_idempotent() {
        let ledger = ledger();
        ledger.record_seen(&seen(1)).await.unwrap();
        ledger.record_seen(&seen(1)).await.unwrap();

        let row = ledger.find_by_id(MessageId(1)).await.unwrap().unwrap();
        assert_eq!(row.message_id, MessageId(1));
        assert_eq!(row.chat_id, ChatId(-100));
        assert!(!row.is_deleted);
        assert!(row.deleted_at.is_none());
    }

    #[tokio::test]
    async fn attach_mapping_sets_once_and_is_readable() {
        let ledger = ledger();
        ledger.record_seen(&seen(2)).await.unwrap();

        ledger
            .attach_mapping(MessageId(2), &MappingId("first".to_string()))
            .await
            .unwrap();
        ledger
            .attach_mapping(MessageId(2), &MappingId("second".to_string()))
            .await
            .unwrap();

        let row = ledger.find_by_id(MessageId(2)).await.unwrap().unwrap();
        assert_eq!(row.mapping_id, Some(MappingId("first".to_string())));

        let by_mapping = ledger
            .find_by_mapping(&MappingId("first".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_mapping.message_id, MessageId(2));
    }

    #[tokio::test]
    async fn only_the_first_mark_wins() {
        let ledger = ledger();
        ledger.record_seen(&seen(3)).await.unwrap();
        ledger
            .attach_mapping(MessageId(3), &MappingId("m3".to_string()))
            .await
            .unwrap();

        let first = ledger.mark_deleted(MessageId(3)).await.unwrap();
        assert_eq!(
            first,
            MarkOutcome::Marked {
                mapping_id: Some(MappingId("m3".to_string()))
            }
        );

        let second = ledger.mark_deleted(MessageId(3)).await.unwrap();
        assert_eq!(second, MarkOutcome::AlreadyDeleted);
    }

    #[tokio::test]
    async fn mark_returns_mapping_attached_after_seen() {
        let ledger = ledger();
        ledger.record_seen(&seen(4)).await.unwrap();

        // Mapping arrives late (the relay lags message creation).
        ledger
            .attach_mapping(MessageId(4), &MappingId("late".to_string()))
            .await
            .unwrap();

        let out = ledger.mark_deleted(MessageId(4)).await.unwrap();
        assert_eq!(
            out,
            MarkOutcome::Marked {
                mapping_id: Some(MappingId("late".to_string()))
            }
        );
    }

    #[tokio::test]
    async fn deletion_is_monotonic() {
        let ledger = ledger();
        ledger.record_seen(&seen(5)).await.unwrap();
        ledger.mark_deleted(MessageId(5)).await.unwrap();

        let deleted_at = ledger
            .find_by_id(MessageId(5))
            .await
            .unwrap()
            .unwrap()
            .deleted_at
            .unwrap();

        // Re-recording or re-marking never reverts the flag or moves
        // the deletion timestamp.
        ledger.record_seen(&seen(5)).await.unwrap();
        ledger.mark_deleted(MessageId(5)).await.unwrap();

        let row = ledger.find_by_id(MessageId(5)).await.unwrap().unwrap();
        assert!(row.is_deleted);
        assert_eq!(row.deleted_at.unwrap(), deleted_at);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_open_retries_then_gives_up() {
        // A directory can never be opened as a database file, so every
        // attempt fails and the bounded backoff budget is exhausted.
        let dir = std::env::temp_dir();

        let err = SqliteLedger::open_with_retries(&dir, 3).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn marking_an_unknown_message_reports_not_tracked() {
        let ledger = ledger();
        let out = ledger.mark_deleted(MessageId(999)).await.unwrap();
        assert_eq!(out, MarkOutcome::NotTracked);
    }

    #[tokio::test]
    async fn mark_without_mapping_returns_none() {
        let ledger = ledger();
        ledger.record_seen(&seen(6)).await.unwrap();

        let out = ledger.mark_deleted(MessageId(6)).await.unwrap();
        assert_eq!(out, MarkOutcome::Marked { mapping_id: None });
    }
}
