//! SQLite-backed schedule store — survives restarts, supports concurrent
//! access through a single connection behind a mutex.
//!
//! All mutation goes through the narrow contract here (create, claim,
//! mark_sent, mark_failed, requeue, cancel, delete); the conditional claim
//! UPDATE is the sole point of write-write race resolution. Timestamps are
//! stored as RFC 3339 TEXT, which compares correctly for UTC values.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use zapline_core::error::{Result, ZaplineError};
use zapline_core::types::{Recipient, RecipientKind, Schedule, ScheduleStatus};

/// Durable mapping from schedule ID to Schedule record.
pub struct ScheduleStore {
    conn: Mutex<Connection>,
}

fn store_err(context: &str, e: rusqlite::Error) -> ZaplineError {
    ZaplineError::Store(format!("{context}: {e}"))
}

impl ScheduleStore {
    /// Open or create the schedule database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ZaplineError::Store(format!("create store dir: {e}")))?;
        }
        let conn =
            Connection::open(path).map_err(|e| store_err("open schedule db", e))?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| store_err("open in-memory db", e))?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                recipient TEXT NOT NULL,
                recipient_kind TEXT NOT NULL,     -- 'private' | 'group'
                message TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                sent_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_schedules_due
                ON schedules(status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_schedules_created
                ON schedules(created_at);
            ",
        )
        .map_err(|e| store_err("migration", e))
    }

    /// Validate and persist a new pending schedule due `offset_minutes`
    /// from now.
    pub fn create(
        &self,
        recipient: Recipient,
        message: &str,
        offset_minutes: i64,
    ) -> Result<Schedule> {
        let schedule = Schedule::new(recipient, message, offset_minutes)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO schedules
             (id, recipient, recipient_kind, message, scheduled_at, status,
              created_at, attempt_count, last_error, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                schedule.id,
                schedule.recipient.value,
                schedule.recipient.kind.to_string(),
                schedule.message,
                schedule.scheduled_at.to_rfc3339(),
                schedule.status.as_str(),
                schedule.created_at.to_rfc3339(),
                schedule.attempt_count,
                schedule.last_error,
                schedule.sent_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| store_err("insert schedule", e))?;
        tracing::debug!(id = %schedule.id, due = %schedule.scheduled_at, "schedule created");
        Ok(schedule)
    }

    /// Fetch one schedule by ID.
    pub fn get(&self, id: &str) -> Result<Schedule> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM schedules WHERE id = ?1"))
            .map_err(|e| store_err("prepare get", e))?;
        let mut rows = stmt
            .query_map([id], row_to_schedule)
            .map_err(|e| store_err("query get", e))?;
        match rows.next() {
            Some(row) => row.map_err(|e| store_err("read schedule row", e)),
            None => Err(ZaplineError::NotFound(id.to_string())),
        }
    }

    /// Pending schedules due as of `as_of`, earliest first. The ascending
    /// order bounds worst-case staleness for the oldest overdue item.
    pub fn list_due(&self, as_of: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM schedules
                 WHERE status = 'pending' AND scheduled_at <= ?1
                 ORDER BY scheduled_at ASC"
            ))
            .map_err(|e| store_err("prepare list_due", e))?;
        let rows = stmt
            .query_map([as_of.to_rfc3339()], row_to_schedule)
            .map_err(|e| store_err("query list_due", e))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| store_err("read due rows", e))
    }

    /// Most-recent-first history listing, optionally filtered by status.
    pub fn list_recent(
        &self,
        limit: usize,
        status: Option<ScheduleStatus>,
    ) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().unwrap();
        let rows = match status {
            Some(status) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {COLUMNS} FROM schedules WHERE status = ?1
                         ORDER BY created_at DESC LIMIT ?2"
                    ))
                    .map_err(|e| store_err("prepare list_recent", e))?;
                let rows = stmt
                    .query_map(params![status.as_str(), limit as i64], row_to_schedule)
                    .map_err(|e| store_err("query list_recent", e))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {COLUMNS} FROM schedules
                         ORDER BY created_at DESC LIMIT ?1"
                    ))
                    .map_err(|e| store_err("prepare list_recent", e))?;
                let rows = stmt
                    .query_map([limit as i64], row_to_schedule)
                    .map_err(|e| store_err("query list_recent", e))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
            }
        };
        rows.map_err(|e| store_err("read recent rows", e))
    }

    /// Atomically claim a pending schedule for dispatch. Returns whether
    /// this caller won; a concurrent tick or a racing cancel makes it lose.
    pub fn claim(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE schedules SET status = 'in_flight'
                 WHERE id = ?1 AND status = 'pending'",
                [id],
            )
            .map_err(|e| store_err("claim schedule", e))?;
        Ok(changed == 1)
    }

    /// Terminal success. Silent no-op if the schedule is no longer claimed,
    /// to tolerate races with a concurrent cancel.
    pub fn mark_sent(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE schedules SET status = 'sent', sent_at = ?1
             WHERE id = ?2 AND status = 'in_flight'",
            params![Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| store_err("mark sent", e))?;
        Ok(())
    }

    /// Terminal failure. Counts the attempt that produced `error`.
    /// Silent no-op if the schedule is no longer claimed.
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE schedules
             SET status = 'failed', attempt_count = attempt_count + 1, last_error = ?1
             WHERE id = ?2 AND status = 'in_flight'",
            params![error, id],
        )
        .map_err(|e| store_err("mark failed", e))?;
        Ok(())
    }

    /// Retry transition: back to pending with the attempt recorded and the
    /// due time pushed to `next_at`. Silent no-op if no longer claimed.
    pub fn requeue(&self, id: &str, error: &str, next_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE schedules
             SET status = 'pending', attempt_count = attempt_count + 1,
                 last_error = ?1, scheduled_at = ?2
             WHERE id = ?3 AND status = 'in_flight'",
            params![error, next_at.to_rfc3339(), id],
        )
        .map_err(|e| store_err("requeue", e))?;
        Ok(())
    }

    /// Cancel a pending schedule. `Conflict` if it is in any other state.
    pub fn cancel(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE schedules SET status = 'cancelled'
                 WHERE id = ?1 AND status = 'pending'",
                [id],
            )
            .map_err(|e| store_err("cancel schedule", e))?;
        if changed == 1 {
            tracing::info!(id, "schedule cancelled");
            return Ok(());
        }
        match Self::status_of(&conn, id)? {
            Some(status) => Err(ZaplineError::Conflict(format!(
                "cannot cancel schedule in state {}",
                status.as_str()
            ))),
            None => Err(ZaplineError::NotFound(id.to_string())),
        }
    }

    /// Remove a terminal schedule record. `Conflict` while it is still
    /// pending or claimed (must cancel first).
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "DELETE FROM schedules
                 WHERE id = ?1 AND status NOT IN ('pending', 'in_flight')",
                [id],
            )
            .map_err(|e| store_err("delete schedule", e))?;
        if changed == 1 {
            return Ok(());
        }
        match Self::status_of(&conn, id)? {
            Some(status) => Err(ZaplineError::Conflict(format!(
                "cannot delete schedule in state {}, cancel it first",
                status.as_str()
            ))),
            None => Err(ZaplineError::NotFound(id.to_string())),
        }
    }

    /// Per-status record counts for the stats aggregator.
    pub fn status_counts(&self) -> Result<Vec<(ScheduleStatus, u64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM schedules GROUP BY status")
            .map_err(|e| store_err("prepare status_counts", e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })
            .map_err(|e| store_err("query status_counts", e))?;
        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row.map_err(|e| store_err("read count row", e))?;
            counts.push((status.parse::<ScheduleStatus>()?, count));
        }
        Ok(counts)
    }

    /// Reset claims stranded by a crashed process back to pending so they
    /// are re-attempted. Called once at dispatcher startup.
    pub fn recover_stranded(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE schedules SET status = 'pending' WHERE status = 'in_flight'",
                [],
            )
            .map_err(|e| store_err("recover stranded claims", e))?;
        if changed > 0 {
            tracing::warn!(count = changed, "recovered stranded in-flight schedules");
        }
        Ok(changed)
    }

    fn status_of(conn: &Connection, id: &str) -> Result<Option<ScheduleStatus>> {
        let mut stmt = conn
            .prepare("SELECT status FROM schedules WHERE id = ?1")
            .map_err(|e| store_err("prepare status lookup", e))?;
        let mut rows = stmt
            .query_map([id], |row| row.get::<_, String>(0))
            .map_err(|e| store_err("query status lookup", e))?;
        match rows.next() {
            Some(row) => {
                let status = row.map_err(|e| store_err("read status row", e))?;
                Ok(Some(status.parse()?))
            }
            None => Ok(None),
        }
    }
}

const COLUMNS: &str = "id, recipient, recipient_kind, message, scheduled_at, \
                       status, created_at, attempt_count, last_error, sent_at";

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    let kind_str: String = row.get(2)?;
    let scheduled_at_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let created_at_str: String = row.get(6)?;
    let sent_at_str: Option<String> = row.get(9)?;

    let kind = kind_str
        .parse::<RecipientKind>()
        .unwrap_or(RecipientKind::Private);
    let status = status_str
        .parse::<ScheduleStatus>()
        .unwrap_or(ScheduleStatus::Failed);

    Ok(Schedule {
        id: row.get(0)?,
        recipient: Recipient {
            value: row.get(1)?,
            kind,
        },
        message: row.get(3)?,
        scheduled_at: parse_ts(&scheduled_at_str),
        status,
        created_at: parse_ts(&created_at_str),
        attempt_count: row.get(7)?,
        last_error: row.get(8)?,
        sent_at: sent_at_str.map(|s| parse_ts(&s)),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
