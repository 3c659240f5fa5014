//! SQLite sink: a single `events` table tuned for bulk loading.

use std::path::Path;

use chrono::SecondsFormat;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::event::Event;

use super::{Sink, SinkError, FLUSH_INTERVAL};

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    source TEXT NOT NULL,
    event_type TEXT NOT NULL,
    event_id INTEGER NOT NULL,
    user TEXT,
    host TEXT,
    message TEXT,
    path TEXT,
    tags TEXT,
    score REAL,
    summary TEXT
);
";

const INSERT: &str = "
INSERT INTO events (
    timestamp, source, event_type, event_id, user, host, message, path, tags, score, summary
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);
";

pub struct SqliteSink {
    conn: Connection,
    pending: usize,
}

impl SqliteSink {
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let conn = Connection::open(path)?;

        // The database is written from scratch, so durability can be
        // traded away for load throughput until close() restores it.
        conn.pragma_update(None, "journal_mode", "MEMORY")?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.pragma_update(None, "cache_size", -64_000)?;
        conn.pragma_update(None, "locking_mode", "EXCLUSIVE")?;

        conn.execute_batch(CREATE_TABLE)?;
        conn.execute_batch("BEGIN;")?;

        Ok(Self { conn, pending: 0 })
    }
}

impl Sink for SqliteSink {
    fn write(&mut self, events: &[Event]) -> Result<(), SinkError> {
        for event in events {
            // prepare_cached keeps this a single compiled statement for
            // the life of the connection.
            let mut stmt = self.conn.prepare_cached(INSERT)?;
            stmt.execute(params![
                event.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                event.source,
                event.event_type,
                event.event_id,
                event.user,
                event.host,
                event.message,
                event.path,
                event.tags.join(","),
                event.score,
                event.summary,
            ])?;
            drop(stmt);

            self.pending += 1;
            if self.pending >= FLUSH_INTERVAL {
                self.conn.execute_batch("COMMIT; BEGIN;")?;
                self.pending = 0;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.conn.execute_batch("COMMIT;")?;

        // Index creation is deferred to here: inserting into an
        // unindexed table is substantially cheaper than maintaining the
        // index row by row.
        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp);",
        )?;

        self.conn.pragma_update(None, "synchronous", "FULL")?;
        self.conn.pragma_update(None, "journal_mode", "DELETE")?;

        debug!("sqlite sink finalized");
        Ok(())
    }
}
