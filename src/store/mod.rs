// =============================================================================
// Change-gated append store — SQLite-backed per-symbol series
// =============================================================================
//
// Two static tables, `candles` and `value_history`, each keyed by a symbol
// column. A series for a symbol exists as soon as its first row is written;
// there are no per-symbol tables and no dynamically constructed identifiers.
//
// Writes are change-gated: a record is inserted only when its compared field
// (candle close, or the raw value) differs from the newest stored row for
// that symbol, by exact f64 inequality. Every insert synchronously trims the
// series to its retention cap, oldest rows first.
//
// The connection is the process-wide shared handle: opened once at startup
// and serialized behind a mutex. Single-statement atomicity is all the
// concurrency the design needs — the scheduler writes symbols sequentially
// and readers never observe a partial row.
// =============================================================================

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::types::{AppendOutcome, Candle, SeriesKind, ValuePoint};

impl SeriesKind {
    /// Static table name for this series kind.
    fn table(self) -> &'static str {
        match self {
            Self::Candles => "candles",
            Self::ValueHistory => "value_history",
        }
    }
}

/// SQLite-backed store for both per-symbol series.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
    candle_retention: usize,
    value_retention: usize,
}

impl SnapshotStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    ///
    /// Parent directories are created as needed; schema creation is
    /// idempotent (`CREATE TABLE IF NOT EXISTS`).
    pub fn open(
        path: impl AsRef<Path>,
        candle_retention: usize,
        value_retention: usize,
    ) -> Result<Self, FeedError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    FeedError::StoreUnavailable(format!(
                        "failed to create db directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        init_schema(&conn)?;

        info!(path = %path.display(), "snapshot store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            candle_retention,
            value_retention,
        })
    }

    /// Open an in-memory store. Test-only convenience; same schema.
    #[cfg(test)]
    pub fn open_in_memory(
        candle_retention: usize,
        value_retention: usize,
    ) -> Result<Self, FeedError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            candle_retention,
            value_retention,
        })
    }

    // ── Change-gated appends ────────────────────────────────────────────

    /// Append `candle` to the symbol's candle series unless its close equals
    /// the newest stored close. On insert, the series is trimmed to the
    /// candle retention cap.
    pub fn append_candle_if_changed(
        &self,
        symbol: &str,
        candle: &Candle,
    ) -> Result<AppendOutcome, FeedError> {
        let conn = self.conn.lock();

        let last_close: Option<f64> = conn
            .query_row(
                "SELECT close FROM candles WHERE symbol = ?1 ORDER BY id DESC LIMIT 1",
                params![symbol],
                |row| row.get(0),
            )
            .optional()?;

        // Exact comparison, mirroring the strict `!==` gate of the feed's
        // original design. NaN never reaches here (parse enforces finite).
        if last_close == Some(candle.close) {
            debug!(symbol = %symbol, close = candle.close, "candle unchanged — skipped");
            return Ok(AppendOutcome::Skipped);
        }

        conn.execute(
            "INSERT INTO candles (symbol, open, high, low, close, time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                symbol,
                candle.open,
                candle.high,
                candle.low,
                candle.close,
                candle.time.to_rfc3339(),
            ],
        )?;

        enforce_retention(&conn, SeriesKind::Candles, symbol, self.candle_retention)?;

        debug!(symbol = %symbol, close = candle.close, "candle appended");
        Ok(AppendOutcome::Inserted)
    }

    /// Append a value point to the symbol's value history unless `value`
    /// equals the newest stored value. On insert, the series is trimmed to
    /// the value retention cap.
    ///
    /// This gate is independent of the candle gate even though both compare
    /// the same source field — the two series may diverge.
    pub fn append_value_if_changed(
        &self,
        symbol: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<AppendOutcome, FeedError> {
        let conn = self.conn.lock();

        let last_value: Option<f64> = conn
            .query_row(
                "SELECT value FROM value_history WHERE symbol = ?1 ORDER BY id DESC LIMIT 1",
                params![symbol],
                |row| row.get(0),
            )
            .optional()?;

        if last_value == Some(value) {
            debug!(symbol = %symbol, value, "value unchanged — skipped");
            return Ok(AppendOutcome::Skipped);
        }

        conn.execute(
            "INSERT INTO value_history (symbol, value, time) VALUES (?1, ?2, ?3)",
            params![symbol, value, timestamp.to_rfc3339()],
        )?;

        enforce_retention(&conn, SeriesKind::ValueHistory, symbol, self.value_retention)?;

        debug!(symbol = %symbol, value, "value point appended");
        Ok(AppendOutcome::Inserted)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Full candle series for a symbol, oldest first. Rows with an
    /// unparseable stored timestamp are skipped with a warning.
    pub fn candles(&self, symbol: &str) -> Result<Vec<Candle>, FeedError> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT open, high, low, close, time FROM candles
             WHERE symbol = ?1 ORDER BY id",
        )?;

        let rows: Vec<(f64, f64, f64, f64, String)> = stmt
            .query_map(params![symbol], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let candles = rows
            .into_iter()
            .filter_map(|(open, high, low, close, time)| match parse_time(&time) {
                Some(time) => Some(Candle {
                    time,
                    open,
                    high,
                    low,
                    close,
                }),
                None => {
                    warn!(symbol = %symbol, time = %time, "skipping candle with bad timestamp");
                    None
                }
            })
            .collect();

        Ok(candles)
    }

    /// Full value history for a symbol, oldest first.
    pub fn value_history(&self, symbol: &str) -> Result<Vec<ValuePoint>, FeedError> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT value, time FROM value_history WHERE symbol = ?1 ORDER BY id",
        )?;

        let rows: Vec<(f64, String)> = stmt
            .query_map(params![symbol], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let points = rows
            .into_iter()
            .filter_map(|(value, time)| match parse_time(&time) {
                Some(timestamp) => Some(ValuePoint { value, timestamp }),
                None => {
                    warn!(symbol = %symbol, time = %time, "skipping value point with bad timestamp");
                    None
                }
            })
            .collect();

        Ok(points)
    }

    /// Newest candle for a symbol, if any.
    pub fn latest_candle(&self, symbol: &str) -> Result<Option<Candle>, FeedError> {
        let conn = self.conn.lock();

        let row: Option<(f64, f64, f64, f64, String)> = conn
            .query_row(
                "SELECT open, high, low, close, time FROM candles
                 WHERE symbol = ?1 ORDER BY id DESC LIMIT 1",
                params![symbol],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.and_then(|(open, high, low, close, time)| {
            parse_time(&time).map(|time| Candle {
                time,
                open,
                high,
                low,
                close,
            })
        }))
    }

    /// Newest value point for a symbol, if any.
    pub fn latest_value(&self, symbol: &str) -> Result<Option<ValuePoint>, FeedError> {
        let conn = self.conn.lock();

        let row: Option<(f64, String)> = conn
            .query_row(
                "SELECT value, time FROM value_history
                 WHERE symbol = ?1 ORDER BY id DESC LIMIT 1",
                params![symbol],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(value, time)| {
            parse_time(&time).map(|timestamp| ValuePoint { value, timestamp })
        }))
    }

    /// Number of rows stored for a symbol in one series.
    pub fn series_len(&self, symbol: &str, kind: SeriesKind) -> Result<usize, FeedError> {
        let conn = self.conn.lock();
        let sql = match kind {
            SeriesKind::Candles => "SELECT COUNT(*) FROM candles WHERE symbol = ?1",
            SeriesKind::ValueHistory => "SELECT COUNT(*) FROM value_history WHERE symbol = ?1",
        };
        let count: i64 = conn.query_row(sql, params![symbol], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// =============================================================================
// Schema & retention
// =============================================================================

fn init_schema(conn: &Connection) -> Result<(), FeedError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS candles (
            id     INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            open   REAL NOT NULL,
            high   REAL NOT NULL,
            low    REAL NOT NULL,
            close  REAL NOT NULL,
            time   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_candles_symbol ON candles (symbol, id);

        CREATE TABLE IF NOT EXISTS value_history (
            id     INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            value  REAL NOT NULL,
            time   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_value_history_symbol ON value_history (symbol, id);",
    )?;
    Ok(())
}

/// Delete all rows for `symbol` except the `capacity` most recent, by
/// insertion order. Runs synchronously as part of the same logical write.
fn enforce_retention(
    conn: &Connection,
    kind: SeriesKind,
    symbol: &str,
    capacity: usize,
) -> Result<(), FeedError> {
    let table = kind.table();
    let sql = format!(
        "DELETE FROM {table}
         WHERE symbol = ?1 AND id NOT IN (
             SELECT id FROM {table} WHERE symbol = ?1 ORDER BY id DESC LIMIT ?2
         )"
    );
    let deleted = conn.execute(&sql, params![symbol, capacity as i64])?;
    if deleted > 0 {
        debug!(symbol = %symbol, kind = %kind, deleted, "retention enforced");
    }
    Ok(())
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// =============================================================================
// Tests
// =============================================================================
