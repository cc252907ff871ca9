//! Delivery ledger for the feed relay bot.
//!
//! Records which feed items have been seen and which have been delivered to
//! the channel, using `rusqlite`.
//!
//! # Durability
//!
//! Every mutation is committed before the call returns, so a restarted
//! process resumes from disk and never re-derives state from memory. Because
//! [`Ledger::record_seen`] and [`Ledger::mark_delivered`] are separate
//! commits with a chat send in between, delivery is at-least-once: a crash
//! after the send but before the mark redelivers the item on restart.
//!
//! # Thread Safety
//!
//! The [`Ledger`] type wraps a `rusqlite::Connection`, which is `Send` but not
//! `Sync`. Share it across tasks behind a `Mutex`, or give each writer its own
//! `Ledger` on the same file; `record_seen` runs in an immediate transaction
//! so concurrent writers cannot create duplicate records.
//!
//! # Schema
//!
//! `first_seen` is stored as TEXT in RFC 3339 format with second precision
//! (e.g. `2024-01-15T10:30:00Z`), so lexicographic order matches
//! chronological order.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use fr_core::DeliveryRecord;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use thiserror::Error;

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `mark_delivered` was called for an item that was never recorded.
    #[error("no delivery record for item {0}")]
    NotFound(String),
    /// A stored `first_seen` value could not be parsed.
    #[error("invalid first_seen for item {external_id}: {timestamp}")]
    TimestampParse {
        external_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Counts of recorded items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerSummary {
    pub total: usize,
    pub delivered: usize,
    pub pending: usize,
}

/// Persistent store of seen and delivered feed items.
///
/// See the [module documentation](self) for durability and thread safety.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Opens a ledger at the given path, creating it if necessary.
    ///
    /// The schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        let ledger = Self { conn };
        ledger.init()?;
        tracing::debug!(path = %path.display(), "opened delivery ledger");
        Ok(ledger)
    }

    /// Opens an in-memory ledger.
    ///
    /// Useful for testing. The ledger is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self { conn };
        ledger.init()?;
        Ok(ledger)
    }

    /// Initializes the schema.
    ///
    /// This is idempotent - safe to call on an already-initialized ledger.
    fn init(&self) -> Result<(), LedgerError> {
        self.conn.execute_batch(
            "
            -- One row per external item, never deleted.
            -- delivered: 0 until the item has been sent to the channel, then 1
            -- first_seen: RFC 3339 UTC timestamp (e.g. '2024-01-15T10:30:00Z')
            CREATE TABLE IF NOT EXISTS deliveries (
                external_id TEXT PRIMARY KEY,
                source_identity TEXT NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0,
                first_seen TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_deliveries_source ON deliveries(source_identity);
            ",
        )?;
        Ok(())
    }

    /// Looks up the record for `external_id`.
    pub fn lookup(&self, external_id: &str) -> Result<Option<DeliveryRecord>, LedgerError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT external_id, source_identity, delivered, first_seen
                FROM deliveries
                WHERE external_id = ?
                ",
                [external_id],
                raw_row,
            )
            .optional()?;
        row.map(RawRow::into_record).transpose()
    }

    /// Records that `external_id` has been observed.
    ///
    /// Idempotent: if the item is already recorded, the existing record is
    /// returned unchanged.
    pub fn record_seen(
        &mut self,
        external_id: &str,
        source_identity: &str,
    ) -> Result<DeliveryRecord, LedgerError> {
        self.record_seen_at(external_id, source_identity, Utc::now())
    }

    fn record_seen_at(
        &mut self,
        external_id: &str,
        source_identity: &str,
        now: DateTime<Utc>,
    ) -> Result<DeliveryRecord, LedgerError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "
            INSERT OR IGNORE INTO deliveries (external_id, source_identity, delivered, first_seen)
            VALUES (?, ?, 0, ?)
            ",
            params![external_id, source_identity, format_timestamp(now)],
        )?;
        let row = tx.query_row(
            "
            SELECT external_id, source_identity, delivered, first_seen
            FROM deliveries
            WHERE external_id = ?
            ",
            [external_id],
            raw_row,
        )?;
        tx.commit()?;

        if inserted > 0 {
            tracing::debug!(external_id, source_identity, "recorded new item");
        }
        row.into_record()
    }

    /// Marks `external_id` as delivered.
    ///
    /// A no-op if it is already delivered.
    pub fn mark_delivered(&mut self, external_id: &str) -> Result<(), LedgerError> {
        let updated = self.conn.execute(
            "UPDATE deliveries SET delivered = 1 WHERE external_id = ?",
            [external_id],
        )?;
        if updated == 0 {
            return Err(LedgerError::NotFound(external_id.to_string()));
        }
        Ok(())
    }

    /// Counts recorded, delivered and pending items.
    pub fn summary(&self) -> Result<LedgerSummary, LedgerError> {
        let (total, delivered): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(delivered), 0) FROM deliveries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let total = usize::try_from(total).unwrap_or_default();
        let delivered = usize::try_from(delivered).unwrap_or_default();
        Ok(LedgerSummary {
            total,
            delivered,
            pending: total.saturating_sub(delivered),
        })
    }

    /// Lists up to `limit` records, most recently seen first.
    pub fn recent(&self, limit: usize) -> Result<Vec<DeliveryRecord>, LedgerError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "
            SELECT external_id, source_identity, delivered, first_seen
            FROM deliveries
            ORDER BY first_seen DESC, external_id DESC
            LIMIT ?
            ",
        )?;
        let rows = stmt.query_map([limit], raw_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

/// Row as stored, before the timestamp is parsed.
struct RawRow {
    external_id: String,
    source_identity: String,
    delivered: bool,
    first_seen: String,
}

impl RawRow {
    fn into_record(self) -> Result<DeliveryRecord, LedgerError> {
        let first_seen = DateTime::parse_from_rfc3339(&self.first_seen)
            .map_err(|source| LedgerError::TimestampParse {
                external_id: self.external_id.clone(),
                timestamp: self.first_seen.clone(),
                source,
            })?
            .with_timezone(&Utc);
        Ok(DeliveryRecord {
            external_id: self.external_id,
            source_identity: self.source_identity,
            delivered: self.delivered,
            first_seen,
        })
    }
}

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        external_id: row.get(0)?,
        source_identity: row.get(1)?,
        delivered: row.get(2)?,
        first_seen: row.get(3)?,
    })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn open_in_memory_ledger() {
        assert!(Ledger::open_in_memory().is_ok());
    }

    #[test]
    fn schema_matches_data_model() {
        let ledger = Ledger::open_in_memory().expect("open in-memory ledger");
        assert_eq!(
            table_columns(&ledger.conn, "deliveries"),
            vec!["external_id", "source_identity", "delivered", "first_seen"]
        );
    }

    #[test]
    fn lookup_missing_item_returns_none() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert_eq!(ledger.lookup("42").unwrap(), None);
    }

    #[test]
    fn record_seen_creates_undelivered_record() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        let record = ledger
            .record_seen_at("42", "newsyc150", ts("2025-01-01T00:00:00Z"))
            .unwrap();
        assert_eq!(
            record,
            DeliveryRecord {
                external_id: "42".to_string(),
                source_identity: "newsyc150".to_string(),
                delivered: false,
                first_seen: ts("2025-01-01T00:00:00Z"),
            }
        );
        assert_eq!(ledger.lookup("42").unwrap(), Some(record));
    }

    #[test]
    fn record_seen_is_idempotent() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        let first = ledger
            .record_seen_at("42", "newsyc150", ts("2025-01-01T00:00:00Z"))
            .unwrap();
        let second = ledger
            .record_seen_at("42", "someone-else", ts("2025-02-01T00:00:00Z"))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.summary().unwrap().total, 1);
    }

    #[test]
    fn record_seen_does_not_reset_delivered_flag() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger.record_seen("42", "newsyc150").unwrap();
        ledger.mark_delivered("42").unwrap();
        let again = ledger.record_seen("42", "newsyc150").unwrap();
        assert!(again.delivered);
    }

    #[test]
    fn mark_delivered_sets_flag_once() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger.record_seen("42", "newsyc150").unwrap();
        ledger.mark_delivered("42").unwrap();
        ledger.mark_delivered("42").unwrap();
        assert!(ledger.lookup("42").unwrap().unwrap().delivered);
    }

    #[test]
    fn mark_delivered_unknown_item_is_not_found() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        let err = ledger.mark_delivered("missing").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(id) if id == "missing"));
    }

    #[test]
    fn summary_counts_pending_and_delivered() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        assert_eq!(ledger.summary().unwrap(), LedgerSummary::default());

        ledger.record_seen("1", "newsyc150").unwrap();
        ledger.record_seen("2", "newsyc150").unwrap();
        ledger.record_seen("3", "newsyc150").unwrap();
        ledger.mark_delivered("2").unwrap();

        assert_eq!(
            ledger.summary().unwrap(),
            LedgerSummary {
                total: 3,
                delivered: 1,
                pending: 2,
            }
        );
    }

    #[test]
    fn recent_lists_newest_first_up_to_limit() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger
            .record_seen_at("1", "newsyc150", ts("2025-01-01T00:00:00Z"))
            .unwrap();
        ledger
            .record_seen_at("2", "newsyc150", ts("2025-01-02T00:00:00Z"))
            .unwrap();
        ledger
            .record_seen_at("3", "newsyc150", ts("2025-01-03T00:00:00Z"))
            .unwrap();

        let ids: Vec<String> = ledger
            .recent(2)
            .unwrap()
            .into_iter()
            .map(|record| record.external_id)
            .collect();
        assert_eq!(ids, vec!["3", "2"]);
    }

    #[test]
    fn state_survives_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ledger.db");
        {
            let mut ledger = Ledger::open(&path).unwrap();
            ledger.record_seen("42", "newsyc150").unwrap();
            ledger.mark_delivered("42").unwrap();
            ledger.record_seen("43", "newsyc150").unwrap();
        }

        let ledger = Ledger::open(&path).unwrap();
        assert!(ledger.lookup("42").unwrap().unwrap().delivered);
        assert!(!ledger.lookup("43").unwrap().unwrap().delivered);
    }

    #[test]
    fn corrupt_timestamp_is_reported() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger
            .conn
            .execute(
                "INSERT INTO deliveries (external_id, source_identity, delivered, first_seen)
                 VALUES ('bad', 'newsyc150', 0, 'yesterday')",
                [],
            )
            .unwrap();
        let err = ledger.lookup("bad").unwrap_err();
        assert!(matches!(err, LedgerError::TimestampParse { .. }));
    }
}
