//! Per-transaction processing flags.
//!
//! One row per `(source type, natural key)`. The three flags only ever move
//! from `false` to `true`.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Result};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Side effect tracked for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// Operators were notified
    Notified,
    /// A fiscal receipt was created and signed
    Receipted,
    /// A row was appended to the ledger
    Recorded,
}

impl Flag {
    fn column(&self) -> &'static str {
        match self {
            Flag::Notified => "notified",
            Flag::Receipted => "receipted",
            Flag::Recorded => "recorded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingState {
    pub source: String,
    pub id: String,
    pub ts: Option<NaiveDateTime>,
    pub notified: bool,
    pub receipted: bool,
    pub recorded: bool,
}

impl ProcessingState {
    pub fn is_set(&self, flag: Flag) -> bool {
        match flag {
            Flag::Notified => self.notified,
            Flag::Receipted => self.receipted,
            Flag::Recorded => self.recorded,
        }
    }
}

fn format_ts(ts: Option<NaiveDateTime>) -> Option<String> {
    ts.map(|ts| ts.format(TS_FORMAT).to_string())
}

fn parse_ts(raw: Option<String>) -> Option<NaiveDateTime> {
    raw.and_then(|raw| NaiveDateTime::parse_from_str(&raw, TS_FORMAT).ok())
}

/// Looks up the state of a transaction, creating an all-false row if missing.
pub fn get_or_create_state(
    conn: &Connection,
    source: &str,
    id: &str,
    ts: Option<NaiveDateTime>,
) -> Result<ProcessingState> {
    conn.execute(
        "INSERT OR IGNORE INTO transactions (type, id, ts) VALUES (?1, ?2, ?3)",
        params![source, id, format_ts(ts)],
    )?;

    conn.query_row(
        "SELECT type, id, ts, notified, receipted, recorded FROM transactions WHERE type = ?1 AND id = ?2",
        params![source, id],
        |row| {
            Ok(ProcessingState {
                source: row.get(0)?,
                id: row.get(1)?,
                ts: parse_ts(row.get(2)?),
                notified: row.get(3)?,
                receipted: row.get(4)?,
                recorded: row.get(5)?,
            })
        },
    )
}

/// Sets one flag. Never clears it.
pub fn set_flag(conn: &Connection, source: &str, id: &str, flag: Flag) -> Result<()> {
    let sql = format!(
        "UPDATE transactions SET {} = 1 WHERE type = ?1 AND id = ?2",
        flag.column()
    );
    conn.execute(&sql, params![source, id])?;
    Ok(())
}

/// Stores a transaction as fully processed. Used when a source is first seen.
///
/// An existing row keeps its flags.
pub fn mark_processed(conn: &Connection, source: &str, id: &str, ts: Option<NaiveDateTime>) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO transactions (type, id, ts, notified, receipted, recorded) VALUES (?1, ?2, ?3, 1, 1, 1)",
        params![source, id, format_ts(ts)],
    )?;
    Ok(())
}

/// Number of stored transactions for a source.
pub fn count_states(conn: &Connection, source: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE type = ?1",
        [source],
        |row| row.get(0),
    )
}
