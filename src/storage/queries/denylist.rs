//! Denylist database queries.
//!
//! CRUD operations for the blocked-sender table. Addresses are expected to
//! arrive already normalized; these functions do no case folding of their own.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};

use crate::domain::{DenylistEntry, EntrySource};

/// Inserts an entry, or refreshes `last_confirmed_date` when the address is
/// already present. Existing `added_date`, `source`, and `notified` values
/// are left untouched so a re-block never resets the entry's history.
pub fn upsert_entry(conn: &Connection, entry: &DenylistEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO denylist (email, added_date, last_confirmed_date, source, notified)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(email) DO UPDATE SET last_confirmed_date = excluded.last_confirmed_date",
        params![
            entry.address,
            entry.added_at.to_rfc3339(),
            entry.last_confirmed_at.to_rfc3339(),
            source_to_str(&entry.source),
            entry.announced as i64,
        ],
    )?;
    Ok(())
}

/// Gets an entry by normalized address.
pub fn get_entry(conn: &Connection, address: &str) -> Result<Option<DenylistEntry>> {
    conn.query_row(
        "SELECT email, added_date, last_confirmed_date, source, notified
         FROM denylist WHERE email = ?1",
        params![address],
        row_to_entry,
    )
    .optional()
}

/// Deletes an entry. Returns whether a row was removed.
pub fn delete_entry(conn: &Connection, address: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM denylist WHERE email = ?1", params![address])?;
    Ok(changed > 0)
}

/// Advances `last_confirmed_date` for an existing entry. Returns whether a
/// row was updated.
pub fn touch_confirmed(conn: &Connection, address: &str, when: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE denylist SET last_confirmed_date = ?1 WHERE email = ?2",
        params![when.to_rfc3339(), address],
    )?;
    Ok(changed > 0)
}

/// Gets entries added at or after the given instant, oldest first.
pub fn entries_added_since(conn: &Connection, since: DateTime<Utc>) -> Result<Vec<DenylistEntry>> {
    let mut stmt = conn.prepare(
        "SELECT email, added_date, last_confirmed_date, source, notified
         FROM denylist WHERE added_date >= ?1 ORDER BY added_date ASC",
    )?;

    let entries = stmt.query_map(params![since.to_rfc3339()], row_to_entry)?;
    entries.collect()
}

/// Gets entries that have not yet been included in a notification digest,
/// oldest first.
pub fn unannounced_entries(conn: &Connection) -> Result<Vec<DenylistEntry>> {
    let mut stmt = conn.prepare(
        "SELECT email, added_date, last_confirmed_date, source, notified
         FROM denylist WHERE notified IS NULL OR notified = 0 ORDER BY added_date ASC",
    )?;

    let entries = stmt.query_map([], row_to_entry)?;
    entries.collect()
}

/// Marks the given addresses as announced. Returns how many rows changed.
pub fn mark_announced(conn: &Connection, addresses: &[String]) -> Result<usize> {
    let mut changed = 0;
    for address in addresses {
        changed += conn.execute(
            "UPDATE denylist SET notified = 1 WHERE email = ?1",
            params![address],
        )?;
    }
    Ok(changed)
}

/// Gets every entry, oldest first.
pub fn all_entries(conn: &Connection) -> Result<Vec<DenylistEntry>> {
    let mut stmt = conn.prepare(
        "SELECT email, added_date, last_confirmed_date, source, notified
         FROM denylist ORDER BY added_date ASC",
    )?;

    let entries = stmt.query_map([], row_to_entry)?;
    entries.collect()
}

/// Counts all entries.
pub fn count_entries(conn: &Connection) -> Result<u32> {
    conn.query_row("SELECT COUNT(*) FROM denylist", [], |row| row.get(0))
}

// --- Helper functions ---

fn source_to_str(source: &EntrySource) -> &'static str {
    match source {
        EntrySource::Auto => "auto",
        EntrySource::Manual => "manual",
    }
}

fn str_to_source(s: &str) -> EntrySource {
    match s {
        "manual" => EntrySource::Manual,
        _ => EntrySource::Auto,
    }
}

fn row_to_entry(row: &rusqlite::Row) -> Result<DenylistEntry> {
    let added_str: String = row.get(1)?;
    let confirmed_str: Option<String> = row.get(2)?;
    let source_str: String = row.get(3)?;
    let notified: Option<i64> = row.get(4)?;

    let added_at = DateTime::parse_from_rfc3339(&added_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    // Rows from earlier tooling may lack a confirmation date; treat the
    // add date as the last confirmation.
    let last_confirmed_at = confirmed_str
        .and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .unwrap_or(added_at);

    Ok(DenylistEntry {
        address: row.get(0)?,
        added_at,
        last_confirmed_at,
        source: str_to_source(&source_str),
        announced: notified.unwrap_or(0) != 0,
    })
}
