//! Audit log database queries.
//!
//! The audit log is append-only; rows are never updated or deleted. The
//! AUTOINCREMENT id gives operators the exact order decisions were made in.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result};

use crate::domain::{AuditRecord, MessageId, TriageAction, VerdictLabel};

/// Appends one decision to the log.
pub fn append_record(conn: &Connection, record: &AuditRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_log (timestamp, message_id, sender, subject, label, action, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.timestamp.to_rfc3339(),
            record.message_id.as_str(),
            record.sender,
            record.subject,
            record.label.as_str(),
            record.action.as_str(),
            record.reason,
        ],
    )?;
    Ok(())
}

/// Gets the most recent records, newest first.
pub fn recent_records(conn: &Connection, limit: u32) -> Result<Vec<AuditRecord>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, message_id, sender, subject, label, action, reason
         FROM audit_log ORDER BY id DESC LIMIT ?1",
    )?;

    let records = stmt.query_map(params![limit], row_to_record)?;
    records.collect()
}

/// Counts all records.
pub fn count_records(conn: &Connection) -> Result<u32> {
    conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
}

// --- Helper functions ---

fn row_to_record(row: &rusqlite::Row) -> Result<AuditRecord> {
    let timestamp_str: String = row.get(0)?;
    let message_id: String = row.get(1)?;
    let subject: Option<String> = row.get(3)?;
    let label_str: String = row.get(4)?;
    let action_str: String = row.get(5)?;

    Ok(AuditRecord {
        timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        message_id: MessageId::from(message_id),
        sender: row.get(2)?,
        subject: subject.unwrap_or_default(),
        label: VerdictLabel::parse(&label_str).unwrap_or(VerdictLabel::Uncertain),
        action: TriageAction::parse(&action_str).unwrap_or(TriageAction::Keep),
        reason: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for migration in super::super::super::schema::all_migrations() {
            conn.execute_batch(migration).unwrap();
        }
        conn
    }

    fn make_record(message_id: &str, action: TriageAction) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            message_id: MessageId::from(message_id),
            sender: "sender@example.com".to_string(),
            subject: "Subject".to_string(),
            label: VerdictLabel::Spam,
            action,
            reason: "test reason".to_string(),
        }
    }

    #[test]
    fn append_and_read_back() {
        let conn = setup();
        let record = make_record("m-1", TriageAction::BlockByClassification);

        append_record(&conn, &record).unwrap();
        let records = recent_records(&conn, 10).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message_id, MessageId::from("m-1"));
        assert_eq!(records[0].action, TriageAction::BlockByClassification);
        assert_eq!(records[0].label, VerdictLabel::Spam);
        assert_eq!(records[0].reason, "test reason");
    }

    #[test]
    fn recent_records_newest_first() {
        let conn = setup();
        append_record(&conn, &make_record("m-1", TriageAction::Keep)).unwrap();
        append_record(&conn, &make_record("m-2", TriageAction::BlockDenylisted)).unwrap();
        append_record(&conn, &make_record("m-3", TriageAction::Keep)).unwrap();

        let records = recent_records(&conn, 2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message_id, MessageId::from("m-3"));
        assert_eq!(records[1].message_id, MessageId::from("m-2"));
    }

    #[test]
    fn count_grows_with_appends() {
        let conn = setup();
        assert_eq!(count_records(&conn).unwrap(), 0);

        append_record(&conn, &make_record("m-1", TriageAction::Keep)).unwrap();
        append_record(&conn, &make_record("m-2", TriageAction::Keep)).unwrap();

        assert_eq!(count_records(&conn).unwrap(), 2);
    }

    #[test]
    fn null_subject_reads_as_empty() {
        let conn = setup();
        conn.execute(
            "INSERT INTO audit_log (timestamp, message_id, sender, subject, label, action, reason)
             VALUES ('2025-03-01T00:00:00Z', 'm-1', 's@example.com', NULL, 'spam', 'keep', 'r')",
            [],
        )
        .unwrap();

        let records = recent_records(&conn, 1).unwrap();
        assert_eq!(records[0].subject, "");
    }
}
