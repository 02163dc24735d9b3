//! SQL schema definitions as const strings.
//!
//! Contains the complete SQLite schema for the cull triage engine.

/// SQL to create the denylist table.
///
/// `last_confirmed_date` and `notified` are nullable so rows written by
/// earlier tooling still load; the row mappers fall back to `added_date`
/// and `0` respectively.
pub const CREATE_DENYLIST: &str = r#"
CREATE TABLE IF NOT EXISTS denylist (
    email TEXT PRIMARY KEY,
    added_date TEXT NOT NULL,
    last_confirmed_date TEXT,
    source TEXT NOT NULL DEFAULT 'auto',
    notified INTEGER DEFAULT 0
)
"#;

/// SQL to create the denylist indexes.
pub const CREATE_DENYLIST_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_denylist_added ON denylist(added_date);
CREATE INDEX IF NOT EXISTS idx_denylist_notified ON denylist(notified)
"#;

/// SQL to create the audit_log table.
///
/// The AUTOINCREMENT rowid preserves the order decisions were written in,
/// which is what operators read the log by.
pub const CREATE_AUDIT_LOG: &str = r#"
CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    message_id TEXT NOT NULL,
    sender TEXT NOT NULL,
    subject TEXT,
    label TEXT NOT NULL,
    action TEXT NOT NULL,
    reason TEXT NOT NULL
)
"#;

/// SQL to create the audit_log index.
pub const CREATE_AUDIT_LOG_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp)
"#;

/// Returns all schema creation statements in order.
pub fn all_migrations() -> Vec<&'static str> {
    vec![
        CREATE_DENYLIST,
        CREATE_DENYLIST_INDEXES,
        CREATE_AUDIT_LOG,
        CREATE_AUDIT_LOG_INDEX,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_migrations_returns_statements() {
        let migrations = all_migrations();
        assert!(!migrations.is_empty());
        assert_eq!(migrations.len(), 4);
    }

    #[test]
    fn create_denylist_is_valid_sql() {
        assert!(CREATE_DENYLIST.contains("CREATE TABLE"));
        assert!(CREATE_DENYLIST.contains("denylist"));
        assert!(CREATE_DENYLIST.contains("email TEXT PRIMARY KEY"));
    }

    #[test]
    fn create_audit_log_preserves_write_order() {
        assert!(CREATE_AUDIT_LOG.contains("INTEGER PRIMARY KEY AUTOINCREMENT"));
    }

    #[test]
    fn indexes_use_if_not_exists() {
        assert!(CREATE_DENYLIST_INDEXES.contains("IF NOT EXISTS"));
        assert!(CREATE_AUDIT_LOG_INDEX.contains("IF NOT EXISTS"));
    }
}
