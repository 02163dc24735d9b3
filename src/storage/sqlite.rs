//! SQLite-backed implementations of the service storage traits.
//!
//! [`SqliteStore`] adapts the shared [`Database`] handle to the
//! [`DenylistStore`] and [`AuditLog`] traits. It stays a thin shim: SQL
//! lives in [`super::queries`], lifecycle semantics live in the services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::database::{Database, DatabaseError};
use super::queries;
use crate::domain::{AuditRecord, DenylistEntry};
use crate::services::{AuditError, AuditLog, DenylistError, DenylistResult, DenylistStore};

/// SQLite-backed store for denylist entries and the audit log.
///
/// Cheap to clone; clones share the underlying connection.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Creates a store over an open database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn denylist_fault(error: DatabaseError) -> DenylistError {
    DenylistError::Storage(error.to_string())
}

fn audit_fault(error: DatabaseError) -> AuditError {
    AuditError::Storage(error.to_string())
}

#[async_trait]
impl DenylistStore for SqliteStore {
    async fn get(&self, address: &str) -> DenylistResult<Option<DenylistEntry>> {
        let address = address.to_string();
        self.db
            .with_conn(move |conn| Ok(queries::denylist::get_entry(conn, &address)?))
            .await
            .map_err(denylist_fault)
    }

    async fn upsert(&self, entry: &DenylistEntry) -> DenylistResult<()> {
        let entry = entry.clone();
        self.db
            .with_conn(move |conn| Ok(queries::denylist::upsert_entry(conn, &entry)?))
            .await
            .map_err(denylist_fault)
    }

    async fn remove(&self, address: &str) -> DenylistResult<bool> {
        let address = address.to_string();
        self.db
            .with_conn(move |conn| Ok(queries::denylist::delete_entry(conn, &address)?))
            .await
            .map_err(denylist_fault)
    }

    async fn touch_confirmed(&self, address: &str, when: DateTime<Utc>) -> DenylistResult<bool> {
        let address = address.to_string();
        self.db
            .with_conn(move |conn| Ok(queries::denylist::touch_confirmed(conn, &address, when)?))
            .await
            .map_err(denylist_fault)
    }

    async fn added_since(&self, since: DateTime<Utc>) -> DenylistResult<Vec<DenylistEntry>> {
        self.db
            .with_conn(move |conn| Ok(queries::denylist::entries_added_since(conn, since)?))
            .await
            .map_err(denylist_fault)
    }

    async fn unannounced(&self) -> DenylistResult<Vec<DenylistEntry>> {
        self.db
            .with_conn(|conn| Ok(queries::denylist::unannounced_entries(conn)?))
            .await
            .map_err(denylist_fault)
    }

    async fn mark_announced(&self, addresses: &[String]) -> DenylistResult<usize> {
        let addresses = addresses.to_vec();
        self.db
            .with_conn(move |conn| Ok(queries::denylist::mark_announced(conn, &addresses)?))
            .await
            .map_err(denylist_fault)
    }

    async fn all(&self) -> DenylistResult<Vec<DenylistEntry>> {
        self.db
            .with_conn(|conn| Ok(queries::denylist::all_entries(conn)?))
            .await
            .map_err(denylist_fault)
    }
}

#[async_trait]
impl AuditLog for SqliteStore {
    async fn append(&self, record: &AuditRecord) -> std::result::Result<(), AuditError> {
        let record = record.clone();
        self.db
            .with_conn(move |conn| Ok(queries::audit::append_record(conn, &record)?))
            .await
            .map_err(audit_fault)
    }

    async fn recent(&self, limit: u32) -> std::result::Result<Vec<AuditRecord>, AuditError> {
        self.db
            .with_conn(move |conn| Ok(queries::audit::recent_records(conn, limit)?))
            .await
            .map_err(audit_fault)
    }
}
