//! Database and credential storage.
//!
//! This module provides the storage layer for cull, including:
//!
//! - SQLite database for the denylist and the triage audit log
//! - OS keychain integration for secure credential storage
//! - Async-safe database operations via tokio::task::spawn_blocking
//!
//! Services talk to storage through the [`SqliteStore`] adapter rather
//! than through raw connections.

mod database;
mod keychain;
pub mod queries;
mod schema;
mod sqlite;

pub use database::{Database, DatabaseError, Result};
pub use keychain::{KeychainAccess, KeychainError};
pub use sqlite::SqliteStore;

/// Combined storage layer with database and keychain access.
///
/// This is the main entry point for storage operations.
#[derive(Debug, Clone)]
pub struct StorageLayer {
    db: Database,
    keychain: KeychainAccess,
}

impl StorageLayer {
    /// Creates a new storage layer with the given database path.
    pub async fn new(db_path: impl AsRef<std::path::Path>) -> Result<Self> {
        let db = Database::open(db_path).await?;
        let keychain = KeychainAccess::new();

        Ok(Self { db, keychain })
    }

    /// Creates a storage layer with an in-memory database for testing.
    pub async fn in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        let keychain = KeychainAccess::with_service("io.cull.test");

        Ok(Self { db, keychain })
    }

    /// Returns a reference to the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Returns a reference to the keychain.
    pub fn keychain(&self) -> &KeychainAccess {
        &self.keychain
    }

    /// Builds the store the services consume.
    pub fn store(&self) -> SqliteStore {
        SqliteStore::new(self.db.clone())
    }
}
