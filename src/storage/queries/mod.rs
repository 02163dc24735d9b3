//! Database query modules for CRUD operations.
//!
//! Each module provides synchronous functions over a borrowed connection;
//! callers run them through [`crate::storage::Database::with_conn`].

pub mod audit;
pub mod denylist;
