//! External service provider implementations.
//!
//! This module contains provider traits and implementations for everything
//! outside the process boundary:
//!
//! - [`mail`] - Mailbox backends (Gmail API)
//! - [`ai`] - Classification backends (Gemini)
//! - [`notify`] - Notification channels (Slack)

pub mod ai;
pub mod mail;
pub mod notify;
