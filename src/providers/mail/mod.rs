//! Mail backend implementations.
//!
//! This module contains the [`Mailbox`] trait and its Gmail implementation:
//!
//! - [`GmailMailbox`] - Gmail API with OAuth 2.0
//!
//! # Architecture
//!
//! The mailbox abstraction keeps triage logic independent of any one mail
//! service. A backend handles:
//!
//! - Authentication (OAuth refresh-token exchange)
//! - Listing and fetching untriaged messages
//! - Thread expansion for reply-affinity checks
//! - Archive / trash / label mutations
//!
//! # Example
//!
//! ```ignore
//! use cull::providers::mail::{GmailMailbox, Mailbox, MailCredentials};
//!
//! async fn show_backlog(mailbox: &dyn Mailbox) {
//!     let unseen = mailbox.list_unseen(25).await.expect("failed to list");
//!     for id in unseen {
//!         let message = mailbox.fetch_message(&id).await.expect("failed to fetch");
//!         println!("{}: {}", message.from.display(), message.subject_or_empty());
//!     }
//! }
//! ```

mod gmail;
mod traits;

pub use gmail::{GmailMailbox, MailCredentials};
pub use traits::{Mailbox, MailboxError, Result};
