//! Outbound notification channels.
//!
//! This module contains the [`NotifyChannel`] trait and its Slack
//! implementation:
//!
//! - [`SlackChannel`] - file-upload digests posted to one Slack channel
//!
//! Channels carry batched announcements only; per-message chatter stays in
//! the structured log.

mod slack;
mod traits;

pub use slack::SlackChannel;
pub use traits::{Digest, NotifyChannel, NotifyError, Result};
