//! Notification batching for new denylist entries.
//!
//! [`Announcer`] collects entries that have not yet been announced, sends
//! one digest through the configured channel, and marks exactly those
//! entries announced afterwards. Marking happens only after the channel
//! accepts the digest, so a failed send keeps the backlog queued for the
//! next run: delivery is at-least-once, and an occasional duplicate digest
//! is the accepted cost.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::DenylistEntry;
use crate::providers::notify::{Digest, NotifyChannel, NotifyError};
use crate::services::denylist::DenylistStore;

/// Batches unannounced denylist entries into digests.
pub struct Announcer<S: DenylistStore> {
    storage: S,
    channel: Arc<dyn NotifyChannel>,
    digest_filename: String,
}

impl<S: DenylistStore> Announcer<S> {
    /// Creates a new announcer writing digests named `digest_filename`.
    pub fn new(
        storage: S,
        channel: Arc<dyn NotifyChannel>,
        digest_filename: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            channel,
            digest_filename: digest_filename.into(),
        }
    }

    /// Announces all pending entries in one digest.
    ///
    /// Returns how many entries went out. An empty backlog sends nothing.
    /// A storage read fault degrades to "nothing pending" rather than
    /// failing the run; a send fault propagates so the caller can count it.
    pub async fn announce_pending(&self, now: DateTime<Utc>) -> Result<usize, NotifyError> {
        let pending = match self.storage.unannounced().await {
            Ok(pending) => pending,
            Err(error) => {
                tracing::warn!(%error, "could not read unannounced entries");
                return Ok(0);
            }
        };
        if pending.is_empty() {
            tracing::debug!("no unannounced denylist entries");
            return Ok(0);
        }

        // Capture the batch before sending; entries added while the send is
        // in flight wait for the next round.
        let addresses: Vec<String> = pending.iter().map(|e| e.address.clone()).collect();
        let digest = self.build_digest(&pending, now);
        self.channel.send_digest(&digest).await?;

        match self.storage.mark_announced(&addresses).await {
            Ok(marked) => {
                tracing::info!(announced = addresses.len(), marked, "sent denylist digest");
            }
            Err(error) => {
                tracing::warn!(
                    %error,
                    "digest sent but entries not marked, expect a duplicate next run"
                );
            }
        }
        Ok(addresses.len())
    }

    fn build_digest(&self, entries: &[DenylistEntry], now: DateTime<Utc>) -> Digest {
        let content: String = entries
            .iter()
            .map(|entry| format!("{}\n", entry.address))
            .collect();
        let summary = format!(
            "Blocked {} new sender{} as of {}",
            entries.len(),
            if entries.len() == 1 { "" } else { "s" },
            now.format("%Y-%m-%d")
        );
        Digest {
            filename: self.digest_filename.clone(),
            content,
            summary,
        }
    }
}
