//! Time-boxed batch control loop.
//!
//! [`BatchRunner`] drives one triage run end to end:
//!
//! 1. Pull a bounded page of untriaged messages
//! 2. Review recent denylist entries for grace-period reversals
//! 3. Triage each message, marking it seen only after its decision stuck
//! 4. Send the notification digest, unconditionally
//!
//! The run carries an explicit wall-clock deadline, polled between units of
//! work, never mid-call. Hitting it is a clean early return that leaves the
//! rest of the backlog for the next scheduled run. Per-message failures are
//! counted and skipped; the run itself always completes with a
//! [`RunSummary`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{MessageId, TriageAction};
use crate::providers::mail::Mailbox;
use crate::services::announcer::Announcer;
use crate::services::denylist::{DenylistService, DenylistStore};
use crate::services::engine::TriageEngine;

/// Settings for run pacing and scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Upper bound on messages pulled per run.
    pub max_messages_per_run: u32,
    /// Wall-clock budget for one run. Must stay below whatever hard ceiling
    /// the invoking scheduler enforces.
    pub time_budget: Duration,
    /// Whether the grace-period review pass runs.
    pub review_enabled: bool,
    /// How far back the review pass looks, in days.
    pub review_window_days: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_messages_per_run: 25,
            time_budget: Duration::from_secs(240), // under a 5-minute scheduler slot
            review_enabled: true,
            review_window_days: 7,
        }
    }
}

/// Tally of one triage run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Messages that reached a terminal decision.
    pub processed: usize,
    /// Messages kept in the inbox.
    pub kept: usize,
    /// Messages skipped for trusted-thread affinity.
    pub skipped_related: usize,
    /// Messages blocked because their sender was already denylisted.
    pub blocked_denylisted: usize,
    /// Messages blocked on a fresh high-confidence spam verdict.
    pub blocked_by_classification: usize,
    /// Senders released from the denylist during their grace period.
    pub unblocked: usize,
    /// Senders released by the review pass.
    pub review_removals: usize,
    /// Entries announced in the digest.
    pub announced: usize,
    /// Per-message and per-phase failures (non-fatal).
    pub errors: Vec<String>,
    /// Whether the run stopped early on its deadline.
    pub deadline_hit: bool,
    /// Duration of the run.
    pub duration_ms: u64,
}

impl RunSummary {
    fn record(&mut self, action: TriageAction) {
        self.processed += 1;
        match action {
            TriageAction::Keep => self.kept += 1,
            TriageAction::SkipRelatedThread => self.skipped_related += 1,
            TriageAction::BlockDenylisted => self.blocked_denylisted += 1,
            TriageAction::BlockByClassification => self.blocked_by_classification += 1,
            TriageAction::UnblockGracePeriod => self.unblocked += 1,
        }
    }

    /// Returns true if the run completed without errors.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "processed {} message{} in {:.1}s{}",
            self.processed,
            if self.processed == 1 { "" } else { "s" },
            self.duration_ms as f64 / 1000.0,
            if self.deadline_hit {
                " (stopped on time budget)"
            } else {
                ""
            }
        )?;
        writeln!(f, "  kept:                     {}", self.kept)?;
        writeln!(f, "  skipped (trusted thread): {}", self.skipped_related)?;
        writeln!(f, "  blocked (denylisted):     {}", self.blocked_denylisted)?;
        writeln!(f, "  blocked (classified):     {}", self.blocked_by_classification)?;
        writeln!(f, "  unblocked (grace period): {}", self.unblocked)?;
        writeln!(f, "  review removals:          {}", self.review_removals)?;
        writeln!(f, "  announced:                {}", self.announced)?;
        write!(f, "  errors:                   {}", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n    {}", error)?;
        }
        Ok(())
    }
}

/// The batch control loop over one mailbox.
pub struct BatchRunner<S: DenylistStore> {
    mailbox: Arc<dyn Mailbox>,
    engine: TriageEngine<S>,
    denylist: Arc<DenylistService<S>>,
    announcer: Announcer<S>,
    settings: RunnerSettings,
}

impl<S: DenylistStore> BatchRunner<S> {
    /// Creates a new runner over its collaborators.
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        engine: TriageEngine<S>,
        denylist: Arc<DenylistService<S>>,
        announcer: Announcer<S>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            mailbox,
            engine,
            denylist,
            announcer,
            settings,
        }
    }

    /// Runs one batch under the configured time budget.
    pub async fn run_once(&self) -> RunSummary {
        self.run_until(Instant::now() + self.settings.time_budget).await
    }

    /// Runs one batch until the work is done or `deadline` passes.
    ///
    /// The deadline is polled between messages and between review entries;
    /// a call already in flight always completes first.
    pub async fn run_until(&self, deadline: Instant) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut summary = RunSummary::default();
        tracing::info!(%run_id, "triage run started");

        let message_ids = match self
            .mailbox
            .list_unseen(self.settings.max_messages_per_run)
            .await
        {
            Ok(ids) => ids,
            Err(error) => {
                tracing::error!(%error, "could not list untriaged messages");
                summary.errors.push(format!("list: {}", error));
                Vec::new()
            }
        };

        if self.settings.review_enabled {
            self.review_recent_blocks(&mut summary, deadline).await;
        }

        for id in message_ids {
            if Instant::now() >= deadline {
                tracing::info!(%run_id, "time budget exhausted, stopping early");
                summary.deadline_hit = true;
                break;
            }
            match self.process_message(&id).await {
                Ok(action) => summary.record(action),
                Err(error) => {
                    tracing::warn!(%error, message = %id, "message failed, continuing");
                    summary.errors.push(format!("{}: {}", id, error));
                }
            }
        }

        // The digest goes out even on an empty or budget-stopped run.
        match self.announcer.announce_pending(Utc::now()).await {
            Ok(count) => summary.announced = count,
            Err(error) => {
                tracing::warn!(%error, "could not announce new blocks");
                summary.errors.push(format!("announce: {}", error));
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            %run_id,
            processed = summary.processed,
            blocked = summary.blocked_denylisted + summary.blocked_by_classification,
            errors = summary.errors.len(),
            duration_ms = summary.duration_ms,
            "triage run finished"
        );
        summary
    }

    async fn process_message(&self, id: &MessageId) -> crate::providers::mail::Result<TriageAction> {
        let message = self.mailbox.fetch_message(id).await?;
        let decision = self.engine.triage(&message, Utc::now()).await?;
        // Marking seen is what makes a rerun skip this message; a failure
        // here leaves it queued for another pass.
        self.mailbox.mark_seen(id).await?;
        Ok(decision.action)
    }

    /// Re-checks entries added within the review window: a trusted-domain
    /// reply in any fresh conversation with the sender releases the block
    /// without spending a classification call.
    async fn review_recent_blocks(&self, summary: &mut RunSummary, deadline: Instant) {
        if !self.engine.affinity_enabled() {
            return;
        }

        let entries = match self
            .denylist
            .recent_entries(self.settings.review_window_days, Utc::now())
            .await
        {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(%error, "could not load entries for review");
                return;
            }
        };

        for entry in entries {
            if Instant::now() >= deadline {
                summary.deadline_hit = true;
                return;
            }

            let query = format!(
                "from:{} newer_than:{}d",
                entry.address, self.settings.review_window_days
            );
            let senders = match self.mailbox.search_thread_senders(&query).await {
                Ok(senders) => senders,
                Err(error) => {
                    tracing::warn!(
                        %error,
                        address = %entry.address,
                        "review search failed, skipping entry"
                    );
                    continue;
                }
            };

            if self.engine.has_trusted_participant(&senders, &entry.address) {
                match self.denylist.remove(&entry.address).await {
                    Ok(true) => {
                        summary.review_removals += 1;
                        tracing::info!(address = %entry.address, "review released recent block");
                    }
                    Ok(false) => {}
                    Err(error) => {
                        tracing::warn!(%error, address = %entry.address, "could not release entry");
                    }
                }
            }
        }
    }
}
