//! Denylist service for the blocked-sender lifecycle.
//!
//! The denylist is the long-term memory of the triage pipeline:
//! - Addresses are normalized so each sender maps to one entry
//! - Fresh blocks sit in a grace period during which they can be reversed
//! - Re-encountering a settled block re-confirms it instead of duplicating it
//! - New blocks are queued for the notification digest until announced

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::domain::{DenylistEntry, EntrySource};

/// Errors that can occur during denylist operations.
#[derive(Debug, Error)]
pub enum DenylistError {
    /// The address could not be normalized into a usable key.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for denylist operations.
pub type DenylistResult<T> = Result<T, DenylistError>;

/// Storage trait for denylist persistence.
///
/// Implementations receive addresses already normalized by the service.
#[async_trait]
pub trait DenylistStore: Send + Sync {
    /// Gets an entry by normalized address.
    async fn get(&self, address: &str) -> DenylistResult<Option<DenylistEntry>>;

    /// Inserts an entry, or refreshes `last_confirmed_at` when the address
    /// already exists. Never duplicates and never resets entry history.
    async fn upsert(&self, entry: &DenylistEntry) -> DenylistResult<()>;

    /// Removes an entry. Returns whether one existed.
    async fn remove(&self, address: &str) -> DenylistResult<bool>;

    /// Advances `last_confirmed_at` for an existing entry.
    async fn touch_confirmed(&self, address: &str, when: DateTime<Utc>) -> DenylistResult<bool>;

    /// Gets entries added at or after the given instant, oldest first.
    async fn added_since(&self, since: DateTime<Utc>) -> DenylistResult<Vec<DenylistEntry>>;

    /// Gets entries not yet included in a notification digest, oldest first.
    async fn unannounced(&self) -> DenylistResult<Vec<DenylistEntry>>;

    /// Marks the given addresses as announced. Returns how many changed.
    async fn mark_announced(&self, addresses: &[String]) -> DenylistResult<usize>;

    /// Gets every entry, oldest first.
    async fn all(&self) -> DenylistResult<Vec<DenylistEntry>>;
}

#[async_trait]
impl<T: DenylistStore + ?Sized> DenylistStore for Arc<T> {
    async fn get(&self, address: &str) -> DenylistResult<Option<DenylistEntry>> {
        (**self).get(address).await
    }

    async fn upsert(&self, entry: &DenylistEntry) -> DenylistResult<()> {
        (**self).upsert(entry).await
    }

    async fn remove(&self, address: &str) -> DenylistResult<bool> {
        (**self).remove(address).await
    }

    async fn touch_confirmed(&self, address: &str, when: DateTime<Utc>) -> DenylistResult<bool> {
        (**self).touch_confirmed(address, when).await
    }

    async fn added_since(&self, since: DateTime<Utc>) -> DenylistResult<Vec<DenylistEntry>> {
        (**self).added_since(since).await
    }

    async fn unannounced(&self) -> DenylistResult<Vec<DenylistEntry>> {
        (**self).unannounced().await
    }

    async fn mark_announced(&self, addresses: &[String]) -> DenylistResult<usize> {
        (**self).mark_announced(addresses).await
    }

    async fn all(&self) -> DenylistResult<Vec<DenylistEntry>> {
        (**self).all().await
    }
}

/// Normalizes an address into the canonical denylist key: trimmed and
/// lowercased, with at least one character on each side of the `@`.
///
/// Returns `None` for anything that cannot serve as a key.
pub fn normalize_address(address: &str) -> Option<String> {
    let lowered = address.trim().to_lowercase();
    let (local, domain) = lowered.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some(lowered)
}

/// Outcome of a denylist lookup.
///
/// A miss is a value, not an error: malformed addresses and storage faults
/// both surface here as "not found".
#[derive(Debug, Clone, Default)]
pub struct DenylistLookup {
    /// The entry, when the sender is on the list.
    pub entry: Option<DenylistEntry>,
    /// Whether the entry is still inside its grace period.
    pub in_grace_period: bool,
}

impl DenylistLookup {
    fn miss() -> Self {
        Self::default()
    }

    /// Whether the sender is on the list at all.
    pub fn found(&self) -> bool {
        self.entry.is_some()
    }
}

/// Service owning denylist semantics: normalization, the grace window,
/// and idempotent add/remove/confirm operations.
pub struct DenylistService<S: DenylistStore> {
    storage: S,
    grace_days: i64,
}

impl<S: DenylistStore> DenylistService<S> {
    /// Creates a new denylist service.
    ///
    /// `grace_days` of zero makes every block permanent immediately.
    pub fn new(storage: S, grace_days: u32) -> Self {
        Self {
            storage,
            grace_days: i64::from(grace_days),
        }
    }

    /// Looks up a sender. Total: malformed addresses and storage faults
    /// degrade to a miss so one bad lookup never stops a run.
    pub async fn lookup(&self, address: &str, now: DateTime<Utc>) -> DenylistLookup {
        let Some(normalized) = normalize_address(address) else {
            return DenylistLookup::miss();
        };

        match self.storage.get(&normalized).await {
            Ok(Some(entry)) => {
                // Inclusive boundary: an entry added exactly grace_days ago
                // is still in its grace period.
                let in_grace_period =
                    now.signed_duration_since(entry.added_at) <= Duration::days(self.grace_days);
                DenylistLookup {
                    entry: Some(entry),
                    in_grace_period,
                }
            }
            Ok(None) => DenylistLookup::miss(),
            Err(e) => {
                warn!(address = %normalized, error = %e, "denylist lookup failed, treating as miss");
                DenylistLookup::miss()
            }
        }
    }

    /// Adds a sender, or re-confirms it when already present. Returns the
    /// stored entry, which keeps its original history on re-add.
    pub async fn add(
        &self,
        address: &str,
        source: EntrySource,
        now: DateTime<Utc>,
    ) -> DenylistResult<DenylistEntry> {
        let normalized = normalize_address(address)
            .ok_or_else(|| DenylistError::InvalidAddress(address.to_string()))?;

        let entry = DenylistEntry::new(normalized, source, now);
        self.storage.upsert(&entry).await?;
        Ok(self.storage.get(&entry.address).await?.unwrap_or(entry))
    }

    /// Removes a sender. A no-op returning `false` when absent or malformed.
    pub async fn remove(&self, address: &str) -> DenylistResult<bool> {
        let Some(normalized) = normalize_address(address) else {
            return Ok(false);
        };
        self.storage.remove(&normalized).await
    }

    /// Re-confirms an existing block. A no-op returning `false` when absent.
    pub async fn touch_confirmed(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> DenylistResult<bool> {
        let Some(normalized) = normalize_address(address) else {
            return Ok(false);
        };
        self.storage.touch_confirmed(&normalized, now).await
    }

    /// Gets entries added within the trailing window, oldest first.
    pub async fn recent_entries(
        &self,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> DenylistResult<Vec<DenylistEntry>> {
        let since = now - Duration::days(i64::from(window_days));
        self.storage.added_since(since).await
    }

    /// Gets every entry, oldest first.
    pub async fn all_entries(&self) -> DenylistResult<Vec<DenylistEntry>> {
        self.storage.all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockStorage {
        entries: Mutex<Vec<DenylistEntry>>,
    }

    impl MockStorage {
        fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
            }
        }

        fn with_entry(entry: DenylistEntry) -> Self {
            Self {
                entries: Mutex::new(vec![entry]),
            }
        }
    }

    #[async_trait]
    impl DenylistStore for MockStorage {
        async fn get(&self, address: &str) -> DenylistResult<Option<DenylistEntry>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.address == address)
                .cloned())
        }

        async fn upsert(&self, entry: &DenylistEntry) -> DenylistResult<()> {
            let mut entries = self.entries.lock().unwrap();
            if let Some(existing) = entries.iter_mut().find(|e| e.address == entry.address) {
                existing.last_confirmed_at = entry.last_confirmed_at;
            } else {
                entries.push(entry.clone());
            }
            Ok(())
        }

        async fn remove(&self, address: &str) -> DenylistResult<bool> {
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|e| e.address != address);
            Ok(entries.len() < before)
        }

        async fn touch_confirmed(
            &self,
            address: &str,
            when: DateTime<Utc>,
        ) -> DenylistResult<bool> {
            let mut entries = self.entries.lock().unwrap();
            match entries.iter_mut().find(|e| e.address == address) {
                Some(entry) => {
                    entry.last_confirmed_at = when;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn added_since(&self, since: DateTime<Utc>) -> DenylistResult<Vec<DenylistEntry>> {
            let mut recent: Vec<DenylistEntry> = self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.added_at >= since)
                .cloned()
                .collect();
            recent.sort_by_key(|e| e.added_at);
            Ok(recent)
        }

        async fn unannounced(&self) -> DenylistResult<Vec<DenylistEntry>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| !e.announced)
                .cloned()
                .collect())
        }

        async fn mark_announced(&self, addresses: &[String]) -> DenylistResult<usize> {
            let mut entries = self.entries.lock().unwrap();
            let mut changed = 0;
            for entry in entries.iter_mut() {
                if addresses.contains(&entry.address) && !entry.announced {
                    entry.announced = true;
                    changed += 1;
                }
            }
            Ok(changed)
        }

        async fn all(&self) -> DenylistResult<Vec<DenylistEntry>> {
            Ok(self.entries.lock().unwrap().clone())
        }
    }

    /// Storage that fails every call, for degraded-path tests.
    struct FailingStorage;

    #[async_trait]
    impl DenylistStore for FailingStorage {
        async fn get(&self, _address: &str) -> DenylistResult<Option<DenylistEntry>> {
            Err(DenylistError::Storage("disk on fire".to_string()))
        }

        async fn upsert(&self, _entry: &DenylistEntry) -> DenylistResult<()> {
            Err(DenylistError::Storage("disk on fire".to_string()))
        }

        async fn remove(&self, _address: &str) -> DenylistResult<bool> {
            Err(DenylistError::Storage("disk on fire".to_string()))
        }

        async fn touch_confirmed(
            &self,
            _address: &str,
            _when: DateTime<Utc>,
        ) -> DenylistResult<bool> {
            Err(DenylistError::Storage("disk on fire".to_string()))
        }

        async fn added_since(&self, _since: DateTime<Utc>) -> DenylistResult<Vec<DenylistEntry>> {
            Err(DenylistError::Storage("disk on fire".to_string()))
        }

        async fn unannounced(&self) -> DenylistResult<Vec<DenylistEntry>> {
            Err(DenylistError::Storage("disk on fire".to_string()))
        }

        async fn mark_announced(&self, _addresses: &[String]) -> DenylistResult<usize> {
            Err(DenylistError::Storage("disk on fire".to_string()))
        }

        async fn all(&self) -> DenylistResult<Vec<DenylistEntry>> {
            Err(DenylistError::Storage("disk on fire".to_string()))
        }
    }

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(
            normalize_address("  Sales@Example.COM "),
            Some("sales@example.com".to_string())
        );
    }

    #[test]
    fn normalize_rejects_unusable_addresses() {
        assert_eq!(normalize_address(""), None);
        assert_eq!(normalize_address("   "), None);
        assert_eq!(normalize_address("no-at-sign"), None);
        assert_eq!(normalize_address("@example.com"), None);
        assert_eq!(normalize_address("user@"), None);
    }

    #[tokio::test]
    async fn lookup_miss_for_unknown_sender() {
        let service = DenylistService::new(MockStorage::new(), 7);
        let lookup = service.lookup("nobody@example.com", Utc::now()).await;
        assert!(!lookup.found());
        assert!(!lookup.in_grace_period);
    }

    #[tokio::test]
    async fn lookup_malformed_address_is_a_miss() {
        let service = DenylistService::new(MockStorage::new(), 7);
        let lookup = service.lookup("   ", Utc::now()).await;
        assert!(!lookup.found());
    }

    #[tokio::test]
    async fn lookup_grace_boundary_is_inclusive() {
        let now = Utc::now();
        let entry = DenylistEntry::new(
            "spam@example.com",
            EntrySource::Auto,
            now - Duration::days(7),
        );
        let service = DenylistService::new(MockStorage::with_entry(entry), 7);

        let lookup = service.lookup("spam@example.com", now).await;
        assert!(lookup.found());
        assert!(lookup.in_grace_period, "exactly grace_days old is in grace");
    }

    #[tokio::test]
    async fn lookup_past_grace_boundary() {
        let now = Utc::now();
        let entry = DenylistEntry::new(
            "spam@example.com",
            EntrySource::Auto,
            now - Duration::days(7) - Duration::seconds(1),
        );
        let service = DenylistService::new(MockStorage::with_entry(entry), 7);

        let lookup = service.lookup("spam@example.com", now).await;
        assert!(lookup.found());
        assert!(!lookup.in_grace_period);
    }

    #[tokio::test]
    async fn zero_grace_days_blocks_immediately() {
        let now = Utc::now();
        let entry = DenylistEntry::new(
            "spam@example.com",
            EntrySource::Auto,
            now - Duration::seconds(5),
        );
        let service = DenylistService::new(MockStorage::with_entry(entry), 0);

        let lookup = service.lookup("spam@example.com", now).await;
        assert!(lookup.found());
        assert!(!lookup.in_grace_period);
    }

    #[tokio::test]
    async fn lookup_normalizes_before_matching() {
        let now = Utc::now();
        let entry = DenylistEntry::new("spam@example.com", EntrySource::Auto, now);
        let service = DenylistService::new(MockStorage::with_entry(entry), 7);

        let lookup = service.lookup("  SPAM@Example.Com ", now).await;
        assert!(lookup.found());
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let now = Utc::now();
        let service = DenylistService::new(MockStorage::new(), 7);

        let first = service
            .add("Spam@Example.com", EntrySource::Auto, now - Duration::days(3))
            .await
            .unwrap();
        assert_eq!(first.address, "spam@example.com");

        let second = service
            .add("spam@example.com", EntrySource::Auto, now)
            .await
            .unwrap();

        // Same entry, original add date, refreshed confirmation.
        assert_eq!(second.added_at, first.added_at);
        assert_eq!(second.last_confirmed_at, now);
        assert_eq!(service.all_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_rejects_invalid_address() {
        let service = DenylistService::new(MockStorage::new(), 7);
        let result = service.add("not-an-address", EntrySource::Manual, Utc::now()).await;
        assert!(matches!(result, Err(DenylistError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn remove_absent_is_noop() {
        let service = DenylistService::new(MockStorage::new(), 7);
        assert!(!service.remove("nobody@example.com").await.unwrap());
        assert!(!service.remove("garbage").await.unwrap());
    }

    #[tokio::test]
    async fn recent_entries_respects_window() {
        let now = Utc::now();
        let storage = MockStorage::new();
        storage
            .upsert(&DenylistEntry::new(
                "old@example.com",
                EntrySource::Auto,
                now - Duration::days(30),
            ))
            .await
            .unwrap();
        storage
            .upsert(&DenylistEntry::new(
                "new@example.com",
                EntrySource::Auto,
                now - Duration::days(2),
            ))
            .await
            .unwrap();

        let service = DenylistService::new(storage, 7);
        let recent = service.recent_entries(7, now).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].address, "new@example.com");
    }

    #[tokio::test]
    async fn storage_fault_degrades_lookup_to_miss() {
        let service = DenylistService::new(FailingStorage, 7);
        let lookup = service.lookup("anyone@example.com", Utc::now()).await;
        assert!(!lookup.found());
        assert!(!lookup.in_grace_period);
    }
}
