//! Table of in-flight requests keyed by fingerprint.
//!
//! [`ActiveRequestRegistry`] is the deduplication and cancellation
//! authority. It is constructed once, shared via `Arc`, and injected into
//! the orchestrator. Every operation takes the table lock for a single
//! synchronous step; none of them awaits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use futures::future::{BoxFuture, Shared};
use genqueue_core::fingerprint::RequestFingerprint;
use genqueue_core::generation_error::GenerationError;
use genqueue_core::types::Timestamp;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::orchestrator::GenerationResult;

/// Settlement shared by the original caller and every deduplicated joiner.
pub type SharedOutcome = Shared<BoxFuture<'static, Result<GenerationResult, GenerationError>>>;

/// One in-flight request.
#[derive(Clone)]
pub struct ActiveRequest {
    /// Unique per registration; distinguishes successive requests that
    /// reuse a fingerprint.
    pub id: Uuid,
    pub fingerprint: RequestFingerprint,
    pub outcome: SharedOutcome,
    pub cancel: CancellationToken,
    pub created_at: Timestamp,
    /// Insertion order, assigned by the registry.
    seq: u64,
}

impl ActiveRequest {
    pub fn new(
        fingerprint: RequestFingerprint,
        outcome: SharedOutcome,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            outcome,
            cancel,
            created_at: Utc::now(),
            seq: 0,
        }
    }
}

impl std::fmt::Debug for ActiveRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveRequest")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Result of [`ActiveRequestRegistry::lookup_or_insert_with`].
#[derive(Debug)]
pub enum Registration {
    /// An entry already existed; the caller should await its outcome.
    Joined(ActiveRequest),
    /// The caller's entry was inserted and it now owns the backend call.
    Registered(ActiveRequest),
}

/// Counters for monitoring deduplication effectiveness.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Requests that issued a new backend call.
    pub started: u64,
    /// Requests that joined an in-flight call.
    pub deduplicated: u64,
}

/// Errors surfaced by cleanup. Logged by the orchestrator, never returned
/// to callers.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The entry was already removed (e.g. by `cancel_all`) or replaced by
    /// a newer request with the same fingerprint.
    #[error("Registry entry for {0} was already released or replaced")]
    Stale(RequestFingerprint),
}

/// Process-wide table of in-flight requests.
#[derive(Default)]
pub struct ActiveRequestRegistry {
    entries: Mutex<HashMap<RequestFingerprint, ActiveRequest>>,
    next_seq: AtomicU64,
    started: AtomicU64,
    deduplicated: AtomicU64,
}

impl ActiveRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the table. A panic while holding the lock cannot leave the map
    /// half-updated (every operation is a single map call), so poisoning
    /// is ignored.
    fn table(&self) -> MutexGuard<'_, HashMap<RequestFingerprint, ActiveRequest>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stamp(&self, mut request: ActiveRequest) -> ActiveRequest {
        request.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        request
    }

    /// Return the in-flight request for `fingerprint`, if any.
    pub fn lookup(&self, fingerprint: &RequestFingerprint) -> Option<ActiveRequest> {
        self.table().get(fingerprint).cloned()
    }

    /// Insert `request` under its fingerprint. Last writer wins.
    pub fn insert(&self, request: ActiveRequest) {
        let request = self.stamp(request);
        self.table().insert(request.fingerprint.clone(), request);
    }

    /// Atomically join an existing entry or insert a new one.
    ///
    /// `make` runs under the table lock and must not block.
    pub fn lookup_or_insert_with(
        &self,
        fingerprint: &RequestFingerprint,
        make: impl FnOnce() -> ActiveRequest,
    ) -> Registration {
        let mut table = self.table();
        if let Some(existing) = table.get(fingerprint) {
            self.deduplicated.fetch_add(1, Ordering::Relaxed);
            return Registration::Joined(existing.clone());
        }

        let request = self.stamp(make());
        table.insert(fingerprint.clone(), request.clone());
        self.started.fetch_add(1, Ordering::Relaxed);
        Registration::Registered(request)
    }

    /// Remove the entry for `fingerprint`. Removing an absent key is a no-op.
    pub fn remove(&self, fingerprint: &RequestFingerprint) -> Option<ActiveRequest> {
        self.table().remove(fingerprint)
    }

    /// Remove the entry only if it is still the registration `id`.
    pub fn release(&self, fingerprint: &RequestFingerprint, id: Uuid) -> Result<(), RegistryError> {
        let mut table = self.table();
        match table.get(fingerprint) {
            Some(entry) if entry.id == id => {
                table.remove(fingerprint);
                Ok(())
            }
            _ => Err(RegistryError::Stale(fingerprint.clone())),
        }
    }

    /// Signal cancellation on every entry, then clear the table.
    ///
    /// Returns the number of entries signalled.
    pub fn cancel_all(&self) -> usize {
        let mut table = self.table();
        for entry in table.values() {
            entry.cancel.cancel();
        }
        let count = table.len();
        table.clear();
        count
    }

    /// Cancel the most recently registered entry. Its own cleanup removes
    /// it from the table.
    pub fn cancel_latest(&self) -> bool {
        let table = self.table();
        match table.values().max_by_key(|entry| entry.seq) {
            Some(entry) => {
                tracing::debug!(fingerprint = %entry.fingerprint, "Cancelling current request");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_any(&self) -> bool {
        !self.table().is_empty()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_any()
    }

    /// Returns a snapshot of the deduplication counters.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            started: self.started.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
        }
    }
}
