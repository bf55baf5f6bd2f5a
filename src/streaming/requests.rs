//! Pending far block requests.
//!
//! Each key moves `Unsent -> Sent -> (satisfied | FailedPermanently | Superseded)`.
//! Satisfied requests leave the table; permanent failures stay so the key is
//! never asked for again during the session.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::voxel::far_block::FarKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// Recorded by a scan, not yet flushed
    Unsent,
    /// Flushed, waiting for a response
    Sent,
    /// The viewer moved on while the request was in flight
    Superseded,
    /// The server will never provide this block
    FailedPermanently,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    pub status: RequestStatus,
    /// Scan iteration that last asked for the key
    pub iteration: u32,
}

/// Thread-safe request table shared by scanners and the fetch client
#[derive(Default)]
pub struct RequestTable {
    entries: Mutex<HashMap<FarKey, PendingRequest>>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a scan needs `key`.
    ///
    /// Returns true if a new request was queued. Keys already queued or in
    /// flight only have their iteration refreshed; failed keys are refused.
    pub fn request(&self, key: FarKey, iteration: u32) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&key) {
            None => {
                entries.insert(
                    key,
                    PendingRequest {
                        status: RequestStatus::Unsent,
                        iteration,
                    },
                );
                true
            }
            Some(entry) => match entry.status {
                RequestStatus::FailedPermanently => false,
                RequestStatus::Superseded => {
                    // Still in flight; the arrival will be used as-is
                    entry.status = RequestStatus::Sent;
                    entry.iteration = iteration;
                    false
                }
                RequestStatus::Unsent | RequestStatus::Sent => {
                    entry.iteration = entry.iteration.max(iteration);
                    false
                }
            },
        }
    }

    /// Mark up to `max` unsent keys as sent and return them with their iteration
    pub fn take_unsent(&self, max: usize) -> Vec<(FarKey, u32)> {
        let mut entries = self.entries.lock();
        let mut taken = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if taken.len() >= max {
                break;
            }
            if entry.status == RequestStatus::Unsent {
                entry.status = RequestStatus::Sent;
                taken.push((*key, entry.iteration));
            }
        }
        taken
    }

    /// Put keys back into the unsent queue after a failed send
    pub fn requeue(&self, keys: &[(FarKey, u32)]) {
        let mut entries = self.entries.lock();
        for (key, _) in keys {
            if let Some(entry) = entries.get_mut(key) {
                if entry.status == RequestStatus::Sent {
                    entry.status = RequestStatus::Unsent;
                }
            }
        }
    }

    /// Viewer moved: drop unsent requests, mark in-flight ones superseded
    pub fn supersede_in_flight(&self) -> usize {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.status != RequestStatus::Unsent);
        let mut superseded = 0;
        for entry in entries.values_mut() {
            if entry.status == RequestStatus::Sent {
                entry.status = RequestStatus::Superseded;
                superseded += 1;
            }
        }
        superseded
    }

    /// A response arrived; remove and return the entry
    pub fn complete(&self, key: FarKey) -> Option<PendingRequest> {
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.status == RequestStatus::FailedPermanently => Some(*entry),
            Some(_) => entries.remove(&key),
            None => None,
        }
    }

    pub fn fail_permanently(&self, key: FarKey) {
        let mut entries = self.entries.lock();
        let iteration = entries.get(&key).map(|e| e.iteration).unwrap_or(0);
        entries.insert(
            key,
            PendingRequest {
                status: RequestStatus::FailedPermanently,
                iteration,
            },
        );
    }

    /// Forget a key so a later scan may request it again
    pub fn clear(&self, key: FarKey) {
        self.entries.lock().remove(&key);
    }

    /// Forget everything, including permanent failures
    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    pub fn status(&self, key: FarKey) -> Option<RequestStatus> {
        self.entries.lock().get(&key).map(|e| e.status)
    }

    pub fn get(&self, key: FarKey) -> Option<PendingRequest> {
        self.entries.lock().get(&key).copied()
    }

    pub fn is_failed(&self, key: FarKey) -> bool {
        self.status(key) == Some(RequestStatus::FailedPermanently)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn unsent_len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.status == RequestStatus::Unsent)
            .count()
    }
}
