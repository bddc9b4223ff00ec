//! Per-principal concurrency governor
//!
//! Bounds how many probe executions a principal may have in flight at once.
//! Admission is all-or-nothing: when the ceiling is reached the caller gets
//! an immediate rejection, never a queue. Release is tied to an RAII guard
//! so that every admitted execution releases exactly once on every exit
//! path, including error, timeout, and panic unwinding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

/// Process-wide concurrency governor shared across runs
#[derive(Clone)]
pub struct ConcurrencyGovernor {
    limit: usize,
    in_flight: Arc<Mutex<HashMap<String, usize>>>,
}

impl ConcurrencyGovernor {
    /// Create a governor with the given per-principal ceiling
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Configured per-principal ceiling
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Atomically check and admit one execution for the principal.
    ///
    /// Returns `None` immediately when the principal is at the ceiling.
    /// The returned guard releases the slot when dropped.
    pub fn try_admit(&self, principal: &str) -> Option<AdmissionGuard> {
        let mut map = self.in_flight.lock().expect("governor lock poisoned");
        let count = map.entry(principal.to_string()).or_insert(0);

        if *count >= self.limit {
            warn!(principal, limit = self.limit, "admission denied");
            // Do not leave a zero entry behind for a brand-new principal
            if *count == 0 {
                map.remove(principal);
            }
            return None;
        }

        *count += 1;
        debug!(principal, in_flight = *count, "admitted");

        Some(AdmissionGuard {
            principal: principal.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Current in-flight count for a principal (0 if unknown)
    pub fn in_flight(&self, principal: &str) -> usize {
        self.in_flight
            .lock()
            .expect("governor lock poisoned")
            .get(principal)
            .copied()
            .unwrap_or(0)
    }
}

/// Scoped admission slot; dropping it releases the slot
pub struct AdmissionGuard {
    principal: String,
    in_flight: Arc<Mutex<HashMap<String, usize>>>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        let mut map = match self.in_flight.lock() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };

        match map.get_mut(&self.principal) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    map.remove(&self.principal);
                }
            }
            _ => {
                // A release without a matching admit means the counter
                // discipline is broken somewhere.
                error!(
                    principal = %self.principal,
                    "governor release without matching admit"
                );
                debug_assert!(false, "governor release without matching admit");
            }
        }
    }
}
