//! Background processors for auto top-up and low-balance alerts.
//!
//! Each processor evaluates one user at a time through `process_user` and a
//! whole cycle through `process_all`. Users within a cycle run concurrently up
//! to a configured bound; a failure for one user is recorded in the cycle
//! report and never aborts the others.

pub mod alert;
pub mod topup;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use z_credits_core::UserId;

pub use alert::{AlertCycleReport, AlertOutcome, AlertProcessor};
pub use topup::{TopupCycleReport, TopupOutcome, TopupProcessor};

/// Attempts at a compare-and-swap settings update before giving up.
pub(crate) const CAS_ATTEMPTS: usize = 3;

/// Tracks which users currently have work in flight.
#[derive(Debug, Clone, Default)]
pub struct UserLocks {
    in_flight: Arc<Mutex<HashSet<UserId>>>,
}

impl UserLocks {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `user_id`, or return `None` if it is already claimed.
    ///
    /// The claim is released when the guard drops.
    #[must_use]
    pub fn try_acquire(&self, user_id: &UserId) -> Option<UserGuard> {
        if !self.in_flight.lock().insert(*user_id) {
            return None;
        }
        Some(UserGuard {
            user_id: *user_id,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Whether `user_id` is currently claimed.
    #[must_use]
    pub fn is_held(&self, user_id: &UserId) -> bool {
        self.in_flight.lock().contains(user_id)
    }
}

/// Releases a [`UserLocks`] claim on drop.
#[derive(Debug)]
pub struct UserGuard {
    user_id: UserId,
    in_flight: Arc<Mutex<HashSet<UserId>>>,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.user_id);
    }
}
