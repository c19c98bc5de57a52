use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Bookkeeping of subscription requests awaiting acknowledgment
///
/// Every subscription request is assigned a token which is removed once the acknowledgment
/// arrives. The tracker becomes ready when it has been sealed, meaning all requests have been
/// issued, and no token is pending anymore.
pub struct SubscriptionTracker {
    next_token: AtomicU16,
    pending: Mutex<HashSet<u16>>,
    sealed: AtomicBool,
    ready: watch::Sender<bool>,
}

impl Default for SubscriptionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionTracker {
    /// Creates a new, unsealed tracker
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);

        Self {
            next_token: AtomicU16::new(1),
            pending: Mutex::new(HashSet::new()),
            sealed: AtomicBool::new(false),
            ready,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<u16>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, pending: &HashSet<u16>) {
        let ready = self.sealed.load(Ordering::SeqCst) && pending.is_empty();
        self.ready.send_replace(ready);
    }

    /// Records a new subscription request and returns its token
    pub fn issue(&self) -> u16 {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending();
        pending.insert(token);
        self.update(&pending);
        token
    }

    /// Marks the request with the given token as acknowledged
    pub fn acknowledge(&self, token: u16) {
        let mut pending = self.pending();
        pending.remove(&token);
        self.update(&pending);
    }

    /// Declares that no further requests will be issued
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
        let pending = self.pending();
        self.update(&pending);
    }

    /// Forgets all requests and returns to the unsealed state
    pub fn reset(&self) {
        self.sealed.store(false, Ordering::SeqCst);
        let mut pending = self.pending();
        pending.clear();
        self.update(&pending);
    }

    /// Number of requests awaiting acknowledgment
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Whether all issued requests have been acknowledged
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Waits until the tracker becomes ready
    pub async fn wait(&self) {
        let mut ready = self.ready.subscribe();

        loop {
            let is_ready = *ready.borrow_and_update();

            if is_ready || ready.changed().await.is_err() {
                return;
            }
        }
    }
}
