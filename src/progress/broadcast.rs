//! Ownership-arbitrated status broadcasting.
//!
//! Several UI regions can produce status text; the broadcaster decides
//! which one may currently post. The phase tracker never posts without
//! ownership: if it lacks ownership it forces a hand-off request instead
//! of silently dropping the update.

use std::sync::Mutex;
use tracing::debug;

/// Callback invoked when ownership changes hands. Receives the new
/// owner's requester id.
pub type OwnershipCallback = Box<dyn Fn(String) + Send + Sync>;

/// External arbiter deciding which subsystem may post status text.
pub trait StatusBroadcaster: Send + Sync {
    /// Request ownership, posting `initial_message` on grant. Returns
    /// whether ownership was granted.
    fn request_ownership(&self, requester_id: &str, initial_message: &str) -> bool;

    fn can_post(&self, requester_id: &str) -> bool;

    fn post_message(&self, text: &str, requester_id: &str);

    fn subscribe_to_ownership_changes(&self, callback: OwnershipCallback);
}

/// In-process broadcaster that prints status text to stderr.
///
/// Ownership requests always succeed (hand-off semantics): the previous
/// owner is displaced and subscribers are notified.
pub struct ConsoleBroadcaster {
    owner: Mutex<Option<String>>,
    subscribers: Mutex<Vec<OwnershipCallback>>,
}

impl ConsoleBroadcaster {
    pub fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn notify(&self, new_owner: &str) {
        for callback in self.subscribers.lock().unwrap().iter() {
            callback(new_owner.to_string());
        }
    }
}

impl Default for ConsoleBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster for ConsoleBroadcaster {
    fn request_ownership(&self, requester_id: &str, initial_message: &str) -> bool {
        {
            let mut owner = self.owner.lock().unwrap();
            if owner.as_deref() == Some(requester_id) {
                return true;
            }
            debug!(
                from = ?owner.as_deref(),
                to = requester_id,
                "Status ownership hand-off"
            );
            *owner = Some(requester_id.to_string());
        }
        self.notify(requester_id);
        self.post_message(initial_message, requester_id);
        true
    }

    fn can_post(&self, requester_id: &str) -> bool {
        self.owner.lock().unwrap().as_deref() == Some(requester_id)
    }

    fn post_message(&self, text: &str, requester_id: &str) {
        if !self.can_post(requester_id) {
            debug!(requester_id, "Dropping status post from non-owner");
            return;
        }
        eprintln!("  {}", text);
    }

    fn subscribe_to_ownership_changes(&self, callback: OwnershipCallback) {
        self.subscribers.lock().unwrap().push(callback);
    }
}
