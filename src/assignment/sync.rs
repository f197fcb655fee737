//! Assignment-changed events shared between views of the same course.
//!
//! Views never share state. A view that commits an assignment publishes an
//! [`AssignmentChanged`] on the bus; every other view of the course treats it
//! as a signal to drop its availability cache and reload from the backend.

use serde::Serialize;
use tokio::sync::broadcast;

use super::slot_utils::SlotKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentChanged {
    pub source_instance_id: String,
    pub course_id: i64,
    pub monitor_id: Option<i64>,
    pub affected_slot_keys: Vec<SlotKey>,
}

impl AssignmentChanged {
    /// Whether a view with `instance_id` looking at `course_id` should react
    pub fn concerns(&self, instance_id: &str, course_id: i64) -> bool {
        self.source_instance_id != instance_id && self.course_id == course_id
    }
}

/// Cloneable handle over a bounded broadcast channel
#[derive(Clone, Debug)]
pub struct SyncBus {
    tx: broadcast::Sender<AssignmentChanged>,
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl SyncBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of views that will see the event
    pub fn publish(&self, event: AssignmentChanged) -> usize {
        // no subscriber is not an error
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssignmentChanged> {
        self.tx.subscribe()
    }
}

/// Unique id for a view instance
pub fn new_instance_id() -> String {
    format!("view-{:016x}", rand::random::<u64>())
}
