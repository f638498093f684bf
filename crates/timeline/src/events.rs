//! Notifications emitted after successful mutating operations

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tl_core::Blake3Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    TimelineCreated { timeline: String, checkpoint: Blake3Hash },
    TimelineDeleted { timeline: String },
    CheckpointCreated { timeline: String, checkpoint: Blake3Hash },
    CheckpointRestored { timeline: String, checkpoint: Blake3Hash },
    BranchCreated { timeline: String, branch: String, checkpoint: Blake3Hash },
    BranchSwitched { timeline: String, branch: String, checkpoint: Blake3Hash },
}

impl TimelineEvent {
    pub fn timeline(&self) -> &str {
        match self {
            TimelineEvent::TimelineCreated { timeline, .. }
            | TimelineEvent::TimelineDeleted { timeline }
            | TimelineEvent::CheckpointCreated { timeline, .. }
            | TimelineEvent::CheckpointRestored { timeline, .. }
            | TimelineEvent::BranchCreated { timeline, .. }
            | TimelineEvent::BranchSwitched { timeline, .. } => timeline,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimelineEvent::TimelineCreated { .. } => "timeline_created",
            TimelineEvent::TimelineDeleted { .. } => "timeline_deleted",
            TimelineEvent::CheckpointCreated { .. } => "checkpoint_created",
            TimelineEvent::CheckpointRestored { .. } => "checkpoint_restored",
            TimelineEvent::BranchCreated { .. } => "branch_created",
            TimelineEvent::BranchSwitched { .. } => "branch_switched",
        }
    }
}

/// Receiver of manager events; must not block
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TimelineEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TimelineEvent) {}
}

/// Fans events out to channel subscribers
///
/// Subscribers whose receiver was dropped are pruned on the next emit.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<TimelineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<TimelineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: TimelineEvent) {
        tracing::debug!("Event {} for {}", event.name(), event.timeline());
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
