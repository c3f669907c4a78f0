// ==============================================================================
// batch/events.rs - Batch Lifecycle Events
// ==============================================================================
// Description: Typed scheduler events with synchronous fan-out and
//              per-listener panic isolation
// Author: Matt Barham
// Created: 2026-02-20
// Modified: 2026-05-06
// Version: 1.0.1
// ==============================================================================

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Every batch and job state transition emits one of these
#[derive(Debug, Clone)]
pub enum BatchEvent {
    BatchStarted { batch_id: Uuid, job_count: usize },
    BatchPaused { batch_id: Uuid },
    BatchResumed { batch_id: Uuid },
    BatchCancelled { batch_id: Uuid },
    BatchCompleted { batch_id: Uuid },
    BatchFailed { batch_id: Uuid },
    JobStarted { batch_id: Uuid, job_id: Uuid, file: String },
    JobProgress { batch_id: Uuid, job_id: Uuid, progress: f32 },
    JobCompleted { batch_id: Uuid, job_id: Uuid },
    JobFailed { batch_id: Uuid, job_id: Uuid, error: String },
    JobRetrying { batch_id: Uuid, job_id: Uuid, retry_count: u32 },
}

pub type EventListener = Box<dyn Fn(&BatchEvent) + Send + Sync>;

/// Listener registry with synchronous fan-out. A panicking listener is
/// isolated and logged; it never prevents other listeners from running or
/// corrupts scheduler state.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<EventListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: EventListener) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    pub fn emit(&self, event: &BatchEvent) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("Event listener panicked on {:?}, continuing", event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Box::new(|_| panic!("bad listener")));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(Box::new(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let batch_id = Uuid::new_v4();
        bus.emit(&BatchEvent::BatchStarted {
            batch_id,
            job_count: 1,
        });
        bus.emit(&BatchEvent::BatchCompleted { batch_id });

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
