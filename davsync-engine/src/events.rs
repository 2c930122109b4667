use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use crate::engine::{SyncReport, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Connecting,
    Listing,
    Uploading,
    Downloading,
    Merging,
    Completed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Connecting => "connecting",
            SyncPhase::Listing => "listing",
            SyncPhase::Uploading => "uploading",
            SyncPhase::Downloading => "downloading",
            SyncPhase::Merging => "merging",
            SyncPhase::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StatusChanged(SyncStatus),
    Progress {
        phase: SyncPhase,
        percent: u8,
        processed: usize,
        total: usize,
    },
    Completed(SyncReport),
    Conflict {
        id: String,
    },
    Error {
        message: String,
    },
}

impl SyncEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::StatusChanged(_) => "status_changed",
            SyncEvent::Progress { .. } => "progress",
            SyncEvent::Completed(_) => "completed",
            SyncEvent::Conflict { .. } => "conflict",
            SyncEvent::Error { .. } => "error",
        }
    }
}

pub type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct ListenerSlots {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Registry of host callbacks notified about sync lifecycle events.
/// Listeners run synchronously; a panicking listener is logged and skipped
/// so it can never abort a sync in progress.
#[derive(Default)]
pub struct ListenerSet {
    inner: Mutex<ListenerSlots>,
}

impl ListenerSet {
    pub fn add(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) -> ListenerId {
        let mut slots = self.lock();
        let id = slots.next_id;
        slots.next_id += 1;
        slots.entries.push((id, Arc::new(listener)));
        ListenerId(id)
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut slots = self.lock();
        let before = slots.entries.len();
        slots.entries.retain(|(slot_id, _)| *slot_id != id.0);
        slots.entries.len() != before
    }

    pub fn emit(&self, event: &SyncEvent) {
        let listeners: Vec<Listener> = self
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                eprintln!(
                    "[davsync] warning: event listener panicked on {} event",
                    event.kind()
                );
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerSlots> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_receive_events_until_removed() {
        let set = ListenerSet::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_for_listener = Arc::clone(&hits);
        let id = set.add(move |_| {
            hits_for_listener.fetch_add(1, Ordering::SeqCst);
        });

        set.emit(&SyncEvent::StatusChanged(SyncStatus::Syncing));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(set.remove(id));
        set.emit(&SyncEvent::StatusChanged(SyncStatus::Idle));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(!set.remove(id));
    }

    #[test]
    fn panicking_listener_does_not_stop_the_others() {
        let set = ListenerSet::default();
        set.add(|_| panic!("listener bug"));
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_for_listener = Arc::clone(&hits);
        set.add(move |_| {
            hits_for_listener.fetch_add(1, Ordering::SeqCst);
        });

        set.emit(&SyncEvent::Error {
            message: "boom".to_string(),
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
