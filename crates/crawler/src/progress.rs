//
// progress.rs
//
// Observational busy/idle signal for the dispatcher queue
//

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Started,
    Stopped,
    /// Ready work is being held back by a global operation
    Paused,
    Resumed,
    /// Items waiting on a timer, ready, or running
    PendingItemCountUpdated(usize),
}

/// Broadcasts transitions of the dispatcher's busy state.
///
/// Nothing in the crawler reads this back; it exists for status bars and tests.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: broadcast::Sender<ProgressStatus>,
    busy: AtomicBool,
    paused: AtomicBool,
    pending: AtomicUsize,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            busy: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressStatus> {
        self.tx.subscribe()
    }

    pub fn is_in_progress(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn emit(&self, status: ProgressStatus) {
        // No subscribers is fine
        let _ = self.tx.send(status);
    }

    /// Record queue occupancy. `active` counts ready plus running items and
    /// drives Started/Stopped; `pending` additionally counts items still on a timer.
    pub(crate) fn update(&self, active: usize, pending: usize) {
        if self.pending.swap(pending, Ordering::SeqCst) != pending {
            self.emit(ProgressStatus::PendingItemCountUpdated(pending));
        }

        let busy = active > 0;
        if self.busy.swap(busy, Ordering::SeqCst) != busy {
            if busy {
                log::trace!("Crawler busy");
                self.emit(ProgressStatus::Started);
            } else {
                log::trace!("Crawler idle");
                self.paused.store(false, Ordering::SeqCst);
                self.emit(ProgressStatus::Stopped);
            }
        }
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        if self.paused.swap(paused, Ordering::SeqCst) != paused {
            self.emit(if paused {
                ProgressStatus::Paused
            } else {
                ProgressStatus::Resumed
            });
        }
    }
}
