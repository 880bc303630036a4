//
// scheduler.rs
//
// Per-key backoff timers feeding a two-class ready queue
//

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::CrawlerConfig;
use crate::progress::ProgressReporter;
use crate::solution::ProjectId;
use crate::work_item::{WorkItem, WorkKey};

#[derive(Debug)]
struct PendingEntry {
    item: WorkItem,
    /// First-submission order, kept across merges
    seq: u64,
    /// Bumped every time the timer is reset so stale timers can tell
    generation: u64,
    timer: Option<CancellationToken>,
    ready: bool,
}

#[derive(Debug)]
struct InFlight {
    token: CancellationToken,
    invalidate: bool,
}

#[derive(Debug, Default)]
struct SchedulerState {
    pending: HashMap<WorkKey, PendingEntry>,
    high: BTreeMap<u64, WorkKey>,
    normal: BTreeMap<u64, WorkKey>,
    in_flight: HashMap<WorkKey, InFlight>,
    next_seq: u64,
    shut_down: bool,
}

impl SchedulerState {
    fn ready_len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    fn unready(&mut self, key: &WorkKey) {
        if let Some(entry) = self.pending.get(key) {
            self.high.remove(&entry.seq);
            self.normal.remove(&entry.seq);
        }
    }

    /// Move a pending entry into its ready class. Returns false for unknown keys.
    fn make_ready(&mut self, key: WorkKey) -> bool {
        self.unready(&key);
        let Some(entry) = self.pending.get_mut(&key) else {
            return false;
        };
        if let Some(timer) = entry.timer.take() {
            timer.cancel();
        }
        entry.ready = true;
        let seq = entry.seq;
        if entry.item.is_high_priority {
            self.high.insert(seq, key);
        } else {
            self.normal.insert(seq, key);
        }
        true
    }

    fn pick(
        class: &BTreeMap<u64, WorkKey>,
        in_flight: &HashMap<WorkKey, InFlight>,
        last_project: Option<ProjectId>,
    ) -> Option<u64> {
        let free = |key: &WorkKey| !in_flight.contains_key(key);
        last_project
            .and_then(|project| {
                class
                    .iter()
                    .find(|(_, key)| key.project_id() == project && free(key))
            })
            .or_else(|| class.iter().find(|(_, key)| free(key)))
            .map(|(seq, _)| *seq)
    }
}

/// Owns every not-yet-dispatched work item of one workspace.
///
/// Ingestion calls [`enqueue`](Self::enqueue); the dispatcher calls
/// [`take_next`](Self::take_next) and [`complete`](Self::complete). All state
/// sits behind one mutex that is never held across an await point.
#[derive(Debug)]
pub struct BackoffScheduler {
    state: Mutex<SchedulerState>,
    config: Arc<RwLock<CrawlerConfig>>,
    progress: Arc<ProgressReporter>,
    ready: Notify,
    root: CancellationToken,
    tasks: TaskTracker,
}

/// A work item handed to the dispatcher together with its cancellation token
#[derive(Debug)]
pub struct Dispatch {
    pub item: WorkItem,
    pub token: CancellationToken,
}

impl BackoffScheduler {
    pub fn new(
        config: Arc<RwLock<CrawlerConfig>>,
        progress: Arc<ProgressReporter>,
        root: CancellationToken,
        tasks: TaskTracker,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SchedulerState::default()),
            config,
            progress,
            ready: Notify::new(),
            root,
            tasks,
        })
    }

    fn report(&self, state: &SchedulerState) {
        self.progress.update(
            state.ready_len() + state.in_flight.len(),
            state.pending.len() + state.in_flight.len(),
        );
    }

    /// Insert or coalesce a work item.
    ///
    /// A running execution for the same key is cancelled unless it is a removal.
    pub fn enqueue(self: &Arc<Self>, item: WorkItem) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if state.shut_down {
            return;
        }
        let key = item.key;

        if let Some(running) = state.in_flight.get(&key) {
            if !running.invalidate && !running.token.is_cancelled() {
                log::trace!("Superseding in-flight work for {}", key);
                running.token.cancel();
            }
        }

        let seq = state.next_seq;
        let entry = match state.pending.entry(key) {
            Entry::Occupied(e) => {
                let entry = e.into_mut();
                let was_high = entry.item.is_high_priority;
                entry.item.merge(item);
                log::trace!("Coalesced {} (reasons {:?})", key, entry.item.reasons);
                if entry.ready && was_high == entry.item.is_high_priority {
                    self.report(state);
                    return;
                }
                entry
            }
            Entry::Vacant(e) => {
                log::trace!("Queued {} (reasons {:?})", key, item.reasons);
                state.next_seq += 1;
                e.insert(PendingEntry {
                    item,
                    seq,
                    generation: 0,
                    timer: None,
                    ready: false,
                })
            }
        };

        if entry.ready || entry.item.is_immediate() {
            state.make_ready(key);
            self.ready.notify_one();
        } else {
            let delay = self.config.read().unwrap().backoff_for(entry.item.backoff);
            if let Some(old) = entry.timer.take() {
                old.cancel();
            }
            entry.generation += 1;
            entry.timer = Some(self.spawn_timer(key, entry.generation, delay));
        }
        self.report(state);
    }

    fn spawn_timer(self: &Arc<Self>, key: WorkKey, generation: u64, delay: Duration) -> CancellationToken {
        let token = self.root.child_token();
        let timer = token.clone();
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => this.on_timer_expired(key, generation),
            }
        });
        token
    }

    fn on_timer_expired(&self, key: WorkKey, generation: u64) {
        let mut state = self.state.lock().unwrap();
        let current = state
            .pending
            .get(&key)
            .is_some_and(|e| e.generation == generation && !e.ready);
        if !current || state.shut_down {
            return;
        }
        log::trace!("Backoff elapsed for {}", key);
        state.make_ready(key);
        self.report(&state);
        self.ready.notify_one();
    }

    /// Wait until something may have become ready
    pub async fn notified(&self) {
        self.ready.notified().await
    }

    pub fn has_ready(&self) -> bool {
        self.state.lock().unwrap().ready_len() > 0
    }

    /// Take the next dispatchable item: high-priority first, preferring items of
    /// `last_project`, otherwise in submission order. Keys already running are skipped.
    pub fn take_next(&self, last_project: Option<ProjectId>) -> Option<Dispatch> {
        let mut state = self.state.lock().unwrap();
        if state.shut_down {
            return None;
        }

        let (seq, high) = match SchedulerState::pick(&state.high, &state.in_flight, last_project) {
            Some(seq) => (seq, true),
            None => (
                SchedulerState::pick(&state.normal, &state.in_flight, last_project)?,
                false,
            ),
        };
        let key = if high {
            state.high.remove(&seq)
        } else {
            state.normal.remove(&seq)
        }?;
        let entry = state.pending.remove(&key)?;
        let token = self.root.child_token();
        state.in_flight.insert(
            key,
            InFlight {
                token: token.clone(),
                invalidate: entry.item.is_invalidate(),
            },
        );
        self.report(&state);
        Some(Dispatch {
            item: entry.item,
            token,
        })
    }

    /// Release the key of a finished execution. If it was superseded, its
    /// reasons are folded into the pending replacement so nothing is lost.
    pub fn complete(&self, dispatch: Dispatch) {
        let mut state = self.state.lock().unwrap();
        let key = dispatch.item.key;
        state.in_flight.remove(&key);

        if dispatch.token.is_cancelled() && !state.shut_down {
            if let Some(entry) = state.pending.get_mut(&key) {
                log::trace!("Re-merging cancelled work for {}", key);
                let replacement = std::mem::replace(&mut entry.item, dispatch.item);
                entry.item.merge(replacement);
            }
        }
        self.report(&state);
        drop(state);
        // The key is free again; a ready item may have been waiting on it
        self.ready.notify_one();
    }

    /// Cancel every timer and running token and drop all pending work
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shut_down = true;
        self.root.cancel();
        let dropped = state.pending.len();
        state.pending.clear();
        state.high.clear();
        state.normal.clear();
        for running in state.in_flight.values() {
            running.token.cancel();
        }
        log::trace!("Scheduler shut down, dropped {} pending items", dropped);
        self.report(&state);
        self.ready.notify_waiters();
    }

    #[cfg(test)]
    pub(crate) fn pending_keys(&self) -> Vec<WorkKey> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<_> = state.pending.iter().map(|(k, e)| (e.seq, *k)).collect();
        keys.sort();
        keys.into_iter().map(|(_, k)| k).collect()
    }

    #[cfg(test)]
    pub(crate) fn pending_item(&self, key: &WorkKey) -> Option<WorkItem> {
        self.state
            .lock()
            .unwrap()
            .pending
            .get(key)
            .map(|e| e.item.clone())
    }
}
