//
// workspace.rs
//
// Mutable workspace handle that publishes change records
//

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;

use crate::document_tracker::{ActiveDocumentProvider, DocumentTracker};
use crate::events::{ChangeKind, ChangeRecord, WorkspaceChange};
use crate::solution::{DocumentId, Solution};

static NEXT_WORKSPACE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceId(u64);

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workspace#{}", self.0)
    }
}

/// Host category, used to restrict analyzers to certain workspaces
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceKind(pub String);

impl WorkspaceKind {
    pub fn host() -> Self {
        Self("Host".to_string())
    }

    pub fn miscellaneous_files() -> Self {
        Self("MiscellaneousFiles".to_string())
    }

    pub fn preview() -> Self {
        Self("Preview".to_string())
    }
}

impl fmt::Display for WorkspaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Holds the current solution and fans change records out to subscribers.
///
/// Every mutation swaps in a new immutable [`Solution`] and publishes a
/// [`WorkspaceChange`] carrying both snapshots.
pub struct Workspace {
    id: WorkspaceId,
    kind: WorkspaceKind,
    current: RwLock<Arc<Solution>>,
    /// Serializes mutations so records are published in snapshot order
    update: Mutex<()>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeRecord>>>,
    tracker: Arc<DocumentTracker>,
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    pub fn new(kind: WorkspaceKind) -> Arc<Self> {
        Arc::new(Self {
            id: WorkspaceId(NEXT_WORKSPACE_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            current: RwLock::new(Arc::new(Solution::empty())),
            update: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
            tracker: Arc::new(DocumentTracker::new()),
        })
    }

    pub fn id(&self) -> WorkspaceId {
        self.id
    }

    pub fn kind(&self) -> &WorkspaceKind {
        &self.kind
    }

    pub fn current_solution(&self) -> Arc<Solution> {
        self.current.read().unwrap().clone()
    }

    pub fn document_tracker(&self) -> &Arc<DocumentTracker> {
        &self.tracker
    }

    pub fn active_document_provider(&self) -> Arc<dyn ActiveDocumentProvider> {
        self.tracker.clone()
    }

    /// Subscribe to change records. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChangeRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    fn publish(&self, record: ChangeRecord) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(record.clone()).is_ok());
    }

    /// Replace the current solution and announce the change
    pub fn set_current_solution(&self, kind: ChangeKind, solution: Solution) -> Arc<Solution> {
        let _update = self.update.lock().unwrap();
        self.commit(kind, Arc::new(solution))
    }

    /// Derive the next snapshot from the current one and announce it.
    ///
    /// `f` runs while other mutations are held off, so it must not mutate
    /// this workspace itself.
    pub fn apply(&self, kind: ChangeKind, f: impl FnOnce(&Solution) -> Solution) -> Arc<Solution> {
        let _update = self.update.lock().unwrap();
        let next = f(&self.current_solution());
        self.commit(kind, Arc::new(next))
    }

    /// Swap and publish. Callers hold `update`.
    fn commit(&self, kind: ChangeKind, new_solution: Arc<Solution>) -> Arc<Solution> {
        let old_solution = {
            let mut current = self.current.write().unwrap();
            std::mem::replace(&mut *current, new_solution.clone())
        };
        if let ChangeKind::DocumentRemoved(id) = kind {
            self.tracker.remove(&id);
        }
        log::trace!(
            "{}: {:?} (solution v{} -> v{})",
            self.id,
            kind,
            old_solution.version(),
            new_solution.version()
        );
        self.publish(ChangeRecord::Workspace(WorkspaceChange::new(
            kind,
            old_solution,
            new_solution.clone(),
        )));
        new_solution
    }

    pub fn open_document(&self, id: DocumentId) {
        self.publish(ChangeRecord::DocumentOpened(id));
    }

    pub fn close_document(&self, id: DocumentId) {
        self.publish(ChangeRecord::DocumentClosed(id));
    }
}
