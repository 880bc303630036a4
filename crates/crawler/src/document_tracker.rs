//
// document_tracker.rs
//
// Active and visible document tracking
//

use std::sync::RwLock;

use tokio::sync::watch;

use crate::solution::DocumentId;

/// Source of the editor's focus signal
pub trait ActiveDocumentProvider: Send + Sync {
    fn try_get_active_document(&self) -> Option<DocumentId>;

    /// Fires whenever the active document changes
    fn subscribe(&self) -> watch::Receiver<Option<DocumentId>>;

    fn visible_documents(&self) -> Vec<DocumentId>;
}

/// Default provider fed by the host's activity notifications
#[derive(Debug)]
pub struct DocumentTracker {
    active: watch::Sender<Option<DocumentId>>,
    /// Visible documents, most recently shown first
    visible: RwLock<Vec<DocumentId>>,
}

impl Default for DocumentTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTracker {
    pub fn new() -> Self {
        let (active, _) = watch::channel(None);
        Self {
            active,
            visible: RwLock::new(Vec::new()),
        }
    }

    /// Update focus; `None` means focus moved to something that is not a document
    pub fn set_active_document(&self, id: Option<DocumentId>) {
        self.active.send_if_modified(|current| {
            if *current == id {
                return false;
            }
            log::trace!("Active document: {:?} -> {:?}", current, id);
            *current = id;
            true
        });
        if let Some(id) = id {
            let mut visible = self.visible.write().unwrap();
            visible.retain(|v| *v != id);
            visible.insert(0, id);
        }
    }

    pub fn set_visible_documents(&self, ids: Vec<DocumentId>) {
        *self.visible.write().unwrap() = ids;
    }

    /// Forget a document that left the workspace
    pub fn remove(&self, id: &DocumentId) {
        self.visible.write().unwrap().retain(|v| v != id);
        self.active.send_if_modified(|current| {
            if current.as_ref() == Some(id) {
                *current = None;
                true
            } else {
                false
            }
        });
    }

    /// Lower is more urgent: active, then visible, then everything else
    pub fn priority_score(&self, id: &DocumentId) -> usize {
        if self.try_get_active_document().as_ref() == Some(id) {
            return 0;
        }
        self.visible
            .read()
            .unwrap()
            .iter()
            .position(|v| v == id)
            .map(|p| p + 1)
            .unwrap_or(usize::MAX)
    }
}

impl ActiveDocumentProvider for DocumentTracker {
    fn try_get_active_document(&self) -> Option<DocumentId> {
        *self.active.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<Option<DocumentId>> {
        self.active.subscribe()
    }

    fn visible_documents(&self) -> Vec<DocumentId> {
        self.visible.read().unwrap().clone()
    }
}
