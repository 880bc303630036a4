//
// work_item.rs
//
// Pending units of analysis work and their coalescing rules
//

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use bitflags::bitflags;

use crate::config::BackoffClass;
use crate::solution::{DocumentId, ProjectId};

bitflags! {
    /// Why a work item exists. Reasons accumulate as events coalesce.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InvocationReasons: u32 {
        const DOCUMENT_ADDED = 1 << 0;
        const DOCUMENT_REMOVED = 1 << 1;
        const DOCUMENT_CHANGED = 1 << 2;
        const SYNTAX_CHANGED = 1 << 3;
        const SEMANTIC_CHANGED = 1 << 4;
        const PROJECT_CONFIGURATION_CHANGED = 1 << 5;
        const REANALYZE = 1 << 6;
        const ACTIVE_DOCUMENT_SWITCHED = 1 << 7;
        const DOCUMENT_OPENED = 1 << 8;
        const DOCUMENT_CLOSED = 1 << 9;

        const LIFECYCLE = Self::DOCUMENT_OPENED.bits() | Self::DOCUMENT_CLOSED.bits();

        /// Reasons that require the document/semantic phase
        const SEMANTIC = Self::DOCUMENT_ADDED.bits()
            | Self::SEMANTIC_CHANGED.bits()
            | Self::PROJECT_CONFIGURATION_CHANGED.bits()
            | Self::REANALYZE.bits()
            | Self::ACTIVE_DOCUMENT_SWITCHED.bits();
    }
}

impl InvocationReasons {
    pub fn is_removal(self) -> bool {
        self.contains(Self::DOCUMENT_REMOVED)
    }

    pub fn needs_semantic_analysis(self) -> bool {
        self.intersects(Self::SEMANTIC)
    }

    /// Anything beyond open/close signals
    pub fn needs_analysis(self) -> bool {
        !(self - Self::LIFECYCLE).is_empty()
    }
}

/// Identity of a work item. At most one pending item exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkKey {
    Document(DocumentId),
    Project(ProjectId),
}

impl WorkKey {
    pub fn project_id(&self) -> ProjectId {
        match self {
            WorkKey::Document(id) => id.project_id,
            WorkKey::Project(id) => *id,
        }
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        match self {
            WorkKey::Document(id) => Some(*id),
            WorkKey::Project(_) => None,
        }
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkKey::Document(id) => id.fmt(f),
            WorkKey::Project(id) => id.fmt(f),
        }
    }
}

/// A pending analysis request for one document or project
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub key: WorkKey,
    pub reasons: InvocationReasons,
    pub is_high_priority: bool,
    /// Restrict the item to these analyzers (by name); `None` runs every analyzer
    pub analyzers: Option<BTreeSet<String>>,
    /// Byte range of the member whose body holds every edit seen so far
    pub changed_member: Option<Range<usize>>,
    pub backoff: BackoffClass,
}

impl WorkItem {
    pub fn new(key: WorkKey, reasons: InvocationReasons, backoff: BackoffClass) -> Self {
        Self {
            key,
            reasons,
            is_high_priority: false,
            analyzers: None,
            changed_member: None,
            backoff,
        }
    }

    pub fn document(id: DocumentId, reasons: InvocationReasons, backoff: BackoffClass) -> Self {
        Self::new(WorkKey::Document(id), reasons, backoff)
    }

    pub fn project(id: ProjectId, reasons: InvocationReasons, backoff: BackoffClass) -> Self {
        Self::new(WorkKey::Project(id), reasons, backoff)
    }

    /// Removal of a document or project, routed to the remove callbacks
    pub fn invalidate(key: WorkKey) -> Self {
        Self::new(key, InvocationReasons::DOCUMENT_REMOVED, BackoffClass::Immediate)
    }

    pub fn high_priority(mut self) -> Self {
        self.is_high_priority = true;
        self
    }

    pub fn for_analyzer(mut self, name: impl Into<String>) -> Self {
        self.analyzers = Some(BTreeSet::from([name.into()]));
        self
    }

    pub fn with_changed_member(mut self, member: Option<Range<usize>>) -> Self {
        self.changed_member = member;
        self
    }

    pub fn project_id(&self) -> ProjectId {
        self.key.project_id()
    }

    pub fn is_invalidate(&self) -> bool {
        self.reasons.is_removal()
    }

    /// Skips the backoff timer entirely
    pub fn is_immediate(&self) -> bool {
        self.is_invalidate()
            || self.backoff == BackoffClass::Immediate
            || !self.reasons.needs_analysis()
    }

    pub fn applies_to(&self, analyzer: &str) -> bool {
        self.analyzers
            .as_ref()
            .map_or(true, |names| names.contains(analyzer))
    }

    /// Fold a newer item for the same key into this one.
    ///
    /// An invalidate absorbs anything that arrives after it; an invalidate
    /// arriving later replaces the pending item.
    pub fn merge(&mut self, newer: WorkItem) {
        debug_assert_eq!(self.key, newer.key);

        if self.is_invalidate() {
            log::trace!("Dropping {:?} for {}: removal pending", newer.reasons, self.key);
            return;
        }
        if newer.is_invalidate() {
            *self = newer;
            return;
        }

        // A member is identified by where it starts; later edits to its body move the end
        self.changed_member = match (self.changed_member.take(), newer.changed_member) {
            (Some(a), Some(b)) if a.start == b.start => Some(b),
            _ => None,
        };
        self.reasons |= newer.reasons;
        self.is_high_priority |= newer.is_high_priority;
        self.analyzers = match (self.analyzers.take(), newer.analyzers) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            _ => None,
        };
        self.backoff = self.backoff.min(newer.backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solution::ProjectId;

    fn doc() -> DocumentId {
        DocumentId::new(ProjectId::new())
    }

    #[test]
    fn test_semantic_flags() {
        assert!(!InvocationReasons::SYNTAX_CHANGED.needs_semantic_analysis());
        assert!(!(InvocationReasons::SYNTAX_CHANGED | InvocationReasons::DOCUMENT_CHANGED)
            .needs_semantic_analysis());
        assert!(InvocationReasons::DOCUMENT_ADDED.needs_semantic_analysis());
        assert!(InvocationReasons::REANALYZE.needs_semantic_analysis());
        assert!(!InvocationReasons::DOCUMENT_OPENED.needs_analysis());
        assert!((InvocationReasons::DOCUMENT_OPENED | InvocationReasons::SYNTAX_CHANGED)
            .needs_analysis());
    }

    #[test]
    fn test_merge_unions_reasons_and_keeps_shortest_backoff() {
        let id = doc();
        let mut a = WorkItem::document(id, InvocationReasons::SYNTAX_CHANGED, BackoffClass::AllFiles);
        let b = WorkItem::document(id, InvocationReasons::SEMANTIC_CHANGED, BackoffClass::ActiveFile)
            .high_priority();
        a.merge(b);
        assert_eq!(
            a.reasons,
            InvocationReasons::SYNTAX_CHANGED | InvocationReasons::SEMANTIC_CHANGED
        );
        assert!(a.is_high_priority);
        assert_eq!(a.backoff, BackoffClass::ActiveFile);
    }

    #[test]
    fn test_invalidate_wins_both_ways() {
        let id = doc();
        let mut pending = WorkItem::invalidate(WorkKey::Document(id));
        pending.merge(WorkItem::document(
            id,
            InvocationReasons::DOCUMENT_ADDED,
            BackoffClass::AllFiles,
        ));
        assert!(pending.is_invalidate());
        assert_eq!(pending.reasons, InvocationReasons::DOCUMENT_REMOVED);

        let mut pending =
            WorkItem::document(id, InvocationReasons::DOCUMENT_CHANGED, BackoffClass::AllFiles);
        pending.merge(WorkItem::invalidate(WorkKey::Document(id)));
        assert!(pending.is_invalidate());
        assert!(pending.is_immediate());
    }

    #[test]
    fn test_merge_analyzer_filters() {
        let id = doc();
        let mut a = WorkItem::document(id, InvocationReasons::REANALYZE, BackoffClass::AllFiles)
            .for_analyzer("a");
        a.merge(
            WorkItem::document(id, InvocationReasons::REANALYZE, BackoffClass::AllFiles)
                .for_analyzer("b"),
        );
        assert!(a.applies_to("a") && a.applies_to("b") && !a.applies_to("c"));

        // An unrestricted touch widens the item to every analyzer
        a.merge(WorkItem::document(
            id,
            InvocationReasons::SYNTAX_CHANGED,
            BackoffClass::AllFiles,
        ));
        assert!(a.applies_to("c"));
    }

    #[test]
    fn test_changed_member_kept_for_same_member_start() {
        let id = doc();
        let local = |r: Range<usize>| {
            WorkItem::document(id, InvocationReasons::SYNTAX_CHANGED, BackoffClass::AllFiles)
                .with_changed_member(Some(r))
        };
        let mut a = local(10..20);
        a.merge(local(10..20));
        assert_eq!(a.changed_member, Some(10..20));
        // The body grew; the latest extent wins
        a.merge(local(10..27));
        assert_eq!(a.changed_member, Some(10..27));
        a.merge(local(30..40));
        assert_eq!(a.changed_member, None);
    }

    #[test]
    fn test_lifecycle_only_is_immediate() {
        let item = WorkItem::document(doc(), InvocationReasons::DOCUMENT_OPENED, BackoffClass::AllFiles);
        assert!(item.is_immediate());
    }
}
