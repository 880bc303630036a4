//
// translator.rs
//
// Maps change records to work items: propagation first, then scope filtering
//

use std::sync::Arc;

use crate::config::{BackgroundAnalysisScope, BackoffClass, CrawlerConfig};
use crate::document_tracker::ActiveDocumentProvider;
use crate::edit_locality::{classify_edit, EditLocality};
use crate::events::{ChangeKind, ChangeRecord, WorkspaceChange};
use crate::solution::{Document, DocumentId, ProjectId, Solution};
use crate::work_item::{InvocationReasons, WorkItem, WorkKey};

/// Translate one change record into the work items it implies.
///
/// `current` is the workspace's solution at translation time; it is used for
/// records that carry no snapshots of their own. `OptionChanged` produces no
/// items here since it depends on the registered analyzers.
pub fn translate(
    record: &ChangeRecord,
    current: &Arc<Solution>,
    config: &CrawlerConfig,
    active: Option<DocumentId>,
) -> Vec<WorkItem> {
    match record {
        ChangeRecord::Workspace(change) => {
            let mut t = Translator::new(config, active, &change.old_solution, &change.new_solution);
            t.workspace_change(change);
            t.finish()
        }
        ChangeRecord::ActiveDocumentChanged { previous, current: now } => {
            // The record, not the provider, says what became active
            let mut t = Translator::new(config, *now, current, current);
            t.active_document_changed(*previous, *now);
            t.finish()
        }
        ChangeRecord::DocumentOpened(id) => lifecycle_item(current, *id, InvocationReasons::DOCUMENT_OPENED),
        ChangeRecord::DocumentClosed(id) => lifecycle_item(current, *id, InvocationReasons::DOCUMENT_CLOSED),
        ChangeRecord::OptionChanged(_) => Vec::new(),
    }
}

fn lifecycle_item(solution: &Solution, id: DocumentId, reasons: InvocationReasons) -> Vec<WorkItem> {
    if !solution.contains_document(&id) {
        log::trace!("Ignoring {:?} for unknown document {}", reasons, id);
        return Vec::new();
    }
    vec![WorkItem::document(id, reasons, BackoffClass::Immediate)]
}

/// Items that bring one analyzer up to date with `solution`, restricted to
/// `analyzer` and filtered by scope. Active and visible documents come first.
pub fn catch_up_items(
    solution: &Arc<Solution>,
    config: &CrawlerConfig,
    provider: &dyn ActiveDocumentProvider,
    analyzer: &str,
    reasons: InvocationReasons,
) -> Vec<WorkItem> {
    let active = provider.try_get_active_document();
    let visible = provider.visible_documents();
    let rank = |id: &DocumentId| {
        if active.as_ref() == Some(id) {
            0
        } else {
            visible
                .iter()
                .position(|v| v == id)
                .map_or(usize::MAX, |p| p + 1)
        }
    };

    let mut documents: Vec<DocumentId> = solution.document_ids().collect();
    documents.sort_by_key(rank);

    let mut t = Translator::new(config, active, solution, solution);
    for id in documents {
        t.document(id, reasons, BackoffClass::Immediate);
    }
    for project in solution.project_ids() {
        t.project(project, reasons);
    }
    t.finish()
        .into_iter()
        .map(|item| item.for_analyzer(analyzer))
        .collect()
}

/// Explicit reanalysis of named targets for one analyzer. Bypasses scope.
pub fn reanalyze_items(
    solution: &Solution,
    analyzer: &str,
    project_ids: &[ProjectId],
    document_ids: &[DocumentId],
    high_priority: bool,
) -> Vec<WorkItem> {
    let backoff = if high_priority {
        BackoffClass::Immediate
    } else {
        BackoffClass::AllFiles
    };
    let make = |key: WorkKey| {
        let item = WorkItem::new(key, InvocationReasons::REANALYZE, backoff).for_analyzer(analyzer);
        if high_priority {
            item.high_priority()
        } else {
            item
        }
    };

    let mut items = Vec::new();
    for id in document_ids {
        if solution.contains_document(id) {
            items.push(make(WorkKey::Document(*id)));
        } else {
            log::warn!("Reanalyze requested for unknown document {}", id);
        }
    }
    for id in project_ids {
        let Some(project) = solution.project(id) else {
            log::warn!("Reanalyze requested for unknown project {}", id);
            continue;
        };
        items.extend(
            project
                .document_ids()
                .filter(|d| !document_ids.contains(d))
                .map(|d| make(WorkKey::Document(d))),
        );
        items.push(make(WorkKey::Project(*id)));
    }
    items
}

struct Translator<'a> {
    config: &'a CrawlerConfig,
    active: Option<DocumentId>,
    old: &'a Solution,
    new: &'a Solution,
    items: Vec<WorkItem>,
}

impl<'a> Translator<'a> {
    fn new(
        config: &'a CrawlerConfig,
        active: Option<DocumentId>,
        old: &'a Solution,
        new: &'a Solution,
    ) -> Self {
        Self {
            config,
            active,
            old,
            new,
            items: Vec::new(),
        }
    }

    /// Queue analysis for a document. The active document is promoted to the
    /// high-priority class with the active-file window.
    fn document(&mut self, id: DocumentId, reasons: InvocationReasons, backoff: BackoffClass) {
        self.document_with_member(id, reasons, backoff, None);
    }

    fn document_with_member(
        &mut self,
        id: DocumentId,
        reasons: InvocationReasons,
        backoff: BackoffClass,
        member: Option<std::ops::Range<usize>>,
    ) {
        let mut item = WorkItem::document(id, reasons, backoff).with_changed_member(member);
        if self.active == Some(id) {
            item.backoff = item.backoff.min(BackoffClass::ActiveFile);
            item = item.high_priority();
        }
        self.items.push(item);
    }

    fn project(&mut self, id: ProjectId, reasons: InvocationReasons) {
        self.items
            .push(WorkItem::project(id, reasons, BackoffClass::EntireProject));
    }

    fn invalidate(&mut self, key: WorkKey) {
        self.items.push(WorkItem::invalidate(key));
    }

    /// Semantic items for the other documents of `project` and for every
    /// project that depends on it in the new snapshot.
    fn propagate(&mut self, project: ProjectId, skip: Option<DocumentId>, reasons: InvocationReasons) {
        if let Some(p) = self.new.project(&project) {
            let siblings: Vec<DocumentId> = p.document_ids().filter(|d| Some(*d) != skip).collect();
            for id in siblings {
                self.document(id, reasons, BackoffClass::SemanticChange);
            }
        }
        self.propagate_to_dependents(project, self.new);
    }

    fn propagate_to_dependents(&mut self, project: ProjectId, graph_source: &Solution) {
        let dependents = graph_source
            .dependency_graph()
            .dependents(&project, self.config.direct_dependency_propagation_only);
        for dependent in dependents {
            let Some(p) = self.new.project(&dependent) else {
                continue;
            };
            log::trace!("Propagating change in {} to dependent {}", project, dependent);
            let documents: Vec<DocumentId> = p.document_ids().collect();
            for id in documents {
                self.document(id, InvocationReasons::SEMANTIC_CHANGED, BackoffClass::ProjectPropagation);
            }
        }
    }

    fn workspace_change(&mut self, change: &WorkspaceChange) {
        match change.kind {
            ChangeKind::SolutionAdded => self.solution_added(),
            ChangeKind::SolutionRemoved | ChangeKind::SolutionCleared => self.solution_removed(),
            ChangeKind::SolutionReloaded => self.solution_reloaded(),
            ChangeKind::SolutionChanged => self.solution_changed(),
            ChangeKind::ProjectAdded(id) => self.project_added(id),
            ChangeKind::ProjectRemoved(id) => self.project_removed(id),
            ChangeKind::ProjectReloaded(id) => self.project_reloaded(id),
            ChangeKind::ProjectChanged(id, kind) => {
                log::trace!("Project {} changed: {:?}", id, kind);
                self.project_changed(id)
            }
            ChangeKind::DocumentAdded(id) => self.document_added(id),
            ChangeKind::DocumentRemoved(id) => self.document_removed(id),
            ChangeKind::DocumentReloaded(id) => self.document_changed(id, true),
            ChangeKind::DocumentChanged(id) => self.document_changed(id, false),
        }
    }

    fn solution_added(&mut self) {
        let new = self.new;
        for project in new.projects() {
            for id in project.document_ids() {
                self.document(id, InvocationReasons::DOCUMENT_ADDED, BackoffClass::AllFiles);
            }
            self.project(project.id, InvocationReasons::DOCUMENT_ADDED);
        }
    }

    fn solution_removed(&mut self) {
        let old = self.old;
        for project in old.projects() {
            for id in project.document_ids() {
                self.invalidate(WorkKey::Document(id));
            }
            self.invalidate(WorkKey::Project(project.id));
        }
    }

    fn solution_reloaded(&mut self) {
        let (old, new) = (self.old, self.new);
        let reasons = InvocationReasons::DOCUMENT_CHANGED | InvocationReasons::SEMANTIC_CHANGED;
        for project in new.projects() {
            if old.project(&project.id).is_none() {
                self.project_added(project.id);
                continue;
            }
            for id in project.document_ids() {
                if old.contains_document(&id) {
                    self.document(id, reasons, BackoffClass::AllFiles);
                } else {
                    self.document_added(id);
                }
            }
            self.project(project.id, reasons);
        }
        for project in old.projects() {
            if new.project(&project.id).is_none() {
                self.project_removed(project.id);
                continue;
            }
            for id in project.document_ids() {
                if !new.contains_document(&id) {
                    self.document_removed(id);
                }
            }
        }
    }

    fn solution_changed(&mut self) {
        let (old, new) = (self.old, self.new);
        for project in new.projects() {
            let Some(previous) = old.project(&project.id) else {
                self.project_added(project.id);
                continue;
            };
            if !project.same_configuration(previous) {
                self.project_changed(project.id);
            }
            for (id, document) in &project.documents {
                match previous.document(id) {
                    None => self.document_added(*id),
                    Some(before) if !Arc::ptr_eq(before, document) && **before != **document => {
                        self.document_changed(*id, false)
                    }
                    Some(_) => {}
                }
            }
            for id in previous.document_ids() {
                if project.document(&id).is_none() {
                    self.document_removed(id);
                }
            }
        }
        for project in old.project_ids() {
            if new.project(&project).is_none() {
                self.project_removed(project);
            }
        }
    }

    fn project_added(&mut self, id: ProjectId) {
        let Some(project) = self.new.project(&id) else {
            return;
        };
        for document in project.document_ids() {
            self.document(document, InvocationReasons::DOCUMENT_ADDED, BackoffClass::AllFiles);
        }
        self.project(id, InvocationReasons::DOCUMENT_ADDED);
        self.propagate_to_dependents(id, self.new);
    }

    fn project_removed(&mut self, id: ProjectId) {
        let Some(project) = self.old.project(&id) else {
            return;
        };
        for document in project.document_ids() {
            self.invalidate(WorkKey::Document(document));
        }
        self.invalidate(WorkKey::Project(id));
        // References to the removed project are gone from the new snapshot
        self.propagate_to_dependents(id, self.old);
    }

    fn project_reloaded(&mut self, id: ProjectId) {
        let Some(project) = self.new.project(&id) else {
            return;
        };
        let reasons = InvocationReasons::PROJECT_CONFIGURATION_CHANGED;
        for document in project.document_ids() {
            self.document(document, reasons, BackoffClass::AllFiles);
        }
        self.project(id, reasons);
        self.propagate_to_dependents(id, self.new);
    }

    fn project_changed(&mut self, id: ProjectId) {
        let Some(project) = self.new.project(&id) else {
            return;
        };
        let reasons = InvocationReasons::SEMANTIC_CHANGED | InvocationReasons::PROJECT_CONFIGURATION_CHANGED;
        for document in project.document_ids() {
            self.document(document, reasons, BackoffClass::AllFiles);
        }
        self.project(id, reasons);
        self.propagate_to_dependents(id, self.new);
    }

    fn document_added(&mut self, id: DocumentId) {
        let Some(document) = self.new.document(&id) else {
            return;
        };
        if document.kind.is_project_configuration() {
            self.configuration_document_changed(id, InvocationReasons::DOCUMENT_ADDED);
            return;
        }
        self.document(id, InvocationReasons::DOCUMENT_ADDED, BackoffClass::AllFiles);
        self.project(id.project_id, InvocationReasons::SEMANTIC_CHANGED);
        self.propagate(id.project_id, Some(id), InvocationReasons::SEMANTIC_CHANGED);
    }

    fn document_removed(&mut self, id: DocumentId) {
        self.invalidate(WorkKey::Document(id));
        if self.new.project(&id.project_id).is_some() {
            self.project(id.project_id, InvocationReasons::SEMANTIC_CHANGED);
            self.propagate(id.project_id, Some(id), InvocationReasons::SEMANTIC_CHANGED);
        }
    }

    fn document_changed(&mut self, id: DocumentId, reloaded: bool) {
        let Some(after) = self.new.document(&id) else {
            return;
        };
        let Some(before) = self.old.document(&id) else {
            self.document_added(id);
            return;
        };
        if after.kind.is_project_configuration() {
            self.configuration_document_changed(id, InvocationReasons::DOCUMENT_CHANGED);
            return;
        }

        let locality = if reloaded {
            EditLocality::Declaration
        } else {
            self.classify(before, after)
        };
        let edited = InvocationReasons::DOCUMENT_CHANGED | InvocationReasons::SYNTAX_CHANGED;
        match locality {
            EditLocality::Unchanged => {
                log::trace!("Text of {} unchanged; nothing to do", id);
            }
            EditLocality::MemberBody { member } => {
                self.document_with_member(id, edited, BackoffClass::AllFiles, Some(member));
                self.project(id.project_id, edited);
            }
            EditLocality::Declaration => {
                let reasons = edited | InvocationReasons::SEMANTIC_CHANGED;
                self.document(id, reasons, BackoffClass::AllFiles);
                self.project(id.project_id, reasons);
                self.propagate(id.project_id, Some(id), InvocationReasons::SEMANTIC_CHANGED);
            }
        }
    }

    fn classify(&self, before: &Document, after: &Document) -> EditLocality {
        let language = self.new.language_of(&after.project_id()).unwrap_or_default();
        classify_edit(language, &before.text, &after.text)
    }

    /// Additional and analyzer-config documents change project-wide settings
    fn configuration_document_changed(&mut self, id: DocumentId, reasons: InvocationReasons) {
        let reasons = reasons | InvocationReasons::PROJECT_CONFIGURATION_CHANGED;
        self.document(id, reasons, BackoffClass::AllFiles);
        self.project(id.project_id, reasons);
        self.propagate(id.project_id, Some(id), InvocationReasons::PROJECT_CONFIGURATION_CHANGED);
    }

    fn active_document_changed(&mut self, previous: Option<DocumentId>, current: Option<DocumentId>) {
        let Some(id) = current else {
            log::trace!("Active document cleared (was {:?})", previous);
            return;
        };
        if !self.new.contains_document(&id) || self.scope_of(&id.project_id) != BackgroundAnalysisScope::ActiveFile {
            return;
        }
        self.items.push(
            WorkItem::document(id, InvocationReasons::ACTIVE_DOCUMENT_SWITCHED, BackoffClass::Immediate)
                .high_priority(),
        );
    }

    fn scope_of(&self, project: &ProjectId) -> BackgroundAnalysisScope {
        let language = self
            .new
            .language_of(project)
            .or_else(|| self.old.language_of(project))
            .unwrap_or_default();
        self.config.scope_for(language)
    }

    fn passes_scope(&self, item: &WorkItem) -> bool {
        let always = InvocationReasons::REANALYZE | InvocationReasons::LIFECYCLE;
        if item.is_invalidate() || item.reasons.intersects(always) {
            return true;
        }
        if self.scope_of(&item.project_id()) != BackgroundAnalysisScope::ActiveFile {
            return true;
        }
        match item.key {
            WorkKey::Document(id) => self.active == Some(id),
            WorkKey::Project(project) => self.active.is_some_and(|a| a.project_id == project),
        }
    }

    fn finish(self) -> Vec<WorkItem> {
        let total = self.items.len();
        let kept: Vec<WorkItem> = self
            .items
            .iter()
            .filter(|item| self.passes_scope(item))
            .cloned()
            .collect();
        if kept.len() != total {
            log::trace!("Scope filter dropped {} of {} items", total - kept.len(), total);
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlerConfig;
    use crate::document_tracker::DocumentTracker;
    use crate::events::ProjectChangeKind;
    use crate::solution::{DocumentKind, Project, LANGUAGE_CSHARP};

    const BODY: &str = "class C\n{\n    void M()\n    {\n    }\n}\n";

    struct Fixture {
        solution: Arc<Solution>,
        p1: ProjectId,
        p2: ProjectId,
        docs: Vec<DocumentId>,
    }

    /// p1 with two documents, p2 (references p1) with one
    fn fixture() -> Fixture {
        let p1 = ProjectId::new();
        let p2 = ProjectId::new();
        let mut solution = Solution::empty().with_project(Project::new(p1, "P1", LANGUAGE_CSHARP));
        let mut project2 = Project::new(p2, "P2", LANGUAGE_CSHARP);
        project2.project_references.push(p1);
        solution = solution.with_project(project2);
        let mut docs = Vec::new();
        for (project, name) in [(p1, "a.cs"), (p1, "b.cs"), (p2, "c.cs")] {
            let id = DocumentId::new(project);
            solution = solution.with_document(Document::new(id, name, BODY));
            docs.push(id);
        }
        Fixture {
            solution: Arc::new(solution),
            p1,
            p2,
            docs,
        }
    }

    fn change(kind: ChangeKind, old: &Arc<Solution>, new: Solution) -> (ChangeRecord, Arc<Solution>) {
        let new = Arc::new(new);
        (
            ChangeRecord::Workspace(WorkspaceChange::new(kind, old.clone(), new.clone())),
            new,
        )
    }

    fn keys(items: &[WorkItem]) -> Vec<WorkKey> {
        items.iter().map(|i| i.key).collect()
    }

    #[test]
    fn test_solution_added_full_scope() {
        let f = fixture();
        let empty = Arc::new(Solution::empty());
        let record = ChangeRecord::Workspace(WorkspaceChange::new(
            ChangeKind::SolutionAdded,
            empty,
            f.solution.clone(),
        ));
        let items = translate(&record, &f.solution, &CrawlerConfig::default(), None);
        assert_eq!(items.len(), 5, "three documents and two projects");
        assert!(items.iter().all(|i| !i.is_invalidate()));
    }

    #[test]
    fn test_solution_added_active_scope_without_active_document() {
        let f = fixture();
        let record = ChangeRecord::Workspace(WorkspaceChange::new(
            ChangeKind::SolutionAdded,
            Arc::new(Solution::empty()),
            f.solution.clone(),
        ));
        let config = CrawlerConfig::with_scope(BackgroundAnalysisScope::ActiveFile);
        assert!(translate(&record, &f.solution, &config, None).is_empty());
    }

    #[test]
    fn test_solution_removed_invalidates_everything() {
        let f = fixture();
        let (record, new) = change(ChangeKind::SolutionRemoved, &f.solution, Solution::empty());
        let config = CrawlerConfig::with_scope(BackgroundAnalysisScope::ActiveFile);
        let items = translate(&record, &new, &config, None);
        assert_eq!(items.len(), 5);
        assert!(items.iter().all(WorkItem::is_invalidate));
    }

    #[test]
    fn test_member_local_edit_is_syntax_only() {
        let f = fixture();
        let doc = f.docs[0];
        let edited = BODY.replace("    {\n    }", "    {\n        int x = 1;\n    }");
        let (record, new) = change(
            ChangeKind::DocumentChanged(doc),
            &f.solution,
            f.solution.with_document_text(&doc, edited),
        );
        let items = translate(&record, &new, &CrawlerConfig::default(), None);
        assert_eq!(keys(&items), vec![WorkKey::Document(doc), WorkKey::Project(f.p1)]);
        assert!(!items[0].reasons.needs_semantic_analysis());
        assert!(items[0].changed_member.is_some());
    }

    #[test]
    fn test_declaration_edit_fans_out() {
        let f = fixture();
        let doc = f.docs[0];
        let edited = BODY.replace("void M()", "void N()");
        let (record, new) = change(
            ChangeKind::DocumentChanged(doc),
            &f.solution,
            f.solution.with_document_text(&doc, edited),
        );
        let items = translate(&record, &new, &CrawlerConfig::default(), None);
        assert_eq!(
            keys(&items),
            vec![
                WorkKey::Document(doc),
                WorkKey::Project(f.p1),
                WorkKey::Document(f.docs[1]),
                WorkKey::Document(f.docs[2]),
            ]
        );
        assert_eq!(items[2].backoff, BackoffClass::SemanticChange);
        assert_eq!(items[3].backoff, BackoffClass::ProjectPropagation);
        assert!(items[3].reasons.needs_semantic_analysis());
    }

    #[test]
    fn test_edit_to_active_document_is_high_priority() {
        let f = fixture();
        let doc = f.docs[0];
        let (record, new) = change(
            ChangeKind::DocumentChanged(doc),
            &f.solution,
            f.solution.with_document_text(&doc, "class D {}"),
        );
        let config = CrawlerConfig::with_scope(BackgroundAnalysisScope::ActiveFile);
        let items = translate(&record, &new, &config, Some(doc));
        assert_eq!(keys(&items), vec![WorkKey::Document(doc), WorkKey::Project(f.p1)]);
        assert!(items[0].is_high_priority);
        assert_eq!(items[0].backoff, BackoffClass::ActiveFile);
    }

    #[test]
    fn test_document_removed_invalidates_and_propagates() {
        let f = fixture();
        let doc = f.docs[1];
        let (record, new) = change(
            ChangeKind::DocumentRemoved(doc),
            &f.solution,
            f.solution.without_document(&doc),
        );
        let items = translate(&record, &new, &CrawlerConfig::default(), None);
        assert!(items[0].is_invalidate());
        assert_eq!(items[0].key, WorkKey::Document(doc));
        assert!(keys(&items).contains(&WorkKey::Document(f.docs[0])));
        assert!(keys(&items).contains(&WorkKey::Document(f.docs[2])));
    }

    #[test]
    fn test_project_removed_invalidates_its_documents() {
        let f = fixture();
        let (record, new) = change(
            ChangeKind::ProjectRemoved(f.p1),
            &f.solution,
            f.solution.without_project(&f.p1),
        );
        let config = CrawlerConfig::with_scope(BackgroundAnalysisScope::ActiveFile);
        let items = translate(&record, &new, &config, None);
        let invalidated: Vec<_> = items.iter().filter(|i| i.is_invalidate()).map(|i| i.key).collect();
        assert_eq!(
            invalidated,
            vec![
                WorkKey::Document(f.docs[0]),
                WorkKey::Document(f.docs[1]),
                WorkKey::Project(f.p1)
            ]
        );
    }

    #[test]
    fn test_project_changed_active_scope_only_active_project() {
        let f = fixture();
        let (record, new) = change(
            ChangeKind::ProjectChanged(f.p2, ProjectChangeKind::CompilationOptions),
            &f.solution,
            f.solution.with_project_updated(&f.p2, |p| p.compilation_options = Some("x".into())),
        );
        let config = CrawlerConfig::with_scope(BackgroundAnalysisScope::ActiveFile);
        assert!(translate(&record, &new, &config, Some(f.docs[0])).is_empty());

        let items = translate(&record, &new, &config, Some(f.docs[2]));
        assert_eq!(keys(&items), vec![WorkKey::Document(f.docs[2]), WorkKey::Project(f.p2)]);
    }

    #[test]
    fn test_solution_changed_is_diffed() {
        let f = fixture();
        let added = DocumentId::new(f.p2);
        let next = f
            .solution
            .with_document(Document::new(added, "d.cs", BODY))
            .without_document(&f.docs[0]);
        let (record, new) = change(ChangeKind::SolutionChanged, &f.solution, next);
        let items = translate(&record, &new, &CrawlerConfig::default(), None);
        let ks = keys(&items);
        assert!(ks.contains(&WorkKey::Document(added)));
        assert!(items
            .iter()
            .any(|i| i.key == WorkKey::Document(f.docs[0]) && i.is_invalidate()));
    }

    #[test]
    fn test_solution_reloaded_splits_kept_added_and_removed() {
        let f = fixture();
        let (kept, removed) = (f.docs[0], f.docs[1]);
        let added = DocumentId::new(f.p1);
        let next = f
            .solution
            .with_document(Document::new(added, "d.cs", BODY))
            .without_document(&removed);
        let (record, new) = change(ChangeKind::SolutionReloaded, &f.solution, next);
        let items = translate(&record, &new, &CrawlerConfig::default(), None);

        assert_eq!(items[0].key, WorkKey::Document(kept));
        assert!(!items[0].is_invalidate());
        assert!(items[0]
            .reasons
            .contains(InvocationReasons::DOCUMENT_CHANGED | InvocationReasons::SEMANTIC_CHANGED));
        assert!(items
            .iter()
            .any(|i| i.key == WorkKey::Document(added) && i.reasons.contains(InvocationReasons::DOCUMENT_ADDED)));
        let for_removed: Vec<_> = items.iter().filter(|i| i.key == WorkKey::Document(removed)).collect();
        assert_eq!(for_removed.len(), 1);
        assert!(for_removed[0].is_invalidate());
        assert!(keys(&items).contains(&WorkKey::Document(f.docs[2])));
    }

    #[test]
    fn test_project_added_queues_documents_and_dependents() {
        let f = fixture();
        let p3 = ProjectId::new();
        let doc = DocumentId::new(p3);
        let next = f
            .solution
            .with_project(Project::new(p3, "P3", LANGUAGE_CSHARP))
            .with_document(Document::new(doc, "e.cs", BODY))
            .with_project_updated(&f.p2, |p| p.project_references.push(p3));
        let (record, new) = change(ChangeKind::ProjectAdded(p3), &f.solution, next);
        let items = translate(&record, &new, &CrawlerConfig::default(), None);

        assert_eq!(
            keys(&items),
            vec![WorkKey::Document(doc), WorkKey::Project(p3), WorkKey::Document(f.docs[2])]
        );
        assert!(items[0].reasons.contains(InvocationReasons::DOCUMENT_ADDED));
        assert_eq!(items[2].backoff, BackoffClass::ProjectPropagation);
        assert!(items[2].reasons.needs_semantic_analysis());
    }

    #[test]
    fn test_project_reloaded_is_a_configuration_change() {
        let f = fixture();
        let (record, new) = change(
            ChangeKind::ProjectReloaded(f.p1),
            &f.solution,
            f.solution.with_project_updated(&f.p1, |p| p.compilation_options = Some("y".into())),
        );
        let items = translate(&record, &new, &CrawlerConfig::default(), None);

        assert_eq!(
            keys(&items),
            vec![
                WorkKey::Document(f.docs[0]),
                WorkKey::Document(f.docs[1]),
                WorkKey::Project(f.p1),
                WorkKey::Document(f.docs[2]),
            ]
        );
        assert!(items[..3]
            .iter()
            .all(|i| i.reasons.contains(InvocationReasons::PROJECT_CONFIGURATION_CHANGED)));
        assert_eq!(items[3].backoff, BackoffClass::ProjectPropagation);
    }

    #[test]
    fn test_document_reload_is_treated_as_declaration_edit() {
        let f = fixture();
        let doc = f.docs[0];
        let edited = BODY.replace("    {\n    }", "    {\n        int x = 1;\n    }");
        let (record, new) = change(
            ChangeKind::DocumentReloaded(doc),
            &f.solution,
            f.solution.with_document_text(&doc, edited),
        );
        let items = translate(&record, &new, &CrawlerConfig::default(), None);

        assert_eq!(
            keys(&items),
            vec![
                WorkKey::Document(doc),
                WorkKey::Project(f.p1),
                WorkKey::Document(f.docs[1]),
                WorkKey::Document(f.docs[2]),
            ]
        );
        assert!(items[0].reasons.needs_semantic_analysis());
        assert!(items[0].changed_member.is_none());
    }

    #[test]
    fn test_configuration_document_edit_touches_siblings() {
        let f = fixture();
        let config_doc = DocumentId::new(f.p1);
        let base = Arc::new(f.solution.with_document(
            Document::new(config_doc, ".editorconfig", "a=1").with_kind(DocumentKind::AnalyzerConfig),
        ));
        let (record, new) = change(
            ChangeKind::DocumentChanged(config_doc),
            &base,
            base.with_document_text(&config_doc, "a=2"),
        );
        let items = translate(&record, &new, &CrawlerConfig::default(), None);
        assert!(items
            .iter()
            .filter(|i| i.project_id() == f.p1)
            .all(|i| i.reasons.contains(InvocationReasons::PROJECT_CONFIGURATION_CHANGED)));
        assert!(keys(&items).contains(&WorkKey::Document(f.docs[2])), "dependents see it too");
        assert!(keys(&items).contains(&WorkKey::Document(f.docs[0])));
        assert!(keys(&items).contains(&WorkKey::Document(f.docs[1])));
    }

    #[test]
    fn test_active_document_switch() {
        let f = fixture();
        let record = ChangeRecord::ActiveDocumentChanged {
            previous: Some(f.docs[0]),
            current: Some(f.docs[1]),
        };
        let full = CrawlerConfig::default();
        assert!(translate(&record, &f.solution, &full, Some(f.docs[1])).is_empty());

        let active = CrawlerConfig::with_scope(BackgroundAnalysisScope::ActiveFile);
        let items = translate(&record, &f.solution, &active, Some(f.docs[1]));
        assert_eq!(keys(&items), vec![WorkKey::Document(f.docs[1])]);
        assert!(items[0].is_high_priority);
        assert!(items[0].is_immediate());

        let cleared = ChangeRecord::ActiveDocumentChanged {
            previous: Some(f.docs[1]),
            current: None,
        };
        assert!(translate(&cleared, &f.solution, &active, None).is_empty());
    }

    #[test]
    fn test_lifecycle_bypasses_scope() {
        let f = fixture();
        let active = CrawlerConfig::with_scope(BackgroundAnalysisScope::ActiveFile);
        let items = translate(&ChangeRecord::DocumentOpened(f.docs[2]), &f.solution, &active, None);
        assert_eq!(items.len(), 1);
        assert!(items[0].is_immediate());
    }

    #[test]
    fn test_catch_up_orders_active_and_visible_first() {
        let f = fixture();
        let tracker = DocumentTracker::new();
        tracker.set_visible_documents(vec![f.docs[2]]);
        tracker.set_active_document(Some(f.docs[1]));

        let items = catch_up_items(
            &f.solution,
            &CrawlerConfig::default(),
            &tracker,
            "late",
            InvocationReasons::DOCUMENT_ADDED,
        );
        assert_eq!(
            &keys(&items)[..3],
            &[
                WorkKey::Document(f.docs[1]),
                WorkKey::Document(f.docs[2]),
                WorkKey::Document(f.docs[0])
            ]
        );
        assert!(items.iter().all(|i| i.applies_to("late") && !i.applies_to("other")));
        assert!(items[0].is_high_priority);
    }

    #[test]
    fn test_reanalyze_items_bypass_scope_and_dedupe() {
        let f = fixture();
        let items = reanalyze_items(&f.solution, "a", &[f.p1], &[f.docs[0]], true);
        assert_eq!(
            keys(&items),
            vec![
                WorkKey::Document(f.docs[0]),
                WorkKey::Document(f.docs[1]),
                WorkKey::Project(f.p1)
            ]
        );
        assert!(items.iter().all(|i| i.is_high_priority && i.is_immediate()));
    }
}
