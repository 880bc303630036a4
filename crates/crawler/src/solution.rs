//
// solution.rs
//
// Immutable solution snapshots: projects, documents and their ids
//

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::dependency::ProjectDependencyGraph;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Language name used by the C# grammar in `edit_locality`
pub const LANGUAGE_CSHARP: &str = "C#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub u64);

impl ProjectId {
    pub fn new() -> Self {
        Self(next_id())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "project#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId {
    pub project_id: ProjectId,
    pub id: u64,
}

impl DocumentId {
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            id: next_id(),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "document#{}({})", self.id, self.project_id)
    }
}

/// What a document contributes to its project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentKind {
    /// Compiled source
    #[default]
    Source,
    /// Additional file passed to analyzers
    Additional,
    /// `.editorconfig`-style analyzer configuration
    AnalyzerConfig,
}

impl DocumentKind {
    /// Edits to non-source documents reconfigure the whole project.
    pub fn is_project_configuration(self) -> bool {
        !matches!(self, DocumentKind::Source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    pub kind: DocumentKind,
    pub text: Arc<str>,
}

impl Document {
    pub fn new(id: DocumentId, name: impl Into<String>, text: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: DocumentKind::Source,
            text: text.into(),
        }
    }

    pub fn with_kind(mut self, kind: DocumentKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn project_id(&self) -> ProjectId {
        self.id.project_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub language: String,
    pub assembly_name: String,
    pub default_namespace: Option<String>,
    pub compilation_options: Option<String>,
    pub output_path: Option<String>,
    pub run_analyzers: bool,
    pub project_references: Vec<ProjectId>,
    pub documents: IndexMap<DocumentId, Arc<Document>>,
}

impl Project {
    pub fn new(id: ProjectId, name: impl Into<String>, language: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            assembly_name: name.clone(),
            name,
            language: language.into(),
            default_namespace: None,
            compilation_options: None,
            output_path: None,
            run_analyzers: true,
            project_references: Vec::new(),
            documents: IndexMap::new(),
        }
    }

    pub fn document(&self, id: &DocumentId) -> Option<&Arc<Document>> {
        self.documents.get(id)
    }

    pub fn document_ids(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.documents.keys().copied()
    }

    /// Same identity and settings, ignoring document contents.
    pub fn same_configuration(&self, other: &Project) -> bool {
        self.name == other.name
            && self.language == other.language
            && self.assembly_name == other.assembly_name
            && self.default_namespace == other.default_namespace
            && self.compilation_options == other.compilation_options
            && self.output_path == other.output_path
            && self.run_analyzers == other.run_analyzers
            && self.project_references == other.project_references
    }
}

/// An immutable snapshot of every project in a workspace.
///
/// Mutators return a new snapshot with a fresh version; existing `Arc<Solution>`
/// handles never change.
#[derive(Debug, Clone)]
pub struct Solution {
    version: u64,
    projects: IndexMap<ProjectId, Arc<Project>>,
}

impl Default for Solution {
    fn default() -> Self {
        Self::empty()
    }
}

impl Solution {
    pub fn empty() -> Self {
        Self {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            projects: IndexMap::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn project(&self, id: &ProjectId) -> Option<&Arc<Project>> {
        self.projects.get(id)
    }

    pub fn projects(&self) -> impl Iterator<Item = &Arc<Project>> {
        self.projects.values()
    }

    pub fn project_ids(&self) -> impl Iterator<Item = ProjectId> + '_ {
        self.projects.keys().copied()
    }

    pub fn document(&self, id: &DocumentId) -> Option<&Arc<Document>> {
        self.projects.get(&id.project_id)?.document(id)
    }

    pub fn contains_document(&self, id: &DocumentId) -> bool {
        self.document(id).is_some()
    }

    pub fn document_ids(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.projects.values().flat_map(|p| p.document_ids())
    }

    pub fn document_count(&self) -> usize {
        self.projects.values().map(|p| p.documents.len()).sum()
    }

    /// Language of the project owning `id`, looked up in this snapshot.
    pub fn language_of(&self, project_id: &ProjectId) -> Option<&str> {
        self.projects.get(project_id).map(|p| p.language.as_str())
    }

    pub fn dependency_graph(&self) -> ProjectDependencyGraph {
        ProjectDependencyGraph::from_solution(self)
    }

    fn next(&self) -> Self {
        Self {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            projects: self.projects.clone(),
        }
    }

    pub fn with_project(&self, project: Project) -> Self {
        let mut next = self.next();
        next.projects.insert(project.id, Arc::new(project));
        next
    }

    pub fn without_project(&self, id: &ProjectId) -> Self {
        let mut next = self.next();
        next.projects.shift_remove(id);
        for project in next.projects.values_mut() {
            if project.project_references.contains(id) {
                let mut updated = (**project).clone();
                updated.project_references.retain(|r| r != id);
                *project = Arc::new(updated);
            }
        }
        next
    }

    /// Apply `f` to a copy of the project; unknown ids leave the snapshot unchanged.
    pub fn with_project_updated(&self, id: &ProjectId, f: impl FnOnce(&mut Project)) -> Self {
        let mut next = self.next();
        if let Some(project) = next.projects.get_mut(id) {
            let mut updated = (**project).clone();
            f(&mut updated);
            *project = Arc::new(updated);
        }
        next
    }

    pub fn with_document(&self, document: Document) -> Self {
        let project_id = document.project_id();
        self.with_project_updated(&project_id, |p| {
            p.documents.insert(document.id, Arc::new(document));
        })
    }

    pub fn with_document_text(&self, id: &DocumentId, text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        self.with_project_updated(&id.project_id, |p| {
            if let Some(doc) = p.documents.get_mut(id) {
                let mut updated = (**doc).clone();
                updated.text = text;
                *doc = Arc::new(updated);
            }
        })
    }

    pub fn without_document(&self, id: &DocumentId) -> Self {
        self.with_project_updated(&id.project_id, |p| {
            p.documents.shift_remove(id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshots_are_immutable() {
        let p = ProjectId::new();
        let s1 = Solution::empty().with_project(Project::new(p, "P", LANGUAGE_CSHARP));
        let d = DocumentId::new(p);
        let s2 = s1.with_document(Document::new(d, "a.cs", "class A {}"));

        assert!(!s1.contains_document(&d));
        assert!(s2.contains_document(&d));
        assert!(s2.version() > s1.version());
    }

    #[test]
    fn test_with_document_text_replaces_only_target() {
        let p = ProjectId::new();
        let a = DocumentId::new(p);
        let b = DocumentId::new(p);
        let s = Solution::empty()
            .with_project(Project::new(p, "P", LANGUAGE_CSHARP))
            .with_document(Document::new(a, "a.cs", "class A {}"))
            .with_document(Document::new(b, "b.cs", "class B {}"));
        let s2 = s.with_document_text(&a, "class A { int x; }");

        assert_eq!(&*s2.document(&a).unwrap().text, "class A { int x; }");
        assert!(Arc::ptr_eq(s.document(&b).unwrap(), s2.document(&b).unwrap()));
    }

    #[test]
    fn test_without_project_drops_references() {
        let p1 = ProjectId::new();
        let p2 = ProjectId::new();
        let mut proj2 = Project::new(p2, "P2", LANGUAGE_CSHARP);
        proj2.project_references.push(p1);
        let s = Solution::empty()
            .with_project(Project::new(p1, "P1", LANGUAGE_CSHARP))
            .with_project(proj2);

        let s2 = s.without_project(&p1);
        assert!(s2.project(&p1).is_none());
        assert!(s2.project(&p2).unwrap().project_references.is_empty());
    }

    #[test]
    fn test_document_order_is_insertion_order() {
        let p = ProjectId::new();
        let ids: Vec<_> = (0..4).map(|_| DocumentId::new(p)).collect();
        let mut s = Solution::empty().with_project(Project::new(p, "P", LANGUAGE_CSHARP));
        for (i, id) in ids.iter().enumerate() {
            s = s.with_document(Document::new(*id, format!("{i}.cs"), ""));
        }
        assert_eq!(s.document_ids().collect::<Vec<_>>(), ids);
    }
}
