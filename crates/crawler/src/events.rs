//
// events.rs
//
// Immutable change records consumed by the event translator
//

use std::sync::Arc;

use crate::config::OptionChange;
use crate::solution::{DocumentId, ProjectId, Solution};

/// Which project-level setting changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectChangeKind {
    AssemblyName,
    DefaultNamespace,
    CompilationOptions,
    AnalyzerReferences,
    OutputPath,
    CompilationOutputInfo,
    RunAnalyzers,
    ProjectReferences,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    SolutionAdded,
    SolutionRemoved,
    SolutionCleared,
    SolutionReloaded,
    /// Unspecified edit; the translator diffs the snapshots
    SolutionChanged,
    ProjectAdded(ProjectId),
    ProjectRemoved(ProjectId),
    ProjectReloaded(ProjectId),
    ProjectChanged(ProjectId, ProjectChangeKind),
    /// Source, additional and analyzer-config documents alike
    DocumentAdded(DocumentId),
    DocumentRemoved(DocumentId),
    DocumentReloaded(DocumentId),
    DocumentChanged(DocumentId),
}

/// One workspace mutation together with the snapshots on either side of it
#[derive(Debug, Clone)]
pub struct WorkspaceChange {
    pub kind: ChangeKind,
    pub old_solution: Arc<Solution>,
    pub new_solution: Arc<Solution>,
}

impl WorkspaceChange {
    pub fn new(kind: ChangeKind, old_solution: Arc<Solution>, new_solution: Arc<Solution>) -> Self {
        Self {
            kind,
            old_solution,
            new_solution,
        }
    }
}

/// Everything the ingestion loop accepts
#[derive(Debug, Clone)]
pub enum ChangeRecord {
    Workspace(WorkspaceChange),
    ActiveDocumentChanged {
        previous: Option<DocumentId>,
        current: Option<DocumentId>,
    },
    DocumentOpened(DocumentId),
    DocumentClosed(DocumentId),
    OptionChanged(OptionChange),
}
