//
// analyzer.rs
//
// The incremental analyzer contract and analyzer registrations
//

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::OptionChange;
use crate::solution::{Document, DocumentId, Project, ProjectId, Solution};
use crate::work_item::InvocationReasons;
use crate::workspace::{Workspace, WorkspaceKind};

/// Returned by analyzers that noticed their token was cancelled.
///
/// Any error returned after the token was cancelled is treated the same way,
/// so analyzers are free to bubble up whatever their own I/O produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Bail out with [`Cancelled`] if `token` has fired
pub fn check_cancelled(token: &CancellationToken) -> anyhow::Result<()> {
    if token.is_cancelled() {
        Err(Cancelled.into())
    } else {
        Ok(())
    }
}

/// Callbacks the crawler drives. Everything defaults to a no-op so analyzers
/// only implement the phases they care about.
#[async_trait]
pub trait IncrementalAnalyzer: Send + Sync {
    /// Called before any work item of a snapshot is processed.
    ///
    /// Snapshots are announced when they reach dispatch, not when they are
    /// created: each analyzer sees a given version at most once, and versions
    /// superseded while work was still waiting for its backoff are skipped.
    async fn new_solution_snapshot(&self, _solution: &Solution) -> anyhow::Result<()> {
        Ok(())
    }

    async fn document_open(&self, _document: &Document) -> anyhow::Result<()> {
        Ok(())
    }

    async fn document_close(&self, _document: &Document) -> anyhow::Result<()> {
        Ok(())
    }

    async fn document_reset(&self, _document: &Document) -> anyhow::Result<()> {
        Ok(())
    }

    async fn analyze_syntax(
        &self,
        _document: &Document,
        _reasons: InvocationReasons,
        _token: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// `changed_member` is the byte range of the single member whose body held
    /// every edit, when that is known.
    async fn analyze_document(
        &self,
        _document: &Document,
        _changed_member: Option<Range<usize>>,
        _reasons: InvocationReasons,
        _token: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn analyze_project(
        &self,
        _project: &Project,
        _semantics_changed: bool,
        _reasons: InvocationReasons,
        _token: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove_document(&self, _document_id: DocumentId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove_project(&self, _project_id: ProjectId) -> anyhow::Result<()> {
        Ok(())
    }

    fn needs_reanalysis_on_option_changed(&self, _change: &OptionChange) -> bool {
        false
    }
}

/// Descriptive data attached to an analyzer provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerMetadata {
    pub name: String,
    /// Workspace kinds the analyzer runs in; empty means all
    pub workspace_kinds: Vec<WorkspaceKind>,
    /// Run ahead of other analyzers on the active document
    pub high_priority_for_active_file: bool,
}

impl AnalyzerMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workspace_kinds: Vec::new(),
            high_priority_for_active_file: false,
        }
    }

    pub fn with_workspace_kinds(mut self, kinds: impl IntoIterator<Item = WorkspaceKind>) -> Self {
        self.workspace_kinds = kinds.into_iter().collect();
        self
    }

    pub fn high_priority_for_active_file(mut self, value: bool) -> Self {
        self.high_priority_for_active_file = value;
        self
    }

    pub fn applies_to(&self, kind: &WorkspaceKind) -> bool {
        self.workspace_kinds.is_empty() || self.workspace_kinds.contains(kind)
    }
}

/// Creates one analyzer per registered workspace
pub trait AnalyzerProvider: Send + Sync {
    fn create_analyzer(&self, workspace: &Workspace) -> Option<Arc<dyn IncrementalAnalyzer>>;
}

impl<F> AnalyzerProvider for F
where
    F: Fn(&Workspace) -> Option<Arc<dyn IncrementalAnalyzer>> + Send + Sync,
{
    fn create_analyzer(&self, workspace: &Workspace) -> Option<Arc<dyn IncrementalAnalyzer>> {
        self(workspace)
    }
}

/// Hands out the same analyzer instance to every workspace
pub struct SharedAnalyzerProvider(pub Arc<dyn IncrementalAnalyzer>);

impl AnalyzerProvider for SharedAnalyzerProvider {
    fn create_analyzer(&self, _workspace: &Workspace) -> Option<Arc<dyn IncrementalAnalyzer>> {
        Some(self.0.clone())
    }
}

/// An analyzer instance bound to a workspace
#[derive(Clone)]
pub struct AnalyzerRegistration {
    pub analyzer: Arc<dyn IncrementalAnalyzer>,
    pub metadata: AnalyzerMetadata,
}

impl AnalyzerRegistration {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

impl fmt::Debug for AnalyzerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzerRegistration")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Which callback an [`AnalyzerFault`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerPhase {
    NewSolutionSnapshot,
    DocumentOpen,
    DocumentClose,
    DocumentReset,
    Syntax,
    Document,
    Project,
    RemoveDocument,
    RemoveProject,
}

/// A non-cancellation failure raised by an analyzer callback
#[derive(Debug)]
pub struct AnalyzerFault {
    pub analyzer: String,
    pub phase: AnalyzerPhase,
    pub target: String,
    pub error: anyhow::Error,
}

impl fmt::Display for AnalyzerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "analyzer '{}' failed during {:?} for {}: {:#}",
            self.analyzer, self.phase, self.target, self.error
        )
    }
}

/// Receives analyzer faults for logging or telemetry
pub type FatalErrorHook = Arc<dyn Fn(&AnalyzerFault) + Send + Sync>;

pub fn default_fatal_error_hook() -> FatalErrorHook {
    Arc::new(|fault: &AnalyzerFault| log::error!("{}", fault))
}
