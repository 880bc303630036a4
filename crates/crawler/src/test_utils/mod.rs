//! Shared fixtures for unit, integration and scenario tests.
//!
//! [`RecordingAnalyzer`] logs every callback it receives and can be told to
//! fail, panic or stall in a given phase. The fixture builders produce small
//! C# solutions with deterministic names and optional reference chains.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::analyzer::{
    AnalyzerMetadata, AnalyzerPhase, Cancelled, IncrementalAnalyzer, SharedAnalyzerProvider,
};
use crate::config::OptionChange;
use crate::registration::CrawlerRegistrationService;
use crate::solution::{Document, DocumentId, Project, ProjectId, Solution, LANGUAGE_CSHARP};
use crate::work_item::InvocationReasons;

/// One observed analyzer callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    NewSolutionSnapshot(u64),
    Open(DocumentId),
    Close(DocumentId),
    Reset(DocumentId),
    Syntax(DocumentId),
    Document(DocumentId, Option<Range<usize>>),
    Project(ProjectId, bool),
    RemoveDocument(DocumentId),
    RemoveProject(ProjectId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Misbehavior {
    None,
    Fail(AnalyzerPhase),
    Panic(AnalyzerPhase),
}

/// Analyzer that records its callbacks
#[derive(Debug)]
pub struct RecordingAnalyzer {
    calls: Mutex<Vec<Call>>,
    reasons: Mutex<Vec<(DocumentId, InvocationReasons)>>,
    misbehavior: Misbehavior,
    syntax_delay: Option<Duration>,
    reanalyze_on_options: bool,
    cancelled: AtomicUsize,
}

impl Default for RecordingAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingAnalyzer {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reasons: Mutex::new(Vec::new()),
            misbehavior: Misbehavior::None,
            syntax_delay: None,
            reanalyze_on_options: false,
            cancelled: AtomicUsize::new(0),
        }
    }

    /// Return an error from every call in `phase`
    pub fn failing(mut self, phase: AnalyzerPhase) -> Self {
        self.misbehavior = Misbehavior::Fail(phase);
        self
    }

    /// Panic in every call in `phase`
    pub fn panicking(mut self, phase: AnalyzerPhase) -> Self {
        self.misbehavior = Misbehavior::Panic(phase);
        self
    }

    /// Make `analyze_syntax` take `delay`, bailing out early on cancellation
    pub fn with_syntax_delay(mut self, delay: Duration) -> Self {
        self.syntax_delay = Some(delay);
        self
    }

    pub fn reanalyze_on_options(mut self) -> Self {
        self.reanalyze_on_options = true;
        self
    }

    fn record(&self, phase: AnalyzerPhase, call: Call) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.misbehavior {
            Misbehavior::Fail(p) if p == phase => Err(anyhow::anyhow!("{:?} failed on purpose", phase)),
            Misbehavior::Panic(p) if p == phase => panic!("{:?} panicked on purpose", phase),
            _ => Ok(()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
        self.reasons.lock().unwrap().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn syntax_count(&self) -> usize {
        self.count(|c| matches!(c, Call::Syntax(_)))
    }

    pub fn document_count(&self) -> usize {
        self.count(|c| matches!(c, Call::Document(..)))
    }

    pub fn remove_document_count(&self) -> usize {
        self.count(|c| matches!(c, Call::RemoveDocument(_)))
    }

    /// Calls other than solution snapshot notifications
    pub fn work_count(&self) -> usize {
        self.count(|c| !matches!(c, Call::NewSolutionSnapshot(_)))
    }

    pub fn syntax_calls_for(&self, id: DocumentId) -> usize {
        self.count(|c| *c == Call::Syntax(id))
    }

    /// Documents in the order their syntax phase ran
    pub fn syntax_order(&self) -> Vec<DocumentId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Syntax(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Documents that received `analyze_document`
    pub fn semantic_documents(&self) -> HashSet<DocumentId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Document(id, _) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Documents that received any per-document analysis callback
    pub fn touched_documents(&self) -> HashSet<DocumentId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Syntax(id) | Call::Document(id, _) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Reasons passed to `analyze_syntax`, in call order
    pub fn syntax_reasons(&self) -> Vec<(DocumentId, InvocationReasons)> {
        self.reasons.lock().unwrap().clone()
    }

    /// Number of times `analyze_syntax` observed its token firing
    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IncrementalAnalyzer for RecordingAnalyzer {
    async fn new_solution_snapshot(&self, solution: &Solution) -> anyhow::Result<()> {
        self.record(
            AnalyzerPhase::NewSolutionSnapshot,
            Call::NewSolutionSnapshot(solution.version()),
        )
    }

    async fn document_open(&self, document: &Document) -> anyhow::Result<()> {
        self.record(AnalyzerPhase::DocumentOpen, Call::Open(document.id))
    }

    async fn document_close(&self, document: &Document) -> anyhow::Result<()> {
        self.record(AnalyzerPhase::DocumentClose, Call::Close(document.id))
    }

    async fn document_reset(&self, document: &Document) -> anyhow::Result<()> {
        self.record(AnalyzerPhase::DocumentReset, Call::Reset(document.id))
    }

    async fn analyze_syntax(
        &self,
        document: &Document,
        reasons: InvocationReasons,
        token: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.reasons.lock().unwrap().push((document.id, reasons));
        self.record(AnalyzerPhase::Syntax, Call::Syntax(document.id))?;
        if let Some(delay) = self.syntax_delay {
            tokio::select! {
                _ = token.cancelled() => {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    return Err(Cancelled.into());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(())
    }

    async fn analyze_document(
        &self,
        document: &Document,
        changed_member: Option<Range<usize>>,
        _reasons: InvocationReasons,
        _token: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.record(AnalyzerPhase::Document, Call::Document(document.id, changed_member))
    }

    async fn analyze_project(
        &self,
        project: &Project,
        semantics_changed: bool,
        _reasons: InvocationReasons,
        _token: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.record(AnalyzerPhase::Project, Call::Project(project.id, semantics_changed))
    }

    async fn remove_document(&self, document_id: DocumentId) -> anyhow::Result<()> {
        self.record(AnalyzerPhase::RemoveDocument, Call::RemoveDocument(document_id))
    }

    async fn remove_project(&self, project_id: ProjectId) -> anyhow::Result<()> {
        self.record(AnalyzerPhase::RemoveProject, Call::RemoveProject(project_id))
    }

    fn needs_reanalysis_on_option_changed(&self, _change: &OptionChange) -> bool {
        self.reanalyze_on_options
    }
}

/// Add `analyzer` to `service` under `name` and hand back a handle for assertions
pub fn install(
    service: &CrawlerRegistrationService,
    name: &str,
    analyzer: RecordingAnalyzer,
) -> Arc<RecordingAnalyzer> {
    install_with(service, AnalyzerMetadata::new(name), analyzer)
}

pub fn install_with(
    service: &CrawlerRegistrationService,
    metadata: AnalyzerMetadata,
    analyzer: RecordingAnalyzer,
) -> Arc<RecordingAnalyzer> {
    let analyzer = Arc::new(analyzer);
    service.add_analyzer_provider(Arc::new(SharedAnalyzerProvider(analyzer.clone())), metadata);
    analyzer
}

/// Long enough for every default backoff window to expire
pub const SETTLE: Duration = Duration::from_secs(10);

/// Let all pending timers fire and the dispatcher drain. Meant for tests
/// running with a paused clock, where this completes instantly.
pub async fn settle() {
    tokio::time::sleep(SETTLE).await;
}

/// Source text with one class holding one field and one method
pub fn csharp_source(class: &str) -> String {
    format!("class {}\n{{\n    int count = 0;\n\n    void Run()\n    {{\n    }}\n}}\n", class)
}

/// A generated solution together with its ids, in creation order
#[derive(Debug, Clone)]
pub struct Fixture {
    pub solution: Solution,
    pub projects: Vec<ProjectId>,
    pub documents: Vec<Vec<DocumentId>>,
}

impl Fixture {
    pub fn all_documents(&self) -> Vec<DocumentId> {
        self.documents.iter().flatten().copied().collect()
    }
}

fn build(documents_per_project: &[usize], chained: bool) -> Fixture {
    let mut solution = Solution::empty();
    let mut projects = Vec::new();
    let mut documents = Vec::new();

    for (index, count) in documents_per_project.iter().enumerate() {
        let id = ProjectId::new();
        let mut project = Project::new(id, format!("P{}", index), LANGUAGE_CSHARP);
        if chained {
            if let Some(previous) = projects.last() {
                project.project_references.push(*previous);
            }
        }
        let mut ids = Vec::new();
        for n in 0..*count {
            let doc = DocumentId::new(id);
            let class = format!("C{}_{}", index, n);
            project.documents.insert(
                doc,
                Arc::new(Document::new(doc, format!("{}.cs", class), csharp_source(&class))),
            );
            ids.push(doc);
        }
        solution = solution.with_project(project);
        projects.push(id);
        documents.push(ids);
    }

    Fixture {
        solution,
        projects,
        documents,
    }
}

/// Independent projects with the given document counts
pub fn fixture_solution(documents_per_project: &[usize]) -> Fixture {
    build(documents_per_project, false)
}

/// Projects where each one references the one before it
pub fn chain_solution(documents_per_project: &[usize]) -> Fixture {
    build(documents_per_project, true)
}
