//
// main.rs
//
// Replay a scripted sequence of workspace changes through the crawler and
// report which analyzer callbacks ran
//

use std::collections::HashMap;
use std::env;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crawler::analyzer::SharedAnalyzerProvider;
use crawler::events::ChangeKind;
use crawler::solution::{Document, DocumentId, DocumentKind, Project, ProjectId, Solution, LANGUAGE_CSHARP};
use crawler::work_item::InvocationReasons;
use crawler::{
    parse_crawler_config, AnalyzerMetadata, BackgroundAnalysisScope,
    CrawlerRegistrationService, IncrementalAnalyzer, Workspace, WorkspaceKind,
};

fn print_usage() {
    println!(
        "crawler {}, a background analysis work coordinator.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: crawler --replay <script.json> [OPTIONS]

Available options:

--replay <file>              Replay the changes described in a JSON script
--scope <full|open|active>   Override the background analysis scope
--direct-only                Propagate project changes to direct dependents only
--version                    Print the version
--help                       Print this help message

"#
    );
}

#[derive(Debug, Deserialize)]
struct Script {
    /// Same shape as the editor settings object; only `crawler` is read
    #[serde(default)]
    settings: Option<serde_json::Value>,
    projects: Vec<ScriptProject>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct ScriptProject {
    name: String,
    #[serde(default)]
    references: Vec<String>,
    #[serde(default)]
    documents: Vec<ScriptDocument>,
}

#[derive(Debug, Deserialize)]
struct ScriptDocument {
    name: String,
    text: String,
    #[serde(default)]
    config: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Step {
    Wait { ms: u64 },
    Edit { document: String, text: String },
    Add { project: String, document: String, text: String },
    Remove { document: String },
    RemoveProject { project: String },
    Activate { document: Option<String> },
    Open { document: String },
    Close { document: String },
    Reanalyze {
        #[serde(default)]
        projects: Vec<String>,
        #[serde(default)]
        documents: Vec<String>,
        #[serde(default)]
        high_priority: bool,
    },
    /// Hold dispatch for `ms` while later steps keep arriving
    Pause { ms: u64 },
}

/// Name lookups for the ids minted while building the solution
#[derive(Default)]
struct Names {
    projects: HashMap<String, ProjectId>,
    documents: HashMap<String, DocumentId>,
    labels: HashMap<DocumentId, String>,
}

impl Names {
    fn project(&self, name: &str) -> anyhow::Result<ProjectId> {
        self.projects
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("Unknown project '{name}'"))
    }

    fn document(&self, name: &str) -> anyhow::Result<DocumentId> {
        self.documents
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("Unknown document '{name}'"))
    }

    fn add_document(&mut self, name: &str, id: DocumentId) {
        self.documents.insert(name.to_string(), id);
        self.labels.insert(id, name.to_string());
    }
}

fn build_solution(script: &Script, names: &mut Names) -> anyhow::Result<Solution> {
    for project in &script.projects {
        names.projects.insert(project.name.clone(), ProjectId::new());
    }

    let mut solution = Solution::empty();
    for entry in &script.projects {
        let id = names.project(&entry.name)?;
        let mut project = Project::new(id, entry.name.clone(), LANGUAGE_CSHARP);
        for reference in &entry.references {
            project.project_references.push(
                names
                    .project(reference)
                    .with_context(|| format!("in references of '{}'", entry.name))?,
            );
        }
        for doc in &entry.documents {
            let doc_id = DocumentId::new(id);
            names.add_document(&doc.name, doc_id);
            let mut document = Document::new(doc_id, doc.name.clone(), doc.text.as_str());
            if doc.config {
                document = document.with_kind(DocumentKind::AnalyzerConfig);
            }
            project.documents.insert(doc_id, Arc::new(document));
        }
        solution = solution.with_project(project);
    }
    Ok(solution)
}

/// Logs every callback and tallies them by kind
struct CountingAnalyzer {
    counts: Mutex<IndexMap<&'static str, usize>>,
    labels: HashMap<DocumentId, String>,
}

impl CountingAnalyzer {
    fn new(labels: HashMap<DocumentId, String>) -> Self {
        let counts = [
            "new_solution_snapshot",
            "document_open",
            "document_close",
            "document_reset",
            "analyze_syntax",
            "analyze_document",
            "analyze_project",
            "remove_document",
            "remove_project",
        ]
        .into_iter()
        .map(|name| (name, 0))
        .collect();
        Self {
            counts: Mutex::new(counts),
            labels,
        }
    }

    fn label(&self, id: &DocumentId) -> String {
        self.labels.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn bump(&self, callback: &'static str) {
        *self.counts.lock().unwrap().entry(callback).or_insert(0) += 1;
    }

    fn report(&self) {
        for (callback, count) in self.counts.lock().unwrap().iter() {
            println!("{callback:<24}{count}");
        }
    }
}

#[async_trait]
impl IncrementalAnalyzer for CountingAnalyzer {
    async fn new_solution_snapshot(&self, solution: &Solution) -> anyhow::Result<()> {
        log::info!("new_solution_snapshot v{}", solution.version());
        self.bump("new_solution_snapshot");
        Ok(())
    }

    async fn document_open(&self, document: &Document) -> anyhow::Result<()> {
        log::info!("document_open {}", document.name);
        self.bump("document_open");
        Ok(())
    }

    async fn document_close(&self, document: &Document) -> anyhow::Result<()> {
        log::info!("document_close {}", document.name);
        self.bump("document_close");
        Ok(())
    }

    async fn document_reset(&self, document: &Document) -> anyhow::Result<()> {
        log::info!("document_reset {}", document.name);
        self.bump("document_reset");
        Ok(())
    }

    async fn analyze_syntax(
        &self,
        document: &Document,
        reasons: InvocationReasons,
        _token: &CancellationToken,
    ) -> anyhow::Result<()> {
        log::info!("analyze_syntax {} ({:?})", document.name, reasons);
        self.bump("analyze_syntax");
        Ok(())
    }

    async fn analyze_document(
        &self,
        document: &Document,
        changed_member: Option<Range<usize>>,
        reasons: InvocationReasons,
        _token: &CancellationToken,
    ) -> anyhow::Result<()> {
        log::info!(
            "analyze_document {} member={:?} ({:?})",
            document.name,
            changed_member,
            reasons
        );
        self.bump("analyze_document");
        Ok(())
    }

    async fn analyze_project(
        &self,
        project: &Project,
        semantics_changed: bool,
        reasons: InvocationReasons,
        _token: &CancellationToken,
    ) -> anyhow::Result<()> {
        log::info!(
            "analyze_project {} semantics_changed={} ({:?})",
            project.name,
            semantics_changed,
            reasons
        );
        self.bump("analyze_project");
        Ok(())
    }

    async fn remove_document(&self, document_id: DocumentId) -> anyhow::Result<()> {
        log::info!("remove_document {}", self.label(&document_id));
        self.bump("remove_document");
        Ok(())
    }

    async fn remove_project(&self, project_id: ProjectId) -> anyhow::Result<()> {
        log::info!("remove_project {}", project_id);
        self.bump("remove_project");
        Ok(())
    }
}

const ANALYZER_NAME: &str = "replay";
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

async fn run_step(
    service: &CrawlerRegistrationService,
    workspace: &Arc<Workspace>,
    names: &mut Names,
    step: &Step,
) -> anyhow::Result<()> {
    log::debug!("Step: {:?}", step);
    match step {
        Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        Step::Edit { document, text } => {
            let id = names.document(document)?;
            workspace.apply(ChangeKind::DocumentChanged(id), |s| {
                s.with_document_text(&id, text.as_str())
            });
        }
        Step::Add {
            project,
            document,
            text,
        } => {
            let id = DocumentId::new(names.project(project)?);
            names.add_document(document, id);
            let doc = Document::new(id, document.clone(), text.as_str());
            workspace.apply(ChangeKind::DocumentAdded(id), |s| s.with_document(doc));
        }
        Step::Remove { document } => {
            let id = names.document(document)?;
            workspace.apply(ChangeKind::DocumentRemoved(id), |s| s.without_document(&id));
        }
        Step::RemoveProject { project } => {
            let id = names.project(project)?;
            workspace.apply(ChangeKind::ProjectRemoved(id), |s| s.without_project(&id));
        }
        Step::Activate { document } => {
            let id = document.as_deref().map(|d| names.document(d)).transpose()?;
            workspace.document_tracker().set_active_document(id);
        }
        Step::Open { document } => workspace.open_document(names.document(document)?),
        Step::Close { document } => workspace.close_document(names.document(document)?),
        Step::Reanalyze {
            projects,
            documents,
            high_priority,
        } => {
            let projects = projects
                .iter()
                .map(|p| names.project(p))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let documents = documents
                .iter()
                .map(|d| names.document(d))
                .collect::<anyhow::Result<Vec<_>>>()?;
            service.reanalyze(workspace, ANALYZER_NAME, &projects, &documents, *high_priority);
        }
        Step::Pause { ms } => {
            let guard = service.global_operations().start("replay pause");
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            drop(guard);
        }
    }
    Ok(())
}

/// Poll until nothing is pending, waiting or running
async fn wait_for_idle(service: &CrawlerRegistrationService, workspace: &Workspace) -> anyhow::Result<()> {
    let reporter = service
        .progress_reporter(workspace)
        .ok_or_else(|| anyhow!("Workspace is not registered"))?;
    let start = Instant::now();
    // Let the ingestion task see the last step first
    tokio::time::sleep(Duration::from_millis(50)).await;
    while reporter.is_in_progress() || reporter.pending_count() > 0 {
        if start.elapsed() > IDLE_TIMEOUT {
            bail!("Crawler did not go idle within {:?}", IDLE_TIMEOUT);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}

async fn replay(path: PathBuf, scope: Option<BackgroundAnalysisScope>, direct_only: bool) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let script: Script =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;

    let mut config = script
        .settings
        .as_ref()
        .and_then(parse_crawler_config)
        .unwrap_or_default();
    if let Some(scope) = scope {
        config.default_scope = scope;
        config.language_scopes.clear();
    }
    if direct_only {
        config.direct_dependency_propagation_only = true;
    }

    let mut names = Names::default();
    let solution = build_solution(&script, &mut names)?;

    let service = CrawlerRegistrationService::new();
    let analyzer = Arc::new(CountingAnalyzer::new(names.labels.clone()));
    service.add_analyzer_provider(
        Arc::new(SharedAnalyzerProvider(analyzer.clone())),
        AnalyzerMetadata::new(ANALYZER_NAME),
    );

    let workspace = Workspace::new(WorkspaceKind::host());
    service.register(&workspace, config);
    workspace.set_current_solution(ChangeKind::SolutionAdded, solution);

    for step in &script.steps {
        run_step(&service, &workspace, &mut names, step).await?;
    }
    wait_for_idle(&service, &workspace).await?;

    let metrics = service.metrics(&workspace);
    service.unregister(&workspace).await;

    analyzer.report();
    if let Some(metrics) = metrics {
        println!(
            "{:<24}{} items, {} faults, {} cancellations",
            "dispatch", metrics.items_dispatched, metrics.faults, metrics.cancellations
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut script = None;
    let mut scope = None;
    let mut direct_only = false;

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--replay" => {
                let path = argv.next().ok_or_else(|| anyhow!("--replay requires a file"))?;
                script = Some(PathBuf::from(path));
            }
            "--scope" => {
                let value = argv.next().ok_or_else(|| anyhow!("--scope requires a value"))?;
                scope = Some(
                    BackgroundAnalysisScope::parse(&value)
                        .ok_or_else(|| anyhow!("Unknown scope: '{value}'"))?,
                );
            }
            "--direct-only" => direct_only = true,
            "--version" => {
                println!("crawler {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    let Some(script) = script else {
        print_usage();
        return Ok(());
    };

    env_logger::init();

    replay(script, scope, direct_only).await
}
