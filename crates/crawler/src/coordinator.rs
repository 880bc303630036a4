//
// coordinator.rs
//
// Per-workspace pipeline: ingestion, scheduling and dispatch
//

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::analyzer::{AnalyzerRegistration, FatalErrorHook};
use crate::config::{CrawlerConfig, OptionChange};
use crate::dispatcher::{AnalyzerDispatcher, Registrations};
use crate::document_tracker::ActiveDocumentProvider;
use crate::events::ChangeRecord;
use crate::gate::GlobalOperationGate;
use crate::perf::{DispatchMetrics, DispatchSnapshot};
use crate::progress::ProgressReporter;
use crate::scheduler::BackoffScheduler;
use crate::solution::{DocumentId, ProjectId};
use crate::translator;
use crate::work_item::{InvocationReasons, WorkItem};
use crate::workspace::Workspace;

/// Owns the tasks that serve one registered workspace.
///
/// Change records flow from the workspace channel through the translator into
/// the scheduler; the dispatcher task drains the scheduler.
pub struct WorkCoordinator {
    workspace: Arc<Workspace>,
    config: Arc<RwLock<CrawlerConfig>>,
    registrations: Registrations,
    scheduler: Arc<BackoffScheduler>,
    progress: Arc<ProgressReporter>,
    metrics: Arc<DispatchMetrics>,
    provider: Arc<dyn ActiveDocumentProvider>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl WorkCoordinator {
    /// Subscribe to `workspace` and start the ingestion, focus-forwarding and
    /// dispatch tasks.
    pub fn start(
        workspace: Arc<Workspace>,
        config: CrawlerConfig,
        registrations: Vec<Arc<AnalyzerRegistration>>,
        gate: GlobalOperationGate,
        fatal_hook: Arc<RwLock<FatalErrorHook>>,
    ) -> Arc<Self> {
        let config = Arc::new(RwLock::new(config.validated()));
        let registrations: Registrations = Arc::new(RwLock::new(registrations));
        let progress = Arc::new(ProgressReporter::new());
        let metrics = Arc::new(DispatchMetrics::new());
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let scheduler = BackoffScheduler::new(
            config.clone(),
            progress.clone(),
            shutdown.clone(),
            tasks.clone(),
        );
        let provider = workspace.active_document_provider();

        let coordinator = Arc::new(Self {
            workspace: workspace.clone(),
            config: config.clone(),
            registrations: registrations.clone(),
            scheduler: scheduler.clone(),
            progress: progress.clone(),
            metrics: metrics.clone(),
            provider,
            shutdown: shutdown.clone(),
            tasks: tasks.clone(),
        });

        let changes = workspace.subscribe();
        tasks.spawn(coordinator.clone().ingest_loop(changes));
        tasks.spawn(coordinator.clone().forward_active_document());

        let dispatcher = AnalyzerDispatcher::new(
            workspace,
            scheduler,
            registrations,
            config,
            gate,
            progress,
            fatal_hook,
            metrics,
            shutdown,
        );
        tasks.spawn(dispatcher.run());

        log::info!("Crawler registered for {}", coordinator.workspace.id());
        coordinator
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn progress(&self) -> &Arc<ProgressReporter> {
        &self.progress
    }

    pub fn metrics(&self) -> DispatchSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> CrawlerConfig {
        self.config.read().unwrap().clone()
    }

    async fn ingest_loop(self: Arc<Self>, mut changes: mpsc::UnboundedReceiver<ChangeRecord>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                record = changes.recv() => match record {
                    Some(record) => self.ingest(&record),
                    None => break,
                },
            }
        }
        log::trace!("Ingestion for {} stopped", self.workspace.id());
    }

    /// Turn focus changes from the provider into change records
    async fn forward_active_document(self: Arc<Self>) {
        let mut rx = self.provider.subscribe();
        let mut previous = *rx.borrow_and_update();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *rx.borrow_and_update();
                    self.ingest(&ChangeRecord::ActiveDocumentChanged { previous, current });
                    previous = current;
                }
            }
        }
    }

    /// Translate one record and hand the resulting items to the scheduler
    pub fn ingest(&self, record: &ChangeRecord) {
        if let ChangeRecord::OptionChanged(change) = record {
            self.option_changed(change);
            return;
        }
        let config = self.config();
        let solution = self.workspace.current_solution();
        let active = self.provider.try_get_active_document();
        let items = translator::translate(record, &solution, &config, active);
        self.enqueue_all(items);
    }

    fn enqueue_all(&self, items: Vec<WorkItem>) {
        for item in items {
            self.scheduler.enqueue(item);
        }
    }

    /// Register an analyzer created after the workspace was registered and
    /// queue catch-up work for it alone
    pub fn add_analyzer(&self, registration: Arc<AnalyzerRegistration>) {
        let name = registration.name().to_string();
        self.registrations.write().unwrap().push(registration);

        let solution = self.workspace.current_solution();
        let items = translator::catch_up_items(
            &solution,
            &self.config(),
            self.provider.as_ref(),
            &name,
            InvocationReasons::DOCUMENT_ADDED,
        );
        log::info!(
            "Analyzer '{}' joined {}; queued {} catch-up items",
            name,
            self.workspace.id(),
            items.len()
        );
        self.enqueue_all(items);
    }

    pub fn reanalyze(
        &self,
        analyzer: &str,
        project_ids: &[ProjectId],
        document_ids: &[DocumentId],
        high_priority: bool,
    ) {
        let solution = self.workspace.current_solution();
        let items = translator::reanalyze_items(&solution, analyzer, project_ids, document_ids, high_priority);
        log::trace!("Reanalyze for '{}': {} items", analyzer, items.len());
        self.enqueue_all(items);
    }

    /// Swap in a new configuration and announce each setting that changed
    pub fn update_config(&self, config: CrawlerConfig) {
        let config = config.validated();
        let changes = {
            let mut current = self.config.write().unwrap();
            let changes = current.changes(&config);
            *current = config;
            changes
        };
        for change in &changes {
            self.option_changed(change);
        }
    }

    /// Queue a full reanalysis, under the current scope, for every analyzer
    /// that asks for one
    pub fn option_changed(&self, change: &OptionChange) {
        log::info!(
            "Option '{}' changed for {} (language {:?})",
            change.name,
            self.workspace.id(),
            change.language
        );
        let interested: Vec<String> = self
            .registrations
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.analyzer.needs_reanalysis_on_option_changed(change))
            .map(|r| r.name().to_string())
            .collect();
        if interested.is_empty() {
            return;
        }

        let solution = self.workspace.current_solution();
        let config = self.config();
        for name in interested {
            let items = translator::catch_up_items(
                &solution,
                &config,
                self.provider.as_ref(),
                &name,
                InvocationReasons::PROJECT_CONFIGURATION_CHANGED,
            );
            self.enqueue_all(items);
        }
    }

    /// Cancel all work and wait until no task of this workspace is left.
    /// No analyzer callback runs after this returns.
    pub async fn shutdown(&self) {
        log::info!("Crawler unregistering {}", self.workspace.id());
        self.shutdown.cancel();
        self.scheduler.shutdown();
        self.tasks.close();
        self.tasks.wait().await;
        log::info!("Crawler unregistered {}", self.workspace.id());
    }
}
