//
// dispatcher.rs
//
// Pulls ready work items and drives analyzer callbacks
//

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::analyzer::{
    AnalyzerFault, AnalyzerPhase, AnalyzerRegistration, Cancelled, FatalErrorHook, IncrementalAnalyzer,
};
use crate::config::CrawlerConfig;
use crate::gate::GlobalOperationGate;
use crate::perf::{DispatchMetrics, TimingGuard, SLOW_CALLBACK_MS};
use crate::progress::ProgressReporter;
use crate::scheduler::{BackoffScheduler, Dispatch};
use crate::solution::Solution;
use crate::work_item::{InvocationReasons, WorkItem, WorkKey};
use crate::workspace::Workspace;

pub type Registrations = Arc<RwLock<Vec<Arc<AnalyzerRegistration>>>>;

/// Result of one analyzer callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallOutcome {
    Completed,
    /// The item's token fired; stop working on the item
    Cancelled,
    /// Reported to the fatal-error hook; skip this analyzer's remaining phases
    Faulted,
}

/// Everything an item task needs. Shared by the dispatch loop and its item tasks.
pub struct AnalyzerDispatcher {
    workspace: Arc<Workspace>,
    scheduler: Arc<BackoffScheduler>,
    registrations: Registrations,
    config: Arc<RwLock<CrawlerConfig>>,
    gate: GlobalOperationGate,
    progress: Arc<ProgressReporter>,
    fatal_hook: Arc<RwLock<FatalErrorHook>>,
    metrics: Arc<DispatchMetrics>,
    shutdown: CancellationToken,
}

impl AnalyzerDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workspace: Arc<Workspace>,
        scheduler: Arc<BackoffScheduler>,
        registrations: Registrations,
        config: Arc<RwLock<CrawlerConfig>>,
        gate: GlobalOperationGate,
        progress: Arc<ProgressReporter>,
        fatal_hook: Arc<RwLock<FatalErrorHook>>,
        metrics: Arc<DispatchMetrics>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            workspace,
            scheduler,
            registrations,
            config,
            gate,
            progress,
            fatal_hook,
            metrics,
            shutdown,
        })
    }

    /// The dispatch loop. Returns after shutdown once every item task has finished.
    pub async fn run(self: Arc<Self>) {
        log::info!("Dispatcher for {} started", self.workspace.id());
        let mut running: JoinSet<()> = JoinSet::new();
        let mut last_project = None;
        let mut snapshots: HashMap<String, u64> = HashMap::new();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            if self.gate.is_paused() {
                if self.scheduler.has_ready() {
                    self.progress.set_paused(true);
                }
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.gate.wait_until_idle() => {
                        self.progress.set_paused(false);
                    }
                    // Ready work is only recorded here, not dispatched
                    _ = self.scheduler.notified() => {}
                    Some(result) = running.join_next(), if !running.is_empty() => {
                        Self::log_join_error(result);
                    }
                }
                continue;
            }

            let limit = self.config.read().unwrap().max_concurrent_items.max(1);
            if running.len() < limit && self.scheduler.has_ready() {
                let solution = self.workspace.current_solution();
                self.announce_snapshot(&solution, &mut snapshots).await;

                while running.len() < limit {
                    let Some(dispatch) = self.scheduler.take_next(last_project) else {
                        break;
                    };
                    last_project = Some(dispatch.item.project_id());
                    self.metrics.record_item();
                    let this = self.clone();
                    let solution = solution.clone();
                    running.spawn(async move {
                        this.process_item(&solution, &dispatch).await;
                        this.scheduler.complete(dispatch);
                    });
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.scheduler.notified() => {}
                Some(result) = running.join_next(), if !running.is_empty() => {
                    Self::log_join_error(result);
                }
            }
        }

        // Tokens are already cancelled; let analyzers observe it and return
        while let Some(result) = running.join_next().await {
            Self::log_join_error(result);
        }
        self.metrics.log_summary(&self.workspace.id().to_string());
        log::info!("Dispatcher for {} stopped", self.workspace.id());
    }

    fn log_join_error(result: Result<(), tokio::task::JoinError>) {
        if let Err(e) = result {
            log::error!("Work item task failed: {}", e);
        }
    }

    fn applicable(&self) -> Vec<Arc<AnalyzerRegistration>> {
        let kind = self.workspace.kind();
        self.registrations
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.metadata.applies_to(kind))
            .cloned()
            .collect()
    }

    /// Call `new_solution_snapshot` on every analyzer that has not seen this version yet
    async fn announce_snapshot(&self, solution: &Arc<Solution>, seen: &mut HashMap<String, u64>) {
        for registration in self.applicable() {
            if seen.get(registration.name()) == Some(&solution.version()) {
                continue;
            }
            seen.insert(registration.name().to_string(), solution.version());
            let s = solution.clone();
            let target = format!("solution v{}", solution.version());
            // No token: the snapshot notification is not tied to an item
            let token = CancellationToken::new();
            self.invoke(
                &registration,
                AnalyzerPhase::NewSolutionSnapshot,
                &target,
                &token,
                move |a| async move { a.new_solution_snapshot(&s).await },
            )
            .await;
        }
    }

    /// Analyzers that should see `item`, high-priority-for-active-file ones first
    /// when the item is high priority
    fn analyzers_for(&self, item: &WorkItem) -> Vec<Arc<AnalyzerRegistration>> {
        let mut analyzers: Vec<_> = self
            .applicable()
            .into_iter()
            .filter(|r| item.applies_to(r.name()))
            .collect();
        if item.is_high_priority {
            analyzers.sort_by_key(|r| !r.metadata.high_priority_for_active_file);
        }
        analyzers
    }

    async fn process_item(&self, solution: &Arc<Solution>, dispatch: &Dispatch) {
        let item = &dispatch.item;
        let token = &dispatch.token;
        log::trace!("Dispatching {} (reasons {:?})", item.key, item.reasons);

        for registration in self.analyzers_for(item) {
            if token.is_cancelled() && !item.is_invalidate() {
                self.metrics.record_cancellation();
                log::trace!("Work for {} superseded before {}", item.key, registration.name());
                return;
            }
            let outcome = if item.is_invalidate() {
                self.remove(&registration, item).await
            } else {
                match item.key {
                    WorkKey::Document(_) => self.document_phases(&registration, solution, item, token).await,
                    WorkKey::Project(_) => self.project_phase(&registration, solution, item, token).await,
                }
            };
            if outcome == CallOutcome::Cancelled {
                self.metrics.record_cancellation();
                log::trace!("Work for {} cancelled in {}", item.key, registration.name());
                return;
            }
        }
    }

    async fn remove(&self, registration: &Arc<AnalyzerRegistration>, item: &WorkItem) -> CallOutcome {
        let target = item.key.to_string();
        // Removal runs to completion even if a later touch arrives
        let token = CancellationToken::new();
        match item.key {
            WorkKey::Document(id) => {
                self.invoke(registration, AnalyzerPhase::RemoveDocument, &target, &token, move |a| async move {
                    a.remove_document(id).await
                })
                .await
            }
            WorkKey::Project(id) => {
                self.invoke(registration, AnalyzerPhase::RemoveProject, &target, &token, move |a| async move {
                    a.remove_project(id).await
                })
                .await
            }
        }
    }

    async fn document_phases(
        &self,
        registration: &Arc<AnalyzerRegistration>,
        solution: &Solution,
        item: &WorkItem,
        token: &CancellationToken,
    ) -> CallOutcome {
        let Some(id) = item.key.document_id() else {
            return CallOutcome::Completed;
        };
        let Some(document) = solution.document(&id).cloned() else {
            log::trace!("{} is no longer in the solution; skipping", id);
            return CallOutcome::Completed;
        };
        let target = id.to_string();
        let reasons = item.reasons;

        let mut phases: Vec<AnalyzerPhase> = Vec::new();
        if reasons.contains(InvocationReasons::DOCUMENT_OPENED) {
            phases.push(AnalyzerPhase::DocumentOpen);
        }
        if reasons.contains(InvocationReasons::DOCUMENT_CLOSED) {
            phases.push(AnalyzerPhase::DocumentClose);
            phases.push(AnalyzerPhase::DocumentReset);
        }
        if reasons.needs_analysis() {
            phases.push(AnalyzerPhase::Syntax);
            if reasons.needs_semantic_analysis() {
                phases.push(AnalyzerPhase::Document);
            }
        }

        for phase in phases {
            let doc = document.clone();
            let t = token.clone();
            let member = item.changed_member.clone();
            let outcome = self
                .invoke(registration, phase, &target, token, move |a| async move {
                    match phase {
                        AnalyzerPhase::DocumentOpen => a.document_open(&doc).await,
                        AnalyzerPhase::DocumentClose => a.document_close(&doc).await,
                        AnalyzerPhase::DocumentReset => a.document_reset(&doc).await,
                        AnalyzerPhase::Syntax => a.analyze_syntax(&doc, reasons, &t).await,
                        _ => a.analyze_document(&doc, member, reasons, &t).await,
                    }
                })
                .await;
            if outcome != CallOutcome::Completed {
                return outcome;
            }
        }
        CallOutcome::Completed
    }

    async fn project_phase(
        &self,
        registration: &Arc<AnalyzerRegistration>,
        solution: &Solution,
        item: &WorkItem,
        token: &CancellationToken,
    ) -> CallOutcome {
        let project_id = item.project_id();
        let Some(project) = solution.project(&project_id).cloned() else {
            log::trace!("{} is no longer in the solution; skipping", project_id);
            return CallOutcome::Completed;
        };
        let reasons = item.reasons;
        if !reasons.needs_analysis() {
            return CallOutcome::Completed;
        }
        let semantics_changed = reasons.needs_semantic_analysis();
        let t = token.clone();
        self.invoke(
            registration,
            AnalyzerPhase::Project,
            &project_id.to_string(),
            token,
            move |a| async move { a.analyze_project(&project, semantics_changed, reasons, &t).await },
        )
        .await
    }

    /// Hold callbacks back while a global operation is running. Returns false
    /// when `token` or shutdown fires first.
    async fn wait_for_gate(&self, token: &CancellationToken) -> bool {
        if !self.gate.is_paused() {
            return true;
        }
        log::trace!("Global operation in progress; holding analyzer callbacks");
        tokio::select! {
            _ = self.gate.wait_until_idle() => true,
            _ = token.cancelled() => false,
            _ = self.shutdown.cancelled() => false,
        }
    }

    /// Run one callback on its own task so a panic stays contained, then sort
    /// the result into completed, cancelled or faulted.
    async fn invoke<F, Fut>(
        &self,
        registration: &Arc<AnalyzerRegistration>,
        phase: AnalyzerPhase,
        target: &str,
        token: &CancellationToken,
        call: F,
    ) -> CallOutcome
    where
        F: FnOnce(Arc<dyn IncrementalAnalyzer>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if !self.wait_for_gate(token).await {
            return CallOutcome::Cancelled;
        }
        self.metrics.record_callback();
        let _timing = TimingGuard::with_threshold(
            format!("{}:{:?}:{}", registration.name(), phase, target),
            SLOW_CALLBACK_MS,
        );

        let error = match tokio::spawn(call(registration.analyzer.clone())).await {
            Ok(Ok(())) => return CallOutcome::Completed,
            Ok(Err(e)) => {
                if token.is_cancelled() || e.downcast_ref::<Cancelled>().is_some() {
                    return CallOutcome::Cancelled;
                }
                e
            }
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                anyhow!("analyzer panicked: {}", message)
            }
            Err(_) => return CallOutcome::Cancelled,
        };

        self.metrics.record_fault();
        let fault = AnalyzerFault {
            analyzer: registration.name().to_string(),
            phase,
            target: target.to_string(),
            error,
        };
        let hook = self.fatal_hook.read().unwrap().clone();
        hook(&fault);
        CallOutcome::Faulted
    }
}
