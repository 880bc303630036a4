//
// registration.rs
//
// Service-wide entry point: workspace registration and analyzer providers
//

use std::sync::{Arc, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::analyzer::{
    default_fatal_error_hook, AnalyzerMetadata, AnalyzerProvider, AnalyzerRegistration, FatalErrorHook,
};
use crate::config::{CrawlerConfig, OptionChange};
use crate::coordinator::WorkCoordinator;
use crate::gate::GlobalOperationGate;
use crate::perf::DispatchSnapshot;
use crate::progress::ProgressReporter;
use crate::solution::{DocumentId, ProjectId};
use crate::workspace::{Workspace, WorkspaceId};

struct ProviderEntry {
    provider: Arc<dyn AnalyzerProvider>,
    metadata: AnalyzerMetadata,
}

/// Registers workspaces with the crawler and hands them analyzers.
///
/// One instance typically lives for the whole host process. Each registered
/// workspace gets its own [`WorkCoordinator`]; providers and the global
/// operation gate are shared.
pub struct CrawlerRegistrationService {
    coordinators: DashMap<WorkspaceId, Arc<WorkCoordinator>>,
    providers: RwLock<Vec<ProviderEntry>>,
    gate: GlobalOperationGate,
    fatal_hook: Arc<RwLock<FatalErrorHook>>,
}

impl Default for CrawlerRegistrationService {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlerRegistrationService {
    pub fn new() -> Self {
        Self {
            coordinators: DashMap::new(),
            providers: RwLock::new(Vec::new()),
            gate: GlobalOperationGate::new(),
            fatal_hook: Arc::new(RwLock::new(default_fatal_error_hook())),
        }
    }

    /// Replace the hook that receives analyzer faults
    pub fn set_fatal_error_hook(&self, hook: FatalErrorHook) {
        *self.fatal_hook.write().unwrap() = hook;
    }

    pub fn global_operations(&self) -> &GlobalOperationGate {
        &self.gate
    }

    fn create_registration(
        provider: &dyn AnalyzerProvider,
        metadata: &AnalyzerMetadata,
        workspace: &Workspace,
    ) -> Option<Arc<AnalyzerRegistration>> {
        if !metadata.applies_to(workspace.kind()) {
            return None;
        }
        let analyzer = provider.create_analyzer(workspace)?;
        Some(Arc::new(AnalyzerRegistration {
            analyzer,
            metadata: metadata.clone(),
        }))
    }

    /// Start crawling `workspace`. Registering the same workspace twice is a no-op.
    ///
    /// Must be called from within a tokio runtime; the coordinator spawns its tasks here.
    pub fn register(&self, workspace: &Arc<Workspace>, config: CrawlerConfig) {
        // Lock order is providers, then the workspace table, as in add_analyzer_provider
        let providers = self.providers.read().unwrap();
        let Entry::Vacant(slot) = self.coordinators.entry(workspace.id()) else {
            log::warn!("{} is already registered with the crawler", workspace.id());
            return;
        };

        let registrations: Vec<_> = providers
            .iter()
            .filter_map(|entry| Self::create_registration(entry.provider.as_ref(), &entry.metadata, workspace))
            .collect();

        slot.insert(WorkCoordinator::start(
            workspace.clone(),
            config,
            registrations,
            self.gate.clone(),
            self.fatal_hook.clone(),
        ));
    }

    /// Stop crawling `workspace`. Resolves once no analyzer callback for it can run.
    pub async fn unregister(&self, workspace: &Workspace) {
        let Some((_, coordinator)) = self.coordinators.remove(&workspace.id()) else {
            log::warn!("{} is not registered with the crawler", workspace.id());
            return;
        };
        coordinator.shutdown().await;
    }

    pub fn is_registered(&self, workspace: &Workspace) -> bool {
        self.coordinators.contains_key(&workspace.id())
    }

    fn coordinator(&self, workspace: &Workspace) -> Option<Arc<WorkCoordinator>> {
        let coordinator = self.coordinators.get(&workspace.id()).map(|c| c.value().clone());
        if coordinator.is_none() {
            log::warn!("{} is not registered with the crawler", workspace.id());
        }
        coordinator
    }

    /// Add an analyzer provider. Workspaces that are already registered get an
    /// analyzer immediately, along with catch-up work for the current solution.
    pub fn add_analyzer_provider(&self, provider: Arc<dyn AnalyzerProvider>, metadata: AnalyzerMetadata) {
        log::info!("Adding analyzer provider '{}'", metadata.name);
        let mut providers = self.providers.write().unwrap();
        // Collect first so no DashMap shard lock is held while enqueueing
        let coordinators: Vec<Arc<WorkCoordinator>> =
            self.coordinators.iter().map(|entry| entry.value().clone()).collect();
        for coordinator in coordinators {
            if let Some(registration) =
                Self::create_registration(provider.as_ref(), &metadata, coordinator.workspace())
            {
                coordinator.add_analyzer(registration);
            }
        }
        providers.push(ProviderEntry { provider, metadata });
    }

    /// Queue reanalysis of the given targets for the named analyzer only
    pub fn reanalyze(
        &self,
        workspace: &Workspace,
        analyzer_name: &str,
        project_ids: &[ProjectId],
        document_ids: &[DocumentId],
        high_priority: bool,
    ) {
        if let Some(coordinator) = self.coordinator(workspace) {
            coordinator.reanalyze(analyzer_name, project_ids, document_ids, high_priority);
        }
    }

    pub fn progress_reporter(&self, workspace: &Workspace) -> Option<Arc<ProgressReporter>> {
        self.coordinator(workspace).map(|c| c.progress().clone())
    }

    pub fn update_config(&self, workspace: &Workspace, config: CrawlerConfig) {
        if let Some(coordinator) = self.coordinator(workspace) {
            coordinator.update_config(config);
        }
    }

    pub fn config(&self, workspace: &Workspace) -> Option<CrawlerConfig> {
        self.coordinator(workspace).map(|c| c.config())
    }

    pub fn notify_option_changed(&self, workspace: &Workspace, change: OptionChange) {
        if let Some(coordinator) = self.coordinator(workspace) {
            coordinator.option_changed(&change);
        }
    }

    pub fn metrics(&self, workspace: &Workspace) -> Option<DispatchSnapshot> {
        self.coordinator(workspace).map(|c| c.metrics())
    }
}
