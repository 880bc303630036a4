//
// integration_tests.rs
//
// End-to-end tests of the coordinator pipeline with a paused clock
//

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::analyzer::{
    AnalyzerFault, AnalyzerMetadata, AnalyzerPhase, IncrementalAnalyzer, SharedAnalyzerProvider,
};
use crate::config::{BackgroundAnalysisScope, CrawlerConfig, OptionChange};
use crate::events::ChangeKind;
use crate::progress::ProgressStatus;
use crate::registration::CrawlerRegistrationService;
use crate::solution::{Document, DocumentId};
use crate::test_utils::{fixture_solution, install, settle, Call, Fixture, RecordingAnalyzer};
use crate::work_item::InvocationReasons;
use crate::workspace::{Workspace, WorkspaceKind};

struct Harness {
    service: CrawlerRegistrationService,
    workspace: Arc<Workspace>,
}

impl Harness {
    fn new() -> Self {
        Self {
            service: CrawlerRegistrationService::new(),
            workspace: Workspace::new(WorkspaceKind::host()),
        }
    }

    fn register(&self, config: CrawlerConfig) {
        self.service.register(&self.workspace, config);
    }

    /// Announce the fixture as a freshly loaded solution and wait for the work to drain
    async fn load(&self, fixture: &Fixture) {
        self.workspace
            .set_current_solution(ChangeKind::SolutionAdded, fixture.solution.clone());
        settle().await;
    }

    /// Append a file-scope comment, which always counts as a declaration-level edit
    fn touch(&self, doc: DocumentId, marker: usize) {
        self.workspace.apply(ChangeKind::DocumentChanged(doc), |s| {
            let text = format!("{}// edit {}\n", s.document(&doc).unwrap().text, marker);
            s.with_document_text(&doc, text)
        });
    }

    /// Add a statement inside the document's method body
    fn edit_body(&self, doc: DocumentId) {
        self.workspace.apply(ChangeKind::DocumentChanged(doc), |s| {
            let text = s
                .document(&doc)
                .unwrap()
                .text
                .replacen("    {\n    }", "    {\n        count++;\n    }", 1);
            s.with_document_text(&doc, text)
        });
    }
}

fn single_thread_config() -> CrawlerConfig {
    CrawlerConfig {
        max_concurrent_items: 1,
        ..CrawlerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_rapid_edits_coalesce_into_one_syntax_call() {
    let fixture = fixture_solution(&[1]);
    let doc = fixture.documents[0][0];
    let h = Harness::new();
    let recorder = install(&h.service, "recorder", RecordingAnalyzer::new());
    h.register(CrawlerConfig::default());
    h.load(&fixture).await;
    recorder.clear();

    for n in 0..5 {
        h.touch(doc, n);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    settle().await;

    assert_eq!(recorder.syntax_calls_for(doc), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gate_holds_dispatch_and_drains_grouped_by_project() {
    let fixture = fixture_solution(&[2, 2]);
    let (p0, p1) = (&fixture.documents[0], &fixture.documents[1]);
    let h = Harness::new();
    let recorder = install(&h.service, "recorder", RecordingAnalyzer::new());
    h.register(single_thread_config());
    h.load(&fixture).await;
    recorder.clear();

    let reporter = h.service.progress_reporter(&h.workspace).unwrap();
    let mut statuses = reporter.subscribe();

    let guard = h.service.global_operations().start("bulk edit");
    for doc in [p0[0], p1[0], p0[1], p1[1]] {
        h.edit_body(doc);
    }
    settle().await;
    assert_eq!(recorder.work_count(), 0, "nothing runs while the gate is closed");
    assert!(reporter.is_in_progress());

    drop(guard);
    settle().await;

    // Either project may go first, but each drains as a group in edit order
    let order = recorder.syntax_order();
    assert!(
        order == vec![p0[0], p0[1], p1[0], p1[1]] || order == vec![p1[0], p1[1], p0[0], p0[1]],
        "unexpected drain order {:?}",
        order
    );
    assert_eq!(recorder.document_count(), 0, "body edits stay syntax-only");

    let mut seen = Vec::new();
    while let Ok(status) = statuses.try_recv() {
        seen.push(status);
    }
    let paused = seen.iter().position(|s| *s == ProgressStatus::Paused);
    let resumed = seen.iter().position(|s| *s == ProgressStatus::Resumed);
    assert!(paused.is_some() && resumed.is_some() && paused < resumed);
}

#[tokio::test(start_paused = true)]
async fn test_unregister_stops_all_callbacks() {
    let fixture = fixture_solution(&[3]);
    let h = Harness::new();
    let recorder = install(&h.service, "recorder", RecordingAnalyzer::new());
    h.register(CrawlerConfig::default());

    h.workspace
        .set_current_solution(ChangeKind::SolutionAdded, fixture.solution.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.service.unregister(&h.workspace).await;
    assert!(!h.service.is_registered(&h.workspace));

    h.touch(fixture.documents[0][0], 0);
    settle().await;
    assert!(recorder.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_analyzer_faults_are_isolated() {
    let fixture = fixture_solution(&[2]);
    let h = Harness::new();
    let faults: Arc<Mutex<Vec<(String, AnalyzerPhase)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let faults = faults.clone();
        h.service.set_fatal_error_hook(Arc::new(move |fault: &AnalyzerFault| {
            faults.lock().unwrap().push((fault.analyzer.clone(), fault.phase));
        }));
    }
    let failing = install(
        &h.service,
        "failing",
        RecordingAnalyzer::new().failing(AnalyzerPhase::Syntax),
    );
    let panicking = install(
        &h.service,
        "panicking",
        RecordingAnalyzer::new().panicking(AnalyzerPhase::Document),
    );
    let good = install(&h.service, "good", RecordingAnalyzer::new());
    h.register(CrawlerConfig::default());
    h.load(&fixture).await;

    assert_eq!(good.syntax_count(), 2);
    assert_eq!(good.document_count(), 2);
    assert_eq!(failing.syntax_count(), 2);
    assert_eq!(failing.document_count(), 0, "a faulted analyzer skips its later phases");
    assert_eq!(panicking.document_count(), 2);
    assert_eq!(good.count(|c| matches!(c, Call::Project(..))), 1);

    let faults = faults.lock().unwrap();
    assert_eq!(faults.len(), 4);
    assert_eq!(
        faults
            .iter()
            .filter(|(name, phase)| name == "failing" && *phase == AnalyzerPhase::Syntax)
            .count(),
        2
    );
    assert_eq!(
        faults
            .iter()
            .filter(|(name, phase)| name == "panicking" && *phase == AnalyzerPhase::Document)
            .count(),
        2
    );
    assert_eq!(h.service.metrics(&h.workspace).unwrap().faults, 4);
}

#[tokio::test(start_paused = true)]
async fn test_reanalyze_reaches_only_named_analyzer() {
    let fixture = fixture_solution(&[2]);
    let project = fixture.projects[0];
    let doc = fixture.documents[0][0];
    let h = Harness::new();
    let a = install(&h.service, "a", RecordingAnalyzer::new());
    let b = install(&h.service, "b", RecordingAnalyzer::new());
    h.register(CrawlerConfig::default());
    h.load(&fixture).await;
    a.clear();
    b.clear();

    h.service.reanalyze(&h.workspace, "a", &[], &[doc], true);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(a.syntax_calls_for(doc), 1, "high priority skips the backoff");
    assert_eq!(a.semantic_documents().len(), 1);
    assert_eq!(b.work_count(), 0);

    h.service.reanalyze(&h.workspace, "b", &[project], &[], false);
    settle().await;
    assert_eq!(b.syntax_count(), 2);
    assert_eq!(b.count(|c| matches!(c, Call::Project(..))), 1);
    assert_eq!(a.syntax_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_provider_receives_catch_up_work() {
    let fixture = fixture_solution(&[3]);
    let docs = &fixture.documents[0];
    let h = Harness::new();
    let early = install(&h.service, "early", RecordingAnalyzer::new());
    h.register(single_thread_config());
    h.load(&fixture).await;
    h.workspace.document_tracker().set_active_document(Some(docs[2]));
    settle().await;
    early.clear();

    let late = install(&h.service, "late", RecordingAnalyzer::new());
    settle().await;

    assert_eq!(late.syntax_count(), 3);
    assert_eq!(late.syntax_order()[0], docs[2], "active document first");
    assert_eq!(early.work_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_progress_brackets_busy_period() {
    let fixture = fixture_solution(&[2]);
    let h = Harness::new();
    let _recorder = install(&h.service, "recorder", RecordingAnalyzer::new());
    h.register(CrawlerConfig::default());
    let reporter = h.service.progress_reporter(&h.workspace).unwrap();
    let mut rx = reporter.subscribe();

    h.load(&fixture).await;

    let mut seen = Vec::new();
    while let Ok(status) = rx.try_recv() {
        seen.push(status);
    }
    assert!(seen.contains(&ProgressStatus::Started));
    assert_eq!(seen.last(), Some(&ProgressStatus::Stopped));
    assert!(!reporter.is_in_progress());
    assert_eq!(reporter.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_work_is_cancelled_and_rerun() {
    let fixture = fixture_solution(&[1]);
    let doc = fixture.documents[0][0];
    let h = Harness::new();
    let recorder = install(
        &h.service,
        "slow",
        RecordingAnalyzer::new().with_syntax_delay(Duration::from_secs(1)),
    );
    h.register(CrawlerConfig::default());
    h.load(&fixture).await;
    recorder.clear();

    h.touch(doc, 0);
    // Past the 1.5s backoff, inside the 1s analysis
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(recorder.syntax_calls_for(doc), 1);
    h.touch(doc, 1);
    settle().await;

    assert_eq!(recorder.cancelled_count(), 1);
    assert_eq!(recorder.syntax_calls_for(doc), 2);
    assert!(h.service.metrics(&h.workspace).unwrap().cancellations >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_close_bypass_active_file_scope() {
    let fixture = fixture_solution(&[2]);
    let doc = fixture.documents[0][0];
    let h = Harness::new();
    let recorder = install(&h.service, "recorder", RecordingAnalyzer::new());
    h.register(CrawlerConfig::with_scope(BackgroundAnalysisScope::ActiveFile));
    h.load(&fixture).await;
    assert_eq!(recorder.work_count(), 0);

    h.workspace.open_document(doc);
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.workspace.close_document(doc);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let work: Vec<Call> = recorder
        .calls()
        .into_iter()
        .filter(|c| !matches!(c, Call::NewSolutionSnapshot(_)))
        .collect();
    assert_eq!(work, vec![Call::Open(doc), Call::Close(doc), Call::Reset(doc)]);
}

#[tokio::test(start_paused = true)]
async fn test_active_document_switch_under_active_file_scope() {
    let fixture = fixture_solution(&[3]);
    let docs = &fixture.documents[0];
    let h = Harness::new();
    let recorder = install(&h.service, "recorder", RecordingAnalyzer::new());
    h.register(CrawlerConfig::with_scope(BackgroundAnalysisScope::ActiveFile));
    h.load(&fixture).await;
    let tracker = h.workspace.document_tracker();

    tracker.set_active_document(Some(docs[1]));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(recorder.syntax_calls_for(docs[1]), 1);
    assert!(recorder.semantic_documents().contains(&docs[1]));

    tracker.set_active_document(Some(docs[2]));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(recorder.syntax_calls_for(docs[2]), 1);
    assert_eq!(recorder.syntax_calls_for(docs[1]), 1, "previous document is left alone");

    tracker.set_active_document(None);
    tokio::time::sleep(Duration::from_millis(10)).await;
    tracker.set_active_document(Some(docs[1]));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(recorder.syntax_calls_for(docs[1]), 2, "no memo of earlier analysis");
    assert_eq!(recorder.syntax_calls_for(docs[0]), 0);
}

#[tokio::test(start_paused = true)]
async fn test_edits_outside_active_document_are_dropped() {
    let fixture = fixture_solution(&[2]);
    let docs = &fixture.documents[0];
    let h = Harness::new();
    let recorder = install(&h.service, "recorder", RecordingAnalyzer::new());
    h.register(CrawlerConfig::with_scope(BackgroundAnalysisScope::ActiveFile));
    h.load(&fixture).await;
    h.workspace.document_tracker().set_active_document(Some(docs[0]));
    settle().await;
    recorder.clear();

    h.touch(docs[1], 0);
    h.touch(docs[0], 0);
    settle().await;

    assert_eq!(recorder.syntax_calls_for(docs[0]), 1);
    assert_eq!(recorder.syntax_calls_for(docs[1]), 0);
}

#[tokio::test(start_paused = true)]
async fn test_option_change_reanalyzes_interested_analyzers() {
    let fixture = fixture_solution(&[2]);
    let h = Harness::new();
    let interested = install(&h.service, "interested", RecordingAnalyzer::new().reanalyze_on_options());
    let indifferent = install(&h.service, "indifferent", RecordingAnalyzer::new());
    h.register(CrawlerConfig::default());
    h.load(&fixture).await;
    interested.clear();
    indifferent.clear();

    let mut config = h.service.config(&h.workspace).unwrap();
    config.direct_dependency_propagation_only = true;
    h.service.update_config(&h.workspace, config);
    settle().await;
    assert_eq!(interested.syntax_count(), 2);
    assert_eq!(indifferent.work_count(), 0);

    interested.clear();
    h.service
        .notify_option_changed(&h.workspace, OptionChange::new("formatting", Some("C#".into())));
    settle().await;
    assert_eq!(interested.syntax_count(), 2);

    interested.clear();
    h.service.update_config(&h.workspace, h.service.config(&h.workspace).unwrap());
    settle().await;
    assert_eq!(interested.work_count(), 0, "an unchanged config raises nothing");
}

#[tokio::test(start_paused = true)]
async fn test_removed_document_gets_one_remove_call() {
    let fixture = fixture_solution(&[3]);
    let docs = &fixture.documents[0];
    let h = Harness::new();
    let recorder = install(&h.service, "recorder", RecordingAnalyzer::new());
    h.register(CrawlerConfig::default());
    h.load(&fixture).await;
    recorder.clear();

    h.touch(docs[0], 0);
    h.workspace
        .apply(ChangeKind::DocumentRemoved(docs[0]), |s| s.without_document(&docs[0]));
    settle().await;

    assert_eq!(recorder.remove_document_count(), 1);
    assert_eq!(recorder.syntax_calls_for(docs[0]), 0, "removal wins over the pending edit");
    assert_eq!(recorder.syntax_calls_for(docs[1]), 1, "siblings are re-analyzed");
}

#[tokio::test(start_paused = true)]
async fn test_second_register_is_ignored() {
    let fixture = fixture_solution(&[2]);
    let h = Harness::new();
    let recorder = install(&h.service, "recorder", RecordingAnalyzer::new());
    h.register(CrawlerConfig::default());
    h.register(CrawlerConfig::default());
    h.load(&fixture).await;

    assert_eq!(recorder.syntax_count(), 2, "one coordinator, one set of callbacks");
}

#[tokio::test(start_paused = true)]
async fn test_new_solution_snapshot_once_per_version() {
    let fixture = fixture_solution(&[2]);
    let h = Harness::new();
    let recorder = install(&h.service, "recorder", RecordingAnalyzer::new());
    h.register(CrawlerConfig::default());
    h.load(&fixture).await;

    let snapshots = recorder.count(|c| matches!(c, Call::NewSolutionSnapshot(_)));
    assert_eq!(snapshots, 1);
    let version = h.workspace.current_solution().version();
    assert_eq!(recorder.calls()[0], Call::NewSolutionSnapshot(version));
}

#[tokio::test(start_paused = true)]
async fn test_edits_before_dispatch_announce_only_the_latest_snapshot() {
    let fixture = fixture_solution(&[1]);
    let doc = fixture.documents[0][0];
    let h = Harness::new();
    let recorder = install(&h.service, "recorder", RecordingAnalyzer::new());
    h.register(CrawlerConfig::default());
    h.load(&fixture).await;
    recorder.clear();

    h.touch(doc, 0);
    let skipped = h.workspace.current_solution().version();
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.touch(doc, 1);
    settle().await;

    let latest = h.workspace.current_solution().version();
    assert_ne!(skipped, latest);
    let snapshots: Vec<Call> = recorder
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::NewSolutionSnapshot(_)))
        .collect();
    assert_eq!(snapshots, vec![Call::NewSolutionSnapshot(latest)]);
}

#[tokio::test(start_paused = true)]
async fn test_gate_holds_remaining_callbacks_of_in_flight_item() {
    let fixture = fixture_solution(&[1]);
    let doc = fixture.documents[0][0];
    let h = Harness::new();
    let slow = install(
        &h.service,
        "slow",
        RecordingAnalyzer::new().with_syntax_delay(Duration::from_secs(1)),
    );
    let fast = install(&h.service, "fast", RecordingAnalyzer::new());
    h.register(CrawlerConfig::default());
    h.load(&fixture).await;
    slow.clear();
    fast.clear();

    h.touch(doc, 0);
    // Past the 1.5s backoff, inside the slow analyzer's syntax phase
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(slow.syntax_calls_for(doc), 1);

    let guard = h.service.global_operations().start("bulk edit");
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(slow.document_count(), 0, "slow's next phase waits for the gate");
    assert_eq!(fast.work_count(), 0, "later analyzers wait for the gate");

    drop(guard);
    settle().await;
    assert_eq!(slow.document_count(), 1);
    assert_eq!(fast.syntax_calls_for(doc), 1);
    assert_eq!(fast.document_count(), 1);
    assert_eq!(slow.cancelled_count(), 0);
}

/// Appends its name to a shared log on every syntax call
struct OrderRecorder {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl IncrementalAnalyzer for OrderRecorder {
    async fn analyze_syntax(
        &self,
        _document: &Document,
        _reasons: InvocationReasons,
        _token: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(self.name);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_active_file_analyzers_run_first_for_high_priority_items() {
    let fixture = fixture_solution(&[1, 1]);
    let (active, other) = (fixture.documents[0][0], fixture.documents[1][0]);
    let h = Harness::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for (name, focused) in [("plain", false), ("focused", true)] {
        let recorder = Arc::new(OrderRecorder { name, log: log.clone() });
        h.service.add_analyzer_provider(
            Arc::new(SharedAnalyzerProvider(recorder)),
            AnalyzerMetadata::new(name).high_priority_for_active_file(focused),
        );
    }
    h.register(CrawlerConfig::default());
    h.load(&fixture).await;
    h.workspace.document_tracker().set_active_document(Some(active));
    settle().await;
    log.lock().unwrap().clear();

    h.touch(other, 0);
    settle().await;
    assert_eq!(*log.lock().unwrap(), vec!["plain", "focused"]);

    log.lock().unwrap().clear();
    h.touch(active, 0);
    settle().await;
    assert_eq!(*log.lock().unwrap(), vec!["focused", "plain"]);
}
