// lib.rs - Background work coordinator for incremental analyzers.
//
// Workspace changes go in, prioritized and debounced analyzer callbacks come
// out. The replay binary in main.rs drives this library from a JSON script.

pub mod analyzer;
pub mod config;
pub mod coordinator;
pub mod dependency;
pub mod dispatcher;
pub mod document_tracker;
pub mod edit_locality;
pub mod events;
pub mod gate;
pub mod parser_pool;
pub mod perf;
pub mod progress;
pub mod registration;
pub mod scheduler;
pub mod solution;
pub mod translator;
pub mod work_item;
pub mod workspace;

// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

#[cfg(test)]
mod integration_tests;

pub use analyzer::{AnalyzerMetadata, AnalyzerProvider, IncrementalAnalyzer};
pub use config::{parse_crawler_config, BackgroundAnalysisScope, CrawlerConfig};
pub use registration::CrawlerRegistrationService;
pub use workspace::{Workspace, WorkspaceKind};
