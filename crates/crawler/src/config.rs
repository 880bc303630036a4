//
// config.rs
//
// Configuration for background analysis scope and backoff
//

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Breadth of eager background analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackgroundAnalysisScope {
    /// Only the document focused in the editor
    ActiveFile,
    /// Open documents and their projects
    OpenFilesAndProjects,
    /// Every document in the solution
    #[default]
    FullSolution,
}

impl BackgroundAnalysisScope {
    /// Parse a settings value. Accepts the camelCase names plus the short
    /// aliases used on the command line.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "activeFile" | "active" => Some(Self::ActiveFile),
            "openFilesAndProjects" | "open" => Some(Self::OpenFilesAndProjects),
            "fullSolution" | "full" => Some(Self::FullSolution),
            _ => None,
        }
    }
}

/// The five independently configurable debounce windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Edits to the active document
    pub active_file: Duration,
    /// Edits to any other document
    pub all_files: Duration,
    /// Project-level work items
    pub entire_project: Duration,
    /// Documents of projects that depend on a changed project
    pub project_propagation: Duration,
    /// Sibling documents after a declaration-level change
    pub semantic_change: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            active_file: Duration::from_millis(100),
            all_files: Duration::from_millis(1500),
            entire_project: Duration::from_millis(5000),
            project_propagation: Duration::from_millis(500),
            semantic_change: Duration::from_millis(200),
        }
    }
}

/// Which backoff window governs a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackoffClass {
    /// Dispatch as soon as the gate allows
    Immediate,
    ActiveFile,
    SemanticChange,
    ProjectPropagation,
    AllFiles,
    EntireProject,
}

/// Crawler configuration for one workspace
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlerConfig {
    /// Scope for languages without an explicit entry
    pub default_scope: BackgroundAnalysisScope,
    /// Per-language overrides, keyed by language name
    pub language_scopes: HashMap<String, BackgroundAnalysisScope>,
    /// Propagate project changes to direct referrers only
    pub direct_dependency_propagation_only: bool,
    pub backoff: BackoffConfig,
    /// Number of work items the dispatcher may run at once
    pub max_concurrent_items: usize,
}

impl Default for CrawlerConfig {
    /// Full-solution scope, transitive propagation, four concurrent items.
    ///
    /// # Examples
    ///
    /// ```
    /// use crawler::config::{BackgroundAnalysisScope, CrawlerConfig};
    ///
    /// let cfg = CrawlerConfig::default();
    /// assert_eq!(cfg.scope_for("C#"), BackgroundAnalysisScope::FullSolution);
    /// assert!(!cfg.direct_dependency_propagation_only);
    /// ```
    fn default() -> Self {
        Self {
            default_scope: BackgroundAnalysisScope::FullSolution,
            language_scopes: HashMap::new(),
            direct_dependency_propagation_only: false,
            backoff: BackoffConfig::default(),
            max_concurrent_items: 4,
        }
    }
}

impl CrawlerConfig {
    pub fn with_scope(scope: BackgroundAnalysisScope) -> Self {
        Self {
            default_scope: scope,
            ..Self::default()
        }
    }

    pub fn scope_for(&self, language: &str) -> BackgroundAnalysisScope {
        self.language_scopes
            .get(language)
            .copied()
            .unwrap_or(self.default_scope)
    }

    pub fn backoff_for(&self, class: BackoffClass) -> Duration {
        match class {
            BackoffClass::Immediate => Duration::ZERO,
            BackoffClass::ActiveFile => self.backoff.active_file,
            BackoffClass::SemanticChange => self.backoff.semantic_change,
            BackoffClass::ProjectPropagation => self.backoff.project_propagation,
            BackoffClass::AllFiles => self.backoff.all_files,
            BackoffClass::EntireProject => self.backoff.entire_project,
        }
    }

    /// Clamp values the scheduler cannot honour
    pub fn validated(mut self) -> Self {
        if self.max_concurrent_items == 0 {
            log::warn!("max_concurrent_items must be at least 1; using 1");
            self.max_concurrent_items = 1;
        }
        self
    }

    /// Settings that differ between `self` (old) and `other` (new)
    pub fn changes(&self, other: &Self) -> Vec<OptionChange> {
        let mut changes = Vec::new();

        let mut languages: Vec<&String> = self
            .language_scopes
            .keys()
            .chain(other.language_scopes.keys())
            .collect();
        languages.sort();
        languages.dedup();

        if self.default_scope != other.default_scope {
            changes.push(OptionChange::new(OPTION_BACKGROUND_ANALYSIS_SCOPE, None));
        }
        for language in languages {
            if self.scope_for(language) != other.scope_for(language)
                && self.default_scope == other.default_scope
            {
                changes.push(OptionChange::new(
                    OPTION_BACKGROUND_ANALYSIS_SCOPE,
                    Some(language.clone()),
                ));
            }
        }
        if self.direct_dependency_propagation_only != other.direct_dependency_propagation_only {
            changes.push(OptionChange::new(OPTION_DIRECT_DEPENDENCY_PROPAGATION, None));
        }
        if self.backoff != other.backoff {
            changes.push(OptionChange::new(OPTION_BACKOFF, None));
        }
        changes
    }
}

pub const OPTION_BACKGROUND_ANALYSIS_SCOPE: &str = "backgroundAnalysisScope";
pub const OPTION_DIRECT_DEPENDENCY_PROPAGATION: &str = "directDependencyPropagationOnly";
pub const OPTION_BACKOFF: &str = "backoff";

/// A changed option, passed to analyzers so they can decide whether to reanalyze
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionChange {
    pub name: String,
    /// Language the option is scoped to, `None` for global options
    pub language: Option<String>,
}

impl OptionChange {
    pub fn new(name: impl Into<String>, language: Option<String>) -> Self {
        Self {
            name: name.into(),
            language,
        }
    }
}

fn parse_duration_ms(section: &serde_json::Value, key: &str, default: Duration) -> Duration {
    match section.get(key) {
        None => default,
        Some(v) => match v.as_u64() {
            Some(ms) => Duration::from_millis(ms),
            None => {
                log::warn!("Invalid backoff value for '{}': {}; using default {:?}", key, v, default);
                default
            }
        },
    }
}

fn parse_scope(value: &serde_json::Value, fallback: BackgroundAnalysisScope) -> BackgroundAnalysisScope {
    match value.as_str().and_then(BackgroundAnalysisScope::parse) {
        Some(scope) => scope,
        None => {
            log::warn!("Invalid background analysis scope {}; using {:?}", value, fallback);
            fallback
        }
    }
}

/// Parse crawler configuration from a JSON settings tree.
///
/// Reads the top-level `crawler` section. Absent fields keep their defaults and
/// malformed values fall back to defaults with a warning; this never fails.
///
/// Supported keys:
/// - `backgroundAnalysisScope`: `"activeFile" | "openFilesAndProjects" | "fullSolution"`,
///   or an object mapping language names to scopes (`"default"` sets the fallback).
/// - `directDependencyPropagationOnly`: bool
/// - `backoffMs`: `activeFile`, `allFiles`, `entireProject`, `projectPropagation`, `semanticChange`
/// - `maxConcurrentItems`: positive integer
///
/// # Returns
///
/// `None` when there is no `crawler` section.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use crawler::config::{parse_crawler_config, BackgroundAnalysisScope};
///
/// let settings = json!({
///     "crawler": {
///         "backgroundAnalysisScope": { "default": "activeFile", "C#": "fullSolution" },
///         "backoffMs": { "activeFile": 50 }
///     }
/// });
/// let cfg = parse_crawler_config(&settings).unwrap();
/// assert_eq!(cfg.scope_for("C#"), BackgroundAnalysisScope::FullSolution);
/// assert_eq!(cfg.scope_for("VB"), BackgroundAnalysisScope::ActiveFile);
/// ```
pub fn parse_crawler_config(settings: &serde_json::Value) -> Option<CrawlerConfig> {
    let section = settings.get("crawler")?;
    let mut config = CrawlerConfig::default();

    match section.get("backgroundAnalysisScope") {
        Some(serde_json::Value::Object(map)) => {
            if let Some(default) = map.get("default") {
                config.default_scope = parse_scope(default, config.default_scope);
            }
            for (language, value) in map.iter().filter(|(k, _)| k.as_str() != "default") {
                let scope = parse_scope(value, config.default_scope);
                config.language_scopes.insert(language.clone(), scope);
            }
        }
        Some(value) => {
            config.default_scope = parse_scope(value, config.default_scope);
        }
        None => {}
    }

    if let Some(v) = section.get("directDependencyPropagationOnly") {
        match v.as_bool() {
            Some(b) => config.direct_dependency_propagation_only = b,
            None => log::warn!("Invalid directDependencyPropagationOnly value {}; using false", v),
        }
    }

    if let Some(backoff) = section.get("backoffMs") {
        let defaults = BackoffConfig::default();
        config.backoff = BackoffConfig {
            active_file: parse_duration_ms(backoff, "activeFile", defaults.active_file),
            all_files: parse_duration_ms(backoff, "allFiles", defaults.all_files),
            entire_project: parse_duration_ms(backoff, "entireProject", defaults.entire_project),
            project_propagation: parse_duration_ms(
                backoff,
                "projectPropagation",
                defaults.project_propagation,
            ),
            semantic_change: parse_duration_ms(backoff, "semanticChange", defaults.semantic_change),
        };
    }

    if let Some(v) = section.get("maxConcurrentItems") {
        match v.as_u64().filter(|n| *n > 0) {
            Some(n) => config.max_concurrent_items = n as usize,
            None => log::warn!("Invalid maxConcurrentItems value {}; using default", v),
        }
    }

    log::info!("Crawler configuration loaded from settings:");
    log::info!("  default_scope: {:?}", config.default_scope);
    log::info!("  language_scopes: {:?}", config.language_scopes);
    log::info!(
        "  direct_dependency_propagation_only: {}",
        config.direct_dependency_propagation_only
    );
    log::info!("  backoff: {:?}", config.backoff);
    log::info!("  max_concurrent_items: {}", config.max_concurrent_items);

    Some(config)
}
