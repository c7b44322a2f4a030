//! Manager options.
//!
//! `Options` is the programmatic surface (builder style). `ManagerConfig` is
//! the deserializable section an application keeps per task category in its
//! own config file and converts with `Options::from`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{IdGenerator, UlidGenerator};
use crate::persist::{FileStore, SnapshotStore};

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 5;

/// Default flush debounce window.
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_secs(3);

/// Options for [`Manager::new`](crate::Manager::new).
///
/// ## Field semantics
/// - `workers`: pool size (`0` is clamped to 1)
/// - `max_retry`: retry budget assigned to tasks that arrive with `max_retry == 0`
/// - `timeout`: per-attempt deadline (`None` = no deadline)
/// - `persist_debounce`: flush window (`None` = flush on every trigger, synchronously)
/// - `running`: whether dispatch starts enabled
/// - `span`: parent span for every task execution (the logging sink)
#[derive(Clone)]
pub struct Options {
    pub name: String,
    pub workers: usize,
    pub max_retry: u32,
    pub timeout: Option<Duration>,
    pub persist_path: Option<PathBuf>,
    pub persist_debounce: Option<Duration>,
    pub running: bool,
    pub span: Option<tracing::Span>,
    pub store: Option<Arc<dyn SnapshotStore>>,
    pub id_generator: Arc<dyn IdGenerator>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_persist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    pub fn with_persist_debounce(mut self, debounce: Option<Duration>) -> Self {
        self.persist_debounce = debounce;
        self
    }

    pub fn with_running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Custom snapshot store; takes precedence over `persist_path`.
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Effective pool size.
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    /// The store to use, if persistence is enabled at all.
    pub(crate) fn snapshot_store(&self) -> Option<Arc<dyn SnapshotStore>> {
        self.store.clone().or_else(|| {
            self.persist_path
                .as_ref()
                .map(|path| Arc::new(FileStore::new(path.clone())) as Arc<dyn SnapshotStore>)
        })
    }

    pub(crate) fn execution_span(&self) -> tracing::Span {
        self.span
            .clone()
            .unwrap_or_else(|| tracing::info_span!("spool", manager = %self.name))
    }
}

impl Default for Options {
    /// - `workers = 5`
    /// - `max_retry = 0`
    /// - no timeout, no persistence
    /// - `persist_debounce = 3s`
    /// - `running = true`
    fn default() -> Self {
        Self {
            name: "spool".to_string(),
            workers: DEFAULT_WORKERS,
            max_retry: 0,
            timeout: None,
            persist_path: None,
            persist_debounce: Some(DEFAULT_PERSIST_DEBOUNCE),
            running: true,
            span: None,
            store: None,
            id_generator: Arc::new(UlidGenerator),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("max_retry", &self.max_retry)
            .field("timeout", &self.timeout)
            .field("persist_path", &self.persist_path)
            .field("persist_debounce", &self.persist_debounce)
            .field("running", &self.running)
            .field("custom_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

/// Per-category task settings as they appear in an application config file.
///
/// ```json
/// { "workers": 5, "max_retry": 2, "task_persistent": true, "persist_path": "data/copy.json" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub workers: usize,
    pub max_retry: u32,
    pub timeout_secs: Option<u64>,
    pub persist_path: Option<PathBuf>,
    pub persist_debounce_ms: Option<u64>,
    /// `false` disables the snapshot even when `persist_path` is set.
    pub task_persistent: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_retry: 0,
            timeout_secs: None,
            persist_path: None,
            persist_debounce_ms: Some(DEFAULT_PERSIST_DEBOUNCE.as_millis() as u64),
            task_persistent: true,
        }
    }
}

impl From<ManagerConfig> for Options {
    fn from(config: ManagerConfig) -> Self {
        let mut options = Options::default()
            .with_workers(config.workers)
            .with_max_retry(config.max_retry)
            .with_persist_debounce(config.persist_debounce_ms.map(Duration::from_millis));
        if let Some(secs) = config.timeout_secs {
            options = options.with_timeout(Duration::from_secs(secs));
        }
        if config.task_persistent
            && let Some(path) = config.persist_path
        {
            options = options.with_persist_path(path);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = Options::default();
        assert_eq!(options.workers, 5);
        assert_eq!(options.max_retry, 0);
        assert_eq!(options.persist_debounce, Some(Duration::from_secs(3)));
        assert!(options.running);
        assert!(options.timeout.is_none());
        assert!(options.snapshot_store().is_none());
    }

    #[test]
    fn zero_workers_is_clamped() {
        assert_eq!(Options::new().with_workers(0).worker_count(), 1);
    }

    #[test]
    fn persist_path_enables_a_file_store() {
        let options = Options::new().with_persist_path("/tmp/spool.json");
        assert!(options.snapshot_store().is_some());
    }

    #[test]
    fn config_converts_into_options() {
        let config: ManagerConfig = serde_json::from_str(
            r#"{"workers": 3, "max_retry": 2, "timeout_secs": 30, "persist_path": "copy.json"}"#,
        )
        .unwrap();
        let options = Options::from(config);

        assert_eq!(options.workers, 3);
        assert_eq!(options.max_retry, 2);
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.persist_path, Some(PathBuf::from("copy.json")));
        assert_eq!(options.persist_debounce, Some(Duration::from_secs(3)));
    }

    #[test]
    fn non_persistent_config_drops_the_path() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"persist_path": "upload.json", "task_persistent": false}"#)
                .unwrap();
        let options = Options::from(config);
        assert!(options.persist_path.is_none());
        assert_eq!(options.workers, DEFAULT_WORKERS);
    }
}
