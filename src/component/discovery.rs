//! Discovery strategies
//!
//! Three reference strategies, ordered by priority (higher first): an
//! in-process scan of already-loaded components, a directory scan with one
//! isolated load context per module file, and a debounced file-system
//! watcher. The watcher is built on `notify`, draining its event channel
//! through a debouncing task per the design note replacing `IObservable`
//! change streams with "channels with debounce operator".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::component::manifest::{ComponentManifest, IsolationLevel};
use crate::error::{ConduitError, ConduitResult};

/// A component located by a discovery strategy, not yet validated or loaded
#[derive(Debug, Clone)]
pub struct DiscoveredComponent {
    /// Declared manifest of the candidate
    pub manifest: ComponentManifest,
    /// Name of the source that produced this candidate (strategy name)
    pub source_name: String,
    /// Filesystem path the candidate was discovered at, if any
    pub origin_path: Option<PathBuf>,
    /// Isolation level this candidate should be loaded under
    pub isolation: IsolationLevel,
}

/// Pluggable source of discoverable components
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    /// Strategy name, used in `DiscoveredComponent::source_name`
    fn name(&self) -> &str;

    /// Ordering priority; higher runs first when multiple strategies are configured
    fn priority(&self) -> i32;

    /// Whether this strategy is active
    fn is_enabled(&self) -> bool;

    /// Default isolation level this strategy assigns to what it finds
    fn default_isolation(&self) -> IsolationLevel;

    /// Produces the sequence of components this strategy currently sees
    async fn discover(&self) -> ConduitResult<Vec<DiscoveredComponent>>;
}

/// Scans components already registered in the current process, e.g. ones
/// statically linked into the host binary. Highest priority: always authoritative
/// for what is actually loaded.
pub struct InProcessScanStrategy {
    manifests: Vec<ComponentManifest>,
    enabled: bool,
}

impl InProcessScanStrategy {
    /// Builds a scanner over a fixed, host-supplied manifest set
    #[must_use]
    pub fn new(manifests: Vec<ComponentManifest>) -> Self {
        Self {
            manifests,
            enabled: true,
        }
    }
}

#[async_trait]
impl DiscoveryStrategy for InProcessScanStrategy {
    fn name(&self) -> &str {
        "in-process-scan"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn default_isolation(&self) -> IsolationLevel {
        IsolationLevel::None
    }

    async fn discover(&self) -> ConduitResult<Vec<DiscoveredComponent>> {
        Ok(self
            .manifests
            .iter()
            .cloned()
            .map(|manifest| DiscoveredComponent {
                manifest,
                source_name: self.name().to_string(),
                origin_path: None,
                isolation: self.default_isolation(),
            })
            .collect())
    }
}

/// A manifest loader invoked once per candidate file during a directory
/// scan. Concrete parsing (reading a manifest descriptor out of a plugin
/// file) is an external collaborator's concern; this crate only defines the
/// seam.
pub trait ManifestLoader: Send + Sync {
    /// Attempts to load a manifest from `path`; `Ok(None)` means "not a component"
    fn load(&self, path: &Path) -> ConduitResult<Option<ComponentManifest>>;
}

/// Scans a directory non-recursively, giving each module file its own
/// isolated load context (`IsolationLevel::Plugin` by default).
pub struct DirectoryScanStrategy {
    directory: PathBuf,
    loader: Arc<dyn ManifestLoader>,
    include_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
    enabled: bool,
}

impl DirectoryScanStrategy {
    /// Builds a directory scanner rooted at `directory`
    #[must_use]
    pub fn new(directory: PathBuf, loader: Arc<dyn ManifestLoader>) -> Self {
        Self {
            directory,
            loader,
            include_patterns: vec!["*".to_string()],
            exclude_patterns: Vec::new(),
            enabled: true,
        }
    }

    /// Restricts candidates to file names matching at least one glob-ish pattern
    #[must_use]
    pub fn with_include_patterns(mut self, patterns: Vec<String>) -> Self {
        self.include_patterns = patterns;
        self
    }

    /// Excludes candidates whose file name matches any glob-ish pattern
    #[must_use]
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    fn matches(&self, file_name: &str) -> bool {
        let included = self
            .include_patterns
            .iter()
            .any(|pattern| glob_match(pattern, file_name));
        let excluded = self
            .exclude_patterns
            .iter()
            .any(|pattern| glob_match(pattern, file_name));
        included && !excluded
    }
}

/// Minimal `*`-wildcard glob matcher; sufficient for include/exclude file patterns
fn glob_match(pattern: &str, candidate: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            candidate.starts_with(prefix) && candidate.ends_with(suffix)
        }
        None => pattern == candidate,
    }
}

#[async_trait]
impl DiscoveryStrategy for DirectoryScanStrategy {
    fn name(&self) -> &str {
        "directory-scan"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn default_isolation(&self) -> IsolationLevel {
        IsolationLevel::Plugin
    }

    async fn discover(&self) -> ConduitResult<Vec<DiscoveredComponent>> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| ConduitError::Io(e.to_string()))?;
        let mut discovered = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ConduitError::Io(e.to_string()))?
        {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !self.matches(file_name) {
                continue;
            }
            if let Some(manifest) = self.loader.load(&path)? {
                discovered.push(DiscoveredComponent {
                    manifest,
                    source_name: self.name().to_string(),
                    origin_path: Some(path),
                    isolation: self.default_isolation(),
                });
            }
        }
        Ok(discovered)
    }
}

/// Filesystem change observed by the watcher, after debouncing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A new candidate file appeared
    Added(PathBuf),
    /// An existing candidate file changed
    Modified(PathBuf),
    /// A candidate file disappeared
    Removed(PathBuf),
}

/// Watches a directory for changes and emits debounced add/modify/remove
/// events. The raw `notify` events are drained by a background task that
/// coalesces events on the same path within `debounce` before forwarding,
/// per the design note on replacing `IObservable` streams with channels
/// plus a debounce operator.
pub struct FileWatchStrategy {
    directory: PathBuf,
    loader: Arc<dyn ManifestLoader>,
    debounce: Duration,
    enabled: bool,
}

impl FileWatchStrategy {
    /// Builds a watcher over `directory` with the given debounce interval
    #[must_use]
    pub fn new(directory: PathBuf, loader: Arc<dyn ManifestLoader>, debounce: Duration) -> Self {
        Self {
            directory,
            loader,
            debounce,
            enabled: true,
        }
    }

    /// Starts watching and returns a channel of debounced events plus the
    /// watcher handle, which must be kept alive for events to keep flowing.
    pub fn watch(&self) -> ConduitResult<(mpsc::Receiver<WatchEvent>, RecommendedWatcher)> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        })
        .map_err(|e| ConduitError::Io(e.to_string()))?;
        watcher
            .watch(&self.directory, RecursiveMode::NonRecursive)
            .map_err(|e| ConduitError::Io(e.to_string()))?;

        let (debounced_tx, debounced_rx) = mpsc::channel::<WatchEvent>(256);
        let debounce = self.debounce;
        tokio::spawn(async move {
            let mut pending: HashMap<PathBuf, WatchEvent> = HashMap::new();
            loop {
                tokio::select! {
                    event = raw_rx.recv() => {
                        let Some(event) = event else { break };
                        for path in event.paths {
                            let mapped = match event.kind {
                                EventKind::Create(_) => WatchEvent::Added(path.clone()),
                                EventKind::Remove(_) => WatchEvent::Removed(path.clone()),
                                _ => WatchEvent::Modified(path.clone()),
                            };
                            pending.insert(path, mapped);
                        }
                    }
                    () = tokio::time::sleep(debounce), if !pending.is_empty() => {
                        for (_, event) in pending.drain() {
                            if debounced_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok((debounced_rx, watcher))
    }
}

#[async_trait]
impl DiscoveryStrategy for FileWatchStrategy {
    fn name(&self) -> &str {
        "file-watch"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn default_isolation(&self) -> IsolationLevel {
        IsolationLevel::Plugin
    }

    async fn discover(&self) -> ConduitResult<Vec<DiscoveredComponent>> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| ConduitError::Io(e.to_string()))?;
        let mut discovered = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ConduitError::Io(e.to_string()))?
        {
            let path = entry.path();
            if let Some(manifest) = self.loader.load(&path)? {
                discovered.push(DiscoveredComponent {
                    manifest,
                    source_name: self.name().to_string(),
                    origin_path: Some(path),
                    isolation: self.default_isolation(),
                });
            }
        }
        Ok(discovered)
    }
}

/// Orders strategies by descending priority, matching spec's "ordered by priority"
pub fn order_by_priority(mut strategies: Vec<Arc<dyn DiscoveryStrategy>>) -> Vec<Arc<dyn DiscoveryStrategy>> {
    strategies.sort_by(|a, b| b.priority().cmp(&a.priority()));
    strategies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::manifest::Version;
    use crate::ids::ComponentId;

    fn manifest(name: &str) -> ComponentManifest {
        ComponentManifest {
            id: ComponentId::generate(),
            name: name.to_string(),
            version: Version::new(1, 0, 0),
            dependencies: vec![],
            exports: vec![],
            imports: vec![],
            tags: vec![],
            description: None,
            author: None,
            min_framework_version: None,
            max_framework_version: None,
            isolation: IsolationLevel::None,
        }
    }

    #[tokio::test]
    async fn in_process_scan_returns_configured_manifests() {
        let strategy = InProcessScanStrategy::new(vec![manifest("demo")]);
        let found = strategy.discover().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_name, "in-process-scan");
    }

    #[test]
    fn glob_matches_wildcard_suffix() {
        assert!(glob_match("*.conduit", "demo.conduit"));
        assert!(!glob_match("*.conduit", "demo.txt"));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn priority_ordering_is_descending() {
        let strategies: Vec<Arc<dyn DiscoveryStrategy>> = vec![
            Arc::new(InProcessScanStrategy::new(vec![])),
        ];
        let ordered = order_by_priority(strategies);
        assert_eq!(ordered[0].priority(), 100);
    }

    struct NoneLoader;
    impl ManifestLoader for NoneLoader {
        fn load(&self, _path: &Path) -> ConduitResult<Option<ComponentManifest>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn directory_scan_over_empty_dir_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = DirectoryScanStrategy::new(dir.path().to_path_buf(), Arc::new(NoneLoader));
        let found = strategy.discover().await.unwrap();
        assert!(found.is_empty());
    }
}
