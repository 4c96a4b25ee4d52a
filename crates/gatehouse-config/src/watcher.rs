//! File watching for configuration hot-reload.
//!
//! The sidecar watches its configuration file (and the optional handler
//! export) and rebuilds its snapshot when one of them changes. Events are
//! debounced per path so that editors writing a file in several steps
//! trigger a single reload.
//!
//! # Example
//!
//! ```no_run
//! use gatehouse_config::FileWatcher;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), gatehouse_config::ConfigError> {
//! let mut watcher = FileWatcher::builder()
//!     .with_debounce(Duration::from_millis(500))
//!     .watch_path("gatehouse.toml")?
//!     .build()?;
//!
//! while let Some(change) = watcher.next().await {
//!     println!("reload after {:?} of {}", change.kind, change.path.display());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::ConfigError;

/// A debounced change of a watched file.
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    /// Path to the changed file.
    pub path: PathBuf,
    /// Kind of change.
    pub kind: FileChangeKind,
    /// When the change was seen.
    pub timestamp: Instant,
}

/// Kind of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    /// File was created (including atomic rename-into-place).
    Created,
    /// File was modified.
    Modified,
    /// File was deleted.
    Deleted,
}

impl FileChangeKind {
    fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(_) => Some(Self::Modified),
            EventKind::Remove(_) => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Builder for a [`FileWatcher`].
#[derive(Debug)]
pub struct FileWatcherBuilder {
    paths: Vec<PathBuf>,
    debounce: Duration,
}

impl Default for FileWatcherBuilder {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            debounce: Duration::from_millis(500),
        }
    }
}

impl FileWatcherBuilder {
    /// Set the debounce window. Default is 500ms.
    #[must_use]
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce = duration;
        self
    }

    /// Watch a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist.
    pub fn watch_path<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        self.paths.push(path.to_path_buf());
        Ok(self)
    }

    /// Start watching.
    ///
    /// The parent directory of each file is watched so that files replaced
    /// by rename keep being observed.
    pub fn build(self) -> Result<FileWatcher, ConfigError> {
        if self.paths.is_empty() {
            return Err(ConfigError::watcher("no paths configured"));
        }

        let (tx, rx) = mpsc::channel(100);
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.blocking_send(event);
            }
        })
        .map_err(|e| ConfigError::watcher(format!("failed to create watcher: {e}")))?;

        let mut targets = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let target = path.canonicalize()?;
            let dir = target
                .parent()
                .map_or_else(|| target.clone(), Path::to_path_buf);
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    ConfigError::watcher(format!("failed to watch {}: {e}", dir.display()))
                })?;
            targets.push(target);
        }

        Ok(FileWatcher {
            _watcher: watcher,
            rx,
            targets,
            debounce: self.debounce,
            last_event: None,
        })
    }
}

/// Watches configuration files and yields debounced changes.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Event>,
    targets: Vec<PathBuf>,
    debounce: Duration,
    last_event: Option<(PathBuf, Instant)>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("targets", &self.targets)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Create a new file watcher builder.
    #[must_use]
    pub fn builder() -> FileWatcherBuilder {
        FileWatcherBuilder::default()
    }

    /// Wait for the next relevant change. `None` once the watcher stops.
    pub async fn next(&mut self) -> Option<FileChangeEvent> {
        loop {
            let event = self.rx.recv().await?;
            if let Some(change) = self.process_event(&event) {
                return Some(change);
            }
        }
    }

    fn process_event(&mut self, event: &Event) -> Option<FileChangeEvent> {
        let kind = FileChangeKind::from_event(&event.kind)?;
        let path = event
            .paths
            .iter()
            .find(|p| self.is_target(p))?
            .clone();

        let now = Instant::now();
        if let Some((last_path, last_time)) = &self.last_event {
            if last_path == &path && now.duration_since(*last_time) < self.debounce {
                return None;
            }
        }
        self.last_event = Some((path.clone(), now));

        Some(FileChangeEvent {
            path,
            kind,
            timestamp: now,
        })
    }

    fn is_target(&self, path: &Path) -> bool {
        self.targets.iter().any(|t| {
            t == path
                || (t.file_name() == path.file_name()
                    && path.parent().and_then(|p| p.canonicalize().ok()).as_deref() == t.parent())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    #[test]
    fn test_change_kind_mapping() {
        assert_eq!(
            FileChangeKind::from_event(&EventKind::Create(notify::event::CreateKind::File)),
            Some(FileChangeKind::Created)
        );
        assert_eq!(
            FileChangeKind::from_event(&EventKind::Remove(notify::event::RemoveKind::File)),
            Some(FileChangeKind::Deleted)
        );
        assert_eq!(
            FileChangeKind::from_event(&EventKind::Access(notify::event::AccessKind::Any)),
            None
        );
    }

    #[test]
    fn test_watch_path_not_found() {
        let result = FileWatcher::builder().watch_path("/nonexistent/gatehouse.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_build_no_paths() {
        let result = FileWatcher::builder().build();
        assert!(matches!(result, Err(ConfigError::Watcher { .. })));
    }

    #[test]
    fn test_debounce_same_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gatehouse.toml");
        fs::write(&path, "").unwrap();
        let mut watcher = FileWatcher::builder()
            .with_debounce(Duration::from_secs(60))
            .watch_path(&path)
            .unwrap()
            .build()
            .unwrap();

        let target = path.canonicalize().unwrap();
        let event = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(target.clone());
        assert!(watcher.process_event(&event).is_some());
        assert!(watcher.process_event(&event).is_none());

        let other = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(target.with_file_name("unrelated.txt"));
        assert!(watcher.process_event(&other).is_none());
    }

    #[tokio::test]
    async fn test_file_change_detection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gatehouse.toml");
        fs::write(&path, "[handler]\ntimeout = 60\n").unwrap();
        let canonical = path.canonicalize().unwrap();

        let mut watcher = FileWatcher::builder()
            .with_debounce(Duration::from_millis(50))
            .watch_path(&path)
            .unwrap()
            .build()
            .unwrap();

        sleep(Duration::from_millis(100)).await;
        fs::write(&path, "[handler]\ntimeout = 120\n").unwrap();

        // File system events can be unreliable in CI, a timeout is tolerated.
        if let Ok(Some(event)) = timeout(Duration::from_secs(2), watcher.next()).await {
            let seen = event.path.canonicalize().unwrap_or(event.path);
            assert_eq!(seen, canonical);
        }
    }
}
