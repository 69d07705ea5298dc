//! File watching.
//!
//! A watcher invokes a callback for every changed path under a file or
//! directory. Callers own only the lifetime of the subscription: dropping the
//! returned [`WatchHandle`] stops the watch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::{CoreError, CoreResult};

/// Callback invoked with the path that changed.
pub type WatchCallback = Arc<dyn Fn(PathBuf) + Send + Sync>;

/// Keeps a watch alive until dropped.
pub struct WatchHandle {
    _inner: Box<dyn Send>,
}

impl WatchHandle {
    pub fn new(inner: impl Send + 'static) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WatchHandle")
    }
}

/// Watches files and directories for changes.
pub trait FileWatcher: Send + Sync {
    /// Watches `path`. For directories, `pattern` is a glob relative to the
    /// directory that changed paths must match; `None` matches everything.
    fn watch(
        &self,
        path: &Path,
        pattern: Option<&str>,
        callback: WatchCallback,
    ) -> CoreResult<WatchHandle>;
}

/// [`FileWatcher`] backed by the platform's native notification API.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyWatcher;

impl FileWatcher for NotifyWatcher {
    fn watch(
        &self,
        path: &Path,
        pattern: Option<&str>,
        callback: WatchCallback,
    ) -> CoreResult<WatchHandle> {
        let filter = PathFilter::new(path, pattern)?;

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("File watch error: {}", e);
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            for changed in event.paths {
                if filter.matches(&changed) {
                    callback(changed);
                }
            }
        })?;

        // Single files are replaced by rename on save, so watch their parent.
        if path.is_dir() {
            watcher.watch(path, RecursiveMode::Recursive)?;
        } else {
            let parent = path
                .parent()
                .ok_or_else(|| CoreError::FileNotFound(path.display().to_string()))?;
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        Ok(WatchHandle::new(watcher))
    }
}

/// Decides which changed paths are reported for one watch.
enum PathFilter {
    File(PathBuf),
    Directory {
        root: PathBuf,
        pattern: Option<glob::Pattern>,
    },
}

impl PathFilter {
    fn new(path: &Path, pattern: Option<&str>) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::FileNotFound(path.display().to_string()));
        }
        if !path.is_dir() {
            return Ok(Self::File(path.to_path_buf()));
        }
        let pattern = pattern
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| CoreError::InvalidPattern {
                    pattern: p.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()?;
        Ok(Self::Directory {
            root: path.to_path_buf(),
            pattern,
        })
    }

    fn matches(&self, changed: &Path) -> bool {
        match self {
            Self::File(file) => changed == file,
            Self::Directory { root, pattern } => {
                let Ok(relative) = changed.strip_prefix(root) else {
                    return false;
                };
                pattern.as_ref().is_none_or(|p| p.matches_path(relative))
            }
        }
    }
}
