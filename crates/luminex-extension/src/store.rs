//! Persistent record of installed and disabled extensions.
//!
//! The manager never touches this file directly; it goes through the
//! [`ExtensionStore`] trait, and [`FileExtensionStore`] keeps the state in
//! `<root>/extensions.json`:
//!
//! ```json
//! {
//!   "dependencies": { "python": "1.2.0" },
//!   "local": { "todo": "/home/me/src/todo" },
//!   "disabled": ["rust"],
//!   "locked": []
//! }
//! ```
//!
//! `dependencies` are global installs living under `<root>/modules/<id>`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Errors persisting store or memento state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Discovery and enable/disable persistence.
///
/// Writes may block on disk; async callers run them on the blocking pool.
pub trait ExtensionStore: Send + Sync {
    /// Ids installed into the global extension folder.
    fn global_ids(&self) -> Vec<String>;

    /// Whether `id` is a global install.
    fn has_extension(&self, id: &str) -> bool;

    fn is_disabled(&self, id: &str) -> bool;

    fn is_locked(&self, id: &str) -> bool;

    fn set_disabled(&self, id: &str, disabled: bool) -> StoreResult<()>;

    /// Remembers a local extension folder.
    fn add_local(&self, id: &str, folder: &Path) -> StoreResult<()>;

    /// Forgets everything about `id`.
    fn remove(&self, id: &str) -> StoreResult<()>;

    /// Folder an extension was installed or loaded from.
    fn folder(&self, id: &str) -> Option<PathBuf>;

    /// Every known extension with its folder, global installs first.
    fn installed(&self) -> Vec<(String, PathBuf)>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreState {
    dependencies: BTreeMap<String, String>,
    local: BTreeMap<String, PathBuf>,
    disabled: BTreeSet<String>,
    locked: BTreeSet<String>,
}

/// [`ExtensionStore`] backed by a JSON file.
#[derive(Debug)]
pub struct FileExtensionStore {
    path: PathBuf,
    modules: PathBuf,
    state: RwLock<StoreState>,
}

impl FileExtensionStore {
    /// State file name under the extension root.
    pub const FILE_NAME: &'static str = "extensions.json";

    /// Opens the store under `root`, starting empty if no state file exists.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref();
        let path = root.join(Self::FILE_NAME);

        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Self {
            path,
            modules: root.join("modules"),
            state: RwLock::new(state),
        })
    }

    /// Folder holding global installs.
    pub fn modules_folder(&self) -> &Path {
        &self.modules
    }

    /// Records a global install.
    pub fn add_global(&self, id: &str, version: &str) -> StoreResult<()> {
        self.update(|state| {
            state.dependencies.insert(id.to_string(), version.to_string());
        })
    }

    /// Locks or unlocks an extension against updates.
    pub fn set_locked(&self, id: &str, locked: bool) -> StoreResult<()> {
        self.update(|state| {
            if locked {
                state.locked.insert(id.to_string());
            } else {
                state.locked.remove(id);
            }
        })
    }

    fn update(&self, change: impl FnOnce(&mut StoreState)) -> StoreResult<()> {
        let mut state = self.state.write();
        change(&mut state);
        self.save(&state)
    }

    fn save(&self, state: &StoreState) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(state).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl ExtensionStore for FileExtensionStore {
    fn global_ids(&self) -> Vec<String> {
        self.state.read().dependencies.keys().cloned().collect()
    }

    fn has_extension(&self, id: &str) -> bool {
        self.state.read().dependencies.contains_key(id)
    }

    fn is_disabled(&self, id: &str) -> bool {
        self.state.read().disabled.contains(id)
    }

    fn is_locked(&self, id: &str) -> bool {
        self.state.read().locked.contains(id)
    }

    fn set_disabled(&self, id: &str, disabled: bool) -> StoreResult<()> {
        self.update(|state| {
            if disabled {
                state.disabled.insert(id.to_string());
            } else {
                state.disabled.remove(id);
            }
        })
    }

    fn add_local(&self, id: &str, folder: &Path) -> StoreResult<()> {
        self.update(|state| {
            state.local.insert(id.to_string(), folder.to_path_buf());
        })
    }

    fn remove(&self, id: &str) -> StoreResult<()> {
        self.update(|state| {
            state.dependencies.remove(id);
            state.local.remove(id);
            state.disabled.remove(id);
            state.locked.remove(id);
        })
    }

    fn folder(&self, id: &str) -> Option<PathBuf> {
        let state = self.state.read();
        if state.dependencies.contains_key(id) {
            return Some(self.modules.join(id));
        }
        state.local.get(id).cloned()
    }

    fn installed(&self) -> Vec<(String, PathBuf)> {
        let state = self.state.read();
        let globals = state
            .dependencies
            .keys()
            .map(|id| (id.clone(), self.modules.join(id)));
        let locals = state
            .local
            .iter()
            .filter(|(id, _)| !state.dependencies.contains_key(*id))
            .map(|(id, folder)| (id.clone(), folder.clone()));
        globals.chain(locals).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_store() {
        let dir = tempdir().unwrap();
        let store = FileExtensionStore::open(dir.path()).unwrap();
        assert!(store.global_ids().is_empty());
        assert!(!store.is_disabled("x"));
        assert_eq!(store.folder("x"), None);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        {
            let store = FileExtensionStore::open(dir.path()).unwrap();
            store.add_global("python", "1.2.0").unwrap();
            store.add_local("todo", Path::new("/src/todo")).unwrap();
            store.set_disabled("rust", true).unwrap();
            store.set_locked("python", true).unwrap();
        }

        let store = FileExtensionStore::open(dir.path()).unwrap();
        assert_eq!(store.global_ids(), vec!["python"]);
        assert!(store.has_extension("python"));
        assert!(!store.has_extension("todo"));
        assert!(store.is_disabled("rust"));
        assert!(store.is_locked("python"));
        assert_eq!(store.folder("python"), Some(dir.path().join("modules").join("python")));
        assert_eq!(store.folder("todo"), Some(PathBuf::from("/src/todo")));
        assert_eq!(
            store.installed(),
            vec![
                ("python".to_string(), dir.path().join("modules").join("python")),
                ("todo".to_string(), PathBuf::from("/src/todo")),
            ]
        );
    }

    #[test]
    fn test_remove_and_enable() {
        let dir = tempdir().unwrap();
        let store = FileExtensionStore::open(dir.path()).unwrap();
        store.add_global("python", "1.2.0").unwrap();
        store.set_disabled("python", true).unwrap();
        store.set_disabled("python", false).unwrap();
        assert!(!store.is_disabled("python"));

        store.set_disabled("python", true).unwrap();
        store.remove("python").unwrap();
        assert!(!store.has_extension("python"));
        assert!(!store.is_disabled("python"));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(FileExtensionStore::FILE_NAME), "{not json").unwrap();
        assert!(matches!(
            FileExtensionStore::open(dir.path()),
            Err(StoreError::Json { .. })
        ));
    }
}
