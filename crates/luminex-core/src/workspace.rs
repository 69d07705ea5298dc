//! Workspace state the host reads from and contributes to.
//!
//! ## Learning: Trait Seams
//!
//! The extension manager talks to the workspace through [`WorkspaceHost`],
//! so an embedding editor can plug in its own document model. [`Workspace`]
//! is the in-process implementation used by the host binary and tests.
//!
//! ## Learning: Async File Operations
//!
//! Indexing a folder walks the disk, which is slow. [`index_folder`] runs the
//! walk on tokio's blocking pool so event handling stays responsive.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use url::Url;

use crate::document::{DocumentFilter, TextDocument, score_selector};
use crate::event::{WorkspaceEvent, WorkspaceEventBus};
use crate::{CoreError, CoreResult};

/// Directories never descended into while indexing.
const IGNORED_DIRS: &[&str] = &["node_modules", "target", "__pycache__"];

/// Maximum directory depth walked while indexing a folder.
const MAX_INDEX_DEPTH: usize = 16;

/// A folder opened as part of the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceFolder {
    /// Folder URI
    pub uri: String,
    /// Display name
    pub name: String,
}

impl WorkspaceFolder {
    /// Creates a folder entry for a directory on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("Workspace")
            .to_string();
        let uri = Url::from_directory_path(path)
            .map(String::from)
            .unwrap_or_else(|_| format!("file://{}", path.display()));
        Self { uri, name }
    }

    /// Returns the folder's path on disk.
    pub fn fs_path(&self) -> Option<PathBuf> {
        Url::parse(&self.uri).ok()?.to_file_path().ok()
    }
}

/// What the dispatcher and extension manager need from the workspace.
pub trait WorkspaceHost: Send + Sync {
    /// Documents currently open in the editor.
    fn documents(&self) -> Vec<TextDocument>;

    /// Folders currently open in the workspace.
    fn folders(&self) -> Vec<WorkspaceFolder>;

    /// Root of the first workspace folder.
    fn root_path(&self) -> Option<PathBuf> {
        self.folders().first().and_then(WorkspaceFolder::fs_path)
    }

    /// Language ids of open documents.
    fn language_ids(&self) -> HashSet<String> {
        self.documents().into_iter().map(|d| d.language_id).collect()
    }

    /// Filetypes of open documents.
    fn filetypes(&self) -> HashSet<String> {
        self.documents().into_iter().map(|d| d.filetype).collect()
    }

    /// Scores a document against a selector, `0` meaning no match.
    fn match_document(&self, selector: &[DocumentFilter], document: &TextDocument) -> u32 {
        score_selector(selector, document)
    }

    /// Injects configuration defaults contributed by an extension.
    fn extend_config_defaults(&self, extension_id: &str, defaults: Map<String, Value>);

    /// Registers root patterns used to detect workspace folders for a filetype.
    fn add_root_patterns(&self, filetype: &str, patterns: &[String]);

    /// Registers a human readable title for a command.
    fn set_command_title(&self, command: &str, title: &str);

    /// Subscribes to workspace changes.
    fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent>;
}

/// In-process workspace.
pub struct Workspace {
    folders: RwLock<Vec<WorkspaceFolder>>,
    documents: RwLock<Vec<TextDocument>>,
    config_defaults: RwLock<HashMap<String, Map<String, Value>>>,
    root_patterns: RwLock<HashMap<String, Vec<String>>>,
    command_titles: RwLock<HashMap<String, String>>,
    events: WorkspaceEventBus,
}

impl Workspace {
    /// Creates an empty workspace.
    pub fn new() -> Self {
        Self {
            folders: RwLock::new(Vec::new()),
            documents: RwLock::new(Vec::new()),
            config_defaults: RwLock::new(HashMap::new()),
            root_patterns: RwLock::new(HashMap::new()),
            command_titles: RwLock::new(HashMap::new()),
            events: WorkspaceEventBus::new(),
        }
    }

    /// Opens a workspace rooted at a directory.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let root = path.as_ref().canonicalize()?;

        if !root.is_dir() {
            return Err(CoreError::FileNotFound(root.display().to_string()));
        }

        let workspace = Self::new();
        workspace.folders.write().push(WorkspaceFolder::from_path(&root));
        Ok(workspace)
    }

    /// Records an opened document and notifies subscribers.
    pub fn open_document(&self, document: TextDocument) {
        {
            let mut documents = self.documents.write();
            documents.retain(|d| d.bufnr != document.bufnr);
            documents.push(document.clone());
        }
        self.events.emit(WorkspaceEvent::DocumentOpened(document));
    }

    /// Forgets a document.
    pub fn close_document(&self, bufnr: u32) {
        self.documents.write().retain(|d| d.bufnr != bufnr);
    }

    /// Adds folders, notifying subscribers about the ones not already open.
    pub fn add_folders(&self, folders: Vec<WorkspaceFolder>) {
        let added: Vec<WorkspaceFolder> = {
            let mut current = self.folders.write();
            let added: Vec<_> = folders
                .into_iter()
                .filter(|f| !current.contains(f))
                .collect();
            current.extend(added.iter().cloned());
            added
        };
        if !added.is_empty() {
            self.events.emit(WorkspaceEvent::FoldersAdded(added));
        }
    }

    /// Reports directories appended to the editor runtime path.
    pub fn add_runtime_paths(&self, paths: Vec<PathBuf>) {
        if !paths.is_empty() {
            self.events.emit(WorkspaceEvent::RuntimePathAdded(paths));
        }
    }

    /// Looks up a contributed configuration default.
    pub fn config_default(&self, key: &str) -> Option<Value> {
        self.config_defaults
            .read()
            .values()
            .find_map(|props| props.get(key).cloned())
    }

    /// Returns the configuration defaults contributed by one extension.
    pub fn config_defaults_of(&self, extension_id: &str) -> Option<Map<String, Value>> {
        self.config_defaults.read().get(extension_id).cloned()
    }

    /// Returns the root patterns registered for a filetype.
    pub fn root_patterns(&self, filetype: &str) -> Vec<String> {
        self.root_patterns
            .read()
            .get(filetype)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns a command's registered title.
    pub fn command_title(&self, command: &str) -> Option<String> {
        self.command_titles.read().get(command).cloned()
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceHost for Workspace {
    fn documents(&self) -> Vec<TextDocument> {
        self.documents.read().clone()
    }

    fn folders(&self) -> Vec<WorkspaceFolder> {
        self.folders.read().clone()
    }

    fn extend_config_defaults(&self, extension_id: &str, defaults: Map<String, Value>) {
        self.config_defaults
            .write()
            .entry(extension_id.to_string())
            .or_default()
            .extend(defaults);
    }

    fn add_root_patterns(&self, filetype: &str, patterns: &[String]) {
        let mut root_patterns = self.root_patterns.write();
        let entry = root_patterns.entry(filetype.to_string()).or_default();
        for pattern in patterns {
            if !entry.contains(pattern) {
                entry.push(pattern.clone());
            }
        }
    }

    fn set_command_title(&self, command: &str, title: &str) {
        self.command_titles
            .write()
            .insert(command.to_string(), title.to_string());
    }

    fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.events.subscribe()
    }
}

/// Lists the files under `folder` as `/`-separated paths relative to it.
pub async fn index_folder(folder: &Path) -> CoreResult<Vec<String>> {
    let folder = folder.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        collect_files(&folder, &folder, MAX_INDEX_DEPTH, &mut files)?;
        Ok(files)
    })
    .await
    .map_err(|e| CoreError::Io(std::io::Error::other(e)))?
}

fn collect_files(
    root: &Path,
    dir: &Path,
    depth: usize,
    files: &mut Vec<String>,
) -> CoreResult<()> {
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        // Skip hidden files and common ignore patterns
        if name.starts_with('.') || IGNORED_DIRS.contains(&name.as_str()) {
            continue;
        }

        if path.is_dir() {
            if depth > 0 {
                collect_files(root, &path, depth - 1, files)?;
            }
        } else if let Ok(relative) = path.strip_prefix(root) {
            let relative: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect();
            files.push(relative.join("/"));
        }
    }
    Ok(())
}

/// Returns true if any file matches any of the glob patterns.
pub fn match_patterns(files: &[String], patterns: &[String]) -> bool {
    let globs: Vec<glob::Pattern> = patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(glob) => Some(glob),
            Err(e) => {
                tracing::warn!("Ignoring invalid glob pattern {}: {}", p, e);
                None
            }
        })
        .collect();
    files
        .iter()
        .any(|file| globs.iter().any(|glob| glob.matches(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::WorkspaceEventHandler;
    use tempfile::tempdir;

    #[test]
    fn test_workspace_open() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let folders = ws.folders();
        assert_eq!(folders.len(), 1);
        assert_eq!(
            folders[0].fs_path().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert_eq!(ws.root_path(), Some(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn test_open_file_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(Workspace::open(&file), Err(CoreError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_document_open_notifies() {
        let ws = Workspace::new();
        let mut handler = WorkspaceEventHandler::new(ws.subscribe());

        ws.open_document(TextDocument::new(1, "file:///a.py", "python", "python"));

        assert!(ws.language_ids().contains("python"));
        let event = handler.next().await.unwrap();
        assert!(matches!(event, WorkspaceEvent::DocumentOpened(doc) if doc.bufnr == 1));
    }

    #[tokio::test]
    async fn test_add_folders_reports_only_new() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let ws = Workspace::open(a.path()).unwrap();
        let mut handler = WorkspaceEventHandler::new(ws.subscribe());

        ws.add_folders(vec![
            WorkspaceFolder::from_path(a.path().canonicalize().unwrap()),
            WorkspaceFolder::from_path(b.path()),
        ]);

        match handler.next().await.unwrap() {
            WorkspaceEvent::FoldersAdded(added) => {
                assert_eq!(added, vec![WorkspaceFolder::from_path(b.path())]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(ws.folders().len(), 2);
    }

    #[test]
    fn test_contributions() {
        let ws = Workspace::new();
        let mut props = Map::new();
        props.insert("python.enable".to_string(), Value::Bool(true));
        ws.extend_config_defaults("py", props);
        ws.add_root_patterns("python", &["setup.py".to_string(), "setup.py".to_string()]);
        ws.set_command_title("py.run", "Run Python");

        assert_eq!(ws.config_default("python.enable"), Some(Value::Bool(true)));
        assert_eq!(ws.root_patterns("python"), vec!["setup.py".to_string()]);
        assert_eq!(ws.command_title("py.run").as_deref(), Some("Run Python"));
    }

    #[tokio::test]
    async fn test_index_and_match() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "").unwrap();

        let mut files = index_folder(dir.path()).await.unwrap();
        files.sort();
        assert_eq!(files, vec!["Cargo.toml".to_string(), "src/main.rs".to_string()]);

        assert!(match_patterns(&files, &["*.toml".to_string()]));
        assert!(match_patterns(&files, &["**/*.rs".to_string()]));
        assert!(!match_patterns(&files, &["**/*.js".to_string()]));
    }
}
