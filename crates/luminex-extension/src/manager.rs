//! The extension manager.
//!
//! Owns the id -> (descriptor, runtime) registry and reacts to the editor:
//! opened documents, invoked commands, added workspace folders and runtime
//! path changes can all activate or load extensions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use luminex_core::{
    ExtensionsConfig, FileWatcher, Notifier, WatchCallback, WatchHandle, WorkspaceEvent,
    WorkspaceEventHandler, WorkspaceFolder, WorkspaceHost, index_folder, match_patterns,
};
use luminex_events::{Dispatcher, Disposables, Event, EventName};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::activation::{ActivationEvents, ActivationKind};
use crate::manifest::{ExtensionDescriptor, ExtensionManifest, ExtensionOrigin, SINGLE_FILE_PREFIX};
use crate::memos::Memos;
use crate::runtime::{
    ActiveExtension, Extension, ExtensionContext, ExtensionEvent, ExtensionExports,
    ExtensionLoader, FactoryLoader, Runtime,
};
use crate::store::{ExtensionStore, StoreResult};
use crate::{ExtensionError, ExtensionResult};

/// Everything outside the manager it talks to.
pub struct Collaborators {
    pub workspace: Arc<dyn WorkspaceHost>,
    pub store: Arc<dyn ExtensionStore>,
    /// Loader for extensions found on disk
    pub loader: Arc<dyn ExtensionLoader>,
    pub notifier: Arc<dyn Notifier>,
    pub watcher: Arc<dyn FileWatcher>,
}

/// Externally visible state of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionState {
    Disabled,
    Loaded,
    Activated,
    Unknown,
}

impl std::fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Loaded => write!(f, "loaded"),
            Self::Activated => write!(f, "activated"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Summary of a registered extension.
#[derive(Debug, Clone)]
pub struct ExtensionInfo {
    pub id: String,
    pub version: String,
    pub origin: ExtensionOrigin,
    pub directory: PathBuf,
    pub file: Option<PathBuf>,
    pub state: ExtensionState,
    pub locked: bool,
}

/// Result of an uninstall batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub removed: Vec<String>,
    /// Ids that are not global installs
    pub not_removable: Vec<String>,
}

#[derive(Clone)]
struct Entry {
    descriptor: Arc<ExtensionDescriptor>,
    runtime: Arc<Runtime>,
    loader: Arc<dyn ExtensionLoader>,
}

/// Registers, activates and unloads extensions.
///
/// Always used behind an `Arc`; event listeners hold weak references so
/// dropping the last `Arc` stops them.
pub struct ExtensionManager {
    config: ExtensionsConfig,
    dispatcher: Dispatcher,
    workspace: Arc<dyn WorkspaceHost>,
    store: Arc<dyn ExtensionStore>,
    loader: Arc<dyn ExtensionLoader>,
    notifier: Arc<dyn Notifier>,
    watcher: Arc<dyn FileWatcher>,
    memos: Arc<Memos>,
    entries: RwLock<HashMap<String, Entry>>,
    running: AtomicBool,
    /// Indexed files per workspace folder
    workspace_files: Mutex<HashMap<PathBuf, Arc<Vec<String>>>>,
    events: broadcast::Sender<ExtensionEvent>,
    subscriptions: Mutex<Disposables>,
    watches: Mutex<Vec<WatchHandle>>,
    /// Latest change generation per watched extension
    reload_generations: Mutex<HashMap<String, u64>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    this: Weak<Self>,
}

impl ExtensionManager {
    pub fn new(
        config: ExtensionsConfig,
        dispatcher: Dispatcher,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let memos = Memos::open(config.root.join("memos.json"));
        let (events, _) = broadcast::channel(64);
        let Collaborators {
            workspace,
            store,
            loader,
            notifier,
            watcher,
        } = collaborators;

        Arc::new_cyclic(|this| Self {
            config,
            dispatcher,
            workspace,
            store,
            loader,
            notifier,
            watcher,
            memos,
            entries: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            workspace_files: Mutex::new(HashMap::new()),
            events,
            subscriptions: Mutex::new(Disposables::new()),
            watches: Mutex::new(Vec::new()),
            reload_generations: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Subscribes to load, activation and unload notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ExtensionEvent> {
        self.events.subscribe()
    }

    /// Whether [`activate_extensions`](Self::activate_extensions) has run.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn entry(&self, id: &str) -> Option<Entry> {
        self.entries.read().get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn descriptor(&self, id: &str) -> Option<Arc<ExtensionDescriptor>> {
        self.entries.read().get(id).map(|e| e.descriptor.clone())
    }

    /// Registered ids, sorted.
    pub fn loaded_extensions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn state(&self, id: &str) -> ExtensionState {
        if self.store.is_disabled(id) {
            return ExtensionState::Disabled;
        }
        match self.entry(id) {
            None => ExtensionState::Unknown,
            Some(entry) if entry.runtime.is_active() => ExtensionState::Activated,
            Some(_) => ExtensionState::Loaded,
        }
    }

    pub fn extensions_info(&self) -> Vec<ExtensionInfo> {
        let mut infos: Vec<ExtensionInfo> = self
            .entries
            .read()
            .values()
            .map(|entry| {
                let d = &entry.descriptor;
                ExtensionInfo {
                    id: d.id.clone(),
                    version: d.manifest.version.clone(),
                    origin: d.origin,
                    directory: d.root.clone(),
                    file: d.file.clone(),
                    state: if entry.runtime.is_active() {
                        ExtensionState::Activated
                    } else {
                        ExtensionState::Loaded
                    },
                    locked: self.store.is_locked(&d.id),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Exports of a registered extension.
    pub fn exports(&self, id: &str) -> ExtensionResult<ExtensionExports> {
        self.entry(id)
            .map(|entry| entry.runtime.exports())
            .ok_or_else(|| ExtensionError::NotRegistered(id.to_string()))
    }

    /// Registers an extension, replacing any extension with the same id.
    ///
    /// The previous extension is deactivated and unloaded first. Once the
    /// manager is running the new one is auto-activated before returning.
    pub async fn register(
        &self,
        descriptor: ExtensionDescriptor,
        loader: Arc<dyn ExtensionLoader>,
    ) -> ExtensionResult<()> {
        let id = descriptor.id.clone();
        if self.store.is_disabled(&id) {
            return Err(ExtensionError::Disabled(id));
        }
        self.unload(&id).await;

        self.apply_contributions(&descriptor);
        let entry = Entry {
            descriptor: Arc::new(descriptor),
            runtime: Runtime::new(&id, self.events.clone(), self.notifier.clone()),
            loader,
        };
        let replaced = self.entries.write().insert(id.clone(), entry);
        if let Some(replaced) = replaced {
            // Lost a race with a concurrent registration of the same id
            replaced.runtime.retire().await;
        }

        info!(extension = %id, "Extension loaded");
        let _ = self.events.send(ExtensionEvent::Loaded(id.clone()));

        if self.is_running() {
            self.auto_activate(&id).await;
        }
        Ok(())
    }

    /// Registers an extension compiled into the host.
    pub async fn register_builtin<F>(
        &self,
        manifest: ExtensionManifest,
        factory: F,
    ) -> ExtensionResult<()>
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        let descriptor = ExtensionDescriptor::new(manifest, &self.config.root, ExtensionOrigin::Builtin);
        self.register(descriptor, Arc::new(FactoryLoader(Arc::new(factory))))
            .await
    }

    /// Loads the extension in `folder`.
    ///
    /// Returns false if the extension is disabled. Folders that are not
    /// global installs are remembered as local extensions.
    pub async fn load_extension(&self, folder: &Path) -> ExtensionResult<bool> {
        let manifest = ExtensionManifest::load(folder, &self.config.engine_version).await?;
        let id = manifest.name.clone();
        if self.store.is_disabled(&id) {
            debug!(extension = %id, "Skipping disabled extension");
            return Ok(false);
        }

        let origin = if self.store.has_extension(&id) {
            ExtensionOrigin::Global
        } else {
            let (local, folder) = (id.clone(), folder.to_path_buf());
            self.persist(move |store| store.add_local(&local, &folder))
                .await?;
            ExtensionOrigin::Local
        };
        self.register(
            ExtensionDescriptor::new(manifest, folder, origin),
            self.loader.clone(),
        )
        .await?;
        Ok(true)
    }

    /// Loads a single-file extension manifest. A missing file is ignored.
    pub async fn load_extension_file(&self, path: &Path) -> ExtensionResult<bool> {
        let is_file = tokio::fs::metadata(path)
            .await
            .is_ok_and(|m| m.is_file());
        if !is_file {
            return Ok(false);
        }
        let manifest = ExtensionManifest::load_single_file(path).await?;
        if self.store.is_disabled(&manifest.name) {
            return Ok(false);
        }
        self.register(
            ExtensionDescriptor::single_file(manifest, path),
            self.loader.clone(),
        )
        .await?;
        Ok(true)
    }

    /// Loads every single-file manifest under the single-file root.
    pub async fn load_file_extensions(&self) -> ExtensionResult<()> {
        let folder = &self.config.single_file_root;
        let mut dir = match tokio::fs::read_dir(folder).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                files.push(path);
            }
        }
        files.sort();

        let results = join_all(files.iter().map(|file| self.load_extension_file(file))).await;
        for (file, result) in files.iter().zip(results) {
            if let Err(e) = result {
                error!(file = %file.display(), error = %e, "Failed to load single-file extension");
            }
        }
        Ok(())
    }

    /// Loads every extension the store knows about.
    pub async fn load_installed_extensions(&self) {
        let installed = self.store.installed();
        let results = join_all(
            installed
                .iter()
                .map(|(_, folder)| self.load_extension(folder)),
        )
        .await;
        for ((id, folder), result) in installed.iter().zip(results) {
            if let Err(e) = result {
                error!(extension = %id, folder = %folder.display(), error = %e, "Failed to load extension");
            }
        }
    }

    /// Enters the running phase.
    ///
    /// Starts listening for documents, commands, folders and runtime paths,
    /// then auto-activates every registered extension. Calling it again
    /// does nothing.
    pub async fn activate_extensions(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.attach_events();

        let ids = self.loaded_extensions();
        join_all(ids.iter().map(|id| self.auto_activate(id))).await;
    }

    /// Activates an extension, or joins an activation already in flight.
    pub async fn activate(&self, id: &str) -> ExtensionResult<()> {
        let entry = self
            .entry(id)
            .ok_or_else(|| ExtensionError::NotRegistered(id.to_string()))?;
        let activation = entry.runtime.activate(|| self.activation_routine(&entry));
        activation
            .await
            .map_err(|message| ExtensionError::ActivationFailed {
                id: id.to_string(),
                message,
            })
    }

    /// Deactivates an extension. Returns false if it was not active.
    pub async fn deactivate(&self, id: &str) -> bool {
        match self.entry(id) {
            Some(entry) => entry.runtime.deactivate().await,
            None => false,
        }
    }

    /// Unregisters an extension, then tears it down.
    ///
    /// The entry leaves the registry before teardown starts, so nothing can
    /// activate it again while it shuts down.
    pub async fn unload(&self, id: &str) -> bool {
        let removed = self.entries.write().remove(id);
        let Some(entry) = removed else {
            return false;
        };
        entry.runtime.retire().await;

        info!(extension = %id, "Extension unloaded");
        let _ = self.events.send(ExtensionEvent::Unloaded(id.to_string()));
        true
    }

    /// Reloads an extension from where it was loaded.
    pub async fn reload(&self, id: &str) -> ExtensionResult<()> {
        let descriptor = self
            .descriptor(id)
            .ok_or_else(|| ExtensionError::NotRegistered(id.to_string()))?;
        match (descriptor.origin, &descriptor.file) {
            (ExtensionOrigin::Builtin, _) => Err(ExtensionError::NotReloadable(id.to_string())),
            (_, Some(file)) => self.load_extension_file(file).await.map(|_| ()),
            (_, None) => self.load_extension(&descriptor.root).await.map(|_| ()),
        }
    }

    /// Activates an extension if needed and calls one of its exports.
    pub async fn call(&self, id: &str, method: &str, args: Vec<Value>) -> ExtensionResult<Value> {
        self.activate(id).await?;
        let exports = self
            .exports(id)?
            .active()
            .ok_or_else(|| ExtensionError::NotActivated(id.to_string()))?;
        let function = exports
            .get(method)
            .ok_or_else(|| ExtensionError::MethodNotFound {
                id: id.to_string(),
                method: method.to_string(),
            })?;
        function(args)
            .await
            .map_err(|e| ExtensionError::CallFailed {
                id: id.to_string(),
                method: method.to_string(),
                message: format!("{:#}", e),
            })
    }

    /// Uninstalls global extensions.
    ///
    /// Ids that are not global installs are reported back and left alone.
    pub async fn uninstall(&self, ids: &[String]) -> UninstallReport {
        let (globals, not_removable): (Vec<String>, Vec<String>) = ids
            .iter()
            .cloned()
            .partition(|id| self.store.has_extension(id));
        let mut report = UninstallReport {
            removed: Vec::new(),
            not_removable,
        };

        for id in globals {
            self.unload(&id).await;
            let removed = id.clone();
            if let Err(e) = self.persist(move |store| store.remove(&removed)).await {
                error!(extension = %id, error = %e, "Failed to uninstall extension");
                self.notifier
                    .show_error(&format!("Failed to uninstall {}: {}", id, e));
                continue;
            }
            let folder = self.config.modules_folder().join(&id);
            if let Err(e) = remove_dir(&folder).await {
                warn!(folder = %folder.display(), error = %e, "Failed to remove extension folder");
            }
            report.removed.push(id);
        }

        if !report.not_removable.is_empty() {
            self.notifier.show_warning(&format!(
                "Global extensions {} not found",
                report.not_removable.join(", ")
            ));
        }
        if !report.removed.is_empty() {
            self.notifier
                .show_info(&format!("Removed extensions: {}", report.removed.join(" ")));
        }
        report
    }

    /// Disables an enabled extension or re-enables a disabled one.
    pub async fn toggle(&self, id: &str) -> ExtensionResult<()> {
        let result = self.toggle_inner(id).await;
        if let Err(e) = &result {
            self.notifier
                .show_error(&format!("Failed to toggle extension {}: {}", id, e));
        }
        result
    }

    async fn toggle_inner(&self, id: &str) -> ExtensionResult<()> {
        if self.state(id) != ExtensionState::Disabled {
            let disabled = id.to_string();
            self.persist(move |store| store.set_disabled(&disabled, true))
                .await?;
            self.unload(id).await;
            info!(extension = %id, "Extension disabled");
            return Ok(());
        }

        let enabled = id.to_string();
        self.persist(move |store| store.set_disabled(&enabled, false))
            .await?;
        info!(extension = %id, "Extension enabled");
        if let Some(name) = id.strip_prefix(SINGLE_FILE_PREFIX) {
            let file = self.config.single_file_root.join(format!("{}.toml", name));
            self.load_extension_file(&file).await?;
        } else if let Some(folder) = self.store.folder(id) {
            self.load_extension(&folder).await?;
        } else {
            self.notifier
                .show_warning(&format!("Extension {} not found", id));
        }
        Ok(())
    }

    /// Reloads an extension whenever its sources change.
    pub async fn watch(&self, id: &str) -> ExtensionResult<()> {
        let descriptor = self
            .descriptor(id)
            .ok_or_else(|| ExtensionError::NotRegistered(id.to_string()))?;
        let (path, pattern) = match (descriptor.origin, &descriptor.file) {
            (ExtensionOrigin::Builtin, _) => {
                return Err(ExtensionError::NotReloadable(id.to_string()));
            }
            (_, Some(file)) => (file.clone(), None),
            (_, None) => (descriptor.root.clone(), Some(self.config.watch_pattern.as_str())),
        };

        let manager = self.this.clone();
        let handle = tokio::runtime::Handle::current();
        let watched = id.to_string();
        let callback: WatchCallback = Arc::new(move |changed: PathBuf| {
            let manager = manager.clone();
            let id = watched.clone();
            handle.spawn(async move {
                if let Some(manager) = manager.upgrade() {
                    manager.reload_when_quiet(id, changed).await;
                }
            });
        });

        let watch = self.watcher.watch(&path, pattern, callback)?;
        self.watches.lock().push(watch);
        self.notifier
            .show_info(&format!("Watching {}", path.display()));
        Ok(())
    }

    /// Reloads `id` once its sources stop changing.
    ///
    /// Every change bumps the extension's generation; only the change that
    /// is still the latest after the debounce period reloads.
    async fn reload_when_quiet(&self, id: String, changed: PathBuf) {
        let generation = {
            let mut generations = self.reload_generations.lock();
            let generation = generations.entry(id.clone()).or_insert(0);
            *generation += 1;
            *generation
        };
        debug!(extension = %id, path = %changed.display(), "Extension source changed");

        tokio::time::sleep(self.config.watch_debounce()).await;
        if self.reload_generations.lock().get(&id) != Some(&generation) {
            return;
        }

        match self.reload(&id).await {
            Ok(()) => self.notifier.show_info(&format!("Reloaded {}", id)),
            Err(e) => {
                error!(extension = %id, error = %e, "Failed to reload extension");
                self.notifier
                    .show_error(&format!("Failed to reload {}: {}", id, e));
            }
        }
    }

    /// Deletes the global modules folder.
    ///
    /// Returns the global ids that are not disabled, so they can be
    /// installed again.
    pub async fn clean_extensions(&self) -> ExtensionResult<Vec<String>> {
        let globals = self.store.global_ids();
        for id in &globals {
            self.unload(id).await;
        }
        remove_dir(&self.config.modules_folder()).await?;
        Ok(globals
            .into_iter()
            .filter(|id| !self.store.is_disabled(id))
            .collect())
    }

    /// Stops listening and deactivates every extension.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.subscriptions.lock().dispose_all();
        self.watches.lock().clear();
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }

        let ids = self.loaded_extensions();
        join_all(ids.iter().map(|id| self.deactivate(id))).await;
    }

    fn apply_contributions(&self, descriptor: &ExtensionDescriptor) {
        let contributes = &descriptor.manifest.contributes;

        let defaults: Map<String, Value> = contributes
            .configuration
            .properties
            .iter()
            .filter_map(|(key, property)| {
                property
                    .default
                    .clone()
                    .filter(|value| !value.is_null())
                    .map(|value| (key.clone(), value))
            })
            .collect();
        if !defaults.is_empty() {
            self.workspace
                .extend_config_defaults(&descriptor.id, defaults);
        }

        for root in &contributes.root_patterns {
            if !root.patterns.is_empty() {
                self.workspace
                    .add_root_patterns(&root.filetype, &root.patterns);
            }
        }
        for command in &contributes.commands {
            self.workspace
                .set_command_title(&command.command, &command.title);
        }
    }

    fn activation_routine(&self, entry: &Entry) -> BoxFuture<'static, anyhow::Result<ActiveExtension>> {
        let descriptor = entry.descriptor.clone();
        let loader = entry.loader.clone();
        let workspace_key = self
            .workspace
            .root_path()
            .map(|root| root.display().to_string())
            .unwrap_or_default();
        let mut ctx = ExtensionContext::new(
            &descriptor,
            &self.config.root,
            self.memos.memento(format!("{}|global", descriptor.id)),
            self.memos
                .memento(format!("{}|{}", descriptor.id, workspace_key)),
            self.dispatcher.clone(),
            self.workspace.clone(),
        );

        async move {
            let mut instance = loader.load(&descriptor)?;
            match instance.activate(&mut ctx).await {
                Ok(exports) => Ok(ActiveExtension::new(instance, exports, ctx.subscriptions)),
                Err(e) => {
                    ctx.subscriptions.dispose_all();
                    Err(e)
                }
            }
        }
        .boxed()
    }

    async fn auto_activate(&self, id: &str) {
        let Some(entry) = self.entry(id) else {
            return;
        };
        if !self.should_auto_activate(&entry.descriptor.activation).await {
            return;
        }
        if let Err(e) = self.activate(id).await {
            debug!(extension = %id, error = %e, "Auto activation failed");
        }
    }

    async fn should_auto_activate(&self, activation: &ActivationEvents) -> bool {
        if activation.is_eager() {
            return true;
        }

        if activation.has_kind(ActivationKind::Language) {
            let languages = self.workspace.language_ids();
            let filetypes = self.workspace.filetypes();
            if activation
                .languages()
                .any(|lang| languages.contains(lang) || filetypes.contains(lang))
            {
                return true;
            }
        }

        if activation.has_kind(ActivationKind::FileSystem)
            && self
                .workspace
                .documents()
                .iter()
                .any(|doc| activation.matches_scheme(&doc.scheme()))
        {
            return true;
        }

        let patterns = activation.workspace_patterns();
        !patterns.is_empty()
            && self
                .has_matched_file(&self.workspace.folders(), &patterns)
                .await
    }

    async fn has_matched_file(&self, folders: &[WorkspaceFolder], patterns: &[String]) -> bool {
        for folder in folders.iter().filter_map(WorkspaceFolder::fs_path) {
            let files = self.folder_files(&folder).await;
            if match_patterns(&files, patterns) {
                return true;
            }
        }
        false
    }

    async fn folder_files(&self, folder: &Path) -> Arc<Vec<String>> {
        let cached = self.workspace_files.lock().get(folder).cloned();
        if let Some(files) = cached {
            return files;
        }

        let files = match index_folder(folder).await {
            Ok(files) => Arc::new(files),
            Err(e) => {
                warn!(folder = %folder.display(), error = %e, "Failed to index workspace folder");
                Arc::new(Vec::new())
            }
        };
        self.workspace_files
            .lock()
            .insert(folder.to_path_buf(), files.clone());
        files
    }

    /// Ids of inactive extensions declaring `kind` for which `check` holds.
    fn inactive_matching(
        &self,
        kind: ActivationKind,
        check: impl Fn(&ActivationEvents) -> bool,
    ) -> Vec<String> {
        self.entries
            .read()
            .values()
            .filter(|entry| {
                let activation = &entry.descriptor.activation;
                activation.has_kind(kind) && !entry.runtime.is_active() && check(activation)
            })
            .map(|entry| entry.descriptor.id.clone())
            .collect()
    }

    fn attach_events(&self) {
        let manager = self.this.clone();
        let on_command = self.dispatcher.on(EventName::Command, move |event| {
            let manager = manager.upgrade();
            async move {
                if let (Some(manager), Event::Command(command)) = (manager, &*event) {
                    manager.activate_for_command(command).await;
                }
                Ok(())
            }
        });
        self.subscriptions.lock().push(on_command);

        let mut events = WorkspaceEventHandler::new(self.workspace.subscribe());
        let manager = self.this.clone();
        let listener = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.on_workspace_event(event);
            }
        });
        *self.listener.lock() = Some(listener);
    }

    fn on_workspace_event(self: Arc<Self>, event: WorkspaceEvent) {
        match event {
            WorkspaceEvent::DocumentOpened(document) => {
                let scheme = document.scheme();
                for id in self.inactive_matching(ActivationKind::Language, |a| a.matches_document(&document)) {
                    self.spawn_activation(id);
                }
                for id in self.inactive_matching(ActivationKind::FileSystem, |a| a.matches_scheme(&scheme)) {
                    self.spawn_activation(id);
                }
            }
            WorkspaceEvent::FoldersAdded(folders) => {
                for id in self.inactive_matching(ActivationKind::WorkspaceContains, |_| true) {
                    let manager = Arc::clone(&self);
                    let folders = folders.clone();
                    tokio::spawn(async move {
                        let Some(descriptor) = manager.descriptor(&id) else {
                            return;
                        };
                        let patterns = descriptor.activation.workspace_patterns();
                        if manager.has_matched_file(&folders, &patterns).await {
                            let _ = manager.activate(&id).await;
                        }
                    });
                }
            }
            WorkspaceEvent::RuntimePathAdded(paths) => {
                tokio::spawn(async move { self.load_runtime_paths(paths).await });
            }
        }
    }

    fn spawn_activation(self: &Arc<Self>, id: String) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let _ = manager.activate(&id).await;
        });
    }

    /// Activates extensions waiting for `command` and waits until they are
    /// ready, so their command handlers exist before the command runs.
    async fn activate_for_command(&self, command: &str) {
        let ids = self.inactive_matching(ActivationKind::Command, |a| a.matches_command(command));
        if ids.is_empty() {
            return;
        }

        debug!(command, extensions = ?ids, "Activating extensions for command");
        let pending = join_all(ids.iter().map(|id| self.activate(id)));
        let timeout = self.config.command_activation_timeout();
        if tokio::time::timeout(timeout, pending).await.is_err() {
            warn!(
                command,
                timeout_ms = timeout.as_millis() as u64,
                "Extensions activated by command are not ready yet"
            );
        }
    }

    /// Runs a store write on the blocking pool; the store persists synchronously.
    async fn persist<F>(&self, write: F) -> ExtensionResult<()>
    where
        F: FnOnce(&dyn ExtensionStore) -> StoreResult<()> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || write(store.as_ref()))
            .await
            .map_err(|e| ExtensionError::Io(std::io::Error::other(e)))??;
        Ok(())
    }

    async fn load_runtime_paths(&self, paths: Vec<PathBuf>) {
        let mut folders = Vec::new();
        for path in paths {
            if ExtensionManifest::is_valid_folder(&path, &self.config.engine_version).await {
                folders.push(path);
            }
        }

        let results = join_all(folders.iter().map(|folder| {
            info!(folder = %folder.display(), "Loading extension from runtime path");
            self.load_extension(folder)
        }))
        .await;
        for (folder, result) in folders.iter().zip(results) {
            if let Err(e) = result {
                error!(folder = %folder.display(), error = %e, "Failed to load extension");
            }
        }
    }
}

impl std::fmt::Debug for ExtensionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionManager")
            .field("extensions", &self.loaded_extensions())
            .field("running", &self.is_running())
            .finish()
    }
}

async fn remove_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
