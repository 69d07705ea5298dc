//! Live extensions.
//!
//! ## Learning: Memoized Futures
//!
//! Activation must run at most once even when several callers ask for it at
//! the same time. The first caller builds the activation future, wraps it in
//! `futures::future::Shared` and stores it in the runtime's phase; every
//! later caller clones that same future and awaits the same outcome.
//!
//! ```text
//!  Inactive ──activate──▶ Activating(shared) ──ok──▶ Active{instance, exports}
//!     ▲                         │                         │
//!     └─────────── err ─────────┘                         │
//!     └──────────────────────── deactivate ───────────────┘
//!
//!  any phase ──retire──▶ Retired   (terminal, activate is refused)
//! ```
//!
//! The shared future is also spawned, so an activation always runs to
//! completion even if every caller stops waiting for it. A runtime is
//! retired when its extension is unloaded; callers still holding it can no
//! longer start an instance nobody would tear down.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use luminex_core::{Notifier, WorkspaceHost};
use luminex_events::{Dispatcher, Disposables};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::manifest::ExtensionDescriptor;
use crate::memos::Memento;

/// Code behind an extension.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Sets the extension up and returns what it exports.
    async fn activate(&mut self, ctx: &mut ExtensionContext) -> anyhow::Result<Exports>;

    /// Tears the extension down. Subscriptions in the context are disposed
    /// by the manager before this runs.
    async fn deactivate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A method an extension exports.
pub type ExportedMethod =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// The methods an active extension exposes to others.
#[derive(Clone, Default)]
pub struct Exports {
    methods: HashMap<String, ExportedMethod>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let method: ExportedMethod = Arc::new(move |args| method(args).boxed());
        self.methods.insert(name.into(), method);
        self
    }

    pub fn get(&self, name: &str) -> Option<ExportedMethod> {
        self.methods.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Exported method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Exports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exports")
            .field("methods", &self.names())
            .finish()
    }
}

/// Exports of an extension, which only exist once it is active.
#[derive(Debug, Clone)]
pub enum ExtensionExports {
    NotActivated,
    Active(Exports),
}

impl ExtensionExports {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn active(self) -> Option<Exports> {
        match self {
            Self::Active(exports) => Some(exports),
            Self::NotActivated => None,
        }
    }
}

/// Everything an extension gets while it activates.
pub struct ExtensionContext {
    id: String,
    root: PathBuf,
    /// Disposed when the extension is deactivated
    pub subscriptions: Disposables,
    /// Extension folder, or its manifest file for single-file extensions
    pub extension_path: PathBuf,
    /// Private folder for the extension's data; not created in advance
    pub storage_path: PathBuf,
    pub global_state: Memento,
    pub workspace_state: Memento,
    pub dispatcher: Dispatcher,
    pub workspace: Arc<dyn WorkspaceHost>,
}

impl ExtensionContext {
    pub(crate) fn new(
        descriptor: &ExtensionDescriptor,
        storage_root: &Path,
        global_state: Memento,
        workspace_state: Memento,
        dispatcher: Dispatcher,
        workspace: Arc<dyn WorkspaceHost>,
    ) -> Self {
        Self {
            id: descriptor.id.clone(),
            root: descriptor.root.clone(),
            subscriptions: Disposables::new(),
            extension_path: descriptor.extension_path().to_path_buf(),
            storage_path: storage_root.join(format!("{}-data", descriptor.id)),
            global_state,
            workspace_state,
            dispatcher,
            workspace,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolves a path relative to the extension folder.
    pub fn as_absolute_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }
}

/// Produces the code for a registered extension.
pub trait ExtensionLoader: Send + Sync {
    fn load(&self, descriptor: &ExtensionDescriptor) -> anyhow::Result<Box<dyn Extension>>;
}

/// Builds a fresh extension instance.
pub type ExtensionFactory = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Loader for extensions compiled into the host, keyed by manifest entry.
#[derive(Default)]
pub struct NativeRegistry {
    factories: RwLock<HashMap<String, ExtensionFactory>>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the code for manifests whose `main` is `entry`.
    pub fn register<F>(&self, entry: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.factories.write().insert(entry.into(), Arc::new(factory));
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.factories.read().contains_key(entry)
    }
}

impl ExtensionLoader for NativeRegistry {
    fn load(&self, descriptor: &ExtensionDescriptor) -> anyhow::Result<Box<dyn Extension>> {
        let entry = descriptor.manifest.entry();
        let factory = self.factories.read().get(entry).cloned().ok_or_else(|| {
            anyhow::anyhow!("No code registered for entry {} of extension {}", entry, descriptor.id)
        })?;
        Ok(factory())
    }
}

/// Loader for a single builtin extension.
pub(crate) struct FactoryLoader(pub(crate) ExtensionFactory);

impl ExtensionLoader for FactoryLoader {
    fn load(&self, _descriptor: &ExtensionDescriptor) -> anyhow::Result<Box<dyn Extension>> {
        Ok((self.0)())
    }
}

/// Lifecycle notifications broadcast by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionEvent {
    Loaded(String),
    Activated(String),
    Unloaded(String),
}

/// Outcome of one activation, shared by all its callers.
pub(crate) type ActivationOutcome = Result<(), String>;

pub(crate) type SharedActivation = Shared<BoxFuture<'static, ActivationOutcome>>;

/// An activated extension.
pub(crate) struct ActiveExtension {
    instance: Box<dyn Extension>,
    exports: Exports,
    subscriptions: Disposables,
}

impl ActiveExtension {
    pub(crate) fn new(instance: Box<dyn Extension>, exports: Exports, subscriptions: Disposables) -> Self {
        Self {
            instance,
            exports,
            subscriptions,
        }
    }
}

enum Phase {
    Inactive,
    Activating(SharedActivation),
    Active(ActiveExtension),
    Retired,
}

/// Live state of one registered extension.
pub(crate) struct Runtime {
    id: String,
    phase: Mutex<Phase>,
    events: broadcast::Sender<ExtensionEvent>,
    notifier: Arc<dyn Notifier>,
}

impl Runtime {
    pub(crate) fn new(
        id: impl Into<String>,
        events: broadcast::Sender<ExtensionEvent>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            phase: Mutex::new(Phase::Inactive),
            events,
            notifier,
        })
    }

    pub(crate) fn is_active(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Active(_))
    }

    pub(crate) fn exports(&self) -> ExtensionExports {
        match &*self.phase.lock() {
            Phase::Active(active) => ExtensionExports::Active(active.exports.clone()),
            _ => ExtensionExports::NotActivated,
        }
    }

    /// Starts activation, or joins the one in flight.
    ///
    /// `routine` is only called when the extension is inactive.
    pub(crate) fn activate<F>(self: &Arc<Self>, routine: F) -> SharedActivation
    where
        F: FnOnce() -> BoxFuture<'static, anyhow::Result<ActiveExtension>>,
    {
        let mut phase = self.phase.lock();
        match &*phase {
            Phase::Active(_) => return futures::future::ready(Ok(())).boxed().shared(),
            Phase::Activating(pending) => return pending.clone(),
            Phase::Retired => {
                let refused: ActivationOutcome = Err("extension was unloaded".to_string());
                return futures::future::ready(refused).boxed().shared();
            }
            Phase::Inactive => {}
        }

        debug!(extension = %self.id, "Activating extension");
        let this = Arc::clone(self);
        let work = routine();
        let activation = async move {
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result.map_err(|e| format!("{:#}", e)),
                Err(panic) => Err(panic_message(&*panic)),
            };
            this.finish(outcome)
        }
        .boxed()
        .shared();

        *phase = Phase::Activating(activation.clone());
        drop(phase);

        tokio::spawn(activation.clone());
        activation
    }

    fn finish(&self, outcome: Result<ActiveExtension, String>) -> ActivationOutcome {
        match outcome {
            Ok(active) => {
                *self.phase.lock() = Phase::Active(active);
                info!(extension = %self.id, "Extension activated");
                let _ = self.events.send(ExtensionEvent::Activated(self.id.clone()));
                Ok(())
            }
            Err(message) => {
                *self.phase.lock() = Phase::Inactive;
                error!(extension = %self.id, error = %message, "Extension activation failed");
                self.notifier
                    .show_error(&format!("Failed to activate extension {}: {}", self.id, message));
                Err(message)
            }
        }
    }

    /// Deactivates, waiting for an in-flight activation first.
    ///
    /// Returns false if the extension was not active. Teardown failures are
    /// logged; the extension ends up inactive either way.
    pub(crate) async fn deactivate(&self) -> bool {
        self.shut_down(false).await
    }

    /// Deactivates for good. Later activations are refused.
    pub(crate) async fn retire(&self) -> bool {
        self.shut_down(true).await
    }

    async fn shut_down(&self, retire: bool) -> bool {
        // An activation may start while we wait for another one, so keep
        // waiting until the phase is settled.
        let active = loop {
            let pending = {
                let mut phase = self.phase.lock();
                let pending = match &*phase {
                    Phase::Activating(pending) => Some(pending.clone()),
                    _ => None,
                };
                if pending.is_none() {
                    let next = if retire || matches!(*phase, Phase::Retired) {
                        Phase::Retired
                    } else {
                        Phase::Inactive
                    };
                    match std::mem::replace(&mut *phase, next) {
                        Phase::Active(active) => break Some(active),
                        _ => break None,
                    }
                }
                pending
            };
            if let Some(pending) = pending {
                let _ = pending.await;
            }
        };
        let Some(mut active) = active else {
            return false;
        };

        active.subscriptions.dispose_all();
        if let Err(e) = active.instance.deactivate().await {
            error!(extension = %self.id, error = %format!("{:#}", e), "Extension teardown failed");
        }
        info!(extension = %self.id, "Extension deactivated");
        true
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luminex_core::MemoryNotifier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Recorder {
        deactivated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Extension for Recorder {
        async fn activate(&mut self, _ctx: &mut ExtensionContext) -> anyhow::Result<Exports> {
            Ok(Exports::new())
        }

        async fn deactivate(&mut self) -> anyhow::Result<()> {
            self.deactivated.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("teardown is allowed to fail")
        }
    }

    fn runtime() -> (Arc<Runtime>, Arc<MemoryNotifier>) {
        let (events, _) = broadcast::channel(16);
        let notifier = Arc::new(MemoryNotifier::new());
        (Runtime::new("recorder", events, notifier.clone()), notifier)
    }

    fn slow_routine(
        calls: Arc<AtomicUsize>,
        deactivated: Arc<AtomicUsize>,
    ) -> BoxFuture<'static, anyhow::Result<ActiveExtension>> {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let exports = Exports::new().method("ping", |_| async { Ok(Value::from("pong")) });
            Ok(ActiveExtension::new(
                Box::new(Recorder { deactivated }),
                exports,
                Disposables::new(),
            ))
        }
        .boxed()
    }

    fn failing_routine(panics: bool) -> BoxFuture<'static, anyhow::Result<ActiveExtension>> {
        async move {
            if panics {
                panic!("bad extension");
            }
            anyhow::bail!("missing binary")
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_concurrent_activation_runs_once() {
        let (runtime, _) = runtime();
        let calls = Arc::new(AtomicUsize::new(0));
        let deactivated = Arc::new(AtomicUsize::new(0));

        let pending: Vec<_> = (0..5)
            .map(|_| {
                let (c, d) = (calls.clone(), deactivated.clone());
                runtime.activate(move || slow_routine(c, d))
            })
            .collect();
        let outcomes = futures::future::join_all(pending).await;

        assert!(outcomes.iter().all(|o| o.is_ok()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(runtime.is_active());
        let exports = runtime.exports().active().unwrap();
        assert_eq!(exports.names(), vec!["ping"]);
    }

    #[tokio::test]
    async fn test_deactivate_waits_for_activation() {
        let (runtime, _) = runtime();
        let calls = Arc::new(AtomicUsize::new(0));
        let deactivated = Arc::new(AtomicUsize::new(0));

        let (c, d) = (calls.clone(), deactivated.clone());
        let _pending = runtime.activate(move || slow_routine(c, d));
        assert!(!runtime.exports().is_active());

        // Teardown fails but the extension still ends up inactive
        assert!(runtime.deactivate().await);
        assert_eq!(deactivated.load(Ordering::SeqCst), 1);
        assert!(!runtime.is_active());
        assert!(!runtime.deactivate().await);
    }

    #[tokio::test]
    async fn test_failed_activation_can_retry() {
        let (runtime, notifier) = runtime();
        let outcome = runtime.activate(|| failing_routine(false)).await;
        assert_eq!(outcome, Err("missing binary".to_string()));
        assert!(!runtime.is_active());
        assert_eq!(notifier.messages_of(luminex_core::NotificationLevel::Error).len(), 1);

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let d = Arc::new(AtomicUsize::new(0));
        assert!(runtime.activate(move || slow_routine(c, d)).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retired_runtime_refuses_activation() {
        let (runtime, notifier) = runtime();
        let calls = Arc::new(AtomicUsize::new(0));
        let deactivated = Arc::new(AtomicUsize::new(0));

        let (c, d) = (calls.clone(), deactivated.clone());
        let _pending = runtime.activate(move || slow_routine(c, d));
        assert!(runtime.retire().await);
        assert_eq!(deactivated.load(Ordering::SeqCst), 1);

        let (c, d) = (calls.clone(), deactivated.clone());
        let outcome = runtime.activate(move || slow_routine(c, d)).await;
        assert_eq!(outcome, Err("extension was unloaded".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!runtime.is_active());
        assert!(!runtime.deactivate().await);
        assert!(notifier.messages_of(luminex_core::NotificationLevel::Error).is_empty());
    }

    #[tokio::test]
    async fn test_panicking_activation_is_a_failure() {
        let (runtime, _) = runtime();
        let outcome = runtime.activate(|| failing_routine(true)).await;
        assert_eq!(outcome, Err("panicked: bad extension".to_string()));
        assert!(!runtime.is_active());
    }

    #[tokio::test]
    async fn test_native_registry() {
        let registry = NativeRegistry::new();
        let deactivated = Arc::new(AtomicUsize::new(0));
        let d = deactivated.clone();
        registry.register("recorder", move || {
            Box::new(Recorder {
                deactivated: d.clone(),
            }) as Box<dyn Extension>
        });
        assert!(registry.contains("recorder"));

        let manifest = crate::manifest::ExtensionManifest {
            name: "recorder".into(),
            ..Default::default()
        };
        let descriptor = ExtensionDescriptor::new(
            manifest,
            "/ext/recorder",
            crate::manifest::ExtensionOrigin::Local,
        );
        assert!(registry.load(&descriptor).is_ok());

        let mut other = descriptor.clone();
        other.manifest.main = Some("missing".into());
        assert!(registry.load(&other).is_err());
    }
}
