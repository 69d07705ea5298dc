//! The event dispatcher: subscribe, fire, race.
//!
//! ## Learning: Fan-out/Join
//!
//! All handlers of one event are turned into futures and awaited together
//! with `join_all`. They interleave on the firing task, so a slow handler
//! never blocks its siblings from making progress, and `fire` returns only
//! once every one of them has settled.
//!
//! Each handler future is wrapped in `catch_unwind`, so a panicking handler
//! is reported like a failing one instead of tearing down the fire.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use luminex_core::EventsConfig;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::disposable::{Disposable, Disposables};
use crate::event::{BufNr, Event, EventName};
use crate::state::{CursorPosition, EditorState};
use crate::wire::WireError;
use crate::{HandlerError, HandlerResult};

/// Identifies one handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A type-erased event handler.
pub type Handler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// One event name or a list of them.
pub trait IntoEventNames {
    fn into_event_names(self) -> Vec<EventName>;
}

impl IntoEventNames for EventName {
    fn into_event_names(self) -> Vec<EventName> {
        vec![self]
    }
}

impl<const N: usize> IntoEventNames for [EventName; N] {
    fn into_event_names(self) -> Vec<EventName> {
        self.to_vec()
    }
}

impl IntoEventNames for Vec<EventName> {
    fn into_event_names(self) -> Vec<EventName> {
        self
    }
}

impl IntoEventNames for &[EventName] {
    fn into_event_names(self) -> Vec<EventName> {
        self.to_vec()
    }
}

/// When a [`Dispatcher::race`] gives up.
#[derive(Debug, Clone)]
pub enum RaceUntil {
    Timeout(Duration),
    Cancelled(CancellationToken),
}

impl From<Duration> for RaceUntil {
    fn from(timeout: Duration) -> Self {
        RaceUntil::Timeout(timeout)
    }
}

impl From<CancellationToken> for RaceUntil {
    fn from(token: CancellationToken) -> Self {
        RaceUntil::Cancelled(token)
    }
}

/// Tunables of a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Handlers of traced events still running after this are reported
    pub slow_handler_timeout: Duration,
    /// Events whose handlers are timed
    pub traced: HashSet<EventName>,
    /// Capacity of the recent insert ring
    pub recent_inserts_limit: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&EventsConfig::default())
    }
}

impl From<&EventsConfig> for DispatchOptions {
    fn from(config: &EventsConfig) -> Self {
        let traced = config
            .traced_events
            .iter()
            .filter_map(|name| match name.parse::<EventName>() {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(error = %e, "Ignoring traced event");
                    None
                }
            })
            .collect();

        Self {
            slow_handler_timeout: config.slow_handler_timeout(),
            traced,
            recent_inserts_limit: config.recent_inserts_limit,
        }
    }
}

struct Registration {
    id: HandlerId,
    handler: Handler,
}

struct Inner {
    handlers: Mutex<HashMap<EventName, Vec<Registration>>>,
    state: Mutex<EditorState>,
    /// Held for the whole of a fire so fires never overlap
    fire_lock: tokio::sync::Mutex<()>,
    options: DispatchOptions,
}

impl Inner {
    fn remove(&self, name: EventName, id: HandlerId) {
        let mut handlers = self.handlers.lock();
        if let Some(list) = handlers.get_mut(&name) {
            list.retain(|r| r.id != id);
            if list.is_empty() {
                handlers.remove(&name);
            }
        }
    }

    fn snapshot(&self, name: EventName) -> Vec<Handler> {
        self.handlers
            .lock()
            .get(&name)
            .map(|list| list.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default()
    }
}

/// Routes editor events to subscribed handlers.
///
/// Cloning is cheap; clones share handlers and editor state.
///
/// A handler must not await [`Dispatcher::fire`] on its own dispatcher: the
/// nested fire waits for the outer one to finish. Spawn it instead.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_options(DispatchOptions::default())
    }

    pub fn with_options(options: DispatchOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: Mutex::new(HashMap::new()),
                state: Mutex::new(EditorState::new(options.recent_inserts_limit)),
                fire_lock: tokio::sync::Mutex::new(()),
                options,
            }),
        }
    }

    pub fn from_config(config: &EventsConfig) -> Self {
        Self::with_options(DispatchOptions::from(config))
    }

    /// Subscribes `handler` to one or more events.
    ///
    /// Handlers of an event run in registration order of their start, and
    /// the same callback may be subscribed any number of times. Subscribing
    /// to a list returns one handle that revokes every registration.
    pub fn on<N, F, Fut>(&self, names: N, handler: F) -> Disposable
    where
        N: IntoEventNames,
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event| handler(event).boxed());
        self.on_handler(names, handler)
    }

    /// Subscribes an already type-erased handler.
    pub fn on_handler(&self, names: impl IntoEventNames, handler: Handler) -> Disposable {
        let names = names.into_event_names();
        let mut revokers = Vec::with_capacity(names.len());

        let mut handlers = self.inner.handlers.lock();
        for name in names {
            let id = HandlerId::new();
            handlers.entry(name).or_default().push(Registration {
                id,
                handler: handler.clone(),
            });
            trace!(event = %name, handler = %id, "Handler registered");

            let inner: Weak<Inner> = Arc::downgrade(&self.inner);
            revokers.push(Disposable::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.remove(name, id);
                }
            }));
        }

        match revokers.len() {
            1 => revokers.pop().unwrap_or_else(Disposable::empty),
            _ => Disposable::from_many(revokers),
        }
    }

    /// Subscribes and adds the handle to a disposal group.
    pub fn on_in<N, F, Fut>(&self, names: N, handler: F, group: &mut Disposables)
    where
        N: IntoEventNames,
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        group.push(self.on(names, handler));
    }

    /// Number of handlers currently subscribed to `name`.
    pub fn handler_count(&self, name: EventName) -> usize {
        self.inner.handlers.lock().get(&name).map_or(0, Vec::len)
    }

    /// Ingests one event from the editor.
    ///
    /// Updates the editor state, then delivers any synthetic events and the
    /// event itself in order. Completes once every handler has settled;
    /// handler failures are logged and never returned.
    pub async fn fire(&self, event: Event) {
        let _serial = self.inner.fire_lock.lock().await;
        let deliveries = self.inner.state.lock().apply(event, Instant::now());
        for event in deliveries {
            self.deliver(event).await;
        }
    }

    /// Decodes a raw `(name, args)` notification and fires it.
    pub async fn fire_raw(&self, name: &str, args: Vec<Value>) -> Result<(), WireError> {
        let event = Event::decode(name, args)?;
        self.fire(event).await;
        Ok(())
    }

    async fn deliver(&self, event: Event) {
        let name = event.name();
        let handlers = self.inner.snapshot(name);
        if handlers.is_empty() {
            return;
        }

        debug!(event = %name, handlers = handlers.len(), "Delivering event");
        let event = Arc::new(event);
        let traced = self.inner.options.traced.contains(&name);
        let timeout = self.inner.options.slow_handler_timeout;

        let calls = handlers.into_iter().map(|handler| {
            let event = event.clone();
            let call = AssertUnwindSafe(async move { handler(event).await }).catch_unwind();
            async move {
                if traced {
                    timed(name, timeout, call).await
                } else {
                    call.await
                }
            }
        });

        for outcome in join_all(calls).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => report(name, &e),
                Err(panic) => {
                    error!(event = %name, panic = %panic_message(&*panic), "Handler panicked")
                }
            }
        }
    }

    /// Waits for the first of `names` to fire.
    ///
    /// The listeners are registered when `race` is called, so an event fired
    /// after this call returns and before the future is awaited still wins.
    /// Resolves to `None` on timeout or cancellation. Every listener is
    /// removed once the race settles or the future is dropped.
    pub fn race(
        &self,
        names: impl IntoEventNames,
        until: impl Into<RaceUntil>,
    ) -> impl Future<Output = Option<Arc<Event>>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let listeners = self.on(names, move |event| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(event);
            }
            async { Ok(()) }
        });
        let guard = DisposeOnDrop(Some(listeners));
        let until = until.into();

        async move {
            let _guard = guard;
            match until {
                RaceUntil::Timeout(timeout) => tokio::time::timeout(timeout, rx)
                    .await
                    .ok()
                    .and_then(Result::ok),
                RaceUntil::Cancelled(token) => tokio::select! {
                    winner = rx => winner.ok(),
                    _ = token.cancelled() => None,
                },
            }
        }
    }

    /// Snapshot of the derived editor state.
    pub fn state(&self) -> EditorState {
        self.inner.state.lock().clone()
    }

    pub fn bufnr(&self) -> BufNr {
        self.inner.state.lock().bufnr()
    }

    pub fn cursor(&self) -> CursorPosition {
        self.inner.state.lock().cursor()
    }

    pub fn insert_mode(&self) -> bool {
        self.inner.state.lock().insert_mode()
    }

    pub fn pum_visible(&self) -> bool {
        self.inner.state.lock().pum_visible()
    }

    pub fn pum_align_top(&self) -> bool {
        self.inner.state.lock().pum_align_top()
    }

    pub fn last_change(&self) -> Option<Instant> {
        self.inner.state.lock().last_change()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers: usize = self.inner.handlers.lock().values().map(Vec::len).sum();
        f.debug_struct("Dispatcher")
            .field("handlers", &handlers)
            .field("options", &self.inner.options)
            .finish()
    }
}

struct DisposeOnDrop(Option<Disposable>);

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        if let Some(disposable) = self.0.take() {
            disposable.dispose();
        }
    }
}

/// Awaits `call`, warning once if it outlives `timeout`.
async fn timed<F: Future>(name: EventName, timeout: Duration, call: F) -> F::Output {
    let mut call = std::pin::pin!(call);
    tokio::select! {
        output = &mut call => output,
        _ = tokio::time::sleep(timeout) => {
            warn!(
                event = %name,
                timeout_ms = timeout.as_millis() as u64,
                "Slow event handler"
            );
            call.await
        }
    }
}

fn report(name: EventName, e: &HandlerError) {
    if e.is_benign() {
        trace!(event = %name, error = %e, "Handler stopped");
    } else {
        error!(event = %name, error = %e, "Handler failed");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
