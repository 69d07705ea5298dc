//! Workspace change notifications.
//!
//! ## Learning: Broadcast Instead of Callbacks
//!
//! The workspace never calls into the extension manager. It sends owned
//! [`WorkspaceEvent`] values on a `tokio::sync::broadcast` channel and each
//! listener drains its own receiver on its own task, so a slow listener only
//! lags itself.

use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::document::TextDocument;
use crate::workspace::WorkspaceFolder;

/// Changes the workspace reports to interested parties.
#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    /// A document was opened in the editor
    DocumentOpened(TextDocument),
    /// Folders were added to the workspace
    FoldersAdded(Vec<WorkspaceFolder>),
    /// Directories were appended to the editor runtime path
    RuntimePathAdded(Vec<PathBuf>),
}

/// Sender side of workspace notifications. Events sent with no
/// subscriber are dropped.
#[derive(Clone)]
pub struct WorkspaceEventBus {
    sender: broadcast::Sender<WorkspaceEvent>,
}

impl WorkspaceEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn emit(&self, event: WorkspaceEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.sender.subscribe()
    }
}

impl Default for WorkspaceEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that skips over lag instead of failing.
///
/// ```ignore
/// let mut events = WorkspaceEventHandler::new(workspace.subscribe());
/// while let Some(WorkspaceEvent::FoldersAdded(folders)) = events.next().await {
///     index(folders).await;
/// }
/// ```
pub struct WorkspaceEventHandler {
    receiver: broadcast::Receiver<WorkspaceEvent>,
}

impl WorkspaceEventHandler {
    pub fn new(receiver: broadcast::Receiver<WorkspaceEvent>) -> Self {
        Self { receiver }
    }

    /// Next event, or `None` once the workspace is gone.
    pub async fn next(&mut self) -> Option<WorkspaceEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "Workspace listener fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runtime_path_event() {
        let bus = WorkspaceEventBus::new();
        let mut handler = WorkspaceEventHandler::new(bus.subscribe());

        bus.emit(WorkspaceEvent::RuntimePathAdded(vec![PathBuf::from("/opt/ext")]));

        let event = handler.next().await.unwrap();
        assert!(matches!(event, WorkspaceEvent::RuntimePathAdded(paths) if paths.len() == 1));
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = WorkspaceEventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(WorkspaceEvent::FoldersAdded(Vec::new()));

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_bus_ends_handler() {
        let bus = WorkspaceEventBus::new();
        let mut handler = WorkspaceEventHandler::new(bus.subscribe());
        drop(bus);
        assert!(handler.next().await.is_none());
    }
}
