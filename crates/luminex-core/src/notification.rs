//! User-visible notifications.
//!
//! Notifications are fire-and-forget: callers never wait for the user to see
//! them, and a failing presenter never fails the caller.

use parking_lot::Mutex;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Presents messages to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotificationLevel, message: &str);

    fn show_info(&self, message: &str) {
        self.notify(NotificationLevel::Info, message);
    }

    fn show_warning(&self, message: &str) {
        self.notify(NotificationLevel::Warning, message);
    }

    fn show_error(&self, message: &str) {
        self.notify(NotificationLevel::Error, message);
    }
}

/// Routes notifications into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: NotificationLevel, message: &str) {
        match level {
            NotificationLevel::Info => tracing::info!(notification = true, "{}", message),
            NotificationLevel::Warning => tracing::warn!(notification = true, "{}", message),
            NotificationLevel::Error => tracing::error!(notification = true, "{}", message),
        }
    }
}

/// Keeps every notification in memory, for headless hosts and tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    messages: Mutex<Vec<(NotificationLevel, String)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all messages received so far.
    pub fn messages(&self) -> Vec<(NotificationLevel, String)> {
        self.messages.lock().clone()
    }

    /// Returns the messages of one level.
    pub fn messages_of(&self, level: NotificationLevel) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, level: NotificationLevel, message: &str) {
        self.messages.lock().push((level, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_notifier_levels() {
        let notifier = MemoryNotifier::new();
        notifier.show_info("loaded");
        notifier.show_warning("missing");
        notifier.show_error("boom");

        assert_eq!(notifier.messages().len(), 3);
        assert_eq!(notifier.messages_of(NotificationLevel::Warning), vec!["missing"]);
    }
}
