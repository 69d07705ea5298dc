//! # Luminex Core
//!
//! Collaborators shared by the extension host: everything the dispatcher and
//! the extension manager read from or write to, but do not own.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     Extension Host                         │
//! │  ┌──────────────┐   ┌───────────────┐   ┌──────────────┐  │
//! │  │  Dispatcher  │◀──│   Extension   │──▶│  Workspace   │  │
//! │  │ (events)     │   │   Manager     │   │  (this crate)│  │
//! │  └──────────────┘   └───────┬───────┘   └──────────────┘  │
//! │                             │                              │
//! │               ┌─────────────┼──────────────┐               │
//! │               ▼             ▼              ▼               │
//! │          ┌─────────┐  ┌──────────┐  ┌─────────────┐        │
//! │          │ Config  │  │ Notifier │  │ FileWatcher │        │
//! │          └─────────┘  └──────────┘  └─────────────┘        │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here is usable without the other crates; the traits
//! ([`WorkspaceHost`], [`Notifier`], [`FileWatcher`]) are the seams an
//! embedding editor replaces.

pub mod config;
pub mod document;
pub mod event;
pub mod notification;
pub mod watch;
pub mod workspace;

pub use config::{ConfigError, EventsConfig, ExtensionsConfig, HostConfig, LogConfig};
pub use document::{DocumentFilter, DocumentSelector, TextDocument, score_selector};
pub use event::{WorkspaceEvent, WorkspaceEventBus, WorkspaceEventHandler};
pub use notification::{LogNotifier, MemoryNotifier, NotificationLevel, Notifier};
pub use watch::{FileWatcher, NotifyWatcher, WatchCallback, WatchHandle};
pub use workspace::{Workspace, WorkspaceFolder, WorkspaceHost, index_folder, match_patterns};

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid glob pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
