//! # Luminex Extension
//!
//! Extension lifecycle for the host.
//!
//! The [`ExtensionManager`] keeps one runtime entry per extension id and
//! decides when each extension is activated: eagerly once the host is
//! running, or lazily when a document, command or workspace folder matches
//! one of its declared activation conditions.
//!
//! ```text
//!  register ──▶ loaded ──activate──▶ activated ──deactivate──▶ loaded
//!                  │                                             │
//!                  └──────────────── unload ◀────────────────────┘
//! ```
//!
//! ## Learning: Trait Objects at the Seams
//!
//! Every collaborator (workspace, store, loader, notifier, file watcher) is a
//! trait object, so the manager can be driven by an embedding editor or by
//! in-memory fakes in tests.

mod activation;
mod manager;
mod manifest;
mod memos;
mod runtime;
mod store;

pub use activation::{ActivationEvent, ActivationEvents, ActivationKind};
pub use manager::{
    Collaborators, ExtensionInfo, ExtensionManager, ExtensionState, UninstallReport,
};
pub use manifest::{
    CommandContribution, ConfigurationContribution, ConfigurationProperty, Contributes, Engines,
    ExtensionDescriptor, ExtensionManifest, ExtensionOrigin, MANIFEST_FILE, ManifestError,
    RootPatternContribution, SINGLE_FILE_PREFIX,
};
pub use memos::{Memento, Memos};
pub use runtime::{
    ExportedMethod, Exports, Extension, ExtensionContext, ExtensionEvent, ExtensionExports,
    ExtensionFactory, ExtensionLoader, NativeRegistry,
};
pub use store::{ExtensionStore, FileExtensionStore, StoreError, StoreResult};

use luminex_core::CoreError;

/// Extension manager errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Extension {0} is not registered")]
    NotRegistered(String),

    #[error("Extension {0} is disabled")]
    Disabled(String),

    #[error("Extension {0} is not activated")]
    NotActivated(String),

    /// Every caller of one activation receives a copy of the same message.
    #[error("Failed to activate extension {id}: {message}")]
    ActivationFailed { id: String, message: String },

    #[error("Method {method} not found on extension {id}")]
    MethodNotFound { id: String, method: String },

    #[error("Call to {method} on extension {id} failed: {message}")]
    CallFailed {
        id: String,
        method: String,
        message: String,
    },

    #[error("Extension {0} cannot be reloaded")]
    NotReloadable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ExtensionResult<T> = Result<T, ExtensionError>;
