//! # Luminex Events
//!
//! The event dispatch core of the extension host.
//!
//! Raw notifications from the editor enter through [`Dispatcher::fire`] in
//! arrival order. Before handlers run, the dispatcher updates its
//! [`EditorState`] (cursor, insert mode, popup visibility, recent
//! insertions) and may derive synthetic events, such as an implicit
//! `InsertEnter` or a follow-up `TextInsert`.
//!
//! ```text
//!  editor ──▶ fire(event) ──▶ derive state ──▶ [synthetic before]
//!                                          ──▶ handlers of event (fan-out/join)
//!                                          ──▶ [synthetic after]
//! ```
//!
//! ## Learning: Sum Types Instead of Positional Arguments
//!
//! Every event kind is a variant of [`Event`] carrying its own payload, so a
//! handler that matches on `Event::CursorMoved(change)` gets typed fields
//! instead of an untyped argument list.

mod dispatcher;
mod disposable;
mod event;
mod state;
mod wire;

pub use dispatcher::{DispatchOptions, Dispatcher, Handler, HandlerId, IntoEventNames, RaceUntil};
pub use disposable::{Disposable, Disposables};
pub use event::{
    BufNr, CompleteDoneItem, CompleteStopKind, CursorChange, Event, EventName, InsertChange,
    OptionValue, PopupChange,
};
pub use state::{CursorPosition, EditorState, line_prefix};
pub use wire::WireError;

/// Result returned by event handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Failure of a single event handler.
///
/// Handler failures are logged and never reach the code that fired the
/// event. Cancellation and a disconnected transport are expected during
/// normal operation and are not logged as errors.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transport disconnected")]
    TransportDisconnected,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    /// Returns true for failures that are part of normal operation.
    pub fn is_benign(&self) -> bool {
        match self {
            HandlerError::Cancelled | HandlerError::TransportDisconnected => true,
            HandlerError::Failed(e) => e.to_string().contains("transport disconnected"),
        }
    }
}
