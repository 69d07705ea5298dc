//! The closed event vocabulary exchanged with the editor.
//!
//! ## Learning: Enum Variants
//!
//! Rust enums can hold data, unlike C-style enums.
//! Each variant can have different associated data.
//! Pattern matching ensures all cases are handled.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::wire::WireError;

/// Editor buffer number.
pub type BufNr = u32;

/// Name of an event kind. The string form is the name used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    // Buffer lifecycle
    BufHidden,
    BufEnter,
    BufCreate,
    BufUnload,
    BufDetach,
    BufWinEnter,
    BufWinLeave,
    BufWritePre,
    BufWritePost,
    BufReadCmd,
    TermOpen,
    TermExit,
    Enter,
    LinesChanged,
    FileType,

    // Insert mode
    InsertEnter,
    InsertLeave,
    InsertCharPre,
    InsertSnippet,
    TextChanged,
    TextChangedI,
    TextChangedP,
    TextInsert,

    // Cursor
    CursorMoved,
    CursorMovedI,
    CursorHold,
    CursorHoldI,

    // Windows and tabs
    WinEnter,
    WinLeave,
    WinClosed,
    WinScrolled,
    TabNew,
    TabClosed,

    // Tasks
    TaskExit,
    TaskStdout,
    TaskStderr,

    // Completion popup
    MenuPopupChanged,
    CompleteDone,
    CompleteStop,

    // Prompts and floats
    FloatBtnClick,
    PromptKeyPress,
    PromptInsert,
    InputChar,

    // Editor
    FocusGained,
    FocusLost,
    Ready,
    VimLeavePre,
    VimResized,
    DirChanged,
    OptionSet,
    GlobalChange,
    Command,
}

impl EventName {
    /// Every event name, in declaration order.
    pub const ALL: [EventName; 52] = [
        EventName::BufHidden,
        EventName::BufEnter,
        EventName::BufCreate,
        EventName::BufUnload,
        EventName::BufDetach,
        EventName::BufWinEnter,
        EventName::BufWinLeave,
        EventName::BufWritePre,
        EventName::BufWritePost,
        EventName::BufReadCmd,
        EventName::TermOpen,
        EventName::TermExit,
        EventName::Enter,
        EventName::LinesChanged,
        EventName::FileType,
        EventName::InsertEnter,
        EventName::InsertLeave,
        EventName::InsertCharPre,
        EventName::InsertSnippet,
        EventName::TextChanged,
        EventName::TextChangedI,
        EventName::TextChangedP,
        EventName::TextInsert,
        EventName::CursorMoved,
        EventName::CursorMovedI,
        EventName::CursorHold,
        EventName::CursorHoldI,
        EventName::WinEnter,
        EventName::WinLeave,
        EventName::WinClosed,
        EventName::WinScrolled,
        EventName::TabNew,
        EventName::TabClosed,
        EventName::TaskExit,
        EventName::TaskStdout,
        EventName::TaskStderr,
        EventName::MenuPopupChanged,
        EventName::CompleteDone,
        EventName::CompleteStop,
        EventName::FloatBtnClick,
        EventName::PromptKeyPress,
        EventName::PromptInsert,
        EventName::InputChar,
        EventName::FocusGained,
        EventName::FocusLost,
        EventName::Ready,
        EventName::VimLeavePre,
        EventName::VimResized,
        EventName::DirChanged,
        EventName::OptionSet,
        EventName::GlobalChange,
        EventName::Command,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::BufHidden => "BufHidden",
            EventName::BufEnter => "BufEnter",
            EventName::BufCreate => "BufCreate",
            EventName::BufUnload => "BufUnload",
            EventName::BufDetach => "BufDetach",
            EventName::BufWinEnter => "BufWinEnter",
            EventName::BufWinLeave => "BufWinLeave",
            EventName::BufWritePre => "BufWritePre",
            EventName::BufWritePost => "BufWritePost",
            EventName::BufReadCmd => "BufReadCmd",
            EventName::TermOpen => "TermOpen",
            EventName::TermExit => "TermExit",
            EventName::Enter => "Enter",
            EventName::LinesChanged => "LinesChanged",
            EventName::FileType => "FileType",
            EventName::InsertEnter => "InsertEnter",
            EventName::InsertLeave => "InsertLeave",
            EventName::InsertCharPre => "InsertCharPre",
            EventName::InsertSnippet => "InsertSnippet",
            EventName::TextChanged => "TextChanged",
            EventName::TextChangedI => "TextChangedI",
            EventName::TextChangedP => "TextChangedP",
            EventName::TextInsert => "TextInsert",
            EventName::CursorMoved => "CursorMoved",
            EventName::CursorMovedI => "CursorMovedI",
            EventName::CursorHold => "CursorHold",
            EventName::CursorHoldI => "CursorHoldI",
            EventName::WinEnter => "WinEnter",
            EventName::WinLeave => "WinLeave",
            EventName::WinClosed => "WinClosed",
            EventName::WinScrolled => "WinScrolled",
            EventName::TabNew => "TabNew",
            EventName::TabClosed => "TabClosed",
            EventName::TaskExit => "TaskExit",
            EventName::TaskStdout => "TaskStdout",
            EventName::TaskStderr => "TaskStderr",
            EventName::MenuPopupChanged => "MenuPopupChanged",
            EventName::CompleteDone => "CompleteDone",
            EventName::CompleteStop => "CompleteStop",
            EventName::FloatBtnClick => "FloatBtnClick",
            EventName::PromptKeyPress => "PromptKeyPress",
            EventName::PromptInsert => "PromptInsert",
            EventName::InputChar => "InputChar",
            EventName::FocusGained => "FocusGained",
            EventName::FocusLost => "FocusLost",
            EventName::Ready => "ready",
            EventName::VimLeavePre => "VimLeavePre",
            EventName::VimResized => "VimResized",
            EventName::DirChanged => "DirChanged",
            EventName::OptionSet => "OptionSet",
            EventName::GlobalChange => "GlobalChange",
            EventName::Command => "Command",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| WireError::UnknownEvent(s.to_string()))
    }
}

/// Cursor position reported by a cursor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorChange {
    pub bufnr: BufNr,
    /// 1-based line
    pub lnum: u32,
    /// 1-based byte column
    pub col: u32,
    /// Whether characters were typed since the last text change (filled in by the dispatcher)
    pub has_recent_inserts: bool,
}

impl CursorChange {
    pub fn new(bufnr: BufNr, lnum: u32, col: u32) -> Self {
        Self {
            bufnr,
            lnum,
            col,
            has_recent_inserts: false,
        }
    }
}

/// Text change in insert mode or with the popup menu visible.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertChange {
    pub lnum: u32,
    pub col: u32,
    pub line: String,
    pub changedtick: u64,
    /// Line content before the cursor (filled in by the dispatcher)
    #[serde(default)]
    pub pre: String,
    /// Character whose insertion caused this change (filled in by the dispatcher)
    #[serde(default)]
    pub insert_char: Option<char>,
}

impl InsertChange {
    pub fn new(lnum: u32, col: u32, line: impl Into<String>, changedtick: u64) -> Self {
        Self {
            lnum,
            col,
            line: line.into(),
            changedtick,
            pre: String::new(),
            insert_char: None,
        }
    }
}

/// Geometry and selection of the completion popup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PopupChange {
    pub index: i64,
    pub word: String,
    pub height: u32,
    pub width: u32,
    /// Screen row the popup is anchored at
    pub row: u32,
    pub col: u32,
    pub size: u32,
    pub scrollbar: bool,
    pub inserted: bool,
    #[serde(rename = "move")]
    pub moved: bool,
}

/// Completion item the user accepted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompleteDoneItem {
    pub word: String,
    pub abbr: Option<String>,
    pub menu: Option<String>,
    pub info: Option<String>,
    pub kind: Option<String>,
    pub source: Option<String>,
    pub user_data: Option<String>,
}

/// How completion stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompleteStopKind {
    Confirm,
    Cancel,
    #[serde(rename = "")]
    None,
}

/// Value of an editor option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Number(f64),
    String(String),
}

/// An editor event with its payload.
///
/// Every variant corresponds to exactly one [`EventName`]; the field order of
/// each variant is the positional argument order on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    BufHidden(BufNr),
    BufEnter(BufNr),
    BufCreate(BufNr),
    BufUnload(BufNr),
    BufDetach(BufNr),
    BufWinEnter { bufnr: BufNr, winid: u32 },
    BufWinLeave { bufnr: BufNr, winid: u32 },
    BufWritePre { bufnr: BufNr, bufname: String, changedtick: u64 },
    BufWritePost { bufnr: BufNr, changedtick: u64 },
    BufReadCmd { scheme: String, fullpath: String },
    TermOpen(BufNr),
    TermExit { bufnr: BufNr, status: i32 },
    Enter(BufNr),
    LinesChanged(BufNr),
    FileType { filetype: String, bufnr: BufNr },

    InsertEnter(BufNr),
    InsertLeave(BufNr),
    InsertCharPre { character: char, bufnr: BufNr },
    InsertSnippet,
    TextChanged { bufnr: BufNr, changedtick: u64 },
    TextChangedI { bufnr: BufNr, change: InsertChange },
    TextChangedP { bufnr: BufNr, change: InsertChange },
    TextInsert { bufnr: BufNr, change: InsertChange, character: char },

    CursorMoved(CursorChange),
    CursorMovedI(CursorChange),
    CursorHold(CursorChange),
    CursorHoldI(CursorChange),

    WinEnter(u32),
    WinLeave(u32),
    WinClosed(u32),
    WinScrolled(u32),
    TabNew(u32),
    TabClosed(u32),

    TaskExit { id: String, code: i32 },
    TaskStdout { id: String, lines: Vec<String> },
    TaskStderr { id: String, lines: Vec<String> },

    MenuPopupChanged { popup: PopupChange, cursorline: u32 },
    CompleteDone(CompleteDoneItem),
    CompleteStop { kind: CompleteStopKind, pretext: String },

    FloatBtnClick { bufnr: BufNr, index: u32 },
    PromptKeyPress { bufnr: BufNr, key: String },
    PromptInsert { value: String, bufnr: BufNr },
    InputChar { session: String, character: String, mode: i32 },

    FocusGained,
    FocusLost,
    Ready,
    VimLeavePre,
    VimResized { columns: u32, lines: u32 },
    DirChanged(String),
    OptionSet { option: String, old: OptionValue, new: OptionValue },
    GlobalChange { option: String, old: OptionValue, new: OptionValue },
    Command(String),
}

impl Event {
    /// Returns the name of this event's kind.
    pub fn name(&self) -> EventName {
        match self {
            Event::BufHidden(_) => EventName::BufHidden,
            Event::BufEnter(_) => EventName::BufEnter,
            Event::BufCreate(_) => EventName::BufCreate,
            Event::BufUnload(_) => EventName::BufUnload,
            Event::BufDetach(_) => EventName::BufDetach,
            Event::BufWinEnter { .. } => EventName::BufWinEnter,
            Event::BufWinLeave { .. } => EventName::BufWinLeave,
            Event::BufWritePre { .. } => EventName::BufWritePre,
            Event::BufWritePost { .. } => EventName::BufWritePost,
            Event::BufReadCmd { .. } => EventName::BufReadCmd,
            Event::TermOpen(_) => EventName::TermOpen,
            Event::TermExit { .. } => EventName::TermExit,
            Event::Enter(_) => EventName::Enter,
            Event::LinesChanged(_) => EventName::LinesChanged,
            Event::FileType { .. } => EventName::FileType,
            Event::InsertEnter(_) => EventName::InsertEnter,
            Event::InsertLeave(_) => EventName::InsertLeave,
            Event::InsertCharPre { .. } => EventName::InsertCharPre,
            Event::InsertSnippet => EventName::InsertSnippet,
            Event::TextChanged { .. } => EventName::TextChanged,
            Event::TextChangedI { .. } => EventName::TextChangedI,
            Event::TextChangedP { .. } => EventName::TextChangedP,
            Event::TextInsert { .. } => EventName::TextInsert,
            Event::CursorMoved(_) => EventName::CursorMoved,
            Event::CursorMovedI(_) => EventName::CursorMovedI,
            Event::CursorHold(_) => EventName::CursorHold,
            Event::CursorHoldI(_) => EventName::CursorHoldI,
            Event::WinEnter(_) => EventName::WinEnter,
            Event::WinLeave(_) => EventName::WinLeave,
            Event::WinClosed(_) => EventName::WinClosed,
            Event::WinScrolled(_) => EventName::WinScrolled,
            Event::TabNew(_) => EventName::TabNew,
            Event::TabClosed(_) => EventName::TabClosed,
            Event::TaskExit { .. } => EventName::TaskExit,
            Event::TaskStdout { .. } => EventName::TaskStdout,
            Event::TaskStderr { .. } => EventName::TaskStderr,
            Event::MenuPopupChanged { .. } => EventName::MenuPopupChanged,
            Event::CompleteDone(_) => EventName::CompleteDone,
            Event::CompleteStop { .. } => EventName::CompleteStop,
            Event::FloatBtnClick { .. } => EventName::FloatBtnClick,
            Event::PromptKeyPress { .. } => EventName::PromptKeyPress,
            Event::PromptInsert { .. } => EventName::PromptInsert,
            Event::InputChar { .. } => EventName::InputChar,
            Event::FocusGained => EventName::FocusGained,
            Event::FocusLost => EventName::FocusLost,
            Event::Ready => EventName::Ready,
            Event::VimLeavePre => EventName::VimLeavePre,
            Event::VimResized { .. } => EventName::VimResized,
            Event::DirChanged(_) => EventName::DirChanged,
            Event::OptionSet { .. } => EventName::OptionSet,
            Event::GlobalChange { .. } => EventName::GlobalChange,
            Event::Command(_) => EventName::Command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip_is_complete() {
        for name in EventName::ALL {
            assert_eq!(name.as_str().parse::<EventName>().unwrap(), name);
        }
    }

    #[test]
    fn test_ready_uses_lowercase_wire_name() {
        assert_eq!(EventName::Ready.to_string(), "ready");
        assert!("Ready".parse::<EventName>().is_err());
    }

    #[test]
    fn test_event_name() {
        let event = Event::CursorMovedI(CursorChange::new(1, 2, 3));
        assert_eq!(event.name(), EventName::CursorMovedI);
        assert_eq!(Event::Command("format".into()).name(), EventName::Command);
    }

    #[test]
    fn test_option_value_shapes() {
        let values: Vec<OptionValue> = serde_json::from_str(r#"[true, 4, "utf-8"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                OptionValue::Bool(true),
                OptionValue::Number(4.0),
                OptionValue::String("utf-8".into())
            ]
        );
    }
}
