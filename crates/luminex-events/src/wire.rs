//! Decoding raw editor notifications into typed events.
//!
//! The editor sends `(name, [arg1, arg2, ...])`. The positional shape of each
//! event kind is fixed; extra trailing arguments are ignored so the editor
//! side can grow without breaking the host.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::event::{CursorChange, Event, EventName};

/// Errors decoding a raw notification.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Event {event} is missing argument {index}")]
    MissingArgument { event: EventName, index: usize },

    #[error("Event {event} has an invalid argument {index}: {source}")]
    InvalidArgument {
        event: EventName,
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Event {event} argument {index} is not a single character")]
    InvalidCharacter { event: EventName, index: usize },
}

/// Positional argument reader for one notification.
struct Args {
    event: EventName,
    values: std::vec::IntoIter<Value>,
    index: usize,
}

impl Args {
    fn new(event: EventName, values: Vec<Value>) -> Self {
        Self {
            event,
            values: values.into_iter(),
            index: 0,
        }
    }

    fn next<T: DeserializeOwned>(&mut self) -> Result<T, WireError> {
        let index = self.index;
        self.index += 1;
        let value = self.values.next().ok_or(WireError::MissingArgument {
            event: self.event,
            index,
        })?;
        serde_json::from_value(value).map_err(|source| WireError::InvalidArgument {
            event: self.event,
            index,
            source,
        })
    }

    fn character(&mut self) -> Result<char, WireError> {
        let index = self.index;
        let text: String = self.next()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(WireError::InvalidCharacter {
                event: self.event,
                index,
            }),
        }
    }

    fn cursor(&mut self) -> Result<CursorChange, WireError> {
        let bufnr = self.next()?;
        let (lnum, col): (u32, u32) = self.next()?;
        Ok(CursorChange::new(bufnr, lnum, col))
    }
}

impl Event {
    /// Decodes a raw `(name, args)` notification.
    pub fn decode(name: &str, args: Vec<Value>) -> Result<Event, WireError> {
        let name: EventName = name.parse()?;
        let mut a = Args::new(name, args);

        let event = match name {
            EventName::BufHidden => Event::BufHidden(a.next()?),
            EventName::BufEnter => Event::BufEnter(a.next()?),
            EventName::BufCreate => Event::BufCreate(a.next()?),
            EventName::BufUnload => Event::BufUnload(a.next()?),
            EventName::BufDetach => Event::BufDetach(a.next()?),
            EventName::BufWinEnter => Event::BufWinEnter {
                bufnr: a.next()?,
                winid: a.next()?,
            },
            EventName::BufWinLeave => Event::BufWinLeave {
                bufnr: a.next()?,
                winid: a.next()?,
            },
            EventName::BufWritePre => Event::BufWritePre {
                bufnr: a.next()?,
                bufname: a.next()?,
                changedtick: a.next()?,
            },
            EventName::BufWritePost => Event::BufWritePost {
                bufnr: a.next()?,
                changedtick: a.next()?,
            },
            EventName::BufReadCmd => Event::BufReadCmd {
                scheme: a.next()?,
                fullpath: a.next()?,
            },
            EventName::TermOpen => Event::TermOpen(a.next()?),
            EventName::TermExit => Event::TermExit {
                bufnr: a.next()?,
                status: a.next()?,
            },
            EventName::Enter => Event::Enter(a.next()?),
            EventName::LinesChanged => Event::LinesChanged(a.next()?),
            EventName::FileType => Event::FileType {
                filetype: a.next()?,
                bufnr: a.next()?,
            },
            EventName::InsertEnter => Event::InsertEnter(a.next()?),
            EventName::InsertLeave => Event::InsertLeave(a.next()?),
            EventName::InsertCharPre => Event::InsertCharPre {
                character: a.character()?,
                bufnr: a.next()?,
            },
            EventName::InsertSnippet => Event::InsertSnippet,
            EventName::TextChanged => Event::TextChanged {
                bufnr: a.next()?,
                changedtick: a.next()?,
            },
            EventName::TextChangedI => Event::TextChangedI {
                bufnr: a.next()?,
                change: a.next()?,
            },
            EventName::TextChangedP => Event::TextChangedP {
                bufnr: a.next()?,
                change: a.next()?,
            },
            EventName::TextInsert => Event::TextInsert {
                bufnr: a.next()?,
                change: a.next()?,
                character: a.character()?,
            },
            EventName::CursorMoved => Event::CursorMoved(a.cursor()?),
            EventName::CursorMovedI => Event::CursorMovedI(a.cursor()?),
            EventName::CursorHold => Event::CursorHold(a.cursor()?),
            EventName::CursorHoldI => Event::CursorHoldI(a.cursor()?),
            EventName::WinEnter => Event::WinEnter(a.next()?),
            EventName::WinLeave => Event::WinLeave(a.next()?),
            EventName::WinClosed => Event::WinClosed(a.next()?),
            EventName::WinScrolled => Event::WinScrolled(a.next()?),
            EventName::TabNew => Event::TabNew(a.next()?),
            EventName::TabClosed => Event::TabClosed(a.next()?),
            EventName::TaskExit => Event::TaskExit {
                id: a.next()?,
                code: a.next()?,
            },
            EventName::TaskStdout => Event::TaskStdout {
                id: a.next()?,
                lines: a.next()?,
            },
            EventName::TaskStderr => Event::TaskStderr {
                id: a.next()?,
                lines: a.next()?,
            },
            EventName::MenuPopupChanged => Event::MenuPopupChanged {
                popup: a.next()?,
                cursorline: a.next()?,
            },
            EventName::CompleteDone => Event::CompleteDone(a.next()?),
            EventName::CompleteStop => Event::CompleteStop {
                kind: a.next()?,
                pretext: a.next()?,
            },
            EventName::FloatBtnClick => Event::FloatBtnClick {
                bufnr: a.next()?,
                index: a.next()?,
            },
            EventName::PromptKeyPress => Event::PromptKeyPress {
                bufnr: a.next()?,
                key: a.next()?,
            },
            EventName::PromptInsert => Event::PromptInsert {
                value: a.next()?,
                bufnr: a.next()?,
            },
            EventName::InputChar => Event::InputChar {
                session: a.next()?,
                character: a.next()?,
                mode: a.next()?,
            },
            EventName::FocusGained => Event::FocusGained,
            EventName::FocusLost => Event::FocusLost,
            EventName::Ready => Event::Ready,
            EventName::VimLeavePre => Event::VimLeavePre,
            EventName::VimResized => Event::VimResized {
                columns: a.next()?,
                lines: a.next()?,
            },
            EventName::DirChanged => Event::DirChanged(a.next()?),
            EventName::OptionSet => Event::OptionSet {
                option: a.next()?,
                old: a.next()?,
                new: a.next()?,
            },
            EventName::GlobalChange => Event::GlobalChange {
                option: a.next()?,
                old: a.next()?,
                new: a.next()?,
            },
            EventName::Command => Event::Command(a.next()?),
        };

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CompleteStopKind, InsertChange, OptionValue};
    use serde_json::json;

    #[test]
    fn test_decode_cursor() {
        let event = Event::decode("CursorMovedI", vec![json!(3), json!([10, 5])]).unwrap();
        assert_eq!(event, Event::CursorMovedI(CursorChange::new(3, 10, 5)));
    }

    #[test]
    fn test_decode_insert_change() {
        let event = Event::decode(
            "TextChangedI",
            vec![
                json!(1),
                json!({"lnum": 2, "col": 4, "line": "foo", "changedtick": 9}),
            ],
        )
        .unwrap();
        assert_eq!(
            event,
            Event::TextChangedI {
                bufnr: 1,
                change: InsertChange::new(2, 4, "foo", 9),
            }
        );
    }

    #[test]
    fn test_decode_argument_order() {
        let event = Event::decode("InsertCharPre", vec![json!("é"), json!(7)]).unwrap();
        assert_eq!(event, Event::InsertCharPre { character: 'é', bufnr: 7 });

        let event = Event::decode("CompleteStop", vec![json!(""), json!("foo.")]).unwrap();
        assert_eq!(
            event,
            Event::CompleteStop {
                kind: CompleteStopKind::None,
                pretext: "foo.".into()
            }
        );

        let event =
            Event::decode("OptionSet", vec![json!("tabstop"), json!(4), json!(8)]).unwrap();
        assert!(matches!(
            event,
            Event::OptionSet { old: OptionValue::Number(_), new: OptionValue::Number(_), .. }
        ));
    }

    #[test]
    fn test_decode_empty_and_extra_args() {
        assert_eq!(Event::decode("ready", vec![]).unwrap(), Event::Ready);
        assert_eq!(
            Event::decode("BufEnter", vec![json!(2), json!("ignored")]).unwrap(),
            Event::BufEnter(2)
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            Event::decode("NoSuchEvent", vec![]),
            Err(WireError::UnknownEvent(name)) if name == "NoSuchEvent"
        ));
        assert!(matches!(
            Event::decode("TextChanged", vec![json!(1)]),
            Err(WireError::MissingArgument { index: 1, .. })
        ));
        assert!(matches!(
            Event::decode("BufEnter", vec![json!("one")]),
            Err(WireError::InvalidArgument { index: 0, .. })
        ));
        assert!(matches!(
            Event::decode("InsertCharPre", vec![json!("ab"), json!(1)]),
            Err(WireError::InvalidCharacter { index: 0, .. })
        ));
    }
}
