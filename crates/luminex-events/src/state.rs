//! Editor state derived from the event stream.
//!
//! The editor reports raw autocommands; several interesting facts are only
//! visible across events (is the user in insert mode, was the last change
//! caused by typing a character). [`EditorState`] tracks them. It is owned by
//! the dispatcher and mutated only while an event is fired, so every fire
//! observes the state left by all earlier fires.

use std::collections::VecDeque;
use std::time::Instant;

use crate::event::{BufNr, CursorChange, Event, InsertChange};

/// Last known cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPosition {
    pub bufnr: BufNr,
    pub lnum: u32,
    pub col: u32,
    pub insert: bool,
}

/// Interpreted editor state.
#[derive(Debug, Clone)]
pub struct EditorState {
    bufnr: BufNr,
    cursor: Option<CursorPosition>,
    insert_mode: bool,
    pum_visible: bool,
    pum_align_top: bool,
    last_change: Option<Instant>,
    recent_inserts: VecDeque<(BufNr, char)>,
    recent_inserts_limit: usize,
}

impl EditorState {
    pub(crate) fn new(recent_inserts_limit: usize) -> Self {
        Self {
            bufnr: 0,
            cursor: None,
            insert_mode: false,
            pum_visible: false,
            pum_align_top: false,
            last_change: None,
            recent_inserts: VecDeque::new(),
            recent_inserts_limit: recent_inserts_limit.max(1),
        }
    }

    /// Current buffer.
    pub fn bufnr(&self) -> BufNr {
        self.bufnr
    }

    /// Last cursor position, or the start of the current buffer if no cursor
    /// event has been seen yet.
    pub fn cursor(&self) -> CursorPosition {
        self.cursor.unwrap_or(CursorPosition {
            bufnr: self.bufnr,
            lnum: 1,
            col: 1,
            insert: false,
        })
    }

    pub fn insert_mode(&self) -> bool {
        self.insert_mode
    }

    /// Whether the completion popup is visible.
    pub fn pum_visible(&self) -> bool {
        self.pum_visible
    }

    /// Whether the completion popup is drawn above the cursor line.
    pub fn pum_align_top(&self) -> bool {
        self.pum_align_top
    }

    /// When the buffer text last changed.
    pub fn last_change(&self) -> Option<Instant> {
        self.last_change
    }

    /// Characters typed since the last text change, oldest first.
    pub fn recent_inserts(&self) -> Vec<(BufNr, char)> {
        self.recent_inserts.iter().copied().collect()
    }

    fn enter_insert(&mut self) {
        self.insert_mode = true;
        self.recent_inserts.clear();
    }

    fn leave_insert(&mut self) {
        self.insert_mode = false;
        self.pum_visible = false;
        self.recent_inserts.clear();
    }

    fn record_insert(&mut self, bufnr: BufNr, character: char) {
        if self.recent_inserts.len() == self.recent_inserts_limit {
            self.recent_inserts.pop_front();
        }
        self.recent_inserts.push_back((bufnr, character));
    }

    /// Applies one raw event and returns the events to deliver, in order.
    ///
    /// Synthetic `InsertEnter`/`InsertLeave` events come before the event
    /// that implied them, a synthetic `TextInsert` comes after the insert
    /// change that caused it, and an unchanged cursor event is dropped.
    pub(crate) fn apply(&mut self, event: Event, now: Instant) -> Vec<Event> {
        let mut deliveries = Vec::with_capacity(2);

        let event = match event {
            Event::InsertEnter(bufnr) => {
                self.enter_insert();
                Some(Event::InsertEnter(bufnr))
            }
            Event::InsertLeave(bufnr) => {
                self.leave_insert();
                Some(Event::InsertLeave(bufnr))
            }
            Event::BufEnter(bufnr) => {
                self.bufnr = bufnr;
                Some(Event::BufEnter(bufnr))
            }
            Event::MenuPopupChanged { popup, cursorline } => {
                self.pum_visible = true;
                self.pum_align_top = cursorline > popup.row;
                Some(Event::MenuPopupChanged { popup, cursorline })
            }
            Event::InsertCharPre { character, bufnr } => {
                self.record_insert(bufnr, character);
                Some(Event::InsertCharPre { character, bufnr })
            }
            Event::TextChanged { bufnr, changedtick } => {
                self.last_change = Some(now);
                self.recent_inserts.clear();
                Some(Event::TextChanged { bufnr, changedtick })
            }
            Event::TextChangedI { bufnr, mut change } => {
                let follow_up = self.apply_insert_change(bufnr, &mut change, now);
                deliveries.push(Event::TextChangedI { bufnr, change });
                deliveries.extend(follow_up);
                None
            }
            Event::TextChangedP { bufnr, mut change } => {
                let follow_up = self.apply_insert_change(bufnr, &mut change, now);
                deliveries.push(Event::TextChangedP { bufnr, change });
                deliveries.extend(follow_up);
                None
            }
            Event::CursorMovedI(change) => {
                self.implicit_enter(change.bufnr, &mut deliveries);
                self.apply_cursor(change, true).map(Event::CursorMovedI)
            }
            Event::CursorMoved(change) => {
                self.implicit_leave(change.bufnr, &mut deliveries);
                self.apply_cursor(change, false).map(Event::CursorMoved)
            }
            Event::CursorHoldI(change) => {
                self.implicit_enter(change.bufnr, &mut deliveries);
                Some(Event::CursorHoldI(change))
            }
            Event::CursorHold(change) => {
                self.implicit_leave(change.bufnr, &mut deliveries);
                Some(Event::CursorHold(change))
            }
            other => Some(other),
        };

        deliveries.extend(event);
        deliveries
    }

    fn implicit_enter(&mut self, bufnr: BufNr, deliveries: &mut Vec<Event>) {
        self.bufnr = bufnr;
        if !self.insert_mode {
            self.enter_insert();
            deliveries.push(Event::InsertEnter(bufnr));
        }
    }

    fn implicit_leave(&mut self, bufnr: BufNr, deliveries: &mut Vec<Event>) {
        self.bufnr = bufnr;
        if self.insert_mode {
            self.leave_insert();
            deliveries.push(Event::InsertLeave(bufnr));
        }
    }

    /// Stores the new cursor; returns `None` when it did not move.
    fn apply_cursor(&mut self, mut change: CursorChange, insert: bool) -> Option<CursorChange> {
        change.has_recent_inserts = !self.recent_inserts.is_empty();
        let cursor = CursorPosition {
            bufnr: change.bufnr,
            lnum: change.lnum,
            col: change.col,
            insert,
        };
        if self.cursor == Some(cursor) {
            return None;
        }
        self.cursor = Some(cursor);
        Some(change)
    }

    fn apply_insert_change(
        &mut self,
        bufnr: BufNr,
        change: &mut InsertChange,
        now: Instant,
    ) -> Option<Event> {
        let typed: Vec<char> = self
            .recent_inserts
            .iter()
            .filter(|(b, _)| *b == bufnr)
            .map(|(_, c)| *c)
            .collect();

        self.bufnr = bufnr;
        self.recent_inserts.clear();
        self.last_change = Some(now);

        change.pre = line_prefix(&change.line, change.col);
        // The editor sends no cursor event for this change.
        self.cursor = Some(CursorPosition {
            bufnr,
            lnum: change.lnum,
            col: change.col,
            insert: true,
        });

        let character = change.pre.chars().last()?;
        if !typed.contains(&character) {
            return None;
        }
        change.insert_char = Some(character);
        Some(Event::TextInsert {
            bufnr,
            change: change.clone(),
            character,
        })
    }
}

/// Returns the part of `line` before the 1-based byte column `col`.
///
/// The cut is clamped to the line length and moved back to the nearest
/// character boundary.
pub fn line_prefix(line: &str, col: u32) -> String {
    let mut end = (col.saturating_sub(1) as usize).min(line.len());
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    line[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PopupChange;
    use proptest::prelude::*;

    fn names(events: &[Event]) -> Vec<String> {
        events.iter().map(|e| e.name().to_string()).collect()
    }

    #[test]
    fn test_line_prefix() {
        assert_eq!(line_prefix("foo.bar", 5), "foo.");
        assert_eq!(line_prefix("foo", 1), "");
        assert_eq!(line_prefix("foo", 0), "");
        assert_eq!(line_prefix("foo", 99), "foo");
        // "é" is two bytes; a cut inside it backs off
        assert_eq!(line_prefix("aé", 3), "a");
        assert_eq!(line_prefix("aé", 4), "aé");
    }

    #[test]
    fn test_default_cursor() {
        let mut state = EditorState::new(8);
        state.apply(Event::BufEnter(4), Instant::now());
        assert_eq!(
            state.cursor(),
            CursorPosition { bufnr: 4, lnum: 1, col: 1, insert: false }
        );
    }

    #[test]
    fn test_unchanged_cursor_is_dropped() {
        let mut state = EditorState::new(8);
        let now = Instant::now();
        let first = state.apply(Event::CursorMoved(CursorChange::new(1, 2, 3)), now);
        let second = state.apply(Event::CursorMoved(CursorChange::new(1, 2, 3)), now);
        assert_eq!(names(&first), vec!["CursorMoved"]);
        assert!(second.is_empty());

        let moved = state.apply(Event::CursorMoved(CursorChange::new(1, 2, 4)), now);
        assert_eq!(names(&moved), vec!["CursorMoved"]);
    }

    #[test]
    fn test_same_position_different_mode_is_a_move() {
        let mut state = EditorState::new(8);
        let now = Instant::now();
        state.apply(Event::CursorMoved(CursorChange::new(1, 2, 3)), now);
        let events = state.apply(Event::CursorMovedI(CursorChange::new(1, 2, 3)), now);
        assert_eq!(names(&events), vec!["InsertEnter", "CursorMovedI"]);
    }

    #[test]
    fn test_implicit_insert_transitions() {
        let mut state = EditorState::new(8);
        let now = Instant::now();

        let events = state.apply(Event::CursorMovedI(CursorChange::new(1, 1, 1)), now);
        assert_eq!(names(&events), vec!["InsertEnter", "CursorMovedI"]);
        assert!(state.insert_mode());

        state.apply(Event::InsertCharPre { character: 'x', bufnr: 1 }, now);
        state.apply(
            Event::MenuPopupChanged { popup: PopupChange::default(), cursorline: 1 },
            now,
        );
        assert!(state.pum_visible());

        let events = state.apply(Event::CursorHold(CursorChange::new(1, 1, 2)), now);
        assert_eq!(names(&events), vec!["InsertLeave", "CursorHold"]);
        assert!(!state.insert_mode());
        assert!(!state.pum_visible());
        assert!(state.recent_inserts().is_empty());
    }

    #[test]
    fn test_recent_insert_flag_on_cursor() {
        let mut state = EditorState::new(8);
        let now = Instant::now();
        state.apply(Event::InsertEnter(1), now);
        state.apply(Event::InsertCharPre { character: 'a', bufnr: 1 }, now);

        let events = state.apply(Event::CursorMovedI(CursorChange::new(1, 1, 2)), now);
        match &events[..] {
            [Event::CursorMovedI(change)] => assert!(change.has_recent_inserts),
            other => panic!("unexpected deliveries {:?}", other),
        }

        // Leaving clears the ring before the flag is computed
        let events = state.apply(Event::CursorMoved(CursorChange::new(1, 1, 2)), now);
        match &events[..] {
            [Event::InsertLeave(1), Event::CursorMoved(change)] => {
                assert!(!change.has_recent_inserts)
            }
            other => panic!("unexpected deliveries {:?}", other),
        }
    }

    #[test]
    fn test_popup_alignment() {
        let mut state = EditorState::new(8);
        let popup = PopupChange { row: 10, ..PopupChange::default() };
        state.apply(Event::MenuPopupChanged { popup: popup.clone(), cursorline: 12 }, Instant::now());
        assert!(state.pum_align_top());
        state.apply(Event::MenuPopupChanged { popup, cursorline: 5 }, Instant::now());
        assert!(!state.pum_align_top());
    }

    #[test]
    fn test_typed_character_synthesizes_text_insert() {
        let mut state = EditorState::new(8);
        let now = Instant::now();
        state.apply(Event::InsertEnter(1), now);
        state.apply(Event::InsertCharPre { character: '.', bufnr: 1 }, now);

        let events = state.apply(
            Event::TextChangedI { bufnr: 1, change: InsertChange::new(3, 5, "foo.", 2) },
            now,
        );
        assert_eq!(names(&events), vec!["TextChangedI", "TextInsert"]);
        match &events[1] {
            Event::TextInsert { bufnr, change, character } => {
                assert_eq!(*bufnr, 1);
                assert_eq!(*character, '.');
                assert_eq!(change.pre, "foo.");
                assert_eq!(change.insert_char, Some('.'));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            state.cursor(),
            CursorPosition { bufnr: 1, lnum: 3, col: 5, insert: true }
        );
        assert!(state.recent_inserts().is_empty());
        assert!(state.last_change().is_some());
    }

    #[test]
    fn test_insert_from_other_buffer_does_not_synthesize() {
        let mut state = EditorState::new(8);
        let now = Instant::now();
        state.apply(Event::InsertCharPre { character: '.', bufnr: 2 }, now);
        let events = state.apply(
            Event::TextChangedI { bufnr: 1, change: InsertChange::new(1, 5, "foo.", 2) },
            now,
        );
        assert_eq!(names(&events), vec!["TextChangedI"]);
    }

    #[test]
    fn test_ring_is_bounded() {
        let mut state = EditorState::new(2);
        let now = Instant::now();
        for c in ['a', 'b', 'c'] {
            state.apply(Event::InsertCharPre { character: c, bufnr: 1 }, now);
        }
        assert_eq!(state.recent_inserts(), vec![(1, 'b'), (1, 'c')]);
    }

    proptest! {
        #[test]
        fn prop_line_prefix_is_a_prefix(line in ".{0,40}", col in 0u32..80) {
            let pre = line_prefix(&line, col);
            prop_assert!(line.starts_with(&pre));
            prop_assert!(pre.len() <= col.saturating_sub(1) as usize);
        }
    }
}
