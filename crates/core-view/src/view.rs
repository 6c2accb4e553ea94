//! A view: one document shown with caret, anchor and scroll state.
//!
//! The runtime keeps one view per ring buffer plus a single shared view for
//! Q-Register documents. Views are plain data; all operations that touch
//! text go through the [`DocStore`] so the document's undo history is
//! maintained no matter which view drove the change.

use tracing::trace;

use crate::store::{DocId, DocStore};
use crate::Result;

#[derive(Debug, Clone)]
pub struct View {
    pub doc: DocId,
    pub anchor: usize,
    pub dot: usize,
    pub first_line: usize,
    pub xoffset: i64,
}

/// Replayable view messages. Undo tokens store these with owned parameters
/// and re-send them on rub-out, mirroring the widget's message protocol.
#[derive(Debug, Clone)]
pub enum ViewMessage {
    GotoPos(usize),
    SetSel { anchor: usize, dot: usize },
    SetFirstVisibleLine(usize),
    SetXOffset(i64),
    /// Revert the document's most recent undo action group.
    Undo,
}

impl View {
    pub fn new(doc: DocId) -> Self {
        Self {
            doc,
            anchor: 0,
            dot: 0,
            first_line: 0,
            xoffset: 0,
        }
    }

    pub fn goto_pos(&mut self, store: &DocStore, pos: usize) {
        let clamped = pos.min(store.len(self.doc));
        self.dot = clamped;
        self.anchor = clamped;
    }

    pub fn set_sel(&mut self, store: &DocStore, anchor: usize, dot: usize) {
        let len = store.len(self.doc);
        self.anchor = anchor.min(len);
        self.dot = dot.min(len);
    }

    /// Insert text at dot, advancing dot and anchor past it.
    pub fn add_text(&mut self, store: &mut DocStore, bytes: &[u8]) -> Result<()> {
        let before = store.len(self.doc);
        store.append_at(self.doc, self.dot, bytes)?;
        let added = store.len(self.doc) - before;
        self.dot += added;
        self.anchor = self.dot;
        trace!(target: "view", added, dot = self.dot, "add_text");
        Ok(())
    }

    /// Delete `len` positions starting at `pos`, keeping dot stable relative
    /// to the surviving text.
    pub fn delete_range(&mut self, store: &mut DocStore, pos: usize, len: usize) {
        store.delete_text(self.doc, pos, len);
        let end = pos + len;
        for p in [&mut self.dot, &mut self.anchor] {
            if *p > end {
                *p -= len;
            } else if *p > pos {
                *p = pos;
            }
        }
        trace!(target: "view", pos, len, dot = self.dot, "delete_range");
    }

    pub fn apply(&mut self, store: &mut DocStore, msg: &ViewMessage) {
        match *msg {
            ViewMessage::GotoPos(pos) => self.goto_pos(store, pos),
            ViewMessage::SetSel { anchor, dot } => self.set_sel(store, anchor, dot),
            ViewMessage::SetFirstVisibleLine(line) => self.first_line = line,
            ViewMessage::SetXOffset(x) => self.xoffset = x,
            ViewMessage::Undo => {
                store.perform_undo(self.doc);
                let len = store.len(self.doc);
                self.dot = self.dot.min(len);
                self.anchor = self.anchor.min(len);
            }
        }
    }
}

impl DocStore {
    /// Insert foreign bytes at an arbitrary position (helper for views).
    pub(crate) fn append_at(&mut self, id: DocId, pos: usize, bytes: &[u8]) -> Result<()> {
        let text = match self.codepage(id) {
            crate::Codepage::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|_| crate::ViewError::InvalidUtf8)?,
            crate::Codepage::SingleByte => bytes.iter().map(|&b| b as char).collect(),
        };
        self.insert_text(id, pos, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Codepage;

    fn fixture() -> (DocStore, View) {
        let mut store = DocStore::new();
        let id = store.create(Codepage::Utf8);
        (store, View::new(id))
    }

    #[test]
    fn add_text_advances_dot() {
        let (mut store, mut view) = fixture();
        view.add_text(&mut store, b"abc").unwrap();
        assert_eq!(view.dot, 3);
        view.goto_pos(&store, 1);
        view.add_text(&mut store, "€".as_bytes()).unwrap();
        assert_eq!(view.dot, 2); // one position, not three bytes
        assert_eq!(store.get_bytes(view.doc), "a€bc".as_bytes());
    }

    #[test]
    fn delete_keeps_dot_stable() {
        let (mut store, mut view) = fixture();
        view.add_text(&mut store, b"0123456789").unwrap();
        view.goto_pos(&store, 8);
        view.delete_range(&mut store, 2, 4);
        assert_eq!(store.get_bytes(view.doc), b"016789");
        assert_eq!(view.dot, 4);
        view.delete_range(&mut store, 3, 3);
        assert_eq!(view.dot, 3);
    }

    #[test]
    fn undo_message_replays() {
        let (mut store, mut view) = fixture();
        view.add_text(&mut store, b"keep").unwrap();
        store.begin_undo_action(view.doc);
        view.delete_range(&mut store, 0, 4);
        store.end_undo_action(view.doc);
        view.apply(&mut store, &ViewMessage::Undo);
        assert_eq!(store.get_bytes(view.doc), b"keep");
    }
}
