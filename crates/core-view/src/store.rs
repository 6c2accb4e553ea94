//! Reference-counted document storage.
//!
//! Documents survive independently of any view: Q-Registers hold handles to
//! documents that may never be displayed, and undo tokens keep documents
//! alive after their register or buffer was destroyed. Hence the explicit
//! `addref`/`release` pair instead of Rust ownership; the runtime mirrors
//! the acquire/release discipline the external widget imposed.

use std::collections::HashMap;

use ropey::Rope;
use tracing::trace;

use crate::{Result, ViewError};

/// Opaque handle to a document inside a [`DocStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocId(pub(crate) u64);

/// Document encoding. UTF-8 documents address code points; single-byte
/// documents address raw bytes (stored internally as U+0000..U+00FF so the
/// rope representation stays uniform).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codepage {
    #[default]
    Utf8,
    SingleByte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EolMode {
    #[default]
    Lf,
    CrLf,
    Cr,
}

impl EolMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EolMode::Lf => "\n",
            EolMode::CrLf => "\r\n",
            EolMode::Cr => "\r",
        }
    }
}

/// One reversible text change. A group of these forms one undo action.
#[derive(Debug)]
enum Change {
    Insert { pos: usize, len: usize },
    Delete { pos: usize, text: String },
}

#[derive(Debug)]
struct Document {
    rope: Rope,
    codepage: Codepage,
    eol_mode: EolMode,
    refs: u32,
    /// Completed undo action groups, oldest first.
    undo: Vec<Vec<Change>>,
    /// Nesting depth of begin/end action brackets. While > 0, changes are
    /// appended to the open group.
    action_depth: u32,
    /// Styling bytes, parallel to the rope's UTF-8 bytes up to `styled_to`.
    styles: Vec<u8>,
    styled_to: usize,
    styling_pos: usize,
    /// Per-line lexer state (safe restart column), -1 when unknown.
    line_states: Vec<i64>,
}

impl Document {
    fn new(codepage: Codepage) -> Self {
        Self {
            rope: Rope::new(),
            codepage,
            eol_mode: EolMode::default(),
            refs: 1,
            undo: Vec::new(),
            action_depth: 0,
            styles: Vec::new(),
            styled_to: 0,
            styling_pos: 0,
            line_states: Vec::new(),
        }
    }

    fn record(&mut self, change: Change) {
        if self.action_depth > 0 {
            if let Some(group) = self.undo.last_mut() {
                group.push(change);
                return;
            }
        }
        self.undo.push(vec![change]);
    }

    /// Invalidate styling and line states past an edit.
    fn styling_edited(&mut self, byte_pos: usize, line: usize) {
        self.styled_to = self.styled_to.min(byte_pos);
        self.line_states.truncate(line);
    }
}

/// All documents of one runtime instance.
#[derive(Default)]
pub struct DocStore {
    docs: HashMap<u64, Document>,
    next_id: u64,
}

impl DocStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, codepage: Codepage) -> DocId {
        self.next_id += 1;
        let id = self.next_id;
        self.docs.insert(id, Document::new(codepage));
        trace!(target: "view.store", id, "create_document");
        DocId(id)
    }

    pub fn addref(&mut self, id: DocId) {
        if let Some(doc) = self.docs.get_mut(&id.0) {
            doc.refs += 1;
        }
    }

    pub fn release(&mut self, id: DocId) {
        if let Some(doc) = self.docs.get_mut(&id.0) {
            doc.refs -= 1;
            if doc.refs == 0 {
                self.docs.remove(&id.0);
                trace!(target: "view.store", id = id.0, "destroy_document");
            }
        }
    }

    fn doc(&self, id: DocId) -> &Document {
        self.docs.get(&id.0).expect("stale document handle")
    }

    fn doc_mut(&mut self, id: DocId) -> &mut Document {
        self.docs.get_mut(&id.0).expect("stale document handle")
    }

    pub fn codepage(&self, id: DocId) -> Codepage {
        self.doc(id).codepage
    }

    pub fn set_codepage(&mut self, id: DocId, cp: Codepage) {
        self.doc_mut(id).codepage = cp;
    }

    pub fn eol_mode(&self, id: DocId) -> EolMode {
        self.doc(id).eol_mode
    }

    pub fn set_eol_mode(&mut self, id: DocId, mode: EolMode) {
        self.doc_mut(id).eol_mode = mode;
    }

    /// Length in positions (code points).
    pub fn len(&self, id: DocId) -> usize {
        self.doc(id).rope.len_chars()
    }

    pub fn len_bytes(&self, id: DocId) -> usize {
        self.doc(id).rope.len_bytes()
    }

    pub fn len_lines(&self, id: DocId) -> usize {
        self.doc(id).rope.len_lines()
    }

    /// Aggregate byte size of all live documents, for the memory limit.
    pub fn total_bytes(&self) -> usize {
        self.docs.values().map(|d| d.rope.len_bytes()).sum()
    }

    /// Decode foreign bytes into rope text according to the codepage.
    fn decode(codepage: Codepage, bytes: &[u8]) -> Result<String> {
        match codepage {
            Codepage::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|_| ViewError::InvalidUtf8),
            Codepage::SingleByte => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    fn encode(codepage: Codepage, text: &str) -> Vec<u8> {
        match codepage {
            Codepage::Utf8 => text.as_bytes().to_vec(),
            // Characters above U+00FF cannot get into a single-byte document,
            // every insertion path checks first.
            Codepage::SingleByte => text.chars().map(|c| c as u32 as u8).collect(),
        }
    }

    /// Check that `text` is storable under the document's codepage.
    fn check_storable(codepage: Codepage, text: &str) -> Result<()> {
        if codepage == Codepage::SingleByte {
            for c in text.chars() {
                if c as u32 > 0xff {
                    return Err(ViewError::Unrepresentable(c as u32));
                }
            }
        }
        Ok(())
    }

    pub fn get_bytes(&self, id: DocId) -> Vec<u8> {
        let doc = self.doc(id);
        Self::encode(doc.codepage, &doc.rope.to_string())
    }

    /// Byte encoding of the position range `[from, to)`.
    pub fn get_range_bytes(&self, id: DocId, from: usize, to: usize) -> Vec<u8> {
        let doc = self.doc(id);
        let slice = doc.rope.slice(from..to);
        Self::encode(doc.codepage, &slice.to_string())
    }

    pub fn char_at(&self, id: DocId, pos: usize) -> Option<char> {
        let doc = self.doc(id);
        if pos < doc.rope.len_chars() {
            Some(doc.rope.char(pos))
        } else {
            None
        }
    }

    pub fn line_of_pos(&self, id: DocId, pos: usize) -> usize {
        let doc = self.doc(id);
        doc.rope.char_to_line(pos.min(doc.rope.len_chars()))
    }

    pub fn pos_of_line(&self, id: DocId, line: usize) -> usize {
        let doc = self.doc(id);
        if line >= doc.rope.len_lines() {
            doc.rope.len_chars()
        } else {
            doc.rope.line_to_char(line)
        }
    }

    pub fn byte_of_pos(&self, id: DocId, pos: usize) -> usize {
        let doc = self.doc(id);
        doc.rope.char_to_byte(pos.min(doc.rope.len_chars()))
    }

    pub fn pos_of_byte(&self, id: DocId, byte: usize) -> usize {
        let doc = self.doc(id);
        doc.rope.byte_to_char(byte.min(doc.rope.len_bytes()))
    }

    /// Insert pre-decoded text; records an undo change.
    pub(crate) fn insert_text(&mut self, id: DocId, pos: usize, text: &str) -> Result<()> {
        let doc = self.doc_mut(id);
        Self::check_storable(doc.codepage, text)?;
        let byte_pos = doc.rope.char_to_byte(pos);
        let line = doc.rope.char_to_line(pos);
        doc.rope.insert(pos, text);
        doc.record(Change::Insert {
            pos,
            len: text.chars().count(),
        });
        doc.styling_edited(byte_pos, line);
        Ok(())
    }

    /// Delete `len` positions starting at `pos`; records an undo change.
    pub fn delete_text(&mut self, id: DocId, pos: usize, len: usize) {
        let doc = self.doc_mut(id);
        let end = (pos + len).min(doc.rope.len_chars());
        let pos = pos.min(end);
        if pos == end {
            return;
        }
        let removed = doc.rope.slice(pos..end).to_string();
        let byte_pos = doc.rope.char_to_byte(pos);
        let line = doc.rope.char_to_line(pos);
        doc.rope.remove(pos..end);
        doc.record(Change::Delete { pos, text: removed });
        doc.styling_edited(byte_pos, line);
    }

    /// Append foreign bytes, decoding per the document codepage.
    pub fn append_bytes(&mut self, id: DocId, bytes: &[u8]) -> Result<()> {
        let text = Self::decode(self.doc(id).codepage, bytes)?;
        let pos = self.len(id);
        self.insert_text(id, pos, &text)
    }

    /// Replace the entire document contents.
    pub fn set_bytes(&mut self, id: DocId, bytes: &[u8]) -> Result<()> {
        let len = self.len(id);
        self.delete_text(id, 0, len);
        self.append_bytes(id, bytes)
    }

    pub fn begin_undo_action(&mut self, id: DocId) {
        let doc = self.doc_mut(id);
        if doc.action_depth == 0 {
            doc.undo.push(Vec::new());
        }
        doc.action_depth += 1;
    }

    pub fn end_undo_action(&mut self, id: DocId) {
        let doc = self.doc_mut(id);
        doc.action_depth = doc.action_depth.saturating_sub(1);
        if doc.action_depth == 0 && doc.undo.last().is_some_and(Vec::is_empty) {
            doc.undo.pop();
        }
    }

    /// Revert the most recent undo action group.
    pub fn perform_undo(&mut self, id: DocId) {
        let Some(group) = self.doc_mut(id).undo.pop() else {
            return;
        };
        for change in group.into_iter().rev() {
            let doc = self.doc_mut(id);
            match change {
                Change::Insert { pos, len } => {
                    let end = (pos + len).min(doc.rope.len_chars());
                    let byte_pos = doc.rope.char_to_byte(pos.min(end));
                    let line = doc.rope.char_to_line(pos.min(end));
                    doc.rope.remove(pos.min(end)..end);
                    doc.styling_edited(byte_pos, line);
                }
                Change::Delete { pos, text } => {
                    let byte_pos = doc.rope.char_to_byte(pos.min(doc.rope.len_chars()));
                    let line = doc.rope.char_to_line(pos.min(doc.rope.len_chars()));
                    doc.rope.insert(pos.min(doc.rope.len_chars()), &text);
                    doc.styling_edited(byte_pos, line);
                }
            }
        }
    }

    /// Drop the undo history of one document (on command-line commit).
    pub fn clear_undo(&mut self, id: DocId) {
        let doc = self.doc_mut(id);
        doc.undo.clear();
        doc.action_depth = 0;
    }

    pub fn clear_all_undo(&mut self) {
        for doc in self.docs.values_mut() {
            doc.undo.clear();
            doc.action_depth = 0;
        }
    }

    /*
     * Styling, used only by the lexer. All positions are byte offsets.
     */

    pub fn end_styled(&self, id: DocId) -> usize {
        self.doc(id).styled_to
    }

    pub fn start_styling(&mut self, id: DocId, byte_pos: usize) {
        self.doc_mut(id).styling_pos = byte_pos;
    }

    pub fn set_styling(&mut self, id: DocId, len: usize, style: u8) {
        let doc = self.doc_mut(id);
        let end = (doc.styling_pos + len).min(doc.rope.len_bytes());
        if doc.styles.len() < end {
            doc.styles.resize(end, 0);
        }
        for slot in &mut doc.styles[doc.styling_pos..end] {
            *slot = style;
        }
        doc.styling_pos = end;
        doc.styled_to = doc.styled_to.max(end);
    }

    pub fn style_at(&self, id: DocId, byte_pos: usize) -> u8 {
        self.doc(id).styles.get(byte_pos).copied().unwrap_or(0)
    }

    pub fn set_line_state(&mut self, id: DocId, line: usize, state: i64) {
        let doc = self.doc_mut(id);
        if doc.line_states.len() <= line {
            doc.line_states.resize(line + 1, -1);
        }
        doc.line_states[line] = state;
    }

    pub fn line_state(&self, id: DocId, line: usize) -> i64 {
        self.doc(id).line_states.get(line).copied().unwrap_or(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcounting_destroys_at_zero() {
        let mut store = DocStore::new();
        let id = store.create(Codepage::Utf8);
        store.addref(id);
        store.release(id);
        assert_eq!(store.len(id), 0); // still alive
        store.release(id);
        assert!(store.docs.is_empty());
    }

    #[test]
    fn single_byte_round_trip() {
        let mut store = DocStore::new();
        let id = store.create(Codepage::SingleByte);
        store.append_bytes(id, &[0x41, 0xff, 0x00]).unwrap();
        assert_eq!(store.get_bytes(id), vec![0x41, 0xff, 0x00]);
        assert_eq!(store.len(id), 3);
    }

    #[test]
    fn utf8_rejects_garbage() {
        let mut store = DocStore::new();
        let id = store.create(Codepage::Utf8);
        assert!(store.append_bytes(id, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn undo_action_grouping() {
        let mut store = DocStore::new();
        let id = store.create(Codepage::Utf8);
        store.append_bytes(id, b"hello world").unwrap();
        store.begin_undo_action(id);
        store.delete_text(id, 0, 6);
        store.insert_text(id, 0, "goodbye ").unwrap();
        store.end_undo_action(id);
        assert_eq!(store.get_bytes(id), b"goodbye world");
        store.perform_undo(id);
        assert_eq!(store.get_bytes(id), b"hello world");
        store.perform_undo(id);
        assert_eq!(store.get_bytes(id), b"");
    }

    #[test]
    fn line_position_mapping() {
        let mut store = DocStore::new();
        let id = store.create(Codepage::Utf8);
        store.append_bytes(id, b"one\ntwo\nthree").unwrap();
        assert_eq!(store.line_of_pos(id, 0), 0);
        assert_eq!(store.line_of_pos(id, 4), 1);
        assert_eq!(store.pos_of_line(id, 1), 4);
        assert_eq!(store.pos_of_line(id, 99), store.len(id));
    }
}
