//! Q-Registers: named cells holding a 64-bit integer and a document.
//!
//! Registers come in variants that override parts of the operation set:
//! plain registers store everything locally, the dot alias reflects the
//! caret of the current view, buffer-info mirrors the buffer ring, the
//! working-directory register chdirs on assignment, clipboard registers
//! delegate to the display interface and environment registers to the
//! process environment. Dispatch is a `match` on the variant tag per
//! operation; only plain-ish registers own documents.
//!
//! Tables are ordered maps. The globals table lives for the whole process;
//! one locals table is stacked per macro invocation, with only the
//! top-level locals participating in undo (a macro call is rubbed out as a
//! unit, so its locals never need token-wise restore).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use core_view::{Codepage, DocId, DocStore, View};
use tracing::trace;

use crate::error::{ErrorKind, Result, TecoError};
use crate::{fileio, undo, Current, Runtime};

/// Register name of the radix register (`^R`), local to each table.
pub const NAME_RADIX: &[u8] = b"\x12";
/// Register name of the flags register (`^E`).
pub const NAME_ED: &[u8] = b"\x05";
/// Register holding the replacement command line (`ESC`).
pub const NAME_ESCAPE: &[u8] = b"\x1b";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSel {
    Globals,
    Locals(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QRegKind {
    Plain,
    /// `.` — the current view's caret.
    Dot,
    /// `*` — current buffer id / filename.
    BufferInfo,
    /// `$` — process working directory; assignment chdirs.
    WorkingDir,
    /// `~…` — display clipboards; the name suffix selects which.
    Clipboard,
    /// `$NAME` — process environment variable.
    Environ,
    /// `^R` — the table's numeric radix.
    Radix,
    /// `^E` — the ED flag word.
    EdFlags,
}

/// A register's document part: a lazily created handle plus the view state
/// to restore when the register is edited again.
#[derive(Debug, Clone, Default)]
pub struct QRegDoc {
    pub handle: Option<DocId>,
    pub anchor: usize,
    pub dot: usize,
    pub first_line: usize,
    pub xoffset: i64,
}

impl QRegDoc {
    pub fn save_from_view(&mut self, view: &View) {
        self.anchor = view.anchor;
        self.dot = view.dot;
        self.first_line = view.first_line;
        self.xoffset = view.xoffset;
    }

    pub fn restore_to_view(&self, view: &mut View) {
        if let Some(handle) = self.handle {
            view.doc = handle;
        }
        view.anchor = self.anchor;
        view.dot = self.dot;
        view.first_line = self.first_line;
        view.xoffset = self.xoffset;
    }

    fn release(self, docs: &mut DocStore) {
        if let Some(handle) = self.handle {
            docs.release(handle);
        }
    }
}

#[derive(Debug)]
pub struct QReg {
    pub kind: QRegKind,
    pub integer: i64,
    pub doc: QRegDoc,
}

impl QReg {
    fn new(kind: QRegKind) -> Self {
        Self {
            kind,
            integer: 0,
            doc: QRegDoc::default(),
        }
    }

    fn ensure_doc(&mut self, docs: &mut DocStore, cp: Codepage) -> DocId {
        *self.doc.handle.get_or_insert_with(|| docs.create(cp))
    }
}

pub struct QRegTable {
    regs: BTreeMap<Vec<u8>, QReg>,
    pub must_undo: bool,
    pub radix: i64,
}

impl QRegTable {
    fn new(must_undo: bool) -> Self {
        Self {
            regs: BTreeMap::new(),
            must_undo,
            radix: 10,
        }
    }

    pub fn get(&self, name: &[u8]) -> Option<&QReg> {
        self.regs.get(name)
    }

    pub fn get_mut(&mut self, name: &[u8]) -> Option<&mut QReg> {
        self.regs.get_mut(name)
    }

    pub fn insert(&mut self, name: Vec<u8>, reg: QReg) {
        self.regs.insert(name, reg);
    }

    pub fn remove(&mut self, name: &[u8]) -> Option<QReg> {
        self.regs.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.regs.keys()
    }

    fn drain_docs(&mut self, docs: &mut DocStore) {
        for (_, reg) in std::mem::take(&mut self.regs) {
            reg.doc.release(docs);
        }
    }
}

/// Globals plus the stack of per-invocation locals tables. Index 0 is the
/// top-level (interactive) locals table, which is always present.
pub struct QRegTables {
    pub globals: QRegTable,
    pub locals: Vec<QRegTable>,
}

impl QRegTables {
    pub fn new() -> Self {
        let mut globals = QRegTable::new(true);
        for c in b'A'..=b'Z' {
            globals.insert(vec![c], QReg::new(QRegKind::Plain));
        }
        for c in b'0'..=b'9' {
            globals.insert(vec![c], QReg::new(QRegKind::Plain));
        }
        globals.insert(b"_".to_vec(), QReg::new(QRegKind::Plain));
        globals.insert(NAME_ESCAPE.to_vec(), QReg::new(QRegKind::Plain));
        globals.insert(b"*".to_vec(), QReg::new(QRegKind::BufferInfo));
        globals.insert(b".".to_vec(), QReg::new(QRegKind::Dot));
        globals.insert(b"$".to_vec(), QReg::new(QRegKind::WorkingDir));
        globals.insert(NAME_ED.to_vec(), QReg::new(QRegKind::EdFlags));

        Self {
            globals,
            locals: vec![Self::fresh_locals(true)],
        }
    }

    fn fresh_locals(must_undo: bool) -> QRegTable {
        let mut table = QRegTable::new(must_undo);
        table.insert(NAME_RADIX.to_vec(), QReg::new(QRegKind::Radix));
        table
    }

    /// Register the display clipboards; called once the interface is known.
    pub fn init_clipboards(&mut self) {
        for name in [&b"~"[..], b"~C", b"~P", b"~S"] {
            self.globals.insert(name.to_vec(), QReg::new(QRegKind::Clipboard));
        }
    }

    /// Import the process environment as `$NAME` registers.
    pub fn init_environ(&mut self) {
        for (key, _) in std::env::vars_os() {
            let mut name = b"$".to_vec();
            name.extend_from_slice(key.to_string_lossy().as_bytes());
            self.globals.insert(name, QReg::new(QRegKind::Environ));
        }
    }

    pub fn table(&self, sel: TableSel) -> &QRegTable {
        match sel {
            TableSel::Globals => &self.globals,
            TableSel::Locals(i) => &self.locals[i],
        }
    }

    pub fn table_mut(&mut self, sel: TableSel) -> &mut QRegTable {
        match sel {
            TableSel::Globals => &mut self.globals,
            TableSel::Locals(i) => &mut self.locals[i],
        }
    }

    /// Locals index valid for `sel`-style lookups; `None` once the macro
    /// frame it belonged to is gone (stale undo tokens).
    pub fn get(&self, sel: TableSel, name: &[u8]) -> Option<&QReg> {
        match sel {
            TableSel::Globals => self.globals.get(name),
            TableSel::Locals(i) => self.locals.get(i)?.get(name),
        }
    }

    pub fn get_mut(&mut self, sel: TableSel, name: &[u8]) -> Option<&mut QReg> {
        match sel {
            TableSel::Globals => self.globals.get_mut(name),
            TableSel::Locals(i) => self.locals.get_mut(i)?.get_mut(name),
        }
    }

    pub fn push_locals(&mut self, must_undo: bool) -> usize {
        self.locals.push(Self::fresh_locals(must_undo));
        self.locals.len() - 1
    }

    pub fn pop_locals(&mut self, docs: &mut DocStore) {
        let mut table = self.locals.pop().expect("locals stack underflow");
        table.drain_docs(docs);
    }
}

impl Default for QRegTables {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot on the register push-down stack (`[q` … `]q`).
pub struct QRegStackEntry {
    pub integer: i64,
    pub doc: QRegDoc,
}

fn missing(sel: TableSel, name: &[u8]) -> TecoError {
    TecoError::invalid_qreg(name, matches!(sel, TableSel::Locals(_)))
}

/// Create a plain register on demand (`^Uq`, `Uq`, long-name access).
/// Creation is undone on rub-out so a rubbed-out definition leaves no
/// empty register behind.
pub fn ensure_reg(rt: &mut Runtime, sel: TableSel, name: &[u8]) {
    if rt.qregs.get(sel, name).is_some() {
        return;
    }
    rt.qregs
        .table_mut(sel)
        .insert(name.to_vec(), QReg::new(QRegKind::Plain));
    if rt.qregs.table(sel).must_undo {
        let name = name.to_vec();
        rt.undo.push(move |rt, _| {
            if let Some(reg) = rt.qregs.table_mut(sel).remove(&name) {
                let doc = reg.doc;
                if let Some(h) = doc.handle {
                    rt.docs.release(h);
                }
            }
        });
    }
}

pub fn exists(rt: &Runtime, sel: TableSel, name: &[u8]) -> bool {
    rt.qregs.get(sel, name).is_some()
}

fn kind_of(rt: &Runtime, sel: TableSel, name: &[u8]) -> Result<QRegKind> {
    rt.qregs
        .get(sel, name)
        .map(|r| r.kind)
        .ok_or_else(|| missing(sel, name))
}

/*
 * Integer part
 */

pub fn get_integer(rt: &Runtime, sel: TableSel, name: &[u8]) -> Result<i64> {
    match kind_of(rt, sel, name)? {
        QRegKind::Dot => Ok(rt.current_view().dot as i64),
        QRegKind::BufferInfo => Ok(rt.ring.current_id()),
        QRegKind::Radix => Ok(rt.qregs.table(sel).radix),
        QRegKind::EdFlags => Ok(rt.ed.0),
        _ => Ok(rt.qregs.get(sel, name).unwrap().integer),
    }
}

pub fn set_integer(rt: &mut Runtime, sel: TableSel, name: &[u8], value: i64) -> Result<i64> {
    let must_undo = rt.qregs.table(sel).must_undo;
    match kind_of(rt, sel, name)? {
        QRegKind::Dot => {
            let pos = value.max(0) as usize;
            rt.push_view_msg_undo();
            let (docs, view) = rt.docs_and_current_view();
            view.goto_pos(docs, pos);
        }
        QRegKind::BufferInfo => {
            // the buffer id is derived state; assignment is a no-op
        }
        QRegKind::Radix => {
            if !(2..=36).contains(&value) {
                return Err(TecoError::range("^R"));
            }
            let old = rt.qregs.table(sel).radix;
            if must_undo {
                rt.undo
                    .push(move |rt, _| rt.qregs.table_mut(sel).radix = old);
            }
            rt.qregs.table_mut(sel).radix = value;
        }
        QRegKind::EdFlags => {
            let old = rt.ed;
            if must_undo {
                rt.undo.push(move |rt, _| rt.ed = old);
            }
            rt.ed = crate::edflags::EdFlags(value);
        }
        _ => {
            let reg = rt.qregs.get_mut(sel, name).unwrap();
            let old = reg.integer;
            reg.integer = value;
            if must_undo {
                let name = name.to_vec();
                rt.undo.push(move |rt, _| {
                    if let Some(reg) = rt.qregs.get_mut(sel, &name) {
                        reg.integer = old;
                    }
                });
            }
        }
    }
    Ok(value)
}

/*
 * String part
 */

fn env_key(name: &[u8]) -> String {
    String::from_utf8_lossy(&name[1..]).into_owned()
}

fn clipboard_name(name: &[u8]) -> String {
    String::from_utf8_lossy(&name[1..]).into_owned()
}

pub fn get_string(rt: &mut Runtime, sel: TableSel, name: &[u8]) -> Result<(Vec<u8>, Codepage)> {
    match kind_of(rt, sel, name)? {
        QRegKind::Environ => {
            let value = std::env::var_os(env_key(name)).unwrap_or_default();
            Ok((
                value.to_string_lossy().into_owned().into_bytes(),
                Codepage::Utf8,
            ))
        }
        QRegKind::WorkingDir => {
            let cwd = std::env::current_dir()
                .map_err(|e| TecoError::failed(format!("Cannot get working directory: {e}")))?;
            Ok((
                cwd.to_string_lossy().into_owned().into_bytes(),
                Codepage::Utf8,
            ))
        }
        QRegKind::Clipboard => {
            let data = rt.interface.get_clipboard(&clipboard_name(name))?;
            Ok((data, Codepage::Utf8))
        }
        QRegKind::BufferInfo => {
            let filename = rt
                .ring
                .current()
                .filename
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok((filename.into_bytes(), Codepage::Utf8))
        }
        QRegKind::Dot => Err(TecoError::failed("Q-Register \".\" has no string part")),
        _ => {
            let reg = rt.qregs.get(sel, name).unwrap();
            match reg.doc.handle {
                Some(h) => Ok((rt.docs.get_bytes(h), rt.docs.codepage(h))),
                None => Ok((Vec::new(), rt.default_codepage)),
            }
        }
    }
}

pub fn set_string(rt: &mut Runtime, sel: TableSel, name: &[u8], bytes: &[u8], cp: Codepage) -> Result<()> {
    let must_undo = rt.qregs.table(sel).must_undo;
    match kind_of(rt, sel, name)? {
        QRegKind::Environ => {
            let key = env_key(name);
            let old = std::env::var_os(&key);
            let value = String::from_utf8_lossy(bytes).into_owned();
            // Safety: the runtime is strictly single-threaded.
            unsafe { std::env::set_var(&key, &value) };
            if must_undo {
                rt.undo.push(move |_, _| unsafe {
                    match &old {
                        Some(v) => std::env::set_var(&key, v),
                        None => std::env::remove_var(&key),
                    }
                });
            }
            Ok(())
        }
        QRegKind::WorkingDir => {
            let old = std::env::current_dir().ok();
            let dir = PathBuf::from(String::from_utf8_lossy(bytes).into_owned());
            std::env::set_current_dir(&dir)
                .map_err(|e| TecoError::failed(format!("Cannot change to directory \"{}\": {e}", dir.display())))?;
            if must_undo {
                rt.undo.push(move |_, _| {
                    if let Some(old) = &old {
                        let _ = std::env::set_current_dir(old);
                    }
                });
            }
            Ok(())
        }
        QRegKind::Clipboard => {
            let clip = clipboard_name(name);
            let old = rt.interface.get_clipboard(&clip).unwrap_or_default();
            rt.interface.set_clipboard(&clip, bytes)?;
            if must_undo {
                rt.undo.push(move |rt, _| {
                    let _ = rt.interface.set_clipboard(&clip, &old);
                });
            }
            Ok(())
        }
        QRegKind::Dot | QRegKind::BufferInfo => {
            Err(TecoError::failed("Q-Register has no settable string part"))
        }
        _ => plain_set_string(rt, sel, name, bytes, cp),
    }
}

/// Replace a plain register's document. The old document moves into the
/// undo token unscathed, so rub-out restores it in O(1) regardless of size.
fn plain_set_string(rt: &mut Runtime, sel: TableSel, name: &[u8], bytes: &[u8], cp: Codepage) -> Result<()> {
    let must_undo = rt.qregs.table(sel).must_undo;

    let new_id = rt.docs.create(cp);
    if let Err(e) = rt.docs.append_bytes(new_id, bytes) {
        rt.docs.release(new_id);
        return Err(TecoError::new(ErrorKind::CodePoint, e.to_string()));
    }

    let reg = rt
        .qregs
        .get_mut(sel, name)
        .ok_or_else(|| missing(sel, name))?;
    let old = std::mem::take(&mut reg.doc);
    reg.doc.handle = Some(new_id);

    let editing = rt.current == Current::QReg(sel, name.to_vec());
    if editing {
        rt.qreg_view.doc = new_id;
        let len = rt.docs.len(new_id);
        rt.qreg_view.dot = rt.qreg_view.dot.min(len);
        rt.qreg_view.anchor = rt.qreg_view.anchor.min(len);
    }

    if must_undo {
        let name = name.to_vec();
        undo::push_owning(
            rt,
            old,
            move |old, rt, _| {
                if let Some(reg) = rt.qregs.get_mut(sel, &name) {
                    let new = std::mem::replace(&mut reg.doc, old);
                    if rt.current == Current::QReg(sel, name.clone()) {
                        let doc = rt.qregs.get(sel, &name).unwrap().doc.clone();
                        // a register whose document was never created falls
                        // back to the scratch document in the view
                        rt.qreg_view.doc = doc.handle.unwrap_or(rt.qreg_scratch);
                        doc.restore_to_view(&mut rt.qreg_view);
                    }
                    new.release(&mut rt.docs);
                } else {
                    old.release(&mut rt.docs);
                }
            },
            |old, rt| old.release(&mut rt.docs),
        );
    } else {
        old.release(&mut rt.docs);
    }
    Ok(())
}

pub fn append_string(rt: &mut Runtime, sel: TableSel, name: &[u8], bytes: &[u8]) -> Result<()> {
    let must_undo = rt.qregs.table(sel).must_undo;
    match kind_of(rt, sel, name)? {
        QRegKind::Environ | QRegKind::WorkingDir | QRegKind::Clipboard => {
            let (mut s, cp) = get_string(rt, sel, name)?;
            s.extend_from_slice(bytes);
            set_string(rt, sel, name, &s, cp)
        }
        QRegKind::Dot | QRegKind::BufferInfo => {
            Err(TecoError::failed("Q-Register has no settable string part"))
        }
        _ => {
            let cp = rt.default_codepage;
            let reg = rt
                .qregs
                .get_mut(sel, name)
                .ok_or_else(|| missing(sel, name))?;
            let id = reg.ensure_doc(&mut rt.docs, cp);
            let old_len = rt.docs.len(id);
            rt.docs
                .append_bytes(id, bytes)
                .map_err(|e| TecoError::new(ErrorKind::CodePoint, e.to_string()))?;
            if must_undo {
                rt.undo.push(move |rt, _| {
                    let len = rt.docs.len(id);
                    rt.docs.delete_text(id, old_len, len.saturating_sub(old_len));
                });
            }
            Ok(())
        }
    }
}

/// Code point at glyph position `pos`: −1 when out of range, −2 for an
/// invalid byte sequence, −3 for an incomplete trailing sequence. The rope
/// store cannot hold ill-formed text, so −2/−3 only ever surface from
/// foreign document implementations.
pub fn get_character(rt: &mut Runtime, sel: TableSel, name: &[u8], pos: i64) -> Result<i64> {
    if pos < 0 {
        return Ok(-1);
    }
    match kind_of(rt, sel, name)? {
        QRegKind::Plain | QRegKind::Radix | QRegKind::EdFlags => {
            let reg = rt.qregs.get(sel, name).unwrap();
            match reg.doc.handle {
                Some(h) => Ok(rt
                    .docs
                    .char_at(h, pos as usize)
                    .map(|c| c as i64)
                    .unwrap_or(-1)),
                None => Ok(-1),
            }
        }
        _ => {
            let (bytes, _) = get_string(rt, sel, name)?;
            let s = String::from_utf8_lossy(&bytes);
            Ok(s.chars().nth(pos as usize).map(|c| c as i64).unwrap_or(-1))
        }
    }
}

/// Length in glyphs.
pub fn get_length(rt: &mut Runtime, sel: TableSel, name: &[u8]) -> Result<i64> {
    match kind_of(rt, sel, name)? {
        QRegKind::Plain | QRegKind::Radix | QRegKind::EdFlags => {
            let reg = rt.qregs.get(sel, name).unwrap();
            Ok(reg.doc.handle.map(|h| rt.docs.len(h)).unwrap_or(0) as i64)
        }
        _ => {
            let (bytes, _) = get_string(rt, sel, name)?;
            Ok(String::from_utf8_lossy(&bytes).chars().count() as i64)
        }
    }
}

/*
 * Editing: show a register's document in the register view.
 */

pub fn edit(rt: &mut Runtime, sel: TableSel, name: &[u8]) -> Result<()> {
    match kind_of(rt, sel, name)? {
        QRegKind::Plain | QRegKind::Radix | QRegKind::EdFlags => {}
        _ => {
            return Err(TecoError::failed(format!(
                "Q-Register \"{}\" cannot be edited",
                core_text::echo(name)
            )))
        }
    }

    rt.current_doc_undo_edit();
    rt.save_current_doc_state();

    let cp = rt.default_codepage;
    let reg = rt
        .qregs
        .get_mut(sel, name)
        .ok_or_else(|| missing(sel, name))?;
    reg.ensure_doc(&mut rt.docs, cp);
    let doc = reg.doc.clone();
    doc.restore_to_view(&mut rt.qreg_view);
    rt.current = Current::QReg(sel, name.to_vec());
    rt.interface.info_update_qreg(name);
    trace!(target: "qreg", name = %core_text::echo(name), "edit");
    Ok(())
}

/*
 * File transfer
 */

pub fn load(rt: &mut Runtime, sel: TableSel, name: &[u8], path: &Path) -> Result<()> {
    let (bytes, cp, _eol) = fileio::load_file(rt, path)?;
    set_string(rt, sel, name, &bytes, cp)
}

pub fn save(rt: &mut Runtime, sel: TableSel, name: &[u8], path: &Path) -> Result<()> {
    let (bytes, _) = get_string(rt, sel, name)?;
    fileio::save_file(rt, path, &bytes)
}

/*
 * The push-down stack
 */

pub fn stack_push(rt: &mut Runtime, sel: TableSel, name: &[u8]) -> Result<()> {
    if rt.current == Current::QReg(sel, name.to_vec()) {
        return Err(TecoError::failed("Cannot push the edited Q-Register"));
    }

    let kind = kind_of(rt, sel, name)?;
    let integer = get_integer(rt, sel, name)?;
    let plain = matches!(kind, QRegKind::Plain | QRegKind::Radix | QRegKind::EdFlags);

    let doc = if plain {
        // O(1): the register's document moves onto the stack; the register
        // is left with a fresh lazily-created one.
        let reg = rt.qregs.get_mut(sel, name).unwrap();
        std::mem::take(&mut reg.doc)
    } else {
        let (bytes, cp) = get_string(rt, sel, name)?;
        let id = rt.docs.create(cp);
        rt.docs
            .append_bytes(id, &bytes)
            .map_err(|e| TecoError::new(ErrorKind::CodePoint, e.to_string()))?;
        QRegDoc {
            handle: Some(id),
            ..Default::default()
        }
    };

    rt.qreg_stack.push(QRegStackEntry { integer, doc });

    let name_owned = name.to_vec();
    rt.undo.push(move |rt, _| {
        let Some(entry) = rt.qreg_stack.pop() else {
            return;
        };
        if plain {
            if let Some(reg) = rt.qregs.get_mut(sel, &name_owned) {
                let interim = std::mem::replace(&mut reg.doc, entry.doc);
                interim.release(&mut rt.docs);
                return;
            }
        }
        entry.doc.release(&mut rt.docs);
    });
    Ok(())
}

/// Returns false on an empty stack (reported by `:]q` instead of failing).
pub fn stack_pop(rt: &mut Runtime, sel: TableSel, name: &[u8]) -> Result<bool> {
    if rt.current == Current::QReg(sel, name.to_vec()) {
        return Err(TecoError::failed("Cannot pop into the edited Q-Register"));
    }
    if rt.qreg_stack.is_empty() {
        return Ok(false);
    }

    let kind = kind_of(rt, sel, name)?;
    let plain = matches!(kind, QRegKind::Plain | QRegKind::Radix | QRegKind::EdFlags);
    let entry = rt.qreg_stack.pop().expect("checked non-empty");

    if plain {
        let reg = rt.qregs.get_mut(sel, name).unwrap();
        let old_int = reg.integer;
        reg.integer = entry.integer;
        let old_doc = std::mem::replace(&mut reg.doc, entry.doc);

        let entry_int = entry.integer;
        let name_owned = name.to_vec();
        undo::push_owning(
            rt,
            old_doc,
            move |old_doc, rt, _| {
                if let Some(reg) = rt.qregs.get_mut(sel, &name_owned) {
                    reg.integer = old_int;
                    let saved = std::mem::replace(&mut reg.doc, old_doc);
                    rt.qreg_stack.push(QRegStackEntry {
                        integer: entry_int,
                        doc: saved,
                    });
                } else {
                    old_doc.release(&mut rt.docs);
                }
            },
            |old_doc, rt| old_doc.release(&mut rt.docs),
        );
    } else {
        let bytes = entry
            .doc
            .handle
            .map(|h| rt.docs.get_bytes(h))
            .unwrap_or_default();
        let cp = rt.default_codepage;
        set_integer(rt, sel, name, entry.integer)?;
        set_string(rt, sel, name, &bytes, cp)?;

        undo::push_owning(
            rt,
            entry,
            |entry, rt, _| {
                // integer and string restores were pushed by their setters
                rt.qreg_stack.push(entry);
            },
            |entry, rt| entry.doc.release(&mut rt.docs),
        );
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::runtime_fixture;

    #[test]
    fn plain_register_round_trip() {
        let (mut rt, _) = runtime_fixture();
        set_integer(&mut rt, TableSel::Globals, b"A", 7).unwrap();
        assert_eq!(get_integer(&rt, TableSel::Globals, b"A").unwrap(), 7);
        set_string(&mut rt, TableSel::Globals, b"A", b"hi", Codepage::Utf8).unwrap();
        let (s, _) = get_string(&mut rt, TableSel::Globals, b"A").unwrap();
        assert_eq!(s, b"hi");
        assert_eq!(get_length(&mut rt, TableSel::Globals, b"A").unwrap(), 2);
    }

    #[test]
    fn get_character_boundaries() {
        let (mut rt, _) = runtime_fixture();
        set_string(&mut rt, TableSel::Globals, b"A", "x€".as_bytes(), Codepage::Utf8).unwrap();
        assert_eq!(get_character(&mut rt, TableSel::Globals, b"A", 0).unwrap(), 'x' as i64);
        assert_eq!(get_character(&mut rt, TableSel::Globals, b"A", 1).unwrap(), '€' as i64);
        assert_eq!(get_character(&mut rt, TableSel::Globals, b"A", 2).unwrap(), -1);
        assert_eq!(get_character(&mut rt, TableSel::Globals, b"A", -5).unwrap(), -1);
    }

    #[test]
    fn stack_restores_document_identity() {
        let (mut rt, _) = runtime_fixture();
        set_string(&mut rt, TableSel::Globals, b"Q", b"payload", Codepage::Utf8).unwrap();
        let before = rt.qregs.get(TableSel::Globals, b"Q").unwrap().doc.handle;

        stack_push(&mut rt, TableSel::Globals, b"Q").unwrap();
        assert!(rt.qregs.get(TableSel::Globals, b"Q").unwrap().doc.handle.is_none());
        set_string(&mut rt, TableSel::Globals, b"Q", b"scratch", Codepage::Utf8).unwrap();

        assert!(stack_pop(&mut rt, TableSel::Globals, b"Q").unwrap());
        let after = rt.qregs.get(TableSel::Globals, b"Q").unwrap().doc.handle;
        assert_eq!(before, after);
        let (s, _) = get_string(&mut rt, TableSel::Globals, b"Q").unwrap();
        assert_eq!(s, b"payload");
    }

    #[test]
    fn pop_from_empty_stack_reports_false() {
        let (mut rt, _) = runtime_fixture();
        assert!(!stack_pop(&mut rt, TableSel::Globals, b"A").unwrap());
    }

    #[test]
    fn rubout_of_integer_assignment() {
        let (mut rt, mut machine) = runtime_fixture();
        rt.undo.enabled = true;
        set_integer(&mut rt, TableSel::Globals, b"B", 1).unwrap();
        rt.undo.pos = 5;
        set_integer(&mut rt, TableSel::Globals, b"B", 2).unwrap();
        crate::undo::pop(&mut rt, &mut machine, 5);
        assert_eq!(get_integer(&rt, TableSel::Globals, b"B").unwrap(), 1);
    }

    #[test]
    fn radix_register_validates_range() {
        let (mut rt, _) = runtime_fixture();
        let sel = TableSel::Locals(0);
        set_integer(&mut rt, sel, NAME_RADIX, 16).unwrap();
        assert_eq!(rt.qregs.table(sel).radix, 16);
        assert!(set_integer(&mut rt, sel, NAME_RADIX, 1).is_err());
    }

    #[test]
    fn locals_are_created_per_frame() {
        let (mut rt, _) = runtime_fixture();
        let idx = rt.qregs.push_locals(false);
        ensure_reg(&mut rt, TableSel::Locals(idx), b"A");
        set_integer(&mut rt, TableSel::Locals(idx), b"A", 42).unwrap();
        assert_eq!(rt.qregs.get(TableSel::Globals, b"A").unwrap().integer, 0);
        assert_eq!(get_integer(&rt, TableSel::Locals(idx), b"A").unwrap(), 42);
        let mut docs = std::mem::take(&mut rt.docs);
        rt.qregs.pop_locals(&mut docs);
        rt.docs = docs;
        assert!(rt.qregs.get(TableSel::Locals(idx), b"A").is_none());
    }
}
