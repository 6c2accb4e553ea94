//! The TECO language runtime: parser/executor, rub-out stack, Q-Register
//! model, buffer ring and command-line manager.
//!
//! All mutable state lives in a single owned [`Runtime`] threaded through
//! every entry point — no global state, so a process can host several
//! independent runtimes (which is what the test suite does). The runtime is
//! strictly single-threaded and cooperative: a parser step is the unit of
//! work, interruption is a flag polled between steps, and the undo
//! discipline stands in for any locking.

pub mod cmdline;
pub mod completion;
pub mod edflags;
pub mod error;
pub mod expressions;
pub mod fileio;
pub mod gototable;
pub mod interface;
pub mod lexer;
pub mod machine;
pub mod qreg;
pub mod qregspec;
pub mod ring;
pub mod states;
pub mod stringbuilding;
pub mod undo;

#[cfg(test)]
mod testutil;

use core_view::{Codepage, DocStore, View, ViewMessage};

use crate::edflags::EdFlags;
use crate::expressions::Expressions;
use crate::fileio::SavePoints;
use crate::interface::Interface;
use crate::qreg::{QRegStackEntry, QRegTables, TableSel};
use crate::ring::Ring;
use crate::undo::UndoStack;

/// What the main view currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Current {
    Buffer(usize),
    QReg(TableSel, Vec<u8>),
}

/// One active iteration context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopFrame {
    /// Byte offset just past the `<` command.
    pub pc: usize,
    /// Remaining iterations; -1 is infinite.
    pub counter: i64,
}

pub struct Runtime {
    pub interface: Box<dyn Interface>,
    pub docs: DocStore,
    pub undo: UndoStack,
    pub expressions: Expressions,
    pub loop_stack: Vec<LoopFrame>,
    pub qregs: QRegTables,
    pub qreg_stack: Vec<QRegStackEntry>,
    /// The shared view for editing Q-Register documents.
    pub qreg_view: View,
    /// Fallback document shown in the register view when no register is
    /// edited (or the edited one ceased to exist).
    pub qreg_scratch: core_view::DocId,
    pub ring: Ring,
    pub current: Current,
    pub ed: EdFlags,
    pub savepoints: SavePoints,
    /// Label an `O` command is still searching for.
    pub goto_skip_label: Option<Vec<u8>>,
    pub quit_requested: bool,
    /// Argument count of the last `$$` return.
    pub return_args: usize,
    /// The last committed command line (`*q`).
    pub last_cmdline: Vec<u8>,
    pub default_codepage: Codepage,
    /// Observation hook for unit tests.
    #[cfg(test)]
    pub scratch_trace: Vec<i32>,
}

impl Runtime {
    /// Build a runtime with one unnamed buffer. `undo_enabled` is false in
    /// batch mode, where nothing is ever rubbed out.
    pub fn new(interface: Box<dyn Interface>, undo_enabled: bool) -> Self {
        Self::with_codepage(interface, undo_enabled, Codepage::Utf8)
    }

    pub fn with_codepage(
        interface: Box<dyn Interface>,
        undo_enabled: bool,
        default_codepage: Codepage,
    ) -> Self {
        let mut docs = DocStore::new();
        // scratch document shown in the register view while no register is
        // edited
        let scratch = docs.create(default_codepage);

        let mut qregs = QRegTables::new();
        if interface.has_clipboard() {
            qregs.init_clipboards();
        }
        init_environment();
        qregs.init_environ();

        let mut rt = Self {
            interface,
            docs,
            undo: UndoStack::new(false),
            expressions: Expressions::new(),
            loop_stack: Vec::new(),
            qregs,
            qreg_stack: Vec::new(),
            qreg_view: View::new(scratch),
            qreg_scratch: scratch,
            ring: Ring::default(),
            current: Current::Buffer(0),
            ed: EdFlags::new(),
            savepoints: SavePoints::default(),
            goto_skip_label: None,
            quit_requested: false,
            return_args: 0,
            last_cmdline: Vec::new(),
            default_codepage,
            #[cfg(test)]
            scratch_trace: Vec::new(),
        };

        ring::edit_name(&mut rt, None).expect("creating the unnamed buffer cannot fail");
        rt.undo.enabled = undo_enabled;
        rt
    }

    pub fn current_view(&self) -> &View {
        match &self.current {
            Current::Buffer(i) => &self.ring.buffers[*i].view,
            Current::QReg(..) => &self.qreg_view,
        }
    }

    /// Split borrow for text operations on the current view.
    pub fn docs_and_current_view(&mut self) -> (&mut DocStore, &mut View) {
        match &self.current {
            Current::Buffer(i) => (&mut self.docs, &mut self.ring.buffers[*i].view),
            Current::QReg(..) => (&mut self.docs, &mut self.qreg_view),
        }
    }

    pub fn current_codepage(&self) -> Codepage {
        self.docs.codepage(self.current_view().doc)
    }

    /// Push an undo token replaying `msg` against whatever view is current
    /// at rub-out time (view switches are themselves undone in order, so
    /// this always hits the right one).
    pub fn undo_view_msg(&mut self, msg: ViewMessage) {
        self.undo.push(move |rt, _| {
            let (docs, view) = rt.docs_and_current_view();
            view.apply(docs, &msg);
        });
    }

    /// Undo token restoring the current caret/anchor.
    pub fn push_view_msg_undo(&mut self) {
        let view = self.current_view();
        let (anchor, dot) = (view.anchor, view.dot);
        self.undo_view_msg(ViewMessage::SetSel { anchor, dot });
    }

    /// Write the register view's state back into the currently edited
    /// register, before something else takes over the view.
    pub fn save_current_doc_state(&mut self) {
        if let Current::QReg(sel, name) = &self.current {
            let sel = *sel;
            let name = name.clone();
            let view = self.qreg_view.clone();
            if let Some(reg) = self.qregs.get_mut(sel, &name) {
                reg.doc.save_from_view(&view);
            }
        }
    }

    /// Schedule the restoration of the current document on rub-out; called
    /// before any command that switches what the main view shows.
    pub fn current_doc_undo_edit(&mut self) {
        let prev = self.current.clone();
        let qview = matches!(prev, Current::QReg(..)).then(|| self.qreg_view.clone());
        self.undo.push(move |rt, _| {
            rt.current = prev;
            if let Some(v) = qview {
                rt.qreg_view = v;
            }
            match &rt.current {
                Current::Buffer(i) => {
                    rt.ring.current = *i;
                    if let Some(b) = rt.ring.buffers.get(*i) {
                        let name = b.filename.as_ref().map(|p| p.to_string_lossy().into_owned());
                        let dirty = b.dirty;
                        rt.interface.info_update_buffer(name.as_deref(), dirty);
                    }
                }
                Current::QReg(_, name) => {
                    let name = name.clone();
                    rt.interface.info_update_qreg(&name);
                }
            }
        });
    }

    /// Process-exit cleanup: pending save-points are removed.
    pub fn cleanup(&mut self) {
        self.savepoints.cleanup();
    }
}

/// Canonicalise `$HOME` and provide the configuration/library path
/// defaults expected by profile loading.
fn init_environment() {
    // Safety: the runtime is strictly single-threaded.
    unsafe {
        if let Some(home) = std::env::var_os("HOME")
            && let Ok(canonical) = std::fs::canonicalize(&home)
        {
            std::env::set_var("HOME", canonical);
        }
        if std::env::var_os("SCITECOCONFIG").is_none()
            && let Some(home) = std::env::var_os("HOME")
        {
            std::env::set_var("SCITECOCONFIG", home);
        }
        if std::env::var_os("SCITECOPATH").is_none() {
            std::env::set_var("SCITECOPATH", "/usr/local/share/sciteco/lib");
        }
    }
}
