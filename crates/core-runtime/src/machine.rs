//! The main parser/executor machine.
//!
//! One machine instance exists per execution context: the interactive
//! command line owns one for its whole lifetime, every macro invocation and
//! every lexer run gets a fresh one. A machine carries the current state,
//! parser flags, its program counter, a goto table, the string-argument
//! collector and the locals-table index; everything else (expression stack,
//! registers, ring, undo) is shared runtime state.
//!
//! Rub-out of parser state is handled wholesale: before each command-line
//! byte is executed, the command-line manager pushes one snapshot token
//! capturing the machine's micro-state (see [`MachineSnapshot`]). Commands
//! therefore never undo their own flag changes, only their effects on
//! shared state.

use tracing::trace;

use crate::error::{ErrorKind, Frame, Result, TecoError};
use crate::expressions;
use crate::gototable::GotoTable;
use crate::qreg::TableSel;
use crate::qregspec::QRegSpecMachine;
use crate::states;
use crate::stringbuilding::StringBuildingMachine;
use crate::{edflags, Runtime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    /// Skipping over a loop body, a conditional branch or `;`-exited loop.
    ParseOnly,
    /// Skipping until a label definition matches the pending `O` target.
    ParseOnlyGoto,
    /// Syntax highlighting: parse, never execute.
    Lexing,
}

impl Mode {
    pub fn executes(&self) -> bool {
        *self == Mode::Normal
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    pub mode: Mode,
    /// Pending `:` (1) or `::` (2) prefix.
    pub modifier_colon: u8,
    /// Pending `@` prefix.
    pub modifier_at: bool,
    /// A digit run is open: the next digit extends the top number.
    pub num_pending: bool,
    /// Nesting depth of constructs passed while in a parse-only mode.
    pub nest_level: u32,
    /// Skipping the else-branch after a taken conditional.
    pub skip_else: bool,
}

/// Register commands that first parse a Q-Register specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QRegCommand {
    /// `[q`
    Push,
    /// `]q`
    Pop,
    /// `Qq` (`nQq` character, `:Qq` length)
    GetInt,
    /// `Uq`
    SetInt,
    /// `%q`
    Increase,
    /// `Gq`
    GetString,
    /// `Xq`
    CopyTo,
    /// `Mq`
    MacroCall,
    /// `^Uq` — continues with a string argument
    SetString,
    /// `EQq` — continues with a file name argument
    EditOrLoad,
    /// `E%q` — continues with a file name argument
    SaveToFile,
    /// `*q` — save last command line
    SaveCmdline,
}

/// String-argument commands; the variant selects the `done` behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringCommand {
    /// `I`
    InsertPlain,
    /// `^I`
    InsertIndent,
    /// `^Uq` after the register was parsed
    SetQRegString,
    /// `S`
    Search,
    /// `FR` first argument (the needle)
    FrSearch,
    /// `FR` second argument (the replacement)
    FrReplace,
    /// `O`
    GotoCmd,
    /// `!label!` is collected without termination by escape
    /// (handled by [`State::Label`], not here)
    /// `EB`
    EditFile,
    /// `EW`
    WriteFile,
    /// `EQq` file name
    LoadQReg,
    /// `E%q` file name
    SaveQRegFile,
    /// `FG`
    ChangeDir,
}

impl StringCommand {
    /// Whether string building is expanded while collecting.
    pub fn string_building(&self) -> bool {
        !matches!(self, StringCommand::SetQRegString)
    }

    /// Whether this is the command's final string argument.
    pub fn is_last(&self) -> bool {
        !matches!(self, StringCommand::FrSearch)
    }

    /// Whether the argument names a file (TAB completion, null check).
    pub fn is_file(&self) -> bool {
        matches!(
            self,
            StringCommand::EditFile
                | StringCommand::WriteFile
                | StringCommand::LoadQReg
                | StringCommand::SaveQRegFile
                | StringCommand::ChangeDir
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    /// After `$`; a second `$` returns/commits.
    Escape,
    /// After `^`.
    Control,
    /// After `^^`: the next code point is pushed as a number.
    Ascii,
    /// After `E`.
    ECommand,
    /// After `F`.
    FCommand,
    /// After `"`.
    CondCommand,
    /// Collecting a `!label!`.
    Label,
    ExpectQReg(QRegCommand),
    ExpectString(StringCommand),
}

impl State {
    /// States where a new command can begin; the command line may only be
    /// committed and key macros expanded from here.
    pub fn is_start(&self) -> bool {
        matches!(self, State::Start | State::Escape)
    }

    /// Key-macro mask bit of this state.
    pub fn keymacro_mask(&self) -> i64 {
        match self {
            State::Start | State::Escape => 1,
            State::ExpectString(_) => 2,
            State::ExpectQReg(_) => 4,
            _ => 8,
        }
    }

    /// Commands are matched case-insensitively in these states.
    pub fn is_caseinsensitive(&self) -> bool {
        matches!(
            self,
            State::Start
                | State::Escape
                | State::Control
                | State::ECommand
                | State::FCommand
                | State::CondCommand
        )
    }
}

/// String-argument collector shared by all `ExpectString` states.
#[derive(Debug, Clone)]
pub struct ExpectString {
    pub string: Vec<u8>,
    /// Brace nesting when the escape character is `{`; the argument is
    /// complete when this drops to zero.
    pub nesting: i32,
    /// Bytes appended since the last interactive feedback.
    pub insert_len: usize,
    pub machine: StringBuildingMachine,
}

impl Default for ExpectString {
    fn default() -> Self {
        Self {
            string: Vec::new(),
            nesting: 1,
            insert_len: 0,
            machine: StringBuildingMachine::new('\x1b'),
        }
    }
}

pub struct MachineMain {
    pub state: State,
    pub flags: Flags,
    /// Byte offset of the next code point in the current source.
    pub macro_pc: usize,
    /// Whether this machine's execution is rubbed out token-wise (only the
    /// interactive command-line machine).
    pub must_undo: bool,
    /// Locals-table index for Q-Register resolution.
    pub locals: usize,
    /// Loop-stack frame pointer: `>` and macro return may not pop below.
    pub loop_fp: usize,
    pub goto_table: GotoTable,
    /// Label text while in [`State::Label`].
    pub goto_label: Vec<u8>,
    pub expectstring: ExpectString,
    /// Q-Register specification parser while in an `ExpectQReg` state.
    pub expectqreg: Option<QRegSpecMachine>,
    /// Register resolved by an `ExpectQReg` state, for the string argument
    /// that follows (`^Uq…$`, `EQq…$`).
    pub pending_qreg: Option<(TableSel, Vec<u8>)>,
    /// First argument of a two-argument string command (`FR`).
    pub fr_arg: Option<Vec<u8>>,
    /// Whether `EB` still accepts a filename (it reacted to an id already).
    pub allow_filename: bool,
}

impl MachineMain {
    pub fn new(locals: usize, must_undo: bool, loop_fp: usize) -> Self {
        Self {
            state: State::Start,
            flags: Flags::default(),
            macro_pc: 0,
            must_undo,
            locals,
            loop_fp,
            goto_table: GotoTable::new(must_undo),
            goto_label: Vec::new(),
            expectstring: ExpectString::default(),
            expectqreg: None,
            pending_qreg: None,
            fr_arg: None,
            allow_filename: false,
        }
    }

    /// Consume a pending `:` modifier; returns 0, 1 or 2.
    pub fn eval_colon(&mut self) -> u8 {
        std::mem::take(&mut self.flags.modifier_colon)
    }

    /// Consume a pending `@` modifier.
    pub fn eval_at(&mut self) -> bool {
        std::mem::take(&mut self.flags.modifier_at)
    }

    /// A command that takes no string argument saw a pending `@`. Checked
    /// in every mode, as the modifier changes how syntax is consumed.
    pub fn reject_at(&mut self, chr: char) -> Result<()> {
        if self.flags.modifier_at {
            return Err(TecoError::modifier(chr));
        }
        Ok(())
    }

    /// A command that accepts no modifiers at all saw one. The colon only
    /// matters when executing.
    pub fn reject_modifiers(&mut self, chr: char) -> Result<()> {
        self.reject_at(chr)?;
        if self.flags.mode == Mode::Normal && self.flags.modifier_colon > 0 {
            return Err(TecoError::modifier(chr));
        }
        Ok(())
    }
}

/// Everything the rub-out of one input byte must restore about the parser.
/// Content that can shrink or be replaced (the collected string, a label,
/// `fr_arg`) is additionally protected by content tokens at the points
/// where it is cleared.
pub struct MachineSnapshot {
    state: State,
    flags: Flags,
    nesting: i32,
    insert_len: usize,
    string_len: usize,
    label_len: usize,
    sb: StringBuildingMachine,
    expectqreg: Option<QRegSpecMachine>,
    pending_qreg: Option<(TableSel, Vec<u8>)>,
    allow_filename: bool,
}

impl MachineSnapshot {
    pub fn capture(m: &MachineMain) -> Self {
        Self {
            state: m.state,
            flags: m.flags,
            nesting: m.expectstring.nesting,
            insert_len: m.expectstring.insert_len,
            string_len: m.expectstring.string.len(),
            label_len: m.goto_label.len(),
            sb: m.expectstring.machine.clone(),
            expectqreg: m.expectqreg.clone(),
            pending_qreg: m.pending_qreg.clone(),
            allow_filename: m.allow_filename,
        }
    }

    pub fn restore(self, m: &mut MachineMain) {
        m.state = self.state;
        m.flags = self.flags;
        m.expectstring.nesting = self.nesting;
        m.expectstring.insert_len = self.insert_len;
        m.expectstring.string.truncate(self.string_len);
        m.goto_label.truncate(self.label_len);
        m.expectstring.machine = self.sb;
        m.expectqreg = self.expectqreg;
        m.pending_qreg = self.pending_qreg;
        m.allow_filename = self.allow_filename;
    }
}

/// Execute source bytes from the machine's pc up to `stop`.
///
/// One code point per iteration; the interrupt flag and the memory limit
/// are polled every iteration so runaway macros stay responsive. Errors get
/// the position of the offending code point attached.
pub fn step(rt: &mut Runtime, m: &mut MachineMain, src: &[u8], stop: usize) -> Result<()> {
    let mut last_pc = m.macro_pc;
    while m.macro_pc < stop {
        last_pc = m.macro_pc;

        if rt.interface.is_interrupted() {
            let mut e = TecoError::interrupted();
            e.set_pos(last_pc);
            return Err(e);
        }
        if let Err(mut e) = edflags::check_memory(rt) {
            e.set_pos(last_pc);
            return Err(e);
        }

        let (chr, len) = core_text::char_at(src, m.macro_pc).expect("pc within validated source");
        m.macro_pc += len;

        trace!(target: "machine", pc = last_pc, chr = %chr.escape_debug(), state = ?m.state, mode = ?m.flags.mode, "input");
        if let Err(mut e) = states::input(rt, m, chr) {
            e.set_pos(last_pc);
            return Err(e);
        }
    }

    // Interactive feedback when the pc reaches the end of the available
    // input (harmless at the end of macros).
    if matches!(m.state, State::ExpectString(_)) {
        if let Err(mut e) = states::expectstring_refresh(rt, m) {
            e.set_pos(last_pc);
            return Err(e);
        }
    }
    Ok(())
}

/// Execute a complete macro with a fresh machine.
///
/// `locals` reuses the caller's locals table (`:Mq`); otherwise a fresh
/// table is pushed for the invocation. The machine's loop frame pointer
/// fences off the caller's loops.
pub fn execute_macro(
    rt: &mut Runtime,
    src: &[u8],
    locals: Option<usize>,
    frame_name: &str,
) -> Result<()> {
    if !core_text::validate_utf8(src) {
        return Err(TecoError::new(
            ErrorKind::CodePoint,
            "Invalid UTF-8 byte sequence in macro",
        ));
    }

    let fresh_locals = locals.is_none();
    let locals_idx = match locals {
        Some(idx) => idx,
        None => rt.qregs.push_locals(false),
    };
    let parent_brace_level = rt.expressions.brace_level;
    let mut m = MachineMain::new(locals_idx, false, rt.loop_stack.len());

    let result = execute_machine(rt, &mut m, src, parent_brace_level);

    let result = result.and_then(|()| finish_macro(rt, &m, locals_idx, fresh_locals));

    if fresh_locals {
        // If the view still shows a register of this frame (possible on
        // the error path), detach it before its document goes away.
        if let crate::Current::QReg(TableSel::Locals(idx), _) = &rt.current
            && *idx == locals_idx
        {
            rt.current = crate::Current::Buffer(rt.ring.current);
            rt.qreg_view = core_view::View::new(rt.qreg_scratch);
        }
        // Locals don't have to be preserved: an error rubs out the whole
        // invocation anyway.
        let mut docs = std::mem::take(&mut rt.docs);
        rt.qregs.pop_locals(&mut docs);
        rt.docs = docs;
    }

    result.map_err(|mut e| {
        rt.goto_skip_label = None;
        e.add_frame(src, |line, column| Frame::Macro {
            name: frame_name.to_string(),
            line,
            column,
        });
        e
    })
}

fn execute_machine(
    rt: &mut Runtime,
    m: &mut MachineMain,
    src: &[u8],
    parent_brace_level: u32,
) -> Result<()> {
    match step(rt, m, src, src.len()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind == ErrorKind::Return => {
            // $$ inside the macro: unwind braces and loops to the caller,
            // keeping the return arguments.
            debug_assert!(m.state.is_start());
            let return_args = rt.return_args;
            expressions::brace_return(rt, parent_brace_level, return_args)?;
            rt.loop_stack.truncate(m.loop_fp);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn finish_macro(rt: &mut Runtime, m: &MachineMain, locals_idx: usize, fresh_locals: bool) -> Result<()> {
    if let Some(label) = &rt.goto_skip_label {
        let mut e = TecoError::failed(format!(
            "Label \"{}\" not found",
            core_text::echo(label)
        ));
        e.set_pos(m.macro_pc);
        return Err(e);
    }

    if rt.loop_stack.len() > m.loop_fp {
        let frame = rt.loop_stack.last().expect("checked non-empty");
        let mut e = TecoError::failed("Unterminated loop");
        // frame.pc points just past the loop start command
        e.set_pos(frame.pc.saturating_sub(1));
        return Err(e);
    }

    if !m.state.is_start() {
        let mut e = TecoError::new(ErrorKind::Syntax, "Unterminated command");
        e.set_pos(m.macro_pc);
        return Err(e);
    }

    if fresh_locals
        && let crate::Current::QReg(TableSel::Locals(idx), name) = &rt.current
        && *idx == locals_idx
    {
        return Err(TecoError::new(
            ErrorKind::EditingLocalQReg,
            format!(
                "Local Q-Register \"{}\" edited at end of macro",
                core_text::echo(name)
            ),
        ));
    }
    Ok(())
}

/// Execute a script file; a leading `#` line is skipped (hash-bang).
pub fn execute_file(rt: &mut Runtime, path: &std::path::Path) -> Result<()> {
    let content = std::fs::read(path)
        .map_err(|e| TecoError::failed(format!("Cannot read script \"{}\": {e}", path.display())))?;

    let offset = if content.first() == Some(&b'#') {
        content
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
            .map(|p| p + 1)
            .unwrap_or(content.len())
    } else {
        0
    };

    execute_macro(rt, &content[offset..], None, "").map_err(|mut e| {
        // rewrite the innermost frame as a file frame with the hash-bang
        // line accounted for
        if let Some(Frame::Macro { line, column, .. }) = e.frames.last().cloned() {
            let line = line + usize::from(offset > 0);
            e.frames.pop();
            e.frames.push(Frame::File {
                path: path.display().to_string(),
                line,
                column,
            });
        }
        e
    })
}
