//! The command-line manager: the top-level keystroke loop.
//!
//! Keystrokes are either immediate editing commands (rub-out, re-insert,
//! completion, the modifier toggle) handled here, or ordinary characters
//! inserted into the command line and executed through the parser one byte
//! at a time. Every byte gets an undo frame; rubbing a character out pops
//! its frame, restoring all shared state plus a snapshot of the parser's
//! micro-state.
//!
//! The rubbed-out suffix of the command line is kept: re-inserting the same
//! characters merely advances `effective_len` without re-parsing, which is
//! what makes `^G^H` style re-insertion cheap.

use tracing::{debug, trace};

use crate::error::{ErrorKind, Frame, Result, TecoError};
use crate::interface::{CmdlineEcho, MsgLevel, PopupKind};
use crate::machine::{MachineMain, MachineSnapshot, State, StringCommand};
use crate::qreg::{self, TableSel, NAME_ESCAPE};
use crate::states::{insert_completion_terminator, is_noop};
use crate::{completion, edflags, machine, undo, Runtime};

/// Word constituents for `^W` inside string arguments.
const WORD_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_";
/// Token separators for file completion inside free-form strings.
const BREAK_CHARS: &[u8] = b" \t\x0b\r\n\x0c<>,;@";

pub struct CmdLine {
    /// Full text: executed prefix plus rubbed-out suffix.
    pub str: Vec<u8>,
    /// Byte length of the executed prefix.
    pub effective_len: usize,
    /// Insertion program counter; equals `effective_len` between steps.
    pub pc: usize,
    /// The `^G` immediate-editing modifier.
    pub modifier_enabled: bool,
    pub machine: MachineMain,
}

impl CmdLine {
    pub fn new() -> Self {
        Self {
            str: Vec::new(),
            effective_len: 0,
            pc: 0,
            modifier_enabled: false,
            machine: MachineMain::new(0, true, 0),
        }
    }

    fn rubbed_out(&self) -> &[u8] {
        &self.str[self.effective_len..]
    }
}

impl Default for CmdLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Process the characters of one keypress (or key-macro expansion). They
/// are a unit: an error rubs out everything the keypress inserted, except
/// past an intervening command-line termination.
pub fn keypress(rt: &mut Runtime, cl: &mut CmdLine, data: &[u8]) -> Result<()> {
    if !core_text::validate_utf8(data) {
        return Err(TecoError::new(
            ErrorKind::CodePoint,
            "Invalid UTF-8 sequence",
        ));
    }

    rt.interface.msg_clear();

    let mut start_pc = cl.effective_len;

    for (_, chr) in core_text::chars_with_offsets(data) {
        match process_edit_cmd(rt, cl, chr) {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::Return => {
                // command-line termination ($$)
                rt.interface.popup_clear();
                if rt.quit_requested {
                    return Err(TecoError::quit());
                }
                commit(rt, cl);
                // later errors can't rub out past the commit
                start_pc = 0;
            }
            Err(e) if e.kind == ErrorKind::Quit => return Err(e),
            Err(_) => {
                // The error has been displayed; undo everything this
                // keypress did, as if the characters were never typed.
                undo::pop(rt, &mut cl.machine, start_pc);
                cl.effective_len = start_pc;
                cl.machine.macro_pc = cl.effective_len;
                break;
            }
        }
    }

    // a pending interrupt was either consumed by the rollback above or
    // arrived too late to matter
    rt.interface.clear_interrupted();

    rt.interface.cmdline_update(&CmdlineEcho {
        str: &cl.str,
        effective_len: cl.effective_len,
    });
    Ok(())
}

/// `ESC ESC`: finalise the command line and drop all rub-out information.
fn commit(rt: &mut Runtime, cl: &mut CmdLine) {
    debug!(target: "cmdline", len = cl.str.len(), "commit");
    undo::clear(rt);
    rt.docs.clear_all_undo();
    rt.expressions.clear();
    rt.loop_stack.clear();
    cl.machine.goto_table.clear();
    cl.machine.flags = Default::default();
    debug_assert!(cl.machine.state.is_start());
    cl.machine.state = State::Start;
    cl.machine.expectstring = Default::default();
    cl.machine.expectqreg = None;
    cl.machine.pending_qreg = None;
    cl.machine.fr_arg = None;
    cl.machine.goto_label.clear();

    rt.last_cmdline = std::mem::take(&mut cl.str);
    cl.effective_len = 0;
    cl.pc = 0;
    cl.machine.macro_pc = 0;
}

/// Insert characters into the command line and execute them. Handles the
/// re-insertion fast path and command-line replacement.
pub fn insert(rt: &mut Runtime, cl: &mut CmdLine, data: &[u8]) -> Result<()> {
    cl.pc = cl.effective_len;
    cl.machine.macro_pc = cl.pc;

    if data.len() <= cl.str.len() - cl.effective_len && cl.rubbed_out().starts_with(data) {
        // re-insertion of rubbed-out characters: the parser state is still
        // valid for them, only the boundary moves
        cl.effective_len += data.len();
    } else {
        if cl.effective_len < cl.str.len() {
            // diverging from the rubbed-out suffix drops it, and with it
            // the immediate-editing modifier
            cl.modifier_enabled = false;
        }
        cl.str.truncate(cl.effective_len);
        cl.str.extend_from_slice(data);
        cl.effective_len = cl.str.len();
    }

    let mut old_cmdline: Option<Vec<u8>> = None;
    let mut repl_pc = 0usize;

    while cl.pc < cl.effective_len {
        rt.undo.pos = cl.pc;
        if cl.machine.must_undo {
            let snapshot = MachineSnapshot::capture(&cl.machine);
            rt.undo.push(move |_, m| snapshot.restore(m));
        }

        let step_result = machine::step(rt, &mut cl.machine, &cl.str, cl.pc + 1);
        match step_result {
            Ok(()) => cl.pc += 1,

            Err(e) if e.kind == ErrorKind::CmdlineReplace => {
                // Replace the command line with register ESC, re-executing
                // only from the first differing byte.
                let brace_pc = cl.pc;
                let (new_cmdline, _) = qreg::get_string(rt, TableSel::Globals, NAME_ESCAPE)?;
                cl.pc = core_text::common_prefix(&cl.str, &new_cmdline);
                undo::pop(rt, &mut cl.machine, cl.pc);

                let previous = std::mem::replace(&mut cl.str, new_cmdline);
                if old_cmdline.is_none() {
                    old_cmdline = Some(previous);
                    repl_pc = brace_pc;
                }
                cl.effective_len = cl.str.len();
                cl.machine.macro_pc = cl.pc;
                trace!(target: "cmdline", pc = cl.pc, "cmdline_replaced");
            }

            Err(e) if e.kind.is_control_flow() => return Err(e),

            Err(mut e) => {
                e.add_frame(&cl.str, |line, column| Frame::Toplevel { line, column });
                rt.interface.msg(MsgLevel::Error, &e.report());

                if let Some(previous) = old_cmdline.take() {
                    // Error during a replacement: replay the previous
                    // command line and un-consume the `}` itself.
                    let diverge = core_text::common_prefix(&cl.str, &previous);
                    undo::pop(rt, &mut cl.machine, diverge);
                    cl.str = previous;
                    cl.pc = diverge;
                    cl.effective_len = repl_pc;
                    cl.machine.macro_pc = cl.pc;
                    continue;
                }

                return Err(e);
            }
        }
    }

    Ok(())
}

/// Rub out the last glyph of the effective command line.
fn rubout(rt: &mut Runtime, cl: &mut CmdLine) {
    if cl.effective_len == 0 {
        return;
    }
    let p = core_text::prev_grapheme_start(&cl.str, cl.effective_len);
    cl.effective_len = p;
    undo::pop(rt, &mut cl.machine, p);
    cl.machine.macro_pc = cl.effective_len;
}

/// Re-insert the next rubbed-out glyph through the parser.
fn rubin(rt: &mut Runtime, cl: &mut CmdLine) -> Result<()> {
    if cl.effective_len >= cl.str.len() {
        return Ok(());
    }
    let end = core_text::next_grapheme_end(&cl.str, cl.effective_len);
    let bytes = cl.str[cl.effective_len..end].to_vec();
    insert(rt, cl, &bytes)
}

fn can_rubin(cl: &CmdLine) -> bool {
    cl.effective_len < cl.str.len()
}

fn next_byte(cl: &CmdLine) -> Option<u8> {
    cl.str.get(cl.effective_len).copied()
}

fn last_byte(cl: &CmdLine) -> Option<u8> {
    if cl.effective_len == 0 {
        None
    } else {
        Some(cl.str[cl.effective_len - 1])
    }
}

/*
 * Immediate editing command processing, dispatched by the machine's
 * current (sub-)state.
 */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditContext {
    /// Start-like and lookahead command states.
    Command,
    /// Inside a string argument, string building at a construct boundary.
    String(StringCommand),
    /// After `^Q`/`^R` inside a string: the next key is literal.
    StringEscaped,
    /// Inside a Q-Register specification.
    QRegSpec,
    Other,
}

fn edit_context(cl: &CmdLine) -> EditContext {
    match cl.machine.state {
        State::ExpectString(cmd) => {
            let sb = &cl.machine.expectstring.machine;
            if sb.in_qregspec().is_some() {
                EditContext::QRegSpec
            } else if sb.in_escaped() {
                EditContext::StringEscaped
            } else if sb.at_start() {
                EditContext::String(cmd)
            } else {
                EditContext::Other
            }
        }
        State::ExpectQReg(_) => EditContext::QRegSpec,
        State::Start
        | State::Escape
        | State::Control
        | State::ECommand
        | State::FCommand
        | State::CondCommand => EditContext::Command,
        _ => EditContext::Other,
    }
}

pub fn process_edit_cmd(rt: &mut Runtime, cl: &mut CmdLine, key: char) -> Result<()> {
    let context = edit_context(cl);

    // keys that would be immediate commands are inserted literally after ^Q
    if context == EditContext::StringEscaped && matches!(key, '\x17' /* ^W */ | '\x15' /* ^U */) {
        return insert_char(rt, cl, key);
    }

    match key {
        // toggle the immediate editing modifier
        '\x07' => {
            rt.interface.popup_clear();
            cl.modifier_enabled = !cl.modifier_enabled;
            rt.interface.msg(
                MsgLevel::Info,
                if cl.modifier_enabled {
                    "Immediate editing modifier is now enabled."
                } else {
                    "Immediate editing modifier is now disabled."
                },
            );
            return Ok(());
        }

        // rubout / re-insert one character
        '\x08' | '\x7f' => {
            rt.interface.popup_clear();
            if cl.modifier_enabled {
                rubin(rt, cl)?;
            } else {
                rubout(rt, cl);
            }
            return Ok(());
        }

        // rubout / re-insert a construct, word or command
        '\x17' => {
            rt.interface.popup_clear();
            return rubout_word(rt, cl, context);
        }

        // rubout / re-insert a whole string argument
        '\x15' if matches!(context, EditContext::String(_)) => {
            rt.interface.popup_clear();
            if cl.modifier_enabled {
                while matches!(cl.machine.state, State::ExpectString(_)) && can_rubin(cl) {
                    rubin(rt, cl)?;
                }
            } else {
                while !cl.machine.expectstring.string.is_empty() {
                    rubout(rt, cl);
                }
            }
            return Ok(());
        }

        // completion
        '\t' => {
            if complete(rt, cl, context)? {
                return Ok(());
            }
            // fall through: insert the TAB literally
        }

        _ => {}
    }

    insert_char(rt, cl, key)
}

fn insert_char(rt: &mut Runtime, cl: &mut CmdLine, key: char) -> Result<()> {
    rt.interface.popup_clear();

    let key = if cl.machine.state.is_caseinsensitive() && rt.ed.test(edflags::EdFlags::AUTOCASEFOLD)
    {
        if key.is_lowercase() {
            key.to_uppercase().next().unwrap_or(key)
        } else {
            key.to_lowercase().next().unwrap_or(key)
        }
    } else {
        key
    };

    let mut buf = [0u8; 4];
    let bytes = key.encode_utf8(&mut buf).as_bytes().to_vec();
    insert(rt, cl, &bytes)
}

/// `^W`: the construct-aware rubout family.
fn rubout_word(rt: &mut Runtime, cl: &mut CmdLine, context: EditContext) -> Result<()> {
    let is_word = |b: u8| WORD_CHARS.contains(&b);

    if cl.modifier_enabled {
        match context {
            EditContext::Command => {
                // modifiers practically belong to the following command
                while cl.machine.state.is_start()
                    && matches!(next_byte(cl), Some(b':') | Some(b'@'))
                {
                    rubin(rt, cl)?;
                }
                loop {
                    rubin(rt, cl)?;
                    if cl.machine.state.is_start() || !can_rubin(cl) {
                        break;
                    }
                }
                while cl.machine.state.is_start()
                    && next_byte(cl).is_some_and(|b| is_noop(b as char))
                {
                    rubin(rt, cl)?;
                }
            }
            EditContext::String(_) => {
                // re-insert one word
                while matches!(cl.machine.state, State::ExpectString(_))
                    && next_byte(cl).is_some_and(is_word)
                {
                    rubin(rt, cl)?;
                }
                while matches!(cl.machine.state, State::ExpectString(_))
                    && can_rubin(cl)
                    && !next_byte(cl).is_some_and(is_word)
                {
                    rubin(rt, cl)?;
                }
            }
            _ => loop {
                rubin(rt, cl)?;
                if cl.machine.state.is_start() || !can_rubin(cl) {
                    break;
                }
            },
        }
        return Ok(());
    }

    match context {
        EditContext::String(_) if !cl.machine.expectstring.string.is_empty() => {
            // delete to the beginning of the previous word
            let was_word = last_byte(cl).is_some_and(is_word);
            rubout(rt, cl);
            if !matches!(edit_context(cl), EditContext::String(_)) {
                // we rubbed into a string-building construct; take out the
                // whole construct
                while cl.effective_len > 0
                    && !matches!(edit_context(cl), EditContext::String(_) | EditContext::Command)
                {
                    rubout(rt, cl);
                }
                return Ok(());
            }
            if !was_word {
                while !cl.machine.expectstring.string.is_empty()
                    && !last_byte(cl).is_some_and(is_word)
                {
                    rubout(rt, cl);
                }
            }
            while !cl.machine.expectstring.string.is_empty() && last_byte(cl).is_some_and(is_word) {
                rubout(rt, cl);
            }
        }
        _ => {
            // command rubout, also taking no-op whitespace and pending
            // modifiers with it
            while cl.machine.state.is_start()
                && last_byte(cl).is_some_and(|b| is_noop(b as char))
            {
                rubout(rt, cl);
            }
            loop {
                rubout(rt, cl);
                if cl.machine.state.is_start() || cl.effective_len == 0 {
                    break;
                }
            }
            while cl.machine.state.is_start()
                && (cl.machine.flags.modifier_at || cl.machine.flags.modifier_colon > 0)
                && cl.effective_len > 0
            {
                rubout(rt, cl);
            }
        }
    }
    Ok(())
}

/// TAB completion. Returns true when the TAB was consumed as a completion
/// request, false to insert it literally.
fn complete(rt: &mut Runtime, cl: &mut CmdLine, context: EditContext) -> Result<bool> {
    if rt.interface.popup_is_shown() {
        // cycle through popup pages
        rt.interface.popup_scroll();
        return Ok(true);
    }

    match context {
        // Q-Register names (short and long specifications)
        EditContext::QRegSpec => {
            let (partial, long_name) = match &cl.machine.expectqreg {
                Some(spec) => {
                    let (p, _) = spec.partial_name();
                    (p.to_vec(), spec.in_long_name())
                }
                None => match cl.machine.expectstring.machine.in_qregspec() {
                    Some(spec) => {
                        let (p, _) = spec.partial_name();
                        (p.to_vec(), spec.in_long_name())
                    }
                    None => return Ok(false),
                },
            };
            if !long_name {
                return Ok(false);
            }
            let names: Vec<Vec<u8>> = rt.qregs.globals.names().cloned().collect();
            let c = completion::complete_list(&partial, names);
            show_candidates(rt, PopupKind::Plain, &c);
            let mut chars = c.new_chars.clone();
            if c.unambiguous {
                chars.push(b']');
            }
            if !chars.is_empty() {
                insert(rt, cl, &chars)?;
            }
            Ok(true)
        }

        // file and directory arguments
        EditContext::String(cmd) if cmd.is_file() => {
            if cl.machine.expectstring.string.contains(&0) {
                return Ok(true);
            }
            let only_dirs = cmd == StringCommand::ChangeDir;
            let c = completion::complete_file(&cl.machine.expectstring.string, only_dirs);
            show_candidates(rt, PopupKind::File, &c);
            let mut chars = cl.machine.expectstring.machine.escape_for_insert(&c.new_chars);
            if c.unambiguous && cl.machine.expectstring.nesting == 1 {
                core_text::push_wc(&mut chars, insert_completion_terminator(&cl.machine));
            }
            if !chars.is_empty() {
                insert(rt, cl, &chars)?;
            }
            Ok(true)
        }

        // goto labels complete against the machine's table
        EditContext::String(StringCommand::GotoCmd) => {
            let string = &cl.machine.expectstring.string;
            let start = string
                .iter()
                .rposition(|&b| b == b',')
                .map(|i| i + 1)
                .unwrap_or(0);
            let names: Vec<Vec<u8>> = cl.machine.goto_table.names().cloned().collect();
            let c = completion::complete_list(&string[start..], names);
            show_candidates(rt, PopupKind::Plain, &c);
            let chars = cl.machine.expectstring.machine.escape_for_insert(&c.new_chars);
            if !chars.is_empty() {
                insert(rt, cl, &chars)?;
            }
            Ok(true)
        }

        // free-form strings: complete the trailing token as a file name,
        // but only when the editing modifier asks for it
        EditContext::String(_) => {
            if !cl.modifier_enabled {
                return Ok(false);
            }
            let string = &cl.machine.expectstring.string;
            let start = core_text::last_occurrence(string, BREAK_CHARS);
            let c = completion::complete_file(&string[start..], false);
            show_candidates(rt, PopupKind::File, &c);
            let mut chars = cl.machine.expectstring.machine.escape_for_insert(&c.new_chars);
            if c.unambiguous {
                chars.push(b' ');
            }
            if !chars.is_empty() {
                insert(rt, cl, &chars)?;
            }
            Ok(true)
        }

        _ => Ok(false),
    }
}

fn show_candidates(rt: &mut Runtime, kind: PopupKind, c: &completion::Completion) {
    if c.candidates.is_empty() {
        return;
    }
    for name in &c.candidates {
        rt.interface.popup_add(kind, name, false);
    }
    rt.interface.popup_show();
}

/*
 * Key macros
 */

pub enum KeyMacroStatus {
    /// Expanded (or handled) successfully.
    Done,
    /// No macro bound and no default action.
    Undefined,
}

/// Look up and expand the `^KNAME` key macro for a named function key.
pub fn keymacro(rt: &mut Runtime, cl: &mut CmdLine, name: &str) -> Result<KeyMacroStatus> {
    let mut reg_name = vec![b'\x0b'];
    reg_name.extend_from_slice(name.as_bytes());

    if qreg::exists(rt, TableSel::Globals, &reg_name) {
        let mask = qreg::get_integer(rt, TableSel::Globals, &reg_name)?;
        let state_mask = cl.machine.state.keymacro_mask();
        if state_mask & mask != 0 {
            // masked out in this state
            return Ok(KeyMacroStatus::Undefined);
        }
        let (bytes, _) = qreg::get_string(rt, TableSel::Globals, &reg_name)?;
        keypress(rt, cl, &bytes)?;
        return Ok(KeyMacroStatus::Done);
    }

    if name == "CLOSE" {
        return Err(TecoError::quit());
    }
    Ok(KeyMacroStatus::Undefined)
}
