//! The start state and its single-character command set, plus the caret
//! (`^x`), escape, `^^`-constant and conditional states.
//!
//! Commands that merely transition (string arguments, register
//! specifications) do so in every mode so the parse-only modes consume
//! exactly the same characters as execution would. Semantic actions are
//! gated on `Normal` mode.

use core_view::ViewMessage;

use crate::error::{Result, TecoError};
use crate::expressions::{self, Op};
use crate::interface::MsgLevel;
use crate::machine::{MachineMain, Mode, QRegCommand, State, StringCommand};
use crate::states::is_noop;
use crate::{qreg, ring, LoopFrame, Runtime};

fn radix(rt: &Runtime, m: &MachineMain) -> i64 {
    rt.qregs.locals[m.locals].radix
}

fn set_radix(rt: &mut Runtime, m: &MachineMain, value: i64) -> Result<()> {
    qreg::set_integer(
        rt,
        crate::qreg::TableSel::Locals(m.locals),
        qreg::NAME_RADIX,
        value,
    )?;
    Ok(())
}

/// Leave a parse-only mode; skipping bookkeeping starts afresh.
fn leave_parse_only(m: &mut MachineMain) {
    m.flags.mode = Mode::Normal;
    m.flags.nest_level = 0;
    m.flags.skip_else = false;
}

/// Insert bytes at dot in the current view, with undo and dirty tracking.
pub(crate) fn insert_bytes(rt: &mut Runtime, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let (anchor, dot) = {
        let view = rt.current_view();
        (view.anchor, view.dot)
    };
    rt.undo_view_msg(ViewMessage::SetSel { anchor, dot });
    rt.undo_view_msg(ViewMessage::Undo);

    let (docs, view) = rt.docs_and_current_view();
    docs.begin_undo_action(view.doc);
    let result = view.add_text(docs, bytes);
    let doc = view.doc;
    docs.end_undo_action(doc);
    result.map_err(|e| TecoError::new(crate::error::ErrorKind::CodePoint, e.to_string()))?;
    ring::dirtify(rt);
    Ok(())
}

/// Delete a character range from the current view, with undo and dirty
/// tracking. `from`/`len` are positions, pre-validated by the caller.
pub(crate) fn delete_bytes(rt: &mut Runtime, from: usize, len: usize) {
    if len == 0 {
        return;
    }
    let (anchor, dot) = {
        let view = rt.current_view();
        (view.anchor, view.dot)
    };
    rt.undo_view_msg(ViewMessage::SetSel { anchor, dot });
    rt.undo_view_msg(ViewMessage::Undo);

    let (docs, view) = rt.docs_and_current_view();
    let doc = view.doc;
    docs.begin_undo_action(doc);
    view.delete_range(docs, from, len);
    docs.end_undo_action(doc);
    ring::dirtify(rt);
}

fn move_to(rt: &mut Runtime, target: i64, colon: bool, cmd: char) -> Result<()> {
    let (docs, view) = rt.docs_and_current_view();
    let len = docs.len(view.doc) as i64;
    if target < 0 || target > len {
        if colon {
            expressions::push_num(rt, 0);
            return Ok(());
        }
        return Err(TecoError::range(&cmd.to_string()));
    }
    let (anchor, dot) = (view.anchor, view.dot);
    rt.undo_view_msg(ViewMessage::SetSel { anchor, dot });
    let (docs, view) = rt.docs_and_current_view();
    view.goto_pos(docs, target as usize);
    if colon {
        expressions::push_num(rt, -1);
    }
    Ok(())
}

fn move_lines(rt: &mut Runtime, n: i64, colon: bool, cmd: char) -> Result<()> {
    let (docs, view) = rt.docs_and_current_view();
    let doc = view.doc;
    let line = docs.line_of_pos(doc, view.dot) as i64 + n;
    let clamped = line.clamp(0, docs.len_lines(doc) as i64);
    let target = docs.pos_of_line(doc, clamped as usize) as i64;
    move_to(rt, target, colon, cmd)
}

/// Range arguments of `D`, `K` and `X`: either `from,to` or a (signed)
/// count of characters/lines relative to dot.
pub(crate) fn range_args(rt: &mut Runtime, lines: bool, cmd: char) -> Result<(usize, usize)> {
    expressions::eval(rt, false)?;
    let (docs, view) = rt.docs_and_current_view();
    let doc = view.doc;
    let dot = view.dot as i64;
    let doc_len = docs.len(doc) as i64;

    let (from, len) = if rt.expressions.args() <= 1 {
        let n = expressions::pop_num_calc_signed(rt)?;
        let (docs, view) = rt.docs_and_current_view();
        let end = if lines {
            let line = docs.line_of_pos(doc, view.dot) as i64 + n;
            if line < 0 || line > docs.len_lines(doc) as i64 {
                return Err(TecoError::range(&cmd.to_string()));
            }
            docs.pos_of_line(doc, line as usize) as i64
        } else {
            dot + n
        };
        if end < dot {
            (end, dot - end)
        } else {
            (dot, end - dot)
        }
    } else {
        let to = expressions::pop_num(rt).unwrap_or(0);
        let from = expressions::pop_num(rt).unwrap_or(0);
        if to < from {
            return Err(TecoError::range(&cmd.to_string()));
        }
        (from, to - from)
    };

    if from < 0 || from + len > doc_len {
        return Err(TecoError::range(&cmd.to_string()));
    }
    Ok((from as usize, len as usize))
}

pub fn input(rt: &mut Runtime, m: &mut MachineMain, chr: char) -> Result<State> {
    // control keys behave like their caret spelling; this also routes ESC
    // (= ^[) into the escape state
    if core_text::is_ctl(chr) {
        m.flags.num_pending = false;
        return control_input(rt, m, core_text::ctl_echo(chr));
    }

    if let Some(digit) = chr.to_digit(10) {
        m.reject_at(chr)?;
        if m.flags.mode == Mode::Normal {
            let cont = m.flags.num_pending;
            let r = radix(rt, m);
            expressions::add_digit(rt, digit, r, cont);
        }
        m.flags.num_pending = true;
        return Ok(State::Start);
    }
    m.flags.num_pending = false;

    let exec = m.flags.mode == Mode::Normal;

    match core_text::ascii_toupper(chr) {
        c if is_noop(c) => {}

        /*
         * modifiers
         */
        '@' => {
            if m.flags.modifier_at {
                return Err(TecoError::modifier(chr));
            }
            m.flags.modifier_at = true;
        }
        ':' => {
            if m.flags.modifier_colon >= 2 {
                return Err(TecoError::modifier(chr));
            }
            m.flags.modifier_colon += 1;
        }

        /*
         * arithmetics
         */
        '+' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::push_calc(rt, Op::Add)?;
            }
        }
        '-' => {
            m.reject_modifiers(chr)?;
            if exec {
                if rt.expressions.args() == 0 {
                    let sign = rt.expressions.num_sign;
                    expressions::set_num_sign(rt, -sign);
                } else {
                    expressions::push_calc(rt, Op::Sub)?;
                }
            }
        }
        '/' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::push_calc(rt, Op::Div)?;
            }
        }
        '&' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::push_calc(rt, Op::And)?;
            }
        }
        '#' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::push_calc(rt, Op::Or)?;
            }
        }
        '*' => {
            // only at the very start of a command line: save last command line
            if exec && m.must_undo && m.macro_pc == 1 {
                return Ok(State::ExpectQReg(QRegCommand::SaveCmdline));
            }
            m.reject_modifiers(chr)?;
            if exec {
                expressions::push_calc(rt, Op::Mul)?;
            }
        }
        '(' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::brace_open(rt);
            }
        }
        ')' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::brace_close(rt)?;
            }
        }
        ',' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::new_arg(rt)?;
            }
        }

        /*
         * positions
         */
        '.' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::eval(rt, false)?;
                let dot = rt.current_view().dot as i64;
                expressions::push_num(rt, dot);
            }
        }
        'Z' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::eval(rt, false)?;
                let (docs, view) = rt.docs_and_current_view();
                let len = docs.len(view.doc) as i64;
                expressions::push_num(rt, len);
            }
        }
        'H' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::eval(rt, false)?;
                let (docs, view) = rt.docs_and_current_view();
                let len = docs.len(view.doc) as i64;
                expressions::push_num(rt, 0);
                expressions::push_num(rt, len);
            }
        }

        /*
         * movement
         */
        'C' => {
            m.reject_at(chr)?;
            if exec {
                let colon = m.eval_colon() > 0;
                let n = expressions::pop_num_calc_signed(rt)?;
                let dot = rt.current_view().dot as i64;
                move_to(rt, dot + n, colon, 'C')?;
            }
        }
        'R' => {
            m.reject_at(chr)?;
            if exec {
                let colon = m.eval_colon() > 0;
                let n = expressions::pop_num_calc_signed(rt)?;
                let dot = rt.current_view().dot as i64;
                move_to(rt, dot - n, colon, 'R')?;
            }
        }
        'L' => {
            m.reject_at(chr)?;
            if exec {
                let colon = m.eval_colon() > 0;
                let n = expressions::pop_num_calc_signed(rt)?;
                move_lines(rt, n, colon, 'L')?;
            }
        }
        'B' => {
            m.reject_at(chr)?;
            if exec {
                let colon = m.eval_colon() > 0;
                let n = expressions::pop_num_calc_signed(rt)?;
                move_lines(rt, -n, colon, 'B')?;
            }
        }
        'J' => {
            m.reject_at(chr)?;
            if exec {
                let colon = m.eval_colon() > 0;
                let pos = expressions::pop_num_calc(rt, 0)?;
                move_to(rt, pos, colon, 'J')?;
            }
        }

        /*
         * deletion
         */
        'D' => {
            m.reject_at(chr)?;
            if exec {
                let colon = m.eval_colon() > 0;
                match range_args(rt, false, 'D') {
                    Ok((from, len)) => {
                        delete_bytes(rt, from, len);
                        if colon {
                            expressions::push_num(rt, -1);
                        }
                    }
                    Err(e) => {
                        if !colon {
                            return Err(e);
                        }
                        expressions::push_num(rt, 0);
                    }
                }
            }
        }
        'K' => {
            m.reject_modifiers(chr)?;
            if exec {
                let (from, len) = range_args(rt, true, 'K')?;
                delete_bytes(rt, from, len);
            }
        }

        /*
         * number output and conversion
         */
        '=' => {
            m.reject_at(chr)?;
            if exec {
                let _colon = m.eval_colon();
                let v = expressions::pop_num_required(rt, "=")?;
                let r = radix(rt, m);
                let text = expressions::format(v, r);
                rt.interface.msg(MsgLevel::User, &text);
            }
        }
        '\\' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::eval(rt, false)?;
                let r = radix(rt, m);
                if rt.expressions.args() == 0 {
                    backslash_scan(rt, r)?;
                } else {
                    let v = expressions::pop_num_calc(rt, 0)?;
                    insert_bytes(rt, expressions::format(v, r).as_bytes())?;
                }
            }
        }

        /*
         * control structures: loops
         */
        '<' => {
            m.reject_modifiers(chr)?;
            if !exec {
                m.flags.nest_level += 1;
                return Ok(State::Start);
            }
            expressions::eval(rt, false)?;
            if rt.expressions.args() == 0 {
                // infinite loop
                expressions::push_num(rt, -1);
            }
            if rt.expressions.peek_num() == Some(0) {
                expressions::pop_num(rt);
                m.flags.mode = Mode::ParseOnly;
            } else {
                let counter = expressions::pop_num(rt).expect("argument checked above");
                rt.undo.push(|rt, _| {
                    rt.loop_stack.pop();
                });
                rt.loop_stack.push(LoopFrame {
                    pc: m.macro_pc,
                    counter,
                });
                expressions::push_loop_marker(rt);
            }
        }
        '>' => {
            m.reject_modifiers(chr)?;
            match m.flags.mode {
                Mode::ParseOnly => {
                    if m.flags.nest_level == 0 {
                        leave_parse_only(m);
                    } else {
                        m.flags.nest_level -= 1;
                    }
                }
                Mode::Normal => {
                    if rt.loop_stack.len() <= m.loop_fp {
                        return Err(TecoError::failed("Loop end without corresponding loop start"));
                    }
                    expressions::discard_args(rt)?;
                    expressions::pop_loop_marker(rt);
                    let frame = *rt.loop_stack.last().expect("frame pointer checked");
                    if frame.counter != 1 {
                        m.macro_pc = frame.pc;
                        let new_counter = (frame.counter - 1).max(-1);
                        rt.undo.push(move |rt, _| {
                            if let Some(f) = rt.loop_stack.last_mut() {
                                f.counter = frame.counter;
                            }
                        });
                        rt.loop_stack.last_mut().expect("checked").counter = new_counter;
                        expressions::push_loop_marker(rt);
                    } else {
                        let f = rt.loop_stack.pop().expect("checked");
                        rt.undo.push(move |rt, _| rt.loop_stack.push(f));
                    }
                }
                _ => {}
            }
        }
        ';' => {
            m.reject_at(chr)?;
            if exec {
                let colon = m.eval_colon() > 0;
                if rt.loop_stack.len() <= m.loop_fp {
                    return Err(TecoError::failed("<;> only allowed in loops"));
                }
                let mut v = expressions::pop_num_calc_signed(rt)?;
                if colon {
                    v = !v;
                }
                if v >= 0 {
                    expressions::discard_args(rt)?;
                    expressions::pop_loop_marker(rt);
                    let f = rt.loop_stack.pop().expect("checked above");
                    rt.undo.push(move |rt, _| rt.loop_stack.push(f));
                    m.flags.mode = Mode::ParseOnly;
                }
            }
        }

        /*
         * control structures: conditionals
         */
        '"' => {
            m.reject_modifiers(chr)?;
            if !exec {
                m.flags.nest_level += 1;
            }
            return Ok(State::CondCommand);
        }
        '|' => {
            m.reject_modifiers(chr)?;
            match m.flags.mode {
                Mode::Normal => {
                    // end of the taken branch: skip the else-part
                    m.flags.mode = Mode::ParseOnly;
                    m.flags.skip_else = true;
                }
                Mode::ParseOnly if !m.flags.skip_else && m.flags.nest_level == 0 => {
                    leave_parse_only(m);
                }
                _ => {}
            }
        }
        '\'' => {
            m.reject_modifiers(chr)?;
            if m.flags.mode == Mode::ParseOnly {
                if m.flags.nest_level == 0 {
                    leave_parse_only(m);
                } else {
                    m.flags.nest_level -= 1;
                }
            }
        }

        /*
         * command-line replacement
         */
        '}' => {
            m.reject_modifiers(chr)?;
            if exec {
                // legal from macros too, as long as there is a command line
                // to replace
                if !rt.undo.enabled {
                    return Err(TecoError::failed(
                        "Command line replacement only allowed interactively",
                    ));
                }
                return Err(TecoError::cmdline_replace());
            }
        }

        /*
         * transitions
         */
        '!' => return Ok(State::Label),
        '^' => return Ok(State::Control),
        'E' => return Ok(State::ECommand),
        'F' => return Ok(State::FCommand),
        'I' => return Ok(State::ExpectString(StringCommand::InsertPlain)),
        'S' => return Ok(State::ExpectString(StringCommand::Search)),
        'O' => return Ok(State::ExpectString(StringCommand::GotoCmd)),
        'Q' => return Ok(State::ExpectQReg(QRegCommand::GetInt)),
        'U' => return Ok(State::ExpectQReg(QRegCommand::SetInt)),
        '%' => return Ok(State::ExpectQReg(QRegCommand::Increase)),
        'G' => return Ok(State::ExpectQReg(QRegCommand::GetString)),
        'X' => return Ok(State::ExpectQReg(QRegCommand::CopyTo)),
        'M' => return Ok(State::ExpectQReg(QRegCommand::MacroCall)),
        '[' => return Ok(State::ExpectQReg(QRegCommand::Push)),
        ']' => return Ok(State::ExpectQReg(QRegCommand::Pop)),

        _ => return Err(TecoError::syntax(chr)),
    }

    Ok(State::Start)
}

/// `\` without arguments: scan a number at dot in the current radix, push
/// it, and advance dot past the digits.
fn backslash_scan(rt: &mut Runtime, radix: i64) -> Result<()> {
    let (docs, view) = rt.docs_and_current_view();
    let doc = view.doc;
    let len = docs.len(doc);
    let mut pos = view.dot;
    let mut sign = 1i64;

    if docs.char_at(doc, pos) == Some('-') {
        sign = -1;
        pos += 1;
    }
    let mut value: i64 = 0;
    let mut digits = 0usize;
    while pos < len {
        let Some(d) = docs
            .char_at(doc, pos)
            .and_then(|c| c.to_ascii_uppercase().to_digit(radix as u32))
        else {
            break;
        };
        value = value.wrapping_mul(radix).wrapping_add(d as i64);
        digits += 1;
        pos += 1;
    }

    if digits == 0 {
        expressions::push_num(rt, 0);
        return Ok(());
    }
    expressions::push_num(rt, sign * value);
    move_to(rt, pos as i64, false, '\\')
}

pub fn escape_input(rt: &mut Runtime, m: &mut MachineMain, chr: char) -> Result<State> {
    if chr == '\x1b' {
        if m.flags.mode != Mode::Normal {
            return Ok(State::Start);
        }
        // double escape: return from macro / terminate the command line.
        // The machine must read as being at a command start when the
        // control-flow error is caught further out.
        m.state = State::Start;
        rt.return_args = rt.expressions.args();
        return Err(TecoError::ret());
    }

    // a lone escape discards pending arguments
    if m.flags.mode == Mode::Normal {
        expressions::discard_args(rt)?;
    }
    m.state = State::Start;
    input(rt, m, chr)
}

pub fn control_input(rt: &mut Runtime, m: &mut MachineMain, chr: char) -> Result<State> {
    let exec = m.flags.mode == Mode::Normal;

    match core_text::ascii_toupper(chr) {
        '[' => return Ok(State::Escape),
        '^' => return Ok(State::Ascii),
        'U' => return Ok(State::ExpectQReg(QRegCommand::SetString)),
        'C' => {
            m.reject_modifiers(chr)?;
            if exec {
                return Err(TecoError::interrupted());
            }
        }
        'O' => {
            m.reject_modifiers(chr)?;
            if exec {
                set_radix(rt, m, 8)?;
            }
        }
        'D' => {
            m.reject_modifiers(chr)?;
            if exec {
                set_radix(rt, m, 10)?;
            }
        }
        'R' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::eval(rt, false)?;
                if rt.expressions.args() == 0 {
                    let r = radix(rt, m);
                    expressions::push_num(rt, r);
                } else {
                    let r = expressions::pop_num_calc(rt, 10)?;
                    set_radix(rt, m, r)?;
                }
            }
        }
        'I' => {
            // ^I: insertion with a leading TAB
            if exec {
                expressions::eval(rt, false)?;
                expressions::push_num(rt, '\t' as i64);
            }
            return Ok(State::ExpectString(StringCommand::InsertIndent));
        }
        '_' => {
            m.reject_modifiers(chr)?;
            if exec {
                let v = expressions::pop_num_calc_signed(rt)?;
                expressions::push_num(rt, !v);
            }
        }
        '*' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::push_calc(rt, Op::Pow)?;
            }
        }
        '/' => {
            m.reject_modifiers(chr)?;
            if exec {
                expressions::push_calc(rt, Op::Mod)?;
            }
        }
        _ => return Err(TecoError::syntax(chr)),
    }

    Ok(State::Start)
}

/// After `^^`: the next code point becomes a number.
pub fn ascii_input(rt: &mut Runtime, m: &mut MachineMain, chr: char) -> Result<State> {
    if m.flags.mode == Mode::Normal {
        expressions::eval(rt, false)?;
        expressions::push_num(rt, chr as i64);
    }
    Ok(State::Start)
}

/// Conditional predicates (`"x`). A false condition skips to the matching
/// `|` or `'`.
pub fn cond_input(rt: &mut Runtime, m: &mut MachineMain, chr: char) -> Result<State> {
    if m.flags.mode != Mode::Normal {
        return Ok(State::Start);
    }

    let v = expressions::pop_num_required(rt, "\"")?;
    let chr_of = |v: i64| u32::try_from(v).ok().and_then(char::from_u32);

    let truth = match core_text::ascii_toupper(chr) {
        'A' => chr_of(v).is_some_and(|c| c.is_alphabetic()),
        'C' => chr_of(v).is_some_and(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '$')),
        'D' => chr_of(v).is_some_and(|c| c.is_ascii_digit()),
        'R' => chr_of(v).is_some_and(|c| c.is_alphanumeric()),
        'V' => chr_of(v).is_some_and(|c| c.is_lowercase()),
        'W' => chr_of(v).is_some_and(|c| c.is_uppercase()),
        'E' | 'F' | 'U' | '=' => v == 0,
        'G' | '>' => v > 0,
        'L' | 'S' | 'T' | '<' => v < 0,
        'N' => v != 0,
        _ => return Err(TecoError::syntax(chr)),
    };

    if !truth {
        m.flags.mode = Mode::ParseOnly;
        m.flags.skip_else = false;
    }
    Ok(State::Start)
}
