//! String-argument collection and the commands terminated by it.
//!
//! Characters flow through the string-building machine into the collector;
//! the (possibly `@`-customised) terminator completes the argument and
//! dispatches to the command's done-handler. Insertion commands process
//! their text incrementally so interactive typing shows up immediately;
//! everything else acts once on the completed argument.

use std::path::PathBuf;

use core_view::ViewMessage;

use crate::error::{Result, TecoError};
use crate::expressions;
use crate::machine::{MachineMain, Mode, State, StringCommand};
use crate::qreg::{self, TableSel};
use crate::states::gotocmd;
use crate::states::is_noop;
use crate::states::start::{delete_bytes, insert_bytes};
use crate::{ring, Runtime};

fn fold_terminator(chr: char) -> char {
    chr.to_uppercase().next().unwrap_or(chr)
}

pub fn input(rt: &mut Runtime, m: &mut MachineMain, cmd: StringCommand, chr: char) -> Result<State> {
    // whitespace immediately after @-modified commands is ignored, so
    // `@I /text/` works as expected
    if m.flags.modifier_at && is_noop(chr) {
        return Ok(m.state);
    }
    if m.eval_at() {
        m.expectstring.machine.escape_char = fold_terminator(chr);
        return Ok(m.state);
    }

    // Terminator detection only applies while the string-building machine
    // is at a construct boundary, so `^Q$` never ends the argument.
    if m.expectstring.machine.at_start() {
        if m.expectstring.machine.escape_char == '{' {
            match chr {
                '{' => m.expectstring.nesting += 1,
                '}' => m.expectstring.nesting -= 1,
                _ => {}
            }
        } else if fold_terminator(chr) == m.expectstring.machine.escape_char {
            m.expectstring.nesting -= 1;
        }
    }

    if m.expectstring.nesting == 0 {
        process_pending(rt, m, cmd)?;

        let string = std::mem::take(&mut m.expectstring.string);
        if m.must_undo {
            // the completed argument must come back when its terminator is
            // rubbed out
            let old = string.clone();
            rt.undo.push(move |_, m| m.expectstring.string = old);
        }

        let next = done(rt, m, cmd, &string)?;

        if cmd.is_last() {
            m.expectstring.machine.escape_char = '\x1b';
        } else if m.expectstring.machine.escape_char == '{' {
            // @FR{from}{to}: expect the brace form again for the next one
            m.flags.modifier_at = true;
        }
        m.expectstring.nesting = 1;
        if cmd.string_building() {
            m.expectstring.machine.reset();
        }
        m.expectstring.insert_len = 0;
        return Ok(next);
    }

    let old_len = m.expectstring.string.len();
    if cmd.string_building() {
        let mut string = std::mem::take(&mut m.expectstring.string);
        let result = (m.flags.mode == Mode::Normal).then_some(&mut string);
        let r = m.expectstring.machine.input(rt, m.locals, chr, result);
        m.expectstring.string = string;
        r?;
    } else if m.flags.mode == Mode::Normal {
        core_text::push_wc(&mut m.expectstring.string, chr);
    }
    m.expectstring.insert_len += m.expectstring.string.len() - old_len;

    Ok(m.state)
}

/// Interactive feedback at the end of available input: insertion commands
/// apply the bytes typed so far.
pub fn expectstring_refresh(rt: &mut Runtime, m: &mut MachineMain) -> Result<()> {
    let State::ExpectString(cmd) = m.state else {
        return Ok(());
    };
    process_pending(rt, m, cmd)?;
    m.expectstring.insert_len = 0;
    Ok(())
}

fn process_pending(rt: &mut Runtime, m: &mut MachineMain, cmd: StringCommand) -> Result<()> {
    if m.expectstring.insert_len == 0 || m.flags.mode != Mode::Normal {
        return Ok(());
    }
    if matches!(cmd, StringCommand::InsertPlain | StringCommand::InsertIndent) {
        let start = m.expectstring.string.len() - m.expectstring.insert_len;
        let bytes = m.expectstring.string[start..].to_vec();
        m.expectstring.insert_len = 0;
        insert_bytes(rt, &bytes)?;
    }
    Ok(())
}

/// The terminator after a full completion: the escape char, or `}` for the
/// brace form.
pub fn insert_completion_terminator(m: &MachineMain) -> char {
    if m.expectstring.machine.escape_char == '{' {
        '}'
    } else {
        m.expectstring.machine.escape_char
    }
}

fn file_arg(string: &[u8]) -> Result<PathBuf> {
    if string.contains(&0) {
        return Err(TecoError::failed("Null-character not allowed in filenames"));
    }
    let s = std::str::from_utf8(string)
        .map_err(|_| TecoError::failed("Filename is not valid UTF-8"))?;
    Ok(PathBuf::from(s))
}

fn pending_qreg(m: &mut MachineMain) -> Result<(TableSel, Vec<u8>)> {
    m.pending_qreg
        .take()
        .ok_or_else(|| TecoError::failed("No Q-Register for string argument"))
}

fn done(rt: &mut Runtime, m: &mut MachineMain, cmd: StringCommand, string: &[u8]) -> Result<State> {
    let exec = m.flags.mode == Mode::Normal;

    match cmd {
        StringCommand::InsertPlain | StringCommand::InsertIndent => Ok(State::Start),

        StringCommand::SetQRegString => {
            if exec {
                let (sel, name) = pending_qreg(m)?;
                let append = m.eval_colon() > 0;
                let cp = rt.default_codepage;
                if append {
                    qreg::append_string(rt, sel, &name, string)?;
                } else {
                    qreg::set_string(rt, sel, &name, string, cp)?;
                }
            }
            Ok(State::Start)
        }

        StringCommand::Search => {
            if exec {
                search_done(rt, m, string)?;
            }
            Ok(State::Start)
        }

        StringCommand::FrSearch => {
            if exec {
                if m.must_undo {
                    let old = m.fr_arg.clone();
                    rt.undo.push(move |_, m| m.fr_arg = old);
                }
                m.fr_arg = Some(string.to_vec());
            }
            Ok(State::ExpectString(StringCommand::FrReplace))
        }

        StringCommand::FrReplace => {
            if exec {
                replace_done(rt, m, string)?;
            }
            Ok(State::Start)
        }

        StringCommand::GotoCmd => {
            if exec {
                gotocmd::goto_done(rt, m, string)?;
            }
            Ok(State::Start)
        }

        StringCommand::EditFile => {
            if exec && m.allow_filename {
                if string.is_empty() {
                    ring::edit_name(rt, None)?;
                } else {
                    let path = file_arg(string)?;
                    ring::edit_name(rt, Some(&path))?;
                }
            }
            Ok(State::Start)
        }

        StringCommand::WriteFile => {
            if exec {
                let colon = m.eval_colon() > 0;
                let path = if string.is_empty() {
                    None
                } else {
                    Some(file_arg(string)?)
                };
                ring::save(rt, path.as_deref())?;
                if colon {
                    expressions::push_num(rt, -1);
                }
            }
            Ok(State::Start)
        }

        StringCommand::LoadQReg => {
            if exec {
                let (sel, name) = pending_qreg(m)?;
                if string.is_empty() {
                    qreg::edit(rt, sel, &name)?;
                } else {
                    let path = file_arg(string)?;
                    qreg::load(rt, sel, &name, &path)?;
                }
            }
            Ok(State::Start)
        }

        StringCommand::SaveQRegFile => {
            if exec {
                let (sel, name) = pending_qreg(m)?;
                if string.is_empty() {
                    return Err(TecoError::failed("Filename expected for <E%>"));
                }
                let path = file_arg(string)?;
                qreg::save(rt, sel, &name, &path)?;
            }
            Ok(State::Start)
        }

        StringCommand::ChangeDir => {
            if exec {
                let target = if string.is_empty() {
                    std::env::var_os("HOME")
                        .map(|h| h.to_string_lossy().into_owned().into_bytes())
                        .ok_or_else(|| TecoError::failed("Home directory unknown"))?
                } else {
                    string.to_vec()
                };
                let cp = rt.default_codepage;
                qreg::set_string(rt, TableSel::Globals, b"$", &target, cp)?;
            }
            Ok(State::Start)
        }
    }
}

/*
 * Text search. Plain byte-wise search of the current document; patterns
 * are literal (the full pattern language is not part of the runtime core).
 */

/// Find the `count`-th occurrence of `needle` from dot. Positive counts
/// search forward (dot lands after the match), negative ones backward (dot
/// lands at the match start). Returns the match range on success.
fn find_in_view(rt: &mut Runtime, needle: &str, count: i64) -> Option<(usize, usize)> {
    let (docs, view) = rt.docs_and_current_view();
    let text = docs.get_range_bytes(view.doc, 0, docs.len(view.doc));
    let text = String::from_utf8_lossy(&text).into_owned();
    let chars: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = needle.chars().collect();
    if pattern.is_empty() || pattern.len() > chars.len() {
        return None;
    }

    let matches_at = |i: usize| chars[i..].starts_with(&pattern);

    if count >= 0 {
        let mut remaining = count.max(1);
        let mut i = view.dot;
        while i + pattern.len() <= chars.len() {
            if matches_at(i) {
                remaining -= 1;
                if remaining == 0 {
                    return Some((i, i + pattern.len()));
                }
            }
            i += 1;
        }
    } else {
        let mut remaining = -count;
        let mut i = view.dot.min(chars.len());
        while i > 0 {
            i -= 1;
            if i + pattern.len() <= chars.len() && matches_at(i) {
                remaining -= 1;
                if remaining == 0 {
                    return Some((i, i + pattern.len()));
                }
            }
        }
    }
    None
}

fn search_done(rt: &mut Runtime, m: &mut MachineMain, pattern: &[u8]) -> Result<()> {
    let colon = m.eval_colon() > 0;
    let count = expressions::pop_num_calc_signed(rt)?;

    // an empty pattern repeats the last search
    let pattern = if pattern.is_empty() {
        qreg::get_string(rt, TableSel::Globals, b"_")?.0
    } else {
        let cp = rt.default_codepage;
        qreg::set_string(rt, TableSel::Globals, b"_", pattern, cp)?;
        pattern.to_vec()
    };
    if pattern.is_empty() {
        return Err(TecoError::failed("No previous search pattern"));
    }
    let needle = String::from_utf8_lossy(&pattern).into_owned();

    let found = find_in_view(rt, &needle, count);
    if let Some((start, end)) = found {
        let (anchor, dot) = {
            let view = rt.current_view();
            (view.anchor, view.dot)
        };
        rt.undo_view_msg(ViewMessage::SetSel { anchor, dot });
        let target = if count >= 0 { end } else { start };
        let (docs, view) = rt.docs_and_current_view();
        view.goto_pos(docs, target);
    }

    qreg::set_integer(
        rt,
        TableSel::Globals,
        b"_",
        if found.is_some() { -1 } else { 0 },
    )?;
    if colon {
        expressions::push_num(rt, if found.is_some() { -1 } else { 0 });
    } else if found.is_none() {
        return Err(TecoError::failed(format!("Search string \"{needle}\" not found")));
    }
    Ok(())
}

fn replace_done(rt: &mut Runtime, m: &mut MachineMain, replacement: &[u8]) -> Result<()> {
    let colon = m.eval_colon() > 0;

    let needle_bytes = match m.fr_arg.take() {
        Some(n) => {
            if m.must_undo {
                let restore = n.clone();
                rt.undo.push(move |_, m| m.fr_arg = Some(restore));
            }
            n
        }
        None => Vec::new(),
    };
    let needle_bytes = if needle_bytes.is_empty() {
        qreg::get_string(rt, TableSel::Globals, b"_")?.0
    } else {
        needle_bytes
    };
    if needle_bytes.is_empty() {
        return Err(TecoError::failed("No search pattern for <FR>"));
    }
    let needle = String::from_utf8_lossy(&needle_bytes).into_owned();

    match find_in_view(rt, &needle, 1) {
        Some((start, end)) => {
            delete_bytes(rt, start, end - start);
            let (docs, view) = rt.docs_and_current_view();
            view.goto_pos(docs, start);
            insert_bytes(rt, replacement)?;
            if colon {
                expressions::push_num(rt, -1);
            }
            Ok(())
        }
        None => {
            if colon {
                expressions::push_num(rt, 0);
                Ok(())
            } else {
                Err(TecoError::failed(format!("Search string \"{needle}\" not found")))
            }
        }
    }
}

/*
 * Entry hooks
 */

/// `nI…$` inserts the argument code points before the string.
pub fn insert_initial(rt: &mut Runtime, m: &mut MachineMain) -> Result<()> {
    if m.flags.mode != Mode::Normal {
        return Ok(());
    }
    expressions::eval(rt, false)?;
    let n = rt.expressions.args();
    if n == 0 {
        return Ok(());
    }

    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(expressions::pop_num(rt).unwrap_or(0));
    }
    values.reverse();

    let cp = rt.current_codepage();
    let mut bytes = Vec::new();
    for v in values {
        let valid = match cp {
            core_view::Codepage::Utf8 => u32::try_from(v)
                .ok()
                .and_then(char::from_u32)
                .map(|c| core_text::push_wc(&mut bytes, c))
                .is_some(),
            core_view::Codepage::SingleByte => {
                if (0..=0xff).contains(&v) {
                    bytes.push(v as u8);
                    true
                } else {
                    false
                }
            }
        };
        if !valid {
            return Err(TecoError::new(
                crate::error::ErrorKind::CodePoint,
                format!("<I> argument {v} is not a valid codepoint"),
            ));
        }
    }
    insert_bytes(rt, &bytes)
}

/// `EB` reacts immediately to a numeric argument, before the string: a
/// positive id switches buffers, zero pops up the ring listing.
pub fn edit_file_initial(rt: &mut Runtime, m: &mut MachineMain) -> Result<()> {
    m.allow_filename = true;
    if m.flags.mode != Mode::Normal {
        return Ok(());
    }
    expressions::eval(rt, false)?;
    if rt.expressions.args() == 0 {
        return Ok(());
    }

    let id = expressions::pop_num_calc(rt, -1)?;
    if id == 0 {
        for (i, buffer) in rt.ring.buffers.iter().enumerate() {
            let name = buffer
                .filename
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "(Unnamed)".to_string());
            rt.interface.popup_add(
                crate::interface::PopupKind::File,
                name.as_bytes(),
                i == rt.ring.current,
            );
        }
        rt.interface.popup_show();
    } else if id > 0 {
        m.allow_filename = false;
        ring::edit_id(rt, id)?;
    }
    Ok(())
}
