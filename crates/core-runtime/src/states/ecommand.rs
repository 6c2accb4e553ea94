//! The two-letter `E` and `F` command families.

use crate::error::{Result, TecoError};
use crate::expressions;
use crate::machine::{MachineMain, Mode, QRegCommand, State, StringCommand};
use crate::{ring, Runtime};

pub fn input(rt: &mut Runtime, m: &mut MachineMain, chr: char) -> Result<State> {
    let exec = m.flags.mode == Mode::Normal;

    match core_text::ascii_toupper(chr) {
        'B' => return Ok(State::ExpectString(StringCommand::EditFile)),
        'W' => return Ok(State::ExpectString(StringCommand::WriteFile)),
        'Q' => return Ok(State::ExpectQReg(QRegCommand::EditOrLoad)),
        '%' => return Ok(State::ExpectQReg(QRegCommand::SaveToFile)),

        'D' => {
            m.reject_at(chr)?;
            if exec {
                expressions::eval(rt, false)?;
                if rt.expressions.args() == 0 {
                    let flags = rt.ed.0;
                    expressions::push_num(rt, flags);
                } else {
                    let v = expressions::pop_num_calc(rt, 0)?;
                    let old = rt.ed;
                    rt.undo.push(move |rt, _| rt.ed = old);
                    rt.ed = crate::edflags::EdFlags(v);
                }
            }
        }

        'F' => {
            m.reject_at(chr)?;
            if exec {
                let force = m.eval_colon() > 0;
                if rt.ring.current().dirty && !force {
                    return Err(TecoError::failed(
                        "Buffer has unsaved changes; use <:EF> to discard them",
                    ));
                }
                ring::close_current(rt)?;
            }
        }

        'J' => {
            m.reject_at(chr)?;
            if exec {
                let what = expressions::pop_num_calc(rt, 1)?;
                let v = match what {
                    0 => rt.ring.current_id(),
                    1 => rt.ring.buffers.len() as i64,
                    2 => rt.ring.first_dirty(),
                    _ => return Err(TecoError::range("EJ")),
                };
                expressions::push_num(rt, v);
            }
        }

        'L' => {
            m.reject_at(chr)?;
            if exec {
                expressions::eval(rt, false)?;
                if rt.expressions.args() == 0 {
                    let code = eol_code(rt.ring.current().eol_mode);
                    expressions::push_num(rt, code);
                } else {
                    let code = expressions::pop_num_calc(rt, 2)?;
                    let mode = eol_from_code(code).ok_or_else(|| TecoError::range("EL"))?;
                    let idx = rt.ring.current;
                    let old = rt.ring.buffers[idx].eol_mode;
                    rt.undo.push(move |rt, _| {
                        if let Some(b) = rt.ring.buffers.get_mut(idx) {
                            b.eol_mode = old;
                        }
                    });
                    rt.ring.buffers[idx].eol_mode = mode;
                }
            }
        }

        'X' => {
            m.reject_at(chr)?;
            if exec {
                let force = m.eval_colon() > 0;
                if !force && rt.ring.first_dirty() != 0 {
                    return Err(TecoError::failed(
                        "Unsaved files in the ring; use <:EX> to quit anyway",
                    ));
                }
                rt.undo.push(|rt, _| rt.quit_requested = false);
                rt.quit_requested = true;
            }
        }

        _ => return Err(TecoError::syntax(chr)),
    }

    Ok(State::Start)
}

pub fn fcommand_input(_rt: &mut Runtime, _m: &mut MachineMain, chr: char) -> Result<State> {
    match core_text::ascii_toupper(chr) {
        'G' => Ok(State::ExpectString(StringCommand::ChangeDir)),
        'R' => Ok(State::ExpectString(StringCommand::FrSearch)),
        _ => Err(TecoError::syntax(chr)),
    }
}

/// EOL modes use the editing component's encoding: 0 = CRLF, 1 = CR, 2 = LF.
fn eol_code(mode: core_view::EolMode) -> i64 {
    match mode {
        core_view::EolMode::CrLf => 0,
        core_view::EolMode::Cr => 1,
        core_view::EolMode::Lf => 2,
    }
}

fn eol_from_code(code: i64) -> Option<core_view::EolMode> {
    match code {
        0 => Some(core_view::EolMode::CrLf),
        1 => Some(core_view::EolMode::Cr),
        2 => Some(core_view::EolMode::Lf),
        _ => None,
    }
}
