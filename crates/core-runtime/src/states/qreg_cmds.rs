//! Commands operating on a parsed Q-Register specification.
//!
//! The shared `ExpectQReg` state feeds characters to the specification
//! sub-machine; once a register is resolved, the pending command either
//! acts immediately or transitions into a string-argument state carrying
//! the register along.

use crate::error::{Result, TecoError};
use crate::expressions;
use crate::machine::{MachineMain, Mode, QRegCommand, State, StringCommand};
use crate::qreg::{self, TableSel};
use crate::qregspec::SpecStatus;
use crate::states::start::{insert_bytes, range_args};
use crate::{machine, Runtime};

pub fn input(rt: &mut Runtime, m: &mut MachineMain, cmd: QRegCommand, chr: char) -> Result<State> {
    let parse_only = m.flags.mode != Mode::Normal;
    let locals = m.locals;
    let status = m
        .expectqreg
        .as_mut()
        .expect("entered through the state's initial hook")
        .input(rt, locals, chr, parse_only)?;

    match status {
        SpecStatus::More => Ok(m.state),
        SpecStatus::Done(resolved) => {
            m.expectqreg = None;
            dispatch(rt, m, cmd, resolved)
        }
    }
}

fn dispatch(
    rt: &mut Runtime,
    m: &mut MachineMain,
    cmd: QRegCommand,
    resolved: Option<(TableSel, Vec<u8>)>,
) -> Result<State> {
    // commands that continue with a string argument carry the register over
    match cmd {
        QRegCommand::SetString => {
            m.pending_qreg = resolved;
            return Ok(State::ExpectString(StringCommand::SetQRegString));
        }
        QRegCommand::EditOrLoad => {
            m.pending_qreg = resolved;
            return Ok(State::ExpectString(StringCommand::LoadQReg));
        }
        QRegCommand::SaveToFile => {
            m.pending_qreg = resolved;
            return Ok(State::ExpectString(StringCommand::SaveQRegFile));
        }
        _ => {}
    }

    let Some((sel, name)) = resolved else {
        // parse-only
        return Ok(State::Start);
    };

    match cmd {
        QRegCommand::Push => {
            qreg::stack_push(rt, sel, &name)?;
        }

        QRegCommand::Pop => {
            let colon = m.eval_colon() > 0;
            let ok = qreg::stack_pop(rt, sel, &name)?;
            if colon {
                expressions::push_num(rt, if ok { -1 } else { 0 });
            } else if !ok {
                return Err(TecoError::failed("Q-Register stack is empty"));
            }
        }

        QRegCommand::GetInt => {
            let colon = m.eval_colon() > 0;
            expressions::eval(rt, false)?;
            if colon {
                let len = qreg::get_length(rt, sel, &name)?;
                expressions::push_num(rt, len);
            } else if rt.expressions.args() > 0 {
                let pos = expressions::pop_num_calc(rt, 0)?;
                let chr = qreg::get_character(rt, sel, &name, pos)?;
                expressions::push_num(rt, chr);
            } else {
                let v = qreg::get_integer(rt, sel, &name)?;
                expressions::push_num(rt, v);
            }
        }

        QRegCommand::SetInt => {
            let colon = m.eval_colon() > 0;
            let v = expressions::pop_num_required(rt, "U")?;
            qreg::set_integer(rt, sel, &name, v)?;
            if colon {
                expressions::push_num(rt, -1);
            }
        }

        QRegCommand::Increase => {
            let n = expressions::pop_num_calc_signed(rt)?;
            let v = qreg::get_integer(rt, sel, &name)?.wrapping_add(n);
            qreg::set_integer(rt, sel, &name, v)?;
            expressions::push_num(rt, v);
        }

        QRegCommand::GetString => {
            let (bytes, _) = qreg::get_string(rt, sel, &name)?;
            insert_bytes(rt, &bytes)?;
        }

        QRegCommand::CopyTo => {
            let append = m.eval_colon() > 0;
            let (from, len) = range_args(rt, true, 'X')?;
            let (docs, view) = rt.docs_and_current_view();
            let text = docs.get_range_bytes(view.doc, from, from + len);
            let cp = docs.codepage(view.doc);
            if append {
                qreg::append_string(rt, sel, &name, &text)?;
            } else {
                qreg::set_string(rt, sel, &name, &text, cp)?;
            }
        }

        QRegCommand::MacroCall => {
            let reuse_locals = m.eval_colon() > 0;
            let (bytes, _) = qreg::get_string(rt, sel, &name)?;
            let locals = reuse_locals.then_some(m.locals);
            machine::execute_macro(rt, &bytes, locals, &core_text::echo(&name))?;
        }

        QRegCommand::SaveCmdline => {
            let last = rt.last_cmdline.clone();
            let cp = rt.default_codepage;
            qreg::set_string(rt, sel, &name, &last, cp)?;
        }

        QRegCommand::SetString | QRegCommand::EditOrLoad | QRegCommand::SaveToFile => {
            unreachable!("handled above")
        }
    }

    Ok(State::Start)
}
