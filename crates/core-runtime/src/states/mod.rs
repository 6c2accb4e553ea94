//! Per-state input handlers of the main machine.
//!
//! Each handler consumes one code point and returns the next state; the
//! dispatcher below applies the transition and runs the new state's entry
//! hook. Handlers perform their semantic action inline when the machine is
//! in `Normal` mode and restrict themselves to syntax bookkeeping in the
//! parse-only modes.

mod ecommand;
mod gotocmd;
mod qreg_cmds;
mod start;
mod strings;

pub use strings::{expectstring_refresh, insert_completion_terminator};

use crate::error::Result;
use crate::machine::{MachineMain, Mode, QRegCommand, State, StringCommand};
use crate::qregspec::{QRegSpecMachine, QRegType};
use crate::Runtime;

pub fn input(rt: &mut Runtime, m: &mut MachineMain, chr: char) -> Result<()> {
    let next = match m.state {
        State::Start => start::input(rt, m, chr)?,
        State::Escape => start::escape_input(rt, m, chr)?,
        State::Control => start::control_input(rt, m, chr)?,
        State::Ascii => start::ascii_input(rt, m, chr)?,
        State::CondCommand => start::cond_input(rt, m, chr)?,
        State::ECommand => ecommand::input(rt, m, chr)?,
        State::FCommand => ecommand::fcommand_input(rt, m, chr)?,
        State::Label => gotocmd::label_input(rt, m, chr)?,
        State::ExpectQReg(cmd) => qreg_cmds::input(rt, m, cmd, chr)?,
        State::ExpectString(cmd) => strings::input(rt, m, cmd, chr)?,
    };

    if next != m.state {
        m.state = next;
        initial(rt, m)?;
    }
    Ok(())
}

/// Entry hooks, run once per transition into a state.
fn initial(rt: &mut Runtime, m: &mut MachineMain) -> Result<()> {
    match m.state {
        State::ExpectQReg(cmd) => {
            m.expectqreg = Some(QRegSpecMachine::new(qreg_type(cmd)));
            Ok(())
        }
        State::ExpectString(cmd) => {
            if m.flags.mode == Mode::Normal {
                m.expectstring.machine.codepage = rt.current_codepage();
            }
            match cmd {
                StringCommand::InsertPlain | StringCommand::InsertIndent => {
                    strings::insert_initial(rt, m)
                }
                StringCommand::EditFile => strings::edit_file_initial(rt, m),
                _ => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

fn qreg_type(cmd: QRegCommand) -> QRegType {
    match cmd {
        QRegCommand::GetInt
        | QRegCommand::GetString
        | QRegCommand::MacroCall
        | QRegCommand::Push
        | QRegCommand::SaveToFile => QRegType::Required,
        _ => QRegType::OptionalInit,
    }
}

/// Non-operational characters in start states (also skipped by `^W`).
pub fn is_noop(chr: char) -> bool {
    matches!(chr, ' ' | '\x0c' | '\r' | '\n' | '\x0b')
}
