//! Label definitions (`!label!`) and the computed goto (`Ovalue,label,…$`).
//!
//! Labels are recorded in every mode — that is what allows `O` to skip
//! forward to a label that has not been parsed yet: execution continues in
//! `ParseOnlyGoto` until the definition shows up.

use crate::error::Result;
use crate::expressions;
use crate::machine::{MachineMain, Mode, State};
use crate::Runtime;

pub fn label_input(rt: &mut Runtime, m: &mut MachineMain, chr: char) -> Result<State> {
    if chr != '!' {
        // any byte except the closing bang belongs to the label
        core_text::push_wc(&mut m.goto_label, chr);
        return Ok(State::Label);
    }

    let pc = m.macro_pc;
    let label = std::mem::take(&mut m.goto_label);
    if m.must_undo {
        let restore = label.clone();
        rt.undo.push(move |_, m| m.goto_label = restore);
    }

    let old = m.goto_table.set(&label, pc);
    if m.goto_table.must_undo {
        let name = label.clone();
        rt.undo.push(move |_, m| m.goto_table.restore(&name, old));
    }

    if rt.goto_skip_label.as_deref() == Some(&label[..]) {
        let old_label = rt.goto_skip_label.take();
        rt.undo.push(move |rt, _| rt.goto_skip_label = old_label);
        if m.flags.mode == Mode::ParseOnlyGoto {
            m.flags.mode = Mode::Normal;
            m.flags.nest_level = 0;
            m.flags.skip_else = false;
        }
    }

    Ok(State::Start)
}

/// `Ovalue,label1,label2,…$`: pick the value-th label and branch to it,
/// or start skipping until it gets defined.
pub fn goto_done(rt: &mut Runtime, m: &mut MachineMain, str: &[u8]) -> Result<()> {
    let value = expressions::pop_num_calc_signed(rt)?;
    let labels: Vec<&[u8]> = str.split(|&b| b == b',').collect();

    if value > 0 && (value as usize) <= labels.len() {
        let label = labels[value as usize - 1];
        if !label.is_empty() {
            match m.goto_table.find(label) {
                Some(pc) => m.macro_pc = pc,
                None => {
                    // skip forward until the label definition terminates it
                    let old = rt.goto_skip_label.replace(label.to_vec());
                    rt.undo.push(move |rt, _| rt.goto_skip_label = old);
                    m.flags.mode = Mode::ParseOnlyGoto;
                }
            }
        }
    }
    Ok(())
}
