//! Syntax highlighting by running the parser in lexing mode.
//!
//! The machine parses without executing and a style code is derived per
//! code point from the state it is in. Line states record the last column
//! of each line at which the parser was in a clean start state, so a later
//! run can resume from the nearest safe point instead of rescanning from
//! the top.

use core_view::{DocId, DocStore};

use crate::machine::{MachineMain, Mode, State};
use crate::{states, Runtime};

/// Style codes written into the view's styling bytes.
pub mod style {
    pub const DEFAULT: u8 = 0;
    pub const COMMAND: u8 = 1;
    pub const NUMBER: u8 = 2;
    pub const OPERATOR: u8 = 3;
    pub const STRING: u8 = 4;
    pub const QREG: u8 = 5;
    pub const LABEL: u8 = 6;
    pub const COMMENT: u8 = 7;
    pub const INVALID: u8 = 8;
}

fn style_of(state: &State) -> u8 {
    match state {
        State::Start
        | State::Escape
        | State::Control
        | State::Ascii
        | State::ECommand
        | State::FCommand
        | State::CondCommand => style::COMMAND,
        State::ExpectString(_) => style::STRING,
        State::ExpectQReg(_) => style::QREG,
        State::Label => style::LABEL,
    }
}

fn fresh_machine() -> MachineMain {
    let mut m = MachineMain::new(0, false, 0);
    m.flags.mode = Mode::Lexing;
    m
}

/// Style `doc` up to byte offset `end`, resuming from the last safe point.
pub fn style(rt: &mut Runtime, doc: DocId, end: usize) {
    let text = {
        let docs: &DocStore = &rt.docs;
        let len = docs.len(doc);
        docs.get_range_bytes(doc, 0, len)
    };
    let end = end.min(text.len());

    // resume from the closest line with a known clean parser state
    let styled_to = rt.docs.end_styled(doc).min(end);
    let mut start_line = {
        let pos = rt.docs.pos_of_byte(doc, styled_to);
        rt.docs.line_of_pos(doc, pos)
    };
    let mut start_col = 0i64;
    while start_line > 0 {
        start_line -= 1;
        start_col = rt.docs.line_state(doc, start_line);
        if start_col >= 0 {
            break;
        }
    }
    let start_col = start_col.max(0) as usize;
    let line_start = rt.docs.byte_of_pos(doc, rt.docs.pos_of_line(doc, start_line));
    let mut pos = line_start + start_col;

    let mut machine = fresh_machine();
    let mut cur_line = start_line;
    let mut cur_col = pos - line_start;
    // column in bytes of the last clean parser state on this line
    let mut safe_col: i64 = cur_col as i64;

    // hash-bang line
    if pos == 0 && text.first() == Some(&b'#') {
        let line_end = text
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| p + 1)
            .unwrap_or(text.len());
        rt.docs.start_styling(doc, 0);
        rt.docs.set_styling(doc, line_end, style::COMMENT);
        rt.docs.set_line_state(doc, 0, -1);
        pos = line_end;
        cur_line = 1;
        cur_col = 0;
        safe_col = 0;
    }

    while pos < end {
        let old_pos = pos;

        let mut chr_style;
        match core_text::char_at(&text, pos) {
            None => break,
            Some((chr, len)) => {
                pos += len;

                chr_style = style_of(&machine.state);
                if machine.state.is_start() {
                    // refine literals and operators in command position
                    if chr.is_ascii_digit() {
                        chr_style = style::NUMBER;
                    } else if matches!(chr, '+' | '-' | '*' | '/' | '#' | '&' | '(' | ')' | ',') {
                        chr_style = style::OPERATOR;
                    }
                }

                if states::input(rt, &mut machine, chr).is_err() {
                    // highlight the offending symbol and resynchronise
                    machine = fresh_machine();
                    chr_style = style::INVALID;
                }

                // labels (and thus comments) style from the opening `!` on
                if machine.state == State::Label {
                    chr_style = style::LABEL;
                }

                cur_col += len;

                rt.docs.start_styling(doc, old_pos);
                rt.docs.set_styling(doc, pos - old_pos, chr_style);

                if chr == '\n' {
                    rt.docs.set_line_state(doc, cur_line, safe_col);
                    cur_line += 1;
                    cur_col = 0;
                    safe_col = -1;
                }
            }
        }

        if chr_style != style::INVALID && machine.state.is_start() && !machine.flags.modifier_at {
            safe_col = cur_col as i64;
        }
    }

    rt.docs.set_line_state(doc, cur_line, safe_col);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::runtime_fixture;

    fn style_all(src: &[u8]) -> Vec<u8> {
        let (mut rt, _) = runtime_fixture();
        let doc = rt.docs.create(core_view::Codepage::Utf8);
        rt.docs.append_bytes(doc, src).unwrap();
        style(&mut rt, doc, src.len());
        (0..src.len()).map(|i| rt.docs.style_at(doc, i)).collect()
    }

    #[test]
    fn numbers_operators_and_commands() {
        let styles = style_all(b"2+3=");
        assert_eq!(
            styles,
            vec![style::NUMBER, style::OPERATOR, style::NUMBER, style::COMMAND]
        );
    }

    #[test]
    fn string_arguments_and_labels() {
        let styles = style_all(b"Iabc\x1b!x!");
        assert_eq!(styles[0], style::COMMAND); // I
        assert_eq!(styles[1], style::STRING); // a
        assert_eq!(styles[3], style::STRING); // c
        assert_eq!(styles[5], style::LABEL); // !
        assert_eq!(styles[6], style::LABEL); // x
        assert_eq!(styles[7], style::LABEL); // !
    }

    #[test]
    fn qreg_specs_are_highlighted() {
        let styles = style_all(b"QA=");
        assert_eq!(styles[0], style::COMMAND);
        assert_eq!(styles[1], style::QREG);
        assert_eq!(styles[2], style::COMMAND);
    }

    #[test]
    fn hash_bang_line_is_a_comment() {
        let styles = style_all(b"#!/bin/sciteco\n1=");
        assert!(styles[..15].iter().all(|&s| s == style::COMMENT));
        assert_eq!(styles[15], style::NUMBER);
    }

    #[test]
    fn line_states_record_safe_columns() {
        let (mut rt, _) = runtime_fixture();
        let src = b"1=\nIab\x1b\n2=";
        let doc = rt.docs.create(core_view::Codepage::Utf8);
        rt.docs.append_bytes(doc, src).unwrap();
        style(&mut rt, doc, src.len());
        // the last clean column on line 0 is right after the `=`
        assert_eq!(rt.docs.line_state(doc, 0), 2);
    }
}
