//! Interactive rub-out, re-insertion and related immediate editing.

mod common;
use common::Session;

const RUBOUT: char = '\x08';
const RUBWORD: char = '\x17';
const RUBSTRING: char = '\x15';
const TOGGLE: char = '\x07';

#[test]
fn rubout_restores_expression_stack() {
    let mut s = Session::new();
    s.keys("2 3 +").unwrap();
    assert_eq!(s.rt.expressions.numbers(), &[2, 3]);

    s.press(RUBOUT).unwrap(); // +
    assert_eq!(s.rt.expressions.numbers(), &[2, 3]);
    s.press(RUBOUT).unwrap(); // space
    s.press(RUBOUT).unwrap(); // 3
    assert_eq!(s.rt.expressions.numbers(), &[2]);
    s.press(RUBOUT).unwrap(); // space
    s.press(RUBOUT).unwrap(); // 2
    assert_eq!(s.rt.expressions.numbers(), &[] as &[i64]);

    // re-insert everything and evaluate
    s.press(TOGGLE).unwrap();
    for _ in 0..5 {
        s.press(RUBOUT).unwrap();
    }
    assert_eq!(s.rt.expressions.numbers(), &[2, 3]);
    s.press(TOGGLE).unwrap();
    s.keys("=$$").unwrap();
    assert_eq!(s.message().as_deref(), Some("5"));
}

#[test]
fn rubout_of_digit_runs_keeps_continuation() {
    let mut s = Session::new();
    s.keys("12").unwrap();
    assert_eq!(s.rt.expressions.numbers(), &[12]);
    s.press(RUBOUT).unwrap();
    assert_eq!(s.rt.expressions.numbers(), &[1]);
    s.press(TOGGLE).unwrap();
    s.press(RUBOUT).unwrap();
    assert_eq!(s.rt.expressions.numbers(), &[12]);
}

#[test]
fn rubout_totality_across_register_and_buffer_effects() {
    let mut s = Session::new();
    s.keys("Iabc$ 5UA [A 99UA ^UAx$").unwrap();
    assert_eq!(s.buffer_text(), b"abc");
    assert_eq!(s.int_of(b"A"), 99);
    assert_eq!(s.rt.qreg_stack.len(), 1);

    while s.cl.effective_len > 0 {
        s.press(RUBOUT).unwrap();
    }

    assert_eq!(s.buffer_text(), b"");
    assert_eq!(s.int_of(b"A"), 0);
    assert_eq!(s.string_of(b"A"), b"");
    assert!(s.rt.qreg_stack.is_empty());
    assert!(!s.rt.ring.current().dirty);
    assert!(s.rt.undo.is_empty());
    assert_eq!(s.dot(), 0);
}

#[test]
fn rubout_of_loop_end_unwinds_iterations() {
    let mut s = Session::new();
    s.keys("0UA3<%A$>").unwrap();
    assert_eq!(s.int_of(b"A"), 3);
    // rubbing out `>` undoes all iterations it drove
    s.press(RUBOUT).unwrap();
    assert_eq!(s.int_of(b"A"), 1);
    assert_eq!(s.rt.loop_stack.len(), 1);
    // and typing it again repeats them
    s.keys(">QA=$$").unwrap();
    assert_eq!(s.message().as_deref(), Some("3"));
}

#[test]
fn word_rubout_in_string_arguments() {
    let mut s = Session::new();
    s.keys("Ifoo bar").unwrap();
    s.press(RUBWORD).unwrap();
    assert_eq!(s.cl.machine.expectstring.string, b"foo ");
    s.press(RUBWORD).unwrap();
    assert_eq!(s.cl.machine.expectstring.string, b"");
    // with nothing left, ^W takes out the whole command
    s.press(RUBWORD).unwrap();
    assert_eq!(s.cl.effective_len, 0);
    assert_eq!(s.buffer_text(), b"");
}

#[test]
fn string_rubout_takes_the_entire_argument() {
    let mut s = Session::new();
    s.keys("Ihello world").unwrap();
    assert_eq!(s.buffer_text(), b"hello world");
    s.press(RUBSTRING).unwrap();
    assert_eq!(s.cl.machine.expectstring.string, b"");
    assert_eq!(s.buffer_text(), b"");
    s.keys("bye$$$").unwrap();
    assert_eq!(s.buffer_text(), b"bye");
}

#[test]
fn command_rubout_includes_modifiers_and_noops() {
    let mut s = Session::new();
    // trailing no-ops and the pending `:` go with the command
    s.keys(":QA  ").unwrap();
    s.press(RUBWORD).unwrap();
    assert_eq!(s.cl.effective_len, 0);
}

#[test]
fn commit_clears_rubout_information() {
    let mut s = Session::new();
    s.keys("5UA$$").unwrap();
    assert!(s.rt.undo.is_empty());
    assert!(s.rt.last_cmdline.starts_with(b"5UA"));
    assert_eq!(s.cl.effective_len, 0);
    // rub-out after commit is a no-op
    s.press(RUBOUT).unwrap();
    assert_eq!(s.int_of(b"A"), 5);
}

#[test]
fn save_last_cmdline_into_register() {
    let mut s = Session::new();
    s.keys("7UA$$").unwrap();
    s.keys("*L$$").unwrap();
    let saved = s.string_of(b"L");
    assert!(saved.starts_with(b"7UA"));
}

#[test]
fn key_macros_expand_through_the_cmdline() {
    let mut s = Session::new();
    // ^K-prefixed register bound to F1
    s.set_string(b"\x0bF1", b"42UA");
    match core_runtime::cmdline::keymacro(&mut s.rt, &mut s.cl, "F1").unwrap() {
        core_runtime::cmdline::KeyMacroStatus::Done => {}
        _ => panic!("macro should expand"),
    }
    s.keys("$$").unwrap();
    assert_eq!(s.int_of(b"A"), 42);
}

#[test]
fn undefined_function_keys_are_ignored() {
    let mut s = Session::new();
    match core_runtime::cmdline::keymacro(&mut s.rt, &mut s.cl, "F9").unwrap() {
        core_runtime::cmdline::KeyMacroStatus::Undefined => {}
        _ => panic!("F9 has no binding"),
    }
}

#[test]
fn interrupt_aborts_runaway_loops() {
    let mut s = Session::new();
    s.keys("1UA<2UA").unwrap();
    // the infinite loop would hang on `>`; raise the flag first
    s.interrupt.raise();
    s.press('>').unwrap();
    // the keystroke was rolled back entirely
    assert!(s.message().unwrap().contains("Interrupted"));
    assert_eq!(s.int_of(b"A"), 2);
    assert!(s.cl.str[..s.cl.effective_len].ends_with(b"2UA"));
}

#[test]
fn error_rolls_back_the_whole_keypress() {
    let mut s = Session::new();
    s.set_string(b"M", b"3UA nonsense\x01");
    s.keys("MM").unwrap();
    // the macro failed, so even its successful prefix is undone; only the
    // second M (the failing keystroke) is rubbed out
    assert_eq!(s.int_of(b"A"), 0);
    assert_eq!(s.cl.effective_len, 1);
}
