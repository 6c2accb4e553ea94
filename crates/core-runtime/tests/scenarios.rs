//! End-to-end scenarios driven through the interactive keystroke path.

mod common;
use common::Session;

#[test]
fn arithmetic_and_display() {
    let mut s = Session::new();
    s.keys("2 3 + 4 * = $$").unwrap();
    assert_eq!(s.message().as_deref(), Some("20"));
    assert!(s.rt.expressions.is_empty());
    assert_eq!(s.buffer_text(), b"");
}

#[test]
fn expression_precedence() {
    let mut s = Session::new();
    s.keys("1+2*3=$$").unwrap();
    assert_eq!(s.message().as_deref(), Some("7"));

    let mut s = Session::new();
    s.keys("(1+2)*3=$$").unwrap();
    assert_eq!(s.message().as_deref(), Some("9"));
}

#[test]
fn loop_with_counter() {
    let mut s = Session::new();
    s.keys("5<42UA>QA=$$").unwrap();
    assert_eq!(s.message().as_deref(), Some("42"));
    assert_eq!(s.int_of(b"A"), 42);
}

#[test]
fn loop_body_runs_exactly_n_times() {
    let mut s = Session::new();
    s.keys("0UA 3<%A$>QA=$$").unwrap();
    assert_eq!(s.message().as_deref(), Some("3"));
}

#[test]
fn zero_count_loop_is_skipped() {
    let mut s = Session::new();
    s.keys("7UA 0<42UA>QA=$$").unwrap();
    assert_eq!(s.message().as_deref(), Some("7"));
}

#[test]
fn loop_break_with_semicolon() {
    let mut s = Session::new();
    // count up; break out via `;` once the value reaches 3
    s.keys("0UA<%A-3;>QA=$$").unwrap();
    assert_eq!(s.message().as_deref(), Some("3"));
}

#[test]
fn conditionals_take_the_right_branch() {
    let mut s = Session::new();
    s.keys("1\"G 10UA | 20UA ' QA=$$").unwrap();
    assert_eq!(s.int_of(b"A"), 10);

    let mut s = Session::new();
    s.keys("-1\"G 10UA | 20UA ' QA=$$").unwrap();
    assert_eq!(s.int_of(b"A"), 20);
}

#[test]
fn qreg_save_restore_via_stack() {
    let mut s = Session::new();
    s.set_int(b"A", 7);
    s.set_string(b"A", b"hi");

    s.keys("[A 99UA ^UAworld$ ]A QA= GA $$").unwrap();

    assert_eq!(s.int_of(b"A"), 7);
    assert_eq!(s.string_of(b"A"), b"hi");
    assert_eq!(s.message().as_deref(), Some("7"));
    assert_eq!(s.buffer_text(), b"hi");
}

#[test]
fn document_identity_survives_stack_round_trip() {
    let mut s = Session::new();
    s.set_string(b"Q", b"contents");
    let before = s.rt.qregs.globals.get(b"Q").unwrap().doc.handle;
    s.keys("[Q]Q$$").unwrap();
    let after = s.rt.qregs.globals.get(b"Q").unwrap().doc.handle;
    assert_eq!(before, after);
}

#[test]
fn goto_skips_forward() {
    let mut s = Session::new();
    s.keys("Oskip$1UA!skip!2UAQA=$$").unwrap();
    assert_eq!(s.int_of(b"A"), 2);
    assert_eq!(s.message().as_deref(), Some("2"));
}

#[test]
fn goto_branches_backward() {
    let mut s = Session::new();
    // first pass defines the label; the conditional jumps back once
    s.keys("0UA!top!%A-2\"L Otop$ ' QA=$$").unwrap();
    assert_eq!(s.int_of(b"A"), 2);
}

#[test]
fn computed_goto_selects_by_value() {
    let mut s = Session::new();
    s.keys("2Ob,c$ !b! 1UA !c! 2UB QB=$$").unwrap();
    // label c was selected: only B is set
    assert_eq!(s.int_of(b"A"), 0);
    assert_eq!(s.int_of(b"B"), 2);
}

#[test]
fn command_line_replacement() {
    let mut s = Session::new();
    s.set_string(b"\x1b", b"99UAQA=");
    s.keys("1UA}$$").unwrap();
    assert_eq!(s.int_of(b"A"), 99);
    assert_eq!(s.message().as_deref(), Some("99"));
}

#[test]
fn replacement_error_restores_previous_cmdline() {
    let mut s = Session::new();
    // the replacement line fails at its last character (unknown command)
    s.set_string(b"\x1b", b"5UA\x00");
    // NUL is a syntax error; the old command line must survive with the
    // `}` un-consumed
    s.keys("7UB}").unwrap();
    assert_eq!(s.int_of(b"B"), 7);
    s.keys("$$").unwrap();
    assert_eq!(s.int_of(b"B"), 7);
}

#[test]
fn macro_invocation() {
    let mut s = Session::new();
    s.set_string(b"M", b"42UA");
    s.keys("MM$$").unwrap();
    assert_eq!(s.int_of(b"A"), 42);
}

#[test]
fn macro_locals_are_private() {
    let mut s = Session::new();
    // the macro sets a local register; the caller's locals stay untouched
    s.set_string(b"M", b"9U.X");
    s.keys("MM$$").unwrap();
    assert!(s.rt.qregs.locals[0].get(b"X").is_none());
}

#[test]
fn insertion_and_movement() {
    let mut s = Session::new();
    s.keys("Iabcdef$ 2J 2D .=$$").unwrap();
    assert_eq!(s.buffer_text(), b"abef");
    assert_eq!(s.message().as_deref(), Some("2"));
    assert!(s.rt.ring.current().dirty);
}

#[test]
fn insert_argument_codepoints() {
    let mut s = Session::new();
    // 65I$ inserts "A" before the (empty) string argument
    s.keys("65I$").unwrap();
    s.keys("$$").unwrap();
    assert_eq!(s.buffer_text(), b"A");
}

#[test]
fn radix_switching() {
    let mut s = Session::new();
    s.keys("^O 17= $$").unwrap();
    // 17 in octal input is 15 decimal, displayed in octal again
    assert_eq!(s.message().as_deref(), Some("17"));

    let mut s = Session::new();
    s.keys("16^R 10= ^D$$").unwrap();
    assert_eq!(s.message().as_deref(), Some("10"));

    let mut s = Session::new();
    s.keys("8^R 10 ^D=$$").unwrap();
    // entered in base 8, displayed in base 10
    assert_eq!(s.message().as_deref(), Some("8"));
}

#[test]
fn string_building_interpolation() {
    let mut s = Session::new();
    s.set_int(b"C", 66);
    s.set_string(b"S", b"xy");
    s.keys("I<^EUC|^EQS>$$$").unwrap();
    assert_eq!(s.buffer_text(), b"<B|xy>");
}

#[test]
fn at_modified_string_argument() {
    let mut s = Session::new();
    s.keys("@I/hello/$$").unwrap();
    assert_eq!(s.buffer_text(), b"hello");
}

#[test]
fn search_and_replace() {
    let mut s = Session::new();
    s.keys("Iforemost$ 0J Smost$ .=$$").unwrap();
    assert_eq!(s.message().as_deref(), Some("8"));

    let mut s = Session::new();
    s.keys("Iaxbxc$ 0J FRx$+$ $$").unwrap();
    assert_eq!(s.buffer_text(), b"a+bxc");
}

#[test]
fn unterminated_loop_in_macro_fails() {
    let mut s = Session::new();
    s.set_string(b"M", b"2<1UA");
    s.keys("MM").unwrap();
    // the failing keystroke was rubbed out again
    assert_eq!(s.cl.effective_len, 1);
    assert!(s.message().unwrap().contains("Unterminated"));
}

#[test]
fn double_escape_returns_arguments_from_macro() {
    let mut s = Session::new();
    s.set_string(b"M", b"23$$99UA");
    s.keys("MM=$$").unwrap();
    // the macro returned 23 before ever setting A
    assert_eq!(s.message().as_deref(), Some("23"));
    assert_eq!(s.int_of(b"A"), 0);
}
