//! File handling: ring buffers, atomic saves and register file transfer.

mod common;
use common::Session;

use std::fs;

const RUBOUT: char = '\x08';

fn savepoints_in(dir: &std::path::Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(".teco-"))
        .collect()
}

#[test]
fn save_is_protected_by_a_savepoint() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("f.txt");
    fs::write(&file, b"old\n").unwrap();

    let mut s = Session::new();
    s.keys(&format!("EB{}$", file.display())).unwrap();
    assert_eq!(s.buffer_text(), b"old\n");

    s.keys("0JInew $").unwrap();
    assert!(s.rt.ring.current().dirty);
    s.keys("EW$").unwrap();

    // the new content is on disk, the old one parked in the save-point
    assert_eq!(fs::read(&file).unwrap(), b"new old\n");
    assert_eq!(savepoints_in(dir.path()), vec![".teco-1-f.txt~"]);
    assert!(!s.rt.ring.current().dirty);

    // rubbing out the save restores the old file
    s.press(RUBOUT).unwrap();
    assert_eq!(fs::read(&file).unwrap(), b"old\n");
    assert!(savepoints_in(dir.path()).is_empty());
    assert!(s.rt.ring.current().dirty);

    // saving again and committing unlinks the save-point for good
    s.keys("EW$$$").unwrap();
    assert_eq!(fs::read(&file).unwrap(), b"new old\n");
    assert!(savepoints_in(dir.path()).is_empty());
}

#[test]
fn multiple_saves_stack_savepoints() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("f.txt");
    fs::write(&file, b"v1").unwrap();

    let mut s = Session::new();
    s.keys(&format!("EB{}$", file.display())).unwrap();
    s.keys("ZJIa$EW$ ZJIb$EW$").unwrap();
    assert_eq!(fs::read(&file).unwrap(), b"v1ab");
    assert_eq!(savepoints_in(dir.path()).len(), 2);

    // rub out everything: both saves unwind in order
    while s.cl.effective_len > 0 {
        s.press(RUBOUT).unwrap();
    }
    assert_eq!(fs::read(&file).unwrap(), b"v1");
    assert!(savepoints_in(dir.path()).is_empty());
}

#[test]
fn saving_the_unnamed_buffer_fails_deterministically() {
    let mut s = Session::new();
    s.keys("Ix$EW$").unwrap();
    assert!(s.message().unwrap().contains("unnamed"));
    // the failing keystroke (the terminator driving EW) was rubbed out
    assert_eq!(s.cl.effective_len, 5);
    assert_eq!(s.buffer_text(), b"x");
}

#[test]
fn register_load_and_save() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    fs::write(&input, b"payload").unwrap();
    let output = dir.path().join("out.txt");

    let mut s = Session::new();
    s.keys(&format!("EQA{}$", input.display())).unwrap();
    assert_eq!(s.string_of(b"A"), b"payload");

    s.keys(&format!("E%A{}$$$", output.display())).unwrap();
    assert_eq!(fs::read(&output).unwrap(), b"payload");
}

#[test]
fn buffer_ring_ids_and_switching() {
    let dir = tempfile::tempdir().unwrap();
    let one = dir.path().join("one.txt");
    let two = dir.path().join("two.txt");
    fs::write(&one, b"1").unwrap();
    fs::write(&two, b"2").unwrap();

    let mut s = Session::new();
    s.keys(&format!("EB{}$", one.display())).unwrap();
    s.keys(&format!("EB{}$", two.display())).unwrap();
    assert_eq!(s.rt.ring.buffers.len(), 3); // unnamed + two files
    assert_eq!(s.rt.ring.current_id(), 3);
    assert_eq!(s.buffer_text(), b"2");

    s.keys("2EB$").unwrap();
    assert_eq!(s.rt.ring.current_id(), 2);
    assert_eq!(s.buffer_text(), b"1");

    // opening an already-open file switches instead of duplicating
    s.keys(&format!("EB{}$", two.display())).unwrap();
    assert_eq!(s.rt.ring.buffers.len(), 3);
    assert_eq!(s.rt.ring.current_id(), 3);
    s.keys("$$").unwrap();
}

#[test]
fn closing_a_buffer_can_be_rubbed_out() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("f.txt");
    fs::write(&file, b"body").unwrap();

    let mut s = Session::new();
    s.keys(&format!("EB{}$", file.display())).unwrap();
    assert_eq!(s.rt.ring.buffers.len(), 2);

    s.keys("EF").unwrap();
    assert_eq!(s.rt.ring.buffers.len(), 1);

    s.press(RUBOUT).unwrap();
    s.press(RUBOUT).unwrap();
    assert_eq!(s.rt.ring.buffers.len(), 2);
    assert_eq!(s.buffer_text(), b"body");
}

#[test]
fn working_directory_register_chdirs() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = dir.path().canonicalize().unwrap();
    let mut s = Session::new();
    let old = std::env::current_dir().unwrap();

    s.keys(&format!("FG{}$", canonical.display())).unwrap();
    assert_eq!(std::env::current_dir().unwrap(), canonical);

    // rubbing the command out returns to where we were
    while s.cl.effective_len > 0 {
        s.press(RUBOUT).unwrap();
    }
    assert_eq!(std::env::current_dir().unwrap(), old);
}
