//! Byte-string and UTF-8 utilities shared by the parser, the command-line
//! manager and the register model.
//!
//! TECO code and most register contents are required to be valid UTF-8, but
//! they are still carried around as byte strings: embedded NUL bytes are
//! legal almost everywhere and byte offsets (not char indices) are the
//! currency of the undo stack and the command line. The helpers here bridge
//! the two worlds: validation, per-code-point stepping over raw bytes, and
//! grapheme-cluster boundaries for interactive rub-out.

use unicode_segmentation::GraphemeCursor;

/// Control characters echo as `^X`; this maps a control code to the letter.
/// `ctl_echo(0x15)` is `'U'`.
#[inline]
pub fn ctl_echo(c: char) -> char {
    ((c as u8) | 0x40) as char
}

/// Inverse of [`ctl_echo`]: `ctl_key('U')` is `'\x15'`.
/// Defined for `@`..`_` and the lowercase letters.
#[inline]
pub fn ctl_key(c: char) -> char {
    ((c as u8 & !0x60) & 0x1f) as char
}

/// ASCII control range check (excluding DEL).
#[inline]
pub fn is_ctl(c: char) -> bool {
    (c as u32) < 0x20
}

/// Case folding for command characters. TECO commands are matched
/// case-insensitively, but only in the ASCII range: `é` never folds.
#[inline]
pub fn ascii_toupper(c: char) -> char {
    if c.is_ascii_lowercase() {
        c.to_ascii_uppercase()
    } else {
        c
    }
}

/// Whether the entire byte string is valid UTF-8 (NUL bytes are fine).
pub fn validate_utf8(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes).is_ok()
}

/// Decode the code point starting at `pos`, returning it with its encoded
/// length. `None` at the end of the string.
///
/// The caller guarantees `bytes[pos..]` is valid UTF-8; macro sources are
/// validated once on entry, so this never has to report decode errors.
pub fn char_at(bytes: &[u8], pos: usize) -> Option<(char, usize)> {
    if pos >= bytes.len() {
        return None;
    }
    let s = std::str::from_utf8(&bytes[pos..]).expect("source validated as UTF-8");
    let c = s.chars().next()?;
    Some((c, c.len_utf8()))
}

/// Byte offset of the code point preceding `pos`, or `None` at the start.
pub fn prev_char_start(bytes: &[u8], pos: usize) -> Option<usize> {
    if pos == 0 {
        return None;
    }
    let mut p = pos - 1;
    while p > 0 && (bytes[p] & 0xc0) == 0x80 {
        p -= 1;
    }
    Some(p)
}

/// Byte offset just past the grapheme cluster starting at `pos`.
///
/// Used by the re-insertion path of `^H`: rubbed-out text is fed back to the
/// parser one full glyph at a time so a combining sequence never gets split.
pub fn next_grapheme_end(bytes: &[u8], pos: usize) -> usize {
    let s = std::str::from_utf8(bytes).expect("command line validated as UTF-8");
    let mut cursor = GraphemeCursor::new(pos, s.len(), true);
    match cursor.next_boundary(s, 0) {
        Ok(Some(b)) => b,
        _ => s.len(),
    }
}

/// Byte offset of the start of the grapheme cluster ending at `pos`.
pub fn prev_grapheme_start(bytes: &[u8], pos: usize) -> usize {
    let s = std::str::from_utf8(bytes).expect("command line validated as UTF-8");
    let mut cursor = GraphemeCursor::new(pos, s.len(), true);
    match cursor.prev_boundary(s, 0) {
        Ok(Some(b)) => b,
        _ => 0,
    }
}

/// Length of the common prefix of two byte strings.
///
/// The command-line replacement machinery rubs out only from the first
/// differing byte, so this is the divergence point between the old and the
/// new command line.
pub fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Append a code point to a byte string in UTF-8.
pub fn push_wc(dst: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    dst.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

/// Iterator over the code points of a validated byte string together with
/// their byte offsets.
pub fn chars_with_offsets(bytes: &[u8]) -> impl Iterator<Item = (usize, char)> + '_ {
    std::str::from_utf8(bytes)
        .expect("source validated as UTF-8")
        .char_indices()
}

/// Render a possibly-binary name for diagnostics: control characters are
/// echoed in caret notation, everything else passes through.
pub fn echo(bytes: &[u8]) -> String {
    let mut out = String::new();
    match std::str::from_utf8(bytes) {
        Ok(s) => {
            for c in s.chars() {
                if is_ctl(c) {
                    out.push('^');
                    out.push(ctl_echo(c));
                } else {
                    out.push(c);
                }
            }
        }
        Err(_) => {
            for &b in bytes {
                if b.is_ascii() && !b.is_ascii_control() {
                    out.push(b as char);
                } else {
                    out.push_str(&format!("\\x{b:02X}"));
                }
            }
        }
    }
    out
}

/// Last offset after any occurrence of a byte from `breaks`, i.e. the start
/// of the trailing word. Filename completion in string arguments only
/// completes the token after the last separator.
pub fn last_occurrence(haystack: &[u8], breaks: &[u8]) -> usize {
    haystack
        .iter()
        .rposition(|b| breaks.contains(b))
        .map(|i| i + 1)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctl_round_trip() {
        assert_eq!(ctl_echo('\x15'), 'U');
        assert_eq!(ctl_key('U'), '\x15');
        assert_eq!(ctl_key('u'), '\x15');
        assert_eq!(ctl_key('['), '\x1b');
        assert_eq!(ctl_echo('\x1b'), '[');
    }

    #[test]
    fn ascii_fold_only() {
        assert_eq!(ascii_toupper('q'), 'Q');
        assert_eq!(ascii_toupper('Q'), 'Q');
        assert_eq!(ascii_toupper('é'), 'é');
    }

    #[test]
    fn char_stepping() {
        let s = "a€b".as_bytes();
        assert_eq!(char_at(s, 0), Some(('a', 1)));
        assert_eq!(char_at(s, 1), Some(('€', 3)));
        assert_eq!(char_at(s, 4), Some(('b', 1)));
        assert_eq!(char_at(s, 5), None);
        assert_eq!(prev_char_start(s, 4), Some(1));
        assert_eq!(prev_char_start(s, 1), Some(0));
        assert_eq!(prev_char_start(s, 0), None);
    }

    #[test]
    fn grapheme_boundaries_keep_combining_marks_together() {
        let s = "ae\u{301}!".as_bytes(); // 'e' + combining acute
        assert_eq!(next_grapheme_end(s, 1), 4);
        assert_eq!(prev_grapheme_start(s, 4), 1);
    }

    #[test]
    fn prefix_diff() {
        assert_eq!(common_prefix(b"1UA}", b"1UA99"), 3);
        assert_eq!(common_prefix(b"", b"x"), 0);
        assert_eq!(common_prefix(b"same", b"same"), 4);
    }

    #[test]
    fn echo_controls() {
        assert_eq!(echo(b"\x0bq"), "^Kq");
        assert_eq!(echo(b"label"), "label");
    }

    #[test]
    fn trailing_token() {
        assert_eq!(last_occurrence(b"foo bar", b" "), 4);
        assert_eq!(last_occurrence(b"foobar", b" ,"), 0);
    }
}
