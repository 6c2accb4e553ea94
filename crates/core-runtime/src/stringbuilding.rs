//! The string-building sub-machine.
//!
//! Activated for most string arguments, it expands the caret constructs
//! in-place while the argument is collected: `^Q`/`^R` quote the next
//! character, `^V`/`^W` fold case (doubled: latch for the rest of the
//! string), `^E…` interpolates Q-Register contents in several formats and
//! `^P` turns further building off. Everything else passes through.
//!
//! The machine knows its target encoding: appended code points are checked
//! against it, and case folding is Unicode-aware only for UTF-8 targets.

use core_view::Codepage;

use crate::error::{ErrorKind, Result, TecoError};
use crate::expressions;
use crate::qreg::{self, TableSel};
use crate::qregspec::{QRegSpecMachine, QRegType, SpecStatus};
use crate::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SBMode {
    Normal,
    Upper,
    Lower,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SBState {
    Start,
    /// After `^`.
    Ctl,
    /// After `^Q`/`^R`: next character is literal.
    Escaped,
    /// After `^V` / `^W`: one-shot fold of the next character.
    Lower,
    Upper,
    /// After `^V^` / `^W^`.
    LowerCtl,
    UpperCtl,
    /// After `^E`.
    CtlE,
    /// `^E\q`, `^EUq`, `^E<…>`, `^EQq`, `^E@q`, `^ENq`.
    CtlENum,
    CtlEU,
    CtlECode,
    CtlEQ,
    CtlEQuote,
    CtlEN,
}

#[derive(Debug, Clone)]
pub struct StringBuildingMachine {
    state: SBState,
    pub mode: SBMode,
    /// Uppercase-folded string terminator; `@` changes it per argument.
    pub escape_char: char,
    pub codepage: Codepage,
    /// Accumulator for `^E<…>`.
    code: Vec<u8>,
    qregspec: Option<Box<QRegSpecMachine>>,
}

impl StringBuildingMachine {
    pub fn new(escape_char: char) -> Self {
        Self {
            state: SBState::Start,
            mode: SBMode::Normal,
            escape_char,
            codepage: Codepage::Utf8,
            code: Vec::new(),
            qregspec: None,
        }
    }

    /// Back to a fresh machine between string arguments; the escape
    /// character is the caller's business.
    pub fn reset(&mut self) {
        self.state = SBState::Start;
        self.mode = SBMode::Normal;
        self.code.clear();
        if let Some(spec) = &mut self.qregspec {
            spec.reset();
        }
    }

    pub fn at_start(&self) -> bool {
        self.state == SBState::Start
    }

    /// After `^Q`/`^R`: the next key is taken literally, even keys that
    /// would otherwise be immediate editing commands.
    pub fn in_escaped(&self) -> bool {
        self.state == SBState::Escaped
    }

    pub fn in_qregspec(&self) -> Option<&QRegSpecMachine> {
        if matches!(
            self.state,
            SBState::CtlENum | SBState::CtlEU | SBState::CtlEQ | SBState::CtlEQuote | SBState::CtlEN
        ) {
            self.qregspec.as_deref()
        } else {
            None
        }
    }

    /// Case folding applied to pass-through characters.
    fn fold(&self, chr: char) -> char {
        let full = self.codepage == Codepage::Utf8 || (chr as u32) < 0x80;
        match self.mode {
            SBMode::Upper if full => chr.to_uppercase().next().unwrap_or(chr),
            SBMode::Lower if full => chr.to_lowercase().next().unwrap_or(chr),
            _ => chr,
        }
    }

    fn append_char(&self, result: &mut Vec<u8>, chr: char) {
        match self.codepage {
            Codepage::Utf8 => core_text::push_wc(result, chr),
            Codepage::SingleByte => result.push(chr as u32 as u8),
        }
    }

    /// Append raw bytes with case folding.
    fn append_folded(&self, result: &mut Vec<u8>, bytes: &[u8]) {
        if self.mode != SBMode::Upper && self.mode != SBMode::Lower {
            result.extend_from_slice(bytes);
            return;
        }
        match self.codepage {
            Codepage::Utf8 => {
                let s = String::from_utf8_lossy(bytes);
                for c in s.chars() {
                    core_text::push_wc(result, self.fold(c));
                }
            }
            Codepage::SingleByte => {
                for &b in bytes {
                    let c = self.fold(b as char);
                    result.push(if (c as u32) <= 0xff { c as u32 as u8 } else { b });
                }
            }
        }
    }

    /// Append one code point from an integer, validating against the target
    /// encoding. False when the value is out of range.
    fn append_code(&self, result: &mut Vec<u8>, value: i64) -> bool {
        match self.codepage {
            Codepage::Utf8 => {
                let Some(chr) = u32::try_from(value).ok().and_then(char::from_u32) else {
                    return false;
                };
                core_text::push_wc(result, self.fold(chr));
                true
            }
            Codepage::SingleByte => {
                if !(0..=0xff).contains(&value) {
                    return false;
                }
                let c = self.fold(value as u8 as char);
                result.push(if (c as u32) <= 0xff { c as u32 as u8 } else { value as u8 });
                true
            }
        }
    }

    fn qregspec_mut(&mut self) -> &mut QRegSpecMachine {
        self.qregspec
            .get_or_insert_with(|| Box::new(QRegSpecMachine::new(QRegType::Required)))
    }

    /// Process one source code point, appending expanded bytes to `result`.
    /// `result` is `None` while the surrounding command is only parsed.
    pub fn input(
        &mut self,
        rt: &mut Runtime,
        locals: usize,
        chr: char,
        result: Option<&mut Vec<u8>>,
    ) -> Result<()> {
        match self.state {
            SBState::Start => {
                if self.mode != SBMode::Disabled {
                    if chr == '^' {
                        self.state = SBState::Ctl;
                        return Ok(());
                    }
                    // Ctrl+^ (code 30) is inserted verbatim; any other
                    // control key behaves like its caret spelling.
                    if chr != '\x1e' && core_text::is_ctl(chr) {
                        return self.ctl_input(rt, core_text::ctl_echo(chr), result);
                    }
                }
                if let Some(result) = result {
                    let folded = self.fold(chr);
                    self.append_char(result, folded);
                }
                Ok(())
            }
            SBState::Ctl => self.ctl_input(rt, chr, result),
            SBState::Escaped => {
                self.state = SBState::Start;
                if let Some(result) = result {
                    let folded = self.fold(chr);
                    self.append_char(result, folded);
                }
                Ok(())
            }
            SBState::Lower | SBState::Upper => self.oneshot_input(chr, result),
            SBState::LowerCtl | SBState::UpperCtl => self.oneshot_ctl_input(chr, result),
            SBState::CtlE => self.ctle_input(chr, result),
            SBState::CtlECode => self.ctle_code_input(chr, result),
            SBState::CtlENum | SBState::CtlEU | SBState::CtlEQ | SBState::CtlEQuote
            | SBState::CtlEN => self.ctle_qreg_input(rt, locals, chr, result),
        }
    }

    fn ctl_input(&mut self, _rt: &mut Runtime, chr: char, result: Option<&mut Vec<u8>>) -> Result<()> {
        let chr = core_text::ascii_toupper(chr);
        self.state = SBState::Start;
        match chr {
            // double caret expands to a single caret
            '^' => {
                if let Some(result) = result {
                    self.append_char(result, '^');
                }
            }
            'P' => self.mode = SBMode::Disabled,
            'Q' | 'R' => self.state = SBState::Escaped,
            'V' => self.state = SBState::Lower,
            'W' => self.state = SBState::Upper,
            'E' => self.state = SBState::CtlE,
            _ => {
                if !('@'..='_').contains(&chr) {
                    // ^c would not name a control character; keep both
                    if let Some(result) = result {
                        self.append_char(result, '^');
                        self.append_char(result, chr);
                    }
                } else if let Some(result) = result {
                    self.append_char(result, core_text::ctl_key(chr));
                }
            }
        }
        Ok(())
    }

    fn oneshot_input(&mut self, chr: char, result: Option<&mut Vec<u8>>) -> Result<()> {
        let lower = self.state == SBState::Lower;
        if chr == '^' {
            self.state = if lower { SBState::LowerCtl } else { SBState::UpperCtl };
            return Ok(());
        }
        if core_text::is_ctl(chr) {
            self.state = if lower { SBState::LowerCtl } else { SBState::UpperCtl };
            return self.oneshot_ctl_input(core_text::ctl_echo(chr), result);
        }
        self.state = SBState::Start;
        if let Some(result) = result {
            let full = self.codepage == Codepage::Utf8 || (chr as u32) < 0x80;
            let folded = if !full {
                chr
            } else if lower {
                chr.to_lowercase().next().unwrap_or(chr)
            } else {
                chr.to_uppercase().next().unwrap_or(chr)
            };
            self.append_char(result, folded);
        }
        Ok(())
    }

    fn oneshot_ctl_input(&mut self, chr: char, result: Option<&mut Vec<u8>>) -> Result<()> {
        let lower = self.state == SBState::LowerCtl;
        self.state = SBState::Start;
        let Some(result) = result else {
            return Ok(());
        };
        let chr = core_text::ascii_toupper(chr);
        // ^V^V / ^W^W latch the folding mode for the rest of the string
        if lower && chr == 'V' {
            self.mode = SBMode::Lower;
        } else if !lower && chr == 'W' {
            self.mode = SBMode::Upper;
        } else {
            // control keys cannot be case folded
            self.append_char(result, core_text::ctl_key(chr));
        }
        Ok(())
    }

    fn ctle_input(&mut self, chr: char, result: Option<&mut Vec<u8>>) -> Result<()> {
        let next = match core_text::ascii_toupper(chr) {
            '\\' => SBState::CtlENum,
            'U' => SBState::CtlEU,
            '<' => {
                self.code.clear();
                self.state = SBState::CtlECode;
                return Ok(());
            }
            'Q' => SBState::CtlEQ,
            '@' => SBState::CtlEQuote,
            'N' => SBState::CtlEN,
            _ => {
                // not a construct; search patterns may legitimately start ^E
                if let Some(result) = result {
                    let mut raw = vec![b'\x05'];
                    core_text::push_wc(&mut raw, chr);
                    self.append_folded(result, &raw);
                }
                self.state = SBState::Start;
                return Ok(());
            }
        };
        self.qregspec_mut().reset();
        self.state = next;
        Ok(())
    }

    fn ctle_code_input(&mut self, chr: char, result: Option<&mut Vec<u8>>) -> Result<()> {
        if chr != '>' {
            if result.is_some() {
                core_text::push_wc(&mut self.code, chr);
            }
            return Ok(());
        }

        self.state = SBState::Start;
        let Some(result) = result else {
            return Ok(());
        };
        if self.code.is_empty() {
            return Err(TecoError::new(
                ErrorKind::CodePoint,
                "Invalid empty ^E<> specified",
            ));
        }
        let text = String::from_utf8_lossy(&self.code).into_owned();
        let code = parse_code(&text)
            .ok_or_else(|| TecoError::new(ErrorKind::CodePoint, format!("Invalid code ^E<{text}> specified")))?;
        if !self.append_code(result, code) {
            return Err(TecoError::new(
                ErrorKind::CodePoint,
                format!("Invalid code ^E<{text}> specified"),
            ));
        }
        self.code.clear();
        Ok(())
    }

    fn ctle_qreg_input(
        &mut self,
        rt: &mut Runtime,
        locals: usize,
        chr: char,
        result: Option<&mut Vec<u8>>,
    ) -> Result<()> {
        let construct = self.state;
        let parse_only = result.is_none();
        let spec = self.qregspec_mut();
        let (sel, name) = match spec.input(rt, locals, chr, parse_only)? {
            SpecStatus::More => return Ok(()),
            SpecStatus::Done(None) => {
                self.state = SBState::Start;
                return Ok(());
            }
            SpecStatus::Done(Some(r)) => r,
        };
        self.state = SBState::Start;
        let result = result.expect("resolved register despite parse-only");

        match construct {
            SBState::CtlENum => {
                let value = qreg::get_integer(rt, sel, &name)?;
                let radix = rt.qregs.locals[locals].radix;
                let formatted = expressions::format(value, radix);
                self.append_folded(result, formatted.as_bytes());
            }
            SBState::CtlEU => {
                let value = qreg::get_integer(rt, sel, &name)?;
                if !self.append_code(result, value) {
                    return Err(TecoError::new(
                        ErrorKind::CodePoint,
                        format!(
                            "Q-Register \"{}\" does not contain a valid codepoint",
                            core_text::echo(&name)
                        ),
                    ));
                }
            }
            SBState::CtlEQ => {
                let (bytes, _) = qreg::get_string(rt, sel, &name)?;
                self.append_folded(result, &bytes);
            }
            SBState::CtlEQuote => {
                let (bytes, _) = qreg::get_string(rt, sel, &name)?;
                if bytes.contains(&0) {
                    return Err(TecoError::qreg_contains_null(
                        &name,
                        matches!(sel, TableSel::Locals(_)),
                    ));
                }
                let quoted = shell_quote(&bytes);
                self.append_folded(result, &quoted);
            }
            SBState::CtlEN => {
                let (bytes, _) = qreg::get_string(rt, sel, &name)?;
                if bytes.contains(&0) {
                    return Err(TecoError::qreg_contains_null(
                        &name,
                        matches!(sel, TableSel::Locals(_)),
                    ));
                }
                let escaped = glob_escape(&bytes);
                self.append_folded(result, &escaped);
            }
            _ => unreachable!("not a ^E register construct"),
        }
        Ok(())
    }

    /// Escape `str` so that re-inserting it into this argument reproduces
    /// it literally: the terminator (and closing bracket forms) get a `^Q`
    /// prefix. Used when completions are spliced into the command line.
    pub fn escape_for_insert(&self, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len() + 2);
        let s = String::from_utf8_lossy(bytes);
        for c in s.chars() {
            let needs_quote = core_text::ascii_toupper(c) == self.escape_char
                || (self.escape_char == '[' && c == ']')
                || (self.escape_char == '{' && c == '}');
            if needs_quote {
                out.push(b'\x11'); // ^Q
            }
            core_text::push_wc(&mut out, c);
        }
        out
    }
}

/// `^E<…>` constants: decimal by default, `0x`/`0o`/`0b` prefixes accepted,
/// and a leading `0` means octal as in the classic syntax.
fn parse_code(text: &str) -> Option<i64> {
    let t = text.trim();
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Some(oct) = t.strip_prefix("0o").or_else(|| t.strip_prefix("0O")) {
        return i64::from_str_radix(oct, 8).ok();
    }
    if let Some(bin) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        return i64::from_str_radix(bin, 2).ok();
    }
    if t.len() > 1 && t.starts_with('0') {
        return i64::from_str_radix(&t[1..], 8).ok();
    }
    t.parse().ok()
}

/// POSIX shell single-quoting.
fn shell_quote(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![b'\''];
    for &b in bytes {
        if b == b'\'' {
            out.extend_from_slice(b"'\\''");
        } else {
            out.push(b);
        }
    }
    out.push(b'\'');
    out
}

/// Backslash-escape glob metacharacters.
fn glob_escape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if matches!(b, b'*' | b'?' | b'[' | b']' | b'\\') {
            out.push(b'\\');
        }
        out.push(b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::runtime_fixture;

    fn build(rt: &mut Runtime, input: &str) -> Vec<u8> {
        let mut sb = StringBuildingMachine::new('\x1b');
        let mut out = Vec::new();
        for c in input.chars() {
            sb.input(rt, 0, c, Some(&mut out)).unwrap();
        }
        out
    }

    #[test]
    fn plain_text_is_identity() {
        let (mut rt, _) = runtime_fixture();
        assert_eq!(build(&mut rt, "hello, world"), b"hello, world");
    }

    #[test]
    fn caret_constructs() {
        let (mut rt, _) = runtime_fixture();
        // ^^ -> caret, ^Qx -> literal x, ^A -> control-A
        assert_eq!(build(&mut rt, "^^"), b"^");
        assert_eq!(build(&mut rt, "^Q^"), b"^");
        assert_eq!(build(&mut rt, "^A"), b"\x01");
        assert_eq!(build(&mut rt, "^1"), b"^1");
    }

    #[test]
    fn case_folding_oneshot_and_latched() {
        let (mut rt, _) = runtime_fixture();
        assert_eq!(build(&mut rt, "^Wabc"), b"Abc");
        assert_eq!(build(&mut rt, "^W^Wabc"), b"ABC");
        assert_eq!(build(&mut rt, "^V^VABC"), b"abc");
    }

    #[test]
    fn ctle_interpolations() {
        let (mut rt, _) = runtime_fixture();
        qreg::set_integer(&mut rt, TableSel::Globals, b"A", 66).unwrap();
        qreg::set_string(&mut rt, TableSel::Globals, b"A", b"str", Codepage::Utf8).unwrap();
        assert_eq!(build(&mut rt, "^EUA"), b"B");
        assert_eq!(build(&mut rt, "^E\\A"), b"66");
        assert_eq!(build(&mut rt, "^EQA"), b"str");
        assert_eq!(build(&mut rt, "x^E<65>y"), b"xAy");
        assert_eq!(build(&mut rt, "^E<0x41>"), b"A");
    }

    #[test]
    fn ctle_radix_follows_locals() {
        let (mut rt, _) = runtime_fixture();
        qreg::set_integer(&mut rt, TableSel::Globals, b"A", 255).unwrap();
        rt.qregs.locals[0].radix = 16;
        assert_eq!(build(&mut rt, "^E\\A"), b"FF");
    }

    #[test]
    fn shell_quoting() {
        let (mut rt, _) = runtime_fixture();
        qreg::set_string(&mut rt, TableSel::Globals, b"A", b"it's", Codepage::Utf8).unwrap();
        assert_eq!(build(&mut rt, "^E@A"), b"'it'\\''s'");
    }

    #[test]
    fn disable_building_with_ctlp() {
        let (mut rt, _) = runtime_fixture();
        // after ^P, caret constructs pass through verbatim
        assert_eq!(build(&mut rt, "^Pab^Wc"), b"ab^Wc");
    }

    #[test]
    fn invalid_codepoint_is_an_error() {
        let (mut rt, _) = runtime_fixture();
        qreg::set_integer(&mut rt, TableSel::Globals, b"A", -1).unwrap();
        let mut sb = StringBuildingMachine::new('\x1b');
        let mut out = Vec::new();
        for c in "^EU".chars() {
            sb.input(&mut rt, 0, c, Some(&mut out)).unwrap();
        }
        let err = sb.input(&mut rt, 0, 'A', Some(&mut out)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CodePoint);
    }

    #[test]
    fn completion_escaping_quotes_terminators() {
        let sb = StringBuildingMachine::new('X');
        assert_eq!(sb.escape_for_insert(b"axb"), b"a\x11xb");
    }
}
