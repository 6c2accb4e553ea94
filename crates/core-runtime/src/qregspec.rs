//! Parsing of Q-Register specifications.
//!
//! A specification is either a single code point (`Qa`), a `.`-prefixed
//! single code point addressing the innermost locals table (`Q.a`), or a
//! long name in brackets (`Q[name]`, `Q.[name]`) with string building active
//! inside the brackets. Single-character names fold ASCII case; long names
//! are matched byte-for-byte.
//!
//! The radix register `^R` always resolves to the locals table, which is
//! what makes the numeric radix local to macro invocations.

use crate::error::{Result, TecoError};
use crate::qreg::{self, TableSel, NAME_RADIX};
use crate::stringbuilding::StringBuildingMachine;
use crate::Runtime;

/// What the caller requires of the referenced register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QRegType {
    /// Fail unless the register exists (`Q`, `M`, `G`).
    Required,
    /// Missing registers are reported to the caller (`:Q`).
    Optional,
    /// Create a plain register on demand (`U`, `^U`, `X`).
    OptionalInit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecState {
    Start,
    /// After the `.` locals prefix.
    GotLocal,
    /// Inside `[` … `]`.
    LongName,
}

#[derive(Debug, Clone)]
pub enum SpecStatus {
    /// Feed more characters.
    More,
    /// Specification complete; `None` while parsing without executing.
    Done(Option<(TableSel, Vec<u8>)>),
}

#[derive(Debug, Clone)]
pub struct QRegSpecMachine {
    state: SpecState,
    pub kind: QRegType,
    local: bool,
    name: Vec<u8>,
    pub sb: StringBuildingMachine,
}

impl QRegSpecMachine {
    pub fn new(kind: QRegType) -> Self {
        Self {
            state: SpecState::Start,
            kind,
            local: false,
            name: Vec::new(),
            sb: StringBuildingMachine::new('\x1b'),
        }
    }

    pub fn reset(&mut self) {
        self.state = SpecState::Start;
        self.local = false;
        self.name.clear();
        self.sb.reset();
    }

    pub fn in_long_name(&self) -> bool {
        self.state == SpecState::LongName
    }

    /// The name collected so far, for TAB completion.
    pub fn partial_name(&self) -> (&[u8], bool) {
        (&self.name, self.local)
    }

    pub fn input(
        &mut self,
        rt: &mut Runtime,
        locals: usize,
        chr: char,
        parse_only: bool,
    ) -> Result<SpecStatus> {
        match self.state {
            SpecState::Start | SpecState::GotLocal => {
                if self.state == SpecState::Start && chr == '.' {
                    self.local = true;
                    self.state = SpecState::GotLocal;
                    return Ok(SpecStatus::More);
                }
                if chr == '[' {
                    self.state = SpecState::LongName;
                    self.sb.reset();
                    return Ok(SpecStatus::More);
                }
                core_text::push_wc(&mut self.name, core_text::ascii_toupper(chr));
                self.resolve(rt, locals, parse_only)
            }
            SpecState::LongName => {
                if self.sb.at_start() && chr == ']' {
                    return self.resolve(rt, locals, parse_only);
                }
                let mut name = std::mem::take(&mut self.name);
                let r = self
                    .sb
                    .input(rt, locals, chr, (!parse_only).then_some(&mut name));
                self.name = name;
                r?;
                Ok(SpecStatus::More)
            }
        }
    }

    fn resolve(&mut self, rt: &mut Runtime, locals: usize, parse_only: bool) -> Result<SpecStatus> {
        if parse_only {
            return Ok(SpecStatus::Done(None));
        }

        let sel = if self.local || self.name == NAME_RADIX {
            TableSel::Locals(locals)
        } else {
            TableSel::Globals
        };
        let name = std::mem::take(&mut self.name);

        match self.kind {
            QRegType::Required => {
                if !qreg::exists(rt, sel, &name) {
                    return Err(TecoError::invalid_qreg(&name, self.local));
                }
            }
            QRegType::Optional => {}
            QRegType::OptionalInit => qreg::ensure_reg(rt, sel, &name),
        }
        Ok(SpecStatus::Done(Some((sel, name))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::runtime_fixture;

    fn feed(rt: &mut Runtime, spec: &mut QRegSpecMachine, input: &str) -> Option<(TableSel, Vec<u8>)> {
        for c in input.chars() {
            match spec.input(rt, 0, c, false).unwrap() {
                SpecStatus::More => continue,
                SpecStatus::Done(r) => return r,
            }
        }
        panic!("specification not terminated by {input:?}");
    }

    #[test]
    fn single_character_folds_ascii() {
        let (mut rt, _) = runtime_fixture();
        let mut spec = QRegSpecMachine::new(QRegType::Required);
        let (sel, name) = feed(&mut rt, &mut spec, "a").unwrap();
        assert_eq!(sel, TableSel::Globals);
        assert_eq!(name, b"A");
    }

    #[test]
    fn dot_prefix_selects_locals() {
        let (mut rt, _) = runtime_fixture();
        let mut spec = QRegSpecMachine::new(QRegType::OptionalInit);
        let (sel, name) = feed(&mut rt, &mut spec, ".a").unwrap();
        assert_eq!(sel, TableSel::Locals(0));
        assert_eq!(name, b"A");
        assert!(qreg::exists(&rt, sel, &name));
    }

    #[test]
    fn long_names_are_byte_exact() {
        let (mut rt, _) = runtime_fixture();
        let mut spec = QRegSpecMachine::new(QRegType::OptionalInit);
        let (sel, name) = feed(&mut rt, &mut spec, "[MixedCase]").unwrap();
        assert_eq!(sel, TableSel::Globals);
        assert_eq!(name, b"MixedCase");
    }

    #[test]
    fn missing_required_register_fails() {
        let (mut rt, _) = runtime_fixture();
        let mut spec = QRegSpecMachine::new(QRegType::Required);
        let err = spec.input(&mut rt, 0, '\u{e9}', false).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidQReg);
    }

    #[test]
    fn radix_register_is_local() {
        let (mut rt, _) = runtime_fixture();
        let mut spec = QRegSpecMachine::new(QRegType::Required);
        let (sel, name) = feed(&mut rt, &mut spec, "\x12").unwrap();
        assert_eq!(sel, TableSel::Locals(0));
        assert_eq!(name, NAME_RADIX);
    }
}
