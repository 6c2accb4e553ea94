//! The `ED` flag word and the soft memory limit.
//!
//! `ED` is surfaced to the language as the integer of register `^E`; the
//! bits configure runtime behaviour. The lowest three bits select a memory
//! limit preset, checked once per parser step.

use crate::error::{Result, TecoError};
use crate::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdFlags(pub i64);

impl EdFlags {
    pub const MEMLIMIT_MASK: i64 = 0x7;
    pub const AUTOEOL: i64 = 1 << 3;
    pub const ICONS: i64 = 1 << 4;
    pub const FNKEYS: i64 = 1 << 5;
    pub const MOUSEKEY: i64 = 1 << 6;
    pub const XTERM_CLIPBOARD: i64 = 1 << 7;
    pub const OSC52: i64 = 1 << 8;
    pub const DEFAULT_ANSI: i64 = 1 << 9;
    pub const AUTOCASEFOLD: i64 = 1 << 10;

    pub fn new() -> Self {
        // automatic EOL translation is on by default
        Self(Self::AUTOEOL)
    }

    pub fn test(&self, bits: i64) -> bool {
        self.0 & bits != 0
    }

    /// Memory-limit presets selected by the low bits; 1 disables the check.
    pub fn memory_limit(&self) -> Option<usize> {
        const MB: usize = 1024 * 1024;
        match self.0 & Self::MEMLIMIT_MASK {
            1 => None,
            2 => Some(100 * MB),
            3 => Some(250 * MB),
            4 => Some(1024 * MB),
            5 => Some(2048 * MB),
            _ => Some(500 * MB),
        }
    }
}

impl Default for EdFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Rough estimate of process-visible allocation: document contents plus a
/// fixed cost per undo token. Precise accounting is not worth the
/// bookkeeping; the limit exists to catch runaway macros, not to meter.
pub fn check_memory(rt: &Runtime) -> Result<()> {
    let Some(limit) = rt.ed.memory_limit() else {
        return Ok(());
    };
    const TOKEN_COST: usize = 96;
    let estimate = rt.docs.total_bytes() + rt.undo.len() * TOKEN_COST;
    if estimate > limit {
        return Err(TecoError::memlimit(limit));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_autoeol_and_500m_limit() {
        let ed = EdFlags::new();
        assert!(ed.test(EdFlags::AUTOEOL));
        assert_eq!(ed.memory_limit(), Some(500 * 1024 * 1024));
    }

    #[test]
    fn preset_one_disables_the_limit() {
        assert_eq!(EdFlags(1).memory_limit(), None);
        assert_eq!(EdFlags(2).memory_limit(), Some(100 * 1024 * 1024));
    }
}
