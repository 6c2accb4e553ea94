//! The display interface the runtime calls out to.
//!
//! Everything user-visible goes through this trait: messages, command-line
//! echo, the completion popup, clipboards and the interrupt flag. The
//! runtime never assumes a terminal; batch mode and the test suite use
//! [`BatchInterface`], which records messages and keeps clipboards in
//! memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, TecoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgLevel {
    User,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupKind {
    Plain,
    File,
    Directory,
}

/// What the interface needs to echo the command line.
pub struct CmdlineEcho<'a> {
    pub str: &'a [u8],
    pub effective_len: usize,
}

pub trait Interface {
    /// Concrete-type access, mainly for tests inspecting recorded output.
    fn as_any(&self) -> &dyn std::any::Any;

    fn msg(&mut self, level: MsgLevel, text: &str);
    fn msg_clear(&mut self) {}

    fn cmdline_update(&mut self, _cmdline: &CmdlineEcho) {}

    /// Title/status information: the current buffer or register changed.
    fn info_update_buffer(&mut self, _name: Option<&str>, _dirty: bool) {}
    fn info_update_qreg(&mut self, _name: &[u8]) {}

    fn popup_add(&mut self, _kind: PopupKind, _name: &[u8], _highlight: bool) {}
    fn popup_show(&mut self) {}
    fn popup_scroll(&mut self) {}
    fn popup_clear(&mut self) {}
    fn popup_is_shown(&self) -> bool {
        false
    }

    fn set_clipboard(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let _ = (name, data);
        Err(TecoError::failed("Clipboard not supported by interface"))
    }
    fn get_clipboard(&mut self, name: &str) -> Result<Vec<u8>> {
        let _ = name;
        Err(TecoError::failed("Clipboard not supported by interface"))
    }
    fn has_clipboard(&self) -> bool {
        false
    }

    /// Set asynchronously on `^C`/`SIGINT`; polled at every parser step.
    fn is_interrupted(&self) -> bool;
    fn clear_interrupted(&mut self) {}
}

/// Shared interrupt flag handed to signal handlers.
#[derive(Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Headless interface for batch execution and tests.
#[derive(Default)]
pub struct BatchInterface {
    pub messages: Vec<(MsgLevel, String)>,
    pub clipboards: std::collections::HashMap<String, Vec<u8>>,
    pub popup: Vec<Vec<u8>>,
    popup_shown: bool,
    pub interrupt: InterruptFlag,
    /// Forward messages to stdout/stderr as they arrive (batch mode).
    echo: bool,
}

impl BatchInterface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Last message of at least `User` severity, for assertions.
    pub fn last_message(&self) -> Option<&str> {
        self.messages.last().map(|(_, m)| m.as_str())
    }
}

impl Interface for BatchInterface {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn msg(&mut self, level: MsgLevel, text: &str) {
        if self.echo {
            match level {
                MsgLevel::Error | MsgLevel::Warning => eprintln!("{text}"),
                _ => println!("{text}"),
            }
        }
        self.messages.push((level, text.to_string()));
    }

    fn popup_add(&mut self, _kind: PopupKind, name: &[u8], _highlight: bool) {
        self.popup.push(name.to_vec());
    }
    fn popup_show(&mut self) {
        self.popup_shown = true;
    }
    fn popup_clear(&mut self) {
        self.popup.clear();
        self.popup_shown = false;
    }
    fn popup_is_shown(&self) -> bool {
        self.popup_shown
    }

    fn set_clipboard(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.clipboards.insert(name.to_string(), data.to_vec());
        Ok(())
    }
    fn get_clipboard(&mut self, name: &str) -> Result<Vec<u8>> {
        Ok(self.clipboards.get(name).cloned().unwrap_or_default())
    }
    fn has_clipboard(&self) -> bool {
        true
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt.is_raised()
    }
    fn clear_interrupted(&mut self) {
        self.interrupt.clear();
    }
}
