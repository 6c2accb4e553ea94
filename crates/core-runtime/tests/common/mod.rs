//! Shared driver for the end-to-end tests: a runtime plus command line fed
//! through the interactive keystroke path, exactly like a terminal would.

use core_runtime::cmdline::{self, CmdLine};
use core_runtime::error::{ErrorKind, Result};
use core_runtime::interface::{BatchInterface, InterruptFlag};
use core_runtime::qreg::TableSel;
use core_runtime::{qreg, Runtime};
use core_view::Codepage;

pub struct Session {
    pub rt: Runtime,
    pub cl: CmdLine,
    pub interrupt: InterruptFlag,
}

impl Session {
    pub fn new() -> Self {
        let interface = BatchInterface::new();
        let interrupt = interface.interrupt.clone();
        Self {
            rt: Runtime::new(Box::new(interface), true),
            cl: CmdLine::new(),
            interrupt,
        }
    }

    /// Type keys given in a readable notation: `$` is ESC, `^X` a control
    /// key, `^^` a literal caret and `$$` therefore terminates.
    pub fn keys(&mut self, spec: &str) -> Result<()> {
        let mut chars = spec.chars().peekable();
        while let Some(c) = chars.next() {
            let key = match c {
                '$' => '\x1b',
                '^' => match chars.next() {
                    Some('^') => '^',
                    Some(x) => core_text::ctl_key(x),
                    None => '^',
                },
                c => c,
            };
            self.press(key)?;
        }
        Ok(())
    }

    pub fn press(&mut self, key: char) -> Result<()> {
        let mut buf = [0u8; 4];
        let bytes = key.encode_utf8(&mut buf).as_bytes().to_vec();
        match cmdline::keypress(&mut self.rt, &mut self.cl, &bytes) {
            Err(e) if e.kind == ErrorKind::Quit => Ok(()),
            r => r,
        }
    }

    /// The last message the runtime displayed.
    pub fn message(&self) -> Option<String> {
        self.rt
            .interface
            .as_any()
            .downcast_ref::<BatchInterface>()
            .expect("session uses the batch interface")
            .last_message()
            .map(str::to_string)
    }

    pub fn int_of(&self, name: &[u8]) -> i64 {
        qreg::get_integer(&self.rt, TableSel::Globals, name).expect("register exists")
    }

    pub fn string_of(&mut self, name: &[u8]) -> Vec<u8> {
        qreg::get_string(&mut self.rt, TableSel::Globals, name)
            .expect("register exists")
            .0
    }

    pub fn set_int(&mut self, name: &[u8], v: i64) {
        qreg::set_integer(&mut self.rt, TableSel::Globals, name, v).unwrap();
    }

    pub fn set_string(&mut self, name: &[u8], s: &[u8]) {
        qreg::set_string(&mut self.rt, TableSel::Globals, name, s, Codepage::Utf8).unwrap();
    }

    /// Current buffer text.
    pub fn buffer_text(&self) -> Vec<u8> {
        let doc = self.rt.ring.current().view.doc;
        self.rt.docs.get_bytes(doc)
    }

    pub fn dot(&self) -> usize {
        self.rt.current_view().dot
    }
}
