//! Error values produced by commands and the parser.
//!
//! Every command either succeeds or yields a [`TecoError`] carrying a kind,
//! a message, and (once the step loop has seen it) a source position. A few
//! kinds are pure control flow — `Quit`, `Return` and `CmdlineReplace` — and
//! are matched explicitly by the macro executor and the command-line layer
//! instead of ever reaching the user.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Modifier,
    ArgExpected,
    Range,
    CodePoint,
    InvalidBuf,
    InvalidQReg,
    QRegContainsNull,
    EditingLocalQReg,
    MemLimit,
    Interrupted,
    Failed,
    /// Normal program termination (`EX` at commit, window close).
    Quit,
    /// Early return from a macro (`$$`).
    Return,
    /// Command-line replacement requested (`}`).
    CmdlineReplace,
}

impl ErrorKind {
    /// Control-flow kinds never carry a user-visible message.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            ErrorKind::Quit | ErrorKind::Return | ErrorKind::CmdlineReplace
        )
    }
}

/// One entry of the error's call-stack, innermost first.
#[derive(Debug, Clone)]
pub enum Frame {
    Macro { name: String, line: usize, column: usize },
    File { path: String, line: usize, column: usize },
    Toplevel { line: usize, column: usize },
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Macro { name, line, column } => {
                write!(f, "in macro \"{name}\" at {line}:{column}")
            }
            Frame::File { path, line, column } => write!(f, "in file \"{path}\" at {line}:{column}"),
            Frame::Toplevel { line, column } => write!(f, "at {line}:{column}"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TecoError {
    pub kind: ErrorKind,
    pub message: String,
    /// Byte offset into the macro that failed; attached by the step loop of
    /// the innermost machine, never overwritten further out.
    pub pos: Option<usize>,
    pub frames: Vec<Frame>,
}

impl TecoError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            pos: None,
            frames: Vec::new(),
        }
    }

    pub fn syntax(chr: char) -> Self {
        Self::new(
            ErrorKind::Syntax,
            format!("Syntax error \"{}\"", printable(chr)),
        )
    }

    pub fn modifier(chr: char) -> Self {
        Self::new(
            ErrorKind::Modifier,
            format!("Invalid modifier for command \"{}\"", printable(chr)),
        )
    }

    pub fn arg_expected(cmd: &str) -> Self {
        Self::new(
            ErrorKind::ArgExpected,
            format!("Argument expected for <{cmd}>"),
        )
    }

    pub fn range(cmd: &str) -> Self {
        Self::new(ErrorKind::Range, format!("Invalid range specified for <{cmd}>"))
    }

    pub fn invalid_qreg(name: &[u8], local: bool) -> Self {
        Self::new(
            ErrorKind::InvalidQReg,
            format!(
                "Invalid Q-Register \"{}{}\"",
                if local { "." } else { "" },
                core_text::echo(name)
            ),
        )
    }

    pub fn qreg_contains_null(name: &[u8], local: bool) -> Self {
        Self::new(
            ErrorKind::QRegContainsNull,
            format!(
                "Q-Register \"{}{}\" contains null-bytes",
                if local { "." } else { "" },
                core_text::echo(name)
            ),
        )
    }

    pub fn invalid_buf(id: i64) -> Self {
        Self::new(
            ErrorKind::InvalidBuf,
            format!("Invalid buffer id {id}"),
        )
    }

    pub fn interrupted() -> Self {
        Self::new(ErrorKind::Interrupted, "Interrupted")
    }

    pub fn memlimit(limit: usize) -> Self {
        Self::new(
            ErrorKind::MemLimit,
            format!("Memory limit of {limit} bytes exceeded"),
        )
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Failed, message)
    }

    pub fn quit() -> Self {
        Self::new(ErrorKind::Quit, "")
    }

    pub fn ret() -> Self {
        Self::new(ErrorKind::Return, "")
    }

    pub fn cmdline_replace() -> Self {
        Self::new(ErrorKind::CmdlineReplace, "")
    }

    /// Attach the failing byte offset unless an inner frame already did.
    pub fn set_pos(&mut self, pos: usize) {
        if self.pos.is_none() {
            self.pos = Some(pos);
        }
    }

    /// Translate `pos` against `src` into a line/column frame.
    pub fn add_frame(&mut self, src: &[u8], frame: impl FnOnce(usize, usize) -> Frame) {
        let pos = self.pos.unwrap_or(0).min(src.len());
        let mut line = 1;
        let mut column = 1;
        for &b in &src[..pos] {
            if b == b'\n' {
                line += 1;
                column = 1;
            } else if (b & 0xc0) != 0x80 {
                column += 1;
            }
        }
        self.frames.push(frame(line, column));
        // positions are per-frame; the next outer frame records its own
        self.pos = None;
    }

    /// Multi-line report for the message area.
    pub fn report(&self) -> String {
        let mut out = self.message.clone();
        for frame in &self.frames {
            out.push('\n');
            out.push_str(&format!("    {frame}"));
        }
        out
    }
}

fn printable(chr: char) -> String {
    if core_text::is_ctl(chr) {
        format!("^{}", core_text::ctl_echo(chr))
    } else {
        chr.to_string()
    }
}

pub type Result<T> = std::result::Result<T, TecoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_characters_echo_in_messages() {
        let err = TecoError::syntax('\x01');
        assert_eq!(err.message, "Syntax error \"^A\"");
    }

    #[test]
    fn frame_translation_counts_lines_and_columns() {
        let mut err = TecoError::syntax('x');
        err.set_pos(6);
        err.add_frame(b"ab\ncdex", |line, column| Frame::Toplevel { line, column });
        match &err.frames[0] {
            Frame::Toplevel { line, column } => {
                assert_eq!((*line, *column), (2, 4));
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(err.pos.is_none());
    }

    #[test]
    fn inner_position_wins() {
        let mut err = TecoError::syntax('x');
        err.set_pos(3);
        err.set_pos(9);
        assert_eq!(err.pos, Some(3));
    }
}
