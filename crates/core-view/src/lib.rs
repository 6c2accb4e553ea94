//! The opaque document/view component the runtime edits through.
//!
//! The runtime was designed against an external editing widget that owns all
//! text storage: documents are reference-counted handles, a view shows one
//! document at a time, and every text operation goes through a narrow message
//! protocol so that undo tokens can replay view messages verbatim. This crate
//! is a self-contained, in-memory implementation of that contract backed by
//! `ropey`. It serves both production and tests; nothing in the runtime knows
//! whether a "real" widget is behind it.
//!
//! Positions are code-point indices ("glyphs" in TECO terms), which map
//! directly onto rope char indices. Styling and line states, used only by the
//! syntax lexer, are byte-addressed like the widget's were.

mod store;
mod view;

pub use store::{Codepage, DocId, DocStore, EolMode};
pub use view::{View, ViewMessage};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewError {
    /// A byte sequence was pushed into a UTF-8 document that does not decode.
    #[error("Invalid UTF-8 byte sequence")]
    InvalidUtf8,
    /// A code point above U+00FF was pushed into a single-byte document.
    #[error("Codepoint U+{0:04X} not representable in single-byte document")]
    Unrepresentable(u32),
}

pub type Result<T> = std::result::Result<T, ViewError>;
