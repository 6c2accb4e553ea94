//! File loading/saving and the save-point protocol.
//!
//! Writes are atomic with respect to rub-out: before a file is overwritten
//! it is renamed to a save-point (`.teco-N-name~` in the same directory).
//! Rubbing out the save renames the save-point back over the new content;
//! committing the command line unlinks it. Multiple saves of the same file
//! within one command line stack naturally since each gets a fresh N.

use std::fs;
use std::path::{Path, PathBuf};

use core_view::{Codepage, EolMode};
use tracing::{debug, trace};

use crate::error::{Result, TecoError};
use crate::{undo, Runtime};

#[derive(Default)]
pub struct SavePoints {
    /// Save-point files still on disk, for process-exit cleanup.
    pub files: Vec<PathBuf>,
    counter: u32,
}

impl SavePoints {
    fn next_name(&mut self, target: &Path) -> PathBuf {
        self.counter += 1;
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let base = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        dir.join(format!(".teco-{}-{}~", self.counter, base))
    }

    /// Unlink everything still pending (process exit).
    pub fn cleanup(&mut self) {
        for file in self.files.drain(..) {
            let _ = fs::remove_file(&file);
        }
    }

    fn forget(&mut self, file: &Path) {
        self.files.retain(|f| f != file);
    }
}

/// Resolve to an absolute path for ring comparisons; symlinks are resolved
/// when the file exists, otherwise the path is merely absolutized.
pub fn absolute_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Detect the dominant line ending of raw file content.
fn detect_eol(bytes: &[u8]) -> EolMode {
    let mut crlf = 0usize;
    let mut lf = 0usize;
    let mut cr = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => {
                crlf += 1;
                i += 2;
                continue;
            }
            b'\r' => cr += 1,
            b'\n' => lf += 1,
            _ => {}
        }
        i += 1;
    }
    if crlf >= lf && crlf >= cr && crlf > 0 {
        EolMode::CrLf
    } else if cr > lf {
        EolMode::Cr
    } else {
        EolMode::Lf
    }
}

fn normalize_eols(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                out.push(b'\n');
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

fn denormalize_eols(bytes: &[u8], mode: EolMode) -> Vec<u8> {
    if mode == EolMode::Lf {
        return bytes.to_vec();
    }
    let seq = mode.as_str().as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if b == b'\n' {
            out.extend_from_slice(seq);
        } else {
            out.push(b);
        }
    }
    out
}

/// Read a file, pick its codepage, and (when AUTOEOL is set) translate line
/// endings to `\n`, remembering the on-disk convention.
pub fn load_file(rt: &Runtime, path: &Path) -> Result<(Vec<u8>, Codepage, EolMode)> {
    let raw = fs::read(path)
        .map_err(|e| TecoError::failed(format!("Cannot read file \"{}\": {e}", path.display())))?;

    let codepage = match rt.default_codepage {
        Codepage::SingleByte => Codepage::SingleByte,
        // a file that does not decode falls back to single-byte
        Codepage::Utf8 if core_text::validate_utf8(&raw) => Codepage::Utf8,
        Codepage::Utf8 => Codepage::SingleByte,
    };

    let (content, eol) = if rt.ed.test(crate::edflags::EdFlags::AUTOEOL) {
        let mode = detect_eol(&raw);
        (normalize_eols(&raw), mode)
    } else {
        (raw, EolMode::Lf)
    };

    debug!(target: "fileio", path = %path.display(), bytes = content.len(), "load");
    Ok((content, codepage, eol))
}

/// Write file contents, protecting any previous version with a save-point.
pub fn save_file(rt: &mut Runtime, path: &Path, bytes: &[u8]) -> Result<()> {
    save_file_with_eol(rt, path, bytes, EolMode::Lf)
}

pub fn save_file_with_eol(rt: &mut Runtime, path: &Path, bytes: &[u8], eol: EolMode) -> Result<()> {
    if path.exists() {
        let savepoint = rt.savepoints.next_name(path);
        fs::rename(path, &savepoint).map_err(|e| {
            TecoError::failed(format!(
                "Cannot create save-point for \"{}\": {e}",
                path.display()
            ))
        })?;
        rt.savepoints.files.push(savepoint.clone());
        trace!(target: "fileio", savepoint = %savepoint.display(), "savepoint_created");

        let target = path.to_path_buf();
        undo::push_owning(
            rt,
            (savepoint, target),
            |(savepoint, target), rt, _| {
                // rub-out: the pre-save content comes back
                let _ = fs::rename(&savepoint, &target);
                rt.savepoints.forget(&savepoint);
            },
            |(savepoint, _), rt| {
                // commit: the new content sticks, the save-point goes
                let _ = fs::remove_file(&savepoint);
                rt.savepoints.forget(&savepoint);
            },
        );
    }

    let on_disk = if rt.ed.test(crate::edflags::EdFlags::AUTOEOL) {
        denormalize_eols(bytes, eol)
    } else {
        bytes.to_vec()
    };
    fs::write(path, on_disk)
        .map_err(|e| TecoError::failed(format!("Cannot write file \"{}\": {e}", path.display())))?;
    debug!(target: "fileio", path = %path.display(), bytes = bytes.len(), "save");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eol_detection() {
        assert_eq!(detect_eol(b"a\r\nb\r\n"), EolMode::CrLf);
        assert_eq!(detect_eol(b"a\nb\n"), EolMode::Lf);
        assert_eq!(detect_eol(b"a\rb\r"), EolMode::Cr);
        assert_eq!(detect_eol(b"plain"), EolMode::Lf);
    }

    #[test]
    fn eol_translation_round_trip() {
        let normalized = normalize_eols(b"one\r\ntwo\rthree\n");
        assert_eq!(normalized, b"one\ntwo\nthree\n");
        assert_eq!(
            denormalize_eols(b"one\ntwo\n", EolMode::CrLf),
            b"one\r\ntwo\r\n"
        );
    }

    #[test]
    fn savepoint_names_ascend_in_same_directory() {
        let mut sp = SavePoints::default();
        let a = sp.next_name(Path::new("/tmp/file.txt"));
        let b = sp.next_name(Path::new("/tmp/file.txt"));
        assert_eq!(a, PathBuf::from("/tmp/.teco-1-file.txt~"));
        assert_eq!(b, PathBuf::from("/tmp/.teco-2-file.txt~"));
    }
}
