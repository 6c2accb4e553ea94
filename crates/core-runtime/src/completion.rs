//! TAB-completion helpers: file names, directories, and generic name
//! lists (Q-Register names, goto labels).
//!
//! A completion yields the characters extending the prefix to the longest
//! unambiguous continuation, plus the full candidate list for the popup
//! when several remain.

use std::fs;
use std::path::{Path, PathBuf};

pub struct Completion {
    /// Bytes to append to what the user already typed.
    pub new_chars: Vec<u8>,
    /// The match is complete: the argument may be terminated.
    pub unambiguous: bool,
    /// All candidates, for the popup (empty when zero or one).
    pub candidates: Vec<Vec<u8>>,
}

fn common_prefix_of(names: &[Vec<u8>]) -> Vec<u8> {
    let Some(first) = names.first() else {
        return Vec::new();
    };
    let mut len = first.len();
    for name in &names[1..] {
        len = len.min(core_text::common_prefix(first, name));
    }
    first[..len].to_vec()
}

/// Complete over an arbitrary list of byte-string names.
pub fn complete_list<I>(prefix: &[u8], names: I) -> Completion
where
    I: IntoIterator<Item = Vec<u8>>,
{
    let matches: Vec<Vec<u8>> = names
        .into_iter()
        .filter(|n| n.starts_with(prefix))
        .collect();

    match matches.len() {
        0 => Completion {
            new_chars: Vec::new(),
            unambiguous: false,
            candidates: Vec::new(),
        },
        1 => Completion {
            new_chars: matches[0][prefix.len()..].to_vec(),
            unambiguous: true,
            candidates: Vec::new(),
        },
        _ => {
            let common = common_prefix_of(&matches);
            Completion {
                new_chars: common[prefix.len()..].to_vec(),
                unambiguous: false,
                candidates: matches,
            }
        }
    }
}

/// Complete a (partial) file name. Directories complete with a trailing
/// separator and never count as unambiguous, so completion can descend.
pub fn complete_file(prefix: &[u8], only_dirs: bool) -> Completion {
    let prefix_str = String::from_utf8_lossy(prefix).into_owned();
    let path = PathBuf::from(&prefix_str);

    let (dir, base) = if prefix_str.ends_with(std::path::MAIN_SEPARATOR) || prefix_str.is_empty() {
        (path.clone(), String::new())
    } else {
        (
            path.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    };
    let scan_dir = if dir.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        dir
    };

    let Ok(entries) = fs::read_dir(&scan_dir) else {
        return Completion {
            new_chars: Vec::new(),
            unambiguous: false,
            candidates: Vec::new(),
        };
    };

    let mut matches: Vec<(Vec<u8>, bool)> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&base) {
            continue;
        }
        // hidden files only complete when asked for explicitly
        if name.starts_with('.') && !base.starts_with('.') {
            continue;
        }
        let is_dir = entry.path().is_dir();
        if only_dirs && !is_dir {
            continue;
        }
        let mut display = name.into_bytes();
        if is_dir {
            display.push(std::path::MAIN_SEPARATOR as u8);
        }
        matches.push((display, is_dir));
    }
    matches.sort();

    match matches.len() {
        0 => Completion {
            new_chars: Vec::new(),
            unambiguous: false,
            candidates: Vec::new(),
        },
        1 => {
            let (name, is_dir) = &matches[0];
            Completion {
                new_chars: name[base.len()..].to_vec(),
                unambiguous: !is_dir,
                candidates: Vec::new(),
            }
        }
        _ => {
            let names: Vec<Vec<u8>> = matches.iter().map(|(n, _)| n.clone()).collect();
            let common = common_prefix_of(&names);
            Completion {
                new_chars: common[base.len().min(common.len())..].to_vec(),
                unambiguous: false,
                candidates: names,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_completion_extends_to_common_prefix() {
        let names = vec![b"alpha".to_vec(), b"alpine".to_vec(), b"beta".to_vec()];
        let c = complete_list(b"al", names);
        assert_eq!(c.new_chars, b"p");
        assert!(!c.unambiguous);
        assert_eq!(c.candidates.len(), 2);
    }

    #[test]
    fn list_completion_single_match_is_unambiguous() {
        let names = vec![b"loop".to_vec(), b"end".to_vec()];
        let c = complete_list(b"lo", names);
        assert_eq!(c.new_chars, b"op");
        assert!(c.unambiguous);
    }

    #[test]
    fn file_completion_descends_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::write(dir.path().join("subfile.txt"), b"x").unwrap();

        let prefix = format!("{}/sub", dir.path().display());
        let c = complete_file(prefix.as_bytes(), false);
        // both "subdir/" and "subfile.txt" match; nothing to extend but a list
        assert!(!c.unambiguous);
        assert_eq!(c.candidates.len(), 2);

        let prefix = format!("{}/subf", dir.path().display());
        let c = complete_file(prefix.as_bytes(), false);
        assert_eq!(c.new_chars, b"ile.txt");
        assert!(c.unambiguous);
    }
}
