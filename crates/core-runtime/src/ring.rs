//! The buffer ring: the ordered list of open file buffers.
//!
//! Buffer ids are 1-based positions in the ring. Each buffer owns a view
//! (and through it a document); filenames are canonicalised before
//! comparison so the same file is never opened twice. Closing a buffer
//! transfers its ownership to an undo token, which re-inserts it at its old
//! position on rub-out and releases it on commit.

use std::path::{Path, PathBuf};

use core_view::View;
use tracing::{debug, info};

use crate::error::{Result, TecoError};
use crate::{fileio, undo, Current, Runtime};

pub struct Buffer {
    pub filename: Option<PathBuf>,
    pub dirty: bool,
    pub view: View,
    pub eol_mode: core_view::EolMode,
}

#[derive(Default)]
pub struct Ring {
    pub buffers: Vec<Buffer>,
    pub current: usize,
}

impl Ring {
    pub fn current(&self) -> &Buffer {
        &self.buffers[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Buffer {
        &mut self.buffers[self.current]
    }

    /// 1-based id of the current buffer.
    pub fn current_id(&self) -> i64 {
        self.current as i64 + 1
    }

    pub fn find_by_name(&self, filename: &Path) -> Option<usize> {
        let resolved = fileio::absolute_path(filename);
        self.buffers
            .iter()
            .position(|b| b.filename.as_deref() == Some(resolved.as_path()))
    }

    /// 1-based id of the first dirty buffer, or 0.
    pub fn first_dirty(&self) -> i64 {
        self.buffers
            .iter()
            .position(|b| b.dirty)
            .map(|i| i as i64 + 1)
            .unwrap_or(0)
    }
}

fn info_update(rt: &mut Runtime) {
    if let Current::Buffer(i) = rt.current {
        let buffer = &rt.ring.buffers[i];
        let name = buffer
            .filename
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        let dirty = buffer.dirty;
        rt.interface.info_update_buffer(name.as_deref(), dirty);
    }
}

fn show_buffer(rt: &mut Runtime, idx: usize) {
    rt.save_current_doc_state();
    rt.ring.current = idx;
    rt.current = Current::Buffer(idx);
    info_update(rt);
}

/// Edit the buffer holding `filename`, opening it if necessary. `None`
/// selects/creates the unnamed buffer.
pub fn edit_name(rt: &mut Runtime, filename: Option<&Path>) -> Result<()> {
    rt.current_doc_undo_edit();

    if let Some(idx) = match filename {
        Some(f) => rt.ring.find_by_name(f),
        None => rt.ring.buffers.iter().position(|b| b.filename.is_none()),
    } {
        show_buffer(rt, idx);
        return Ok(());
    }

    // open a fresh buffer at the ring's tail
    let doc = rt.docs.create(rt.default_codepage);
    let mut buffer = Buffer {
        filename: None,
        dirty: false,
        view: View::new(doc),
        eol_mode: core_view::EolMode::default(),
    };

    if let Some(f) = filename {
        if f.is_file() {
            let (content, codepage, eol) = fileio::load_file(rt, f)?;
            rt.docs.set_codepage(doc, codepage);
            rt.docs
                .append_bytes(doc, &content)
                .map_err(|e| TecoError::failed(e.to_string()))?;
            buffer.eol_mode = eol;
            info!(target: "ring", file = %f.display(), "added_file");
            rt.interface.msg(
                crate::interface::MsgLevel::Info,
                &format!("Added file \"{}\" to ring", f.display()),
            );
        } else {
            rt.interface.msg(
                crate::interface::MsgLevel::Info,
                &format!("Added new file \"{}\" to ring", f.display()),
            );
        }
        buffer.filename = Some(fileio::absolute_path(f));
    } else {
        rt.interface
            .msg(crate::interface::MsgLevel::Info, "Added new unnamed file to ring.");
    }

    rt.ring.buffers.push(buffer);
    let idx = rt.ring.buffers.len() - 1;

    // rubbing out the open removes the buffer again
    rt.undo.push(move |rt, _| {
        let buffer = rt.ring.buffers.remove(idx);
        if rt.ring.current >= rt.ring.buffers.len() {
            rt.ring.current = rt.ring.buffers.len().saturating_sub(1);
        }
        rt.docs.release(buffer.view.doc);
    });

    show_buffer(rt, idx);
    Ok(())
}

/// Edit buffer `id` (1-based).
pub fn edit_id(rt: &mut Runtime, id: i64) -> Result<()> {
    if id < 1 || id as usize > rt.ring.buffers.len() {
        return Err(TecoError::invalid_buf(id));
    }
    rt.current_doc_undo_edit();
    show_buffer(rt, id as usize - 1);
    Ok(())
}

/// Mark the current buffer modified (called by every text-changing
/// command while a buffer is edited).
pub fn dirtify(rt: &mut Runtime) {
    if !matches!(rt.current, Current::Buffer(_)) || rt.ring.current().dirty {
        return;
    }
    let idx = rt.ring.current;
    rt.undo.push(move |rt, _| {
        if let Some(b) = rt.ring.buffers.get_mut(idx) {
            b.dirty = false;
        }
    });
    rt.ring.current_mut().dirty = true;
    info_update(rt);
}

/// Save the current buffer, optionally under a new name.
pub fn save(rt: &mut Runtime, filename: Option<&Path>) -> Result<()> {
    let idx = rt.ring.current;
    let target = match filename.or(rt.ring.buffers[idx].filename.as_deref()) {
        Some(f) => f.to_path_buf(),
        None => {
            return Err(TecoError::failed(
                "Cannot save the unnamed file without providing a file name",
            ))
        }
    };

    let doc = rt.ring.buffers[idx].view.doc;
    let eol = rt.ring.buffers[idx].eol_mode;
    let bytes = rt.docs.get_bytes(doc);
    fileio::save_file_with_eol(rt, &target, &bytes, eol)?;

    let old_dirty = rt.ring.buffers[idx].dirty;
    let old_name = rt.ring.buffers[idx].filename.clone();
    rt.undo.push(move |rt, _| {
        if let Some(b) = rt.ring.buffers.get_mut(idx) {
            b.dirty = old_dirty;
            b.filename = old_name.clone();
        }
    });
    rt.ring.buffers[idx].dirty = false;
    rt.ring.buffers[idx].filename = Some(fileio::absolute_path(&target));
    info_update(rt);
    debug!(target: "ring", file = %target.display(), "saved");
    Ok(())
}

pub fn save_all_dirty(rt: &mut Runtime) -> Result<()> {
    let saved_current = rt.ring.current;
    for idx in 0..rt.ring.buffers.len() {
        if rt.ring.buffers[idx].dirty {
            // save() works on the current buffer
            rt.ring.current = idx;
            let r = save(rt, None);
            rt.ring.current = saved_current;
            r?;
        }
    }
    Ok(())
}

/// Close the current buffer; ownership moves to the undo token.
pub fn close_current(rt: &mut Runtime) -> Result<()> {
    let idx = rt.ring.current;
    rt.current_doc_undo_edit();
    let buffer = rt.ring.buffers.remove(idx);

    if let Some(f) = &buffer.filename {
        rt.interface.msg(
            crate::interface::MsgLevel::Info,
            &format!("Removed file \"{}\" from the ring", f.display()),
        );
    } else {
        rt.interface
            .msg(crate::interface::MsgLevel::Info, "Removed unnamed file from the ring.");
    }

    undo::push_owning(
        rt,
        buffer,
        move |buffer, rt, _| {
            rt.ring.buffers.insert(idx.min(rt.ring.buffers.len()), buffer);
        },
        |buffer, rt| rt.docs.release(buffer.view.doc),
    );

    if rt.ring.buffers.is_empty() {
        edit_name(rt, None)?;
    } else {
        let fallback = idx.min(rt.ring.buffers.len() - 1);
        show_buffer(rt, fallback);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::runtime_fixture;

    #[test]
    fn runtime_starts_with_an_unnamed_buffer() {
        let (rt, _) = runtime_fixture();
        assert_eq!(rt.ring.buffers.len(), 1);
        assert!(rt.ring.current().filename.is_none());
        assert_eq!(rt.ring.current_id(), 1);
    }

    #[test]
    fn editing_by_invalid_id_fails() {
        let (mut rt, _) = runtime_fixture();
        assert!(edit_id(&mut rt, 2).is_err());
        assert!(edit_id(&mut rt, 0).is_err());
        assert!(edit_id(&mut rt, 1).is_ok());
    }

    #[test]
    fn saving_unnamed_buffer_without_name_fails() {
        let (mut rt, _) = runtime_fixture();
        let err = save(&mut rt, None).unwrap_err();
        assert!(err.message.contains("unnamed"));
    }

    #[test]
    fn dirtify_sets_flag_once() {
        let (mut rt, _) = runtime_fixture();
        assert!(!rt.ring.current().dirty);
        dirtify(&mut rt);
        assert!(rt.ring.current().dirty);
        assert_eq!(rt.ring.first_dirty(), 1);
    }

    #[test]
    fn close_falls_back_to_unnamed_buffer() {
        let (mut rt, _) = runtime_fixture();
        close_current(&mut rt).unwrap();
        assert_eq!(rt.ring.buffers.len(), 1);
        assert!(rt.ring.current().filename.is_none());
    }
}
