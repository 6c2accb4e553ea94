//! The rub-out stack.
//!
//! Every process-visible side effect of command execution pushes a token
//! that restores the previous state. Tokens are tagged with the command-line
//! byte position current at push time; rubbing the command line back to
//! position `p` runs all tokens with position >= `p` in LIFO order, which is
//! exactly reverse execution order within and across input characters.
//!
//! Tokens run against the runtime plus the interactive (top-level) machine:
//! only the top-level machine's state is ever restored token-wise, since a
//! macro invocation is rubbed out as a whole through the tokens its commands
//! pushed. Tokens must be pushed *before* the mutation they reverse, so a
//! failing mutation still leaves a consistent stack.
//!
//! Some tokens own resources beyond their snapshot: a replaced register
//! document, a closed buffer, a save-point file. Those are pushed through
//! [`push_owning`], which also supplies a disposal action for when the token
//! is discarded without running — i.e. at command-line commit — releasing
//! the document or unlinking the save-point.

use tracing::trace;

use crate::machine::MachineMain;
use crate::Runtime;

trait Token {
    fn run(self: Box<Self>, rt: &mut Runtime, machine: &mut MachineMain);
    fn dispose(self: Box<Self>, rt: &mut Runtime);
}

/// Plain snapshot token: nothing to clean up when discarded.
struct FnToken<F>(F);

impl<F: FnOnce(&mut Runtime, &mut MachineMain)> Token for FnToken<F> {
    fn run(self: Box<Self>, rt: &mut Runtime, machine: &mut MachineMain) {
        (self.0)(rt, machine);
    }
    fn dispose(self: Box<Self>, _rt: &mut Runtime) {}
}

/// Token owning a resource `T` that must be consumed either way.
struct OwningToken<T, R, D> {
    resource: T,
    run: R,
    dispose: D,
}

impl<T, R, D> Token for OwningToken<T, R, D>
where
    R: FnOnce(T, &mut Runtime, &mut MachineMain),
    D: FnOnce(T, &mut Runtime),
{
    fn run(self: Box<Self>, rt: &mut Runtime, machine: &mut MachineMain) {
        (self.run)(self.resource, rt, machine);
    }
    fn dispose(self: Box<Self>, rt: &mut Runtime) {
        (self.dispose)(self.resource, rt);
    }
}

struct UndoEntry {
    pos: usize,
    token: Box<dyn Token>,
}

#[derive(Default)]
pub struct UndoStack {
    entries: Vec<UndoEntry>,
    /// False in batch mode: tokens are dropped on push (after disposal).
    pub enabled: bool,
    /// Byte position tagged onto pushed tokens; maintained by the
    /// command-line manager while stepping.
    pub pos: usize,
    /// Guard against tokens scheduling work while a rollback runs.
    running: bool,
}

impl UndoStack {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn push(&mut self, token: impl FnOnce(&mut Runtime, &mut MachineMain) + 'static) {
        if self.enabled && !self.running {
            self.entries.push(UndoEntry {
                pos: self.pos,
                token: Box::new(FnToken(token)),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Push a token owning `resource`. When the stack is disabled, the resource
/// is disposed of immediately.
pub fn push_owning<T: 'static>(
    rt: &mut Runtime,
    resource: T,
    run: impl FnOnce(T, &mut Runtime, &mut MachineMain) + 'static,
    dispose: impl FnOnce(T, &mut Runtime) + 'static,
) {
    if rt.undo.enabled && !rt.undo.running {
        let pos = rt.undo.pos;
        rt.undo.entries.push(UndoEntry {
            pos,
            token: Box::new(OwningToken {
                resource,
                run,
                dispose,
            }),
        });
    } else {
        dispose(resource, rt);
    }
}

/// Roll back every side effect at or after command-line position `pos`.
pub fn pop(rt: &mut Runtime, machine: &mut MachineMain, pos: usize) {
    let mut count = 0usize;
    while rt.undo.entries.last().is_some_and(|e| e.pos >= pos) {
        let entry = rt.undo.entries.pop().expect("checked non-empty");
        rt.undo.running = true;
        entry.token.run(rt, machine);
        rt.undo.running = false;
        count += 1;
    }
    trace!(target: "undo", pos, count, remaining = rt.undo.entries.len(), "pop");
}

/// Discard all tokens without running them (command-line commit), running
/// their disposal actions oldest-first.
pub fn clear(rt: &mut Runtime) {
    let entries = std::mem::take(&mut rt.undo.entries);
    trace!(target: "undo", discarded = entries.len(), "clear");
    for entry in entries {
        entry.token.dispose(rt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::runtime_fixture;

    #[test]
    fn pop_runs_in_lifo_order_down_to_position() {
        let (mut rt, mut machine) = runtime_fixture();
        rt.undo.enabled = true;

        rt.undo.pos = 0;
        rt.undo.push(|rt, _| rt.scratch_trace.push(0));
        rt.undo.pos = 1;
        rt.undo.push(|rt, _| rt.scratch_trace.push(1));
        rt.undo.push(|rt, _| rt.scratch_trace.push(2));
        rt.undo.pos = 2;
        rt.undo.push(|rt, _| rt.scratch_trace.push(3));

        pop(&mut rt, &mut machine, 1);
        assert_eq!(rt.scratch_trace, vec![3, 2, 1]);
        assert_eq!(rt.undo.len(), 1);

        pop(&mut rt, &mut machine, 0);
        assert_eq!(rt.scratch_trace, vec![3, 2, 1, 0]);
        assert!(rt.undo.is_empty());
    }

    #[test]
    fn disabled_stack_drops_tokens_and_disposes() {
        let (mut rt, _) = runtime_fixture();
        rt.undo.enabled = false;
        rt.undo.push(|_, _| panic!("must never run"));
        push_owning(
            &mut rt,
            7,
            |_, _, _| panic!("must never run"),
            |v, rt| rt.scratch_trace.push(v),
        );
        assert!(rt.undo.is_empty());
        assert_eq!(rt.scratch_trace, vec![7]);
    }

    #[test]
    fn clear_disposes_without_running() {
        let (mut rt, _) = runtime_fixture();
        rt.undo.enabled = true;
        push_owning(
            &mut rt,
            1,
            |_, _, _| panic!("must never run"),
            |v, rt| rt.scratch_trace.push(v),
        );
        clear(&mut rt);
        assert_eq!(rt.scratch_trace, vec![1]);
        assert!(rt.undo.is_empty());
    }

    #[test]
    fn tokens_cannot_push_during_rollback() {
        let (mut rt, mut machine) = runtime_fixture();
        rt.undo.enabled = true;
        rt.undo.push(|rt, _| {
            rt.undo.push(|_, _| panic!("rescheduled token ran"));
        });
        pop(&mut rt, &mut machine, 0);
        assert!(rt.undo.is_empty());
    }
}
