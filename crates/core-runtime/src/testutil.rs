//! Shared fixtures for the unit tests.

use crate::interface::BatchInterface;
use crate::machine::MachineMain;
use crate::Runtime;

/// A runtime with a batch interface plus a top-level machine, the way the
/// command-line manager owns them.
pub fn runtime_fixture() -> (Runtime, MachineMain) {
    let rt = Runtime::new(Box::new(BatchInterface::new()), false);
    let machine = MachineMain::new(0, true, 0);
    (rt, machine)
}
