// crates/clipchannel-ipc/src/primitives/condvar.rs
//
// A spinlock guarding a slot plus a two-sided signal (spec.md §3, "CondVar
// (two-sided)"). One instance backs the shared request slot; one backs each
// response slot in a clip's sync group.

use std::time::Duration;

use super::spinlock::{SpinLockGuard, Spinlock};
use super::twosided::TwoSidedSignal;

#[repr(C)]
pub struct CondVar {
    pub lock: Spinlock,
    pub signal: TwoSidedSignal,
}

impl CondVar {
    pub const fn new() -> Self {
        Self { lock: Spinlock::new(), signal: TwoSidedSignal::new() }
    }

    pub fn try_lock(&self, spin_budget: u32) -> Option<SpinLockGuard<'_>> {
        if self.lock.try_lock(spin_budget) {
            Some(SpinLockGuard::new(&self.lock))
        } else {
            None
        }
    }

    pub fn lock_short(&self) -> SpinLockGuard<'_> {
        self.lock.lock_short();
        SpinLockGuard::new(&self.lock)
    }

    pub fn lock_long(&self) -> SpinLockGuard<'_> {
        self.lock.lock_long();
        SpinLockGuard::new(&self.lock)
    }

    pub fn wait_on_this_side(&self, timeout: Option<Duration>, stop_waiting: impl FnMut() -> bool) -> bool {
        self.signal.wait_on_this_side(timeout, stop_waiting)
    }

    pub fn switch_to_other_side(&self) {
        self.signal.switch_to_other_side();
    }

    pub fn signal_all(&self) {
        self.signal.signal_all();
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
