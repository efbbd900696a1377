// crates/clipchannel-ipc/src/primitives/spinlock.rs
//
// A lock cheap enough to live inside shared memory and to be acquired from
// more than one process, where an OS mutex's internal state cannot cross the
// process boundary (spec.md §4.A, "Spinlock").

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

#[repr(C)]
pub struct Spinlock {
    state: AtomicU32,
}

impl Spinlock {
    pub const fn new() -> Self {
        Self { state: AtomicU32::new(UNLOCKED) }
    }

    /// Spins up to `spin_budget` attempts; `false` if the lock was still
    /// held afterward.
    pub fn try_lock(&self, spin_budget: u32) -> bool {
        for _ in 0..spin_budget.max(1) {
            if self
                .state
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
            std::hint::spin_loop();
        }
        false
    }

    /// Short spin budget before falling back to yielding the CPU between
    /// attempts — the hot path used for "is anyone touching this slot right
    /// now" checks (spec.md §4.A: `lock_short`).
    pub fn lock_short(&self) {
        if self.try_lock(1_000) {
            return;
        }
        loop {
            let _ = nix::sched::sched_yield();
            if self.try_lock(1) {
                return;
            }
        }
    }

    /// Spins less eagerly than `lock_short` before yielding — used where the
    /// holder's critical section is expected to take longer, e.g. the
    /// server mid-copy of a frame buffer (spec.md §4.A: `lock_long`).
    pub fn lock_long(&self) {
        if self.try_lock(100) {
            return;
        }
        loop {
            std::thread::sleep(Duration::from_micros(50));
            if self.try_lock(1) {
                return;
            }
        }
    }

    /// # Safety
    /// Caller must currently hold the lock.
    pub unsafe fn unlock(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard mirroring the original's `SpinLockContext<>` — unlocks on
/// drop, including when the critical section returns early.
pub struct SpinLockGuard<'a> {
    lock: &'a Spinlock,
}

impl<'a> SpinLockGuard<'a> {
    pub fn new(lock: &'a Spinlock) -> Self {
        Self { lock }
    }
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        unsafe { self.lock.unlock() };
    }
}
