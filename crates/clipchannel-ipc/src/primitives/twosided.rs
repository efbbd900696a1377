// crates/clipchannel-ipc/src/primitives/twosided.rs
//
// A cross-process condition variable reconstructed from a generation
// counter and a spin/yield/sleep backoff rather than a kernel primitive
// (spec.md §3, "CondVar (two-sided)"; §9, "Two-sided signal"). Exactly one
// side is active at a time: `switch_to_other_side` hands control to the
// partner and this side becomes the waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[repr(C)]
pub struct TwoSidedSignal {
    generation: AtomicU64,
}

impl TwoSidedSignal {
    pub const fn new() -> Self {
        Self { generation: AtomicU64::new(0) }
    }

    /// Blocks until the partner calls `switch_to_other_side` or
    /// `signal_all`. `stop_waiting` is polled on every spin so a caller can
    /// observe shutdown without a second flag; returns `false` if it fired
    /// (or `timeout` elapsed) before a switch was observed.
    pub fn wait_on_this_side(
        &self,
        timeout: Option<Duration>,
        mut stop_waiting: impl FnMut() -> bool,
    ) -> bool {
        let start = self.generation.load(Ordering::Acquire);
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut spins: u32 = 0;
        loop {
            if self.generation.load(Ordering::Acquire) != start {
                return true;
            }
            if stop_waiting() {
                return false;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return false;
                }
            }
            backoff(&mut spins);
        }
    }

    /// Wakes the partner and hands it control; this side becomes the waiter.
    pub fn switch_to_other_side(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Releases every waiter regardless of side — used only during shutdown
    /// (spec.md §4.A).
    pub fn signal_all(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

impl Default for TwoSidedSignal {
    fn default() -> Self {
        Self::new()
    }
}

fn backoff(spins: &mut u32) {
    *spins += 1;
    if *spins < 200 {
        std::hint::spin_loop();
    } else if *spins < 2_000 {
        let _ = nix::sched::sched_yield();
    } else {
        std::thread::sleep(Duration::from_micros(200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn switch_wakes_a_waiter_on_another_thread() {
        let signal = Arc::new(TwoSidedSignal::new());
        let waiter = Arc::clone(&signal);
        let handle = std::thread::spawn(move || waiter.wait_on_this_side(Some(Duration::from_secs(5)), || false));
        std::thread::sleep(Duration::from_millis(20));
        signal.switch_to_other_side();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn stop_waiting_short_circuits_without_a_switch() {
        let signal = TwoSidedSignal::new();
        let woke = signal.wait_on_this_side(Some(Duration::from_secs(5)), || true);
        assert!(!woke);
    }

    #[test]
    fn timeout_elapses_without_a_switch() {
        let signal = TwoSidedSignal::new();
        let woke = signal.wait_on_this_side(Some(Duration::from_millis(10)), || false);
        assert!(!woke);
    }
}
