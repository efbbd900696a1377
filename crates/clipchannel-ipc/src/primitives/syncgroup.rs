// crates/clipchannel-ipc/src/primitives/syncgroup.rs
//
// Per-clip collection of response condition variables keyed by response
// slot index (spec.md §3, "SyncGroup"). Storage lives inline in the mapped
// region; this is a thin borrowed view over that slice.

use super::condvar::CondVar;

pub struct SyncGroup<'a> {
    response_conds: &'a [CondVar],
}

impl<'a> SyncGroup<'a> {
    pub fn new(response_conds: &'a [CondVar]) -> Self {
        Self { response_conds }
    }

    pub fn response_cond(&self, slot: usize) -> &'a CondVar {
        &self.response_conds[slot]
    }

    pub fn slot_count(&self) -> usize {
        self.response_conds.len()
    }
}

/// `frame_number mod slot_count` (spec.md §4.A, "Response-slot index").
/// Collisions simply cause overwrites and a new round-trip.
pub fn response_index(frame_number: i32, slot_count: usize) -> usize {
    frame_number.rem_euclid(slot_count as i32) as usize
}
