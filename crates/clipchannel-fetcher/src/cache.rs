// crates/clipchannel-fetcher/src/cache.rs
//
// FrameCache: an ordered window of consecutive decoded frames for one clip
// (spec.md §3). Frames are contiguous in frame-number space; entries are
// never missing; `cache_frame_start >= 0`.

use std::collections::VecDeque;

use clipchannel_core::Frame;

#[derive(Debug, Default)]
pub struct FrameCache {
    frames: VecDeque<Frame>,
    cache_frame_start: i32,
}

impl FrameCache {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// First cached frame number (undefined when empty, but always `>= 0`
    /// in practice since it only ever moves forward from a `reset_to` call).
    pub fn start(&self) -> i32 {
        self.cache_frame_start
    }

    /// One past the last cached frame number.
    pub fn end(&self) -> i32 {
        self.cache_frame_start + self.frames.len() as i32
    }

    pub fn contains(&self, n: i32) -> bool {
        n >= self.cache_frame_start && n < self.end()
    }

    pub fn get(&self, n: i32) -> Option<&Frame> {
        if !self.contains(n) {
            return None;
        }
        self.frames.get((n - self.cache_frame_start) as usize)
    }

    /// Append the next frame in sequence. The caller guarantees `frame`
    /// immediately follows the current window (spec.md §3: "frames are
    /// contiguous in frame-number space").
    pub fn push_back(&mut self, frame: Frame) {
        debug_assert_eq!(frame.frame_number, self.end(), "frames must be appended in order");
        self.frames.push_back(frame);
    }

    /// Evict from the head while the consumer has moved far enough ahead
    /// that the evicted frames exceed `cache_behind` (spec.md §4.B).
    pub fn evict_while_ahead(&mut self, n: i32, cache_behind: u32) {
        while !self.frames.is_empty() && n - self.cache_frame_start > cache_behind as i32 {
            self.frames.pop_front();
            self.cache_frame_start += 1;
        }
    }

    /// Drop all cached frames without moving `cache_frame_start` (used on a
    /// sticky upstream error or mid-way through a backward-seek clear).
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Drop all cached frames and re-anchor the window at `n` (a consumer
    /// jumped backward, or the cache was empty and needs a starting point).
    pub fn reset_to(&mut self, n: i32) {
        self.frames.clear();
        self.cache_frame_start = n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipchannel_core::frame::PlaneLayout;
    use std::sync::Arc;

    fn frame(n: i32) -> Frame {
        let layout = PlaneLayout { pitch_y: 1, pitch_uv: 0, offset_u: 0, offset_v: 0, total_len: 1 };
        Frame::new(n, vec![Arc::from(vec![n as u8])], layout)
    }

    #[test]
    fn push_and_get_round_trip() {
        let mut cache = FrameCache::default();
        cache.reset_to(10);
        cache.push_back(frame(10));
        cache.push_back(frame(11));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.start(), 10);
        assert_eq!(cache.end(), 12);
        assert_eq!(cache.get(10).unwrap().frame_number, 10);
        assert_eq!(cache.get(11).unwrap().frame_number, 11);
        assert!(cache.get(12).is_none());
        assert!(cache.get(9).is_none());
    }

    #[test]
    fn evict_keeps_only_cache_behind_frames_before_n() {
        let mut cache = FrameCache::default();
        cache.reset_to(0);
        for n in 0..8 {
            cache.push_back(frame(n));
        }
        // Consumer is now at frame 7 with cache_behind = 2: frames 0..=4
        // are too far behind and should be evicted, leaving 5,6,7.
        cache.evict_while_ahead(7, 2);
        assert_eq!(cache.start(), 5);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.end(), 8);
    }

    #[test]
    fn evict_is_a_no_op_within_cache_behind() {
        let mut cache = FrameCache::default();
        cache.reset_to(0);
        cache.push_back(frame(0));
        cache.push_back(frame(1));
        cache.evict_while_ahead(1, 2);
        assert_eq!(cache.start(), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reset_to_clears_and_reanchors() {
        let mut cache = FrameCache::default();
        cache.reset_to(0);
        cache.push_back(frame(0));
        cache.push_back(frame(1));
        cache.reset_to(5);
        assert!(cache.is_empty());
        assert_eq!(cache.start(), 5);
        assert_eq!(cache.end(), 5);
    }

    #[test]
    fn clear_keeps_start_in_place() {
        let mut cache = FrameCache::default();
        cache.reset_to(3);
        cache.push_back(frame(3));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.start(), 3);
    }
}
