// crates/clipchannel-fetcher/src/clip_state.rs
//
// Per-clip bookkeeping the fetcher's lock protects: cache, last request,
// sticky error state, and cached video info (spec.md §4.B "State machine
// (per clip)"). The upstream `Box<dyn UpstreamClip>` itself lives outside
// this struct, owned solely by the worker thread — see worker.rs.

use clipchannel_core::VideoInfo;

use crate::cache::FrameCache;

/// `Healthy -> Healthy` on successful fetch, `Healthy -> Errored` on upstream
/// failure, and `Errored` is terminal for that clip.
#[derive(Debug, Clone, Default)]
pub enum ClipState {
    #[default]
    Healthy,
    Errored(String),
}

impl ClipState {
    pub fn is_errored(&self) -> bool {
        matches!(self, ClipState::Errored(_))
    }
}

#[derive(Debug, Default)]
pub struct ClipEntry {
    pub cache: FrameCache,
    /// `None` until a consumer calls `get_frame` at least once. Treated as
    /// equal to `cache.start()` for the idle-scan arithmetic (spec.md §9,
    /// first open question).
    pub last_requested_frame: Option<i32>,
    pub state: ClipState,
    pub video_info: Option<VideoInfo>,
}

impl ClipEntry {
    /// `last_requested_frame`, defaulting to `cache.start()` when unset.
    pub fn effective_last_requested(&self) -> i32 {
        self.last_requested_frame.unwrap_or_else(|| self.cache.start())
    }
}
