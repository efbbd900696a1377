// crates/clipchannel-fetcher/src/lib.rs
//
// Single-producer prefetching cache sitting in front of one or more
// upstream clip sources, each driven exclusively from one worker thread
// (spec.md §2, component B; §4.B).

mod cache;
mod clip_state;
mod fetch_request;
mod fetcher;
mod local_source;
mod worker;

pub use fetcher::FrameFetcher;
pub use local_source::LocalFrameSource;

pub use clipchannel_core::{
    ChannelError, ColorFamily, FetchError, FetcherConfig, Frame, FrameSource, PlaneLayout,
    SampleType, UpstreamClip, VideoInfo,
};
