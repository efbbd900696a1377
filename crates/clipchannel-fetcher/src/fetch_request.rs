// crates/clipchannel-fetcher/src/fetch_request.rs
//
// The single in-flight on-demand request slot (spec.md §3, "FetchRequest").
// Only one may be in flight on the FrameFetcher at a time; `version` is
// bumped on every new arrival so the worker can detect it without missing
// one even if it was mid-scan.

#[derive(Debug, Default, Clone, Copy)]
pub struct FetchRequest {
    pub version: u64,
    pub clip_index: usize,
    pub frame_number: i32,
    pub is_fetching: bool,
}
