// crates/clipchannel-fetcher/src/local_source.rs
//
// A thin in-process adapter over `FrameFetcher` (spec.md §3: "used in the
// server's own filter graph"). `ServerChannel` drives the fetcher directly
// over the shared-memory wire protocol, but host code that wants to treat
// one of the fetcher's clips as a plain `FrameSource` filter — without going
// through the channel at all — can wrap it in this instead.

use std::sync::Arc;

use clipchannel_core::{FetchError, Frame, FrameSource, VideoInfo};

use crate::FrameFetcher;

/// Exposes clip `clip_index` of a shared `FrameFetcher` as a `FrameSource`.
/// Every call is just a direct forward onto the fetcher; `vi` is cached at
/// construction the same way `ClientProxy` caches it (spec.md §4.B,
/// "GetVideoInfo: cached after first call").
pub struct LocalFrameSource {
    fetcher: Arc<FrameFetcher>,
    clip_index: usize,
    vi: VideoInfo,
}

impl LocalFrameSource {
    pub fn new(fetcher: Arc<FrameFetcher>, clip_index: usize) -> Result<Self, FetchError> {
        let vi = fetcher.get_video_info(clip_index)?;
        Ok(Self { fetcher, clip_index, vi })
    }
}

impl FrameSource for LocalFrameSource {
    type Error = FetchError;

    fn get_frame(&self, n: i32) -> Result<Frame, FetchError> {
        self.fetcher.get_frame(self.clip_index, n)
    }

    fn get_parity(&self, n: i32) -> Result<bool, FetchError> {
        self.fetcher.get_parity(self.clip_index, n)
    }

    fn get_audio(&self, buf: &mut [u8], start: i64, count: i64) -> Result<(), FetchError> {
        self.fetcher.get_audio(self.clip_index, buf, start, count)
    }

    fn get_video_info(&self) -> VideoInfo {
        self.vi.clone()
    }

    /// Caching is the fetcher's own concern; inert here like the client
    /// proxy's (spec.md §4.D).
    fn set_cache_hints(&self, _hints: i32, _frame_range: i32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipchannel_core::frame::PlaneLayout;
    use clipchannel_core::{ColorFamily, SampleType, UpstreamClip};
    use clipchannel_core::{FetcherConfig, VideoInfo as Vi};

    struct ScriptedClip {
        frame_count: i32,
    }

    impl UpstreamClip for ScriptedClip {
        fn get_frame(&mut self, n: i32) -> Result<Frame, FetchError> {
            if n < 0 || n >= self.frame_count {
                return Err(FetchError::Upstream(format!("frame {n} out of range")));
            }
            let layout = PlaneLayout { pitch_y: 1, pitch_uv: 0, offset_u: 0, offset_v: 0, total_len: 1 };
            Ok(Frame::new(n, vec![Arc::from(vec![n as u8])], layout))
        }

        fn get_parity(&mut self, n: i32) -> bool {
            n % 2 == 0
        }

        fn get_audio(&mut self, buf: &mut [u8], _start: i64, _count: i64) -> Result<(), FetchError> {
            buf.fill(0x42);
            Ok(())
        }

        fn get_video_info(&mut self) -> Vi {
            Vi {
                width: 4,
                height: 4,
                color_family: ColorFamily::Gray,
                sample_type: SampleType::Integer,
                bits_per_sample: 8,
                sub_sampling_w: 0,
                sub_sampling_h: 0,
                num_frames: self.frame_count,
                fps_num: 24,
                fps_den: 1,
                audio_samples_per_second: 48_000,
            }
        }
    }

    #[test]
    fn forwards_get_frame_and_get_parity_to_the_named_clip() {
        let fetcher =
            Arc::new(FrameFetcher::new(vec![Box::new(ScriptedClip { frame_count: 10 })], FetcherConfig::new(4, 1)).unwrap());
        let source = LocalFrameSource::new(Arc::clone(&fetcher), 0).unwrap();

        let frame = source.get_frame(3).unwrap();
        assert_eq!(frame.frame_number, 3);
        assert!(source.get_parity(4).unwrap());
        assert!(!source.get_parity(5).unwrap());
    }

    #[test]
    fn caches_video_info_at_construction() {
        let fetcher =
            Arc::new(FrameFetcher::new(vec![Box::new(ScriptedClip { frame_count: 10 })], FetcherConfig::new(4, 1)).unwrap());
        let source = LocalFrameSource::new(Arc::clone(&fetcher), 0).unwrap();
        assert_eq!(source.get_video_info().width, 4);
    }

    #[test]
    fn forwards_audio_into_the_caller_buffer() {
        let fetcher =
            Arc::new(FrameFetcher::new(vec![Box::new(ScriptedClip { frame_count: 10 })], FetcherConfig::new(4, 1)).unwrap());
        let source = LocalFrameSource::new(Arc::clone(&fetcher), 0).unwrap();
        let mut buf = [0u8; 4];
        source.get_audio(&mut buf, 0, 4).unwrap();
        assert_eq!(buf, [0x42; 4]);
    }
}
