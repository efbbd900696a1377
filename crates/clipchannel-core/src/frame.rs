// crates/clipchannel-core/src/frame.rs
//
// A decoded frame: immutable plane buffers behind Arc, so the cache and the
// shared-memory publish path can hand out copies without re-copying pixels.

use std::sync::Arc;

use crate::video_info::VideoInfo;

/// Byte layout of a frame's planes, derived from `VideoInfo`. Used both by
/// in-process `Frame`s and by the shared-memory publish path (spec.md §6:
/// `frame_pitch`, `frame_pitch_uv`, `frame_offset_u`, `frame_offset_v`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub pitch_y: usize,
    pub pitch_uv: usize,
    pub offset_u: usize,
    pub offset_v: usize,
    /// Total size of the packed frame buffer (Y plane plus, if present, U/V).
    pub total_len: usize,
}

impl PlaneLayout {
    pub fn for_video_info(vi: &VideoInfo) -> Self {
        let bytes_per_sample = (vi.bits_per_sample as usize).div_ceil(8);
        let pitch_y = vi.width as usize * bytes_per_sample;
        let y_len = pitch_y * vi.height as usize;

        if !vi.has_chroma_planes() {
            return Self { pitch_y, pitch_uv: 0, offset_u: 0, offset_v: 0, total_len: y_len };
        }

        let pitch_uv = vi.chroma_width() as usize * bytes_per_sample;
        let plane_uv_len = pitch_uv * vi.chroma_height() as usize;
        let offset_u = y_len;
        let offset_v = offset_u + plane_uv_len;
        Self { pitch_y, pitch_uv, offset_u, offset_v, total_len: offset_v + plane_uv_len }
    }
}

/// A decoded frame, addressed by frame number. Plane data is `Arc`-backed so
/// cloning a `Frame` (e.g. to hand it to a consumer while leaving it in the
/// cache) never copies pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_number: i32,
    /// One entry for Gray, three (Y, U, V) for planar YUV/RGB.
    pub planes: Vec<Arc<[u8]>>,
    pub layout: PlaneLayout,
}

impl Frame {
    pub fn new(frame_number: i32, planes: Vec<Arc<[u8]>>, layout: PlaneLayout) -> Self {
        Self { frame_number, planes, layout }
    }

    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        self.planes.get(index).map(|p| p.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video_info::{ColorFamily, SampleType};

    fn vi_420() -> VideoInfo {
        VideoInfo {
            width: 4,
            height: 2,
            color_family: ColorFamily::Yuv,
            sample_type: SampleType::Integer,
            bits_per_sample: 8,
            sub_sampling_w: 1,
            sub_sampling_h: 1,
            num_frames: 1,
            fps_num: 1,
            fps_den: 1,
            audio_samples_per_second: 0,
        }
    }

    #[test]
    fn layout_matches_hand_computed_offsets() {
        let layout = PlaneLayout::for_video_info(&vi_420());
        // Y: 4x2 = 8 bytes. Chroma: 2x1 = 2 bytes each.
        assert_eq!(layout.pitch_y, 4);
        assert_eq!(layout.offset_u, 8);
        assert_eq!(layout.offset_v, 10);
        assert_eq!(layout.total_len, 12);
    }

    #[test]
    fn gray_layout_has_no_chroma_offsets() {
        let mut vi = vi_420();
        vi.color_family = ColorFamily::Gray;
        let layout = PlaneLayout::for_video_info(&vi);
        assert_eq!(layout.total_len, 8);
        assert_eq!(layout.pitch_uv, 0);
    }

    #[test]
    fn frame_clone_shares_plane_buffers() {
        let layout = PlaneLayout::for_video_info(&vi_420());
        let y: Arc<[u8]> = Arc::from(vec![0u8; 8]);
        let frame = Frame::new(3, vec![y.clone()], layout);
        let cloned = frame.clone();
        assert!(Arc::ptr_eq(&y, &cloned.planes[0]));
    }
}
