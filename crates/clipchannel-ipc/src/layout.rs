// crates/clipchannel-ipc/src/layout.rs
//
// Plain-old-data shapes that live directly inside the mapped shared region
// (spec.md §6, "Shared region layout"). Everything here is `#[repr(C)]` and
// built only from types whose byte layout is identical in every process
// that maps the region.

use std::sync::atomic::{AtomicI32, AtomicU32};

use clipchannel_core::{ColorFamily, SampleType, VideoInfo};

pub const REQ_EMPTY: u32 = 0;
pub const REQ_GETFRAME: u32 = 1;
pub const REQ_GETPARITY: u32 = 2;

pub const PARITY_RESPONSE_EMPTY: i32 = 0;
/// Not a legal `(n & 0x7fff_ffff) | parity_bit` encoding for any frame count
/// this channel is realistically asked to carry (spec.md §6, "Sentinel
/// values"; §9 notes this is a polling-friendly simplification of the
/// original's response protocol).
pub const PARITY_WAITING_FOR_RESPONSE: i32 = 0x4000_0000;

/// Marks a response slot the server has never written a real frame into.
/// Chosen instead of relying on zero-initialized memory, because `0` is
/// itself a legal frame number and a zero-filled slot would otherwise read
/// as a (bogus) cache hit for frame 0 before the server ever touches it.
pub const UNPOPULATED_SLOT: i32 = i32::MIN;

/// Marks a `FrameResponse.frame_number` whose fetch failed upstream, so a
/// client blocked on a permanently-errored clip fails fast instead of
/// spinning on `frame_number != n` forever (the wire protocol otherwise has
/// no error channel of its own). Distinct from `UNPOPULATED_SLOT` so the two
/// states aren't conflated; not used for `parity_response` (see
/// `ParitySlot::errored`), since every bit pattern in that word's
/// `(n & 0x7fff_ffff) | parity_bit` encoding is a legal result for some
/// in-range frame number and parity value.
pub const ERROR_SLOT: i32 = i32::MIN + 1;

#[repr(C)]
pub struct ObjectState {
    pub shutdown: AtomicU32,
}

impl ObjectState {
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(std::sync::atomic::Ordering::Acquire) != 0
    }

    pub fn set_shutdown(&self) {
        self.shutdown.store(1, std::sync::atomic::Ordering::Release);
    }
}

#[repr(C)]
pub struct Request {
    pub request_type: AtomicU32,
    pub clip_index: AtomicI32,
    pub frame_number: AtomicI32,
}

#[repr(C)]
pub struct FrameResponse {
    pub frame_number: AtomicI32,
    pub requested_client_count: AtomicI32,
}

/// A clip's per-slot parity word plus an out-of-band error flag (spec.md §6
/// names only the word itself; `errored` is this repo's addition so an
/// upstream failure doesn't have to be smuggled into the word's reserved
/// `(n & 0x7fff_ffff) | parity_bit` encoding, none of which is spare).
/// `result` alone still carries the spec-mandated
/// `EMPTY -> WAITING -> (n | parity_bit) -> EMPTY` transitions on success.
#[repr(C)]
pub struct ParitySlot {
    pub result: AtomicI32,
    pub errored: AtomicU32,
}

/// Byte-identical mirror of `VideoInfo`'s fields, safe to memcpy across the
/// process boundary (spec.md §6: "per-clip record: `{vi: VideoInfo, ...}`").
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawVideoInfo {
    pub width: u32,
    pub height: u32,
    pub color_family: u8,
    pub sample_type: u8,
    pub bits_per_sample: u8,
    pub sub_sampling_w: u8,
    pub sub_sampling_h: u8,
    _pad: [u8; 3],
    pub num_frames: i32,
    pub fps_num: i64,
    pub fps_den: i64,
    pub audio_samples_per_second: u32,
}

impl RawVideoInfo {
    pub fn from_video_info(vi: &VideoInfo) -> Self {
        Self {
            width: vi.width,
            height: vi.height,
            color_family: match vi.color_family {
                ColorFamily::Gray => 0,
                ColorFamily::Yuv => 1,
                ColorFamily::Rgb => 2,
            },
            sample_type: match vi.sample_type {
                SampleType::Integer => 0,
                SampleType::Float => 1,
            },
            bits_per_sample: vi.bits_per_sample,
            sub_sampling_w: vi.sub_sampling_w,
            sub_sampling_h: vi.sub_sampling_h,
            _pad: [0; 3],
            num_frames: vi.num_frames,
            fps_num: vi.fps_num,
            fps_den: vi.fps_den,
            audio_samples_per_second: vi.audio_samples_per_second,
        }
    }

    /// Client proxies always disable audio on the published copy (spec.md
    /// §4.D: "sample rate zeroed in the published metadata").
    pub fn to_video_info_audio_disabled(self) -> VideoInfo {
        let mut vi = self.to_video_info();
        vi.audio_samples_per_second = 0;
        vi
    }

    pub fn to_video_info(self) -> VideoInfo {
        VideoInfo {
            width: self.width,
            height: self.height,
            color_family: match self.color_family {
                0 => ColorFamily::Gray,
                1 => ColorFamily::Yuv,
                _ => ColorFamily::Rgb,
            },
            sample_type: match self.sample_type {
                0 => SampleType::Integer,
                _ => SampleType::Float,
            },
            bits_per_sample: self.bits_per_sample,
            sub_sampling_w: self.sub_sampling_w,
            sub_sampling_h: self.sub_sampling_h,
            num_frames: self.num_frames,
            fps_num: self.fps_num,
            fps_den: self.fps_den,
            audio_samples_per_second: self.audio_samples_per_second,
        }
    }
}

/// Per-clip fixed-size fields (spec.md §6, "Per-clip record"). The
/// variable-length tails — the sync group, `frame_buffer_offset`,
/// `frame_response`, and `parity_response` — are addressed through offsets
/// computed by `RegionLayout`, since their length depends on the
/// per-channel response-slot count chosen at construction.
#[repr(C)]
pub struct ClipRecordHeader {
    pub vi: RawVideoInfo,
    pub has_video_info: AtomicU32,
    pub frame_pitch: u32,
    pub frame_pitch_uv: u32,
    pub frame_offset_u: u32,
    pub frame_offset_v: u32,
}
