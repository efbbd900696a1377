// crates/clipchannel-ipc/src/client.rs
//
// The client proxy filter: implements the host's frame-source contract by
// issuing requests over the shared-memory channel (spec.md §4.D).

use std::sync::atomic::Ordering;

use clipchannel_core::{ChannelConfig, ChannelError, FetchError, Frame, FrameSource, VideoInfo};

use crate::layout::{ERROR_SLOT, REQ_EMPTY, REQ_GETFRAME, REQ_GETPARITY};
use crate::primitives::syncgroup::response_index;
use crate::region::SharedRegion;

pub struct ClientProxy {
    region: SharedRegion,
    clip_index: usize,
    vi: VideoInfo,
}

impl ClientProxy {
    /// Opens the already-created region by name (spec.md §4.D). Audio is
    /// always disabled on the published metadata.
    pub fn open(
        config: &ChannelConfig,
        clip_index: usize,
        frame_byte_lens: &[usize],
    ) -> Result<Self, ChannelError> {
        let region = SharedRegion::open(config, frame_byte_lens)?;
        if region.object_state().is_shutdown() {
            return Err(ChannelError::ServerShutDown);
        }
        let vi = region.clip_header(clip_index).vi.to_video_info_audio_disabled();
        Ok(Self { region, clip_index, vi })
    }

    fn check_shutdown(&self) -> Result<(), ChannelError> {
        if self.region.object_state().is_shutdown() {
            self.region.request_cond().signal_all();
            return Err(ChannelError::ServerShutDown);
        }
        Ok(())
    }

    /// spec.md §4.D, "GetFrame": prefetch-hit fast path, then the
    /// request/response condvar protocol.
    fn fetch_frame(&self, n: i32) -> Result<Frame, ChannelError> {
        self.check_shutdown()?;

        let slot = response_index(n, self.region.slot_count());
        let sync_group = self.region.sync_group(self.clip_index);
        let cond = sync_group.response_cond(slot);
        let resp = self.region.frame_response(self.clip_index, slot);

        // Try (short spin budget) to acquire the slot's condition variable
        // without going through the request side at all — a prefetch hit.
        if let Some(guard) = cond.try_lock(5_000) {
            self.check_shutdown()?;
            if resp.frame_number.load(Ordering::Acquire) == n {
                let frame = self.read_frame(slot, n)?;
                drop(guard);
                return Ok(frame);
            }
        }

        loop {
            {
                let _guard = self.region.request_cond().lock_short();
                self.check_shutdown()?;
                if self.region.request().request_type.load(Ordering::Acquire) == REQ_EMPTY {
                    self.region.request().clip_index.store(self.clip_index as i32, Ordering::Relaxed);
                    self.region.request().frame_number.store(n, Ordering::Relaxed);
                    self.region.request().request_type.store(REQ_GETFRAME, Ordering::Release);
                    self.region.request_cond().switch_to_other_side();
                    break;
                }
            }
            let stop = || self.region.object_state().is_shutdown();
            self.region.request_cond().wait_on_this_side(None, stop);
            self.check_shutdown()?;
        }

        loop {
            let _guard = cond.lock_long();
            self.check_shutdown()?;
            let current = resp.frame_number.load(Ordering::Acquire);
            if current == ERROR_SLOT {
                return Err(ChannelError::Fetch(FetchError::Upstream(
                    "upstream clip reported an error".to_string(),
                )));
            }
            if current != n {
                if resp.requested_client_count.load(Ordering::Acquire) == 0 {
                    cond.switch_to_other_side();
                }
                drop(_guard);
                continue;
            }
            let frame = self.read_frame(slot, n)?;
            resp.requested_client_count.fetch_sub(1, Ordering::AcqRel);
            cond.switch_to_other_side();
            return Ok(frame);
        }
    }

    fn read_frame(&self, slot: usize, n: i32) -> Result<Frame, ChannelError> {
        let header = self.region.clip_header(self.clip_index);
        let pitch_y = header.frame_pitch as usize;
        let pitch_uv = header.frame_pitch_uv as usize;
        let offset_u = header.frame_offset_u as usize;
        let offset_v = header.frame_offset_v as usize;
        let y_len = pitch_y * self.vi.height as usize;
        let total_len = if self.vi.has_chroma_planes() {
            offset_v + pitch_uv * self.vi.chroma_height() as usize
        } else {
            y_len
        };

        // SAFETY: the caller holds the slot's `CondVar` lock.
        let src = unsafe { self.region.pixel_buffer(self.clip_index, slot, total_len) };

        let mut planes = vec![std::sync::Arc::<[u8]>::from(&src[..y_len])];
        if self.vi.has_chroma_planes() {
            let plane_len = pitch_uv * self.vi.chroma_height() as usize;
            planes.push(std::sync::Arc::from(&src[offset_u..offset_u + plane_len]));
            planes.push(std::sync::Arc::from(&src[offset_v..offset_v + plane_len]));
        }

        let layout = clipchannel_core::frame::PlaneLayout { pitch_y, pitch_uv, offset_u, offset_v, total_len };
        Ok(Frame::new(n, planes, layout))
    }

    /// spec.md §4.D, "GetParity": same request protocol, polling
    /// `parity_response[slot]` rather than a condition variable.
    fn fetch_parity(&self, n: i32) -> Result<bool, ChannelError> {
        self.check_shutdown()?;
        let slot = response_index(n, self.region.slot_count());
        let parity_slot = self.region.parity_response(self.clip_index, slot);

        loop {
            let _guard = self.region.request_cond().lock_short();
            self.check_shutdown()?;
            if self.region.request().request_type.load(Ordering::Acquire) != REQ_EMPTY {
                drop(_guard);
                let stop = || self.region.object_state().is_shutdown();
                self.region.request_cond().wait_on_this_side(None, stop);
                self.check_shutdown()?;
                continue;
            }
            // Loop the CAS itself (rather than attempting it once and
            // discarding the outcome) so a slot left non-EMPTY by a prior,
            // not-yet-consumed round — e.g. two clients colliding on the
            // same response_index — is waited out instead of racing ahead
            // and submitting a second GETPARITY against it.
            if parity_slot
                .result
                .compare_exchange(
                    crate::layout::PARITY_RESPONSE_EMPTY,
                    crate::layout::PARITY_WAITING_FOR_RESPONSE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                drop(_guard);
                let _ = nix::sched::sched_yield();
                self.check_shutdown()?;
                continue;
            }
            self.region.request().clip_index.store(self.clip_index as i32, Ordering::Relaxed);
            self.region.request().frame_number.store(n, Ordering::Relaxed);
            self.region.request().request_type.store(REQ_GETPARITY, Ordering::Release);
            self.region.request_cond().switch_to_other_side();
            break;
        }

        loop {
            let result = parity_slot.result.load(Ordering::Acquire);
            if result == crate::layout::PARITY_WAITING_FOR_RESPONSE {
                let _ = nix::sched::sched_yield();
                self.check_shutdown()?;
                continue;
            }
            if parity_slot.errored.swap(0, Ordering::AcqRel) != 0 {
                return Err(ChannelError::Fetch(FetchError::Upstream(
                    "upstream clip reported an error".to_string(),
                )));
            }
            debug_assert_eq!(result & 0x7fff_ffff, n);
            let _ = parity_slot.result.compare_exchange(
                result,
                crate::layout::PARITY_RESPONSE_EMPTY,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            return Ok(result < 0);
        }
    }
}

impl FrameSource for ClientProxy {
    type Error = ChannelError;

    fn get_frame(&self, n: i32) -> Result<Frame, ChannelError> {
        self.fetch_frame(n)
    }

    fn get_parity(&self, n: i32) -> Result<bool, ChannelError> {
        self.fetch_parity(n)
    }

    /// Audio is disabled on the proxy (spec.md §4.D): inert.
    fn get_audio(&self, _buf: &mut [u8], _start: i64, _count: i64) -> Result<(), ChannelError> {
        Ok(())
    }

    fn get_video_info(&self) -> VideoInfo {
        self.vi.clone()
    }

    /// Caching is a server-side concern; inert on the proxy (spec.md §4.D).
    fn set_cache_hints(&self, _hints: i32, _frame_range: i32) {}
}
