// crates/clipchannel-ipc/src/server.rs
//
// Owns the `FrameFetcher` and the shared region; runs one dispatcher thread
// that turns cross-process requests into fetcher calls and publishes the
// results back into shared buffers (spec.md §4.C).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use clipchannel_core::{ChannelConfig, ChannelError, FetcherConfig, UpstreamClip};
use clipchannel_fetcher::FrameFetcher;

use crate::layout::{ERROR_SLOT, REQ_EMPTY, REQ_GETFRAME, REQ_GETPARITY};
use crate::primitives::syncgroup::response_index;
use crate::region::SharedRegion;

pub struct ServerChannel {
    region: Arc<SharedRegion>,
    fetcher: Arc<FrameFetcher>,
    dispatcher: Option<JoinHandle<()>>,
}

impl ServerChannel {
    /// Construction order follows spec.md §4.E: the fetcher (and its worker
    /// thread) comes up first, its clips' video info is pulled through it so
    /// the region can be sized, then the region is allocated and the
    /// dispatcher thread is started.
    pub fn new(
        clips: Vec<Box<dyn UpstreamClip + Send>>,
        channel_config: ChannelConfig,
        fetcher_config: FetcherConfig,
    ) -> Result<Self, ChannelError> {
        let clip_count = clips.len();
        let fetcher = Arc::new(FrameFetcher::new(clips, fetcher_config)?);

        let mut video_infos = Vec::with_capacity(clip_count);
        for i in 0..clip_count {
            video_infos.push(fetcher.get_video_info(i)?);
        }
        let frame_byte_lens: Vec<usize> = video_infos
            .iter()
            .map(|vi| clipchannel_core::frame::PlaneLayout::for_video_info(vi).total_len)
            .collect();

        let region = Arc::new(SharedRegion::create(&channel_config, &video_infos, &frame_byte_lens)?);

        let dispatcher = spawn_dispatcher(Arc::clone(&region), Arc::clone(&fetcher));

        Ok(Self { region, fetcher, dispatcher: Some(dispatcher) })
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    pub fn fetcher(&self) -> &FrameFetcher {
        &self.fetcher
    }
}

impl Drop for ServerChannel {
    /// Teardown order from spec.md §4.E: flag shutdown, broadcast every
    /// condition variable, join the dispatcher, then let `fetcher`'s own
    /// `Drop` wait out its worker thread.
    fn drop(&mut self) {
        self.region.object_state().set_shutdown();
        self.region.request_cond().signal_all();
        for clip_index in 0..self.region.clip_count() {
            let sync_group = self.region.sync_group(clip_index);
            for slot in 0..sync_group.slot_count() {
                sync_group.response_cond(slot).signal_all();
            }
        }
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

fn spawn_dispatcher(region: Arc<SharedRegion>, fetcher: Arc<FrameFetcher>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("clipchannel-server-dispatcher".into())
        .spawn(move || dispatcher_loop(region, fetcher))
        .expect("ServerChannel: failed to spawn dispatcher thread")
}

fn dispatcher_loop(region: Arc<SharedRegion>, fetcher: Arc<FrameFetcher>) {
    loop {
        let shutdown_now = || region.object_state().is_shutdown();
        region.request_cond().wait_on_this_side(None, shutdown_now);

        if region.object_state().is_shutdown() {
            region.request_cond().signal_all();
            break;
        }

        let request_type = {
            let _guard = region.request_cond().lock_long();
            region.request().request_type.load(Ordering::Acquire)
        };

        if request_type == REQ_EMPTY {
            // Spurious wake (shared with `signal_all` during shutdown races).
            continue;
        }

        let clip_index = region.request().clip_index.load(Ordering::Acquire) as usize;
        let frame_number = region.request().frame_number.load(Ordering::Acquire);

        match request_type {
            REQ_GETFRAME => dispatch_get_frame(&region, &fetcher, clip_index, frame_number),
            REQ_GETPARITY => dispatch_get_parity(&region, &fetcher, clip_index, frame_number),
            _ => {}
        }

        {
            let _guard = region.request_cond().lock_short();
            region.request().request_type.store(REQ_EMPTY, Ordering::Release);
        }
        region.request_cond().switch_to_other_side();
    }
}

fn dispatch_get_frame(region: &SharedRegion, fetcher: &FrameFetcher, clip_index: usize, n: i32) {
    let slot = response_index(n, region.slot_count());
    let sync_group = region.sync_group(clip_index);
    let cond = sync_group.response_cond(slot);
    let _guard = cond.lock_long();

    match fetcher.get_frame(clip_index, n) {
        Ok(frame) => {
            let header = region.clip_header(clip_index);
            let pitch_y = header.frame_pitch as usize;
            let pitch_uv = header.frame_pitch_uv as usize;
            let offset_u = header.frame_offset_u as usize;
            let offset_v = header.frame_offset_v as usize;

            let total_len = frame.layout.total_len;
            // SAFETY: this slot's `CondVar` is locked for the duration.
            let dest = unsafe { region.pixel_buffer_mut(clip_index, slot, total_len) };
            if let Some(y) = frame.plane(0) {
                copy_plane(dest, 0, pitch_y, y);
            }
            if header.vi.color_family != 0 {
                if let Some(u) = frame.plane(1) {
                    copy_plane(dest, offset_u, pitch_uv, u);
                }
                if let Some(v) = frame.plane(2) {
                    copy_plane(dest, offset_v, pitch_uv, v);
                }
            }

            // Publication fence: frame_number is written last so a client
            // that observes it also observes every preceding pixel write
            // (spec.md §5, "A frame slot is publication-ordered").
            region.frame_response(clip_index, slot).frame_number.store(n, Ordering::Release);
        }
        Err(_) => {
            region.frame_response(clip_index, slot).frame_number.store(ERROR_SLOT, Ordering::Release);
        }
    }

    cond.switch_to_other_side();
    speculate_next_frame(region, fetcher, clip_index, n + 1);
}

/// Opportunistically publishes the next frame into its response slot if the
/// fetcher's own idle-scan prefetch already has it cached and no client is
/// currently waiting on that slot (spec.md §4.C: "the server may preemptively
/// fill a slot for likely-next frames if `requested_client_count = 0`").
/// Never blocks: a cache miss here just means the slot stays as it was.
fn speculate_next_frame(region: &SharedRegion, fetcher: &FrameFetcher, clip_index: usize, n: i32) {
    let slot = response_index(n, region.slot_count());
    let resp = region.frame_response(clip_index, slot);
    if resp.requested_client_count.load(Ordering::Acquire) != 0 {
        return;
    }
    let Some(frame) = fetcher.try_get_cached_frame(clip_index, n) else {
        return;
    };

    let sync_group = region.sync_group(clip_index);
    let cond = sync_group.response_cond(slot);
    let Some(_guard) = cond.try_lock(1) else {
        return;
    };
    if resp.requested_client_count.load(Ordering::Acquire) != 0 {
        return;
    }

    let header = region.clip_header(clip_index);
    let total_len = frame.layout.total_len;
    // SAFETY: this slot's `CondVar` is locked for the duration.
    let dest = unsafe { region.pixel_buffer_mut(clip_index, slot, total_len) };
    if let Some(y) = frame.plane(0) {
        copy_plane(dest, 0, header.frame_pitch as usize, y);
    }
    if header.vi.color_family != 0 {
        if let Some(u) = frame.plane(1) {
            copy_plane(dest, header.frame_offset_u as usize, header.frame_pitch_uv as usize, u);
        }
        if let Some(v) = frame.plane(2) {
            copy_plane(dest, header.frame_offset_v as usize, header.frame_pitch_uv as usize, v);
        }
    }
    resp.frame_number.store(n, Ordering::Release);
}

fn copy_plane(dest: &mut [u8], offset: usize, _pitch: usize, src: &[u8]) {
    dest[offset..offset + src.len()].copy_from_slice(src);
}

fn dispatch_get_parity(region: &SharedRegion, fetcher: &FrameFetcher, clip_index: usize, n: i32) {
    let slot = response_index(n, region.slot_count());
    let parity_slot = region.parity_response(clip_index, slot);

    match fetcher.get_parity(clip_index, n) {
        Ok(parity) => {
            let encoded = (n & 0x7fff_ffff) | if parity { i32::MIN } else { 0 };
            parity_slot.result.store(encoded, Ordering::Release);
        }
        Err(_) => {
            // The word's full encoding space is already spoken for by
            // legitimate `(n, parity)` results, so the failure is signaled
            // through `errored` instead of a reserved value in `result`.
            // `result` still returns to `PARITY_RESPONSE_EMPTY` per the
            // spec's transition table; no client mistakes it for a match
            // since `errored` is checked first.
            parity_slot.errored.store(1, Ordering::Release);
            parity_slot.result.store(crate::layout::PARITY_RESPONSE_EMPTY, Ordering::Release);
        }
    }
}
