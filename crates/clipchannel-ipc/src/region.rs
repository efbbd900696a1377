// crates/clipchannel-ipc/src/region.rs
//
// The mapped shared-memory object itself (spec.md §3, "SharedRegion"; §6,
// "Shared region layout"). `RegionLayout` computes byte offsets for every
// field up front from the clip count and slot count; `SharedRegion` owns
// the mapping and the raw pointer arithmetic needed to reach them.
//
// The fields are grouped by kind (all clip headers, then all sync groups,
// then all frame-buffer-offset tables, ...) rather than interleaved into one
// record per clip — a struct-of-arrays rearrangement that keeps offset
// computation straightforward in safe-ish Rust. Every field spec.md §6
// names is present; only the grouping differs from the original's
// interleaved per-clip record.

use std::fs::File;

use memmap2::MmapMut;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use clipchannel_core::{ChannelConfig, ChannelError, VideoInfo};

use crate::layout::{ClipRecordHeader, ObjectState, ParitySlot, RawVideoInfo, Request};
use crate::primitives::condvar::CondVar;
use crate::primitives::syncgroup::SyncGroup;

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Byte offsets (relative to the region's base address) of every field
/// named in spec.md §6, computed once from the clip count and slot count.
#[derive(Debug, Clone)]
pub struct RegionLayout {
    pub clip_count: usize,
    pub slot_count: usize,
    object_state_offset: usize,
    request_cond_offset: usize,
    request_offset: usize,
    clip_header_base: usize,
    sync_group_base: usize,
    frame_buffer_offset_table_base: usize,
    frame_response_base: usize,
    parity_response_base: usize,
    pixel_region_base: usize,
    pixel_clip_base: Vec<usize>,
    pub total_len: usize,
}

impl RegionLayout {
    /// `frame_byte_lens[i]` is the packed pixel-buffer size for clip `i`
    /// (spec.md §6: `PlaneLayout::for_video_info(&vi).total_len`). Every
    /// response slot for that clip gets its own buffer of that size.
    pub fn compute(frame_byte_lens: &[usize], slot_count: usize) -> Self {
        let clip_count = frame_byte_lens.len();
        let mut offset = 0usize;

        offset = align_up(offset, std::mem::align_of::<ObjectState>());
        let object_state_offset = offset;
        offset += std::mem::size_of::<ObjectState>();

        offset = align_up(offset, std::mem::align_of::<CondVar>());
        let request_cond_offset = offset;
        offset += std::mem::size_of::<CondVar>();

        offset = align_up(offset, std::mem::align_of::<Request>());
        let request_offset = offset;
        offset += std::mem::size_of::<Request>();

        offset = align_up(offset, std::mem::align_of::<ClipRecordHeader>());
        let clip_header_base = offset;
        offset += std::mem::size_of::<ClipRecordHeader>() * clip_count;

        offset = align_up(offset, std::mem::align_of::<CondVar>());
        let sync_group_base = offset;
        offset += std::mem::size_of::<CondVar>() * slot_count * clip_count;

        offset = align_up(offset, std::mem::align_of::<u64>());
        let frame_buffer_offset_table_base = offset;
        offset += std::mem::size_of::<u64>() * slot_count * clip_count;

        offset = align_up(offset, std::mem::align_of::<crate::layout::FrameResponse>());
        let frame_response_base = offset;
        offset += std::mem::size_of::<crate::layout::FrameResponse>() * slot_count * clip_count;

        offset = align_up(offset, std::mem::align_of::<ParitySlot>());
        let parity_response_base = offset;
        offset += std::mem::size_of::<ParitySlot>() * slot_count * clip_count;

        offset = align_up(offset, 64);
        let pixel_region_base = offset;
        let mut pixel_clip_base = Vec::with_capacity(clip_count);
        for &len in frame_byte_lens {
            pixel_clip_base.push(offset);
            offset += len * slot_count;
            offset = align_up(offset, 64);
        }

        Self {
            clip_count,
            slot_count,
            object_state_offset,
            request_cond_offset,
            request_offset,
            clip_header_base,
            sync_group_base,
            frame_buffer_offset_table_base,
            frame_response_base,
            parity_response_base,
            pixel_region_base,
            pixel_clip_base,
            total_len: offset,
        }
    }

    fn clip_header_offset(&self, clip_index: usize) -> usize {
        self.clip_header_base + clip_index * std::mem::size_of::<ClipRecordHeader>()
    }

    fn sync_group_offset(&self, clip_index: usize) -> usize {
        self.sync_group_base + clip_index * self.slot_count * std::mem::size_of::<CondVar>()
    }

    fn frame_buffer_offset_entry_offset(&self, clip_index: usize, slot: usize) -> usize {
        self.frame_buffer_offset_table_base
            + (clip_index * self.slot_count + slot) * std::mem::size_of::<u64>()
    }

    fn frame_response_offset(&self, clip_index: usize, slot: usize) -> usize {
        self.frame_response_base
            + (clip_index * self.slot_count + slot) * std::mem::size_of::<crate::layout::FrameResponse>()
    }

    fn parity_response_offset(&self, clip_index: usize, slot: usize) -> usize {
        self.parity_response_base + (clip_index * self.slot_count + slot) * std::mem::size_of::<ParitySlot>()
    }

    fn pixel_buffer_offset(&self, clip_index: usize, slot: usize, frame_byte_len: usize) -> usize {
        self.pixel_clip_base[clip_index] + slot * frame_byte_len
    }
}

/// The mapped region itself. Owns the `mmap`; every accessor is raw-pointer
/// arithmetic off a base pointer captured once at construction, since the
/// fields are reached concurrently from multiple threads (and, in the real
/// deployment, multiple processes) coordinated only by the spinlocks and
/// two-sided signals that are themselves stored inline in the mapping.
pub struct SharedRegion {
    mmap: MmapMut,
    base: *mut u8,
    layout: RegionLayout,
    name: String,
    owns_mapping: bool,
}

// SAFETY: all cross-thread/cross-process access to the bytes behind `base`
// goes through the `#[repr(C)]` atomic/spinlock types defined in `layout`
// and `primitives`; nothing here is touched through a plain `&mut`.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Server-side construction: creates the shared-memory object, sizes
    /// it, maps it, and placement-initializes every field (spec.md §4.E,
    /// "allocate shared region; initialize primitives").
    pub fn create(
        config: &ChannelConfig,
        clip_video_infos: &[VideoInfo],
        frame_byte_lens: &[usize],
    ) -> Result<Self, ChannelError> {
        let layout = RegionLayout::compute(frame_byte_lens, config.slot_count as usize);
        let name = config.shared_memory_name();

        let _ = shm_unlink(name.as_str());
        let file = shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map(File::from)
        .map_err(|e| ChannelError::Init(format!("shm_open({name}) failed: {e}")))?;

        ftruncate(&file, layout.total_len as i64)
            .map_err(|e| ChannelError::Init(format!("ftruncate({name}) failed: {e}")))?;

        let mut mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| ChannelError::Init(format!("mmap({name}) failed: {e}")))?;
        let base = mmap.as_mut_ptr();

        let region = Self { mmap, base, layout, name, owns_mapping: true };
        region.init(clip_video_infos, frame_byte_lens);
        Ok(region)
    }

    /// Client-side construction: opens an already-created region by name
    /// without touching its contents.
    pub fn open(config: &ChannelConfig, frame_byte_lens: &[usize]) -> Result<Self, ChannelError> {
        let layout = RegionLayout::compute(frame_byte_lens, config.slot_count as usize);
        let name = config.shared_memory_name();

        let file = shm_open(name.as_str(), OFlag::O_RDWR, Mode::empty())
            .map(File::from)
            .map_err(|e| ChannelError::Init(format!("shm_open({name}) failed: {e}")))?;

        let mut mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| ChannelError::Init(format!("mmap({name}) failed: {e}")))?;
        let base = mmap.as_mut_ptr();

        Ok(Self { mmap, base, layout, name, owns_mapping: false })
    }

    fn init(&self, clip_video_infos: &[VideoInfo], frame_byte_lens: &[usize]) {
        unsafe {
            std::ptr::write(
                self.base.add(self.layout.object_state_offset) as *mut ObjectState,
                ObjectState { shutdown: Default::default() },
            );
            std::ptr::write(self.base.add(self.layout.request_cond_offset) as *mut CondVar, CondVar::new());
            std::ptr::write(
                self.base.add(self.layout.request_offset) as *mut Request,
                Request {
                    request_type: crate::layout::REQ_EMPTY.into(),
                    clip_index: 0.into(),
                    frame_number: 0.into(),
                },
            );

            for (clip_index, vi) in clip_video_infos.iter().enumerate() {
                let pitch = clipchannel_core::frame::PlaneLayout::for_video_info(vi);
                std::ptr::write(
                    self.base.add(self.layout.clip_header_offset(clip_index)) as *mut ClipRecordHeader,
                    ClipRecordHeader {
                        vi: RawVideoInfo::from_video_info(vi),
                        has_video_info: 1u32.into(),
                        frame_pitch: pitch.pitch_y as u32,
                        frame_pitch_uv: pitch.pitch_uv as u32,
                        frame_offset_u: pitch.offset_u as u32,
                        frame_offset_v: pitch.offset_v as u32,
                    },
                );

                for slot in 0..self.layout.slot_count {
                    std::ptr::write(
                        self.base.add(self.layout.sync_group_offset(clip_index))
                            .add(slot * std::mem::size_of::<CondVar>()) as *mut CondVar,
                        CondVar::new(),
                    );
                    let buf_offset =
                        self.layout.pixel_buffer_offset(clip_index, slot, frame_byte_lens[clip_index]) as u64;
                    std::ptr::write(
                        self.base.add(self.layout.frame_buffer_offset_entry_offset(clip_index, slot)) as *mut u64,
                        buf_offset,
                    );
                    std::ptr::write(
                        self.base.add(self.layout.frame_response_offset(clip_index, slot))
                            as *mut crate::layout::FrameResponse,
                        crate::layout::FrameResponse {
                            frame_number: crate::layout::UNPOPULATED_SLOT.into(),
                            requested_client_count: 0.into(),
                        },
                    );
                    std::ptr::write(
                        self.base.add(self.layout.parity_response_offset(clip_index, slot)) as *mut ParitySlot,
                        ParitySlot {
                            result: crate::layout::PARITY_RESPONSE_EMPTY.into(),
                            errored: 0u32.into(),
                        },
                    );
                }
            }
        }
    }

    pub fn object_state(&self) -> &ObjectState {
        unsafe { &*(self.base.add(self.layout.object_state_offset) as *const ObjectState) }
    }

    pub fn request_cond(&self) -> &CondVar {
        unsafe { &*(self.base.add(self.layout.request_cond_offset) as *const CondVar) }
    }

    pub fn request(&self) -> &Request {
        unsafe { &*(self.base.add(self.layout.request_offset) as *const Request) }
    }

    pub fn clip_header(&self, clip_index: usize) -> &ClipRecordHeader {
        unsafe { &*(self.base.add(self.layout.clip_header_offset(clip_index)) as *const ClipRecordHeader) }
    }

    pub fn sync_group(&self, clip_index: usize) -> SyncGroup<'_> {
        let offset = self.layout.sync_group_offset(clip_index);
        let conds = unsafe {
            std::slice::from_raw_parts(self.base.add(offset) as *const CondVar, self.layout.slot_count)
        };
        SyncGroup::new(conds)
    }

    pub fn frame_response(&self, clip_index: usize, slot: usize) -> &crate::layout::FrameResponse {
        unsafe {
            &*(self.base.add(self.layout.frame_response_offset(clip_index, slot))
                as *const crate::layout::FrameResponse)
        }
    }

    pub fn parity_response(&self, clip_index: usize, slot: usize) -> &ParitySlot {
        unsafe { &*(self.base.add(self.layout.parity_response_offset(clip_index, slot)) as *const ParitySlot) }
    }

    /// # Safety
    /// Caller must hold the slot's response `CondVar` lock for the duration
    /// of the returned borrow (spec.md §4.C/§4.D: every slot access happens
    /// under its spinlock).
    pub unsafe fn pixel_buffer(&self, clip_index: usize, slot: usize, len: usize) -> &[u8] {
        let offset = self.layout.frame_buffer_offset_entry_offset(clip_index, slot);
        let buf_offset = *(self.base.add(offset) as *const u64) as usize;
        std::slice::from_raw_parts(self.base.add(buf_offset), len)
    }

    /// # Safety
    /// Same contract as [`Self::pixel_buffer`].
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn pixel_buffer_mut(&self, clip_index: usize, slot: usize, len: usize) -> &mut [u8] {
        let offset = self.layout.frame_buffer_offset_entry_offset(clip_index, slot);
        let buf_offset = *(self.base.add(offset) as *const u64) as usize;
        std::slice::from_raw_parts_mut(self.base.add(buf_offset), len)
    }

    pub fn slot_count(&self) -> usize {
        self.layout.slot_count
    }

    pub fn clip_count(&self) -> usize {
        self.layout.clip_count
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        let _ = &self.mmap;
        if self.owns_mapping {
            let _ = shm_unlink(self.name.as_str());
        }
    }
}
