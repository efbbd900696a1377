// crates/clipchannel-fetcher/src/fetcher.rs
//
// The public FrameFetcher API (spec.md §4.B, "Public contract"). A
// FrameFetcher owns one dedicated worker thread that serializes every call
// into the upstream clips it was built with; everything here is the
// producer/consumer side of that arrangement — install requests, wait for
// the worker to act on them, hand back results.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use clipchannel_core::{ChannelError, FetchError, FetcherConfig, UpstreamClip, VideoInfo};

use crate::clip_state::{ClipEntry, ClipState};
use crate::fetch_request::FetchRequest;
use crate::worker::{self, BoxedCallback, Inner};
use clipchannel_core::Frame;

/// A single-producer prefetching cache in front of a set of upstream clips
/// that may only ever be driven from one thread (spec.md §2, component B).
pub struct FrameFetcher {
    inner: Arc<Mutex<Inner>>,
    work_available: Arc<Condvar>,
    work_completed: Arc<Condvar>,
    config: FetcherConfig,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl FrameFetcher {
    /// Spawns the worker thread and takes ownership of `clips`. Fails if
    /// `clips` is empty — a fetcher with nothing to serve has no reason to
    /// exist (spec.md §7, `NoClips`).
    pub fn new(
        clips: Vec<Box<dyn UpstreamClip + Send>>,
        config: FetcherConfig,
    ) -> Result<Self, ChannelError> {
        if clips.is_empty() {
            return Err(ChannelError::NoClips);
        }

        let entries = clips.iter().map(|_| ClipEntry::default()).collect();
        let inner = Arc::new(Mutex::new(Inner {
            clips: entries,
            fetch_info: FetchRequest::default(),
            worker_callback: None,
            shutdown: false,
            work_generation: 0,
        }));
        let work_available = Arc::new(Condvar::new());
        let work_completed = Arc::new(Condvar::new());

        let worker = worker::spawn(
            Arc::clone(&inner),
            Arc::clone(&work_available),
            Arc::clone(&work_completed),
            config,
            clips,
        );

        Ok(Self { inner, work_available, work_completed, config, worker: Some(worker) })
    }

    /// Non-blocking peek at the cache: `Some(frame)` on a hit, `None`
    /// otherwise (cache miss, sticky error, or shutdown) without installing
    /// a request or touching `last_requested_frame`. Used by the channel
    /// server to speculatively publish frames it already has cached into
    /// idle response slots (spec.md §4.C, "Speculative prefetch into
    /// response slots").
    pub fn try_get_cached_frame(&self, clip_index: usize, n: i32) -> Option<Frame> {
        let guard = self.inner.lock().unwrap();
        if guard.shutdown || guard.clips[clip_index].state.is_errored() {
            return None;
        }
        guard.clips[clip_index].cache.get(n).cloned()
    }

    /// The consumer path for decoded frames (spec.md §4.B, "GetFrame").
    /// Returns the cached frame immediately on a hit; otherwise installs an
    /// on-demand request and blocks until the worker satisfies it, errors,
    /// or (if `FetcherConfig::max_wait` is set) the wait times out.
    pub fn get_frame(&self, clip_index: usize, n: i32) -> Result<Frame, FetchError> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if guard.shutdown {
                return Err(FetchError::AlreadyShutDown);
            }
            if let ClipState::Errored(msg) = &guard.clips[clip_index].state {
                return Err(FetchError::Upstream(msg.clone()));
            }
            if guard.clips[clip_index].cache.contains(n) {
                guard.clips[clip_index].last_requested_frame = Some(n);
                let frame = guard.clips[clip_index].cache.get(n).unwrap().clone();
                return Ok(frame);
            }

            let already_requested = guard.fetch_info.is_fetching
                && guard.fetch_info.clip_index == clip_index
                && guard.fetch_info.frame_number == n;
            if !already_requested {
                let next_version = guard.fetch_info.version + 1;
                guard.fetch_info = FetchRequest {
                    version: next_version,
                    clip_index,
                    frame_number: n,
                    is_fetching: true,
                };
                self.work_available.notify_all();
            }

            guard = self.wait_for_progress(guard)?;
        }
    }

    /// Parity is cheap on the original clip but still not thread-safe to
    /// call directly, so it goes through the same worker rendezvous as
    /// everything else (spec.md §4.B).
    pub fn get_parity(&self, clip_index: usize, n: i32) -> Result<bool, FetchError> {
        self.invoke_in_worker_thread(clip_index, move |clip| clip.get_parity(n))
    }

    /// Audio is out of scope for the shared-memory channel (spec.md §1) but
    /// the in-process `FrameFetcher` still exposes it for completeness and
    /// for host code that wants direct access.
    pub fn get_audio(
        &self,
        clip_index: usize,
        buf: &mut [u8],
        start: i64,
        count: i64,
    ) -> Result<(), FetchError> {
        self.invoke_in_worker_thread(clip_index, move |clip| clip.get_audio(buf, start, count))?
    }

    /// Cached after the first call (spec.md §3, "cached video metadata").
    pub fn get_video_info(&self, clip_index: usize) -> Result<VideoInfo, FetchError> {
        {
            let guard = self.inner.lock().unwrap();
            if guard.shutdown {
                return Err(FetchError::AlreadyShutDown);
            }
            if let Some(vi) = &guard.clips[clip_index].video_info {
                return Ok(vi.clone());
            }
        }

        let vi = self.invoke_in_worker_thread(clip_index, |clip| clip.get_video_info())?;
        let mut guard = self.inner.lock().unwrap();
        guard.clips[clip_index].video_info = Some(vi.clone());
        Ok(vi)
    }

    /// Runs `f` against `clips[clip_index]` on the worker thread and blocks
    /// until it has run, returning its result (spec.md §4.B,
    /// "invoke_in_worker_thread"). Used for anything that isn't a plain
    /// cached `get_frame` — parity, audio, video info.
    ///
    /// `f` (and therefore `R`) may borrow data with a shorter-than-`'static`
    /// lifetime, e.g. an audio output buffer. That's sound here because this
    /// function does not return until the worker has either executed `f` or
    /// the fetcher has been torn down without ever running it — the erased
    /// lifetime never escapes this stack frame.
    fn invoke_in_worker_thread<'a, R, F>(&self, clip_index: usize, f: F) -> Result<R, FetchError>
    where
        F: FnOnce(&mut dyn UpstreamClip) -> R + Send + 'a,
        R: Send + 'a,
    {
        let slot: Arc<Mutex<Option<R>>> = Arc::new(Mutex::new(None));
        let slot_for_callback = Arc::clone(&slot);

        let callback: Box<dyn FnOnce(&mut [Box<dyn UpstreamClip + Send>]) + Send + 'a> =
            Box::new(move |upstreams: &mut [Box<dyn UpstreamClip + Send>]| {
                let result = f(upstreams[clip_index].as_mut());
                *slot_for_callback.lock().unwrap() = Some(result);
            });

        // SAFETY: `Inner::worker_callback` requires `'static` so it can sit
        // behind the shared `Mutex`, but this function never returns before
        // the callback has either run (result observed in `slot` below) or
        // been dropped unrun at shutdown — so nothing borrowed by `f` is
        // ever touched after this call returns, regardless of the lifetime
        // the type system now believes it has.
        let callback: BoxedCallback =
            unsafe { std::mem::transmute::<Box<dyn FnOnce(&mut [Box<dyn UpstreamClip + Send>]) + Send + 'a>, BoxedCallback>(callback) };

        let mut callback = Some(callback);
        let mut guard = self.inner.lock().unwrap();
        loop {
            if guard.shutdown {
                return Err(FetchError::AlreadyShutDown);
            }
            if guard.worker_callback.is_none() {
                guard.worker_callback = callback.take();
                self.work_available.notify_all();
                break;
            }
            guard = self.wait_for_progress(guard)?;
        }
        drop(guard);

        loop {
            if let Some(result) = slot.lock().unwrap().take() {
                return Ok(result);
            }
            let guard = self.inner.lock().unwrap();
            let guard = self.wait_for_progress(guard)?;
            drop(guard);
        }
    }

    /// Waits for the worker to make one unit of progress (a completed
    /// callback, fetch, or idle scan), honoring `FetcherConfig::max_wait`
    /// when set (spec.md §9, resolved open question). Guarded by
    /// `work_generation` so a wakeup that happened just before this call
    /// started waiting is never missed.
    fn wait_for_progress<'m>(&self, guard: MutexGuard<'m, Inner>) -> Result<MutexGuard<'m, Inner>, FetchError> {
        let generation = guard.work_generation;
        match self.config.max_wait {
            None => Ok(self
                .work_completed
                .wait_while(guard, |g| !g.shutdown && g.work_generation == generation)
                .unwrap()),
            Some(max_wait) => {
                let (guard, timeout) = self
                    .work_completed
                    .wait_timeout_while(guard, max_wait, |g| !g.shutdown && g.work_generation == generation)
                    .unwrap();
                if timeout.timed_out() && !guard.shutdown && guard.work_generation == generation {
                    return Err(FetchError::Upstream(
                        "FrameFetcher: timed out waiting on worker thread".to_string(),
                    ));
                }
                Ok(guard)
            }
        }
    }
}

impl Drop for FrameFetcher {
    /// Signals shutdown and joins the worker (spec.md §4.E). Any consumer
    /// still parked in `wait_for_progress` wakes on the broadcast the worker
    /// issues once it observes `shutdown`.
    fn drop(&mut self) {
        {
            let mut guard = self.inner.lock().unwrap();
            guard.shutdown = true;
        }
        self.work_available.notify_all();
        self.work_completed.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
