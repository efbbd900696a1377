// crates/clipchannel-fetcher/src/worker.rs
//
// The FrameFetcher's single worker thread: the scheduling loop that picks,
// in priority order, a pending callback, an on-demand fetch, or an
// idle-scan prefetch candidate (spec.md §4.B, "Worker scheduling policy").
// The upstream clip trait objects are owned exclusively by this thread —
// nothing else ever touches them, which is what makes the "not thread-safe"
// contract on `UpstreamClip` sound without any locking around the calls
// themselves.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use clipchannel_core::{FetchError, FetcherConfig, UpstreamClip};

use crate::clip_state::{ClipEntry, ClipState};
use crate::fetch_request::FetchRequest;

pub(crate) type BoxedCallback = Box<dyn FnOnce(&mut [Box<dyn UpstreamClip + Send>]) + Send>;

pub(crate) struct Inner {
    pub clips: Vec<ClipEntry>,
    pub fetch_info: FetchRequest,
    pub worker_callback: Option<BoxedCallback>,
    pub shutdown: bool,
    /// Bumped by the worker after every loop iteration (including idle
    /// scans that found nothing); consumers wait on `work_completed` for a
    /// change in this counter rather than racing a bare condvar signal.
    pub work_generation: u64,
}

enum Work {
    Callback(BoxedCallback),
    Fetch { clip_index: usize, frame_number: i32, requested: bool },
    Idle,
}

/// Priority order from spec.md §4.B step 1: an installed callback, then a
/// new on-demand request (detected via `version` drift), then idle-scan
/// prefetch. Choice of prefetch candidate: the clip with the strictly
/// greatest positive `cache_space`, ties resolving to first-seen.
fn select_work(guard: &mut Inner, local_version: &mut u64, config: &FetcherConfig) -> Work {
    if let Some(cb) = guard.worker_callback.take() {
        return Work::Callback(cb);
    }
    if guard.fetch_info.version != *local_version {
        *local_version = guard.fetch_info.version;
        return Work::Fetch {
            clip_index: guard.fetch_info.clip_index,
            frame_number: guard.fetch_info.frame_number,
            requested: true,
        };
    }

    let mut best: Option<(usize, i32, i64)> = None;
    for (i, entry) in guard.clips.iter().enumerate() {
        if entry.state.is_errored() {
            continue;
        }
        let last_requested = entry.effective_last_requested();
        let behind_deficit = (config.cache_behind as i64 - (last_requested as i64 - entry.cache.start() as i64)).max(0);
        let cache_space = config.max_cache_frames as i64 - entry.cache.len() as i64 - behind_deficit;
        if cache_space <= 0 {
            continue;
        }
        if best.map_or(true, |(_, _, best_space)| cache_space > best_space) {
            best = Some((i, entry.cache.end(), cache_space));
        }
    }

    match best {
        Some((clip_index, frame_number, _)) => Work::Fetch { clip_index, frame_number, requested: false },
        None => Work::Idle,
    }
}

/// Align `clips[clip_index]`'s cache to `n` and fill forward up to and
/// including `n` (spec.md §4.B, "fetch_frame"). Upstream calls happen
/// outside the lock; only the cache mutations are serialized.
fn fetch_frame(
    inner: &Mutex<Inner>,
    upstreams: &mut [Box<dyn UpstreamClip + Send>],
    clip_index: usize,
    n: i32,
    cache_behind: u32,
) {
    let fetch_start = {
        let mut guard = inner.lock().unwrap();
        let entry = &mut guard.clips[clip_index];
        if n >= entry.cache.start() {
            entry.cache.evict_while_ahead(n, cache_behind);
        } else {
            entry.cache.clear();
        }
        if entry.cache.is_empty() {
            entry.cache.reset_to(n);
            n
        } else {
            entry.cache.end()
        }
    };

    let mut next = fetch_start;
    while next <= n {
        match upstreams[clip_index].get_frame(next) {
            Ok(frame) => {
                let mut guard = inner.lock().unwrap();
                guard.clips[clip_index].cache.push_back(frame);
            }
            Err(err) => {
                let msg = match err {
                    FetchError::Upstream(msg) => msg,
                    FetchError::AlreadyShutDown => "upstream clip reported shutdown".to_string(),
                };
                let mut guard = inner.lock().unwrap();
                guard.clips[clip_index].state = ClipState::Errored(msg);
                guard.clips[clip_index].cache.clear();
                return;
            }
        }
        next += 1;
    }
}

pub(crate) fn spawn(
    inner: Arc<Mutex<Inner>>,
    work_available: Arc<Condvar>,
    work_completed: Arc<Condvar>,
    config: FetcherConfig,
    upstreams: Vec<Box<dyn UpstreamClip + Send>>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("clipchannel-fetcher-worker".into())
        .spawn(move || {
            run(inner, work_available, work_completed, config, upstreams);
        })
        .expect("FrameFetcher: failed to spawn worker thread")
}

fn run(
    inner: Arc<Mutex<Inner>>,
    work_available: Arc<Condvar>,
    work_completed: Arc<Condvar>,
    config: FetcherConfig,
    mut upstreams: Vec<Box<dyn UpstreamClip + Send>>,
) {
    let mut local_version = inner.lock().unwrap().fetch_info.version;

    loop {
        let work = {
            let mut guard = inner.lock().unwrap();
            if guard.shutdown {
                break;
            }
            select_work(&mut guard, &mut local_version, &config)
        };

        let produced_work = !matches!(work, Work::Idle);

        match work {
            Work::Callback(cb) => cb(&mut upstreams),
            Work::Fetch { clip_index, frame_number, requested } => {
                fetch_frame(&inner, &mut upstreams, clip_index, frame_number, config.cache_behind);
                if requested {
                    let mut guard = inner.lock().unwrap();
                    guard.fetch_info.is_fetching = false;
                }
            }
            Work::Idle => {}
        }

        {
            let mut guard = inner.lock().unwrap();
            guard.work_generation = guard.work_generation.wrapping_add(1);
        }
        work_completed.notify_all();

        let wait_time = if produced_work { Duration::from_millis(10) } else { Duration::from_millis(500) };
        let guard = inner.lock().unwrap();
        let _ = work_available.wait_timeout(guard, wait_time).unwrap();
    }

    // Shutdown observed: release any consumer still parked on a completion
    // wait (spec.md §4.E, "broadcast on every condition variable").
    work_completed.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipchannel_core::{Frame, VideoInfo};

    struct ScriptedClip {
        frames: std::collections::HashMap<i32, Frame>,
    }

    impl UpstreamClip for ScriptedClip {
        fn get_frame(&mut self, n: i32) -> Result<Frame, FetchError> {
            self.frames
                .get(&n)
                .cloned()
                .ok_or_else(|| FetchError::Upstream(format!("no such frame {n}")))
        }
        fn get_parity(&mut self, n: i32) -> bool {
            n % 2 == 0
        }
        fn get_audio(&mut self, _buf: &mut [u8], _start: i64, _count: i64) -> Result<(), FetchError> {
            Ok(())
        }
        fn get_video_info(&mut self) -> VideoInfo {
            unimplemented!("not exercised by these tests")
        }
    }

    fn entry_with_cache_window(start: i32, len: i32) -> ClipEntry {
        let mut entry = ClipEntry::default();
        entry.cache.reset_to(start);
        for n in start..start + len {
            entry.cache.push_back(Frame::new(n, vec![], clipchannel_core::frame::PlaneLayout {
                pitch_y: 0, pitch_uv: 0, offset_u: 0, offset_v: 0, total_len: 0,
            }));
        }
        entry
    }

    #[test]
    fn select_work_prefers_callback_over_everything() {
        let mut inner = Inner {
            clips: vec![ClipEntry::default()],
            fetch_info: FetchRequest { version: 1, ..Default::default() },
            worker_callback: Some(Box::new(|_| {})),
            shutdown: false,
            work_generation: 0,
        };
        let mut local_version = 0;
        let config = FetcherConfig::new(4, 1);
        match select_work(&mut inner, &mut local_version, &config) {
            Work::Callback(_) => {}
            _ => panic!("expected callback to win priority"),
        }
    }

    #[test]
    fn select_work_picks_on_demand_request_over_prefetch() {
        let mut inner = Inner {
            clips: vec![entry_with_cache_window(0, 1)],
            fetch_info: FetchRequest { version: 5, clip_index: 0, frame_number: 9, is_fetching: true },
            worker_callback: None,
            shutdown: false,
            work_generation: 0,
        };
        let mut local_version = 0;
        let config = FetcherConfig::new(4, 1);
        match select_work(&mut inner, &mut local_version, &config) {
            Work::Fetch { clip_index, frame_number, requested } => {
                assert_eq!(clip_index, 0);
                assert_eq!(frame_number, 9);
                assert!(requested);
            }
            _ => panic!("expected on-demand fetch"),
        }
        assert_eq!(local_version, 5);
    }

    #[test]
    fn select_work_prefetches_clip_with_most_cache_space() {
        let starved = entry_with_cache_window(0, 0); // cache_space = 4
        let nearly_full = entry_with_cache_window(0, 3); // cache_space = 1
        let mut inner = Inner {
            clips: vec![nearly_full, starved],
            fetch_info: FetchRequest::default(),
            worker_callback: None,
            shutdown: false,
            work_generation: 0,
        };
        let mut local_version = 0;
        let config = FetcherConfig::new(4, 1);
        match select_work(&mut inner, &mut local_version, &config) {
            Work::Fetch { clip_index, requested, .. } => {
                assert_eq!(clip_index, 1);
                assert!(!requested);
            }
            _ => panic!("expected a prefetch candidate"),
        }
    }

    #[test]
    fn select_work_skips_errored_clips() {
        let mut errored = entry_with_cache_window(0, 0);
        errored.state = ClipState::Errored("boom".into());
        let mut inner = Inner {
            clips: vec![errored],
            fetch_info: FetchRequest::default(),
            worker_callback: None,
            shutdown: false,
            work_generation: 0,
        };
        let mut local_version = 0;
        let config = FetcherConfig::new(4, 1);
        match select_work(&mut inner, &mut local_version, &config) {
            Work::Idle => {}
            _ => panic!("errored clip must never be selected for prefetch"),
        }
    }

    #[test]
    fn fetch_frame_populates_cache_and_records_sticky_error() {
        let inner = Mutex::new(Inner {
            clips: vec![ClipEntry::default()],
            fetch_info: FetchRequest::default(),
            worker_callback: None,
            shutdown: false,
            work_generation: 0,
        });
        inner.lock().unwrap().clips[0].cache.reset_to(0);

        let layout = clipchannel_core::frame::PlaneLayout {
            pitch_y: 1, pitch_uv: 0, offset_u: 0, offset_v: 0, total_len: 1,
        };
        let mut frames = std::collections::HashMap::new();
        frames.insert(0, Frame::new(0, vec![std::sync::Arc::from(vec![0u8])], layout));
        // frame 1 deliberately missing — upstream will error on it.
        let mut upstreams: Vec<Box<dyn UpstreamClip + Send>> = vec![Box::new(ScriptedClip { frames })];

        fetch_frame(&inner, &mut upstreams, 0, 1, 1);

        let guard = inner.lock().unwrap();
        assert!(guard.clips[0].state.is_errored());
        assert!(guard.clips[0].cache.is_empty());
    }
}
