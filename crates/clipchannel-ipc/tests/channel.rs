// crates/clipchannel-ipc/tests/channel.rs
//
// End-to-end exercise of the shared-memory channel: a `ServerChannel` and
// one or more `ClientProxy`s attached to the same mapped region, run as
// threads within this test process rather than separate OS processes —
// the protocol itself doesn't care which (spec.md §8, scenarios 3, 5, 6).

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use clipchannel_core::{ColorFamily, FetchError, Frame, FrameSource, SampleType, UpstreamClip, VideoInfo};
use clipchannel_ipc::{ChannelConfig, ClientProxy, FetcherConfig, ServerChannel};

struct ScriptedClip {
    width: u32,
    height: u32,
    frame_count: i32,
    fetched: Arc<Mutex<Vec<i32>>>,
    slow_at: Option<i32>,
}

impl UpstreamClip for ScriptedClip {
    fn get_frame(&mut self, n: i32) -> Result<Frame, FetchError> {
        self.fetched.lock().unwrap().push(n);
        if n < 0 || n >= self.frame_count {
            return Err(FetchError::Upstream(format!("frame {n} out of range")));
        }
        if self.slow_at == Some(n) {
            std::thread::sleep(Duration::from_millis(300));
        }
        let layout = clipchannel_core::frame::PlaneLayout {
            pitch_y: self.width as usize,
            pitch_uv: 0,
            offset_u: 0,
            offset_v: 0,
            total_len: (self.width * self.height) as usize,
        };
        let bytes = vec![(n % 251) as u8; layout.total_len];
        Ok(Frame::new(n, vec![std::sync::Arc::from(bytes)], layout))
    }

    fn get_parity(&mut self, n: i32) -> bool {
        n % 2 == 0
    }

    fn get_audio(&mut self, _buf: &mut [u8], _start: i64, _count: i64) -> Result<(), FetchError> {
        Ok(())
    }

    fn get_video_info(&mut self) -> VideoInfo {
        VideoInfo {
            width: self.width,
            height: self.height,
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

fn scripted(frame_count: i32) -> Box<dyn UpstreamClip + Send> {
    Box::new(ScriptedClip {
        width: 4,
        height: 4,
        frame_count,
        fetched: Arc::new(Mutex::new(Vec::new())),
        slow_at: None,
    })
}

fn scripted_with_slow_frame(frame_count: i32, slow_at: i32) -> Box<dyn UpstreamClip + Send> {
    Box::new(ScriptedClip {
        width: 4,
        height: 4,
        frame_count,
        fetched: Arc::new(Mutex::new(Vec::new())),
        slow_at: Some(slow_at),
    })
}

fn frame_byte_lens(count: usize) -> Vec<usize> {
    vec![4 * 4; count]
}

#[test]
fn sequential_playback_round_trips_pixel_content() {
    let config = ChannelConfig::new("channel-test-sequential", 4).unwrap();
    let server = ServerChannel::new(vec![scripted(50)], config.clone(), FetcherConfig::new(8, 2)).unwrap();
    let client = ClientProxy::open(&config, 0, &frame_byte_lens(1)).unwrap();

    for n in 0..10 {
        let frame = client.get_frame(n).unwrap();
        assert_eq!(frame.frame_number, n);
        assert_eq!(frame.plane(0).unwrap(), &vec![(n % 251) as u8; 16][..]);
    }

    drop(client);
    drop(server);
}

#[test]
fn parity_round_trips_through_the_channel() {
    let config = ChannelConfig::new("channel-test-parity", 4).unwrap();
    let server = ServerChannel::new(vec![scripted(20)], config.clone(), FetcherConfig::new(4, 1)).unwrap();
    let client = ClientProxy::open(&config, 0, &frame_byte_lens(1)).unwrap();

    assert!(client.get_parity(4).unwrap());
    assert!(!client.get_parity(5).unwrap());

    drop(client);
    drop(server);
}

#[test]
fn two_clips_are_served_independently_over_one_channel() {
    let config = ChannelConfig::new("channel-test-two-clips", 4).unwrap();
    let server =
        ServerChannel::new(vec![scripted(20), scripted(20)], config.clone(), FetcherConfig::new(4, 1)).unwrap();
    let client_a = ClientProxy::open(&config, 0, &frame_byte_lens(2)).unwrap();
    let client_b = ClientProxy::open(&config, 1, &frame_byte_lens(2)).unwrap();

    let frame_a = client_a.get_frame(3).unwrap();
    let frame_b = client_b.get_frame(7).unwrap();
    assert_eq!(frame_a.frame_number, 3);
    assert_eq!(frame_b.frame_number, 7);

    drop(client_a);
    drop(client_b);
    drop(server);
}

#[test]
fn speculative_prefetch_eventually_fills_the_next_slot() {
    let config = ChannelConfig::new("channel-test-prefetch", 8).unwrap();
    let server = ServerChannel::new(vec![scripted(50)], config.clone(), FetcherConfig::new(8, 2)).unwrap();
    let client = ClientProxy::open(&config, 0, &frame_byte_lens(1)).unwrap();

    client.get_frame(0).unwrap();
    // Give the fetcher's idle-scan worker and the server's speculative
    // publish a moment to run ahead of the next explicit request.
    std::thread::sleep(Duration::from_millis(200));
    let frame = client.get_frame(1).unwrap();
    assert_eq!(frame.frame_number, 1);

    drop(client);
    drop(server);
}

#[test]
fn shutdown_releases_a_client_blocked_on_the_channel() {
    let config = ChannelConfig::new("channel-test-shutdown", 4).unwrap();
    let server =
        ServerChannel::new(vec![scripted_with_slow_frame(5, 3)], config.clone(), FetcherConfig::new(4, 1)).unwrap();
    let client = Arc::new(ClientProxy::open(&config, 0, &frame_byte_lens(1)).unwrap());

    client.get_frame(0).unwrap();

    let waiter = Arc::clone(&client);
    let handle = std::thread::spawn(move || waiter.get_frame(3));

    // Give the request time to reach the dispatcher and enter the slow
    // upstream fetch before tearing the server down underneath it.
    std::thread::sleep(Duration::from_millis(50));
    drop(server);

    let result = handle.join().unwrap();
    assert!(result.is_err());
}
