// crates/clipchannel-core/src/lib.rs
//
// Data model shared by clipchannel-fetcher and clipchannel-ipc: the clip
// and frame types, the host-facing traits, config, and the error taxonomy.
// No threading, no shared memory — just plain data and contracts.

pub mod clip;
pub mod config;
pub mod error;
pub mod frame;
pub mod video_info;

pub use clip::{FrameSource, UpstreamClip};
pub use config::{ChannelConfig, ConfigError, FetcherConfig};
pub use error::{ChannelError, FetchError};
pub use frame::{Frame, PlaneLayout};
pub use video_info::{ColorFamily, SampleType, VideoInfo};
