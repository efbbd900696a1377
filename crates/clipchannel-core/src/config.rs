// crates/clipchannel-core/src/config.rs
//
// Construction-time configuration, validated at the boundary rather than
// panicking deep inside the fetcher or channel — the style used by
// ProjectState::add_to_library in the teacher (validate once, on the way in).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("slot_count must be non-zero")]
    ZeroSlotCount,
    #[error("port must not be empty")]
    EmptyPort,
}

/// Configuration for a `FrameFetcher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetcherConfig {
    /// Upper bound on cached frames per clip. Clamped to `cache_behind + 1`
    /// at construction (spec.md §4.B).
    pub max_cache_frames: u32,
    /// Frames behind `last_requested_frame` retained for backward seeks.
    pub cache_behind: u32,
    /// Optional watchdog on `GetFrame`'s retry loop (spec.md §9, open
    /// question: the original leaves this unbounded). `None` reproduces the
    /// original's unbounded wait.
    pub max_wait: Option<Duration>,
}

impl FetcherConfig {
    pub fn new(max_cache_frames: u32, cache_behind: u32) -> Self {
        Self {
            max_cache_frames: max_cache_frames.max(cache_behind + 1),
            cache_behind,
            max_wait: None,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

/// Configuration for a shared-memory channel (server + clients).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Suffix of the shared-memory mapping key (spec.md §6: `"LOCAL"` scope
    /// plus this port identifier).
    pub port: String,
    /// Per-clip response-slot count; `frame_number mod slot_count` selects a
    /// slot (spec.md §4.A).
    pub slot_count: u32,
}

impl ChannelConfig {
    pub fn new(port: impl Into<String>, slot_count: u32) -> Result<Self, ConfigError> {
        let port = port.into();
        if port.is_empty() {
            return Err(ConfigError::EmptyPort);
        }
        if slot_count == 0 {
            return Err(ConfigError::ZeroSlotCount);
        }
        Ok(Self { port, slot_count })
    }

    /// The shared-memory object name (spec.md §6: mapping key).
    pub fn shared_memory_name(&self) -> String {
        format!("/clipchannel-LOCAL-{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_cache_frames_clamped_to_cache_behind_plus_one() {
        let cfg = FetcherConfig::new(1, 4);
        assert_eq!(cfg.max_cache_frames, 5);
    }

    #[test]
    fn max_cache_frames_left_alone_when_already_large_enough() {
        let cfg = FetcherConfig::new(8, 2);
        assert_eq!(cfg.max_cache_frames, 8);
    }

    #[test]
    fn channel_config_rejects_empty_port() {
        assert_eq!(ChannelConfig::new("", 4), Err(ConfigError::EmptyPort));
    }

    #[test]
    fn channel_config_rejects_zero_slots() {
        assert_eq!(ChannelConfig::new("9000", 0), Err(ConfigError::ZeroSlotCount));
    }

    #[test]
    fn shared_memory_name_includes_port() {
        let cfg = ChannelConfig::new("9000", 4).unwrap();
        assert_eq!(cfg.shared_memory_name(), "/clipchannel-LOCAL-9000");
    }
}
