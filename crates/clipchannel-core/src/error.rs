// crates/clipchannel-core/src/error.rs
//
// Typed error taxonomy (spec.md §7). Callers match on kind — AlreadyShutDown
// vs. a sticky per-clip upstream message vs. ServerShutDown — so this is a
// thiserror enum rather than an opaque anyhow::Error.

use thiserror::Error;

/// Errors raised by `FrameFetcher` and the upstream clips it drives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The fetcher has begun or completed teardown.
    #[error("FrameFetcher: already shut down")]
    AlreadyShutDown,

    /// The upstream clip raised an error; sticky until teardown (spec.md §3,
    /// "Sticky error").
    #[error("{0}")]
    Upstream(String),
}

/// Errors raised by the server channel, client proxy, and shared-region
/// construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The shared region could not be mapped, or a sync primitive failed to
    /// initialize. Fatal at construction.
    #[error("ChannelInitError: {0}")]
    Init(String),

    /// The clip list supplied at construction was empty. Fatal.
    #[error("NoClips: a channel needs at least one clip")]
    NoClips,

    /// Observed by a client (or the server) at any wait point once
    /// `object_state.shutdown` is set.
    #[error("ServerShutDown: the server has begun shutting down")]
    ServerShutDown,

    /// An upstream/fetcher error surfaced through the channel.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
