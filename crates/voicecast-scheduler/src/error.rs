//! Error types for the playback scheduler

use thiserror::Error;
use voicecast_proto::protocol::{PlayType, RelayRequest};

use crate::voice::VoiceChannelId;

/// Errors reported to callers of `PlaybackScheduler`
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Admission rejected because another source kind holds the scheduler
    #[error("cannot start {requested} playback while {active} is active")]
    IncompatibleMode { requested: PlayType, active: PlayType },

    /// Connecting to or moving between voice channels failed
    #[error("voice unavailable: {0}")]
    VoiceUnavailable(#[from] VoiceError),

    /// Catalog too sparse for a random playlist
    #[error("only {found} distinct songs available, {threshold} required")]
    NotEnoughSongs { found: usize, threshold: usize },

    #[error("repeat cannot be changed during {0} playback")]
    RepeatUnavailable(PlayType),

    #[error("catalog query failed: {0}")]
    Catalog(anyhow::Error),

    /// A sampled (title, artist) pair no longer resolves to a catalog row
    #[error("no catalog row for \"{title}\" by {artist}")]
    NoCatalogMatch { title: String, artist: String },

    /// The consume task is gone (after `cleanup()`)
    #[error("scheduler has shut down")]
    Stopped,
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failures of the external voice-connection capability
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VoiceError {
    #[error("could not connect to voice channel {channel}: {reason}")]
    Connect {
        channel: VoiceChannelId,
        reason: String,
    },

    #[error("could not move to voice channel {channel}: {reason}")]
    Move {
        channel: VoiceChannelId,
        reason: String,
    },

    #[error("could not start playback: {0}")]
    Play(String),
}

/// Delivery failure on the relay event channel.  Logged by the scheduler,
/// never surfaced to the admission caller.
#[derive(Debug, Error)]
#[error("relay request {request:?} not delivered: {reason}")]
pub struct RelayRequestFailed {
    pub request: RelayRequest,
    pub reason: String,
}

/// Why the consume loop dropped a dequeued item without playing it
#[derive(Debug, Error)]
pub(crate) enum DiscardReason {
    #[error("no voice channel")]
    NoVoiceChannel,

    #[error("{item} item does not match {mode} mode")]
    ModeMismatch { item: &'static str, mode: PlayType },

    #[error("live stream has no relay url")]
    MissingRelayUrl,

    #[error("audio source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("voice connection rejected the source: {0}")]
    PlaybackRejected(VoiceError),

    #[error("no scheduler handles remain")]
    Detached,
}
