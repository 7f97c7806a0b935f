//! Queue-driven playback scheduler for one outbound voice stream.
//!
//! Files, relayed live channels and random playlists share a single voice
//! connection; only one source category is active at a time.

pub mod catalog;
pub mod error;
pub mod item;
pub mod relay;
pub mod sampler;
pub mod scheduler;
pub mod voice;

pub use catalog::{Catalog, MemoryCatalog, SongKey};
pub use error::{RelayRequestFailed, Result, SchedulerError, VoiceError};
pub use item::{CatalogEntry, CatalogKind, LiveStream, PlayType, QueuedItem};
pub use relay::EventChannel;
pub use sampler::{
    PlaylistContext, PlaylistSampler, DEFAULT_ACTIVATION_THRESHOLD, PLAYLIST_BATCH,
};
pub use scheduler::{
    PlaybackScheduler, SchedulerConfig, SchedulerStatus, MAX_DISCARD_REFILLS, RECENT_LIMIT,
};
pub use voice::{
    clamp_volume, AudioSource, CompletionSignal, Gain, SourceInput, VoiceChannelId,
    VoiceConnection, VoiceConnector,
};
