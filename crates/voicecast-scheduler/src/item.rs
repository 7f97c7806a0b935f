//! Schedulable units of audio.

pub use voicecast_proto::catalog::{CatalogEntry, CatalogKind};
pub use voicecast_proto::protocol::PlayType;

/// A live channel and, once the relay has started it, the URL to read from.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveStream {
    pub channel_id: String,
    pub url: Option<String>,
}

impl LiveStream {
    /// Resolved relay URL.  An empty string counts as "relay not started".
    pub fn relay_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.is_empty())
    }
}

/// One entry of the play queue: a catalog file or a live-stream descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedItem {
    File(CatalogEntry),
    LiveStream(LiveStream),
}

impl QueuedItem {
    pub fn live(channel_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::LiveStream(LiveStream {
            channel_id: channel_id.into(),
            url: Some(url.into()),
        })
    }

    pub fn file(&self) -> Option<&CatalogEntry> {
        match self {
            Self::File(entry) => Some(entry),
            Self::LiveStream(_) => None,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::File(entry) => entry.display_name(),
            Self::LiveStream(live) => format!("live channel {}", live.channel_id),
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::LiveStream(_) => "live stream",
        }
    }

    /// Whether this item may play while the scheduler is in `mode`.
    /// Random playlists are made of file items.
    pub fn is_compatible_with(&self, mode: PlayType) -> bool {
        matches!(
            (self, mode),
            (Self::File(_), PlayType::File | PlayType::Random)
                | (Self::LiveStream(_), PlayType::Live)
        )
    }
}
