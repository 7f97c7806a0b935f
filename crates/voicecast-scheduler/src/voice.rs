//! The voice-connection capability the scheduler plays through.
//!
//! The scheduler never builds a connection itself: it asks a
//! [`VoiceConnector`] for one on the first `set_voice` and owns the returned
//! [`VoiceConnection`] exclusively until `stop(disconnect = true)`.
//!
//! ```text
//!   scheduler task ── play(source, signal) ──▶ connection
//!         ▲                                        │
//!         └──── Envelope::Completed(token) ◀── signal.complete()
//!                                                  (any thread)
//! ```

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::error::VoiceError;
use crate::scheduler::{Envelope, PlaybackEnded};

/// Identity of a voice channel on the chat platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceChannelId(pub u64);

impl fmt::Display for VoiceChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for VoiceChannelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ── audio sources ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SourceInput {
    /// A catalog file on local disk.
    File(PathBuf),
    /// Continuous low-latency transport stream served by the relay.
    LiveStream { url: String },
}

/// What the connection is asked to play: an input plus a live gain handle.
#[derive(Debug, Clone)]
pub struct AudioSource {
    pub input: SourceInput,
    pub gain: Gain,
}

impl AudioSource {
    pub fn is_live(&self) -> bool {
        matches!(self.input, SourceInput::LiveStream { .. })
    }
}

/// Clamp a requested volume into `[0.0, 1.0]`.  NaN reads as silence.
pub fn clamp_volume(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

/// Shared gain cell.  The scheduler writes it, connections read or subscribe
/// and apply changes to the running source without restarting it.
#[derive(Debug, Clone)]
pub struct Gain {
    tx: Arc<watch::Sender<f32>>,
}

impl Gain {
    pub fn new(level: f32) -> Self {
        let (tx, _rx) = watch::channel(clamp_volume(level));
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> f32 {
        *self.tx.borrow()
    }

    /// Store a clamped level and return it.
    pub fn set(&self, level: f32) -> f32 {
        let level = clamp_volume(level);
        self.tx.send_replace(level);
        level
    }

    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.tx.subscribe()
    }
}

// ── completion ────────────────────────────────────────────────────────────────

/// One-shot "this source has ended" notification handed to
/// [`VoiceConnection::play`].
///
/// Firing only enqueues a message for the scheduler task, so it is safe from
/// any thread or callback context and never blocks.  A signal dropped without
/// being fired reports a failed playback, so a connection that loses track
/// of its source cannot wedge the consume loop.
pub struct CompletionSignal {
    token: u64,
    tx: Option<mpsc::UnboundedSender<Envelope>>,
}

impl CompletionSignal {
    pub(crate) fn new(token: u64, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            token,
            tx: Some(tx),
        }
    }

    /// Identifies the play this signal belongs to.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// The source reached its end (or was stopped).
    pub fn complete(mut self) {
        self.fire(None);
    }

    /// The source ended because of an error.
    pub fn fail(mut self, reason: impl Into<String>) {
        self.fire(Some(reason.into()));
    }

    fn fire(&mut self, error: Option<String>) {
        if let Some(tx) = self.tx.take() {
            // The scheduler may already be gone; nothing is waiting then.
            let _ = tx.send(Envelope::Completed(PlaybackEnded {
                token: self.token,
                error,
            }));
        }
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        self.fire(Some("completion signal dropped".to_string()));
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("token", &self.token)
            .field("armed", &self.tx.is_some())
            .finish()
    }
}

// ── capability traits ─────────────────────────────────────────────────────────

/// Opens voice connections.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(&self, channel: VoiceChannelId)
        -> Result<Box<dyn VoiceConnection>, VoiceError>;
}

/// A live link to one voice channel.
#[async_trait]
pub trait VoiceConnection: Send {
    fn channel(&self) -> VoiceChannelId;

    async fn move_to(&mut self, channel: VoiceChannelId) -> Result<(), VoiceError>;

    /// True while a source is producing audio.
    fn is_playing(&self) -> bool;

    /// Start `source`.  `signal` must be fired exactly once when it ends,
    /// whether naturally, by error, or through [`VoiceConnection::stop`].
    /// On `Err` the connection may simply drop the signal.  Its drop-time
    /// failure carries a token the scheduler never recorded as playing, so
    /// it is ignored.
    async fn play(&mut self, source: AudioSource, signal: CompletionSignal)
        -> Result<(), VoiceError>;

    /// End the current source immediately and fire its signal.
    async fn stop(&mut self);

    async fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_volume() {
        assert_eq!(clamp_volume(-0.3), 0.0);
        assert_eq!(clamp_volume(1.7), 1.0);
        assert_eq!(clamp_volume(0.4), 0.4);
        assert_eq!(clamp_volume(f32::NAN), 0.0);
    }

    #[tokio::test]
    async fn test_gain_notifies_subscribers() {
        let gain = Gain::new(0.25);
        let mut rx = gain.subscribe();
        assert_eq!(gain.clone().set(2.0), 1.0);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1.0);
        assert_eq!(gain.get(), 1.0);
    }

    #[test]
    fn test_gain_set_without_subscribers() {
        let gain = Gain::new(0.5);
        gain.set(0.1);
        assert_eq!(gain.get(), 0.1);
    }

    #[test]
    fn test_is_live() {
        let gain = Gain::new(0.5);
        let live = AudioSource {
            input: SourceInput::LiveStream {
                url: "udp://127.0.0.1:9000".to_string(),
            },
            gain: gain.clone(),
        };
        let file = AudioSource {
            input: SourceInput::File(PathBuf::from("/music/a.mp3")),
            gain,
        };
        assert!(live.is_live());
        assert!(!file.is_live());
    }

    #[tokio::test]
    async fn test_signal_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let signal = CompletionSignal::new(7, tx);
        signal.complete();
        match rx.recv().await {
            Some(Envelope::Completed(ended)) => {
                assert_eq!(ended.token, 7);
                assert!(ended.error.is_none());
            }
            _ => panic!("expected a completion"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_signal_reports_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(CompletionSignal::new(3, tx));
        match rx.recv().await {
            Some(Envelope::Completed(ended)) => {
                assert_eq!(ended.token, 3);
                assert!(ended.error.is_some());
            }
            _ => panic!("expected a completion"),
        }
    }
}
