//! PlaybackScheduler: a single-owner task that serializes queued audio onto
//! one voice connection.
//!
//! ```text
//!   PlaybackScheduler (handle, Clone)
//!         │  Envelope::Request(..) + oneshot reply
//!         ▼
//!   SchedulerTask::run ◀── Envelope::Completed(token) ── CompletionSignal
//!         │
//!         ├── queue: VecDeque<QueuedItem>
//!         ├── mode:  Idle | File | Live { pending } | Random(ctx)
//!         └── connection: Box<dyn VoiceConnection>
//! ```
//!
//! Requests and completions share one channel, so a "track ended" signal is
//! always handled before any request sent after it.  The loop starts the next
//! queued item whenever nothing is playing, and otherwise waits.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use voicecast_proto::catalog::CatalogEntry;
use voicecast_proto::protocol::{PlayType, RelayRequest, TransportHint};

use crate::catalog::Catalog;
use crate::error::{DiscardReason, Result, SchedulerError};
use crate::item::{LiveStream, QueuedItem};
use crate::relay::EventChannel;
use crate::sampler::{PlaylistContext, PlaylistSampler, PLAYLIST_BATCH};
use crate::voice::{
    AudioSource, CompletionSignal, Gain, SourceInput, VoiceChannelId, VoiceConnection,
    VoiceConnector,
};

/// Maximum length of the `recent` list.
pub const RECENT_LIMIT: usize = 10;

/// Consecutive discarded playlist items that still draw a replacement.
pub const MAX_DISCARD_REFILLS: usize = 10;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Initial gain, clamped to `[0.0, 1.0]`.
    pub volume: f32,
    /// Transport requested from the relay for live channels.
    pub transport: TransportHint,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            volume: 0.25,
            transport: TransportHint::default(),
        }
    }
}

/// Read-only snapshot of the scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStatus {
    pub play_type: PlayType,
    pub current: Option<QueuedItem>,
    /// Most recent first.  The playing file item is at index 0.
    pub recent: Vec<CatalogEntry>,
    /// File items still queued, in play order.
    pub upcoming: Vec<CatalogEntry>,
    /// Items of any kind still queued.
    pub queued: usize,
    pub repeat: bool,
    pub volume: f32,
    pub is_playing: bool,
    pub voice_channel: Option<VoiceChannelId>,
    /// Live channel reserved while waiting for the relay to start it.
    pub pending_live: Option<String>,
}

// ── envelope ──────────────────────────────────────────────────────────────────

/// Everything the scheduler task consumes.
pub(crate) enum Envelope {
    Request(Request),
    Completed(PlaybackEnded),
}

/// Sent by a `CompletionSignal` when the source of play `token` ends.
#[derive(Debug)]
pub(crate) struct PlaybackEnded {
    pub token: u64,
    pub error: Option<String>,
}

pub(crate) enum Request {
    SetVoice {
        channel: VoiceChannelId,
        reply: oneshot::Sender<Result<()>>,
    },
    AddFile {
        entry: CatalogEntry,
        reply: oneshot::Sender<Result<()>>,
    },
    AddLiveStream {
        channel_id: String,
        url: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    AddPlaylist {
        context: PlaylistContext,
        reply: oneshot::Sender<Result<()>>,
    },
    SetVolume {
        level: f32,
        reply: oneshot::Sender<f32>,
    },
    SetRepeat {
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Skip {
        reply: oneshot::Sender<bool>,
    },
    Stop {
        disconnect: bool,
        kill_live: bool,
        reply: oneshot::Sender<()>,
    },
    Cleanup {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<SchedulerStatus>,
    },
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cheaply cloneable handle to a running scheduler task.
///
/// Every method is answered by the task in call order.  Once `cleanup()` has
/// run, calls fail with `SchedulerError::Stopped`.
#[derive(Clone)]
pub struct PlaybackScheduler {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl PlaybackScheduler {
    /// Start the consume task on the current tokio runtime.
    pub fn spawn(
        config: SchedulerConfig,
        connector: Arc<dyn VoiceConnector>,
        events: Arc<dyn EventChannel>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = SchedulerTask::new(config, connector, events, tx.downgrade());
        tokio::spawn(task.run(rx));
        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Request(make(reply)))
            .map_err(|_| SchedulerError::Stopped)?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Connect to `channel`, or move the existing connection there.
    pub async fn set_voice(&self, channel: VoiceChannelId) -> Result<()> {
        self.request(|reply| Request::SetVoice { channel, reply })
            .await?
    }

    /// Queue a catalog file.  Refused while a live stream holds the scheduler.
    pub async fn add_file(&self, entry: CatalogEntry) -> Result<()> {
        self.request(|reply| Request::AddFile { entry, reply }).await?
    }

    /// Reserve live mode for `channel_id`.
    ///
    /// Without a URL this asks the relay to start the channel and queues
    /// nothing; call again with the URL from the relay's `RelayStarted`
    /// notification to queue the playable item.
    pub async fn add_live_stream(
        &self,
        channel_id: impl Into<String>,
        url: Option<String>,
    ) -> Result<()> {
        let channel_id = channel_id.into();
        self.request(|reply| Request::AddLiveStream {
            channel_id,
            url,
            reply,
        })
        .await?
    }

    /// Start a random playlist over songs recorded on `channels`.
    pub async fn add_playlist(
        &self,
        channels: Vec<String>,
        catalog: Arc<dyn Catalog>,
        threshold: usize,
    ) -> Result<()> {
        let context = PlaylistContext::new(channels, catalog, threshold);
        self.request(|reply| Request::AddPlaylist { context, reply })
            .await?
    }

    /// Set the gain and return the clamped value that was applied.
    pub async fn set_volume(&self, level: f32) -> Result<f32> {
        self.request(|reply| Request::SetVolume { level, reply })
            .await
    }

    pub async fn volume(&self) -> Result<f32> {
        Ok(self.status().await?.volume)
    }

    pub async fn set_repeat(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Request::SetRepeat { enabled, reply })
            .await?
    }

    pub async fn repeat(&self) -> Result<bool> {
        Ok(self.status().await?.repeat)
    }

    /// End the current item.  `false` when not connected to voice.
    pub async fn skip(&self) -> Result<bool> {
        self.request(|reply| Request::Skip { reply }).await
    }

    pub async fn stop(&self, disconnect: bool, kill_live: bool) -> Result<()> {
        self.request(|reply| Request::Stop {
            disconnect,
            kill_live,
            reply,
        })
        .await
    }

    /// Stop with disconnect and end the consume task.
    pub async fn cleanup(&self) -> Result<()> {
        match self.request(|reply| Request::Cleanup { reply }).await {
            Err(SchedulerError::Stopped) => Ok(()),
            other => other,
        }
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        self.request(|reply| Request::Status { reply }).await
    }

    pub async fn is_playing(&self) -> Result<bool> {
        Ok(self.status().await?.is_playing)
    }

    pub async fn current(&self) -> Result<Option<QueuedItem>> {
        Ok(self.status().await?.current)
    }

    pub async fn recent(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.status().await?.recent)
    }

    pub async fn upcoming(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.status().await?.upcoming)
    }

    pub async fn play_type(&self) -> Result<PlayType> {
        Ok(self.status().await?.play_type)
    }
}

// ── task ──────────────────────────────────────────────────────────────────────

/// Exclusive source category, with the data each category needs.
enum Mode {
    Idle,
    File,
    Live { pending: Option<String> },
    Random(PlaylistContext),
}

impl Mode {
    fn play_type(&self) -> PlayType {
        match self {
            Mode::Idle => PlayType::None,
            Mode::File => PlayType::File,
            Mode::Live { .. } => PlayType::Live,
            Mode::Random(_) => PlayType::Random,
        }
    }
}

struct Playing {
    token: u64,
    item: QueuedItem,
}

struct SchedulerTask {
    connector: Arc<dyn VoiceConnector>,
    events: Arc<dyn EventChannel>,
    transport: TransportHint,
    /// Mints completion signals without keeping the channel open.
    self_tx: mpsc::WeakUnboundedSender<Envelope>,
    connection: Option<Box<dyn VoiceConnection>>,
    mode: Mode,
    queue: VecDeque<QueuedItem>,
    upcoming: VecDeque<CatalogEntry>,
    recent: VecDeque<CatalogEntry>,
    playing: Option<Playing>,
    next_token: u64,
    /// Playlist items discarded since the last one that played.
    discards: usize,
    repeat: bool,
    gain: Gain,
    shutdown: bool,
}

impl SchedulerTask {
    fn new(
        config: SchedulerConfig,
        connector: Arc<dyn VoiceConnector>,
        events: Arc<dyn EventChannel>,
        self_tx: mpsc::WeakUnboundedSender<Envelope>,
    ) -> Self {
        Self {
            connector,
            events,
            transport: config.transport,
            self_tx,
            connection: None,
            mode: Mode::Idle,
            queue: VecDeque::new(),
            upcoming: VecDeque::new(),
            recent: VecDeque::new(),
            playing: None,
            next_token: 0,
            discards: 0,
            repeat: false,
            gain: Gain::new(config.volume),
            shutdown: false,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        debug!("scheduler: consume loop started");
        loop {
            if self.playing.is_none() {
                if let Some(item) = self.queue.pop_front() {
                    self.start(item).await;
                    continue;
                }
            }

            let Some(envelope) = rx.recv().await else {
                debug!("scheduler: all handles dropped");
                self.stop(true, true).await;
                break;
            };
            match envelope {
                Envelope::Request(request) => self.handle(request).await,
                Envelope::Completed(ended) => self.on_playback_ended(ended).await,
            }
            if self.shutdown {
                break;
            }
        }
        info!("scheduler: consume loop finished");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::SetVoice { channel, reply } => {
                let _ = reply.send(self.set_voice(channel).await);
            }
            Request::AddFile { entry, reply } => {
                let _ = reply.send(self.add_file(entry));
            }
            Request::AddLiveStream {
                channel_id,
                url,
                reply,
            } => {
                let _ = reply.send(self.add_live_stream(channel_id, url));
            }
            Request::AddPlaylist { context, reply } => {
                let _ = reply.send(self.add_playlist(context).await);
            }
            Request::SetVolume { level, reply } => {
                let applied = self.gain.set(level);
                debug!(volume = applied, "scheduler: volume set");
                let _ = reply.send(applied);
            }
            Request::SetRepeat { enabled, reply } => {
                let _ = reply.send(self.set_repeat(enabled));
            }
            Request::Skip { reply } => {
                let _ = reply.send(self.skip().await);
            }
            Request::Stop {
                disconnect,
                kill_live,
                reply,
            } => {
                self.stop(disconnect, kill_live).await;
                let _ = reply.send(());
            }
            Request::Cleanup { reply } => {
                self.stop(true, true).await;
                self.shutdown = true;
                let _ = reply.send(());
            }
            Request::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    // ── admission ─────────────────────────────────────────────────────────────

    async fn set_voice(&mut self, channel: VoiceChannelId) -> Result<()> {
        match self.connection.as_mut() {
            Some(conn) if conn.channel() == channel => Ok(()),
            Some(conn) => {
                conn.move_to(channel).await?;
                info!(%channel, "scheduler: moved voice connection");
                Ok(())
            }
            None => {
                let conn = self.connector.connect(channel).await?;
                info!(%channel, "scheduler: connected to voice");
                self.connection = Some(conn);
                Ok(())
            }
        }
    }

    fn add_file(&mut self, entry: CatalogEntry) -> Result<()> {
        match self.mode {
            Mode::Live { .. } => {
                warn!(guid = %entry.guid, "scheduler: file refused during live playback");
                return Err(SchedulerError::IncompatibleMode {
                    requested: PlayType::File,
                    active: PlayType::Live,
                });
            }
            Mode::Idle => {
                debug!("scheduler: mode idle -> file");
                self.mode = Mode::File;
            }
            Mode::File | Mode::Random(_) => {}
        }
        self.enqueue_file(entry);
        Ok(())
    }

    fn enqueue_file(&mut self, entry: CatalogEntry) {
        debug!(guid = %entry.guid, "scheduler: queued {}", entry.display_name());
        self.upcoming.push_back(entry.clone());
        self.queue.push_back(QueuedItem::File(entry));
    }

    fn add_live_stream(&mut self, channel_id: String, url: Option<String>) -> Result<()> {
        let active = self.mode.play_type();
        let resolves_pending = matches!(
            &self.mode,
            Mode::Live { pending: Some(pending) } if *pending == channel_id
        );

        match url {
            None if active == PlayType::None => {
                self.mode = Mode::Live {
                    pending: Some(channel_id.clone()),
                };
                info!(channel = %channel_id, "scheduler: live reserved, waiting for relay");
                self.send_relay(RelayRequest::StartRelay {
                    channel_id,
                    transport: self.transport,
                });
                Ok(())
            }
            Some(url) if active == PlayType::None || resolves_pending => {
                self.mode = Mode::Live { pending: None };
                info!(channel = %channel_id, %url, "scheduler: live stream queued");
                self.queue.push_back(QueuedItem::LiveStream(LiveStream {
                    channel_id,
                    url: Some(url),
                }));
                Ok(())
            }
            _ => {
                warn!(channel = %channel_id, %active, "scheduler: live stream refused");
                Err(SchedulerError::IncompatibleMode {
                    requested: PlayType::Live,
                    active,
                })
            }
        }
    }

    async fn add_playlist(&mut self, context: PlaylistContext) -> Result<()> {
        let active = self.mode.play_type();
        if active != PlayType::None {
            warn!(%active, "scheduler: playlist refused");
            return Err(SchedulerError::IncompatibleMode {
                requested: PlayType::Random,
                active,
            });
        }

        let distinct = PlaylistSampler::check(&context).await?;
        info!(
            channels = ?context.channels,
            distinct,
            "scheduler: starting random playlist"
        );
        self.mode = Mode::Random(context.clone());
        self.discards = 0;

        let mut first_error = None;
        let mut queued = 0;
        for _ in 0..PLAYLIST_BATCH {
            match PlaylistSampler::draw(&context).await {
                Ok(entry) => {
                    self.enqueue_file(entry);
                    queued += 1;
                }
                Err(e) => {
                    warn!(error = %e, "scheduler: playlist draw failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if queued == 0 => {
                self.mode = Mode::Idle;
                Err(e)
            }
            _ => Ok(()),
        }
    }

    fn set_repeat(&mut self, enabled: bool) -> Result<()> {
        match self.mode.play_type() {
            active @ (PlayType::Live | PlayType::Random) => {
                Err(SchedulerError::RepeatUnavailable(active))
            }
            _ => {
                self.repeat = enabled;
                debug!(repeat = enabled, "scheduler: repeat set");
                Ok(())
            }
        }
    }

    // ── controls ──────────────────────────────────────────────────────────────

    async fn skip(&mut self) -> bool {
        if self.connection.is_none() {
            return false;
        }
        if self.queue.is_empty() {
            debug!("scheduler: skip on last item, stopping");
            self.stop(false, true).await;
            return true;
        }
        if self.playing.is_some() {
            if let Some(conn) = self.connection.as_mut() {
                conn.stop().await;
            }
        }
        true
    }

    /// Drop everything queued and the current item.  With `disconnect`, leave
    /// voice too, asking the relay to stop first when a live stream held the
    /// scheduler and `kill_live` is set.
    async fn stop(&mut self, disconnect: bool, kill_live: bool) {
        let prior = std::mem::replace(&mut self.mode, Mode::Idle).play_type();
        self.queue.clear();
        self.upcoming.clear();
        self.recent.clear();
        self.discards = 0;

        if let Some(playing) = self.playing.take() {
            debug!(token = playing.token, "scheduler: stopping current item");
            if let Some(conn) = self.connection.as_mut() {
                conn.stop().await;
            }
        }

        if disconnect {
            if prior == PlayType::Live && kill_live {
                self.send_relay(RelayRequest::KillRelay);
            }
            if let Some(mut conn) = self.connection.take() {
                conn.disconnect().await;
                info!(channel = %conn.channel(), "scheduler: left voice");
            }
        }
        if prior != PlayType::None {
            debug!(%prior, disconnect, "scheduler: stopped");
        }
    }

    fn send_relay(&self, request: RelayRequest) {
        if let Err(e) = self.events.send(request) {
            warn!(error = %e, "scheduler: relay request dropped");
        }
    }

    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            play_type: self.mode.play_type(),
            current: self.playing.as_ref().map(|p| p.item.clone()),
            recent: self.recent.iter().cloned().collect(),
            upcoming: self.upcoming.iter().cloned().collect(),
            queued: self.queue.len(),
            repeat: self.repeat,
            volume: self.gain.get(),
            is_playing: self.is_playing(),
            voice_channel: self.connection.as_ref().map(|c| c.channel()),
            pending_live: match &self.mode {
                Mode::Live { pending } => pending.clone(),
                _ => None,
            },
        }
    }

    fn is_playing(&self) -> bool {
        match (&self.connection, &self.playing) {
            (Some(conn), Some(_)) => conn.is_playing(),
            _ => false,
        }
    }

    // ── consume loop ──────────────────────────────────────────────────────────

    async fn start(&mut self, item: QueuedItem) {
        if item.file().is_some() {
            self.upcoming.pop_front();
        }
        let name = item.display_name();
        match self.begin(item).await {
            Ok(token) => {
                self.discards = 0;
                debug!(token, "scheduler: playing {}", name);
            }
            Err(reason) => {
                warn!(%reason, "scheduler: discarded {}", name);
                self.after_discard().await;
            }
        }
    }

    /// Keep a playlist topped up past unplayable rows, and end it once the
    /// queue runs dry with nothing left to draw.
    async fn after_discard(&mut self) {
        let context = match &self.mode {
            Mode::Random(context) => context.clone(),
            _ => return,
        };
        self.discards += 1;
        if self.discards <= MAX_DISCARD_REFILLS && self.queue.len() < PLAYLIST_BATCH {
            match PlaylistSampler::draw(&context).await {
                Ok(entry) => self.enqueue_file(entry),
                Err(e) => warn!(error = %e, "scheduler: playlist refill failed"),
            }
        }
        if self.queue.is_empty() {
            warn!(
                discards = self.discards,
                "scheduler: playlist has nothing playable, ending it"
            );
            self.mode = Mode::Idle;
            self.upcoming.clear();
            self.discards = 0;
        }
    }

    async fn begin(&mut self, item: QueuedItem) -> std::result::Result<u64, DiscardReason> {
        if self.connection.is_none() {
            return Err(DiscardReason::NoVoiceChannel);
        }
        let mode = self.mode.play_type();
        if !item.is_compatible_with(mode) {
            return Err(DiscardReason::ModeMismatch {
                item: item.kind_label(),
                mode,
            });
        }
        let input = source_input(&item).await?;
        let tx = self.self_tx.upgrade().ok_or(DiscardReason::Detached)?;
        let conn = self
            .connection
            .as_mut()
            .ok_or(DiscardReason::NoVoiceChannel)?;

        self.next_token += 1;
        let token = self.next_token;
        let source = AudioSource {
            input,
            gain: self.gain.clone(),
        };
        conn.play(source, CompletionSignal::new(token, tx))
            .await
            .map_err(DiscardReason::PlaybackRejected)?;

        if let QueuedItem::File(entry) = &item {
            self.recent.push_front(entry.clone());
            self.recent.truncate(RECENT_LIMIT);
        }
        self.playing = Some(Playing { token, item });
        Ok(token)
    }

    async fn on_playback_ended(&mut self, ended: PlaybackEnded) {
        let playing = match self.playing.take() {
            Some(playing) if playing.token == ended.token => playing,
            other => {
                self.playing = other;
                debug!(token = ended.token, "scheduler: ignoring stale completion");
                return;
            }
        };

        match ended.error {
            Some(error) => warn!(token = ended.token, %error, "scheduler: playback ended with error"),
            None => debug!(token = ended.token, "scheduler: playback finished"),
        }

        match &self.mode {
            Mode::Random(context) if self.queue.len() < PLAYLIST_BATCH => {
                let context = context.clone();
                match PlaylistSampler::draw(&context).await {
                    Ok(entry) => self.enqueue_file(entry),
                    Err(e) => warn!(error = %e, "scheduler: playlist refill failed"),
                }
            }
            Mode::File if self.repeat => match playing.item {
                QueuedItem::File(entry) => self.enqueue_file(entry),
                QueuedItem::LiveStream(_) => {
                    warn!("scheduler: cannot repeat a live stream");
                }
            },
            _ => {}
        }
    }
}

/// Bind the input a queued item plays from.  Files must still exist.
async fn source_input(item: &QueuedItem) -> std::result::Result<SourceInput, DiscardReason> {
    match item {
        QueuedItem::LiveStream(live) => {
            let url = live.relay_url().ok_or(DiscardReason::MissingRelayUrl)?;
            Ok(SourceInput::LiveStream {
                url: url.to_string(),
            })
        }
        QueuedItem::File(entry) => {
            tokio::fs::metadata(&entry.file_path).await.map_err(|e| {
                DiscardReason::SourceUnavailable(format!("{}: {}", entry.file_path.display(), e))
            })?;
            Ok(SourceInput::File(entry.file_path.clone()))
        }
    }
}
