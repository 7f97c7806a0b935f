/// DaemonCore — single-owner event loop around the playback scheduler.
///
/// Client commands, relay notifications and heartbeat ticks all arrive as
/// `DaemonEvent`s.  DaemonCore is the only caller of the scheduler, so the
/// live-stream handshake with the relay process (request, start, timeout,
/// loss) is decided in one place.
///
/// After each event DaemonCore publishes a fresh `PlayerStatus` through the
/// `StateManager` and, if anything changed, broadcasts
/// `BroadcastMessage::StatusUpdated` to the control clients.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use voicecast_proto::catalog::CatalogKind;
use voicecast_proto::config::Config;
use voicecast_proto::protocol::{Broadcast, Command, PlayType, PlayerStatus, RelayEvent, RelayRequest};
use voicecast_proto::state::StateManager;
use voicecast_scheduler::{
    Catalog, EventChannel, MemoryCatalog, PlaybackScheduler, SchedulerConfig, SchedulerStatus,
    VoiceChannelId, VoiceConnector,
};

use crate::BroadcastMessage;

/// Most channels a random playlist may draw from.
pub const MAX_PLAYLIST_CHANNELS: usize = 5;

/// Back-to-back restarts of a lost live stream before giving up on it.
pub const MAX_LIVE_RESTARTS: u32 = 5;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a control client and where to send its reply.
    ClientCommand(Command, oneshot::Sender<Broadcast>),
    /// Notification from the relay process.
    Relay(RelayEvent),
    /// Heartbeat — timeouts and the idle watchdog.
    HeartbeatTick,
    Shutdown,
}

/// A live channel asked of the relay and not started yet.
#[derive(Debug, Clone)]
struct PendingLive {
    channel_id: String,
    requested_at: Instant,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    config: Config,
    state_manager: Arc<StateManager>,
    catalog: Arc<MemoryCatalog>,
    connector: Arc<dyn VoiceConnector>,
    events: Arc<dyn EventChannel>,
    scheduler: PlaybackScheduler,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    pending_live: Option<PendingLive>,
    /// Channel of the live stream last handed to the scheduler.
    live_channel: Option<String>,
    backend_up: bool,
    /// Restarts since the live stream last held for a whole heartbeat.
    live_restarts: u32,
    /// When the player was first seen connected with nothing to do.
    idle_since: Option<Instant>,
}

impl DaemonCore {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        config: Config,
        state_manager: Arc<StateManager>,
        catalog: Arc<MemoryCatalog>,
        connector: Arc<dyn VoiceConnector>,
        events: Arc<dyn EventChannel>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let volume = state_manager.volume().await;
        let scheduler = PlaybackScheduler::spawn(
            SchedulerConfig {
                volume,
                transport: config.relay.transport,
            },
            connector.clone(),
            events.clone(),
        );

        Self {
            config,
            state_manager,
            catalog,
            connector,
            events,
            scheduler,
            event_tx,
            broadcast_tx,
            pending_live: None,
            live_channel: None,
            backend_up: true,
            live_restarts: 0,
            idle_since: None,
        }
    }

    /// Run the core event loop.  Returns on `Shutdown` or when every sender
    /// is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                if heartbeat_tx.send(DaemonEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match event_rx.recv().await {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }
                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }
                Some(DaemonEvent::ClientCommand(cmd, reply)) => {
                    info!("DaemonCore: command {:?}", cmd);
                    let answer = self.handle_command(cmd).await;
                    let _ = reply.send(answer);
                }
                Some(DaemonEvent::Relay(event)) => {
                    self.handle_relay_event(event).await;
                }
                Some(DaemonEvent::HeartbeatTick) => {
                    self.heartbeat().await;
                }
            }
            self.publish().await;
        }

        self.scheduler.cleanup().await?;
        self.publish().await;
        Ok(())
    }

    // ── commands ──────────────────────────────────────────────────────────────

    pub async fn handle_command(&mut self, cmd: Command) -> Broadcast {
        if let Command::GetStatus = cmd {
            return Broadcast::Status {
                data: self.snapshot().await,
            };
        }
        match self.execute(cmd).await {
            Ok(message) => Broadcast::Reply { ok: true, message },
            Err(e) => {
                warn!("DaemonCore: command refused: {}", e);
                Broadcast::Reply {
                    ok: false,
                    message: e.to_string(),
                }
            }
        }
    }

    async fn execute(&mut self, cmd: Command) -> anyhow::Result<String> {
        match cmd {
            Command::Summon { voice_channel } => {
                self.scheduler.set_voice(VoiceChannelId(voice_channel)).await?;
                Ok(format!("Joined voice channel {}", voice_channel))
            }

            Command::PlaySong { guid } => self.play_file(&guid, CatalogKind::Song).await,
            Command::PlayEpisode { guid } => self.play_file(&guid, CatalogKind::Episode).await,

            Command::PlayChannel { channel_id } => {
                if !self.backend_up {
                    anyhow::bail!("The live backend is down, try again later");
                }
                let status = self.require_voice().await?;
                if status.play_type == PlayType::Live
                    && (status.pending_live.as_deref() == Some(channel_id.as_str())
                        || self.live_channel.as_deref() == Some(channel_id.as_str()))
                {
                    return Ok(format!("Already playing {}", channel_id));
                }
                if status.play_type != PlayType::None {
                    self.switch_source().await?;
                }
                self.live_restarts = 0;
                self.request_live(channel_id.clone()).await?;
                Ok(format!("Starting live channel {}", channel_id))
            }

            Command::Playlist {
                channels,
                threshold,
            } => {
                if channels.is_empty() || channels.len() > MAX_PLAYLIST_CHANNELS {
                    anyhow::bail!(
                        "A playlist needs between 1 and {} channels",
                        MAX_PLAYLIST_CHANNELS
                    );
                }
                let status = self.require_voice().await?;
                if status.play_type != PlayType::None {
                    self.switch_source().await?;
                }
                let threshold = threshold.unwrap_or(self.config.player.playlist_threshold);
                let catalog: Arc<dyn Catalog> = self.catalog.clone();
                self.scheduler
                    .add_playlist(channels.clone(), catalog, threshold)
                    .await?;
                Ok(format!("Started a random playlist from {}", channels.join(", ")))
            }

            Command::Skip => {
                if self.scheduler.play_type().await? == PlayType::Live {
                    anyhow::bail!("Cannot skip a live stream");
                }
                if self.scheduler.skip().await? {
                    Ok("Skipped".to_string())
                } else {
                    anyhow::bail!("Not connected to a voice channel")
                }
            }

            Command::Stop => {
                self.scheduler.stop(true, true).await?;
                self.forget_live();
                Ok("Stopped".to_string())
            }

            Command::Reset => {
                self.reset().await?;
                Ok("Player reset".to_string())
            }

            Command::Volume { value: None } => {
                let volume = self.scheduler.volume().await?;
                Ok(format!("Volume is {}%", percent(volume)))
            }
            Command::Volume { value: Some(value) } => {
                let applied = self.scheduler.set_volume(value).await?;
                Ok(format!("Volume set to {}%", percent(applied)))
            }

            Command::Repeat { enabled: None } => {
                let repeat = self.scheduler.repeat().await?;
                Ok(format!("Repeat is {}", if repeat { "on" } else { "off" }))
            }
            Command::Repeat {
                enabled: Some(enabled),
            } => {
                self.scheduler.set_repeat(enabled).await?;
                Ok(format!("Repeat {}", if enabled { "enabled" } else { "disabled" }))
            }

            Command::GetStatus => Ok(String::new()),
        }
    }

    async fn play_file(&mut self, guid: &str, kind: CatalogKind) -> anyhow::Result<String> {
        let entry = self
            .catalog
            .lookup(guid, kind)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Nothing in the catalog with id {}", guid))?;
        if !tokio::fs::try_exists(&entry.file_path).await.unwrap_or(false) {
            anyhow::bail!("The file for {} no longer exists", entry.display_name());
        }

        let status = self.require_voice().await?;
        if matches!(status.play_type, PlayType::Live | PlayType::Random) {
            self.switch_source().await?;
        }
        let name = entry.display_name();
        self.scheduler.add_file(entry).await?;
        Ok(format!("Queued {}", name))
    }

    async fn require_voice(&self) -> anyhow::Result<SchedulerStatus> {
        let status = self.scheduler.status().await?;
        if status.voice_channel.is_none() {
            anyhow::bail!("Not in a voice channel, summon the player first");
        }
        Ok(status)
    }

    /// End the current source but stay in voice.
    async fn switch_source(&mut self) -> anyhow::Result<()> {
        debug!("DaemonCore: switching source kind");
        self.scheduler.stop(false, true).await?;
        self.forget_live();
        Ok(())
    }

    async fn request_live(&mut self, channel_id: String) -> anyhow::Result<()> {
        self.scheduler.add_live_stream(channel_id.clone(), None).await?;
        self.live_channel = Some(channel_id.clone());
        self.pending_live = Some(PendingLive {
            channel_id,
            requested_at: Instant::now(),
        });
        Ok(())
    }

    fn forget_live(&mut self) {
        self.pending_live = None;
        self.live_channel = None;
    }

    /// Drop the scheduler and start a fresh one, keeping the volume.
    async fn reset(&mut self) -> anyhow::Result<()> {
        let volume = self.scheduler.volume().await.unwrap_or(self.config.player.default_volume);
        self.scheduler.cleanup().await?;
        self.forget_live();
        self.idle_since = None;
        self.scheduler = PlaybackScheduler::spawn(
            SchedulerConfig {
                volume,
                transport: self.config.relay.transport,
            },
            self.connector.clone(),
            self.events.clone(),
        );
        info!("DaemonCore: scheduler replaced");
        Ok(())
    }

    // ── relay events ──────────────────────────────────────────────────────────

    pub async fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::RelayStarted { channel_id, url } => {
                let Some(pending) = self.pending_live.take() else {
                    debug!("DaemonCore: relay started {} with nothing pending", channel_id);
                    return;
                };
                if pending.channel_id != channel_id {
                    info!(
                        "DaemonCore: relay started {}, waiting for {}",
                        channel_id, pending.channel_id
                    );
                    self.pending_live = Some(pending);
                    return;
                }
                info!(
                    "DaemonCore: relay started {} after {:?}",
                    channel_id,
                    pending.requested_at.elapsed()
                );
                if let Err(e) = self.scheduler.add_live_stream(channel_id, Some(url)).await {
                    warn!("DaemonCore: live stream not queued: {}", e);
                    self.live_channel = None;
                }
            }
            RelayEvent::RelayKilled => {
                match self.scheduler.play_type().await {
                    Ok(PlayType::Live) => {
                        info!("DaemonCore: relay stopped, ending live playback");
                        if let Err(e) = self.scheduler.stop(false, false).await {
                            error!("DaemonCore: stop failed: {}", e);
                        }
                        self.forget_live();
                    }
                    Ok(_) => debug!("DaemonCore: relay stopped, nothing live"),
                    Err(e) => error!("DaemonCore: scheduler unavailable: {}", e),
                }
            }
            RelayEvent::BackendConnectivityChanged { is_up } => {
                if is_up != self.backend_up {
                    if is_up {
                        info!("DaemonCore: live backend is back");
                    } else {
                        warn!("DaemonCore: live backend went down");
                    }
                }
                self.backend_up = is_up;
            }
        }
    }

    // ── heartbeat ─────────────────────────────────────────────────────────────

    pub async fn heartbeat(&mut self) {
        let status = match self.scheduler.status().await {
            Ok(status) => status,
            Err(e) => {
                error!("DaemonCore: scheduler unavailable: {}", e);
                return;
            }
        };

        if status.play_type == PlayType::Live && status.current.is_some() {
            self.live_restarts = 0;
        }

        if let Some(pending) = &self.pending_live {
            let timeout = Duration::from_secs(self.config.relay.start_timeout_secs);
            if pending.requested_at.elapsed() >= timeout {
                warn!(
                    "DaemonCore: relay did not start {} within {:?}",
                    pending.channel_id, timeout
                );
                self.abandon_live().await;
                return;
            }
        } else if status.play_type == PlayType::Live
            && status.current.is_none()
            && status.queued == 0
        {
            if let Some(channel_id) = self.live_channel.clone() {
                if self.live_restarts >= MAX_LIVE_RESTARTS {
                    error!(
                        "DaemonCore: could not restart live stream {} after {} attempts",
                        channel_id, self.live_restarts
                    );
                    if let Err(e) = self.scheduler.stop(true, true).await {
                        error!("DaemonCore: stop failed: {}", e);
                    }
                    self.forget_live();
                    self.live_restarts = 0;
                    return;
                }
                self.live_restarts += 1;
                warn!(
                    "DaemonCore: live stream {} ended, restarting ({}/{})",
                    channel_id, self.live_restarts, MAX_LIVE_RESTARTS
                );
                if let Err(e) = self.restart_live(channel_id).await {
                    error!("DaemonCore: live restart failed: {}", e);
                }
                return;
            }
        }

        self.check_idle(&status).await;
    }

    async fn abandon_live(&mut self) {
        if let Err(e) = self.scheduler.stop(false, true).await {
            error!("DaemonCore: stop failed: {}", e);
        }
        if let Err(e) = self.events.send(RelayRequest::KillRelay) {
            warn!("DaemonCore: {}", e);
        }
        self.forget_live();
    }

    async fn restart_live(&mut self, channel_id: String) -> anyhow::Result<()> {
        self.scheduler.stop(false, false).await?;
        self.forget_live();
        self.request_live(channel_id).await
    }

    async fn check_idle(&mut self, status: &SchedulerStatus) {
        let idle = status.voice_channel.is_some()
            && status.current.is_none()
            && status.queued == 0
            && status.play_type != PlayType::Live;
        if !idle {
            self.idle_since = None;
            return;
        }

        let since = *self.idle_since.get_or_insert_with(Instant::now);
        let limit = Duration::from_secs(self.config.player.idle_disconnect_secs);
        if since.elapsed() >= limit {
            info!("DaemonCore: idle for {:?}, leaving voice", limit);
            if let Err(e) = self.scheduler.stop(true, true).await {
                error!("DaemonCore: stop failed: {}", e);
            }
            self.idle_since = None;
        }
    }

    // ── status ────────────────────────────────────────────────────────────────

    async fn snapshot(&self) -> PlayerStatus {
        let mut published = self.state_manager.get_status().await;
        if let Ok(status) = self.scheduler.status().await {
            published = self.player_status(status, published.rev);
        }
        published
    }

    fn player_status(&self, status: SchedulerStatus, rev: u64) -> PlayerStatus {
        PlayerStatus {
            rev,
            play_type: status.play_type,
            voice_channel: status.voice_channel.map(|c| c.0),
            current: status.current.map(|item| item.display_name()),
            recent: status.recent.iter().map(|e| e.display_name()).collect(),
            upcoming: status.upcoming.iter().map(|e| e.display_name()).collect(),
            repeat: status.repeat,
            volume: status.volume,
            is_playing: status.is_playing,
            pending_channel: self.pending_live.as_ref().map(|p| p.channel_id.clone()),
            backend_up: self.backend_up,
        }
    }

    async fn publish(&mut self) {
        let status = match self.scheduler.status().await {
            Ok(status) => status,
            Err(e) => {
                debug!("DaemonCore: no status to publish: {}", e);
                return;
            }
        };
        let next = self.player_status(status, 0);
        match self.state_manager.publish(next).await {
            Ok(true) => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StatusUpdated);
            }
            Ok(false) => {}
            Err(e) => error!("DaemonCore: failed to persist state: {}", e),
        }
    }
}

fn percent(volume: f32) -> i64 {
    (volume * 100.0).round() as i64
}
