use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

// ── control protocol (command layer ⇄ daemon) ─────────────────────────────────

/// Messages sent from the command layer to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Join (or move to) a voice channel.
    Summon { voice_channel: u64 },
    PlaySong { guid: String },
    PlayEpisode { guid: String },
    /// Start a live channel through the relay process.
    PlayChannel { channel_id: String },
    /// Random playlist sampled from archived songs of up to five channels.
    Playlist {
        channels: Vec<String>,
        #[serde(default)]
        threshold: Option<usize>,
    },
    Skip,
    Stop,
    /// Force the player out of voice, whatever it is doing.
    Reset,
    /// `None` queries the current volume.
    Volume {
        #[serde(default)]
        value: Option<f32>,
    },
    /// `None` queries the current repeat flag.
    Repeat {
        #[serde(default)]
        enabled: Option<bool>,
    },
    GetStatus,
}

/// Messages sent from the daemon to the command layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + status snapshot.
    Hello {
        protocol_version: u32,
        status: PlayerStatus,
    },
    /// Answer to exactly one `Command`, in command order.
    Reply { ok: bool, message: String },
    Status { data: PlayerStatus },
    Log { message: String },
}

/// Exclusive source category of the scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayType {
    #[default]
    None,
    File,
    Live,
    Random,
}

impl PlayType {
    pub fn label(&self) -> &'static str {
        match self {
            PlayType::None => "idle",
            PlayType::File => "file",
            PlayType::Live => "live",
            PlayType::Random => "random",
        }
    }
}

impl std::fmt::Display for PlayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot of the player as shown to clients.  `rev` increases on every
/// change so clients can spot missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlayerStatus {
    #[serde(default)]
    pub rev: u64,
    pub play_type: PlayType,
    pub voice_channel: Option<u64>,
    /// Display name of the item being played.
    pub current: Option<String>,
    /// Most recent first; the playing file item is at index 0.
    pub recent: Vec<String>,
    pub upcoming: Vec<String>,
    pub repeat: bool,
    pub volume: f32,
    pub is_playing: bool,
    /// Live channel requested from the relay and not yet started.
    #[serde(default)]
    pub pending_channel: Option<String>,
    /// Last connectivity state reported by the relay backend.
    #[serde(default = "default_backend_up")]
    pub backend_up: bool,
}

fn default_backend_up() -> bool {
    true
}

/// Wrapper for control-socket communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encode_frame(self)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        decode_frame(data)
    }
}

// ── relay protocol (daemon ⇄ relay process) ───────────────────────────────────

/// Transport the relay should expose the live feed over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportHint {
    #[default]
    Hls,
    Udp,
}

/// Outbound requests to the relay process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "relay")]
pub enum RelayRequest {
    StartRelay {
        channel_id: String,
        transport: TransportHint,
    },
    KillRelay,
}

/// Inbound notifications from the relay process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum RelayEvent {
    RelayStarted { channel_id: String, url: String },
    RelayKilled,
    BackendConnectivityChanged { is_up: bool },
}

/// Wrapper for relay-link communication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RelayMessage {
    Request(RelayRequest),
    Event(RelayEvent),
}

impl RelayMessage {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encode_frame(self)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        decode_frame(data)
    }
}

// ── framing ───────────────────────────────────────────────────────────────────

/// 4-byte big-endian length header followed by the JSON body.
pub fn encode_frame<T: Serialize>(msg: &T) -> anyhow::Result<Vec<u8>> {
    let json = serde_json::to_vec(msg)?;
    let len = u32::try_from(json.len())?;
    let mut result = Vec::with_capacity(4 + json.len());
    result.extend_from_slice(&len.to_be_bytes());
    result.extend_from_slice(&json);
    Ok(result)
}

/// Decode one frame from the front of `data`, returning the message and the
/// number of bytes consumed.  Fails while the frame is still incomplete.
pub fn decode_frame<T: DeserializeOwned>(data: &[u8]) -> anyhow::Result<(T, usize)> {
    if data.len() < 4 {
        anyhow::bail!("Insufficient data for length header");
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if data.len() < 4 + len {
        anyhow::bail!("Insufficient data for message");
    }
    let msg: T = serde_json::from_slice(&data[4..4 + len])?;
    Ok((msg, 4 + len))
}

/// True when `data` holds at least one complete frame.
pub fn has_complete_frame(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    data.len() >= 4 + len
}
