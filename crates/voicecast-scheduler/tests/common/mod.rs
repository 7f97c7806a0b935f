#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use voicecast_proto::protocol::RelayRequest;
use voicecast_scheduler::{
    AudioSource, CatalogEntry, CompletionSignal, Gain, PlaybackScheduler, SchedulerConfig,
    SchedulerStatus, SourceInput, VoiceChannelId, VoiceConnection, VoiceConnector, VoiceError,
};

/// Everything the fake voice backend saw, plus knobs to make it fail.
#[derive(Default)]
pub struct FakeState {
    pub connects: Vec<u64>,
    pub moves: Vec<u64>,
    pub disconnects: usize,
    pub stops: usize,
    pub played: Vec<SourceInput>,
    pub signal: Option<CompletionSignal>,
    pub gain: Option<Gain>,
    pub fail_connect: bool,
    pub reject_play: bool,
}

/// Shared view into the fake backend.
#[derive(Clone, Default)]
pub struct Probe(Arc<Mutex<FakeState>>);

impl Probe {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.0.lock().unwrap()
    }

    /// Let the current source end naturally.
    pub fn finish(&self) {
        let signal = self.state().signal.take();
        signal.expect("nothing is playing").complete();
    }

    /// Let the current source end with an error.
    pub fn fail(&self, reason: &str) {
        let signal = self.state().signal.take();
        signal.expect("nothing is playing").fail(reason);
    }

    pub fn played(&self) -> Vec<SourceInput> {
        self.state().played.clone()
    }

    pub fn live_gain(&self) -> f32 {
        self.state().gain.as_ref().expect("no source").get()
    }
}

pub struct FakeConnector {
    probe: Probe,
}

#[async_trait]
impl VoiceConnector for FakeConnector {
    async fn connect(
        &self,
        channel: VoiceChannelId,
    ) -> Result<Box<dyn VoiceConnection>, VoiceError> {
        let mut state = self.probe.state();
        if state.fail_connect {
            return Err(VoiceError::Connect {
                channel,
                reason: "missing permissions".to_string(),
            });
        }
        state.connects.push(channel.0);
        Ok(Box::new(FakeConnection {
            channel,
            probe: self.probe.clone(),
        }))
    }
}

struct FakeConnection {
    channel: VoiceChannelId,
    probe: Probe,
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn channel(&self) -> VoiceChannelId {
        self.channel
    }

    async fn move_to(&mut self, channel: VoiceChannelId) -> Result<(), VoiceError> {
        self.probe.state().moves.push(channel.0);
        self.channel = channel;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.probe.state().signal.is_some()
    }

    async fn play(
        &mut self,
        source: AudioSource,
        signal: CompletionSignal,
    ) -> Result<(), VoiceError> {
        let mut state = self.probe.state();
        if state.reject_play {
            return Err(VoiceError::Play("codec error".to_string()));
        }
        state.played.push(source.input);
        state.gain = Some(source.gain);
        state.signal = Some(signal);
        Ok(())
    }

    async fn stop(&mut self) {
        let signal = {
            let mut state = self.probe.state();
            state.stops += 1;
            state.signal.take()
        };
        if let Some(signal) = signal {
            signal.complete();
        }
    }

    async fn disconnect(&mut self) {
        self.probe.state().disconnects += 1;
    }
}

/// A scheduler wired to a fake voice backend and an in-process relay channel.
pub struct Harness {
    pub scheduler: PlaybackScheduler,
    pub probe: Probe,
    pub relay_rx: mpsc::UnboundedReceiver<RelayRequest>,
}

impl Harness {
    pub fn new() -> Self {
        let probe = Probe::default();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel::<RelayRequest>();
        let scheduler = PlaybackScheduler::spawn(
            SchedulerConfig::default(),
            Arc::new(FakeConnector {
                probe: probe.clone(),
            }),
            Arc::new(relay_tx),
        );
        Self {
            scheduler,
            probe,
            relay_rx,
        }
    }

    pub async fn connected() -> Self {
        let harness = Self::new();
        harness
            .scheduler
            .set_voice(VoiceChannelId(100))
            .await
            .unwrap();
        harness
    }

    /// Round-trip through the scheduler task.  Everything sent before this
    /// call, including completion signals, has been handled when it returns.
    pub async fn settle(&self) -> SchedulerStatus {
        self.scheduler.status().await.unwrap()
    }

    pub fn relay_requests(&mut self) -> Vec<RelayRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = self.relay_rx.try_recv() {
            requests.push(request);
        }
        requests
    }
}

/// Create `names.len()` real song files under `dir`.
pub fn songs(dir: &Path, names: &[&str]) -> Vec<CatalogEntry> {
    names
        .iter()
        .map(|name| song_on(dir, name, "lithium"))
        .collect()
}

pub fn song_on(dir: &Path, name: &str, channel: &str) -> CatalogEntry {
    let path = dir.join(format!("{channel}-{name}.mp3"));
    std::fs::write(&path, b"ID3").unwrap();
    CatalogEntry::song(
        format!("{channel}-{name}"),
        name,
        "Band",
        channel,
        path,
    )
}

pub fn titles(entries: &[CatalogEntry]) -> Vec<String> {
    entries.iter().map(|e| e.title.clone()).collect()
}

pub fn file_input(entry: &CatalogEntry) -> SourceInput {
    SourceInput::File(entry.file_path.clone())
}
