//! Local mpv output standing in for the platform voice connection.
//!
//! Every connection owns its own mpv process.  A watcher task turns mpv
//! `end-file` events into completion signals; a gain task mirrors the
//! scheduler's volume into mpv's `volume` property.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voicecast_scheduler::{
    AudioSource, CompletionSignal, SourceInput, VoiceChannelId, VoiceConnection, VoiceConnector,
    VoiceError,
};

use crate::mpv::{MpvDriver, MpvEvent, MpvHandle};

/// The source mpv is currently playing, as far as the scheduler knows.
struct ActivePlay {
    signal: CompletionSignal,
    /// Set by the first `start-file` after `loadfile`.
    entry_id: Option<u64>,
    started: bool,
}

type Slot = Arc<Mutex<Option<ActivePlay>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<ActivePlay>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MpvConnector {
    volume: f32,
}

impl MpvConnector {
    pub fn new(volume: f32) -> Self {
        Self { volume }
    }
}

#[async_trait]
impl VoiceConnector for MpvConnector {
    async fn connect(
        &self,
        channel: VoiceChannelId,
    ) -> Result<Box<dyn VoiceConnection>, VoiceError> {
        let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(64);
        let mut driver = MpvDriver::new(channel.0, self.volume);
        let handle = driver
            .spawn_and_connect(channel.0, event_tx)
            .await
            .map_err(|e| VoiceError::Connect {
                channel,
                reason: e.to_string(),
            })?;

        let slot: Slot = Arc::new(Mutex::new(None));
        let watcher = tokio::spawn(watch_events(event_rx, slot.clone()));
        Ok(Box::new(MpvConnection {
            channel,
            driver,
            handle,
            slot,
            watcher,
            gain_task: None,
        }))
    }
}

pub struct MpvConnection {
    channel: VoiceChannelId,
    driver: MpvDriver,
    handle: MpvHandle,
    slot: Slot,
    watcher: JoinHandle<()>,
    gain_task: Option<JoinHandle<()>>,
}

impl MpvConnection {
    fn follow_gain(&mut self, source: &AudioSource) {
        if let Some(task) = self.gain_task.take() {
            task.abort();
        }
        let mut rx = source.gain.subscribe();
        let handle = self.handle.clone();
        self.gain_task = Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let level = *rx.borrow_and_update();
                if let Err(e) = handle.set_volume(level).await {
                    warn!("mpv: volume update failed: {}", e);
                }
            }
        }));
    }
}

#[async_trait]
impl VoiceConnection for MpvConnection {
    fn channel(&self) -> VoiceChannelId {
        self.channel
    }

    async fn move_to(&mut self, channel: VoiceChannelId) -> Result<(), VoiceError> {
        // The local output is not bound to a channel; only the label moves.
        info!("mpv: voice channel {} -> {}", self.channel, channel);
        self.channel = channel;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        lock(&self.slot).as_ref().is_some_and(|active| active.started)
    }

    async fn play(
        &mut self,
        source: AudioSource,
        signal: CompletionSignal,
    ) -> Result<(), VoiceError> {
        if !self.driver.process_alive() {
            return Err(VoiceError::Play("mpv process is not running".to_string()));
        }
        let live = source.is_live();
        let target = match &source.input {
            SourceInput::File(path) => path.display().to_string(),
            SourceInput::LiveStream { url } => url.clone(),
        };

        *lock(&self.slot) = Some(ActivePlay {
            signal,
            entry_id: None,
            started: false,
        });
        if let Err(e) = self.handle.load(&target, live, source.gain.get()).await {
            lock(&self.slot).take();
            return Err(VoiceError::Play(e.to_string()));
        }
        self.follow_gain(&source);
        debug!("mpv: loading {} (live={})", target, live);
        Ok(())
    }

    async fn stop(&mut self) {
        let active = lock(&self.slot).take();
        if let Err(e) = self.handle.stop().await {
            warn!("mpv: stop failed: {}", e);
        }
        if let Some(active) = active {
            active.signal.complete();
        }
    }

    async fn disconnect(&mut self) {
        if let Some(task) = self.gain_task.take() {
            task.abort();
        }
        self.watcher.abort();
        if let Some(active) = lock(&self.slot).take() {
            active.signal.complete();
        }
        self.driver.kill().await;
        info!("mpv: output for voice channel {} closed", self.channel);
    }
}

/// Map mpv events onto the active play.  An `end-file` only counts once the
/// matching `start-file` was seen, so the tail of a replaced file cannot end
/// its successor.
async fn watch_events(mut event_rx: mpsc::Receiver<MpvEvent>, slot: Slot) {
    while let Some(evt) = event_rx.recv().await {
        match evt.event_name() {
            Some("start-file") => {
                if let Some(active) = lock(&slot).as_mut() {
                    if !active.started {
                        active.started = true;
                        active.entry_id = evt.playlist_entry_id();
                    }
                }
            }
            Some("end-file") => {
                let finished = {
                    let mut guard = lock(&slot);
                    let matches = guard
                        .as_ref()
                        .is_some_and(|a| a.started && a.entry_id == evt.playlist_entry_id());
                    if matches {
                        guard.take()
                    } else {
                        None
                    }
                };
                let Some(active) = finished else {
                    continue;
                };
                match evt.end_reason() {
                    Some("error") => {
                        let reason = evt.file_error().unwrap_or("playback error").to_string();
                        active.signal.fail(reason);
                    }
                    reason => {
                        debug!("mpv: end-file reason={:?}", reason);
                        active.signal.complete();
                    }
                }
            }
            _ => {}
        }
    }
    debug!("mpv: event stream closed");
    if let Some(active) = lock(&slot).take() {
        active.signal.fail("mpv exited");
    }
}
