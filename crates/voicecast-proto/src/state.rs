use crate::protocol::PlayerStatus;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// What survives a daemon restart.  The queue does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    pub volume: f32,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self { volume: 0.25 }
    }
}

/// Latest published `PlayerStatus`, shared between the daemon core (sole
/// writer) and the control socket (readers).
pub struct StateManager {
    status: Arc<RwLock<PlayerStatus>>,
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf, default_volume: f32) -> Self {
        let persistent = Self::load_persistent(&state_file).unwrap_or(PersistentState {
            volume: default_volume,
        });

        let status = PlayerStatus {
            rev: 1,
            volume: persistent.volume.clamp(0.0, 1.0),
            backend_up: true,
            ..Default::default()
        };

        Self {
            status: Arc::new(RwLock::new(status)),
            state_file,
        }
    }

    pub async fn get_status(&self) -> PlayerStatus {
        self.status.read().await.clone()
    }

    /// Volume restored from the previous run (or the configured default).
    pub async fn volume(&self) -> f32 {
        self.status.read().await.volume
    }

    /// Replace the published snapshot.  Returns `true` when anything but the
    /// revision changed; the revision only moves in that case.
    pub async fn publish(&self, mut next: PlayerStatus) -> anyhow::Result<bool> {
        let volume_changed = {
            let mut status = self.status.write().await;
            next.rev = status.rev;
            if *status == next {
                return Ok(false);
            }
            let volume_changed = status.volume != next.volume;
            next.rev = status.rev + 1;
            *status = next;
            volume_changed
        };
        if volume_changed {
            self.save().await?;
        }
        Ok(true)
    }

    async fn save(&self) -> anyhow::Result<()> {
        let persistent = PersistentState {
            volume: self.status.read().await.volume,
        };

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> Option<PersistentState> {
        let content = std::fs::read_to_string(state_file).ok()?;
        serde_json::from_str::<PersistentState>(&content).ok()
    }
}
