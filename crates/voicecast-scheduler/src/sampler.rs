//! Random playlist sampling over archived songs.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use voicecast_proto::catalog::CatalogEntry;

use crate::catalog::{Catalog, SongKey};
use crate::error::{Result, SchedulerError};

/// Minimum number of distinct songs before a random playlist may start.
pub const DEFAULT_ACTIVATION_THRESHOLD: usize = 40;

/// Items drawn when a playlist starts, and the queue depth refills aim for.
pub const PLAYLIST_BATCH: usize = 5;

/// Everything needed to keep a random playlist going.
#[derive(Clone)]
pub struct PlaylistContext {
    pub channels: Vec<String>,
    pub catalog: Arc<dyn Catalog>,
    pub threshold: usize,
}

impl PlaylistContext {
    pub fn new(channels: Vec<String>, catalog: Arc<dyn Catalog>, threshold: usize) -> Self {
        Self {
            channels,
            catalog,
            threshold,
        }
    }
}

impl fmt::Debug for PlaylistContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaylistContext")
            .field("channels", &self.channels)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

pub struct PlaylistSampler;

impl PlaylistSampler {
    /// Number of distinct songs on the context's channels, or
    /// `NotEnoughSongs` when it is below the threshold.
    pub async fn check(ctx: &PlaylistContext) -> Result<usize> {
        Ok(Self::eligible(ctx).await?.len())
    }

    /// Pick one distinct song uniformly with the OS random source and resolve
    /// it to a playable catalog row.
    pub async fn draw(ctx: &PlaylistContext) -> Result<CatalogEntry> {
        let keys = Self::eligible(ctx).await?;
        let key = keys
            .choose(&mut OsRng)
            .ok_or(SchedulerError::NotEnoughSongs {
                found: 0,
                threshold: ctx.threshold,
            })?;

        let entry = ctx
            .catalog
            .find_song(&ctx.channels, key)
            .await
            .map_err(SchedulerError::Catalog)?
            .ok_or_else(|| SchedulerError::NoCatalogMatch {
                title: key.title.clone(),
                artist: key.artist.clone(),
            })?;
        debug!(guid = %entry.guid, "sampled {}", entry.display_name());
        Ok(entry)
    }

    async fn eligible(ctx: &PlaylistContext) -> Result<Vec<SongKey>> {
        let keys = ctx
            .catalog
            .distinct_songs(&ctx.channels)
            .await
            .map_err(SchedulerError::Catalog)?;
        if keys.len() < ctx.threshold {
            return Err(SchedulerError::NotEnoughSongs {
                found: keys.len(),
                threshold: ctx.threshold,
            });
        }
        Ok(keys)
    }
}
