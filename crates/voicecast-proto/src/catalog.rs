//! Catalog records: previously recorded songs and show episodes with a
//! playable file on disk.
//!
//! The daemon loads them from a TOML file:
//!
//! ```toml
//! [[song]]
//! guid = "5f1c..."
//! title = "Heart-Shaped Box"
//! artist = "Nirvana"
//! channel = "lithium"
//! file_path = "/srv/archive/songs/5f1c.mp3"
//!
//! [[episode]]
//! guid = "a03e..."
//! title = "Morning Mashup"
//! show = "The Morning Mash Up"
//! channel = "hits1"
//! file_path = "/srv/archive/shows/a03e.mp3"
//! air_time = "2024-03-01T13:00:00Z"
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Song,
    Episode,
}

/// One playable catalog row.  For episodes `artist` holds the show name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub guid: String,
    pub kind: CatalogKind,
    pub title: String,
    pub artist: String,
    /// Channel the item was recorded from.
    pub channel: String,
    pub file_path: PathBuf,
    #[serde(default)]
    pub air_time: Option<DateTime<Utc>>,
}

impl CatalogEntry {
    pub fn song(
        guid: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        channel: impl Into<String>,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            guid: guid.into(),
            kind: CatalogKind::Song,
            title: title.into(),
            artist: artist.into(),
            channel: channel.into(),
            file_path: file_path.into(),
            air_time: None,
        }
    }

    pub fn display_name(&self) -> String {
        match self.kind {
            CatalogKind::Song => format!("\"{}\" by {}", self.title, self.artist),
            CatalogKind::Episode => match self.air_time {
                Some(t) => format!(
                    "\"{}\" ({}) from {}",
                    self.title,
                    self.artist,
                    t.format("%Y-%m-%d %H:%M")
                ),
                None => format!("\"{}\" ({})", self.title, self.artist),
            },
        }
    }
}

// ── TOML loader ───────────────────────────────────────────────────────────────

/// Mirrors the `[[song]]` / `[[episode]]` tables.  Kept apart from
/// `CatalogEntry` so the file schema can drift from the wire type.
#[derive(Debug, Deserialize)]
struct TomlCatalogFile {
    #[serde(default)]
    song: Vec<TomlSong>,
    #[serde(default)]
    episode: Vec<TomlEpisode>,
}

#[derive(Debug, Deserialize)]
struct TomlSong {
    guid: String,
    title: String,
    artist: String,
    channel: String,
    file_path: PathBuf,
    #[serde(default)]
    air_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TomlEpisode {
    guid: String,
    title: String,
    show: String,
    channel: String,
    file_path: PathBuf,
    #[serde(default)]
    air_time: Option<DateTime<Utc>>,
}

pub fn load_catalog_from_toml(path: &std::path::Path) -> anyhow::Result<Vec<CatalogEntry>> {
    let content = std::fs::read_to_string(path)?;
    let entries = parse_catalog_from_toml_str(&content)?;
    debug!(path = %path.display(), entries = entries.len(), "catalog loaded");
    Ok(entries)
}

pub fn parse_catalog_from_toml_str(content: &str) -> anyhow::Result<Vec<CatalogEntry>> {
    let file: TomlCatalogFile = toml::from_str(content)?;
    let songs = file.song.into_iter().map(|s| CatalogEntry {
        guid: s.guid,
        kind: CatalogKind::Song,
        title: s.title,
        artist: s.artist,
        channel: s.channel,
        file_path: s.file_path,
        air_time: s.air_time,
    });
    let episodes = file.episode.into_iter().map(|e| CatalogEntry {
        guid: e.guid,
        kind: CatalogKind::Episode,
        title: e.title,
        artist: e.show,
        channel: e.channel,
        file_path: e.file_path,
        air_time: e.air_time,
    });
    Ok(songs.chain(episodes).collect())
}
