//! Catalog query capability used by the playlist sampler and the daemon's
//! `PlaySong` / `PlayEpisode` handling.

use async_trait::async_trait;
use std::collections::HashSet;
use voicecast_proto::catalog::{CatalogEntry, CatalogKind};

/// A distinct song, independent of how many times it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SongKey {
    pub title: String,
    pub artist: String,
}

impl SongKey {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
        }
    }

    fn of(entry: &CatalogEntry) -> Self {
        Self::new(entry.title.clone(), entry.artist.clone())
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Distinct (title, artist) pairs of songs recorded on any of `channels`.
    async fn distinct_songs(&self, channels: &[String]) -> anyhow::Result<Vec<SongKey>>;

    /// A song row on one of `channels` matching `key`.  When several rows
    /// match, which one is returned is unspecified.
    async fn find_song(
        &self,
        channels: &[String],
        key: &SongKey,
    ) -> anyhow::Result<Option<CatalogEntry>>;

    async fn lookup(&self, guid: &str, kind: CatalogKind) -> anyhow::Result<Option<CatalogEntry>>;
}

/// Catalog held in memory, typically loaded from the TOML catalog file.
#[derive(Debug, Default, Clone)]
pub struct MemoryCatalog {
    entries: Vec<CatalogEntry>,
}

impl MemoryCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn songs_on<'a>(&'a self, channels: &'a [String]) -> impl Iterator<Item = &'a CatalogEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind == CatalogKind::Song)
            .filter(move |e| channels.iter().any(|c| *c == e.channel))
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn distinct_songs(&self, channels: &[String]) -> anyhow::Result<Vec<SongKey>> {
        let mut seen = HashSet::new();
        Ok(self
            .songs_on(channels)
            .map(SongKey::of)
            .filter(|key| seen.insert(key.clone()))
            .collect())
    }

    async fn find_song(
        &self,
        channels: &[String],
        key: &SongKey,
    ) -> anyhow::Result<Option<CatalogEntry>> {
        Ok(self
            .songs_on(channels)
            .find(|e| e.title == key.title && e.artist == key.artist)
            .cloned())
    }

    async fn lookup(&self, guid: &str, kind: CatalogKind) -> anyhow::Result<Option<CatalogEntry>> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.kind == kind && e.guid == guid)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new(vec![
            CatalogEntry::song("1", "Everlong", "Foo Fighters", "lithium", "/a/1.mp3"),
            CatalogEntry::song("2", "Everlong", "Foo Fighters", "lithium", "/a/2.mp3"),
            CatalogEntry::song("3", "Lithium", "Nirvana", "lithium", "/a/3.mp3"),
            CatalogEntry::song("4", "Everlong", "Foo Fighters", "octane", "/a/4.mp3"),
            CatalogEntry::song("5", "Bulls On Parade", "RATM", "octane", "/a/5.mp3"),
        ])
    }

    fn channels(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_distinct_songs_dedupes_pairs() {
        let keys = catalog()
            .distinct_songs(&channels(&["lithium", "octane"]))
            .await
            .unwrap();
        assert_eq!(
            keys,
            vec![
                SongKey::new("Everlong", "Foo Fighters"),
                SongKey::new("Lithium", "Nirvana"),
                SongKey::new("Bulls On Parade", "RATM"),
            ]
        );
    }

    #[tokio::test]
    async fn test_find_song_respects_channels() {
        let cat = catalog();
        let key = SongKey::new("Everlong", "Foo Fighters");
        let row = cat.find_song(&channels(&["octane"]), &key).await.unwrap().unwrap();
        assert_eq!(row.guid, "4");
        let none = cat
            .find_song(&channels(&["octane"]), &SongKey::new("Lithium", "Nirvana"))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_lookup_by_kind() {
        let cat = catalog();
        assert!(cat.lookup("3", CatalogKind::Song).await.unwrap().is_some());
        assert!(cat.lookup("3", CatalogKind::Episode).await.unwrap().is_none());
        assert!(cat.lookup("missing", CatalogKind::Song).await.unwrap().is_none());
    }
}
