//! Random playlist mode.

mod common;

use async_trait::async_trait;
use common::{song_on, songs, Harness};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use voicecast_scheduler::{
    Catalog, CatalogEntry, CatalogKind, MemoryCatalog, PlayType, SchedulerError, SongKey,
    SourceInput, MAX_DISCARD_REFILLS, PLAYLIST_BATCH,
};

fn catalog_on(dir: &Path, channel: &str, count: usize) -> Vec<CatalogEntry> {
    (0..count)
        .map(|i| song_on(dir, &format!("song{i}"), channel))
        .collect()
}

fn channels(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// Answers the distinct-song query but never resolves a row.
struct HollowCatalog;

#[async_trait]
impl Catalog for HollowCatalog {
    async fn distinct_songs(&self, _channels: &[String]) -> anyhow::Result<Vec<SongKey>> {
        Ok(vec![SongKey::new("Ghost", "Nobody")])
    }

    async fn find_song(
        &self,
        _channels: &[String],
        _key: &SongKey,
    ) -> anyhow::Result<Option<CatalogEntry>> {
        Ok(None)
    }

    async fn lookup(&self, _guid: &str, _kind: CatalogKind) -> anyhow::Result<Option<CatalogEntry>> {
        Ok(None)
    }
}

/// Resolves every song to a file that is not on disk, counting lookups.
#[derive(Default)]
struct StaleCatalog {
    lookups: AtomicUsize,
}

#[async_trait]
impl Catalog for StaleCatalog {
    async fn distinct_songs(&self, _channels: &[String]) -> anyhow::Result<Vec<SongKey>> {
        Ok(vec![SongKey::new("Gone", "Band")])
    }

    async fn find_song(
        &self,
        _channels: &[String],
        key: &SongKey,
    ) -> anyhow::Result<Option<CatalogEntry>> {
        let n = self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(Some(CatalogEntry::song(
            format!("gone-{n}"),
            key.title.clone(),
            key.artist.clone(),
            "octane",
            format!("/nonexistent/voicecast/gone-{n}.mp3"),
        )))
    }

    async fn lookup(&self, _guid: &str, _kind: CatalogKind) -> anyhow::Result<Option<CatalogEntry>> {
        Ok(None)
    }
}

struct BrokenCatalog;

#[async_trait]
impl Catalog for BrokenCatalog {
    async fn distinct_songs(&self, _channels: &[String]) -> anyhow::Result<Vec<SongKey>> {
        anyhow::bail!("database is locked")
    }

    async fn find_song(
        &self,
        _channels: &[String],
        _key: &SongKey,
    ) -> anyhow::Result<Option<CatalogEntry>> {
        anyhow::bail!("database is locked")
    }

    async fn lookup(&self, _guid: &str, _kind: CatalogKind) -> anyhow::Result<Option<CatalogEntry>> {
        anyhow::bail!("database is locked")
    }
}

#[tokio::test]
async fn test_sparse_catalog_refuses_playlist() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let catalog = Arc::new(MemoryCatalog::new(catalog_on(dir.path(), "octane", 10)));

    let err = h
        .scheduler
        .add_playlist(channels(&["octane"]), catalog, 40)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::NotEnoughSongs {
            found: 10,
            threshold: 40
        }
    ));
    let status = h.settle().await;
    assert_eq!(status.play_type, PlayType::None);
    assert_eq!(status.queued, 0);
}

#[tokio::test]
async fn test_playlist_starts_with_a_batch() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let catalog = Arc::new(MemoryCatalog::new(catalog_on(dir.path(), "octane", 6)));

    h.scheduler
        .add_playlist(channels(&["octane"]), catalog, 5)
        .await
        .unwrap();
    let status = h.settle().await;
    assert_eq!(status.play_type, PlayType::Random);
    assert!(status.current.is_some());
    assert_eq!(status.queued, PLAYLIST_BATCH - 1);
    assert_eq!(status.upcoming.len(), PLAYLIST_BATCH - 1);
    assert_eq!(h.probe.played().len(), 1);
}

#[tokio::test]
async fn test_playlist_refills_after_each_item() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let catalog = Arc::new(MemoryCatalog::new(catalog_on(dir.path(), "octane", 8)));
    h.scheduler
        .add_playlist(channels(&["octane"]), catalog, 8)
        .await
        .unwrap();
    h.settle().await;

    for _ in 0..3 {
        h.probe.finish();
        let status = h.settle().await;
        assert_eq!(status.queued, PLAYLIST_BATCH - 1);
        assert!(status.current.is_some());
    }
    assert_eq!(h.probe.played().len(), 4);
    assert!(h.scheduler.skip().await.unwrap());
    assert_eq!(h.settle().await.play_type, PlayType::Random);
}

#[tokio::test]
async fn test_playlist_draws_only_from_requested_channels() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let mut entries = catalog_on(dir.path(), "lithium", 5);
    entries.extend(catalog_on(dir.path(), "octane", 3));
    let octane: Vec<SourceInput> = entries
        .iter()
        .filter(|e| e.channel == "octane")
        .map(|e| SourceInput::File(e.file_path.clone()))
        .collect();

    h.scheduler
        .add_playlist(
            channels(&["octane"]),
            Arc::new(MemoryCatalog::new(entries)),
            3,
        )
        .await
        .unwrap();
    let status = h.settle().await;
    assert!(status.upcoming.iter().all(|e| e.channel == "octane"));
    for _ in 0..4 {
        h.probe.finish();
        h.settle().await;
    }
    assert!(h.probe.played().iter().all(|input| octane.contains(input)));
}

#[tokio::test]
async fn test_playlist_refused_while_files_play() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    h.scheduler
        .add_file(songs(dir.path(), &["A"]).remove(0))
        .await
        .unwrap();
    let catalog = Arc::new(MemoryCatalog::new(catalog_on(dir.path(), "octane", 5)));

    let err = h
        .scheduler
        .add_playlist(channels(&["octane"]), catalog, 5)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::IncompatibleMode {
            requested: PlayType::Random,
            active: PlayType::File
        }
    ));
}

#[tokio::test]
async fn test_repeat_unavailable_during_random() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let catalog = Arc::new(MemoryCatalog::new(catalog_on(dir.path(), "octane", 5)));
    h.scheduler
        .add_playlist(channels(&["octane"]), catalog, 5)
        .await
        .unwrap();
    assert!(matches!(
        h.scheduler.set_repeat(true).await,
        Err(SchedulerError::RepeatUnavailable(PlayType::Random))
    ));
}

#[tokio::test]
async fn test_stop_ends_playlist() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let catalog = Arc::new(MemoryCatalog::new(catalog_on(dir.path(), "octane", 5)));
    h.scheduler
        .add_playlist(channels(&["octane"]), catalog, 5)
        .await
        .unwrap();
    h.settle().await;

    h.scheduler.stop(false, true).await.unwrap();
    let status = h.settle().await;
    assert_eq!(status.play_type, PlayType::None);
    assert_eq!(status.queued, 0);
    assert!(status.upcoming.is_empty());
    assert_eq!(h.probe.played().len(), 1);
}

#[tokio::test]
async fn test_unresolvable_songs_leave_scheduler_idle() {
    let h = Harness::connected().await;
    let err = h
        .scheduler
        .add_playlist(channels(&["octane"]), Arc::new(HollowCatalog), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NoCatalogMatch { .. }));
    assert_eq!(h.settle().await.play_type, PlayType::None);
}

#[tokio::test]
async fn test_catalog_failure_is_reported() {
    let h = Harness::connected().await;
    let err = h
        .scheduler
        .add_playlist(channels(&["octane"]), Arc::new(BrokenCatalog), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Catalog(_)));
    assert_eq!(h.settle().await.play_type, PlayType::None);
}

#[tokio::test]
async fn test_unplayable_playlist_ends_after_bounded_refills() {
    let h = Harness::connected().await;
    let catalog = Arc::new(StaleCatalog::default());

    h.scheduler
        .add_playlist(channels(&["octane"]), catalog.clone(), 1)
        .await
        .unwrap();
    let status = h.settle().await;
    assert_eq!(status.play_type, PlayType::None);
    assert_eq!(status.queued, 0);
    assert!(status.upcoming.is_empty());
    assert!(h.probe.played().is_empty());
    assert_eq!(
        catalog.lookups.load(Ordering::SeqCst),
        PLAYLIST_BATCH + MAX_DISCARD_REFILLS
    );

    let dir = tempfile::tempdir().unwrap();
    let playable = Arc::new(MemoryCatalog::new(catalog_on(dir.path(), "octane", 5)));
    h.scheduler
        .add_playlist(channels(&["octane"]), playable, 5)
        .await
        .unwrap();
    let status = h.settle().await;
    assert_eq!(status.play_type, PlayType::Random);
    assert!(status.current.is_some());
}

#[tokio::test]
async fn test_discarded_playlist_item_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let catalog = Arc::new(MemoryCatalog::new(catalog_on(dir.path(), "octane", 6)));
    h.scheduler
        .add_playlist(channels(&["octane"]), catalog, 6)
        .await
        .unwrap();
    let status = h.settle().await;
    assert_eq!(status.queued, PLAYLIST_BATCH - 1);

    // the next queued file disappears before its turn
    std::fs::remove_file(&status.upcoming[0].file_path).unwrap();
    h.probe.finish();
    let status = h.settle().await;
    assert_eq!(status.play_type, PlayType::Random);
    assert!(status.current.is_some());
    assert_eq!(status.queued, PLAYLIST_BATCH - 1);
}
