//! File-mode behaviour of the playback scheduler, driven through a fake voice
//! backend.

mod common;

use common::{file_input, songs, titles, Harness};
use voicecast_scheduler::{
    CatalogEntry, PlayType, QueuedItem, SchedulerError, VoiceChannelId, RECENT_LIMIT,
};

#[tokio::test]
async fn test_files_play_in_fifo_order() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let items = songs(dir.path(), &["A", "B", "C"]);
    for item in &items {
        h.scheduler.add_file(item.clone()).await.unwrap();
    }

    let status = h.settle().await;
    assert_eq!(status.play_type, PlayType::File);
    assert_eq!(status.current, Some(QueuedItem::File(items[0].clone())));
    assert_eq!(titles(&status.recent), ["A"]);
    assert_eq!(titles(&status.upcoming), ["B", "C"]);
    assert!(status.is_playing);

    h.probe.finish();
    let status = h.settle().await;
    assert_eq!(titles(&status.recent), ["B", "A"]);
    assert_eq!(titles(&status.upcoming), ["C"]);

    h.probe.finish();
    let status = h.settle().await;
    assert_eq!(status.current, Some(QueuedItem::File(items[2].clone())));
    assert_eq!(titles(&status.recent), ["C", "B", "A"]);
    assert!(status.upcoming.is_empty());

    h.probe.finish();
    let status = h.settle().await;
    assert_eq!(titles(&status.recent), ["C", "B", "A"]);
    assert!(status.upcoming.is_empty());
    assert!(status.current.is_none());
    assert!(!status.is_playing);
    assert_eq!(
        h.probe.played(),
        items.iter().map(file_input).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_recent_is_capped() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let names: Vec<String> = (0..12).map(|i| format!("s{i}")).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    for item in songs(dir.path(), &name_refs) {
        h.scheduler.add_file(item).await.unwrap();
    }

    for _ in 0..12 {
        h.settle().await;
        h.probe.finish();
    }
    let recent = h.scheduler.recent().await.unwrap();
    assert_eq!(recent.len(), RECENT_LIMIT);
    assert_eq!(recent[0].title, "s11");
    assert_eq!(recent[RECENT_LIMIT - 1].title, "s2");
}

#[tokio::test]
async fn test_repeat_requeues_completed_item() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    h.scheduler.set_repeat(true).await.unwrap();
    let items = songs(dir.path(), &["A", "B"]);
    for item in &items {
        h.scheduler.add_file(item.clone()).await.unwrap();
    }

    h.settle().await;
    h.probe.finish();
    let status = h.settle().await;
    assert_eq!(status.current, Some(QueuedItem::File(items[1].clone())));
    assert_eq!(titles(&status.upcoming), ["A"]);

    h.probe.finish();
    h.settle().await;
    assert_eq!(
        h.probe.played(),
        vec![
            file_input(&items[0]),
            file_input(&items[1]),
            file_input(&items[0])
        ]
    );
    assert!(h.scheduler.repeat().await.unwrap());
}

#[tokio::test]
async fn test_skip_moves_to_next_item() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let items = songs(dir.path(), &["A", "B", "C"]);
    for item in &items {
        h.scheduler.add_file(item.clone()).await.unwrap();
    }
    h.settle().await;

    assert!(h.scheduler.skip().await.unwrap());
    let status = h.settle().await;
    assert_eq!(status.current, Some(QueuedItem::File(items[1].clone())));
    assert_eq!(titles(&status.recent), ["B", "A"]);
    assert_eq!(titles(&status.upcoming), ["C"]);
    assert_eq!(h.probe.state().stops, 1);
}

#[tokio::test]
async fn test_skip_on_last_item_matches_stop_without_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let skipped = Harness::connected().await;
    let stopped = Harness::connected().await;
    let item = songs(dir.path(), &["A"]).remove(0);

    for h in [&skipped, &stopped] {
        h.scheduler.add_file(item.clone()).await.unwrap();
        h.settle().await;
    }
    assert!(skipped.scheduler.skip().await.unwrap());
    stopped.scheduler.stop(false, true).await.unwrap();

    let a = skipped.settle().await;
    let b = stopped.settle().await;
    assert_eq!(a, b);
    assert_eq!(a.play_type, PlayType::None);
    assert!(a.current.is_none());
    assert!(a.recent.is_empty());
    assert_eq!(a.voice_channel, Some(VoiceChannelId(100)));
    assert_eq!(skipped.probe.state().disconnects, 0);
}

#[tokio::test]
async fn test_skip_without_voice_returns_false() {
    let h = Harness::new();
    assert!(!h.scheduler.skip().await.unwrap());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    for item in songs(dir.path(), &["A", "B"]) {
        h.scheduler.add_file(item).await.unwrap();
    }
    h.settle().await;

    h.scheduler.stop(true, true).await.unwrap();
    let first = h.settle().await;
    h.scheduler.stop(true, true).await.unwrap();
    let second = h.settle().await;

    assert_eq!(first, second);
    assert_eq!(second.play_type, PlayType::None);
    assert_eq!(second.queued, 0);
    assert!(second.recent.is_empty());
    assert!(second.upcoming.is_empty());
    assert!(second.voice_channel.is_none());
    assert_eq!(h.probe.state().disconnects, 1);
}

#[tokio::test]
async fn test_stop_discards_pending_items() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let items = songs(dir.path(), &["A", "B", "C", "D"]);
    for item in &items[..3] {
        h.scheduler.add_file(item.clone()).await.unwrap();
    }
    h.settle().await;
    h.scheduler.stop(false, true).await.unwrap();
    h.settle().await;
    assert_eq!(h.probe.played(), vec![file_input(&items[0])]);

    // Voice is kept, so the next file plays straight away.
    h.scheduler.add_file(items[3].clone()).await.unwrap();
    let status = h.settle().await;
    assert_eq!(status.play_type, PlayType::File);
    assert_eq!(status.current, Some(QueuedItem::File(items[3].clone())));
    assert_eq!(titles(&status.recent), ["D"]);
}

#[tokio::test]
async fn test_volume_is_clamped_and_applied_live() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    h.scheduler
        .add_file(songs(dir.path(), &["A"]).remove(0))
        .await
        .unwrap();
    h.settle().await;
    assert_eq!(h.probe.live_gain(), 0.25);

    assert_eq!(h.scheduler.set_volume(-0.3).await.unwrap(), 0.0);
    assert_eq!(h.probe.live_gain(), 0.0);
    assert_eq!(h.scheduler.set_volume(1.7).await.unwrap(), 1.0);
    assert_eq!(h.probe.live_gain(), 1.0);
    assert_eq!(h.scheduler.volume().await.unwrap(), 1.0);

    let status = h.settle().await;
    assert!(status.is_playing);
    assert_eq!(h.probe.state().stops, 0);
}

#[tokio::test]
async fn test_missing_file_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let gone = CatalogEntry::song("x", "Gone", "Band", "lithium", dir.path().join("gone.mp3"));
    let real = songs(dir.path(), &["B"]).remove(0);
    h.scheduler.add_file(gone).await.unwrap();
    h.scheduler.add_file(real.clone()).await.unwrap();

    let status = h.settle().await;
    assert_eq!(h.probe.played(), vec![file_input(&real)]);
    assert_eq!(titles(&status.recent), ["B"]);
    assert!(status.upcoming.is_empty());
}

#[tokio::test]
async fn test_items_queued_without_voice_are_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new();
    h.scheduler
        .add_file(songs(dir.path(), &["A"]).remove(0))
        .await
        .unwrap();

    let status = h.settle().await;
    assert!(h.probe.played().is_empty());
    assert!(status.current.is_none());
    assert!(status.upcoming.is_empty());
    assert_eq!(status.play_type, PlayType::File);
}

#[tokio::test]
async fn test_rejected_source_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let items = songs(dir.path(), &["A", "B"]);

    h.probe.state().reject_play = true;
    h.scheduler.add_file(items[0].clone()).await.unwrap();
    let status = h.settle().await;
    assert!(status.current.is_none());
    assert!(status.recent.is_empty());

    h.probe.state().reject_play = false;
    h.scheduler.add_file(items[1].clone()).await.unwrap();
    let status = h.settle().await;
    assert_eq!(status.current, Some(QueuedItem::File(items[1].clone())));
    assert_eq!(h.probe.played(), vec![file_input(&items[1])]);

    // the rejected play's dropped signal must not end B
    let status = h.settle().await;
    assert_eq!(status.current, Some(QueuedItem::File(items[1].clone())));
    assert!(status.is_playing);
}

#[tokio::test]
async fn test_failed_playback_continues_with_next_item() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    let items = songs(dir.path(), &["A", "B"]);
    for item in &items {
        h.scheduler.add_file(item.clone()).await.unwrap();
    }
    h.settle().await;

    h.probe.fail("decoder error");
    let status = h.settle().await;
    assert_eq!(status.current, Some(QueuedItem::File(items[1].clone())));
}

#[tokio::test]
async fn test_set_voice_moves_existing_connection() {
    let h = Harness::connected().await;
    h.scheduler.set_voice(VoiceChannelId(200)).await.unwrap();
    h.scheduler.set_voice(VoiceChannelId(200)).await.unwrap();

    assert_eq!(h.probe.state().connects, vec![100]);
    assert_eq!(h.probe.state().moves, vec![200]);
    assert_eq!(h.settle().await.voice_channel, Some(VoiceChannelId(200)));
}

#[tokio::test]
async fn test_failed_connect_reports_voice_unavailable() {
    let h = Harness::new();
    h.probe.state().fail_connect = true;
    let err = h.scheduler.set_voice(VoiceChannelId(7)).await.unwrap_err();
    assert!(matches!(err, SchedulerError::VoiceUnavailable(_)));
    assert!(h.settle().await.voice_channel.is_none());
}

#[tokio::test]
async fn test_cleanup_disconnects_and_ends_task() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::connected().await;
    h.scheduler
        .add_file(songs(dir.path(), &["A"]).remove(0))
        .await
        .unwrap();
    h.settle().await;

    h.scheduler.cleanup().await.unwrap();
    assert_eq!(h.probe.state().disconnects, 1);
    assert!(matches!(
        h.scheduler.status().await,
        Err(SchedulerError::Stopped)
    ));
    h.scheduler.cleanup().await.unwrap();
}
