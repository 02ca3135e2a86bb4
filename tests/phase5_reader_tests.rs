mod common;

use common::{fast_config, wait_until, MockGateway, MockOutput, MockUploader};
use lectern::error::{LecternError, PipelineError};
use lectern::kernel::segment::{SegmentId, SegmentStatus, UploadStatus, WordTiming};
use lectern::outputs::clock::ClockOutput;
use lectern::{LecternConfig, ReaderSession};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ARTICLE: &str = "Para one.\n\nPara two.\n\nPara three.";

fn reader(gateway: &Arc<MockGateway>, uploader: &Arc<MockUploader>) -> ReaderSession {
    ReaderSession::new(&fast_config(), gateway.clone(), uploader.clone(), Box::new(MockOutput::default())).unwrap()
}

fn all_ready(reader: &ReaderSession) -> bool {
    reader.snapshot().segments.iter().all(|s| s.is_ready())
}

#[tokio::test]
async fn test_same_text_keeps_the_list() {
    let gateway = Arc::new(MockGateway::with_delay(1));
    let uploader = Arc::new(MockUploader::default());
    let reader = reader(&gateway, &uploader);

    let first = reader.set_source_text("art", ARTICLE);
    assert!(first.content_changed);
    assert_eq!(first.segments, 3);
    assert!(reader.snapshot().segments.iter().all(|s| s.status == SegmentStatus::Idle));

    reader.enqueue_all();
    wait_until(5, "generation", || all_ready(&reader)).await;

    // Whitespace-only edits segment identically
    let again = reader.set_source_text("art", "Para one.\n\n\n  Para two.\n\nPara   three.\n");
    assert!(!again.content_changed);
    assert_eq!(again.session, first.session);
    assert_eq!(again.content_key, first.content_key);
    assert!(all_ready(&reader), "audio survives an unchanged list");

    // Same text under another article is a new list
    let other = reader.set_source_text("art-2", ARTICLE);
    assert!(other.content_changed);
    assert_ne!(other.session, first.session);
}

#[tokio::test]
async fn test_resegmentation_resets_everything() {
    let gateway = Arc::new(MockGateway::with_delay(40));
    let uploader = Arc::new(MockUploader::default());
    let reader = reader(&gateway, &uploader);

    reader.set_source_text("art", ARTICLE);
    reader.enqueue_all();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let outcome = reader.set_source_text("art", "Completely new.\n\nTwo paragraphs.");
    assert!(outcome.content_changed);
    assert_eq!(outcome.segments, 2);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let snap = reader.snapshot();
    assert_eq!(snap.session, outcome.session);
    assert_eq!(snap.segments.len(), 2);
    assert!(snap.segments.iter().all(|s| s.status == SegmentStatus::Idle && s.audio.is_none()));
    assert_eq!(reader.playback().active_segment_id, None);

    let stats = reader.telemetry();
    assert_eq!(stats.session_resets, 2);
    assert!(stats.generation.stale_discarded >= 1);
    assert_eq!(stats.generation.succeeded, 0);
}

#[tokio::test]
async fn test_hydration_skips_generation() {
    let gateway = Arc::new(MockGateway::with_delay(1));
    let uploader = Arc::new(MockUploader::default());
    let reader = reader(&gateway, &uploader);
    reader.set_source_text("art", ARTICLE);

    let urls = vec![
        "https://cdn.test/art/segment-0.mp3".to_string(),
        "https://cdn.test/art/segment-2.mp3".to_string(),
    ];
    assert_eq!(reader.load_audio_urls(&urls), vec![SegmentId(0), SegmentId(2)]);

    let mut timings = HashMap::new();
    timings.insert("segment-0".to_string(), vec![WordTiming::new(0.0, 0.4), WordTiming::new(0.5, 0.9)]);
    assert_eq!(reader.load_segment_word_timings(&timings), 1);

    let seg = reader.store().get(SegmentId(0)).unwrap();
    assert_eq!(seg.status, SegmentStatus::Ready);
    assert_eq!(seg.cloud_url.as_deref(), Some("https://cdn.test/art/segment-0.mp3"));
    assert_eq!(seg.word_timings.map(|w| w.len()), Some(2));
    assert_eq!(gateway.calls(), 0, "hydration never calls the gateway");

    assert_eq!(reader.enqueue_all(), vec![SegmentId(1)]);
    wait_until(5, "generation", || all_ready(&reader)).await;
    assert_eq!(gateway.calls(), 1);

    // Hydrated audio is already stored
    let summary = reader.upload_all("art").await.unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(uploader.calls_for(SegmentId(1)), 1);
    assert_eq!(reader.store().get(SegmentId(1)).unwrap().upload_status, UploadStatus::Success);
}

#[tokio::test]
async fn test_play_now_generates_first_when_needed() {
    let gateway = Arc::new(MockGateway::with_delay(20));
    let uploader = Arc::new(MockUploader::default());
    let reader = reader(&gateway, &uploader);
    reader.set_source_text("art", ARTICLE);

    assert!(!reader.play_now(SegmentId(2)).unwrap(), "not ready yet, queued at the head");
    assert_eq!(reader.store().get(SegmentId(2)).unwrap().status, SegmentStatus::Generating);

    wait_until(5, "segment 2", || reader.store().get(SegmentId(2)).unwrap().is_ready()).await;
    assert!(reader.play_now(SegmentId(2)).unwrap());
    let session = reader.playback();
    assert_eq!(session.active_segment_id, Some(SegmentId(2)));
    assert!(session.is_playing);

    assert!(matches!(
        reader.play_now(SegmentId(9)),
        Err(LecternError::Store(_))
    ));
}

#[tokio::test]
async fn test_clock_drives_a_full_sequence() {
    let gateway = Arc::new(MockGateway { duration: 0.03, ..MockGateway::with_delay(1) });
    let uploader = Arc::new(MockUploader::default());
    let reader = Arc::new(
        ReaderSession::new(&fast_config(), gateway.clone(), uploader.clone(), Box::new(ClockOutput::new())).unwrap(),
    );
    reader.set_source_text("art", ARTICLE);
    reader.enqueue_all();
    wait_until(5, "generation", || all_ready(&reader)).await;

    let cancel = CancellationToken::new();
    let clock = {
        let (reader, cancel) = (Arc::clone(&reader), cancel.clone());
        tokio::spawn(async move { reader.run_clock(Duration::from_millis(5), cancel).await })
    };

    reader.start_sequence_from(SegmentId(0)).unwrap();
    wait_until(5, "sequence end", || reader.playback().active_segment_id.is_none()).await;
    cancel.cancel();
    clock.await.unwrap();

    let stats = reader.telemetry();
    assert_eq!(stats.playback.advanced, 2);
    assert_eq!(stats.playback.sequences_finished, 1);
    assert!(!reader.playback().sequence_mode_enabled);
}

#[tokio::test]
async fn test_upload_errors_surface_through_the_session() {
    let gateway = Arc::new(MockGateway::with_delay(1));
    let uploader = Arc::new(MockUploader::default());
    let reader = reader(&gateway, &uploader);
    reader.set_source_text("art", ARTICLE);
    reader.enqueue_all();
    wait_until(5, "generation", || all_ready(&reader)).await;

    let err = reader.upload_all("nope").await.unwrap_err();
    assert!(matches!(err, LecternError::Pipeline(PipelineError::UnknownArticle { .. })));

    let summary = reader.upload_all("art").await.unwrap();
    assert_eq!((summary.total, summary.success, summary.failed), (3, 3, 0));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let gateway = Arc::new(MockGateway::with_delay(1));
    let uploader = Arc::new(MockUploader::default());
    let config = LecternConfig { upload_concurrency: 0, ..fast_config() };
    let result = ReaderSession::new(&config, gateway, uploader, Box::new(MockOutput::default()));
    assert!(matches!(result, Err(LecternError::Config(_))));
}

#[tokio::test]
async fn test_hydrated_segment_plays_on_the_clock_output() {
    let gateway = Arc::new(MockGateway::with_delay(1));
    let uploader = Arc::new(MockUploader::default());
    let reader =
        ReaderSession::new(&fast_config(), gateway.clone(), uploader.clone(), Box::new(ClockOutput::new())).unwrap();
    reader.set_source_text("art", ARTICLE);
    reader.load_audio_urls(&["https://cdn.test/art/segment-1.mp3".to_string()]);

    // No declared length and no timings: the text gives a provisional one
    reader.play(SegmentId(1)).unwrap();
    let session = reader.playback();
    assert_eq!(session.active_segment_id, Some(SegmentId(1)));
    assert!(session.is_playing);
    assert!(session.duration > 0.0);
    assert_eq!(gateway.calls(), 0);
}
