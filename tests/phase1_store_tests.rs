mod common;

use common::{make_ready, texts};
use lectern::kernel::segment::{AudioClip, SegmentId, SegmentStatus, UploadStatus, WordTiming};
use lectern::kernel::store::{SegmentStore, StoreDelta, StoreError, StoreEvent};
use std::collections::HashMap;

#[tokio::test]
async fn test_replace_creates_idle_segments_under_new_session() {
    let store = SegmentStore::new();
    let first = store.replace(Some("art-1".into()), texts(&["a", "b", "c"]));
    assert_eq!(store.len(), 3);
    assert!(store.snapshot().segments.iter().all(|s| s.status == SegmentStatus::Idle));

    let second = store.replace(Some("art-1".into()), texts(&["a", "b", "c"]));
    assert_ne!(first.token, second.token, "every replacement mints a new token");
    assert!(first.cancel.is_cancelled(), "old session is cancelled");
    assert!(!second.cancel.is_cancelled());
}

#[tokio::test]
async fn test_audio_present_iff_ready() {
    let store = SegmentStore::new();
    store.replace(Some("art".into()), texts(&["one", "two"]));
    let token = store.token();
    let id = SegmentId(0);

    store.apply(token, StoreDelta::GenerationStarted(id)).unwrap();
    let seg = store.get(id).unwrap();
    assert_eq!(seg.status, SegmentStatus::Generating);
    assert!(seg.audio.is_none());

    store
        .apply(token, StoreDelta::GenerationFailed { id, message: "quota".into() })
        .unwrap();
    let seg = store.get(id).unwrap();
    assert_eq!(seg.status, SegmentStatus::Error);
    assert_eq!(seg.error.as_deref(), Some("quota"));
    assert!(seg.audio.is_none());

    // Retry from error behaves like a first generation
    make_ready(&store, id, 1.5, None);
    let seg = store.get(id).unwrap();
    assert_eq!(seg.status, SegmentStatus::Ready);
    assert!(seg.audio.is_some());
    assert!(seg.error.is_none());

    for seg in store.snapshot().segments {
        assert_eq!(seg.status == SegmentStatus::Ready, seg.audio.is_some());
    }
}

#[tokio::test]
async fn test_illegal_transitions_are_rejected() {
    let store = SegmentStore::new();
    store.replace(None, texts(&["x"]));
    let token = store.token();
    let id = SegmentId(0);
    let audio = AudioClip::local(vec![1], "audio/mpeg", Some(1.0));

    // Success without a generation in flight
    let err = store
        .apply(token, StoreDelta::GenerationSucceeded { id, audio, word_timings: None })
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    // Double start
    store.apply(token, StoreDelta::GenerationStarted(id)).unwrap();
    assert!(store.apply(token, StoreDelta::GenerationStarted(id)).is_err());

    // Unknown id
    let err = store.apply(token, StoreDelta::GenerationStarted(SegmentId(9))).unwrap_err();
    assert_eq!(err, StoreError::UnknownSegment(SegmentId(9)));
}

#[tokio::test]
async fn test_stale_session_deltas_never_touch_new_list() {
    let store = SegmentStore::new();
    let old = store.replace(Some("art".into()), texts(&["old 0", "old 1"]));
    store.apply(old.token, StoreDelta::GenerationStarted(SegmentId(0))).unwrap();

    store.replace(Some("art".into()), texts(&["new 0", "new 1", "new 2"]));
    let late = AudioClip::local(vec![9; 4], "audio/mpeg", Some(1.0));
    let err = store
        .apply(old.token, StoreDelta::GenerationSucceeded { id: SegmentId(0), audio: late, word_timings: None })
        .unwrap_err();
    assert!(err.is_stale());

    let snap = store.snapshot();
    assert_eq!(snap.segments.len(), 3);
    assert!(snap.segments.iter().all(|s| s.status == SegmentStatus::Idle && s.audio.is_none()));
}

#[tokio::test]
async fn test_regeneration_clears_cloud_ref() {
    let store = SegmentStore::new();
    store.replace(Some("art".into()), texts(&["x"]));
    let token = store.token();
    let id = SegmentId(0);
    make_ready(&store, id, 1.0, None);

    store.apply(token, StoreDelta::UploadStarted(id)).unwrap();
    store
        .apply(token, StoreDelta::UploadSucceeded { id, cloud_url: "https://cdn/x.mp3".into() })
        .unwrap();
    let seg = store.get(id).unwrap();
    assert_eq!(seg.upload_status, UploadStatus::Success);
    assert_eq!(seg.cloud_url.as_deref(), Some("https://cdn/x.mp3"));

    // Ready segments cannot be re-generated without going through error
    assert!(store.apply(token, StoreDelta::GenerationStarted(id)).is_err());
    assert!(store.apply(token, StoreDelta::UploadStarted(id)).is_err(), "already stored");
}

#[tokio::test]
async fn test_hydration_from_urls_and_timings() {
    let store = SegmentStore::new();
    store.replace(Some("art".into()), texts(&["a", "b", "c"]));

    let urls = vec![
        "https://cdn/art/segment-0.mp3".to_string(),
        "https://cdn/art/segment-2.mp3?v=3".to_string(),
        "https://cdn/art/segment-7.mp3".to_string(),
        "https://cdn/art/cover.jpg".to_string(),
    ];
    let hydrated = store.load_audio_urls(&urls);
    assert_eq!(hydrated, vec![SegmentId(0), SegmentId(2)]);

    let seg = store.get(SegmentId(2)).unwrap();
    assert_eq!(seg.status, SegmentStatus::Ready);
    assert_eq!(seg.upload_status, UploadStatus::Success);
    assert_eq!(seg.cloud_url.as_deref(), Some("https://cdn/art/segment-2.mp3?v=3"));
    assert_eq!(store.get(SegmentId(1)).unwrap().status, SegmentStatus::Idle);

    let mut timings = HashMap::new();
    timings.insert("segment-0".to_string(), vec![WordTiming::new(0.6, 1.0), WordTiming::new(0.0, 0.5)]);
    timings.insert("bogus".to_string(), vec![WordTiming::new(0.0, 1.0)]);
    assert_eq!(store.load_segment_word_timings(&timings), 1);
    let words = store.get(SegmentId(0)).unwrap().word_timings.unwrap();
    assert_eq!(words[0].start, 0.0, "timings are sorted on load");
}

#[tokio::test]
async fn test_events_publish_in_commit_order() {
    let store = SegmentStore::new();
    let mut events = store.subscribe();
    let session = store.replace(None, texts(&["a"]));
    store.apply(session.token, StoreDelta::GenerationStarted(SegmentId(0))).unwrap();

    match events.recv().await.unwrap() {
        StoreEvent::Replaced { session: s, count } => {
            assert_eq!(s, session.token);
            assert_eq!(count, 1);
        }
        other => panic!("expected replace, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        StoreEvent::SegmentChanged { segment, .. } => assert_eq!(segment.status, SegmentStatus::Generating),
        other => panic!("expected change, got {other:?}"),
    }
    assert_eq!(store.version(), 2);
}
