//! End-to-end engine tests against a local in-memory HLS origin.
//!
//! These drive the public registry API the way a host player would: open a
//! manifest, watch events, pause/seek/switch, and assert what reached the
//! sink. All network traffic stays on localhost.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reelstream::{
    FatalKind, HttpRequestProxy, OwnerId, SessionEvent, SessionId, SessionRegistry, SessionState,
    Settings,
};


use fixture::{MediaSpec, RecordingSink, StreamFixture, fast_settings, wait_until};

const WAIT: Duration = Duration::from_secs(5);

fn registry(settings: Settings) -> SessionRegistry {
    SessionRegistry::new(settings, Arc::new(HttpRequestProxy::new()))
}

/// Collect a session's events in the background for later inspection.
fn collect_events(
    registry: &SessionRegistry,
    id: SessionId,
) -> Arc<Mutex<Vec<SessionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let mut rx = registry.events(id).expect("session must exist");
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            sink.lock().unwrap().push(event);
        }
    });
    events
}

async fn wait_for_state(registry: &SessionRegistry, id: SessionId, want: SessionState) -> bool {
    wait_until(WAIT, || registry.state(id).ok() == Some(want)).await
}

// ----------------------------
// VOD basics
// ----------------------------

#[tokio::test]
async fn vod_master_plays_all_segments_in_order() {
    let fx = StreamFixture::new();
    fx.put_master(
        "master.m3u8",
        &[(2_000_000, "v0.m3u8"), (5_000_000, "v1.m3u8")],
    );
    fx.put_media(&MediaSpec::vod("v0.m3u8", "v0-", 5));
    fx.put_media(&MediaSpec::vod("v1.m3u8", "v1-", 5));
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings().initial_bandwidth_bps(Some(1_000_000.0)));
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("master.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    assert!(wait_for_state(&reg, id, SessionState::Ended).await);

    // Seeded at 1 Mbps, the 2 Mbps rendition is already too rich: playback
    // starts (and stays) on the lowest variant.
    assert_eq!(
        sink.markers(),
        vec!["v0-0", "v0-1", "v0-2", "v0-3", "v0-4"]
    );
    assert_eq!(fx.count("v1.m3u8"), 0, "high variant playlist untouched");
    assert!(sink.ended(), "sink must see end-of-stream");

    let stats = reg.stats(id).unwrap();
    assert_eq!(stats.segment_count, 5);
    assert_eq!(stats.bytes_downloaded, sink.appended_bytes());
}

#[tokio::test]
async fn media_playlist_manifest_needs_no_master() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("direct.m3u8", "d", 3));
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings());
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("direct.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    assert!(wait_for_state(&reg, id, SessionState::Ended).await);
    assert_eq!(sink.markers(), vec!["d0", "d1", "d2"]);
}

#[tokio::test]
async fn transmuxed_chunks_reach_the_sink_in_order() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "t", 4));
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings());
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("vod.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            Some(Box::new(reelstream::PassthroughTransmuxer::new())),
        )
        .unwrap();

    assert!(wait_for_state(&reg, id, SessionState::Ended).await);
    assert_eq!(sink.markers(), vec!["t0", "t1", "t2", "t3"]);
}

// ----------------------------
// Adaptive switching
// ----------------------------

#[tokio::test]
async fn switches_up_without_sequence_regression() {
    let fx = StreamFixture::new();
    fx.put_master(
        "master.m3u8",
        &[(2_000_000, "v0.m3u8"), (5_000_000, "v1.m3u8")],
    );
    let mut v0 = MediaSpec::vod("v0.m3u8", "v0-", 10);
    v0.payload_bytes = 200_000;
    fx.put_media(&v0);
    let mut v1 = MediaSpec::vod("v1.m3u8", "v1-", 10);
    v1.payload_bytes = 200_000;
    fx.put_media(&v1);
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(
        fast_settings()
            .initial_bandwidth_bps(Some(1_000_000.0))
            .buffer_ahead_limit(Duration::from_secs(600)),
    );
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("master.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();
    let events = collect_events(&reg, id);

    assert!(wait_for_state(&reg, id, SessionState::Ended).await);

    let markers = sink.markers();
    let parsed: Vec<(String, u64)> = markers
        .iter()
        .map(|m| {
            let (variant, seq) = m.rsplit_once('-').unwrap();
            (variant.to_string(), seq.parse().unwrap())
        })
        .collect();

    // Local loopback measures far above 5 Mbps, so once the buffer settles
    // the controller must move up.
    assert!(
        parsed.iter().any(|(v, _)| v == "v1"),
        "expected an up-switch, got {markers:?}"
    );

    // Sequences cover 0..=9 exactly once, strictly increasing, and the
    // variant never flips back once switched.
    let seqs: Vec<u64> = parsed.iter().map(|(_, s)| *s).collect();
    assert_eq!(seqs, (0..10).collect::<Vec<_>>());
    let first_v1 = parsed.iter().position(|(v, _)| v == "v1").unwrap();
    assert!(parsed[..first_v1].iter().all(|(v, _)| v == "v0"));
    assert!(parsed[first_v1..].iter().all(|(v, _)| v == "v1"));

    // The quality change was announced.
    assert!(wait_until(WAIT, || {
        events.lock().unwrap().iter().any(|e| matches!(
            e,
            SessionEvent::Qualities { current_ix: 1, .. }
        ))
    })
    .await);
}

#[tokio::test]
async fn manual_quality_lock_pins_the_variant() {
    let fx = StreamFixture::new();
    fx.put_master(
        "master.m3u8",
        &[(2_000_000, "v0.m3u8"), (5_000_000, "v1.m3u8")],
    );
    fx.put_media(&MediaSpec::vod("v0.m3u8", "v0-", 6));
    fx.put_media(&MediaSpec::vod("v1.m3u8", "v1-", 6));
    // Slow the low rendition down so the lock command lands mid-stream.
    for seq in 0..6 {
        fx.delay_path(&format!("seg/v0-{seq}.ts"), Duration::from_millis(40));
    }
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(
        fast_settings()
            .initial_bandwidth_bps(Some(1_000_000.0))
            .buffer_ahead_limit(Duration::from_secs(600)),
    );
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("master.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    assert!(wait_until(WAIT, || sink.append_count() >= 1).await);
    reg.set_quality(id, Some(1)).await.unwrap();

    assert!(wait_for_state(&reg, id, SessionState::Ended).await);
    let markers = sink.markers();
    assert!(
        markers.iter().any(|m| m.starts_with("v1-")),
        "locked variant must take over, got {markers:?}"
    );
    assert_eq!(reg.stats(id).unwrap().current_variant_ix, 1);
}

// ----------------------------
// Live playlists
// ----------------------------

#[tokio::test]
async fn live_refresh_appends_only_new_segments() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::live("live.m3u8", "L", 100, 4));
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(
        fast_settings()
            .live_refresh_interval(Some(Duration::from_millis(100)))
            .buffer_ahead_limit(Duration::from_secs(600)),
    );
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("live.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    // Initial window drains, the session parks waiting for the playlist to
    // move.
    assert!(wait_until(WAIT, || sink.append_count() == 4).await);
    assert!(wait_for_state(&reg, id, SessionState::LiveRefreshing).await);

    // The origin slides its window: 100 drops off, 104 and 105 appear.
    fx.put_media(&MediaSpec::live("live.m3u8", "L", 101, 5));

    assert!(wait_until(WAIT, || sink.append_count() == 6).await);
    assert_eq!(
        sink.markers(),
        vec!["L100", "L101", "L102", "L103", "L104", "L105"]
    );

    // The overlapping window was deduplicated, not re-fetched.
    for seq in 100..=103 {
        assert_eq!(fx.count(&format!("seg/L{seq}.ts")), 1, "seq {seq} refetched");
    }

    reg.close(id).await.unwrap();
}

// ----------------------------
// Failure classification
// ----------------------------

#[tokio::test]
async fn rotated_segment_is_skipped_silently() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "s", 3));
    fx.fail_path("seg/s1.ts", 404, None);
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings());
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("vod.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();
    let events = collect_events(&reg, id);

    assert!(wait_for_state(&reg, id, SessionState::Ended).await);
    assert_eq!(sink.markers(), vec!["s0", "s2"]);
    assert_eq!(fx.count("seg/s1.ts"), 1, "404 must not be retried");
    assert!(
        !events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SessionEvent::Error { .. })),
        "a rotated segment is not an error"
    );
}

#[tokio::test]
async fn auth_rejection_fails_fast() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "s", 3));
    fx.fail_path("seg/s0.ts", 403, None);
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings());
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("vod.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();
    let events = collect_events(&reg, id);

    assert!(wait_for_state(&reg, id, SessionState::Failed(FatalKind::AuthExpired)).await);
    assert_eq!(fx.count("seg/s0.ts"), 1, "auth failures are not retried");
    assert!(wait_until(WAIT, || {
        events.lock().unwrap().iter().any(|e| matches!(
            e,
            SessionEvent::Error {
                kind: FatalKind::AuthExpired,
                ..
            }
        ))
    })
    .await);
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "s", 2));
    fx.fail_path("seg/s0.ts", 500, Some(2));
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings());
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("vod.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    assert!(wait_for_state(&reg, id, SessionState::Ended).await);
    assert_eq!(sink.markers(), vec!["s0", "s1"]);
    assert_eq!(fx.count("seg/s0.ts"), 3, "two failures plus the success");
}

#[tokio::test]
async fn stream_gone_upstream_is_terminal() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "s", 2));
    fx.fail_path("seg/s0.ts", 410, None);
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings());
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("vod.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    assert!(wait_for_state(&reg, id, SessionState::Failed(FatalKind::StreamEnded)).await);
}

#[tokio::test]
async fn unparseable_manifest_is_malformed() {
    let fx = StreamFixture::new();
    fx.set_text("weird.m3u8", "this is not a playlist");
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings());
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("weird.m3u8").unwrap().as_str(),
            None,
            Box::new(sink),
            None,
        )
        .unwrap();

    assert!(wait_for_state(&reg, id, SessionState::Failed(FatalKind::ManifestMalformed)).await);
}

// ----------------------------
// Quota pressure
// ----------------------------

#[tokio::test]
async fn sink_quota_rejection_evicts_and_recovers() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "s", 2));
    let base = fx.start().await;

    let sink = RecordingSink::new();
    {
        // Mid-playback picture: 50 s buffered, playhead at 40 s, and the
        // next two appends bounce off the quota.
        let mut state = sink.0.lock().unwrap();
        state.buffered_end = 50.0;
        state.current_time = 40.0;
        state.quota_failures = 2;
    }

    let mut reg = registry(fast_settings().buffer_ahead_limit(Duration::from_secs(600)));
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("vod.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    assert!(wait_for_state(&reg, id, SessionState::Ended).await);

    let state = sink.0.lock().unwrap();
    assert_eq!(state.appends.len(), 2, "chunks must land after eviction");
    // First eviction keeps 10 s behind the 40 s playhead.
    assert_eq!(state.removes.first(), Some(&(0.0, 30.0)));
}

// ----------------------------
// Backpressure
// ----------------------------

#[tokio::test]
async fn download_loop_is_gated_by_the_forward_buffer() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "s", 10));
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings()); // 30 s ahead limit, 6 s chunks
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("vod.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    // Five 6 s chunks fill the 30 s window; the sixth must not start.
    assert!(wait_until(WAIT, || sink.append_count() == 5).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.append_count(), 5);
    assert_eq!(fx.count("seg/s5.ts"), 0, "gated segment must not be fetched");

    // Playback advances, the window reopens, the stream finishes.
    sink.set_current_time(40.0);
    assert!(wait_for_state(&reg, id, SessionState::Ended).await);
    assert_eq!(sink.append_count(), 10);

    // Both halves arrived in order.
    let expected: Vec<String> = (0..10).map(|i| format!("s{i}")).collect();
    assert_eq!(sink.markers(), expected);
}

// ----------------------------
// Pause / resume / seek
// ----------------------------

#[tokio::test]
async fn pause_holds_the_cursor_and_resume_continues() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "s", 8));
    for seq in 0..8 {
        fx.delay_path(&format!("seg/s{seq}.ts"), Duration::from_millis(30));
    }
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings().buffer_ahead_limit(Duration::from_secs(600)));
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("vod.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    assert!(wait_until(WAIT, || sink.append_count() >= 2).await);
    reg.pause(id).await.unwrap();
    assert!(wait_for_state(&reg, id, SessionState::Paused).await);

    let frozen = sink.append_count();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(sink.append_count(), frozen, "paused session kept appending");

    reg.resume(id).await.unwrap();
    assert!(wait_for_state(&reg, id, SessionState::Ended).await);

    // No segment was skipped or duplicated across the pause.
    let expected: Vec<String> = (0..8).map(|i| format!("s{i}")).collect();
    assert_eq!(sink.markers(), expected);
}

#[tokio::test]
async fn seek_is_idempotent_and_lands_on_the_right_segment() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "s", 10));
    for seq in 0..10 {
        fx.delay_path(&format!("seg/s{seq}.ts"), Duration::from_millis(50));
    }
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings().buffer_ahead_limit(Duration::from_secs(600)));
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("vod.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    assert!(wait_until(WAIT, || sink.append_count() >= 1).await);
    // 30 s with 6 s segments is the start of segment 5. Twice: the second
    // seek must be a no-op.
    reg.seek(id, 30.0).await.unwrap();
    reg.seek(id, 30.0).await.unwrap();

    assert!(wait_for_state(&reg, id, SessionState::Ended).await);

    let markers = sink.markers();
    let tail: Vec<String> = (5..10).map(|i| format!("s{i}")).collect();
    assert!(
        markers.ends_with(&tail),
        "expected the tail to run from s5, got {markers:?}"
    );
    for skipped in ["s2", "s3", "s4"] {
        assert!(
            !markers.iter().any(|m| m == skipped),
            "segment {skipped} should have been jumped over, got {markers:?}"
        );
    }
}

#[tokio::test]
async fn seeking_back_replays_from_the_segment_cache() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "s", 10));
    for seq in 0..10 {
        fx.delay_path(&format!("seg/s{seq}.ts"), Duration::from_millis(20));
    }
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings().buffer_ahead_limit(Duration::from_secs(600)));
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("vod.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    assert!(wait_until(WAIT, || sink.append_count() >= 4).await);
    reg.seek(id, 0.0).await.unwrap();
    assert!(wait_for_state(&reg, id, SessionState::Ended).await);

    let markers = sink.markers();
    // The rewound stretch was appended a second time...
    assert!(
        markers.iter().filter(|m| m.as_str() == "s0").count() == 2,
        "expected s0 replayed once, got {markers:?}"
    );
    // ...after the seek the full tail ran through to the end...
    let tail: Vec<String> = (0..10).map(|i| format!("s{i}")).collect();
    assert!(markers.ends_with(&tail), "unexpected tail in {markers:?}");
    // ...and the replayed segments came from the cache, not the network.
    for seq in 0..3 {
        assert_eq!(fx.count(&format!("seg/s{seq}.ts")), 1, "seq {seq} refetched");
    }
}

// ----------------------------
// Registry rules
// ----------------------------

#[tokio::test]
async fn one_stream_per_owner() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::live("live.m3u8", "L", 0, 3));
    let base = fx.start().await;
    let url = base.join("live.m3u8").unwrap();

    let mut reg = registry(fast_settings());
    let first = reg
        .open(
            OwnerId::from("tab-1"),
            url.as_str(),
            None,
            Box::new(RecordingSink::new()),
            None,
        )
        .unwrap();
    // A second detection for the same owner is dropped on the floor.
    let duplicate = reg
        .open(
            OwnerId::from("tab-1"),
            url.as_str(),
            None,
            Box::new(RecordingSink::new()),
            None,
        )
        .unwrap();
    assert_eq!(first, duplicate);

    // A different owner gets its own session.
    let other = reg
        .open(
            OwnerId::from("tab-2"),
            url.as_str(),
            None,
            Box::new(RecordingSink::new()),
            None,
        )
        .unwrap();
    assert_ne!(first, other);

    reg.close_owner(&OwnerId::from("tab-1")).await.unwrap();
    assert!(reg.session_for_owner(&OwnerId::from("tab-1")).is_none());
    reg.close(other).await.unwrap();
}

#[tokio::test]
async fn close_stops_all_activity() {
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "s", 20));
    for seq in 0..20 {
        fx.delay_path(&format!("seg/s{seq}.ts"), Duration::from_millis(30));
    }
    let base = fx.start().await;

    let sink = RecordingSink::new();
    let mut reg = registry(fast_settings().buffer_ahead_limit(Duration::from_secs(600)));
    let id = reg
        .open(
            OwnerId::from("tab-1"),
            base.join("vod.m3u8").unwrap().as_str(),
            None,
            Box::new(sink.clone()),
            None,
        )
        .unwrap();

    assert!(wait_until(WAIT, || sink.append_count() >= 1).await);
    reg.close(id).await.unwrap();

    let frozen = sink.append_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.append_count(), frozen, "closed session kept appending");
    assert!(matches!(
        reg.state(id),
        Err(reelstream::EngineError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn sessions_persist_and_restore_across_registries() {
    let dir = tempfile::tempdir().unwrap();
    let fx = StreamFixture::new();
    fx.put_media(&MediaSpec::vod("vod.m3u8", "s", 3));
    let base = fx.start().await;
    let url = base.join("vod.m3u8").unwrap();

    let settings = fast_settings().state_dir(Some(dir.path().to_path_buf()));

    let id;
    {
        let sink = RecordingSink::new();
        let mut reg = registry(settings.clone());
        id = reg
            .open(
                OwnerId::from("tab-1"),
                url.as_str(),
                None,
                Box::new(sink.clone()),
                None,
            )
            .unwrap();
        assert!(wait_for_state(&reg, id, SessionState::Ended).await);
        reg.save(id).unwrap();
        assert!(dir.path().join(format!("session_{id}.json")).exists());
        // Registry dropped without close: the persisted record survives.
    }

    // A fresh registry (new process, same state dir) restores the session;
    // it re-resolves from scratch and plays again into the new sink.
    let sink = RecordingSink::new();
    let mut reg = registry(settings);
    let restored = reg.restore(id, Box::new(sink.clone()), None).unwrap();
    assert_eq!(restored, id);
    assert!(wait_for_state(&reg, id, SessionState::Ended).await);
    assert_eq!(sink.markers(), vec!["s0", "s1", "s2"]);

    // Teardown erases the persisted record.
    reg.close(id).await.unwrap();
    assert!(!dir.path().join(format!("session_{id}.json")).exists());
}

#[tokio::test]
async fn restore_without_a_record_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut reg = registry(fast_settings().state_dir(Some(dir.path().to_path_buf())));
    let err = reg
        .restore(SessionId(42), Box::new(RecordingSink::new()), None)
        .unwrap_err();
    assert!(matches!(err, reelstream::EngineError::NoPersistedState(_)));
}
