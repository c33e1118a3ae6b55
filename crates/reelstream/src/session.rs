//! The streaming session.
//!
//! One session = one owner playing one manifest. The session runs as a single
//! spawned task driving a state machine:
//!
//! ```text
//! Resolving -> Downloading <-> LiveRefreshing
//!                  ^  |
//!                  |  v
//!                Paused          -> Ended | Failed(kind)
//! ```
//!
//! The task owns the fetch pipeline, the segment cache, the bitrate
//! controller and the append queue; everything observable from outside goes
//! through the command channel, the event broadcast, or the shared snapshot.
//! Live playlists are re-fetched by a small refresher task that feeds parsed
//! snapshots back over a channel; the session merges them at its suspension
//! points, deduplicating by segment identity.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::abr::{AbrConfig, AbrController};
use crate::append::{AppendConfig, AppendQueue};
use crate::consumer::{MediaSink, Transmuxer};
use crate::error::{FatalKind, FetchError};
use crate::estimator::BandwidthEstimator;
use crate::events::SessionEvent;
use crate::fetch::{FetchPipeline, SharedEstimator};
use crate::model::{
    ContainerKind, InitSegmentRef, MediaKind, OwnerId, PlaylistKind, PlaylistSnapshot, SegmentRef,
    SessionId, SessionState, Variant,
};
use crate::parser::parse_playlist;
use crate::proxy::{BodyKind, RequestHeaders, RequestProxy};
use crate::settings::Settings;
use crate::store::{SegmentKey, SegmentStore};

/// Commands an owner can send into a running session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Suspend the download loop; live refresh continues.
    Pause,
    /// Resume a paused download loop.
    Resume,
    /// Jump to the given position in seconds.
    Seek(f64),
    /// Pin the selection to a variant index, or `None` for automatic.
    SetQuality(Option<usize>),
}

/// Point-in-time transfer counters for a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    /// Total payload bytes downloaded.
    pub bytes_downloaded: u64,
    /// Segments successfully downloaded.
    pub segment_count: u64,
    /// Index of the active variant.
    pub current_variant_ix: usize,
    /// Smoothed bandwidth estimate in bits per second.
    pub bps_ema: f64,
}

/// State readable without touching the session task.
#[derive(Debug)]
pub(crate) struct SessionShared {
    state: Mutex<SessionState>,
    bytes_downloaded: AtomicU64,
    segment_count: AtomicU64,
    current_variant_ix: AtomicUsize,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Resolving),
            bytes_downloaded: AtomicU64::new(0),
            segment_count: AtomicU64::new(0),
            current_variant_ix: AtomicUsize::new(0),
        }
    }
}

/// Registry-side handle to a running session task.
pub struct SessionHandle {
    pub(crate) id: SessionId,
    pub(crate) owner_id: OwnerId,
    pub(crate) manifest_url: Url,
    pub(crate) resume_epoch: u64,
    pub(crate) cmd_tx: mpsc::Sender<SessionCommand>,
    pub(crate) events_tx: broadcast::Sender<SessionEvent>,
    pub(crate) cancel: CancellationToken,
    pub(crate) join: JoinHandle<()>,
    pub(crate) fetch: FetchPipeline,
    pub(crate) estimator: SharedEstimator,
    pub(crate) shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().expect("session state mutex poisoned")
    }

    /// Current transfer counters.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            bytes_downloaded: self.shared.bytes_downloaded.load(Ordering::Relaxed),
            segment_count: self.shared.segment_count.load(Ordering::Relaxed),
            current_variant_ix: self.shared.current_variant_ix.load(Ordering::Relaxed),
            bps_ema: self
                .estimator
                .lock()
                .expect("estimator mutex poisoned")
                .ema(),
        }
    }

    /// Subscribe to this session's events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }
}

/// Everything needed to start a session task.
pub(crate) struct SessionParams {
    pub id: SessionId,
    pub owner_id: OwnerId,
    pub manifest_url: Url,
    pub headers: Option<RequestHeaders>,
    pub settings: Arc<Settings>,
    pub proxy: Arc<dyn RequestProxy>,
    pub sink: Box<dyn MediaSink>,
    pub transmuxer: Option<Box<dyn Transmuxer>>,
}

/// Spawn a session task and return its handle.
pub(crate) fn spawn_session(params: SessionParams) -> SessionHandle {
    let SessionParams {
        id,
        owner_id,
        manifest_url,
        headers,
        settings,
        proxy,
        sink,
        transmuxer,
    } = params;

    let estimator: SharedEstimator = Arc::new(Mutex::new(match settings.initial_bandwidth_bps {
        Some(bps) => BandwidthEstimator::with_initial(
            settings.abr_ema_alpha,
            settings.abr_sample_window,
            bps,
        ),
        None => BandwidthEstimator::new(settings.abr_ema_alpha, settings.abr_sample_window),
    }));
    let fetch = FetchPipeline::new(proxy, &settings, estimator.clone());
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (events_tx, _) = broadcast::channel(64);
    let cancel = CancellationToken::new();
    let shared = Arc::new(SessionShared::new());
    let resume_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let driver = SessionDriver {
        id,
        settings: settings.clone(),
        manifest_url: manifest_url.clone(),
        headers,
        abr: AbrController::new(AbrConfig::from_settings(&settings), 0),
        store: SegmentStore::new(settings.max_buffer_bytes),
        queue: AppendQueue::new(sink, AppendConfig::from_settings(&settings)),
        transmuxer,
        estimator: estimator.clone(),
        fetch: fetch.clone(),
        variants: Vec::new(),
        segments: Vec::new(),
        downloaded_ids: HashSet::new(),
        known_ids: HashSet::new(),
        next_segment_ix: 0,
        current_variant_ix: 0,
        is_live: false,
        media_playlist_url: Arc::new(RwLock::new(manifest_url.clone())),
        target_duration: None,
        init_segment: None,
        cmd_rx,
        events_tx: events_tx.clone(),
        cancel: cancel.clone(),
        shared: shared.clone(),
        refresh_rx: None,
        paused: false,
        playback_signaled: false,
    };

    let join = tokio::spawn(driver.run());

    SessionHandle {
        id,
        owner_id,
        manifest_url,
        resume_epoch,
        cmd_tx,
        events_tx,
        cancel,
        join,
        fetch,
        estimator,
        shared,
    }
}

enum IdleOutcome {
    Cancelled,
    Command(SessionCommand),
    ChannelClosed,
    Refresh(PlaylistSnapshot),
    RefreshClosed,
    TimedOut,
}

struct SessionDriver {
    id: SessionId,
    settings: Arc<Settings>,
    manifest_url: Url,
    headers: Option<RequestHeaders>,

    abr: AbrController,
    store: SegmentStore,
    queue: AppendQueue,
    transmuxer: Option<Box<dyn Transmuxer>>,
    estimator: SharedEstimator,
    fetch: FetchPipeline,

    /// Renditions, bitrate-ascending. Empty when the manifest was a media
    /// playlist or a progressive file.
    variants: Vec<Variant>,
    segments: Vec<SegmentRef>,
    /// Identities already fetched and appended.
    downloaded_ids: HashSet<String>,
    /// Identities currently queued in `segments` (refresh dedup).
    known_ids: HashSet<String>,
    next_segment_ix: usize,
    current_variant_ix: usize,
    is_live: bool,
    /// Playlist the refresher re-fetches; swapped on variant switches.
    media_playlist_url: Arc<RwLock<Url>>,
    target_duration: Option<Duration>,
    init_segment: Option<InitSegmentRef>,

    cmd_rx: mpsc::Receiver<SessionCommand>,
    events_tx: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    shared: Arc<SessionShared>,
    refresh_rx: Option<mpsc::Receiver<PlaylistSnapshot>>,

    paused: bool,
    playback_signaled: bool,
}

impl SessionDriver {
    async fn run(mut self) {
        self.set_state(SessionState::Resolving);

        let container = match self.resolve().await {
            Ok(kind) => kind,
            Err(ResolveAbort::Fatal(kind)) => {
                self.fail(kind);
                return;
            }
            Err(ResolveAbort::Cancelled) => return,
        };

        match container {
            ContainerKind::Progressive => self.run_progressive().await,
            ContainerKind::Hls => {
                if self.is_live {
                    self.spawn_refresher();
                }
                self.set_state(SessionState::Downloading);
                self.run_download_loop().await;
            }
        }
    }

    // ----------------------------
    // Resolution
    // ----------------------------

    async fn resolve(&mut self) -> Result<ContainerKind, ResolveAbort> {
        let resp = match self
            .fetch
            .get(&self.manifest_url, BodyKind::Text, self.headers.as_ref())
            .await
        {
            Ok(resp) => resp,
            Err(FetchError::Cancelled) => return Err(ResolveAbort::Cancelled),
            Err(FetchError::Fatal { kind, .. }) => return Err(ResolveAbort::Fatal(kind)),
            Err(e) => {
                debug!(session = %self.id, error = %e, "manifest fetch failed");
                return Err(ResolveAbort::Fatal(FatalKind::ManifestUnavailable));
            }
        };

        let final_url = resp.final_url.clone();
        let text = resp.body.as_text().unwrap_or("");

        if !text.trim_start().starts_with("#EXTM3U") && looks_progressive(&final_url) {
            return Ok(ContainerKind::Progressive);
        }

        let snapshot = match parse_playlist(text, &final_url) {
            Ok(snap) => snap,
            Err(_) if looks_progressive(&final_url) => return Ok(ContainerKind::Progressive),
            Err(e) => {
                debug!(session = %self.id, error = %e, "manifest did not parse");
                return Err(ResolveAbort::Fatal(FatalKind::ManifestMalformed));
            }
        };

        match snapshot.kind {
            PlaylistKind::Master => {
                // Lowest bitrate first: the controller works on ascending lists.
                let mut variants = snapshot.variants;
                variants.reverse();
                self.variants = variants;

                let initial_ix = self.initial_variant_ix();
                self.abr = AbrController::new(AbrConfig::from_settings(&self.settings), initial_ix);
                self.current_variant_ix = initial_ix;
                self.shared
                    .current_variant_ix
                    .store(initial_ix, Ordering::Relaxed);

                let media_url = self.variants[initial_ix].url.clone();
                let (media, media_final_url) = self.fetch_media_playlist(&media_url).await?;
                self.adopt_media_snapshot(media, media_final_url, 0);
            }
            PlaylistKind::Media => {
                self.adopt_media_snapshot(snapshot, final_url, 0);
            }
        }

        self.emit(SessionEvent::Qualities {
            variants: self.variants.clone(),
            current_ix: self.current_variant_ix,
        });

        // Initialization segment, fetched once before any media data.
        if let Some(init) = self.pending_init_segment() {
            let init_ref = SegmentRef {
                sequence: 0,
                url: init.url,
                duration_s: 0.0,
                byte_range: init.byte_range,
            };
            match self.fetch.get_segment(&init_ref, self.headers.as_ref()).await {
                Ok(bytes) => self.queue.set_init(MediaKind::Video, bytes),
                Err(FetchError::Cancelled) => return Err(ResolveAbort::Cancelled),
                Err(FetchError::Fatal { kind, .. }) => return Err(ResolveAbort::Fatal(kind)),
                Err(e) => {
                    warn!(session = %self.id, error = %e, "init segment fetch failed");
                }
            }
        }

        Ok(ContainerKind::Hls)
    }

    /// First variant choice: throughput rule when an estimate (seeded or
    /// measured) exists, the middle rendition otherwise.
    fn initial_variant_ix(&self) -> usize {
        let ema = self
            .estimator
            .lock()
            .expect("estimator mutex poisoned")
            .ema();
        if !ema.is_finite() {
            return self.variants.len() / 2;
        }
        let safe_bw = self.settings.abr_safety_factor * ema;
        self.variants
            .iter()
            .rposition(|v| (v.bitrate_bps as f64) <= safe_bw)
            .unwrap_or(0)
    }

    async fn fetch_media_playlist(
        &self,
        url: &Url,
    ) -> Result<(PlaylistSnapshot, Url), ResolveAbort> {
        let resp = match self
            .fetch
            .get(url, BodyKind::Text, self.headers.as_ref())
            .await
        {
            Ok(resp) => resp,
            Err(FetchError::Cancelled) => return Err(ResolveAbort::Cancelled),
            Err(FetchError::Fatal { kind, .. }) => return Err(ResolveAbort::Fatal(kind)),
            Err(e) => {
                debug!(session = %self.id, error = %e, "media playlist fetch failed");
                return Err(ResolveAbort::Fatal(FatalKind::ManifestUnavailable));
            }
        };
        let snapshot = parse_playlist(resp.body.as_text().unwrap_or(""), &resp.final_url)
            .map_err(|_| ResolveAbort::Fatal(FatalKind::ManifestMalformed))?;
        Ok((snapshot, resp.final_url))
    }

    fn pending_init_segment(&self) -> Option<InitSegmentRef> {
        // Only the initial playlist's init segment is fetched; the append
        // queue enforces once-per-sub-queue anyway.
        self.init_segment.clone()
    }

    fn adopt_media_snapshot(&mut self, snapshot: PlaylistSnapshot, playlist_url: Url, next_ix: usize) {
        *self
            .media_playlist_url
            .write()
            .expect("playlist url lock poisoned") = playlist_url;
        self.known_ids = snapshot.segments.iter().map(|s| s.dedup_id()).collect();
        self.segments = snapshot.segments;
        self.is_live = snapshot.is_live;
        self.target_duration = snapshot.target_duration;
        self.init_segment = snapshot.init_segment;
        self.next_segment_ix = next_ix;
    }

    // ----------------------------
    // Live refresh
    // ----------------------------

    fn live_refresh_period(&self) -> Duration {
        self.settings
            .live_refresh_interval
            .or(self.target_duration)
            .unwrap_or(Settings::DEFAULT_LIVE_REFRESH)
    }

    fn spawn_refresher(&mut self) {
        let (tx, rx) = mpsc::channel(4);
        self.refresh_rx = Some(rx);

        let fetch = self.fetch.clone();
        let headers = self.headers.clone();
        let url_slot = self.media_playlist_url.clone();
        let cancel = self.cancel.clone();
        let period = self.live_refresh_period();
        let session = self.id;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the initial parse
            // isn't duplicated right away.
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let url = url_slot.read().expect("playlist url lock poisoned").clone();
                match fetch.get(&url, BodyKind::Text, headers.as_ref()).await {
                    Ok(resp) => {
                        let parsed =
                            parse_playlist(resp.body.as_text().unwrap_or(""), &resp.final_url);
                        match parsed {
                            Ok(snapshot) => {
                                if tx.send(snapshot).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(%session, error = %e, "live refresh parse failed");
                            }
                        }
                    }
                    // abort_all during a seek also clips the refresher; just
                    // pick up again on the next tick.
                    Err(FetchError::Cancelled) => continue,
                    Err(e) => {
                        debug!(%session, error = %e, "live refresh fetch failed");
                    }
                }
            }
        });
    }

    /// Fold a refreshed playlist into the queue, appending only segments we
    /// have never seen (neither queued nor downloaded).
    fn merge_refresh(&mut self, snapshot: PlaylistSnapshot) {
        if !snapshot.is_live {
            trace!(session = %self.id, "live playlist gained an end marker");
            self.is_live = false;
        }

        let mut appended = 0usize;
        for segment in snapshot.segments {
            let id = segment.dedup_id();
            if self.downloaded_ids.contains(&id) || !self.known_ids.insert(id) {
                continue;
            }
            self.segments.push(segment);
            appended += 1;
        }
        if appended > 0 {
            trace!(session = %self.id, appended, "live refresh queued new segments");
        }
    }

    fn drain_pending_refreshes(&mut self) {
        let mut snapshots = Vec::new();
        if let Some(rx) = self.refresh_rx.as_mut() {
            while let Ok(snapshot) = rx.try_recv() {
                snapshots.push(snapshot);
            }
        }
        for snapshot in snapshots {
            self.merge_refresh(snapshot);
        }
    }

    // ----------------------------
    // Download loop
    // ----------------------------

    async fn run_download_loop(&mut self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            self.drain_pending_refreshes();

            if self.paused {
                self.set_state(SessionState::Paused);
                match self.idle_wait(None).await {
                    IdleOutcome::Cancelled | IdleOutcome::ChannelClosed => return,
                    IdleOutcome::Command(cmd) => self.handle_command(cmd).await,
                    IdleOutcome::Refresh(snapshot) => self.merge_refresh(snapshot),
                    IdleOutcome::RefreshClosed => self.refresh_rx = None,
                    IdleOutcome::TimedOut => {}
                }
                continue;
            }

            // Caught up with the playlist.
            if self.next_segment_ix >= self.segments.len() {
                if self.is_live {
                    self.set_state(SessionState::LiveRefreshing);
                    match self.idle_wait(None).await {
                        IdleOutcome::Cancelled | IdleOutcome::ChannelClosed => return,
                        IdleOutcome::Command(cmd) => self.handle_command(cmd).await,
                        IdleOutcome::Refresh(snapshot) => {
                            self.merge_refresh(snapshot);
                            if self.next_segment_ix < self.segments.len() {
                                self.set_state(SessionState::Downloading);
                            }
                        }
                        IdleOutcome::RefreshClosed => self.refresh_rx = None,
                        IdleOutcome::TimedOut => {}
                    }
                    continue;
                }

                // VOD complete: flush the queue and signal the sink.
                if self.queue.drain().await.is_err() {
                    self.fail(FatalKind::SinkClosed);
                    return;
                }
                self.queue.end_of_stream();
                self.set_state(SessionState::Ended);
                return;
            }

            // Backpressure: hold while the forward buffer is full.
            if !self.queue.needs_more_data() {
                match self.idle_wait(Some(self.settings.buffer_poll_interval)).await {
                    IdleOutcome::Cancelled | IdleOutcome::ChannelClosed => return,
                    IdleOutcome::Command(cmd) => self.handle_command(cmd).await,
                    IdleOutcome::Refresh(snapshot) => self.merge_refresh(snapshot),
                    IdleOutcome::RefreshClosed => self.refresh_rx = None,
                    IdleOutcome::TimedOut => {}
                }
                continue;
            }

            self.set_state(SessionState::Downloading);

            let segment = self.segments[self.next_segment_ix].clone();

            // After a backwards seek the bytes are usually still cached;
            // replay them instead of going back to the network.
            let cache_key = SegmentKey {
                stream: self.current_variant_ix as u64,
                sequence: segment.sequence,
            };
            if let Some(bytes) = self.store.get(&cache_key) {
                trace!(
                    session = %self.id,
                    sequence = segment.sequence,
                    "serving segment from cache"
                );
                if self.process_segment(segment, bytes, false).await.is_err() {
                    return;
                }
                continue;
            }

            let fetch = self.fetch.clone();
            let headers = self.headers.clone();
            let seg_for_fetch = segment.clone();
            let fetch_fut =
                async move { fetch.get_segment(&seg_for_fetch, headers.as_ref()).await };

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            self.handle_command(cmd).await;
                            continue;
                        }
                        None => return,
                    }
                }
                result = fetch_fut => result,
            };

            match result {
                Ok(bytes) => {
                    if self.process_segment(segment, bytes, true).await.is_err() {
                        return;
                    }
                }
                Err(FetchError::Skip { url }) => {
                    debug!(session = %self.id, %url, "segment rotated away, skipping");
                    self.next_segment_ix += 1;
                }
                Err(FetchError::Fatal { kind, .. }) => {
                    self.fail(kind);
                    return;
                }
                Err(FetchError::Cancelled) => {
                    // A seek or teardown clipped this fetch; state is already
                    // consistent, just go around.
                }
                Err(e @ FetchError::Transient { .. }) => {
                    debug!(
                        session = %self.id,
                        error = %e,
                        delay = ?self.settings.transient_retry_delay,
                        "segment fetch exhausted retries, holding"
                    );
                    match self
                        .idle_wait(Some(self.settings.transient_retry_delay))
                        .await
                    {
                        IdleOutcome::Cancelled | IdleOutcome::ChannelClosed => return,
                        IdleOutcome::Command(cmd) => self.handle_command(cmd).await,
                        IdleOutcome::Refresh(snapshot) => self.merge_refresh(snapshot),
                        IdleOutcome::RefreshClosed => self.refresh_rx = None,
                        IdleOutcome::TimedOut => {}
                    }
                }
            }
        }
    }

    /// Wait for a command, a refreshed playlist, cancellation, or (when
    /// given) a timeout, whichever comes first.
    async fn idle_wait(&mut self, timeout: Option<Duration>) -> IdleOutcome {
        let refresh_rx = self.refresh_rx.as_mut();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => IdleOutcome::Cancelled,
            cmd = self.cmd_rx.recv() => match cmd {
                Some(cmd) => IdleOutcome::Command(cmd),
                None => IdleOutcome::ChannelClosed,
            },
            snapshot = async {
                match refresh_rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => match snapshot {
                Some(snapshot) => IdleOutcome::Refresh(snapshot),
                None => IdleOutcome::RefreshClosed,
            },
            _ = async {
                match timeout {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending().await,
                }
            } => IdleOutcome::TimedOut,
        }
    }

    // ----------------------------
    // Segment handling
    // ----------------------------

    /// Feed one segment's bytes downstream and advance the cursor. `fresh`
    /// marks bytes that just came off the network (cache replays keep the
    /// transfer counters untouched).
    async fn process_segment(
        &mut self,
        segment: SegmentRef,
        bytes: bytes::Bytes,
        fresh: bool,
    ) -> Result<(), ()> {
        if fresh {
            self.store.insert(
                SegmentKey {
                    stream: self.current_variant_ix as u64,
                    sequence: segment.sequence,
                },
                bytes.clone(),
            );
            self.downloaded_ids.insert(segment.dedup_id());
        }

        if let Some(transmuxer) = self.transmuxer.as_mut() {
            let mut chunks = transmuxer.push(bytes.clone());
            chunks.extend(transmuxer.flush());
            for chunk in chunks {
                self.queue.push_chunk(chunk);
            }
        } else {
            self.queue.enqueue(MediaKind::Video, bytes.clone());
        }

        if self.queue.drain().await.is_err() {
            self.fail(FatalKind::SinkClosed);
            return Err(());
        }

        self.next_segment_ix += 1;
        if fresh {
            self.shared.segment_count.fetch_add(1, Ordering::Relaxed);
            self.shared
                .bytes_downloaded
                .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        }

        // Playback readiness: one segment in, after a short grace.
        if !self.playback_signaled {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(()),
                _ = tokio::time::sleep(self.settings.startup_grace) => {}
            }
            self.playback_signaled = true;
            self.emit(SessionEvent::PlaybackReady);
        }

        self.emit_progress();

        self.maybe_switch_variant().await
    }

    fn emit_progress(&self) {
        let duration_s = if self.is_live {
            None
        } else {
            Some(self.segments.iter().map(|s| s.duration_s).sum())
        };
        self.emit(SessionEvent::Progress {
            current_s: self.queue.current_time(),
            duration_s,
            buffered_ahead_s: self.queue.buffered_ahead_s(),
        });
        self.emit(SessionEvent::Stats {
            bytes_downloaded: self.shared.bytes_downloaded.load(Ordering::Relaxed),
            segment_count: self.shared.segment_count.load(Ordering::Relaxed),
            bps_ema: self
                .estimator
                .lock()
                .expect("estimator mutex poisoned")
                .ema(),
        });
    }

    // ----------------------------
    // Variant switching
    // ----------------------------

    async fn maybe_switch_variant(&mut self) -> Result<(), ()> {
        if self.variants.len() < 2 {
            return Ok(());
        }

        let buffer = self.queue.buffered_ahead_s();
        let target = {
            let est = self.estimator.lock().expect("estimator mutex poisoned");
            self.abr
                .select(&self.variants, &est, buffer, Instant::now())
        };

        if target == self.current_variant_ix {
            return Ok(());
        }
        self.switch_variant(target).await
    }

    async fn switch_variant(&mut self, target: usize) -> Result<(), ()> {
        let Some(variant) = self.variants.get(target).cloned() else {
            return Ok(());
        };
        let previous = self.current_variant_ix;

        let (snapshot, playlist_url) = match self.fetch_media_playlist(&variant.url).await {
            Ok(fetched) => fetched,
            Err(ResolveAbort::Cancelled) => return Err(()),
            Err(ResolveAbort::Fatal(kind)) if matches!(kind, FatalKind::AuthExpired | FatalKind::StreamEnded) => {
                self.fail(kind);
                return Err(());
            }
            Err(_) => {
                // Playlist unavailable or malformed: stay on the old rendition.
                warn!(session = %self.id, target, "variant playlist unusable, keeping current");
                self.abr.revert(previous);
                return Ok(());
            }
        };

        // Realign on the sequence we were about to download.
        let current_sequence = self
            .segments
            .get(self.next_segment_ix)
            .map(|s| s.sequence)
            .or_else(|| self.segments.last().map(|s| s.sequence + 1))
            .unwrap_or(snapshot.media_sequence);

        let new_start = match snapshot
            .segments
            .iter()
            .position(|s| s.sequence >= current_sequence)
        {
            Some(ix) => ix,
            None => {
                warn!(
                    session = %self.id,
                    current_sequence,
                    "switched playlist holds no continuation sequence, starting over"
                );
                0
            }
        };

        debug!(
            session = %self.id,
            from = previous,
            to = target,
            current_sequence,
            new_start,
            "switching variant"
        );

        self.adopt_media_snapshot(snapshot, playlist_url, new_start);
        self.current_variant_ix = target;
        self.shared
            .current_variant_ix
            .store(target, Ordering::Relaxed);
        self.emit(SessionEvent::Qualities {
            variants: self.variants.clone(),
            current_ix: target,
        });
        Ok(())
    }

    // ----------------------------
    // Commands
    // ----------------------------

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Pause => {
                if !self.paused {
                    debug!(session = %self.id, "paused");
                    self.paused = true;
                }
            }
            SessionCommand::Resume => {
                if self.paused {
                    debug!(session = %self.id, "resumed");
                    self.paused = false;
                    self.set_state(SessionState::Downloading);
                }
            }
            SessionCommand::Seek(t_seconds) => self.seek(t_seconds),
            SessionCommand::SetQuality(Some(ix)) => {
                self.abr.lock(Some(ix));
                let _ = self.switch_variant(ix.min(self.variants.len().saturating_sub(1))).await;
            }
            SessionCommand::SetQuality(None) => {
                self.abr.lock(None);
            }
        }
    }

    /// Jump the download cursor to the segment containing `t_seconds`.
    fn seek(&mut self, t_seconds: f64) {
        self.fetch.abort_all();
        self.queue.clear_pending();

        let mut elapsed = 0.0f64;
        let mut target_ix = self.segments.len();
        for (ix, segment) in self.segments.iter().enumerate() {
            if elapsed + segment.duration_s > t_seconds {
                target_ix = ix;
                break;
            }
            elapsed += segment.duration_s;
        }

        debug!(session = %self.id, t_seconds, target_ix, "seek");
        self.next_segment_ix = target_ix;
        self.paused = false;
        self.set_state(SessionState::Downloading);
    }

    // ----------------------------
    // Progressive path
    // ----------------------------

    async fn run_progressive(&mut self) {
        self.set_state(SessionState::Downloading);

        let bytes = match self
            .fetch
            .get(&self.manifest_url, BodyKind::Bytes, self.headers.as_ref())
            .await
        {
            Ok(resp) => resp.body.into_bytes(),
            Err(FetchError::Cancelled) => return,
            Err(FetchError::Fatal { kind, .. }) => {
                self.fail(kind);
                return;
            }
            Err(e) => {
                debug!(session = %self.id, error = %e, "progressive fetch failed");
                self.fail(FatalKind::ManifestUnavailable);
                return;
            }
        };

        self.shared
            .bytes_downloaded
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.shared.segment_count.fetch_add(1, Ordering::Relaxed);
        self.queue.enqueue(MediaKind::Video, bytes);
        if self.queue.drain().await.is_err() {
            self.fail(FatalKind::SinkClosed);
            return;
        }
        self.queue.end_of_stream();
        self.emit(SessionEvent::PlaybackReady);
        self.set_state(SessionState::Ended);
    }

    // ----------------------------
    // State & events
    // ----------------------------

    fn set_state(&self, state: SessionState) {
        let mut guard = self
            .shared
            .state
            .lock()
            .expect("session state mutex poisoned");
        if *guard != state {
            trace!(session = %self.id, from = %*guard, to = %state, "state change");
            *guard = state;
            drop(guard);
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn fail(&self, kind: FatalKind) {
        warn!(session = %self.id, %kind, "session failed");
        self.set_state(SessionState::Failed(kind));
        self.emit(SessionEvent::Error {
            kind,
            message: kind.to_string(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events_tx.send(event);
    }
}

enum ResolveAbort {
    Fatal(FatalKind),
    Cancelled,
}

/// Heuristic for direct-file URLs: a media file extension on the final path
/// segment. Playlist-looking content always wins over this.
fn looks_progressive(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    [".mp4", ".m4v", ".webm", ".mov"]
        .iter()
        .any(|ext| path.ends_with(ext))
}
