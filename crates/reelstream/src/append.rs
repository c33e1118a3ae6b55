//! The append queue.
//!
//! A bounded FIFO between the download loop and the consumer sink, with one
//! sub-queue per media kind. The queue owns three responsibilities:
//!
//! - init segments are appended exactly once per sub-queue, before any media
//!   data for that kind;
//! - a `QuotaExceeded` append triggers sink-side eviction (drop behind the
//!   playhead, then trim the buffered span to its ceiling), re-queues the
//!   rejected chunk at the head and retries after a short delay;
//! - [`AppendQueue::needs_more_data`] gates the producer: downloads stop once
//!   enough media is buffered ahead of the playhead.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::consumer::{MediaSink, SinkError};
use crate::model::{MediaChunk, MediaKind};
use crate::settings::Settings;

/// Buffering windows and retry cadence for the queue.
#[derive(Debug, Clone)]
pub struct AppendConfig {
    /// Seconds kept behind the playhead when evicting for quota.
    pub keep_behind_s: f64,
    /// Ceiling on the total buffered span.
    pub buffer_max_s: f64,
    /// Forward buffer target gating the producer.
    pub buffer_ahead_limit_s: f64,
    /// Delay before retrying a quota-rejected append.
    pub quota_retry_delay: Duration,
    /// Maximum queued chunks per sub-queue before the producer is gated.
    pub max_pending: usize,
}

impl AppendConfig {
    /// Derive the queue configuration from engine settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            keep_behind_s: settings.keep_behind.as_secs_f64(),
            buffer_max_s: settings.buffer_max.as_secs_f64(),
            buffer_ahead_limit_s: settings.buffer_ahead_limit.as_secs_f64(),
            quota_retry_delay: settings.quota_retry_delay,
            max_pending: settings.max_pending_chunks,
        }
    }
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[derive(Debug, Default)]
struct SubQueue {
    pending: VecDeque<Bytes>,
    init: Option<Bytes>,
    init_sent: bool,
}

/// Bounded feed from the download loop into the consumer sink.
pub struct AppendQueue {
    sink: Box<dyn MediaSink>,
    config: AppendConfig,
    video: SubQueue,
    audio: SubQueue,
    ended: bool,
}

impl AppendQueue {
    /// Wrap `sink` with the given configuration.
    pub fn new(sink: Box<dyn MediaSink>, config: AppendConfig) -> Self {
        Self {
            sink,
            config,
            video: SubQueue::default(),
            audio: SubQueue::default(),
            ended: false,
        }
    }

    fn sub(&mut self, kind: MediaKind) -> &mut SubQueue {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        }
    }

    /// Register the init segment for `kind`. Only the first registration per
    /// sub-queue takes effect; it is appended before any media data.
    pub fn set_init(&mut self, kind: MediaKind, data: Bytes) {
        let sub = self.sub(kind);
        if sub.init.is_none() && !sub.init_sent {
            sub.init = Some(data);
        }
    }

    /// Queue media bytes for `kind`.
    pub fn enqueue(&mut self, kind: MediaKind, data: Bytes) {
        self.sub(kind).pending.push_back(data);
    }

    /// Route one transmuxer chunk into the queue.
    pub fn push_chunk(&mut self, chunk: MediaChunk) {
        if let Some(init) = chunk.init {
            self.set_init(chunk.kind, init);
        }
        if let Some(data) = chunk.data {
            self.enqueue(chunk.kind, data);
        }
    }

    /// Append everything queued, init segments first, in FIFO order per
    /// sub-queue. Quota rejections evict and retry; only a closed sink
    /// escapes as an error.
    pub async fn drain(&mut self) -> Result<(), SinkError> {
        self.drain_kind(MediaKind::Video).await?;
        self.drain_kind(MediaKind::Audio).await
    }

    async fn drain_kind(&mut self, kind: MediaKind) -> Result<(), SinkError> {
        if !self.sub(kind).init_sent {
            if let Some(init) = self.sub(kind).init.take() {
                self.append_with_quota_retry(kind, init).await?;
                self.sub(kind).init_sent = true;
            }
        }

        while let Some(data) = self.sub(kind).pending.pop_front() {
            self.append_with_quota_retry(kind, data).await?;
        }
        Ok(())
    }

    async fn append_with_quota_retry(
        &mut self,
        kind: MediaKind,
        data: Bytes,
    ) -> Result<(), SinkError> {
        loop {
            match self.sink.append(kind, data.clone()).await {
                Ok(()) => return Ok(()),
                Err(SinkError::QuotaExceeded) => {
                    debug!(?kind, bytes = data.len(), "sink quota exceeded, evicting");
                    self.evict_for_quota().await?;
                    tokio::time::sleep(self.config.quota_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Free sink space: drop `[buffered_start, current_time - keep_behind]`,
    /// then trim the buffered span down to its ceiling if still oversized.
    async fn evict_for_quota(&mut self) -> Result<(), SinkError> {
        let buffered = self.sink.buffered();
        let Some(&(start, _)) = buffered.first() else {
            return Ok(());
        };

        let keep_from = self.sink.current_time() - self.config.keep_behind_s;
        if keep_from > start {
            trace!(start, keep_from, "evicting played-out media");
            self.sink.remove(start, keep_from).await?;
        }

        let total: f64 = buffered.iter().map(|(s, e)| e - s).sum();
        if total > self.config.buffer_max_s {
            let trim_from = keep_from.max(start);
            let excess = total - self.config.buffer_max_s;
            trace!(trim_from, excess, "trimming buffered span to ceiling");
            self.sink.remove(trim_from, trim_from + excess).await?;
        }

        Ok(())
    }

    /// True while the producer should keep downloading: buffered media is
    /// empty, or the window ahead of the playhead is below the limit and no
    /// sub-queue is saturated.
    pub fn needs_more_data(&self) -> bool {
        if self.video.pending.len() >= self.config.max_pending
            || self.audio.pending.len() >= self.config.max_pending
        {
            return false;
        }

        let buffered = self.sink.buffered();
        let Some(&(_, end)) = buffered.last() else {
            return true;
        };
        (end - self.sink.current_time()) < self.config.buffer_ahead_limit_s
    }

    /// Seconds buffered ahead of the playhead (0 when nothing is buffered).
    pub fn buffered_ahead_s(&self) -> f64 {
        let buffered = self.sink.buffered();
        let Some(&(_, end)) = buffered.last() else {
            return 0.0;
        };
        (end - self.sink.current_time()).max(0.0)
    }

    /// Playback position, straight from the sink.
    pub fn current_time(&self) -> f64 {
        self.sink.current_time()
    }

    /// Drop all queued-but-unappended chunks (seek, teardown). Appended media
    /// and the init discipline are untouched.
    pub fn clear_pending(&mut self) {
        self.video.pending.clear();
        self.audio.pending.clear();
    }

    /// Signal end-of-stream to the sink once.
    pub fn end_of_stream(&mut self) {
        if !self.ended {
            self.ended = true;
            self.sink.end_of_stream();
        }
    }
}
