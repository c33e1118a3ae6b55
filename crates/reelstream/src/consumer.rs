//! Consumer-side seams: the media sink and the optional transmuxer.
//!
//! The engine feeds a buffered media consumer (a Media Source-style buffer)
//! through [`MediaSink`]. When segments arrive as MPEG-TS, an injected
//! [`Transmuxer`] converts them to fragmented-MP4 chunks first; fMP4/MP4
//! segments bypass it and are appended directly.

use async_trait::async_trait;
use bytes::Bytes;

use crate::model::{MediaChunk, MediaKind};

/// Why an append was rejected by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The consumer buffer is out of space; evict and retry.
    #[error("sink quota exceeded")]
    QuotaExceeded,
    /// The consumer went away; the session cannot continue.
    #[error("sink closed")]
    Closed,
}

/// A buffered media consumer with a quota and a playback clock.
///
/// `append` resolves once the sink has committed the bytes (its update cycle
/// finished), which serializes appends per sub-queue by construction.
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Append media bytes for `kind`. Resolves on the sink's update-end.
    async fn append(&mut self, kind: MediaKind, data: Bytes) -> Result<(), SinkError>;

    /// Currently buffered time ranges, in seconds, ascending and disjoint.
    fn buffered(&self) -> Vec<(f64, f64)>;

    /// Playback position in seconds.
    fn current_time(&self) -> f64;

    /// Drop buffered media in `[start_s, end_s)`.
    async fn remove(&mut self, start_s: f64, end_s: f64) -> Result<(), SinkError>;

    /// Signal that no further data will be appended.
    fn end_of_stream(&mut self);
}

/// Converts pushed MPEG-TS bytes into fragmented-MP4 chunks.
///
/// The engine pushes one whole TS segment per call and then flushes; chunks
/// may surface from either call.
pub trait Transmuxer: Send + Sync {
    /// Feed one segment's bytes; returns any chunks ready so far.
    fn push(&mut self, data: Bytes) -> Vec<MediaChunk>;

    /// Finish the current segment; returns the remaining chunks.
    fn flush(&mut self) -> Vec<MediaChunk>;
}

/// Identity transmuxer for sources that are already fragmented MP4.
///
/// Mostly useful in tests and as a reference implementation: every pushed
/// segment comes back as a single video chunk.
#[derive(Debug, Default)]
pub struct PassthroughTransmuxer {
    pending: Vec<Bytes>,
}

impl PassthroughTransmuxer {
    /// Creates a passthrough transmuxer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transmuxer for PassthroughTransmuxer {
    fn push(&mut self, data: Bytes) -> Vec<MediaChunk> {
        self.pending.push(data);
        Vec::new()
    }

    fn flush(&mut self) -> Vec<MediaChunk> {
        self.pending
            .drain(..)
            .map(|data| MediaChunk {
                kind: MediaKind::Video,
                init: None,
                data: Some(data),
            })
            .collect()
    }
}
