//! Per-session observability events.
//!
//! Each session carries a broadcast channel of [`SessionEvent`]s; the owner
//! subscribes through the registry. Lagging subscribers only lose
//! intermediate events, never session state (the registry can always be
//! queried for a current snapshot).

use crate::error::FatalKind;
use crate::model::{SessionState, Variant};

/// Events emitted by a session over its lifetime.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved to a new lifecycle state.
    StateChanged(SessionState),

    /// The available renditions, bitrate-ascending, with the active index.
    Qualities {
        /// Renditions available for this stream.
        variants: Vec<Variant>,
        /// Index of the currently selected rendition.
        current_ix: usize,
    },

    /// Enough media is buffered for the owner to start playback.
    PlaybackReady,

    /// Periodic playback progress.
    Progress {
        /// Playback position in seconds.
        current_s: f64,
        /// Total duration in seconds, when known (VOD only).
        duration_s: Option<f64>,
        /// Seconds buffered ahead of the playhead.
        buffered_ahead_s: f64,
    },

    /// Periodic transfer statistics.
    Stats {
        /// Total payload bytes downloaded so far.
        bytes_downloaded: u64,
        /// Segments successfully downloaded so far.
        segment_count: u64,
        /// Smoothed bandwidth estimate in bits per second (`inf` until the
        /// first sample lands).
        bps_ema: f64,
    },

    /// A terminal failure, reported once.
    Error {
        /// Failure class.
        kind: FatalKind,
        /// Human-readable description.
        message: String,
    },
}
