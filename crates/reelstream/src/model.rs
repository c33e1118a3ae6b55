//! Core data model.
//!
//! Pure types shared across the crate, with no networking or I/O concerns.
//! Higher-level modules (`parser`, `fetch`, `session`, `registry`) build on
//! top of these.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::error::FatalKind;

/// Identifies a streaming session within the registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the owner of a session (a tab, a view, a player surface).
///
/// One owner holds at most one active session at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct OwnerId(pub String);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        OwnerId(s.to_string())
    }
}

/// One rendition advertised by a master playlist.
///
/// Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Resolved URL of this variant's media playlist.
    pub url: Url,
    /// Advertised bandwidth in bits per second (0 when the attribute is absent
    /// or malformed).
    pub bitrate_bps: u64,
    /// Advertised resolution, when present.
    pub resolution: Option<(u32, u32)>,
    /// Raw `CODECS="..."` string, when present.
    pub codecs: Option<String>,
}

/// A byte range within a segment resource (`start..end`, end exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset, inclusive.
    pub start: u64,
    /// One past the last byte offset.
    pub end: u64,
}

impl ByteRange {
    /// Render as an HTTP `Range` header value.
    pub fn to_header_value(&self) -> String {
        // HTTP ranges are inclusive on both ends.
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// One media segment entry from a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    /// Monotonic sequence number, derived from `#EXT-X-MEDIA-SEQUENCE`.
    pub sequence: u64,
    /// Resolved segment URL.
    pub url: Url,
    /// Segment duration in seconds, from `#EXTINF`.
    pub duration_s: f64,
    /// Optional sub-resource byte range, from `#EXT-X-BYTERANGE`.
    pub byte_range: Option<ByteRange>,
}

impl SegmentRef {
    /// Stable identity used to deduplicate segments across live refreshes.
    pub fn dedup_id(&self) -> String {
        format!("{}_{}", self.sequence, self.url)
    }
}

/// Initialization segment reference (`#EXT-X-MAP`).
#[derive(Debug, Clone, PartialEq)]
pub struct InitSegmentRef {
    /// Resolved init segment URL.
    pub url: Url,
    /// Optional byte range within the resource.
    pub byte_range: Option<ByteRange>,
}

/// Playlist classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    /// References sub-playlists (variants), no media segments.
    Master,
    /// Enumerates media segments.
    Media,
}

/// A parsed playlist, master or media.
///
/// A `Master` snapshot carries only `variants` (sorted by bitrate descending,
/// ties kept in document order). A `Media` snapshot carries only `segments`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSnapshot {
    /// Whether this is a master or media playlist.
    pub kind: PlaylistKind,
    /// Variants, bitrate-descending. Empty for media playlists.
    pub variants: Vec<Variant>,
    /// Segments in document order. Empty for master playlists.
    pub segments: Vec<SegmentRef>,
    /// Sequence number of the first segment (`#EXT-X-MEDIA-SEQUENCE`, default 0).
    pub media_sequence: u64,
    /// `#EXT-X-TARGETDURATION`, when present.
    pub target_duration: Option<Duration>,
    /// Initialization segment (`#EXT-X-MAP`), when present.
    pub init_segment: Option<InitSegmentRef>,
    /// Live iff `#EXT-X-ENDLIST` is absent (media playlists only).
    pub is_live: bool,
    /// Directory the playlist was fetched from; relative URIs resolve here.
    pub base_url: Url,
}

impl PlaylistSnapshot {
    /// Highest segment sequence present, if any.
    pub fn max_sequence(&self) -> Option<u64> {
        self.segments.iter().map(|s| s.sequence).max()
    }
}

/// Container family decided at manifest resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// HLS master or media playlist.
    Hls,
    /// A single progressive file (mp4/webm), streamed straight to the sink.
    Progressive,
}

/// Media kind of an append sub-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Video (or muxed audio+video) data.
    Video,
    /// Audio-only data.
    Audio,
}

/// One chunk emitted by a [`Transmuxer`](crate::Transmuxer).
#[derive(Debug, Clone)]
pub struct MediaChunk {
    /// Which sub-queue this chunk belongs to.
    pub kind: MediaKind,
    /// Initialization bytes, emitted at most once per kind.
    pub init: Option<Bytes>,
    /// Media payload bytes.
    pub data: Option<Bytes>,
}

/// Session lifecycle states. Transitions are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Fetching and classifying the manifest.
    Resolving,
    /// Actively pulling segments.
    Downloading,
    /// Caught up with a live playlist; waiting for new segments.
    LiveRefreshing,
    /// Download loop suspended by the owner; live refresh continues.
    Paused,
    /// All segments appended and the queue drained (VOD).
    Ended,
    /// Terminal failure, reported once to the owner.
    Failed(FatalKind),
}

impl SessionState {
    /// Short tag used in persisted records and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            SessionState::Resolving => "resolving",
            SessionState::Downloading => "downloading",
            SessionState::LiveRefreshing => "live_refreshing",
            SessionState::Paused => "paused",
            SessionState::Ended => "ended",
            SessionState::Failed(_) => "failed",
        }
    }

    /// True for `Ended` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Failed(kind) => write!(f, "failed({kind})"),
            other => f.write_str(other.tag()),
        }
    }
}
