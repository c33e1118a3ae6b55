//! HLS playlist parsing.
//!
//! Line-oriented parser for master and media playlists. Parsing is total:
//! unknown tags are skipped, malformed attributes degrade to absent fields,
//! and the only hard failures are "not a playlist at all" (missing `#EXTM3U`
//! on the first line) and a playlist that yields neither variants nor
//! segments.
//!
//! Classification: a playlist containing `#EXT-X-STREAM-INF` is a master
//! playlist; everything else is a media playlist. Both follow the same
//! two-line pair discipline: an attribute line followed by the next
//! non-empty, non-comment line, which is the URI.

use std::time::Duration;

use tracing::trace;
use url::Url;

use crate::error::EngineError;
use crate::model::{
    ByteRange, InitSegmentRef, PlaylistKind, PlaylistSnapshot, SegmentRef, Variant,
};

const TAG_HEADER: &str = "#EXTM3U";
const TAG_STREAM_INF: &str = "#EXT-X-STREAM-INF:";
const TAG_INF: &str = "#EXTINF:";
const TAG_MEDIA_SEQUENCE: &str = "#EXT-X-MEDIA-SEQUENCE:";
const TAG_TARGET_DURATION: &str = "#EXT-X-TARGETDURATION:";
const TAG_BYTERANGE: &str = "#EXT-X-BYTERANGE:";
const TAG_MAP: &str = "#EXT-X-MAP:";
const TAG_ENDLIST: &str = "#EXT-X-ENDLIST";

/// Parse a playlist fetched from `playlist_url`.
///
/// Relative URIs are resolved against the playlist URL's directory.
pub fn parse_playlist(text: &str, playlist_url: &Url) -> Result<PlaylistSnapshot, EngineError> {
    if !text.lines().next().unwrap_or("").trim_end().starts_with(TAG_HEADER) {
        return Err(EngineError::parse("missing #EXTM3U header"));
    }

    let base_url = directory_of(playlist_url);

    if text.contains(TAG_STREAM_INF) {
        parse_master(text, playlist_url, base_url)
    } else {
        parse_media(text, playlist_url, base_url)
    }
}

/// The directory a playlist was fetched from (trailing slash preserved).
pub fn directory_of(url: &Url) -> Url {
    // Joining "." strips the final path segment; a bare-host URL stays as-is.
    url.join(".").unwrap_or_else(|_| url.clone())
}

fn parse_master(
    text: &str,
    playlist_url: &Url,
    base_url: Url,
) -> Result<PlaylistSnapshot, EngineError> {
    let mut variants: Vec<Variant> = Vec::new();
    let mut pending_attrs: Option<String> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(attrs) = line.strip_prefix(TAG_STREAM_INF) {
            pending_attrs = Some(attrs.to_string());
            continue;
        }

        if line.starts_with('#') {
            // Unknown or irrelevant tag.
            continue;
        }

        // A URI line pairs with the most recent #EXT-X-STREAM-INF.
        if let Some(attrs) = pending_attrs.take() {
            let Ok(url) = resolve(playlist_url, line) else {
                trace!(uri = line, "skipping variant with unresolvable URI");
                continue;
            };
            let (bitrate_bps, resolution, codecs) = parse_stream_inf_attrs(&attrs);
            variants.push(Variant {
                url,
                bitrate_bps,
                resolution,
                codecs,
            });
        }
    }

    if variants.is_empty() {
        return Err(EngineError::parse("master playlist has no variants"));
    }

    // Highest quality first; ties keep document order (stable sort).
    variants.sort_by_key(|v| std::cmp::Reverse(v.bitrate_bps));

    Ok(PlaylistSnapshot {
        kind: PlaylistKind::Master,
        variants,
        segments: Vec::new(),
        media_sequence: 0,
        target_duration: None,
        init_segment: None,
        is_live: false,
        base_url,
    })
}

fn parse_media(
    text: &str,
    playlist_url: &Url,
    base_url: Url,
) -> Result<PlaylistSnapshot, EngineError> {
    let mut segments: Vec<SegmentRef> = Vec::new();
    let mut media_sequence: u64 = 0;
    let mut target_duration: Option<Duration> = None;
    let mut init_segment: Option<InitSegmentRef> = None;

    let mut pending_duration: Option<f64> = None;
    let mut pending_range: Option<ByteRange> = None;
    let mut last_range_end: u64 = 0;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(TAG_MEDIA_SEQUENCE) {
            if let Ok(seq) = rest.trim().parse::<u64>() {
                media_sequence = seq;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(TAG_TARGET_DURATION) {
            if let Ok(secs) = rest.trim().parse::<u64>() {
                target_duration = Some(Duration::from_secs(secs));
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(TAG_MAP) {
            init_segment = parse_map_tag(rest, playlist_url);
            continue;
        }

        if let Some(rest) = line.strip_prefix(TAG_BYTERANGE) {
            pending_range = parse_byterange(rest, last_range_end);
            if let Some(r) = pending_range {
                last_range_end = r.end;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(TAG_INF) {
            // "#EXTINF:<duration>,[title]" — everything after the comma is a
            // free-form title we ignore.
            let duration = rest
                .split(',')
                .next()
                .and_then(|d| d.trim().parse::<f64>().ok())
                .unwrap_or(0.0);
            pending_duration = Some(duration);
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        // URI line: pairs with the most recent #EXTINF.
        if let Some(duration_s) = pending_duration.take() {
            let Ok(url) = resolve(playlist_url, line) else {
                trace!(uri = line, "skipping segment with unresolvable URI");
                pending_range = None;
                continue;
            };
            segments.push(SegmentRef {
                sequence: media_sequence + segments.len() as u64,
                url,
                duration_s,
                byte_range: pending_range.take(),
            });
        }
    }

    if segments.is_empty() {
        return Err(EngineError::parse("media playlist has no segments"));
    }

    Ok(PlaylistSnapshot {
        kind: PlaylistKind::Media,
        variants: Vec::new(),
        segments,
        media_sequence,
        target_duration,
        init_segment,
        is_live: !text.contains(TAG_ENDLIST),
        base_url,
    })
}

fn resolve(playlist_url: &Url, uri: &str) -> Result<Url, url::ParseError> {
    playlist_url.join(uri)
}

/// Extract `(bandwidth, resolution, codecs)` from a `#EXT-X-STREAM-INF`
/// attribute list. Malformed attributes yield absent fields, never errors.
fn parse_stream_inf_attrs(attrs: &str) -> (u64, Option<(u32, u32)>, Option<String>) {
    let mut bandwidth = 0u64;
    let mut resolution = None;
    let mut codecs = None;

    for (key, value) in split_attributes(attrs) {
        match key.as_str() {
            "BANDWIDTH" => {
                if let Ok(bw) = value.parse::<u64>() {
                    bandwidth = bw;
                }
            }
            "RESOLUTION" => {
                let mut parts = value.splitn(2, 'x');
                let w = parts.next().and_then(|p| p.parse::<u32>().ok());
                let h = parts.next().and_then(|p| p.parse::<u32>().ok());
                if let (Some(w), Some(h)) = (w, h) {
                    resolution = Some((w, h));
                }
            }
            "CODECS" => codecs = Some(value),
            _ => {}
        }
    }

    (bandwidth, resolution, codecs)
}

fn parse_map_tag(attrs: &str, playlist_url: &Url) -> Option<InitSegmentRef> {
    let mut uri = None;
    let mut byte_range = None;
    for (key, value) in split_attributes(attrs) {
        match key.as_str() {
            "URI" => uri = Some(value),
            "BYTERANGE" => byte_range = parse_byterange(&value, 0),
            _ => {}
        }
    }
    let url = resolve(playlist_url, &uri?).ok()?;
    Some(InitSegmentRef { url, byte_range })
}

/// Parse `<n>[@<offset>]`. Without an explicit offset the range continues
/// where the previous one ended.
fn parse_byterange(value: &str, continue_from: u64) -> Option<ByteRange> {
    let mut parts = value.trim().trim_matches('"').splitn(2, '@');
    let len = parts.next()?.parse::<u64>().ok()?;
    let start = match parts.next() {
        Some(offset) => offset.parse::<u64>().ok()?,
        None => continue_from,
    };
    Some(ByteRange {
        start,
        end: start + len,
    })
}

/// Split an HLS attribute list into `(KEY, value)` pairs, honoring quoted
/// values (which may contain commas) and stripping the quotes.
fn split_attributes(attrs: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = attrs;

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim().to_string();
        rest = &rest[eq + 1..];

        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            let Some(close) = stripped.find('"') else {
                // Unterminated quote: take everything, stop scanning.
                out.push((key, stripped.to_string()));
                break;
            };
            value = stripped[..close].to_string();
            rest = stripped[close + 1..].trim_start_matches(',');
        } else {
            match rest.find(',') {
                Some(comma) => {
                    value = rest[..comma].trim().to_string();
                    rest = &rest[comma + 1..];
                }
                None => {
                    value = rest.trim().to_string();
                    rest = "";
                }
            }
        }
        if !key.is_empty() {
            out.push((key, value));
        }
    }

    out
}
