//! Mobile-oriented adaptive streaming core.
//!
//! `reelstream` turns an opaque manifest URL (HLS master or media playlist,
//! or a direct progressive file) into a smooth, playback-ready byte feed for
//! a Media Source-style consumer.
//!
//! The crate is composed of several modules:
//! - `parser`: line-oriented HLS playlist parsing into typed snapshots.
//! - `fetch`: retrying, cancellable fetch pipeline with status classification.
//! - `estimator`: EMA + windowed bandwidth estimation from fetch completions.
//! - `abr`: stability-bounded variant selection.
//! - `store`: bounded per-session segment cache with oldest-first eviction.
//! - `append`: the demand-driven feed into the consumer sink.
//! - `session`: the per-stream state machine and its driver task.
//! - `registry`: owner-keyed session lifetimes and persistence.
//! - `proxy` / `consumer`: the injected seams (network, sink, transmuxer).
//!
//! This file (`lib.rs`) acts as a facade: it re-exports the main types from
//! the internal modules to form the public API of the crate.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use reelstream::{
//!     HttpRequestProxy, MediaSink, OwnerId, SessionRegistry, Settings,
//! };
//!
//! # async fn run(sink: Box<dyn MediaSink>) -> reelstream::EngineResult<()> {
//! let mut registry = SessionRegistry::new(
//!     Settings::default().mobile(),
//!     Arc::new(HttpRequestProxy::new()),
//! );
//! let session = registry.open(
//!     OwnerId::from("tab-1"),
//!     "https://cdn.example/live/master.m3u8",
//!     None,
//!     sink,
//!     None,
//! )?;
//! let mut events = registry.events(session)?;
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod abr;
mod append;
mod consumer;
mod error;
mod estimator;
mod events;
mod fetch;
mod model;
mod parser;
mod proxy;
mod registry;
mod session;
mod settings;
mod store;

pub use crate::abr::{AbrConfig, AbrController};
pub use crate::append::{AppendConfig, AppendQueue};
pub use crate::consumer::{MediaSink, PassthroughTransmuxer, SinkError, Transmuxer};
pub use crate::error::{EngineError, EngineResult, FatalKind, FetchError};
pub use crate::estimator::{BandwidthEstimator, BandwidthSample};
pub use crate::events::SessionEvent;
pub use crate::fetch::{FetchPipeline, SharedEstimator};
pub use crate::model::{
    ByteRange, ContainerKind, InitSegmentRef, MediaChunk, MediaKind, OwnerId, PlaylistKind,
    PlaylistSnapshot, SegmentRef, SessionId, SessionState, Variant,
};
pub use crate::parser::parse_playlist;
pub use crate::proxy::{
    BodyKind, HttpRequestProxy, ProxyError, ProxyResponse, RequestHeaders, RequestProxy,
    ResponseBody,
};
pub use crate::registry::SessionRegistry;
pub use crate::session::{SessionCommand, SessionStats};
pub use crate::settings::Settings;
pub use crate::store::{SegmentKey, SegmentStore};

pub use bytes::Bytes;
