//! Unified configuration for the streaming engine.
//!
//! One flattened structure covers every tunable domain:
//! - fetch behavior (per-attempt timeout, attempts, backoff)
//! - live playlist refresh
//! - segment cache quota
//! - append queue / sink buffering windows
//! - adaptive bitrate thresholds
//! - session persistence
//!
//! Defaults are tuned for mobile video playback; the [`Settings::mobile`] and
//! [`Settings::low_latency`] presets shift them for tighter networks.

use std::path::PathBuf;
use std::time::Duration;

/// Unified settings for the streaming engine.
#[derive(Debug, Clone)]
pub struct Settings {
    // ----------------------------
    // Fetch pipeline
    // ----------------------------
    /// Timeout for a single fetch attempt.
    /// Default: 30 seconds.
    pub attempt_timeout: Duration,

    /// Maximum number of attempts per fetch (first try included).
    /// Default: 3.
    pub max_attempts: u32,

    /// Base delay for linear backoff between attempts (`base * attempt`).
    /// Default: 1 second.
    pub backoff_base: Duration,

    /// Delay before re-attempting a segment whose fetch exhausted all
    /// attempts. Default: 2 seconds.
    pub transient_retry_delay: Duration,

    // ----------------------------
    // Live refresh
    // ----------------------------
    /// Optional override for how often live playlists are refreshed.
    /// When unset, `#EXT-X-TARGETDURATION` is used, falling back to
    /// [`Settings::DEFAULT_LIVE_REFRESH`].
    pub live_refresh_interval: Option<Duration>,

    // ----------------------------
    // Segment cache
    // ----------------------------
    /// Per-session cap on cached segment bytes. Oldest entries are evicted
    /// when an insert would overshoot. Default: 500 MiB.
    pub max_buffer_bytes: u64,

    // ----------------------------
    // Append queue / sink buffering
    // ----------------------------
    /// Seconds of already-played media kept behind the playhead when evicting
    /// for quota. Default: 10 seconds.
    pub keep_behind: Duration,

    /// Ceiling on the total buffered span in the sink; quota eviction trims
    /// past this. Default: 60 seconds.
    pub buffer_max: Duration,

    /// Forward buffer target: downloads pause once
    /// `buffered_end - current_time` exceeds this. Default: 30 seconds.
    pub buffer_ahead_limit: Duration,

    /// Delay before retrying an append the sink rejected for quota.
    /// Default: 100 ms.
    pub quota_retry_delay: Duration,

    /// Maximum chunks held per sub-queue before the producer is gated.
    /// Default: 64.
    pub max_pending_chunks: usize,

    /// How often the download loop re-checks a saturated buffer.
    /// Default: 1 second.
    pub buffer_poll_interval: Duration,

    /// Grace period between the first appended segment and the
    /// playback-ready signal. Default: 500 ms.
    pub startup_grace: Duration,

    // ----------------------------
    // Adaptive bitrate
    // ----------------------------
    /// Smoothing factor for the bandwidth EMA. Default: 0.15.
    pub abr_ema_alpha: f64,

    /// Bandwidth sample window length. Default: 20.
    pub abr_sample_window: usize,

    /// Optional seed for the bandwidth estimate (bits per second), used for
    /// the very first variant choice before any segment has landed.
    /// Default: none (the middle rendition is chosen instead).
    pub initial_bandwidth_bps: Option<f64>,

    /// Minimal interval between consecutive switches. Default: 10 seconds.
    pub abr_switch_interval: Duration,

    /// Buffer level below which the controller drops to the lowest variant.
    /// Default: 5 seconds.
    pub abr_panic_buffer: Duration,

    /// Buffer level required before any throughput-driven up-switch.
    /// Default: 20 seconds.
    pub abr_safe_buffer: Duration,

    /// Buffer level above which the controller probes one variant up.
    /// Default: 60 seconds.
    pub abr_rich_buffer: Duration,

    /// Safety factor applied to the throughput estimate when selecting.
    /// Default: 0.8.
    pub abr_safety_factor: f64,

    /// Headroom ratio for the rich-buffer up-step: the next variant must fit
    /// within `ema * headroom`. Default: 1.1.
    pub abr_up_step_headroom: f64,

    // ----------------------------
    // Persistence
    // ----------------------------
    /// Directory for persisted session records. `None` disables persistence.
    pub state_dir: Option<PathBuf>,
}

impl Settings {
    /// Live refresh period used when neither the settings override nor the
    /// playlist target duration is available.
    pub const DEFAULT_LIVE_REFRESH: Duration = Duration::from_millis(4000);
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            transient_retry_delay: Duration::from_secs(2),

            live_refresh_interval: None,

            max_buffer_bytes: 500 * 1024 * 1024,

            keep_behind: Duration::from_secs(10),
            buffer_max: Duration::from_secs(60),
            buffer_ahead_limit: Duration::from_secs(30),
            quota_retry_delay: Duration::from_millis(100),
            max_pending_chunks: 64,
            buffer_poll_interval: Duration::from_secs(1),
            startup_grace: Duration::from_millis(500),

            abr_ema_alpha: 0.15,
            abr_sample_window: 20,
            initial_bandwidth_bps: None,
            abr_switch_interval: Duration::from_secs(10),
            abr_panic_buffer: Duration::from_secs(5),
            abr_safe_buffer: Duration::from_secs(20),
            abr_rich_buffer: Duration::from_secs(60),
            abr_safety_factor: 0.8,
            abr_up_step_headroom: 1.1,

            state_dir: None,
        }
    }
}

impl Settings {
    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings tuned for mobile networks: shorter per-attempt timeouts,
    /// more attempts, quicker backoff.
    pub fn mobile(mut self) -> Self {
        self.attempt_timeout = Duration::from_secs(15);
        self.max_attempts = 5;
        self.backoff_base = Duration::from_millis(500);
        self
    }

    /// Settings tuned for low-latency live playback: tight timeouts, a
    /// shallow forward buffer and a fast refresh cadence.
    pub fn low_latency(mut self) -> Self {
        self.attempt_timeout = Duration::from_secs(5);
        self.max_attempts = 2;
        self.backoff_base = Duration::from_millis(250);
        self.buffer_ahead_limit = Duration::from_secs(10);
        self.live_refresh_interval = Some(Duration::from_millis(2000));
        self
    }

    // -------------------------
    // Fetch setters
    // -------------------------

    pub fn attempt_timeout(mut self, v: Duration) -> Self {
        self.attempt_timeout = v;
        self
    }

    pub fn max_attempts(mut self, v: u32) -> Self {
        self.max_attempts = v.max(1);
        self
    }

    pub fn backoff_base(mut self, v: Duration) -> Self {
        self.backoff_base = v;
        self
    }

    pub fn transient_retry_delay(mut self, v: Duration) -> Self {
        self.transient_retry_delay = v;
        self
    }

    // -------------------------
    // Live refresh / cache setters
    // -------------------------

    pub fn live_refresh_interval(mut self, v: Option<Duration>) -> Self {
        self.live_refresh_interval = v;
        self
    }

    pub fn max_buffer_bytes(mut self, v: u64) -> Self {
        self.max_buffer_bytes = v;
        self
    }

    // -------------------------
    // Append queue setters
    // -------------------------

    pub fn keep_behind(mut self, v: Duration) -> Self {
        self.keep_behind = v;
        self
    }

    pub fn buffer_max(mut self, v: Duration) -> Self {
        self.buffer_max = v;
        self
    }

    pub fn buffer_ahead_limit(mut self, v: Duration) -> Self {
        self.buffer_ahead_limit = v;
        self
    }

    pub fn quota_retry_delay(mut self, v: Duration) -> Self {
        self.quota_retry_delay = v;
        self
    }

    pub fn buffer_poll_interval(mut self, v: Duration) -> Self {
        self.buffer_poll_interval = v;
        self
    }

    pub fn startup_grace(mut self, v: Duration) -> Self {
        self.startup_grace = v;
        self
    }

    // -------------------------
    // ABR setters
    // -------------------------

    pub fn abr_switch_interval(mut self, v: Duration) -> Self {
        self.abr_switch_interval = v;
        self
    }

    pub fn abr_panic_buffer(mut self, v: Duration) -> Self {
        self.abr_panic_buffer = v;
        self
    }

    pub fn abr_safe_buffer(mut self, v: Duration) -> Self {
        self.abr_safe_buffer = v;
        self
    }

    pub fn abr_rich_buffer(mut self, v: Duration) -> Self {
        self.abr_rich_buffer = v;
        self
    }

    pub fn abr_safety_factor(mut self, v: f64) -> Self {
        self.abr_safety_factor = v;
        self
    }

    pub fn initial_bandwidth_bps(mut self, v: Option<f64>) -> Self {
        self.initial_bandwidth_bps = v;
        self
    }

    // -------------------------
    // Persistence setters
    // -------------------------

    pub fn state_dir(mut self, v: Option<PathBuf>) -> Self {
        self.state_dir = v;
        self
    }
}
