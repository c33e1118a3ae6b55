//! Bandwidth estimation from completed fetches.
//!
//! The estimator keeps an exponential moving average plus a short rolling
//! window of raw samples. The EMA drives steady-state variant selection; the
//! window supports percentile queries for conservative decisions.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One throughput observation.
#[derive(Debug, Clone, Copy)]
pub struct BandwidthSample {
    /// Observed throughput in bits per second.
    pub bps: f64,
    /// When the sample was recorded.
    pub at: Instant,
}

/// EMA + rolling-window bandwidth estimator.
///
/// With no samples recorded yet, [`ema`](Self::ema) reports `+inf`; the
/// bitrate controller treats an infinite estimate as "unknown" and selects
/// conservatively.
#[derive(Debug, Clone)]
pub struct BandwidthEstimator {
    alpha: f64,
    ema: Option<f64>,
    window: VecDeque<BandwidthSample>,
    capacity: usize,
}

impl BandwidthEstimator {
    /// Creates an estimator with the given smoothing factor and window size.
    pub fn new(alpha: f64, capacity: usize) -> Self {
        Self {
            alpha,
            ema: None,
            window: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Creates an estimator whose average is pre-seeded with a known or
    /// assumed bandwidth. The sample window starts empty; real samples blend
    /// into the seed through the usual smoothing.
    pub fn with_initial(alpha: f64, capacity: usize, initial_bps: f64) -> Self {
        let mut est = Self::new(alpha, capacity);
        if initial_bps.is_finite() && initial_bps > 0.0 {
            est.ema = Some(initial_bps);
        }
        est
    }

    /// Records a completed transfer of `bytes` over `elapsed`.
    ///
    /// Zero-length or zero-duration transfers are ignored; they carry no
    /// throughput information.
    pub fn report(&mut self, bytes: usize, elapsed: Duration) {
        let dt_ms = elapsed.as_secs_f64() * 1000.0;
        if bytes == 0 || dt_ms <= 0.0 {
            return;
        }

        let bps = (bytes as f64) * 8000.0 / dt_ms;
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(BandwidthSample {
            bps,
            at: Instant::now(),
        });

        // First sample seeds the average.
        self.ema = Some(match self.ema {
            Some(prev) => self.alpha * bps + (1.0 - self.alpha) * prev,
            None => bps,
        });
    }

    /// Current smoothed estimate in bits per second, `+inf` when no sample
    /// has been recorded.
    pub fn ema(&self) -> f64 {
        self.ema.unwrap_or(f64::INFINITY)
    }

    /// `p`-th percentile (`0.0..=1.0`) over the sample window, `+inf` when
    /// the window is empty.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.window.is_empty() {
            return f64::INFINITY;
        }
        let mut sorted: Vec<f64> = self.window.iter().map(|s| s.bps).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let p = p.clamp(0.0, 1.0);
        let ix = ((sorted.len() - 1) as f64 * p).round() as usize;
        sorted[ix]
    }

    /// Number of samples currently held.
    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    /// Drops all history. Useful after a network change or a long pause.
    pub fn reset(&mut self) {
        self.ema = None;
        self.window.clear();
    }
}
