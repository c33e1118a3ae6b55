//! Adaptive bitrate control.
//!
//! [`AbrController`] picks a variant index from a bitrate-ascending variant
//! list using the bandwidth estimate and the current buffer level. Stability
//! comes from three bounds: a minimum interval between switches, a panic
//! threshold that overrides everything when the buffer runs dry, and a rich
//! threshold that allows probing one step up only with a deep buffer.
//!
//! A manual lock pins the selection until cleared.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::estimator::BandwidthEstimator;
use crate::model::Variant;
use crate::settings::Settings;

/// Thresholds and factors for the controller.
#[derive(Debug, Clone)]
pub struct AbrConfig {
    /// Minimal interval between consecutive switches.
    pub switch_interval: Duration,
    /// Buffer level below which the lowest variant is forced.
    pub panic_buffer_s: f64,
    /// Buffer level required before any throughput-driven up-switch.
    pub safe_buffer_s: f64,
    /// Buffer level above which one-step upward probing is allowed.
    pub rich_buffer_s: f64,
    /// Fraction of the estimate considered spendable.
    pub safety_factor: f64,
    /// The next variant up must fit within `ema * headroom` to probe.
    pub up_step_headroom: f64,
}

impl AbrConfig {
    /// Derive the controller configuration from engine settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            switch_interval: settings.abr_switch_interval,
            panic_buffer_s: settings.abr_panic_buffer.as_secs_f64(),
            safe_buffer_s: settings.abr_safe_buffer.as_secs_f64(),
            rich_buffer_s: settings.abr_rich_buffer.as_secs_f64(),
            safety_factor: settings.abr_safety_factor,
            up_step_headroom: settings.abr_up_step_headroom,
        }
    }
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Buffer- and bandwidth-driven variant selector.
#[derive(Debug)]
pub struct AbrController {
    config: AbrConfig,
    current_ix: usize,
    locked_ix: Option<usize>,
    last_switch: Option<Instant>,
}

impl AbrController {
    /// Creates a controller starting at `initial_ix`.
    pub fn new(config: AbrConfig, initial_ix: usize) -> Self {
        Self {
            config,
            current_ix: initial_ix,
            locked_ix: None,
            last_switch: None,
        }
    }

    /// The index the controller currently targets.
    pub fn current_ix(&self) -> usize {
        self.current_ix
    }

    /// Pin selection to `ix`, or clear the pin with `None`.
    pub fn lock(&mut self, ix: Option<usize>) {
        self.locked_ix = ix;
        if let Some(ix) = ix {
            self.current_ix = ix;
        }
    }

    /// True when a manual lock is active.
    pub fn is_locked(&self) -> bool {
        self.locked_ix.is_some()
    }

    /// Roll the target back to `ix` without recording a switch. Used when a
    /// chosen switch could not be applied (e.g. the playlist was unusable).
    pub fn revert(&mut self, ix: usize) {
        self.current_ix = ix;
    }

    /// Select a variant index for the next download.
    ///
    /// `variants` must be sorted by bitrate ascending. Returns the chosen
    /// index; when it differs from the previous choice the switch timestamp
    /// is recorded for hysteresis.
    pub fn select(
        &mut self,
        variants: &[Variant],
        estimator: &BandwidthEstimator,
        buffer_seconds: f64,
        now: Instant,
    ) -> usize {
        if variants.is_empty() {
            return 0;
        }
        let top = variants.len() - 1;

        if let Some(locked) = self.locked_ix {
            self.current_ix = locked.min(top);
            return self.current_ix;
        }

        // Hysteresis: hold the current choice inside the switch interval
        // unless the buffer has drained to panic level.
        if let Some(last) = self.last_switch {
            if now.duration_since(last) < self.config.switch_interval
                && buffer_seconds > self.config.panic_buffer_s
            {
                return self.current_ix;
            }
        }

        let ema = estimator.ema();
        // An unknown estimate (no samples yet) spends nothing.
        let safe_bw = if ema.is_finite() {
            self.config.safety_factor * ema
        } else {
            0.0
        };

        let mut ix = variants
            .iter()
            .rposition(|v| (v.bitrate_bps as f64) <= safe_bw)
            .unwrap_or(0);

        // Up-switches need a settled buffer behind them.
        if ix > self.current_ix && buffer_seconds < self.config.safe_buffer_s {
            ix = self.current_ix;
        }

        // Buffer overrides.
        if buffer_seconds < self.config.panic_buffer_s {
            ix = 0;
        } else if buffer_seconds > self.config.rich_buffer_s
            && ix < top
            && ema.is_finite()
            && (variants[ix + 1].bitrate_bps as f64) < self.config.up_step_headroom * ema
        {
            ix += 1;
        }

        if ix != self.current_ix {
            debug!(
                from = self.current_ix,
                to = ix,
                buffer_seconds,
                ema_bps = ema,
                "variant switch"
            );
            self.current_ix = ix;
            self.last_switch = Some(now);
        }

        ix
    }
}
