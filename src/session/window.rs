//! Adaptive per-session window.
//!
//! The window is how many bytes one connection may write before it asks the
//! client to reconnect. Every refresh is a latency probe: if the replacement
//! connection arrives quickly the window doubles, if not it halves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::transport::TransportKind;

/// Window size plus the outstanding-refresh latch.
#[derive(Debug)]
pub struct AdaptiveWindow {
    size: AtomicU64,
    refreshing: AtomicBool,
    /// Millis since `epoch` when the outstanding refresh was requested
    refresh_sent: AtomicU64,
    epoch: Instant,
    min: u64,
    max: u64,
    htmlfile_max: u64,
    latency_cutoff: Duration,
    terminate_multiplier: f64,
}

impl AdaptiveWindow {
    /// Create a window from session configuration.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            size: AtomicU64::new(config.initial_window_size),
            refreshing: AtomicBool::new(false),
            refresh_sent: AtomicU64::new(0),
            epoch: Instant::now(),
            min: config.min_window_size,
            max: config.max_window_size,
            htmlfile_max: config.htmlfile_max_window_size,
            latency_cutoff: config.refresh_latency_cutoff(),
            terminate_multiplier: config.terminate_multiplier,
        }
    }

    /// Current window size in bytes.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Whether a refresh has been requested and not yet answered.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Set the latch if `written` is past the window and no refresh is
    /// outstanding. Returns whether this call set it.
    pub fn is_and_set_over_refresh_length(&self, written: u64) -> bool {
        written > self.size() && self.request_refresh()
    }

    /// Whether `written` is past the hard cutoff.
    pub fn is_over_terminate_length(&self, written: u64) -> bool {
        written as f64 > self.size() as f64 * self.terminate_multiplier
    }

    /// Set the latch unconditionally. Returns false if it was already set.
    pub fn request_refresh(&self) -> bool {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let sent = self.epoch.elapsed().as_millis() as u64;
        self.refresh_sent.store(sent, Ordering::Release);
        true
    }

    /// Clear the latch, returning how long the refresh was outstanding.
    pub fn take_refresh_elapsed(&self, now: Instant) -> Option<Duration> {
        if !self.refreshing.swap(false, Ordering::AcqRel) {
            return None;
        }
        let sent = self.epoch + Duration::from_millis(self.refresh_sent.load(Ordering::Acquire));
        Some(now.saturating_duration_since(sent))
    }

    /// Resize after a refresh round trip. Returns the new size.
    pub fn record_refresh_outcome(&self, elapsed: Duration, transport: TransportKind) -> u64 {
        let ceiling = if transport == TransportKind::HtmlFile {
            self.htmlfile_max
        } else {
            self.max
        };
        let current = self.size();
        let next = if elapsed > self.latency_cutoff {
            (current / 2).max(self.min)
        } else {
            current.saturating_mul(2).min(ceiling)
        };
        self.size.store(next, Ordering::Release);
        next
    }
}
