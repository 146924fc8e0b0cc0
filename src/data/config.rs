use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RemateResult, SystemError};

/// Hard floor for the tick period in intensive mode, seconds.
pub const MIN_POLL_SECS_INTENSIVE: f64 = 0.2;

/// Hard floor for the tick period in regular mode, seconds.
pub const MIN_POLL_SECS: f64 = 1.0;

/// Ceiling for user-requested tick periods, seconds.
pub const MAX_POLL_SECS: f64 = 300.0;

/// Per-request deadline in intensive mode.
pub const REQUEST_TIMEOUT_INTENSIVE: Duration = Duration::from_millis(2_500);

/// Per-request deadline in regular mode.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ================================================================================================
// Backoff
// ================================================================================================

/// Error-storm thresholds consumed by the security policy.
///
/// The portal's real tolerances are unknown, so these are configuration, not
/// constants. The defaults back off after 3 consecutive errors and stop the
/// collector after 10.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Consecutive-error streak at which SECURITY(BACKOFF) fires.
    pub backoff_at: u32,
    /// Consecutive-error streak at which SECURITY(STOP) fires.
    pub stop_at: u32,
    /// Upper bound for the backed-off poll interval, seconds.
    pub ceiling_secs: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            backoff_at: 3,
            stop_at: 10,
            ceiling_secs: 60.0,
        }
    }
}

// ================================================================================================
// Monitor Configuration
// ================================================================================================

/// Full configuration of one monitor process.
///
/// The mutable subset (poll cadence, intensive mode, HTTP-monitor mode)
/// travels to the collector as a versioned [`ConfigSnapshot`]; the rest is
/// fixed at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Tick period, seconds.
    pub poll_secs: f64,
    /// Reduced tick interval with the shorter per-request timeout.
    pub intensive: bool,
    /// Whether the HTTP-poll collector replaces the live tick loop.
    pub http_monitor: bool,
    /// Parallel in-flight requests of the HTTP-poll variant.
    pub inflight_limit: usize,
    pub backoff: BackoffConfig,
    /// Unauthorized responses in a row before the poll loop declares the
    /// session expired.
    pub session_expiry_streak: u32,
    /// Suppress alert rows whose improvement margin sits below the minimum.
    pub hide_below_threshold: bool,
    /// Per-line-item quiet window between alert sounds, seconds.
    pub sound_refractory_secs: f64,
    /// Capacity of the raw- and processed-event queues.
    pub queue_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_secs: 5.0,
            intensive: false,
            http_monitor: false,
            inflight_limit: 5,
            backoff: BackoffConfig::default(),
            session_expiry_streak: 5,
            hide_below_threshold: false,
            sound_refractory_secs: 5.0,
            queue_capacity: 256,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> RemateResult<()> {
        if !self.poll_secs.is_finite() || self.poll_secs <= 0.0 {
            return Err(SystemError::InvariantViolation(format!(
                "poll_secs must be positive, got {}",
                self.poll_secs
            ))
            .into());
        }
        if !(1..=30).contains(&self.inflight_limit) {
            return Err(SystemError::InvariantViolation(format!(
                "inflight_limit must be within 1..=30, got {}",
                self.inflight_limit
            ))
            .into());
        }
        if self.backoff.backoff_at == 0 || self.backoff.stop_at <= self.backoff.backoff_at {
            return Err(SystemError::InvariantViolation(format!(
                "backoff thresholds must satisfy 0 < backoff_at < stop_at, got {} / {}",
                self.backoff.backoff_at, self.backoff.stop_at
            ))
            .into());
        }
        if self.queue_capacity == 0 {
            return Err(
                SystemError::InvariantViolation("queue_capacity must be positive".into()).into(),
            );
        }
        Ok(())
    }

    /// Floor of the tick period under the current mode.
    pub fn poll_floor_secs(&self) -> f64 {
        if self.intensive {
            MIN_POLL_SECS_INTENSIVE
        } else {
            MIN_POLL_SECS
        }
    }

    /// Per-request deadline under the current mode.
    pub fn request_timeout(&self) -> Duration {
        if self.intensive {
            REQUEST_TIMEOUT_INTENSIVE
        } else {
            REQUEST_TIMEOUT
        }
    }

    /// The initial snapshot shipped to the collector at start.
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            version: 0,
            poll_secs: self.poll_secs.max(self.poll_floor_secs()),
            intensive: self.intensive,
            http_monitor: self.http_monitor,
            request_timeout: self.request_timeout(),
        }
    }
}

// ================================================================================================
// Config Snapshot
// ================================================================================================

/// Versioned snapshot of the mutable configuration.
///
/// Each collector tick reads the snapshot valid at tick start; control
/// commands produce a successor snapshot with a bumped version, so a tick
/// never observes half of an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub poll_secs: f64,
    pub intensive: bool,
    pub http_monitor: bool,
    pub request_timeout: Duration,
}

impl ConfigSnapshot {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(self.poll_secs)
    }

    /// Floor of the tick period under the snapshot's mode. Applied to
    /// user-issued interval commands; the security path and replay cadence
    /// set intervals verbatim.
    pub fn poll_floor_secs(&self) -> f64 {
        if self.intensive {
            MIN_POLL_SECS_INTENSIVE
        } else {
            MIN_POLL_SECS
        }
    }

    /// Successor snapshot with a new poll interval, taken verbatim.
    pub fn with_poll_secs(&self, secs: f64) -> Self {
        Self {
            version: self.version + 1,
            poll_secs: secs,
            ..self.clone()
        }
    }

    /// Successor snapshot toggling intensive mode and swapping the request
    /// deadline.
    pub fn with_intensive(&self, intensive: bool) -> Self {
        let timeout = if intensive {
            REQUEST_TIMEOUT_INTENSIVE
        } else {
            REQUEST_TIMEOUT
        };
        Self {
            version: self.version + 1,
            intensive,
            request_timeout: timeout,
            ..self.clone()
        }
    }

    pub fn with_http_monitor(&self, http_monitor: bool) -> Self {
        Self {
            version: self.version + 1,
            http_monitor,
            ..self.clone()
        }
    }
}
