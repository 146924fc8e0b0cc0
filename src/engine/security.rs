use crate::data::{config::BackoffConfig, event::SecurityAction};

/// Reason attached to an error-storm stop.
pub const REASON_ERROR_STORM: &str = "error storm";

/// Pure throttling decision over the consecutive-error streak.
///
/// Owned by the engine but free of I/O so the thresholds can be exercised
/// directly: at `backoff_at` the interval doubles up to the ceiling, at
/// `stop_at` the collector is stopped outright. Below both, no action.
#[derive(Debug, Clone, Copy)]
pub struct SecurityPolicy {
    cfg: BackoffConfig,
}

impl SecurityPolicy {
    pub fn new(cfg: BackoffConfig) -> Self {
        Self { cfg }
    }

    pub fn evaluate(&self, streak: u32, previous_interval_secs: f64) -> Option<SecurityAction> {
        if streak >= self.cfg.stop_at {
            return Some(SecurityAction::Stop {
                reason: REASON_ERROR_STORM.to_string(),
            });
        }
        if streak >= self.cfg.backoff_at {
            let doubled = previous_interval_secs * 2.0;
            return Some(SecurityAction::Backoff {
                new_interval_secs: doubled.min(self.cfg.ceiling_secs),
            });
        }
        None
    }
}
