use chrono::{DateTime, Utc};

use crate::data::domain::TickIdx;

// ================================================================================================
// Heartbeat Aggregation
// ================================================================================================

/// Folds per-tick heartbeats into one log line per minute.
///
/// Heartbeats are never propagated one-for-one to the presentation layer;
/// this keeps the on-screen log at one row per minute of monitoring.
#[derive(Debug, Default)]
pub struct HeartbeatAggregator {
    window_minute: Option<i64>,
    ticks_in_window: u32,
    last_tick: TickIdx,
    last_elapsed_secs: f64,
}

impl HeartbeatAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one heartbeat; returns the previous minute's summary when the
    /// minute rolls over.
    pub fn record(&mut self, at: DateTime<Utc>, tick: TickIdx, elapsed_secs: f64) -> Option<String> {
        let minute = at.timestamp() / 60;
        let summary = match self.window_minute {
            Some(window) if window != minute => self.summary(),
            None => None,
            _ => None,
        };

        if self.window_minute != Some(minute) {
            self.window_minute = Some(minute);
            self.ticks_in_window = 0;
        }
        self.ticks_in_window += 1;
        self.last_tick = tick;
        self.last_elapsed_secs = elapsed_secs;

        summary
    }

    /// Final summary for the unfinished minute, if any ticks were seen.
    pub fn flush(&mut self) -> Option<String> {
        let summary = self.summary();
        self.window_minute = None;
        self.ticks_in_window = 0;
        summary
    }

    fn summary(&self) -> Option<String> {
        if self.ticks_in_window == 0 {
            return None;
        }
        Some(format!(
            "{} ticks this minute (through tick {}, {:.1}s elapsed)",
            self.ticks_in_window, self.last_tick.0, self.last_elapsed_secs
        ))
    }
}

// ================================================================================================
// HTTP Error Collapsing
// ================================================================================================

/// Outcome of feeding one HTTP error into the collapser.
#[derive(Debug, PartialEq)]
pub enum Collapsed {
    /// A new failure signature: propagate the error itself.
    Fresh,
    /// A repeat inside the window: swallowed, count bumped.
    Repeat,
}

/// Collapses identical HTTP errors within a window into one log row with a
/// count, so an error storm does not flood the presentation layer.
#[derive(Debug)]
pub struct HttpErrorCollapser {
    window_secs: i64,
    current: Option<ErrorRun>,
}

#[derive(Debug)]
struct ErrorRun {
    status: u16,
    message: String,
    count: u32,
    started_at: DateTime<Utc>,
}

impl HttpErrorCollapser {
    pub fn new(window_secs: i64) -> Self {
        Self {
            window_secs,
            current: None,
        }
    }

    /// Feeds one error. Returns how to treat it, plus the summary of a run
    /// that just closed (different signature or expired window).
    pub fn record(
        &mut self,
        status: u16,
        message: &str,
        at: DateTime<Utc>,
    ) -> (Collapsed, Option<String>) {
        match &mut self.current {
            Some(run)
                if run.status == status
                    && run.message == message
                    && (at - run.started_at).num_seconds() < self.window_secs =>
            {
                run.count += 1;
                (Collapsed::Repeat, None)
            }
            _ => {
                let closed = self.take_summary();
                self.current = Some(ErrorRun {
                    status,
                    message: message.to_string(),
                    count: 1,
                    started_at: at,
                });
                (Collapsed::Fresh, closed)
            }
        }
    }

    /// Summary of the open run, if it collapsed anything.
    pub fn flush(&mut self) -> Option<String> {
        self.take_summary()
    }

    fn take_summary(&mut self) -> Option<String> {
        let run = self.current.take()?;
        if run.count <= 1 {
            return None;
        }
        Some(format!(
            "HTTP {} repeated {}x: {}",
            run.status, run.count, run.message
        ))
    }
}
