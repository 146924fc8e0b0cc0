use async_channel::Receiver;

use crate::data::config::ConfigSnapshot;

// ================================================================================================
// Control Commands
// ================================================================================================

/// Commands travelling on the control queue towards the collector.
///
/// The UI issues the first five; `Throttle` is the engine's security path
/// (backoff and restore). Acknowledgment is by subsequent event emission,
/// never by return value.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Stop,
    CaptureNow,
    SetPollSeconds(f64),
    SetIntensive(bool),
    SetHttpMonitorMode(bool),
    /// Security-policy interval override; applied verbatim, no floor.
    Throttle { interval_secs: f64 },
}

/// Net effect of draining the control queue at one point in time.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrainedControl {
    pub stop: bool,
    pub capture_now: bool,
    pub poll_secs: Option<f64>,
    pub throttle_secs: Option<f64>,
    pub intensive: Option<bool>,
    pub http_monitor: Option<bool>,
}

impl DrainedControl {
    pub(crate) fn absorb(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::Stop => self.stop = true,
            ControlCommand::CaptureNow => self.capture_now = true,
            ControlCommand::SetPollSeconds(secs) => self.poll_secs = Some(secs),
            ControlCommand::SetIntensive(v) => self.intensive = Some(v),
            ControlCommand::SetHttpMonitorMode(v) => self.http_monitor = Some(v),
            ControlCommand::Throttle { interval_secs } => {
                self.throttle_secs = Some(interval_secs)
            }
        }
    }

    /// Whether anything besides `stop`/`capture_now` changes the snapshot.
    pub fn reconfigures(&self) -> bool {
        self.poll_secs.is_some()
            || self.throttle_secs.is_some()
            || self.intensive.is_some()
            || self.http_monitor.is_some()
    }

    /// Applies the coalesced commands to a snapshot, producing the successor
    /// the next tick reads. User intervals clamp to the mode's floor; the
    /// throttle path applies verbatim and wins over a user interval queued in
    /// the same drain.
    pub fn apply(&self, snapshot: &ConfigSnapshot) -> ConfigSnapshot {
        let mut next = snapshot.clone();
        if let Some(intensive) = self.intensive {
            next = next.with_intensive(intensive);
        }
        if let Some(http_monitor) = self.http_monitor {
            next = next.with_http_monitor(http_monitor);
        }
        if let Some(secs) = self.poll_secs {
            let clamped = secs.clamp(next.poll_floor_secs(), crate::data::config::MAX_POLL_SECS);
            next = next.with_poll_secs(clamped);
        }
        if let Some(secs) = self.throttle_secs {
            next = next.with_poll_secs(secs);
        }
        next
    }
}

/// Drains every queued command without blocking and coalesces: repeated
/// interval commands keep only the latest, `stop` subsumes everything else.
pub fn drain_coalesced(rx: &Receiver<ControlCommand>) -> DrainedControl {
    let mut drained = DrainedControl::default();
    while let Ok(cmd) = rx.try_recv() {
        drained.absorb(cmd);
        if drained.stop {
            break;
        }
    }
    drained
}
