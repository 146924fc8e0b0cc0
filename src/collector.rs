pub mod browser;
pub mod control;
pub mod poll;
pub mod replay;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    collector::{
        browser::BrowserCollector, control::ControlCommand, poll::HttpPollCollector,
        replay::ReplayCollector,
    },
    data::{
        config::ConfigSnapshot,
        domain::{CotId, LogLevel, RenglonId, TickIdx},
        event::{Event, LineItemObservation},
    },
    error::RemateResult,
};

// ================================================================================================
// Tick Contract
// ================================================================================================

/// Non-200 outcome of one tick, converted into a single HTTP_ERROR event.
#[derive(Debug, Clone, PartialEq)]
pub struct TickError {
    pub status: u16,
    pub message: String,
    pub session_expired: bool,
}

/// Everything one tick produced.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickOutcome {
    /// At most one observation per active line item. Ignored when
    /// `http_error` is set: an error tick never carries updates.
    pub observations: Vec<LineItemObservation>,
    pub elapsed_secs: f64,
    pub http_error: Option<TickError>,
    /// Side-channel diagnostics (parse failures and the like).
    pub logs: Vec<(LogLevel, String)>,
    /// The auction finalized this tick; emit END and stop.
    pub end: bool,
    /// The source is exhausted or unrecoverable; stop without END.
    pub finished: bool,
}

/// The shared contract of the three collector variants.
///
/// Each variant's state is disjoint; the tick-loop driver owns everything
/// common: snapshot emission, change suppression, heartbeats, control
/// coalescing and cancellation.
#[async_trait]
pub trait TickSource: Send {
    fn id_cot(&self) -> &CotId;

    /// Acquires resources and produces the observation set backing the
    /// one-time SNAPSHOT. A failure here refuses the tick loop entirely.
    async fn capture(&mut self, cfg: &ConfigSnapshot) -> RemateResult<Vec<LineItemObservation>>;

    /// Produces one tick. Never errors: failures become [`TickOutcome`]
    /// fields so nothing raises across the queue boundary.
    async fn observe(&mut self, tick: TickIdx, cfg: &ConfigSnapshot) -> TickOutcome;

    /// Releases every owned handle. Runs on all exit paths, including
    /// failure during capture.
    async fn release(&mut self);

    /// Post-condition probe for resource accounting.
    fn released(&self) -> bool;
}

// ================================================================================================
// Collector (Sum Type)
// ================================================================================================

/// The three concrete collectors behind one operation surface.
pub enum Collector {
    Replay(ReplayCollector),
    Browser(BrowserCollector),
    HttpPoll(HttpPollCollector),
}

#[async_trait]
impl TickSource for Collector {
    fn id_cot(&self) -> &CotId {
        match self {
            Collector::Replay(c) => c.id_cot(),
            Collector::Browser(c) => c.id_cot(),
            Collector::HttpPoll(c) => c.id_cot(),
        }
    }

    async fn capture(&mut self, cfg: &ConfigSnapshot) -> RemateResult<Vec<LineItemObservation>> {
        match self {
            Collector::Replay(c) => c.capture(cfg).await,
            Collector::Browser(c) => c.capture(cfg).await,
            Collector::HttpPoll(c) => c.capture(cfg).await,
        }
    }

    async fn observe(&mut self, tick: TickIdx, cfg: &ConfigSnapshot) -> TickOutcome {
        match self {
            Collector::Replay(c) => c.observe(tick, cfg).await,
            Collector::Browser(c) => c.observe(tick, cfg).await,
            Collector::HttpPoll(c) => c.observe(tick, cfg).await,
        }
    }

    async fn release(&mut self) {
        match self {
            Collector::Replay(c) => c.release().await,
            Collector::Browser(c) => c.release().await,
            Collector::HttpPoll(c) => c.release().await,
        }
    }

    fn released(&self) -> bool {
        match self {
            Collector::Replay(c) => c.released(),
            Collector::Browser(c) => c.released(),
            Collector::HttpPoll(c) => c.released(),
        }
    }
}

// ================================================================================================
// Tick Loop
// ================================================================================================

pub mod tick_loop {
    use async_channel::{Receiver, Sender};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        collector::control::{drain_coalesced, DrainedControl},
        error::CollectorError,
    };

    pub struct Args<S: TickSource> {
        pub cx: CancellationToken,
        pub source: S,
        pub raw_tx: Sender<Event>,
        pub control_rx: Receiver<ControlCommand>,
        pub snapshot: ConfigSnapshot,
    }

    /// Drives one collector until cancellation, stop, end or exhaustion.
    ///
    /// Owns the cross-variant semantics: SNAPSHOT exactly once before any
    /// UPDATE, per-tick change suppression, exactly one HEARTBEAT per tick,
    /// a single HTTP_ERROR replacing an error tick's updates, coalesced
    /// control application, and guaranteed release on every exit path.
    #[tracing::instrument(skip_all)]
    pub async fn run<S: TickSource>(args: Args<S>) -> RemateResult<()> {
        let Args {
            cx,
            mut source,
            raw_tx,
            control_rx,
            snapshot,
        } = args;

        let initial = match source.capture(&snapshot).await {
            Ok(observations) => observations,
            Err(e) => {
                tracing::error!(category = e.category(), error = %e, "Capture failed; refusing tick loop");
                let _ = raw_tx
                    .send(Event::Log {
                        level: LogLevel::Error,
                        text: format!("[{}] startup failure: {e}", e.category()),
                    })
                    .await;
                source.release().await;
                return Err(e);
            }
        };

        let result = drive(&cx, &mut source, &raw_tx, &control_rx, snapshot, initial).await;
        source.release().await;
        result
    }

    async fn drive<S: TickSource>(
        cx: &CancellationToken,
        source: &mut S,
        raw_tx: &Sender<Event>,
        control_rx: &Receiver<ControlCommand>,
        mut snapshot: ConfigSnapshot,
        initial: Vec<LineItemObservation>,
    ) -> RemateResult<()> {
        let id_cot = source.id_cot().clone();
        let mut previous: BTreeMap<RenglonId, LineItemObservation> = initial
            .iter()
            .map(|o| (o.id_renglon.clone(), o.clone()))
            .collect();

        send(
            raw_tx,
            Event::Snapshot {
                id_cot: id_cot.clone(),
                observations: initial,
            },
        )
        .await?;

        let mut tick = TickIdx(1);

        'ticks: loop {
            if cx.is_cancelled() {
                break;
            }

            let drained = drain_coalesced(control_rx);
            if drained.stop {
                tracing::info!("Stop command received; draining tick loop");
                break;
            }
            if drained.reconfigures() {
                snapshot = drained.apply(&snapshot);
            }

            let outcome = source.observe(tick, &snapshot).await;

            if let Some(error) = &outcome.http_error {
                send(
                    raw_tx,
                    Event::HttpError {
                        status: error.status,
                        message: error.message.clone(),
                        session_expired: error.session_expired,
                    },
                )
                .await?;
            } else {
                for observation in outcome.observations {
                    let changed = previous
                        .get(&observation.id_renglon)
                        .is_none_or(|prev| observation.differs_from(prev));
                    if changed {
                        send(
                            raw_tx,
                            Event::Update {
                                id_cot: id_cot.clone(),
                                observation: Box::new(observation.clone()),
                            },
                        )
                        .await?;
                    }
                    previous.insert(observation.id_renglon.clone(), observation);
                }
            }

            for (level, text) in outcome.logs {
                send(raw_tx, Event::Log { level, text }).await?;
            }

            send(
                raw_tx,
                Event::Heartbeat {
                    tick,
                    elapsed_secs: outcome.elapsed_secs,
                },
            )
            .await?;

            if outcome.end {
                send(
                    raw_tx,
                    Event::End {
                        id_cot: id_cot.clone(),
                    },
                )
                .await?;
                break;
            }
            if outcome.finished {
                break;
            }

            tick = tick.next();

            // Inter-tick wait. Control commands land here with effect no
            // later than the next tick; CaptureNow cuts the wait short.
            let mut deadline = Instant::now() + snapshot.tick_period();
            loop {
                tokio::select! {
                    _ = cx.cancelled() => break 'ticks,
                    _ = tokio::time::sleep_until(deadline) => break,
                    cmd = control_rx.recv() => {
                        let Ok(cmd) = cmd else {
                            tracing::info!("Control queue closed; draining tick loop");
                            break 'ticks;
                        };
                        let mut drained = DrainedControl::default();
                        drained.absorb(cmd);
                        while let Ok(more) = control_rx.try_recv() {
                            drained.absorb(more);
                            if drained.stop {
                                break;
                            }
                        }
                        if drained.stop {
                            break 'ticks;
                        }
                        if drained.reconfigures() {
                            snapshot = drained.apply(&snapshot);
                            deadline = Instant::now() + snapshot.tick_period();
                        }
                        if drained.capture_now {
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn send(tx: &Sender<Event>, event: Event) -> RemateResult<()> {
        tx.send(event)
            .await
            .map_err(|_| CollectorError::QueueClosed("raw-event queue".to_string()).into())
    }
}
