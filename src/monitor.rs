use std::sync::Arc;
use std::thread::JoinHandle;

use async_channel::{Receiver, Sender};
use tokio_util::sync::CancellationToken;

use crate::{
    collector::{
        browser::{BrowserCollector, SessionCapture, SessionSource},
        control::ControlCommand,
        poll::HttpPollCollector,
        replay::ReplayCollector,
        tick_loop, Collector,
    },
    data::{
        config::{ConfigSnapshot, MonitorConfig},
        event::Event,
    },
    engine::Engine,
    error::{RemateResult, SystemError},
    scenario::Scenario,
    store::Store,
};

/// Capacity of the control queue. Small on purpose: the queue coalesces, it
/// does not buffer history.
const CONTROL_QUEUE_CAPACITY: usize = 16;

// ================================================================================================
// Builder
// ================================================================================================

enum SourceSpec {
    Replay(Scenario),
    Live {
        session: Box<dyn SessionSource>,
        url: String,
    },
    Poll(SessionCapture),
    Custom {
        collector: Collector,
        url: String,
    },
}

/// Consuming builder for a [`Monitor`].
///
/// One auction per process: exactly one source, one store, one config.
pub struct MonitorBuilder {
    store: Option<Arc<dyn Store>>,
    config: MonitorConfig,
    source: Option<SourceSpec>,
}

impl MonitorBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            config: MonitorConfig::default(),
            source: None,
        }
    }

    pub fn with_store(self, store: Arc<dyn Store>) -> Self {
        Self {
            store: Some(store),
            ..self
        }
    }

    pub fn with_config(self, config: MonitorConfig) -> Self {
        Self { config, ..self }
    }

    /// Replay source: the tick cadence follows the scenario's recorded
    /// duration verbatim.
    pub fn with_replay(self, scenario: Scenario) -> Self {
        Self {
            source: Some(SourceSpec::Replay(scenario)),
            ..self
        }
    }

    /// Live source: the session seam does the capture pass at start.
    pub fn with_live_session(self, session: Box<dyn SessionSource>, url: impl Into<String>) -> Self {
        Self {
            source: Some(SourceSpec::Live {
                session,
                url: url.into(),
            }),
            ..self
        }
    }

    /// HTTP-poll source over a capture handed off from a live session.
    pub fn with_poll_capture(self, capture: SessionCapture) -> Self {
        Self {
            source: Some(SourceSpec::Poll(capture)),
            ..self
        }
    }

    /// Escape hatch for a pre-built collector (tests, custom transports).
    pub fn with_collector(self, collector: Collector, auction_url: impl Into<String>) -> Self {
        Self {
            source: Some(SourceSpec::Custom {
                collector,
                url: auction_url.into(),
            }),
            ..self
        }
    }

    pub fn build(self) -> RemateResult<Monitor> {
        self.config.validate()?;

        let store = self
            .store
            .ok_or_else(|| SystemError::MissingField("store".to_string()))?;
        let source = self
            .source
            .ok_or_else(|| SystemError::MissingField("source".to_string()))?;

        let mut snapshot = self.config.snapshot();
        let (collector, auction_url) = match source {
            SourceSpec::Replay(scenario) => {
                snapshot.poll_secs = scenario.config.tick_duration_seconds;
                let url = scenario.subasta.url.clone();
                (Collector::Replay(ReplayCollector::new(scenario)), url)
            }
            SourceSpec::Live { session, url } => (
                Collector::Browser(
                    BrowserCollector::new(session, self.config.session_expiry_streak)
                        .with_inflight_limit(self.config.inflight_limit),
                ),
                url,
            ),
            SourceSpec::Poll(capture) => {
                let url = capture.url.clone();
                let collector = HttpPollCollector::from_capture(
                    capture,
                    self.config.inflight_limit,
                    self.config.session_expiry_streak,
                )?;
                (Collector::HttpPoll(collector), url)
            }
            SourceSpec::Custom { collector, url } => (collector, url),
        };

        Ok(Monitor {
            store,
            config: self.config,
            snapshot,
            collector,
            auction_url,
        })
    }
}

impl Default for MonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ================================================================================================
// Monitor
// ================================================================================================

/// A fully wired monitor, ready to start its two long-lived threads.
pub struct Monitor {
    store: Arc<dyn Store>,
    config: MonitorConfig,
    snapshot: ConfigSnapshot,
    collector: Collector,
    auction_url: String,
}

impl Monitor {
    pub fn builder() -> MonitorBuilder {
        MonitorBuilder::new()
    }

    /// Spawns the engine thread (blocking consumer) and the collector thread
    /// (current-thread tokio runtime hosting the tick loop), connected by
    /// the three bounded queues.
    pub fn start(self) -> RemateResult<MonitorHandle> {
        let (raw_tx, raw_rx) = async_channel::bounded::<Event>(self.config.queue_capacity);
        let (processed_tx, processed_rx) =
            async_channel::bounded::<Event>(self.config.queue_capacity);
        let (control_tx, control_rx) =
            async_channel::bounded::<ControlCommand>(CONTROL_QUEUE_CAPACITY);

        let cx = CancellationToken::new();

        let engine = Engine::new(
            self.store.clone(),
            raw_rx,
            processed_tx,
            control_tx.clone(),
            self.config.clone(),
            self.auction_url.clone(),
            self.snapshot.poll_secs,
        );
        let engine_thread = std::thread::Builder::new()
            .name("remate-engine".to_string())
            .spawn(move || engine.run())
            .map_err(|e| SystemError::Generic(format!("failed to spawn engine thread: {e}")))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SystemError::Generic(format!("failed to build collector runtime: {e}")))?;

        let args = tick_loop::Args {
            cx: cx.clone(),
            source: self.collector,
            raw_tx,
            control_rx,
            snapshot: self.snapshot,
        };
        let collector_thread = std::thread::Builder::new()
            .name("remate-collector".to_string())
            .spawn(move || runtime.block_on(tick_loop::run(args)))
            .map_err(|e| SystemError::Generic(format!("failed to spawn collector thread: {e}")))?;

        Ok(MonitorHandle {
            processed_rx,
            control_tx,
            cx,
            collector_thread,
            engine_thread,
        })
    }
}

// ================================================================================================
// Handle
// ================================================================================================

/// The presentation layer's grip on a running monitor: the processed-event
/// queue out, the control queue in.
pub struct MonitorHandle {
    processed_rx: Receiver<Event>,
    control_tx: Sender<ControlCommand>,
    cx: CancellationToken,
    collector_thread: JoinHandle<RemateResult<()>>,
    engine_thread: JoinHandle<RemateResult<()>>,
}

impl MonitorHandle {
    /// The processed-event queue. Drain continuously; the engine applies
    /// backpressure when this fills up.
    pub fn events(&self) -> Receiver<Event> {
        self.processed_rx.clone()
    }

    pub fn send(&self, cmd: ControlCommand) {
        let _ = self.control_tx.send_blocking(cmd);
    }

    /// Signals a cooperative stop: the collector exits at the next safe
    /// point, the engine drains behind it.
    pub fn stop(&self) {
        self.send(ControlCommand::Stop);
    }

    pub fn capture_now(&self) {
        self.send(ControlCommand::CaptureNow);
    }

    pub fn set_poll_seconds(&self, secs: f64) {
        self.send(ControlCommand::SetPollSeconds(secs));
    }

    pub fn set_intensive_monitoring(&self, on: bool) {
        self.send(ControlCommand::SetIntensive(on));
    }

    pub fn set_http_monitor_mode(&self, on: bool) {
        self.send(ControlCommand::SetHttpMonitorMode(on));
    }

    /// Drains the processed queue until both threads finish, then returns
    /// every event seen. Blocks until shutdown completes; pair with
    /// [`MonitorHandle::stop`] to force it.
    pub fn wait(self) -> RemateResult<Vec<Event>> {
        let mut events = Vec::new();
        while let Ok(event) = self.processed_rx.recv_blocking() {
            events.push(event);
        }

        self.cx.cancel();

        let collector = self
            .collector_thread
            .join()
            .map_err(|_| SystemError::Generic("collector thread panicked".to_string()))?;
        let engine = self
            .engine_thread
            .join()
            .map_err(|_| SystemError::Generic("engine thread panicked".to_string()))?;

        collector?;
        engine?;
        Ok(events)
    }
}
