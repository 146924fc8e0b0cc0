pub mod aggregate;
pub mod alert;
pub mod derive;
pub mod security;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use chrono::{DateTime, Utc};

use crate::{
    collector::control::ControlCommand,
    data::{
        config::MonitorConfig,
        domain::{equivalent_quantity, CotId, ItemsPerRenglon, LogLevel, Margin, Monto, ProviderId, RenglonId, TickIdx},
        event::{Event, EventKind, LineItemObservation, SecurityAction},
    },
    engine::{
        aggregate::{Collapsed, HeartbeatAggregator, HttpErrorCollapser},
        alert::AlertContext,
        security::SecurityPolicy,
    },
    error::{EngineError, RemateResult, SystemError},
    store::{EventLogRecord, LineItemRecord, LineItemStateRecord, Store, StoreResult},
};

/// Seconds identical HTTP errors keep collapsing into one log row.
const ERROR_COLLAPSE_WINDOW_SECS: i64 = 60;

/// Per-line-item memory the engine keeps between updates: the previous best
/// for direction detection, the leadership latch, and the sound debounce.
#[derive(Debug, Default, Clone)]
struct ItemTrack {
    last_best: Option<Monto>,
    was_leader: bool,
    last_sound_at: Option<DateTime<Utc>>,
}

/// The single consumer of the raw-event queue.
///
/// Pulls one event, persists it, derives, decides, then emits on the
/// processed queue; an event is never acknowledged before its store write
/// commits, and alert decisions are computed strictly after persistence so
/// the store and the emitted event cannot disagree.
pub struct Engine {
    store: Arc<dyn Store>,
    raw_rx: Receiver<Event>,
    processed_tx: Sender<Event>,
    control_tx: Sender<ControlCommand>,
    cfg: MonitorConfig,
    auction_url: String,

    id_cot: Option<CotId>,
    our_provider: Option<ProviderId>,
    items: BTreeMap<RenglonId, ItemTrack>,
    err_streak: u32,
    error_this_tick: bool,
    base_interval_secs: f64,
    current_interval_secs: f64,
    policy: SecurityPolicy,
    heartbeats: HeartbeatAggregator,
    errors: HttpErrorCollapser,
    /// Once set the engine only drains; the value becomes the STOP reason.
    stopping: Option<String>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        raw_rx: Receiver<Event>,
        processed_tx: Sender<Event>,
        control_tx: Sender<ControlCommand>,
        cfg: MonitorConfig,
        auction_url: String,
        initial_interval_secs: f64,
    ) -> Self {
        let policy = SecurityPolicy::new(cfg.backoff);
        Self {
            store,
            raw_rx,
            processed_tx,
            control_tx,
            cfg,
            auction_url,
            id_cot: None,
            our_provider: None,
            items: BTreeMap::new(),
            err_streak: 0,
            error_this_tick: false,
            base_interval_secs: initial_interval_secs,
            current_interval_secs: initial_interval_secs,
            policy,
            heartbeats: HeartbeatAggregator::new(),
            errors: HttpErrorCollapser::new(ERROR_COLLAPSE_WINDOW_SECS),
            stopping: None,
        }
    }

    /// Blocking main loop; runs on the engine thread until the raw queue
    /// closes (collector drained) or a fatal invariant violation.
    #[tracing::instrument(skip_all)]
    pub fn run(mut self) -> RemateResult<()> {
        let result = loop {
            match self.raw_rx.recv_blocking() {
                Ok(event) => {
                    if self.stopping.is_some() {
                        continue;
                    }
                    match self.dispatch(event) {
                        Ok(()) => {}
                        Err(e) if is_queue_closed(&e) => {
                            tracing::info!("Processed-event queue closed; engine exiting");
                            return Ok(());
                        }
                        Err(e) => break Err(e),
                    }
                }
                Err(_) => break Ok(()),
            }
        };

        self.finish();
        result
    }

    fn finish(&mut self) {
        if let Some(summary) = self.heartbeats.flush() {
            let _ = self.emit(Event::Log {
                level: LogLevel::Info,
                text: summary,
            });
        }
        if let Some(summary) = self.errors.flush() {
            let _ = self.emit(Event::Log {
                level: LogLevel::Warn,
                text: summary,
            });
        }

        if let Some(id_cot) = self.id_cot.clone() {
            let reason = self
                .stopping
                .clone()
                .unwrap_or_else(|| "collector drained".to_string());
            let _ = self.emit(Event::Stop { id_cot, reason });
        }
    }

    fn dispatch(&mut self, event: Event) -> RemateResult<()> {
        match event {
            Event::Snapshot {
                id_cot,
                observations,
            } => self.on_snapshot(id_cot, observations),
            Event::Update {
                id_cot,
                observation,
            } => self.on_update(id_cot, *observation),
            Event::Heartbeat { tick, elapsed_secs } => self.on_heartbeat(tick, elapsed_secs),
            Event::HttpError {
                status,
                message,
                session_expired,
            } => self.on_http_error(status, message, session_expired),
            Event::End { id_cot } => self.on_end(id_cot),
            Event::Log { level, text } => self.on_log(level, text),
            other => Err(SystemError::InvariantViolation(format!(
                "collector emitted engine-owned event {:?} on the raw queue",
                other.kind()
            ))
            .into()),
        }
    }

    // ============================================================================================
    // Event Handlers
    // ============================================================================================

    fn on_snapshot(
        &mut self,
        id_cot: CotId,
        observations: Vec<LineItemObservation>,
    ) -> RemateResult<()> {
        let now = Utc::now();
        self.id_cot = Some(id_cot.clone());

        let url = self.auction_url.clone();
        if self
            .store_write("upsert auction", |s| s.upsert_auction(&id_cot, &url))
            .is_none()
        {
            return Ok(());
        }
        if self
            .store_write("auction running", |s| {
                s.set_auction_state(&id_cot, crate::data::domain::AuctionState::Running, now)
            })
            .is_none()
        {
            return Ok(());
        }

        self.our_provider = self
            .store
            .auction(&id_cot)
            .ok()
            .flatten()
            .and_then(|a| a.our_provider_id);

        for observation in &observations {
            if self.persist_observation(&id_cot, observation, now).is_none() {
                return Ok(());
            }
            self.items.insert(
                observation.id_renglon.clone(),
                ItemTrack {
                    last_best: observation.best,
                    was_leader: false,
                    last_sound_at: None,
                },
            );
        }

        self.log_row(
            LogLevel::Info,
            EventKind::Snapshot,
            Some(&id_cot),
            None,
            format!("monitoring started with {} line items", observations.len()),
        );

        self.emit(Event::Start { id_cot: id_cot.clone(), at: now })?;
        self.emit(Event::Snapshot {
            id_cot,
            observations,
        })?;
        Ok(())
    }

    fn on_update(&mut self, id_cot: CotId, observation: LineItemObservation) -> RemateResult<()> {
        let now = Utc::now();

        let previous_best = self
            .items
            .get(&observation.id_renglon)
            .and_then(|t| t.last_best);

        // Persist first; the event is not acknowledged until this commits.
        let Some(item) = self.persist_observation(&id_cot, &observation, now) else {
            return Ok(());
        };

        // Re-derive the cost metrics against the fresh numerics.
        let costs = match self.store.costs(&id_cot, &observation.id_renglon) {
            Ok(costs) => costs,
            Err(e) => {
                tracing::error!(error = %e, "Cost read failed; derivations skipped this update");
                None
            }
        };
        let derived = costs.map(|mut record| {
            let eq = equivalent_quantity(item.quantity, item.items_per_renglon);
            derive::derive_costs(&mut record, eq, observation.min_to_beat, observation.budget);
            if self
                .store_write("persist derived costs", |s| {
                    s.upsert_costs(&id_cot, &observation.id_renglon, &record)
                })
                .is_none()
            {
                tracing::warn!("Derived costs not persisted for this update");
            }
            record
        });

        // Decision strictly after persistence.
        let leader_provider = observation.leader().map(|o| o.provider.clone());
        let is_leader = match (&self.our_provider, &leader_provider) {
            (Some(ours), Some(leader)) => ours == leader,
            _ => false,
        };
        let track = self.items.entry(observation.id_renglon.clone()).or_default();

        let ctx = AlertContext {
            descripcion: observation.descripcion.clone(),
            tracked: derived.as_ref().is_some_and(|c| c.tracked),
            is_leader,
            was_leader: track.was_leader,
            previous_best,
            best: observation.best,
            renta_para_mejorar: derived.as_ref().and_then(|c| c.renta_para_mejorar),
            min_margin: derived
                .as_ref()
                .and_then(|c| c.min_margin)
                .or(Some(item.min_margin))
                .map(|m| m.0),
            hide_below_threshold: self.cfg.hide_below_threshold,
        };
        let mut decision = alert::decide(&ctx);

        // Refractory debounce keeps alert sounds from storming.
        if decision.sound.is_some() {
            let refractory = chrono::Duration::milliseconds(
                (self.cfg.sound_refractory_secs * 1000.0) as i64,
            );
            let recently = track
                .last_sound_at
                .is_some_and(|last| now - last < refractory);
            if recently {
                decision.sound = None;
            } else {
                track.last_sound_at = Some(now);
            }
        }

        track.was_leader = is_leader;
        track.last_best = observation.best;

        self.log_row(
            LogLevel::Info,
            EventKind::Update,
            Some(&id_cot),
            Some(&observation.id_renglon),
            decision.message.clone(),
        );

        let id_renglon = observation.id_renglon.clone();
        self.emit(Event::Update {
            id_cot,
            observation: Box::new(observation),
        })?;
        self.emit(Event::Alert {
            id_renglon,
            decision,
        })?;
        Ok(())
    }

    fn on_heartbeat(&mut self, tick: TickIdx, elapsed_secs: f64) -> RemateResult<()> {
        let now = Utc::now();

        if self.error_this_tick {
            self.error_this_tick = false;
        } else if let Some(id_cot) = self.id_cot.clone() {
            // A clean tick resets the streak and restores the cadence.
            if self.err_streak > 0 || self.current_interval_secs != self.base_interval_secs {
                self.err_streak = 0;
                if self.current_interval_secs != self.base_interval_secs {
                    self.current_interval_secs = self.base_interval_secs;
                    self.send_control(ControlCommand::Throttle {
                        interval_secs: self.base_interval_secs,
                    });
                }
            }
            self.store_write("tick health", |s| {
                s.record_auction_health(&id_cot, 200, Some(now), 0)
            });
        }

        if let Some(summary) = self.heartbeats.record(now, tick, elapsed_secs) {
            let id_cot = self.id_cot.clone();
            self.log_row(LogLevel::Info, EventKind::Heartbeat, id_cot.as_ref(), None, summary.clone());
            self.emit(Event::Log {
                level: LogLevel::Info,
                text: summary,
            })?;
        }
        Ok(())
    }

    fn on_http_error(
        &mut self,
        status: u16,
        message: String,
        session_expired: bool,
    ) -> RemateResult<()> {
        let now = Utc::now();
        self.error_this_tick = true;

        if session_expired {
            // Not a storm: the auction stays RUNNING awaiting a recapture.
            let id_cot = self.id_cot.clone();
            self.log_row(
                LogLevel::Error,
                EventKind::HttpError,
                id_cot.as_ref(),
                None,
                format!("session expired (HTTP {status}): {message}"),
            );
            self.emit(Event::HttpError {
                status,
                message,
                session_expired: true,
            })?;
            return Ok(());
        }

        // Unauthorized statuses feed the session-expiry path, not the
        // transient-network streak the security policy watches.
        let counts_toward_storm = !matches!(status, 401 | 403);
        if counts_toward_storm {
            self.err_streak += 1;
        }

        if let Some(id_cot) = self.id_cot.clone() {
            let streak = self.err_streak;
            self.store_write("error health", |s| {
                s.record_auction_health(&id_cot, status, None, streak)
            });
        }

        match self.errors.record(status, &message, now) {
            (Collapsed::Fresh, closed) => {
                if let Some(summary) = closed {
                    self.emit(Event::Log {
                        level: LogLevel::Warn,
                        text: summary,
                    })?;
                }
                let id_cot = self.id_cot.clone();
                self.log_row(
                    LogLevel::Warn,
                    EventKind::HttpError,
                    id_cot.as_ref(),
                    None,
                    format!("HTTP {status}: {message}"),
                );
                self.emit(Event::HttpError {
                    status,
                    message,
                    session_expired: false,
                })?;
            }
            (Collapsed::Repeat, _) => {}
        }

        if counts_toward_storm {
            match self.policy.evaluate(self.err_streak, self.current_interval_secs) {
                Some(SecurityAction::Backoff { new_interval_secs }) => {
                    self.current_interval_secs = new_interval_secs;
                    self.send_control(ControlCommand::Throttle {
                        interval_secs: new_interval_secs,
                    });
                    self.emit(Event::Security {
                        action: SecurityAction::Backoff { new_interval_secs },
                    })?;
                }
                Some(SecurityAction::Stop { reason }) => {
                    if let Some(id_cot) = self.id_cot.clone() {
                        self.store_write("auction error state", |s| {
                            s.set_auction_state(
                                &id_cot,
                                crate::data::domain::AuctionState::Error,
                                now,
                            )
                        });
                    }
                    self.send_control(ControlCommand::Stop);
                    self.emit(Event::Security {
                        action: SecurityAction::Stop {
                            reason: reason.clone(),
                        },
                    })?;
                    self.stopping = Some(reason);
                }
                None => {}
            }
        }
        Ok(())
    }

    fn on_end(&mut self, id_cot: CotId) -> RemateResult<()> {
        let now = Utc::now();
        self.store_write("auction ended", |s| {
            s.set_auction_state(&id_cot, crate::data::domain::AuctionState::Ended, now)
        });
        self.log_row(
            LogLevel::Info,
            EventKind::End,
            Some(&id_cot),
            None,
            "auction finalized by the portal".to_string(),
        );
        self.emit(Event::End { id_cot })?;
        Ok(())
    }

    fn on_log(&mut self, level: LogLevel, text: String) -> RemateResult<()> {
        let id_cot = self.id_cot.clone();
        self.log_row(level, EventKind::Log, id_cot.as_ref(), None, text.clone());
        self.emit(Event::Log { level, text })?;
        Ok(())
    }

    // ============================================================================================
    // Persistence Helpers
    // ============================================================================================

    /// Upserts the line item (created on first observation, user fields
    /// preserved afterwards) and its single current-state row.
    fn persist_observation(
        &mut self,
        id_cot: &CotId,
        observation: &LineItemObservation,
        now: DateTime<Utc>,
    ) -> Option<LineItemRecord> {
        let existing = match self.store.line_items(id_cot) {
            Ok(items) => items
                .into_iter()
                .find(|i| i.id_renglon == observation.id_renglon),
            Err(e) => {
                tracing::error!(error = %e, "Line item read failed");
                None
            }
        };

        let item = match existing {
            Some(item) => item,
            None => {
                let item = LineItemRecord {
                    id_cot: id_cot.clone(),
                    id_renglon: observation.id_renglon.clone(),
                    descripcion: observation.descripcion.clone(),
                    items_per_renglon: ItemsPerRenglon::default(),
                    quantity: 1.0,
                    min_margin: Margin(0.0),
                };
                self.store_write("create line item", |s| s.upsert_line_item(&item))?;
                item
            }
        };

        let state = LineItemStateRecord {
            id_cot: id_cot.clone(),
            id_renglon: observation.id_renglon.clone(),
            best: observation.best,
            best_text: observation.best_text.clone(),
            min_to_beat: observation.min_to_beat,
            min_to_beat_text: observation.min_to_beat_text.clone(),
            budget: observation.budget,
            budget_text: observation.budget_text.clone(),
            portal_msg: observation.portal_msg.clone(),
            updated_at: now,
        };
        self.store_write("persist line item state", |s| {
            s.upsert_line_item_state(&state)
        })?;

        Some(item)
    }

    /// One store write with the retry-once policy. On the second failure the
    /// engine escalates to STOP (reason "store failure") and the offending
    /// event stays unacknowledged.
    fn store_write<T>(
        &mut self,
        label: &str,
        write: impl Fn(&dyn Store) -> StoreResult<T>,
    ) -> Option<T> {
        for attempt in 1..=2 {
            match write(self.store.as_ref()) {
                Ok(value) => return Some(value),
                Err(e) => {
                    tracing::error!(attempt, label, error = %e, "Store write failed");
                    let _ = self.emit(Event::Log {
                        level: LogLevel::Error,
                        text: format!("store write failed ({label}): {e}"),
                    });
                }
            }
        }

        self.send_control(ControlCommand::Stop);
        self.stopping = Some("store failure".to_string());
        None
    }

    fn log_row(
        &mut self,
        level: LogLevel,
        kind: EventKind,
        id_cot: Option<&CotId>,
        id_renglon: Option<&RenglonId>,
        message: String,
    ) {
        let row = EventLogRecord {
            level,
            kind,
            id_cot: id_cot.cloned(),
            id_renglon: id_renglon.cloned(),
            message,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.append_event_log(&row) {
            tracing::error!(error = %e, "Event log append failed");
        }
    }

    fn emit(&self, event: Event) -> RemateResult<()> {
        self.processed_tx
            .send_blocking(event)
            .map_err(|_| EngineError::QueueClosed("processed-event queue".to_string()).into())
    }

    fn send_control(&self, cmd: ControlCommand) {
        if self.control_tx.send_blocking(cmd).is_err() {
            tracing::warn!("Control queue closed; collector already gone");
        }
    }
}

fn is_queue_closed(e: &crate::error::RemateError) -> bool {
    matches!(
        e,
        crate::error::RemateError::Engine(EngineError::QueueClosed(_))
    )
}
