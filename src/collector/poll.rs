use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio::time::Instant;

use crate::{
    collector::{
        browser::{placeholder_observations, CapturedRenglon, SessionCapture},
        TickError, TickOutcome, TickSource,
    },
    data::{
        config::ConfigSnapshot,
        domain::{CotId, LogLevel, TickIdx},
        event::LineItemObservation,
    },
    error::RemateResult,
    wire::{
        client::{HttpPortalTransport, PortalTransport, WireResponse},
        payload::PortalPayload,
    },
};

/// Fast polling collector reusing a captured live session.
///
/// Drop-in replacement for the live tick loop: same endpoint, same cookie
/// snapshot, but up to `inflight_limit` requests in flight concurrently on
/// the collector's cooperative scheduler. Holds no lock shared with the
/// session that produced the capture; the cookies arrived by value.
pub struct HttpPollCollector {
    capture: SessionCapture,
    transport: Arc<dyn PortalTransport>,
    inflight_limit: usize,
    expiry_streak: u32,
    unauth_streak: u32,
    started: Option<Instant>,
    released: bool,
}

impl HttpPollCollector {
    /// Builds the collector from a capture hand-off, with its own HTTP
    /// client over the captured cookies.
    pub fn from_capture(
        capture: SessionCapture,
        inflight_limit: usize,
        expiry_streak: u32,
    ) -> RemateResult<Self> {
        let transport =
            HttpPortalTransport::new(capture.offers_endpoint.clone(), capture.cookies.clone())?;
        Ok(Self::with_transport(
            capture,
            Arc::new(transport),
            inflight_limit,
            expiry_streak,
        ))
    }

    pub fn with_transport(
        capture: SessionCapture,
        transport: Arc<dyn PortalTransport>,
        inflight_limit: usize,
        expiry_streak: u32,
    ) -> Self {
        Self {
            capture,
            transport,
            inflight_limit: inflight_limit.max(1),
            expiry_streak,
            unauth_streak: 0,
            started: None,
            released: true,
        }
    }

    fn elapsed(&self) -> f64 {
        self.started
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl TickSource for HttpPollCollector {
    fn id_cot(&self) -> &CotId {
        &self.capture.id_cot
    }

    async fn capture(&mut self, _cfg: &ConfigSnapshot) -> RemateResult<Vec<LineItemObservation>> {
        self.unauth_streak = 0;
        self.started = Some(Instant::now());
        self.released = false;
        Ok(placeholder_observations(&self.capture.renglones))
    }

    async fn observe(&mut self, _tick: TickIdx, cfg: &ConfigSnapshot) -> TickOutcome {
        let mut outcome = TickOutcome {
            elapsed_secs: self.elapsed(),
            ..Default::default()
        };

        let results = sweep(
            &self.transport,
            &self.capture.id_cot,
            &self.capture.renglones,
            cfg.request_timeout,
            self.inflight_limit,
        )
        .await;
        fold_responses(
            results,
            &mut self.unauth_streak,
            self.expiry_streak,
            &mut outcome,
        );
        outcome
    }

    async fn release(&mut self) {
        self.started = None;
        self.released = true;
    }

    fn released(&self) -> bool {
        self.released
    }
}

// ================================================================================================
// Shared Poll Mechanics
// ================================================================================================

/// One concurrent pass over every line item, bounded by `inflight_limit`.
///
/// Completion order is nondeterministic, so results come back sorted by id;
/// downstream processing stays stable. Shared with the live collector, whose
/// HTTP-monitor mode is exactly this loop replacing its sequential one.
pub(crate) async fn sweep(
    transport: &Arc<dyn PortalTransport>,
    id_cot: &CotId,
    renglones: &[CapturedRenglon],
    timeout: std::time::Duration,
    inflight_limit: usize,
) -> Vec<(CapturedRenglon, WireResponse)> {
    let mut results: Vec<(CapturedRenglon, WireResponse)> = stream::iter(renglones.to_vec())
        .map(|renglon| {
            let id_cot = id_cot.clone();
            let transport = transport.clone();
            async move {
                let response = transport
                    .buscar_ofertas(&id_cot, &renglon.id_renglon, timeout)
                    .await;
                (renglon, response)
            }
        })
        .buffer_unordered(inflight_limit.max(1))
        .collect()
        .await;

    results.sort_by(|a, b| a.0.id_renglon.cmp(&b.0.id_renglon));
    results
}

/// Folds one sweep into a tick outcome: parse the 200s, track the
/// unauthorized streak up to session expiry, and degrade any other failure
/// into the tick's single HTTP error.
pub(crate) fn fold_responses(
    results: Vec<(CapturedRenglon, WireResponse)>,
    unauth_streak: &mut u32,
    expiry_streak: u32,
    outcome: &mut TickOutcome,
) {
    let mut first_error: Option<TickError> = None;

    for (renglon, response) in results {
        if response.is_unauthorized() {
            *unauth_streak += 1;
            if *unauth_streak >= expiry_streak {
                outcome.observations.clear();
                outcome.http_error = Some(TickError {
                    status: response.status(),
                    message: "session expired: recapture from the browser to resume".to_string(),
                    session_expired: true,
                });
                outcome.finished = true;
                return;
            }
            first_error.get_or_insert(TickError {
                status: response.status(),
                message: response.describe(),
                session_expired: false,
            });
            continue;
        }

        let WireResponse::Ok { body } = &response else {
            first_error.get_or_insert(TickError {
                status: response.status(),
                message: response.describe(),
                session_expired: false,
            });
            continue;
        };

        *unauth_streak = 0;
        match PortalPayload::parse(body) {
            Ok(payload) => outcome.observations.push(payload.into_observation(
                renglon.id_renglon.clone(),
                renglon.descripcion.clone(),
                200,
            )),
            Err(e) => outcome.logs.push((
                LogLevel::Warn,
                format!("unparseable response for renglon {}: {e}", renglon.id_renglon),
            )),
        }
    }

    if let Some(error) = first_error {
        outcome.observations.clear();
        outcome.http_error = Some(error);
    }
}
