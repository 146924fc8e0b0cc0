use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use smallvec::smallvec;
use tokio::time::Instant;

use crate::{
    collector::{
        poll::{fold_responses, sweep},
        TickOutcome, TickSource,
    },
    data::{
        config::ConfigSnapshot,
        domain::{CotId, Margin, ProviderId, RenglonId, TickIdx},
        event::LineItemObservation,
    },
    error::RemateResult,
    wire::client::{HttpPortalTransport, PortalTransport, SessionCookies},
};

// ================================================================================================
// Session Capture
// ================================================================================================

/// One line item as seen in the auction page during capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRenglon {
    pub id_renglon: RenglonId,
    pub descripcion: String,
}

/// Everything the capture pass extracts from a live portal session.
///
/// The cookie snapshot is the hand-off artifact: the HTTP-poll collector is
/// built from this record by value, so the capturing session stays usable by
/// the human operator while the poll loop runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCapture {
    pub id_cot: CotId,
    pub url: String,
    /// The portal's `BuscarOfertas` XHR endpoint for this auction.
    pub offers_endpoint: String,
    pub renglones: Vec<CapturedRenglon>,
    /// Minimum-margin fields visible in the page, keyed by line item. The
    /// embedding application feeds these into the cost editor path.
    pub min_margins: BTreeMap<RenglonId, Margin>,
    pub our_provider_id: Option<ProviderId>,
    pub cookies: SessionCookies,
}

/// The embedded-browser collaborator behind a seam.
///
/// Driving a real browser (navigation, login, DOM extraction) is outside the
/// core; the core only needs the capture artifact and a close hook.
#[async_trait]
pub trait SessionSource: Send {
    async fn capture(&mut self) -> RemateResult<SessionCapture>;

    async fn close(&mut self);
}

// ================================================================================================
// Browser Collector
// ================================================================================================

/// Live-session collector: captures once through the browser seam, then
/// ticks by calling the portal's offers endpoint for each line item.
///
/// In HTTP-monitor mode the sequential per-item loop is replaced by the poll
/// variant's bounded concurrent sweep, on the same thread, over the same
/// session.
pub struct BrowserCollector {
    session: Box<dyn SessionSource>,
    transport: Option<Arc<dyn PortalTransport>>,
    capture: Option<SessionCapture>,
    expiry_streak: u32,
    inflight_limit: usize,
    unauth_streak: u32,
    started: Option<Instant>,
    released: bool,
}

impl BrowserCollector {
    pub fn new(session: Box<dyn SessionSource>, expiry_streak: u32) -> Self {
        Self {
            session,
            transport: None,
            capture: None,
            expiry_streak,
            inflight_limit: 5,
            unauth_streak: 0,
            started: None,
            released: true,
        }
    }

    /// Pool size used when HTTP-monitor mode is switched on.
    pub fn with_inflight_limit(mut self, limit: usize) -> Self {
        self.inflight_limit = limit.max(1);
        self
    }

    /// Overrides the transport built from the capture. Used by tests and by
    /// embedders that already hold a configured client.
    pub fn with_transport(mut self, transport: Arc<dyn PortalTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// The capture artifact, available after a successful start. This is
    /// what the HTTP-poll collector is built from.
    pub fn session_capture(&self) -> Option<&SessionCapture> {
        self.capture.as_ref()
    }

    fn elapsed(&self) -> f64 {
        self.started
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl TickSource for BrowserCollector {
    fn id_cot(&self) -> &CotId {
        self.capture
            .as_ref()
            .map(|c| &c.id_cot)
            .expect("capture precedes every tick")
    }

    async fn capture(&mut self, _cfg: &ConfigSnapshot) -> RemateResult<Vec<LineItemObservation>> {
        let capture = self.session.capture().await?;

        if self.transport.is_none() {
            let transport =
                HttpPortalTransport::new(capture.offers_endpoint.clone(), capture.cookies.clone())?;
            self.transport = Some(Arc::new(transport));
        }

        let observations = placeholder_observations(&capture.renglones);
        self.capture = Some(capture);
        self.unauth_streak = 0;
        self.started = Some(Instant::now());
        self.released = false;
        Ok(observations)
    }

    async fn observe(&mut self, _tick: TickIdx, cfg: &ConfigSnapshot) -> TickOutcome {
        let mut outcome = TickOutcome {
            elapsed_secs: self.elapsed(),
            ..Default::default()
        };

        let (Some(capture), Some(transport)) = (&self.capture, &self.transport) else {
            outcome.finished = true;
            return outcome;
        };

        // Regular mode walks the items one by one; HTTP-monitor mode widens
        // the same sweep to the configured pool.
        let inflight = if cfg.http_monitor {
            self.inflight_limit
        } else {
            1
        };
        let results = sweep(
            transport,
            &capture.id_cot,
            &capture.renglones,
            cfg.request_timeout,
            inflight,
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
        self.session.close().await;
        self.transport = None;
        self.capture = None;
        self.started = None;
        self.released = true;
    }

    fn released(&self) -> bool {
        self.released
    }
}

/// SNAPSHOT rows for line items known only by identity: ids and descriptions
/// from the capture pass, every numeric still null.
pub(crate) fn placeholder_observations(
    renglones: &[CapturedRenglon],
) -> Vec<LineItemObservation> {
    renglones
        .iter()
        .map(|r| LineItemObservation {
            id_renglon: r.id_renglon.clone(),
            descripcion: r.descripcion.clone(),
            offers: smallvec![],
            best: None,
            best_text: None,
            min_to_beat: None,
            min_to_beat_text: None,
            budget: None,
            budget_text: None,
            portal_msg: None,
            finalized: false,
            http_status: 200,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::wire::client::WireResponse;

    pub(crate) fn test_capture(cookies: &str) -> SessionCapture {
        SessionCapture {
            id_cot: CotId::from("22053"),
            url: "https://portal/22053".to_string(),
            offers_endpoint: "https://portal/ws/BuscarOfertas".to_string(),
            renglones: vec![CapturedRenglon {
                id_renglon: RenglonId::from("836160"),
                descripcion: "Guantes".to_string(),
            }],
            min_margins: BTreeMap::new(),
            our_provider_id: None,
            cookies: SessionCookies::from(cookies),
        }
    }

    struct ScriptedSession {
        capture: SessionCapture,
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl SessionSource for ScriptedSession {
        async fn capture(&mut self) -> RemateResult<SessionCapture> {
            Ok(self.capture.clone())
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    struct ScriptedTransport {
        responses: Mutex<Vec<WireResponse>>,
    }

    #[async_trait]
    impl PortalTransport for ScriptedTransport {
        async fn buscar_ofertas(
            &self,
            _id_cot: &CotId,
            _id_renglon: &RenglonId,
            _timeout: Duration,
        ) -> WireResponse {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(WireResponse::Network {
                    message: "script exhausted".to_string(),
                })
        }
    }

    fn collector(
        responses: Vec<WireResponse>,
        expiry_streak: u32,
    ) -> (BrowserCollector, Arc<Mutex<bool>>) {
        let closed = Arc::new(Mutex::new(false));
        let session = ScriptedSession {
            capture: test_capture("ASP.NET_SessionId=abc"),
            closed: closed.clone(),
        };
        let transport = ScriptedTransport {
            responses: Mutex::new(responses),
        };
        let collector = BrowserCollector::new(Box::new(session), expiry_streak)
            .with_transport(Arc::new(transport));
        (collector, closed)
    }

    fn ok_body(monto: f64) -> WireResponse {
        let offers = format!(
            r#"[{{"id_oferta_subasta": 1, "id_renglon": 836160, "id_proveedor": 7,
                 "monto": {monto}, "proveedor": "X", "mejor_oferta": "Oferta Vigente",
                 "hora": "10:00:00", "monto_a_mostrar": "$ {monto}"}}]"#
        );
        WireResponse::Ok {
            body: serde_json::json!({ "d": format!("{offers}@@@@@@") }).to_string(),
        }
    }

    #[tokio::test]
    async fn capture_produces_placeholder_snapshot() {
        let (mut collector, _) = collector(vec![], 5);
        let cfg = crate::data::config::MonitorConfig::default().snapshot();
        let snapshot = collector.capture(&cfg).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].best, None);
        assert_eq!(snapshot[0].descripcion, "Guantes");
        assert!(collector.session_capture().is_some());
    }

    #[tokio::test]
    async fn successful_tick_parses_offers() {
        let (mut collector, _) = collector(vec![ok_body(100.0)], 5);
        let cfg = crate::data::config::MonitorConfig::default().snapshot();
        collector.capture(&cfg).await.unwrap();

        let outcome = collector.observe(TickIdx(1), &cfg).await;
        assert!(outcome.http_error.is_none());
        assert_eq!(outcome.observations.len(), 1);
        assert_eq!(
            outcome.observations[0].best,
            Some(crate::data::domain::Monto(100.0))
        );
    }

    #[tokio::test]
    async fn unauthorized_streak_expires_session() {
        let responses = (0..2)
            .map(|_| WireResponse::HttpStatus {
                status: 401,
                message: "Unauthorized".to_string(),
            })
            .collect();
        let (mut collector, _) = collector(responses, 2);
        let cfg = crate::data::config::MonitorConfig::default().snapshot();
        collector.capture(&cfg).await.unwrap();

        let first = collector.observe(TickIdx(1), &cfg).await;
        assert!(first.http_error.is_some());
        assert!(!first.http_error.unwrap().session_expired);

        let second = collector.observe(TickIdx(2), &cfg).await;
        let error = second.http_error.unwrap();
        assert!(error.session_expired);
        assert!(second.finished);
    }

    #[tokio::test]
    async fn release_closes_the_session_on_every_path() {
        let (mut collector, closed) = collector(vec![], 5);
        let cfg = crate::data::config::MonitorConfig::default().snapshot();
        collector.capture(&cfg).await.unwrap();
        assert!(!collector.released());

        collector.release().await;
        assert!(collector.released());
        assert!(*closed.lock().unwrap());
    }
}
