mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::*;
use remate::{
    collector::{browser::CapturedRenglon, poll::HttpPollCollector, Collector},
    data::domain::{AuctionState, CotId, RenglonId},
    Event, EventKind, MemoryStore, Monitor, MonitorConfig, SessionCapture, SessionCookies, Store,
};

fn poll_capture() -> SessionCapture {
    SessionCapture {
        id_cot: CotId::from("22053"),
        url: "https://portal/cotizacion/22053".to_string(),
        offers_endpoint: "https://portal/ws/BuscarOfertas".to_string(),
        renglones: vec![CapturedRenglon {
            id_renglon: RenglonId::from("836160"),
            descripcion: "Guantes".to_string(),
        }],
        min_margins: BTreeMap::new(),
        our_provider_id: None,
        cookies: SessionCookies::from("ASP.NET_SessionId=abc; .ASPXAUTH=tok"),
    }
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        poll_secs: 0.2,
        intensive: true,
        ..Default::default()
    }
}

/// S6: five consecutive 401s in poll mode expire the session. One
/// session-expired HTTP_ERROR, no SECURITY(STOP), auction stays RUNNING.
#[test]
fn s6_session_expiry_stops_the_poll_loop_without_a_storm() {
    let transport = Arc::new(UniformTransport {
        response: unauthorized(),
    });
    let collector = HttpPollCollector::with_transport(poll_capture(), transport, 2, 5);

    let store = Arc::new(MemoryStore::new());
    let handle = Monitor::builder()
        .with_store(store.clone())
        .with_config(fast_config())
        .with_collector(
            Collector::HttpPoll(collector),
            "https://portal/cotizacion/22053",
        )
        .build()
        .unwrap()
        .start()
        .unwrap();
    let events = handle.wait().unwrap();

    let expired: Vec<&Event> = events
        .iter()
        .filter(|e| matches!(e, Event::HttpError { session_expired: true, .. }))
        .collect();
    assert_eq!(expired.len(), 1, "expected exactly one session-expired error");

    // Unauthorized responses feed expiry, never the error-storm policy.
    assert!(events.iter().all(|e| e.kind() != EventKind::Security));

    // The auction awaits a recapture.
    let auction = store.auction(&CotId::from("22053")).unwrap().unwrap();
    assert_eq!(auction.state, AuctionState::Running);

    let Event::Stop { reason, .. } = events.last().unwrap() else {
        panic!("expected STOP last, got {:?}", events.last());
    };
    assert_eq!(reason, "collector drained");
}

/// Identical unauthorized errors collapse: the presentation layer sees the
/// first 401 and the expiry, not one error per tick.
#[test]
fn repeated_unauthorized_errors_collapse_on_the_processed_stream() {
    let transport = Arc::new(UniformTransport {
        response: unauthorized(),
    });
    let collector = HttpPollCollector::with_transport(poll_capture(), transport, 2, 5);

    let store = Arc::new(MemoryStore::new());
    let handle = Monitor::builder()
        .with_store(store)
        .with_config(fast_config())
        .with_collector(
            Collector::HttpPoll(collector),
            "https://portal/cotizacion/22053",
        )
        .build()
        .unwrap()
        .start()
        .unwrap();
    let events = handle.wait().unwrap();

    let plain_errors = events
        .iter()
        .filter(|e| matches!(e, Event::HttpError { session_expired: false, .. }))
        .count();
    assert_eq!(plain_errors, 1);
}
