#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use remate::{
    collector::{control::ControlCommand, tick_loop, Collector},
    data::domain::{CotId, RenglonId},
    wire::client::{PortalTransport, WireResponse},
    Event, MemoryStore, Monitor, MonitorConfig, Scenario,
};
use tokio_util::sync::CancellationToken;

// ================================================================================================
// Scenario Builders
// ================================================================================================

/// Spanish-convention money display for an integer peso amount.
pub fn money_display(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    format!("$ {grouped},0000")
}

/// One portal offer row in the wire's JSON shape.
pub fn offer_row(id: i64, id_renglon: &str, provider: i64, monto: f64, vigente: bool) -> serde_json::Value {
    serde_json::json!({
        "id_oferta_subasta": id,
        "id_renglon": id_renglon.parse::<i64>().unwrap(),
        "id_proveedor": provider,
        "monto": monto,
        "proveedor": format!("PROVEEDOR {provider} SA"),
        "mejor_oferta": if vigente { "Oferta Vigente" } else { "Superada" },
        "hora": "10:00:00",
        "monto_a_mostrar": money_display(monto as u64),
    })
}

/// A `response_json` object carrying one leading offer at `best`.
pub fn response_with_best(id_renglon: &str, best: u64) -> serde_json::Value {
    let offers = serde_json::json!([offer_row(1, id_renglon, 77, best as f64, true)]);
    let d = format!("{offers}@@{}@@{}@@", money_display(best + 1000), money_display(best - 1));
    serde_json::json!({ "d": d })
}

pub fn renglon_entry(id_renglon: &str, descripcion: &str, best: u64) -> serde_json::Value {
    serde_json::json!({
        "id_renglon": id_renglon,
        "descripcion": descripcion,
        "response_json": response_with_best(id_renglon, best),
    })
}

pub fn scenario_from_timeline(
    id_cot: &str,
    tick_duration: f64,
    max_ticks: u64,
    timeline: serde_json::Value,
) -> Scenario {
    let raw = serde_json::json!({
        "scenario_name": "integration",
        "description": "synthetic timeline",
        "subasta": { "id_cot": id_cot, "url": format!("https://portal/cotizacion/{id_cot}") },
        "config": { "tick_duration_seconds": tick_duration, "max_ticks": max_ticks },
        "timeline": timeline,
    })
    .to_string();
    Scenario::from_str_validated(&raw).unwrap()
}

/// The S1 "controlled real" timeline: one line item, a strictly decreasing
/// price walk with two server errors and a portal-side end.
pub fn scenario_s1() -> Scenario {
    let r = "836160";
    let timeline = serde_json::json!([
        { "tick": 1,  "hora": "10:00:01", "status": 200,
          "renglones": [renglon_entry(r, "Guantes de nitrilo", 20_115_680)] },
        { "tick": 3,  "hora": "10:00:03", "status": 200,
          "renglones": [renglon_entry(r, "Guantes de nitrilo", 20_000_000)] },
        { "tick": 7,  "hora": "10:00:07", "status": 500, "error_message": "timeout BD" },
        { "tick": 10, "hora": "10:00:10", "status": 200,
          "renglones": [renglon_entry(r, "Guantes de nitrilo", 19_850_000)] },
        { "tick": 14, "hora": "10:00:14", "status": 200,
          "renglones": [renglon_entry(r, "Guantes de nitrilo", 19_700_000)] },
        { "tick": 16, "hora": "10:00:16", "status": 500 },
        { "tick": 18, "hora": "10:00:18", "status": 200,
          "renglones": [renglon_entry(r, "Guantes de nitrilo", 19_600_000)] },
        { "tick": 20, "hora": "10:00:20", "status": 200, "event": "end_auction" },
    ]);
    scenario_from_timeline("22053", 0.01, 20, timeline)
}

// ================================================================================================
// Runners
// ================================================================================================

/// Runs a bare collector (no engine) and returns its raw event stream.
pub fn run_collector_raw(collector: Collector, config: MonitorConfig) -> Vec<Event> {
    let (raw_tx, raw_rx) = async_channel::bounded::<Event>(1024);
    let (_control_tx, control_rx) = async_channel::bounded::<ControlCommand>(16);

    let mut snapshot = config.snapshot();
    if let Collector::Replay(replay) = &collector {
        snapshot.poll_secs = replay.scenario().config.tick_duration_seconds;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let args = tick_loop::Args {
        cx: CancellationToken::new(),
        source: collector,
        raw_tx,
        control_rx,
        snapshot,
    };
    let driver = std::thread::spawn(move || runtime.block_on(tick_loop::run(args)));

    let mut events = Vec::new();
    while let Ok(event) = raw_rx.recv_blocking() {
        events.push(event);
    }
    driver.join().unwrap().unwrap();
    events
}

/// Runs a full replay pipeline to completion and returns the processed
/// stream plus the store for post-conditions.
pub fn run_replay_pipeline(
    scenario: Scenario,
    config: MonitorConfig,
) -> (Vec<Event>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let handle = Monitor::builder()
        .with_store(store.clone())
        .with_config(config)
        .with_replay(scenario)
        .build()
        .unwrap()
        .start()
        .unwrap();
    let events = handle.wait().unwrap();
    (events, store)
}

// ================================================================================================
// Scripted Transports & Sessions
// ================================================================================================

/// Transport replaying a fixed response for every request.
pub struct UniformTransport {
    pub response: WireResponse,
}

#[async_trait]
impl PortalTransport for UniformTransport {
    async fn buscar_ofertas(
        &self,
        _id_cot: &CotId,
        _id_renglon: &RenglonId,
        _timeout: Duration,
    ) -> WireResponse {
        self.response.clone()
    }
}

/// Transport popping one scripted response per request, oldest first.
pub struct SequencedTransport {
    responses: Mutex<Vec<WireResponse>>,
}

impl SequencedTransport {
    pub fn new(mut responses: Vec<WireResponse>) -> Self {
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait]
impl PortalTransport for SequencedTransport {
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

/// Wire body with a single leading offer, for scripted transports.
pub fn ok_response(best: f64) -> WireResponse {
    let offers = serde_json::json!([offer_row(1, "836160", 77, best, true)]);
    WireResponse::Ok {
        body: serde_json::json!({ "d": format!("{offers}@@@@@@") }).to_string(),
    }
}

pub fn unauthorized() -> WireResponse {
    WireResponse::HttpStatus {
        status: 401,
        message: "Unauthorized".to_string(),
    }
}
