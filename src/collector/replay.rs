use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    collector::{TickError, TickOutcome, TickSource},
    data::{
        config::ConfigSnapshot,
        domain::{CotId, LogLevel, RenglonId, TickIdx},
        event::LineItemObservation,
    },
    error::RemateResult,
    scenario::{Scenario, TimelineEntry},
    wire::payload::PortalPayload,
};

/// Deterministic collector driving a recorded timeline.
///
/// Content dictated by a timeline entry persists across gap ticks (a gap
/// tick re-observes the last responses, so nothing changes and no UPDATE
/// results); an entry's transient status, error and end marker apply only at
/// the entry's own tick.
pub struct ReplayCollector {
    scenario: Scenario,
    last: BTreeMap<RenglonId, LineItemObservation>,
    released: bool,
}

impl ReplayCollector {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            last: BTreeMap::new(),
            released: true,
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    fn entry_at(&self, tick: TickIdx) -> Option<TimelineEntry> {
        self.scenario
            .timeline
            .binary_search_by_key(&tick.0, |e| e.tick)
            .ok()
            .map(|i| self.scenario.timeline[i].clone())
    }

    /// Applies one 200 entry's recorded responses onto the persistent
    /// observation map. A response that fails payload parsing leaves that
    /// line item untouched for this tick and is reported as WARN.
    fn apply_content(&mut self, entry: &TimelineEntry, logs: &mut Vec<(LogLevel, String)>) {
        let Some(renglones) = &entry.renglones else {
            return;
        };

        for renglon in renglones {
            match PortalPayload::parse_inner(&renglon.response_json.d) {
                Ok(payload) => {
                    let observation = payload.into_observation(
                        renglon.id_renglon.clone(),
                        renglon.descripcion.clone(),
                        entry.status,
                    );
                    self.last
                        .insert(renglon.id_renglon.clone(), observation);
                }
                Err(e) => {
                    logs.push((
                        LogLevel::Warn,
                        format!(
                            "tick {}: unparseable response for renglon {}: {e}",
                            entry.tick, renglon.id_renglon
                        ),
                    ));
                }
            }
        }
    }

    fn elapsed_at(&self, tick: TickIdx) -> f64 {
        tick.0 as f64 * self.scenario.config.tick_duration_seconds
    }
}

#[async_trait]
impl TickSource for ReplayCollector {
    fn id_cot(&self) -> &CotId {
        &self.scenario.subasta.id_cot
    }

    async fn capture(&mut self, _cfg: &ConfigSnapshot) -> RemateResult<Vec<LineItemObservation>> {
        self.released = false;
        self.last.clear();

        // The snapshot shows what the portal would show on arrival: the
        // content dictated for the first tick, when it is a clean 200.
        let mut logs = Vec::new();
        if let Some(entry) = self.entry_at(TickIdx(1)) {
            if entry.status == 200 {
                self.apply_content(&entry, &mut logs);
            }
        }
        for (_, text) in logs {
            tracing::warn!("{text}");
        }

        Ok(self.last.values().cloned().collect())
    }

    async fn observe(&mut self, tick: TickIdx, _cfg: &ConfigSnapshot) -> TickOutcome {
        let mut outcome = TickOutcome {
            elapsed_secs: self.elapsed_at(tick),
            ..Default::default()
        };

        if let Some(entry) = self.entry_at(tick) {
            if entry.status != 200 {
                outcome.http_error = Some(TickError {
                    status: entry.status,
                    message: entry
                        .error_message
                        .clone()
                        .unwrap_or_else(|| format!("HTTP {}", entry.status)),
                    session_expired: false,
                });
            } else {
                self.apply_content(&entry, &mut outcome.logs);
                if let Some(message) = &entry.message {
                    outcome.logs.push((LogLevel::Info, message.clone()));
                }
                if entry.ends_auction() {
                    outcome.end = true;
                }
            }
        }

        if outcome.http_error.is_none() {
            outcome.observations = self.last.values().cloned().collect();
        }

        if !outcome.end && tick.0 >= self.scenario.config.max_ticks {
            outcome.finished = true;
        }

        outcome
    }

    async fn release(&mut self) {
        self.last.clear();
        self.released = true;
    }

    fn released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::domain::Monto;

    fn wire_d(offers: &str, budget: &str, min: &str) -> String {
        format!("{offers}@@{budget}@@{min}@@")
    }

    fn offer_json(monto: f64, display: &str) -> String {
        format!(
            r#"[{{"id_oferta_subasta": 1, "id_renglon": 836160, "id_proveedor": 7,
                 "monto": {monto}, "proveedor": "INSUMOS SA", "mejor_oferta": "Oferta Vigente",
                 "hora": "10:00:00", "monto_a_mostrar": "{display}"}}]"#
        )
    }

    fn scenario(timeline: serde_json::Value) -> Scenario {
        let raw = serde_json::json!({
            "scenario_name": "unit",
            "description": "replay cursor behavior",
            "subasta": { "id_cot": "22053", "url": "https://portal/22053" },
            "config": { "tick_duration_seconds": 0.5, "max_ticks": 10 },
            "timeline": timeline
        })
        .to_string();
        Scenario::from_str_validated(&raw).unwrap()
    }

    fn renglon_entry(monto: f64) -> serde_json::Value {
        serde_json::json!({
            "id_renglon": "836160",
            "descripcion": "Guantes",
            "response_json": { "d": wire_d(&offer_json(monto, "$ 100,00"), "", "") }
        })
    }

    async fn capture_and_observe(
        collector: &mut ReplayCollector,
        ticks: std::ops::RangeInclusive<u64>,
    ) -> Vec<TickOutcome> {
        let cfg = crate::data::config::MonitorConfig::default().snapshot();
        collector.capture(&cfg).await.unwrap();
        let mut outcomes = Vec::new();
        for t in ticks {
            outcomes.push(collector.observe(TickIdx(t), &cfg).await);
        }
        outcomes
    }

    #[tokio::test]
    async fn gap_ticks_repeat_content_without_error() {
        let mut collector = ReplayCollector::new(scenario(serde_json::json!([
            { "tick": 1, "hora": "10:00:00", "status": 200, "renglones": [renglon_entry(100.0)] },
            { "tick": 3, "hora": "10:00:02", "status": 500, "error_message": "timeout BD" },
            { "tick": 5, "hora": "10:00:04", "status": 200, "renglones": [renglon_entry(90.0)] },
        ])));

        let outcomes = capture_and_observe(&mut collector, 1..=5).await;

        // Tick 2 is a gap: same content as tick 1, no error.
        assert!(outcomes[1].http_error.is_none());
        assert_eq!(outcomes[1].observations[0].best, Some(Monto(100.0)));

        // The 500 applies only at its own tick.
        assert!(outcomes[2].http_error.is_some());
        assert_eq!(outcomes[2].http_error.as_ref().unwrap().message, "timeout BD");
        assert!(outcomes[3].http_error.is_none());
        assert_eq!(outcomes[3].observations[0].best, Some(Monto(100.0)));

        assert_eq!(outcomes[4].observations[0].best, Some(Monto(90.0)));
    }

    #[tokio::test]
    async fn capture_mirrors_first_tick_content() {
        let mut collector = ReplayCollector::new(scenario(serde_json::json!([
            { "tick": 1, "hora": "10:00:00", "status": 200, "renglones": [renglon_entry(100.0)] },
        ])));

        let cfg = crate::data::config::MonitorConfig::default().snapshot();
        let snapshot = collector.capture(&cfg).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].best, Some(Monto(100.0)));
    }

    #[tokio::test]
    async fn end_marker_sets_end_and_max_ticks_finishes() {
        let mut collector = ReplayCollector::new(scenario(serde_json::json!([
            { "tick": 1, "hora": "10:00:00", "status": 200, "renglones": [renglon_entry(100.0)] },
            { "tick": 4, "hora": "10:00:03", "status": 200, "event": "end_auction" },
        ])));

        let outcomes = capture_and_observe(&mut collector, 1..=4).await;
        assert!(!outcomes[2].end);
        assert!(outcomes[3].end);

        // A scenario with no end marker finishes at max_ticks instead.
        let mut collector = ReplayCollector::new(scenario(serde_json::json!([
            { "tick": 1, "hora": "10:00:00", "status": 200, "renglones": [renglon_entry(100.0)] },
        ])));
        let outcomes = capture_and_observe(&mut collector, 1..=10).await;
        assert!(!outcomes[8].finished);
        assert!(outcomes[9].finished);
    }

    #[tokio::test]
    async fn unparseable_response_keeps_previous_state_and_warns() {
        let mut collector = ReplayCollector::new(scenario(serde_json::json!([
            { "tick": 1, "hora": "10:00:00", "status": 200, "renglones": [renglon_entry(100.0)] },
            { "tick": 2, "hora": "10:00:01", "status": 200, "renglones": [{
                "id_renglon": "836160",
                "descripcion": "Guantes",
                "response_json": { "d": "{broken json}@@x@@y@@" }
            }] },
        ])));

        let outcomes = capture_and_observe(&mut collector, 1..=2).await;
        assert_eq!(outcomes[1].observations[0].best, Some(Monto(100.0)));
        assert_eq!(outcomes[1].logs.len(), 1);
        assert_eq!(outcomes[1].logs[0].0, LogLevel::Warn);
    }

    #[tokio::test]
    async fn elapsed_is_synthetic_and_deterministic() {
        let mut collector = ReplayCollector::new(scenario(serde_json::json!([
            { "tick": 1, "hora": "10:00:00", "status": 200, "renglones": [renglon_entry(100.0)] },
        ])));
        let outcomes = capture_and_observe(&mut collector, 1..=3).await;
        assert_eq!(outcomes[0].elapsed_secs, 0.5);
        assert_eq!(outcomes[2].elapsed_secs, 1.5);
    }

    #[tokio::test]
    async fn release_probe_reflects_lifecycle() {
        let mut collector = ReplayCollector::new(scenario(serde_json::json!([
            { "tick": 1, "hora": "10:00:00", "status": 200, "renglones": [renglon_entry(100.0)] },
        ])));
        assert!(collector.released());

        let cfg = crate::data::config::MonitorConfig::default().snapshot();
        collector.capture(&cfg).await.unwrap();
        assert!(!collector.released());

        collector.release().await;
        assert!(collector.released());
    }
}
