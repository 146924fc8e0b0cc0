use std::{io::Read, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    data::domain::{CotId, RenglonId},
    error::{RemateResult, ScenarioError},
    wire::payload::probe_inner_segmentation,
};

/// HTTP statuses a timeline entry may simulate.
pub const ALLOWED_STATUSES: [u16; 4] = [200, 500, 502, 503];

/// Timeline event marker ending the auction.
pub const EVENT_END_AUCTION: &str = "end_auction";

// ================================================================================================
// Scenario Document
// ================================================================================================

/// A recorded auction timeline driving the replay collector.
///
/// Deserialized from the scenario JSON document and validated before any
/// tick runs; a scenario that fails [`Scenario::validate`] never reaches the
/// tick loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub scenario_name: String,
    pub description: String,
    pub subasta: SubastaMeta,
    pub config: ScenarioConfig,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubastaMeta {
    pub id_cot: CotId,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub tick_duration_seconds: f64,
    pub max_ticks: u64,
}

/// One timeline entry. `tick` indices are strictly ascending; `hora` is
/// advisory wall-clock decoration and takes no part in replay semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub tick: u64,
    pub hora: String,
    pub status: u16,
    #[serde(default)]
    pub renglones: Option<Vec<RenglonEntry>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl TimelineEntry {
    pub fn ends_auction(&self) -> bool {
        self.event.as_deref() == Some(EVENT_END_AUCTION)
    }
}

/// Raw portal response for one line item at one tick, in the portal's real
/// wire shape: an object `{"d": "<offers>@@<budget>@@<min>@@"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenglonEntry {
    pub id_renglon: RenglonId,
    pub descripcion: String,
    pub response_json: ResponseJson,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseJson {
    pub d: String,
}

// ================================================================================================
// Loading & Validation
// ================================================================================================

impl Scenario {
    pub fn from_path(path: impl AsRef<Path>) -> RemateResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(ScenarioError::Unreadable)?;
        Self::from_str_validated(&raw)
    }

    pub fn from_reader(mut reader: impl Read) -> RemateResult<Self> {
        let mut raw = String::new();
        reader
            .read_to_string(&mut raw)
            .map_err(ScenarioError::Unreadable)?;
        Self::from_str_validated(&raw)
    }

    pub fn from_str_validated(raw: &str) -> RemateResult<Self> {
        let scenario: Scenario =
            serde_json::from_str(raw).map_err(ScenarioError::Deserialize)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Structural validation beyond what deserialization enforces.
    ///
    /// Rejects blank identity fields, a non-positive cadence, a timeline
    /// that is not strictly ascending, statuses outside the allowed set, and
    /// malformed `@@` segmentation in any recorded response.
    pub fn validate(&self) -> RemateResult<()> {
        if self.subasta.id_cot.0.trim().is_empty() {
            return Err(ScenarioError::MissingField("subasta.id_cot".to_string()).into());
        }
        if self.subasta.url.trim().is_empty() {
            return Err(ScenarioError::MissingField("subasta.url".to_string()).into());
        }
        if !self.config.tick_duration_seconds.is_finite()
            || self.config.tick_duration_seconds <= 0.0
        {
            return Err(
                ScenarioError::MissingField("config.tick_duration_seconds".to_string()).into(),
            );
        }
        if self.config.max_ticks == 0 {
            return Err(ScenarioError::MissingField("config.max_ticks".to_string()).into());
        }

        let mut previous_tick: Option<u64> = None;
        for entry in &self.timeline {
            if let Some(prev) = previous_tick {
                if entry.tick <= prev {
                    return Err(ScenarioError::NonMonotonicTimeline(entry.tick).into());
                }
            }
            previous_tick = Some(entry.tick);

            if !ALLOWED_STATUSES.contains(&entry.status) {
                return Err(ScenarioError::UnsupportedStatus {
                    tick: entry.tick,
                    status: entry.status,
                }
                .into());
            }

            if let Some(renglones) = &entry.renglones {
                for renglon in renglones {
                    probe_inner_segmentation(&renglon.response_json.d).map_err(|e| {
                        ScenarioError::MalformedPayload {
                            tick: entry.tick,
                            msg: e.to_string(),
                        }
                    })?;
                }
            }
        }

        Ok(())
    }
}
