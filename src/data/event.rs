use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumString, IntoStaticStr};

use crate::data::domain::{CotId, LogLevel, Monto, OfferId, ProviderId, RenglonId, TickIdx};

/// Substring the portal uses to mark the offer currently holding the lead.
pub const LEADER_MARKER: &str = "Vigente";

// ================================================================================================
// Offers
// ================================================================================================

/// One row of a line item's offer book, as observed on a single tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub provider: ProviderId,
    pub provider_label: String,
    pub monto: Monto,
    /// Raw display string the portal rendered for `monto`.
    pub display: String,
    /// Portal event time, `HH:MM:SS`.
    pub hora: String,
    /// Leader label, contains [`LEADER_MARKER`] for the current leader.
    pub leader_label: String,
}

impl Offer {
    pub fn is_labeled_leader(&self) -> bool {
        self.leader_label.contains(LEADER_MARKER)
    }
}

/// Resolves the leading offer of an offer book.
///
/// The leader is the offer whose label carries the leader marker. When no
/// label matches, falls back to the lowest monto; equal montos break by the
/// earlier `hora` (HH:MM:SS sorts lexicographically).
pub fn leader_of(offers: &[Offer]) -> Option<&Offer> {
    if let Some(labeled) = offers.iter().find(|o| o.is_labeled_leader()) {
        return Some(labeled);
    }

    offers.iter().min_by(|a, b| {
        a.monto
            .partial_cmp(&b.monto)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.hora.cmp(&b.hora))
    })
}

// ================================================================================================
// Observations
// ================================================================================================

/// One normalized per-line-item observation, parsed once at the collector
/// boundary. Everything downstream of the raw-event queue sees only this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemObservation {
    pub id_renglon: RenglonId,
    pub descripcion: String,
    pub offers: SmallVec<[Offer; 4]>,
    pub best: Option<Monto>,
    pub best_text: Option<String>,
    pub min_to_beat: Option<Monto>,
    pub min_to_beat_text: Option<String>,
    pub budget: Option<Monto>,
    pub budget_text: Option<String>,
    pub portal_msg: Option<String>,
    pub finalized: bool,
    /// Observed HTTP status; 200 when the observation is synthetic.
    pub http_status: u16,
}

impl LineItemObservation {
    /// Change detection driving UPDATE suppression: only the best, minimum
    /// and budget numerics, the portal message and the finalized flag count.
    pub fn differs_from(&self, prev: &Self) -> bool {
        self.best != prev.best
            || self.min_to_beat != prev.min_to_beat
            || self.budget != prev.budget
            || self.portal_msg != prev.portal_msg
            || self.finalized != prev.finalized
    }

    pub fn leader(&self) -> Option<&Offer> {
        leader_of(&self.offers)
    }
}

// ================================================================================================
// Alert & Security Payloads
// ================================================================================================

/// Visual class of an alert row.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStyle {
    Normal,
    Tracked,
    AlertUp,
    AlertDown,
    Winner,
    Loser,
}

/// Which sound the presentation layer should play for an alert.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum SoundTag {
    PriceDrop,
    LeadLost,
    TrackedChange,
}

/// Outcome of the alert rules for one UPDATE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDecision {
    pub style: AlertStyle,
    /// Tracked items keep their background tint on top of any style.
    pub tracked: bool,
    pub sound: Option<SoundTag>,
    pub hide: bool,
    pub message: String,
}

/// Throttle decision of the security policy, as carried on SECURITY events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SecurityAction {
    Backoff { new_interval_secs: f64 },
    Stop { reason: String },
}

// ================================================================================================
// The Event Contract
// ================================================================================================

/// Discriminant of [`Event`], the closed type set of the inter-component
/// contract.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Start,
    Stop,
    End,
    Snapshot,
    Update,
    Heartbeat,
    HttpError,
    Alert,
    Security,
    Log,
}

/// Tagged record flowing on the raw- and processed-event queues.
///
/// Collector emission order within one tick: `Update`* for changed line
/// items, then exactly one `Heartbeat`, then optionally `End`. A `Snapshot`
/// is emitted exactly once at collector start, before any `Update`. A non-200
/// tick replaces its updates with a single `HttpError`.
///
/// `Start` carries the only wall-clock timestamp on the contract; it is
/// engine-emitted and explicitly non-deterministic under replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Start {
        id_cot: CotId,
        at: DateTime<Utc>,
    },
    Stop {
        id_cot: CotId,
        reason: String,
    },
    End {
        id_cot: CotId,
    },
    Snapshot {
        id_cot: CotId,
        observations: Vec<LineItemObservation>,
    },
    Update {
        id_cot: CotId,
        observation: Box<LineItemObservation>,
    },
    Heartbeat {
        tick: TickIdx,
        elapsed_secs: f64,
    },
    HttpError {
        status: u16,
        message: String,
        session_expired: bool,
    },
    Alert {
        id_renglon: RenglonId,
        decision: AlertDecision,
    },
    Security {
        action: SecurityAction,
    },
    Log {
        level: LogLevel,
        text: String,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Start { .. } => EventKind::Start,
            Event::Stop { .. } => EventKind::Stop,
            Event::End { .. } => EventKind::End,
            Event::Snapshot { .. } => EventKind::Snapshot,
            Event::Update { .. } => EventKind::Update,
            Event::Heartbeat { .. } => EventKind::Heartbeat,
            Event::HttpError { .. } => EventKind::HttpError,
            Event::Alert { .. } => EventKind::Alert,
            Event::Security { .. } => EventKind::Security,
            Event::Log { .. } => EventKind::Log,
        }
    }
}
