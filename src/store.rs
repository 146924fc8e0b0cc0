pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    data::{
        domain::{
            AuctionState, CotId, FxRate, ItemsPerRenglon, LogLevel, Margin, Monto, ProviderId,
            RenglonId,
        },
        event::EventKind,
    },
    error::StoreError,
};

pub type StoreResult<T> = Result<T, StoreError>;

// ================================================================================================
// Records
// ================================================================================================

/// One auction row. `id_cot` is unique system-wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionRecord {
    pub id_cot: CotId,
    pub url: String,
    pub state: AuctionState,
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff `state == Ended`.
    pub ended_at: Option<DateTime<Utc>>,
    pub last_ok_at: Option<DateTime<Utc>>,
    pub last_http_code: Option<u16>,
    pub err_streak: u32,
    /// The bidder's provider id within this auction; opaque and per-auction.
    pub our_provider_id: Option<ProviderId>,
}

/// One line item. Created on first observation, never deleted by cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemRecord {
    pub id_cot: CotId,
    pub id_renglon: RenglonId,
    pub descripcion: String,
    pub items_per_renglon: ItemsPerRenglon,
    pub quantity: f64,
    pub min_margin: Margin,
}

/// Latest observed state of one line item; at most one row per item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemStateRecord {
    pub id_cot: CotId,
    pub id_renglon: RenglonId,
    pub best: Option<Monto>,
    pub best_text: Option<String>,
    pub min_to_beat: Option<Monto>,
    pub min_to_beat_text: Option<String>,
    pub budget: Option<Monto>,
    pub budget_text: Option<String>,
    pub portal_msg: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// User cost data plus the derived metrics the engine maintains.
///
/// User fields survive collector restarts and are only written by the user
/// editor; the engine is the sole writer of the derived block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LineItemCostsRecord {
    pub unit_of_measure: Option<String>,
    pub brand: Option<String>,
    pub notes: Option<String>,
    pub fx_rate: Option<FxRate>,
    pub unit_cost_ars: Option<f64>,
    pub total_cost_ars: Option<f64>,
    pub unit_cost_usd: Option<f64>,
    pub total_cost_usd: Option<f64>,
    pub min_margin: Option<Margin>,
    pub tracked: bool,

    // === Derived (engine-owned) ===
    pub price_unit_acceptable: Option<f64>,
    pub price_total_acceptable: Option<f64>,
    pub price_ref_unit: Option<f64>,
    pub renta_ref: Option<f64>,
    pub price_unit_mejora: Option<f64>,
    pub renta_para_mejorar: Option<f64>,
}

/// Append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogRecord {
    pub level: LogLevel,
    pub kind: EventKind,
    pub id_cot: Option<CotId>,
    pub id_renglon: Option<RenglonId>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// ================================================================================================
// Store Contract
// ================================================================================================

/// Narrow typed interface over the relational store.
///
/// Each call is transactional: a reader observes either the pre-call or the
/// post-call state, never a partial mixture. The engine is the only writer
/// of auction state, line-item state, the event log, and derived cost
/// fields; storage engines themselves live behind this trait.
pub trait Store: Send + Sync {
    // === Auctions ===

    /// Creates the auction on first observation; no-op on an existing row
    /// apart from refreshing the origin URL.
    fn upsert_auction(&self, id_cot: &CotId, url: &str) -> StoreResult<()>;

    fn auction(&self, id_cot: &CotId) -> StoreResult<Option<AuctionRecord>>;

    /// Transitions lifecycle state, stamping `started_at`/`ended_at` as the
    /// target state requires. Rejects a second `Running` auction.
    fn set_auction_state(
        &self,
        id_cot: &CotId,
        state: AuctionState,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Records the outcome of one tick: last HTTP code, last-ok stamp and
    /// the consecutive-error streak.
    fn record_auction_health(
        &self,
        id_cot: &CotId,
        last_http_code: u16,
        ok_at: Option<DateTime<Utc>>,
        err_streak: u32,
    ) -> StoreResult<()>;

    fn set_our_provider(&self, id_cot: &CotId, provider: &ProviderId) -> StoreResult<()>;

    // === Line items ===

    fn upsert_line_item(&self, item: &LineItemRecord) -> StoreResult<()>;

    fn line_items(&self, id_cot: &CotId) -> StoreResult<Vec<LineItemRecord>>;

    fn upsert_line_item_state(&self, state: &LineItemStateRecord) -> StoreResult<()>;

    fn line_item_state(
        &self,
        id_cot: &CotId,
        id_renglon: &RenglonId,
    ) -> StoreResult<Option<LineItemStateRecord>>;

    // === Costs ===

    fn upsert_costs(
        &self,
        id_cot: &CotId,
        id_renglon: &RenglonId,
        costs: &LineItemCostsRecord,
    ) -> StoreResult<()>;

    fn costs(
        &self,
        id_cot: &CotId,
        id_renglon: &RenglonId,
    ) -> StoreResult<Option<LineItemCostsRecord>>;

    // === Event log ===

    fn append_event_log(&self, row: &EventLogRecord) -> StoreResult<()>;

    /// Most recent rows, newest last, bounded by `limit`.
    fn event_log_tail(&self, limit: usize) -> StoreResult<Vec<EventLogRecord>>;

    // === UI config ===

    fn set_ui_config(&self, key: &str, value: &str) -> StoreResult<()>;

    fn ui_config(&self, key: &str) -> StoreResult<Option<String>>;

    // === Maintenance ===

    /// Erases observed state and the audit trail of one auction. Line items
    /// and user cost data survive.
    fn cleanup(&self, id_cot: &CotId) -> StoreResult<()>;

    /// Removes the auction and cascades to its line items, states and costs.
    fn delete_auction(&self, id_cot: &CotId) -> StoreResult<()>;
}
