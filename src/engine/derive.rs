use chrono::Utc;

use crate::{
    data::domain::{
        equivalent_quantity, CotId, ItemsPerRenglon, LogLevel, Margin, Monto, RenglonId,
    },
    data::event::EventKind,
    error::RemateResult,
    store::{EventLogRecord, LineItemCostsRecord, LineItemRecord, Store},
};

/// Divergence above which the cost pair is considered inconsistent and the
/// total wins.
const COST_PAIR_TOLERANCE: f64 = 0.01;

// ================================================================================================
// Null-safe Arithmetic
// ================================================================================================

/// Division yielding null on a null dividend or a null/zero/non-finite
/// divisor.
fn div(a: Option<f64>, b: f64) -> Option<f64> {
    if b == 0.0 || !b.is_finite() {
        return None;
    }
    a.map(|a| a / b)
}

/// Multiplication propagating null.
fn mul(a: Option<f64>, b: f64) -> Option<f64> {
    a.map(|a| a * b)
}

// ================================================================================================
// Derivation Rules
// ================================================================================================

/// Applies the derivation rules onto a costs row.
///
/// `eq` is the equivalent unit quantity of the line item; `min_to_beat` and
/// `budget` are the latest observed numerics. The row is updated in place:
/// the bidirectional cost pair first (total wins beyond the tolerance), then
/// the USD mirror, then every derived price and margin metric.
pub fn derive_costs(
    record: &mut LineItemCostsRecord,
    eq: f64,
    min_to_beat: Option<Monto>,
    budget: Option<Monto>,
) {
    // 1. Bidirectional resolution of the ARS cost pair.
    match (record.unit_cost_ars, record.total_cost_ars) {
        (Some(unit), Some(total)) => {
            if (unit * eq - total).abs() > COST_PAIR_TOLERANCE {
                record.unit_cost_ars = div(Some(total), eq);
            }
        }
        (Some(unit), None) => record.total_cost_ars = mul(Some(unit), eq),
        (None, Some(total)) => record.unit_cost_ars = div(Some(total), eq),
        (None, None) => {}
    }

    // 2. USD mirror. An unusable rate leaves any user-supplied USD values
    // untouched instead of nulling them.
    if let Some(fx) = record.fx_rate.filter(|fx| fx.is_usable()) {
        record.unit_cost_usd = div(record.unit_cost_ars, fx.0);
        record.total_cost_usd = div(record.total_cost_ars, fx.0);
    }

    // 3. Acceptable prices.
    let factor = record.min_margin.map(|m| 1.0 + m.0);
    record.price_unit_acceptable = factor.and_then(|f| mul(record.unit_cost_ars, f));
    record.price_total_acceptable = factor.and_then(|f| mul(record.total_cost_ars, f));

    // 4. Reference metrics.
    record.price_ref_unit = div(budget.map(f64::from), eq);
    record.renta_ref = record
        .price_ref_unit
        .and_then(|p| record.unit_cost_ars.and_then(|cu| div(Some(p), cu)))
        .map(|ratio| ratio - 1.0);

    // 5. Improvement metrics.
    record.price_unit_mejora = div(min_to_beat.map(f64::from), eq);
    record.renta_para_mejorar = record
        .price_unit_mejora
        .and_then(|p| record.unit_cost_ars.and_then(|cu| div(Some(p), cu)))
        .map(|ratio| ratio - 1.0);
}

// ================================================================================================
// User Ingestion Surface
// ================================================================================================

/// User-entered cost fields as they arrive from the editor or a spreadsheet
/// import. Margins are in either convention; see [`Margin::ingest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostInput {
    pub unit_of_measure: Option<String>,
    pub brand: Option<String>,
    pub notes: Option<String>,
    pub fx_rate: Option<f64>,
    pub unit_cost_ars: Option<f64>,
    pub total_cost_ars: Option<f64>,
    pub unit_cost_usd: Option<f64>,
    pub total_cost_usd: Option<f64>,
    pub min_margin: Option<f64>,
    pub tracked: bool,
}

/// Ingests user cost data for one line item, derives, and persists.
///
/// Reads the line item for the equivalent quantity and the latest observed
/// state for the derivation inputs, so the stored row is consistent the
/// moment it lands.
pub fn apply_user_costs(
    store: &dyn Store,
    id_cot: &CotId,
    id_renglon: &RenglonId,
    input: CostInput,
) -> RemateResult<LineItemCostsRecord> {
    let items = store.line_items(id_cot)?;
    let item = items
        .iter()
        .find(|i| &i.id_renglon == id_renglon)
        .ok_or_else(|| {
            crate::error::StoreError::UnknownLineItem(format!("{id_cot}/{id_renglon}"))
        })?;

    let eq = equivalent_quantity(item.quantity, item.items_per_renglon);
    let state = store.line_item_state(id_cot, id_renglon)?;

    let mut record = store.costs(id_cot, id_renglon)?.unwrap_or_default();
    record.unit_of_measure = input.unit_of_measure;
    record.brand = input.brand;
    record.notes = input.notes;
    record.fx_rate = input.fx_rate.map(crate::data::domain::FxRate);
    record.unit_cost_ars = input.unit_cost_ars;
    record.total_cost_ars = input.total_cost_ars;
    record.unit_cost_usd = input.unit_cost_usd;
    record.total_cost_usd = input.total_cost_usd;
    record.min_margin = input.min_margin.map(Margin::ingest);
    record.tracked = input.tracked;

    derive_costs(
        &mut record,
        eq,
        state.as_ref().and_then(|s| s.min_to_beat),
        state.as_ref().and_then(|s| s.budget),
    );

    store.upsert_costs(id_cot, id_renglon, &record)?;
    Ok(record)
}

/// Updates a line item's quantity and bundling factor from user input.
///
/// An incoming zero bundling factor violates the positive invariant: it is
/// coerced to 1 and recorded as a WARN row in the event log.
pub fn apply_line_item_details(
    store: &dyn Store,
    id_cot: &CotId,
    id_renglon: &RenglonId,
    quantity: f64,
    items_per_renglon_raw: u32,
    min_margin_raw: Option<f64>,
) -> RemateResult<LineItemRecord> {
    let items = store.line_items(id_cot)?;
    let mut item = items
        .iter()
        .find(|i| &i.id_renglon == id_renglon)
        .cloned()
        .ok_or_else(|| {
            crate::error::StoreError::UnknownLineItem(format!("{id_cot}/{id_renglon}"))
        })?;

    let (sanitized, was_invalid) = ItemsPerRenglon::sanitize(items_per_renglon_raw);
    if was_invalid {
        store.append_event_log(&EventLogRecord {
            level: LogLevel::Warn,
            kind: EventKind::Log,
            id_cot: Some(id_cot.clone()),
            id_renglon: Some(id_renglon.clone()),
            message: "items_per_renglon of 0 coerced to 1".to_string(),
            created_at: Utc::now(),
        })?;
    }

    item.quantity = quantity;
    item.items_per_renglon = sanitized;
    if let Some(raw) = min_margin_raw {
        item.min_margin = Margin::ingest(raw);
    }
    store.upsert_line_item(&item)?;
    Ok(item)
}
