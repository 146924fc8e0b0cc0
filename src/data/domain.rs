use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{impl_add_sub_mul_div_primitive, impl_from_primitive};

// ================================================================================================
// Domain Strong Types (NewTypes)
// ================================================================================================

/// Portal-assigned auction identifier.
///
/// Always an opaque string: the portal hands out values with significant
/// leading zeros, so this must never round-trip through a numeric type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CotId(pub String);
impl_from_primitive!(CotId, String);

impl From<&str> for CotId {
    fn from(value: &str) -> Self {
        CotId(value.to_string())
    }
}

impl std::fmt::Display for CotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Line-item identifier, unique within one auction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RenglonId(pub String);
impl_from_primitive!(RenglonId, String);

impl From<&str> for RenglonId {
    fn from(value: &str) -> Self {
        RenglonId(value.to_string())
    }
}

impl std::fmt::Display for RenglonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Portal offer identifier. Opaque; the wire carries it as an integer but the
/// domain never does arithmetic on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferId(pub String);
impl_from_primitive!(OfferId, String);

impl From<&str> for OfferId {
    fn from(value: &str) -> Self {
        OfferId(value.to_string())
    }
}

/// Provider identifier within one auction. May differ for the same bidder
/// across auctions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);
impl_from_primitive!(ProviderId, String);

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        ProviderId(value.to_string())
    }
}

/// A monetary amount in the portal's quote currency (ARS).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Monto(pub f64);
impl_from_primitive!(Monto, f64);
impl_add_sub_mul_div_primitive!(Monto, f64);

/// ARS to USD exchange rate.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct FxRate(pub f64);
impl_from_primitive!(FxRate, f64);

impl FxRate {
    pub fn is_usable(&self) -> bool {
        self.0.is_finite() && self.0 != 0.0
    }
}

/// Sequential index of one collector tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TickIdx(pub u64);
impl_from_primitive!(TickIdx, u64);

impl TickIdx {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

// ================================================================================================
// Margin
// ================================================================================================

/// Minimum acceptable margin, stored as a fraction: `Margin(0.30)` is 30%.
///
/// User input and spreadsheet columns speak percent. [`Margin::ingest`]
/// normalizes either convention into the stored fraction and
/// [`Margin::export`] converts back for spreadsheet output.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Margin(pub f64);
impl_from_primitive!(Margin, f64);

impl Margin {
    /// Normalizes a user- or spreadsheet-supplied number into a fraction.
    ///
    /// Values `>= 1.0` are interpreted as percentages and divided by 100;
    /// values below 1.0 are taken verbatim. Negative input clamps to zero,
    /// keeping the stored invariant `rmin >= 0`.
    pub fn ingest(value: f64) -> Self {
        let v = if value >= 1.0 { value / 100.0 } else { value };
        Margin(v.max(0.0))
    }

    /// Converts the stored fraction back to the percent convention used by
    /// the export surface.
    pub fn export(self) -> f64 {
        self.0 * 100.0
    }
}

// ================================================================================================
// Lifecycle & Log Enums
// ================================================================================================

/// Auction lifecycle. At most one auction is `Running` per process.
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
#[strum(serialize_all = "UPPERCASE")]
pub enum AuctionState {
    Running,
    Paused,
    Ended,
    Error,
}

/// Severity of an event-log row.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

// ================================================================================================
// Equivalent Quantity
// ================================================================================================

/// Bundling factor of a line item.
///
/// A renglón may bundle several physical units; unit-level prices divide by
/// `quantity / items_per_renglon`. An incoming zero violates the positive
/// invariant and is coerced to 1 by the caller (logged as WARN there).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsPerRenglon(pub u32);

impl Default for ItemsPerRenglon {
    fn default() -> Self {
        Self(1)
    }
}

impl ItemsPerRenglon {
    /// Returns the sanitized factor and whether the raw value was invalid.
    pub fn sanitize(raw: u32) -> (Self, bool) {
        if raw == 0 {
            (Self(1), true)
        } else {
            (Self(raw), false)
        }
    }
}

/// Equivalent unit quantity used by every unit-price derivation.
pub fn equivalent_quantity(quantity: f64, items_per_renglon: ItemsPerRenglon) -> f64 {
    quantity / items_per_renglon.0 as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_ingest_treats_large_values_as_percent() {
        assert_eq!(Margin::ingest(30.0), Margin(0.30));
        assert_eq!(Margin::ingest(1.0), Margin(0.01));
        assert_eq!(Margin::ingest(0.30), Margin(0.30));
        assert_eq!(Margin::ingest(0.0), Margin(0.0));
    }

    #[test]
    fn margin_ingest_clamps_negative_input() {
        assert_eq!(Margin::ingest(-0.25), Margin(0.0));
    }

    #[test]
    fn margin_round_trips_through_export() {
        let stored = Margin::ingest(30.0);
        assert_eq!(stored.export(), 30.0);
        assert_eq!(Margin::ingest(stored.export()), stored);
    }

    #[test]
    fn items_per_renglon_zero_is_coerced() {
        let (sanitized, was_invalid) = ItemsPerRenglon::sanitize(0);
        assert_eq!(sanitized, ItemsPerRenglon(1));
        assert!(was_invalid);

        let (sanitized, was_invalid) = ItemsPerRenglon::sanitize(4);
        assert_eq!(sanitized, ItemsPerRenglon(4));
        assert!(!was_invalid);
    }

    #[test]
    fn equivalent_quantity_divides_by_bundle_size() {
        assert_eq!(equivalent_quantity(10.0, ItemsPerRenglon(1)), 10.0);
        assert_eq!(equivalent_quantity(10.0, ItemsPerRenglon(5)), 2.0);
    }

    #[test]
    fn cot_id_preserves_leading_zeros() {
        let id = CotId::from("00422");
        assert_eq!(id.to_string(), "00422");
    }
}
