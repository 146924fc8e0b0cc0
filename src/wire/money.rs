use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::{
    data::domain::Monto,
    error::{RemateResult, WireError},
};

/// Shape of a Spanish-convention money string after the prefix is stripped:
/// dot thousands groups, comma decimals, both optional.
fn money_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d{1,3}(?:\.\d{3})*(?:,\d+)?$|^-?\d+(?:,\d+)?$").unwrap())
}

/// Parses a portal money string (`"$ 1.234.567,8900"`) into a [`Monto`].
///
/// Tolerates a missing `$` prefix, surrounding whitespace, and any number of
/// decimal places. The digits run through [`Decimal`] so display strings with
/// long fractional tails do not pick up float noise on the way in.
pub fn parse_money(raw: &str) -> RemateResult<Monto> {
    let trimmed = raw.trim().trim_start_matches('$').trim_start();

    if trimmed.is_empty() {
        return Err(WireError::Money(raw.to_string()).into());
    }
    if !money_shape().is_match(trimmed) {
        return Err(WireError::Money(raw.to_string()).into());
    }

    let normalized: String = trimmed.replace('.', "").replace(',', ".");
    let decimal =
        Decimal::from_str(&normalized).map_err(|_| WireError::Money(raw.to_string()))?;
    decimal
        .to_f64()
        .map(Monto)
        .ok_or_else(|| WireError::Money(raw.to_string()).into())
}

/// Parses an optional money field: blank input is a legitimate null on the
/// portal side, anything else must parse.
pub fn parse_money_opt(raw: &str) -> RemateResult<Option<Monto>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_money(raw).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_portal_format() {
        assert_eq!(
            parse_money("$ 20.115.680,0000").unwrap(),
            Monto(20_115_680.0)
        );
        assert_eq!(parse_money("$ 1.234.567,8900").unwrap(), Monto(1_234_567.89));
    }

    #[test]
    fn tolerates_missing_prefix() {
        assert_eq!(parse_money("1.234,50").unwrap(), Monto(1_234.50));
        assert_eq!(parse_money("  850,75  ").unwrap(), Monto(850.75));
    }

    #[test]
    fn tolerates_varying_decimal_places() {
        assert_eq!(parse_money("$ 100,5").unwrap(), Monto(100.5));
        assert_eq!(parse_money("$ 100,500000").unwrap(), Monto(100.5));
        assert_eq!(parse_money("$ 100").unwrap(), Monto(100.0));
    }

    #[test]
    fn ungrouped_digit_runs_parse() {
        assert_eq!(parse_money("1234567,89").unwrap(), Monto(1_234_567.89));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_money("").is_err());
        assert!(parse_money("$").is_err());
        assert!(parse_money("abc").is_err());
        assert!(parse_money("12,34,56").is_err());
        assert!(parse_money("1.23,45").is_err());
    }

    #[test]
    fn optional_variant_maps_blank_to_none() {
        assert_eq!(parse_money_opt("   ").unwrap(), None);
        assert_eq!(
            parse_money_opt("$ 19.850.000,0000").unwrap(),
            Some(Monto(19_850_000.0))
        );
    }
}
