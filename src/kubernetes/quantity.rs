// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Kubernetes quantity arithmetic
//!
//! `k8s_openapi` keeps quantities (`500m`, `2`, `1Gi`, ...) as opaque
//! strings. Resource-field environment refs need their numeric value, so
//! this module parses the quantity grammar down to a milli-value (the unit
//! `resourceFieldRef` divisors are expressed in): `1` → 1000, `500m` → 500,
//! `1Ki` → 1 024 000.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Suffix multipliers, expressed in milli-units.
fn suffix_milli(suffix: &str) -> Option<i128> {
    const KILO: i128 = 1000;
    const KIBI: i128 = 1024;

    Some(match suffix {
        "m" => 1,
        "" => KILO,
        "k" => KILO * KILO,
        "M" => KILO.pow(2) * KILO,
        "G" => KILO.pow(3) * KILO,
        "T" => KILO.pow(4) * KILO,
        "P" => KILO.pow(5) * KILO,
        "E" => KILO.pow(6) * KILO,
        "Ki" => KIBI * KILO,
        "Mi" => KIBI.pow(2) * KILO,
        "Gi" => KIBI.pow(3) * KILO,
        "Ti" => KIBI.pow(4) * KILO,
        "Pi" => KIBI.pow(5) * KILO,
        "Ei" => KIBI.pow(6) * KILO,
        _ => return None,
    })
}

/// Parse a quantity string to its milli-value, rounding up like the
/// upstream `Quantity.MilliValue()`. Returns `None` for strings outside
/// the suffix grammar (the scientific-notation form is not produced by the
/// API server for pod resources).
pub fn parse_milli(quantity: &str) -> Option<i64> {
    let quantity = quantity.trim();

    let (quantity, negative) = match quantity.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (quantity.strip_prefix('+').unwrap_or(quantity), false),
    };

    let digits_end = quantity
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(digits_end);

    if number.is_empty() {
        return None;
    }

    let multiplier = suffix_milli(suffix)?;

    let (integer, fraction) = match number.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (number, ""),
    };

    let integer: i128 = if integer.is_empty() {
        0
    } else {
        integer.parse().ok()?
    };

    let mut value = integer.checked_mul(multiplier)?;

    if !fraction.is_empty() {
        let scale = 10_i128.checked_pow(u32::try_from(fraction.len()).ok()?)?;
        let fraction: i128 = fraction.parse().ok()?;
        let scaled = fraction.checked_mul(multiplier)?;

        // Round away from zero, matching MilliValue.
        value = value.checked_add(div_ceil_i128(scaled, scale))?;
    }

    if negative {
        value = -value;
    }

    i64::try_from(value).ok()
}

/// Stable-Rust equivalent of the still-unstable `i128::div_ceil`.
fn div_ceil_i128(lhs: i128, rhs: i128) -> i128 {
    let d = lhs / rhs;
    let r = lhs % rhs;
    if (r > 0 && rhs > 0) || (r < 0 && rhs < 0) {
        d + 1
    } else {
        d
    }
}

/// Milli-value of an optional typed quantity; unset or unparsable
/// quantities count as zero, like the zero `Quantity` upstream.
pub fn milli_value(quantity: Option<&Quantity>) -> i64 {
    quantity.and_then(|q| parse_milli(&q.0)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_and_milli() {
        assert_eq!(parse_milli("1"), Some(1000));
        assert_eq!(parse_milli("2"), Some(2000));
        assert_eq!(parse_milli("500m"), Some(500));
        assert_eq!(parse_milli("0"), Some(0));
    }

    #[test]
    fn test_decimal_si() {
        assert_eq!(parse_milli("1k"), Some(1_000_000));
        assert_eq!(parse_milli("128M"), Some(128_000_000_000));
        assert_eq!(parse_milli("1G"), Some(1_000_000_000_000));
    }

    #[test]
    fn test_binary_si() {
        assert_eq!(parse_milli("1Ki"), Some(1_024_000));
        assert_eq!(parse_milli("1Mi"), Some(1_048_576_000));
        assert_eq!(parse_milli("2Gi"), Some(2 * 1024_i64.pow(3) * 1000));
    }

    #[test]
    fn test_fractions_round_up() {
        assert_eq!(parse_milli("1.5"), Some(1500));
        assert_eq!(parse_milli("0.1"), Some(100));
        // 0.5Ki = 512 units exactly.
        assert_eq!(parse_milli("0.5Ki"), Some(512_000));
        // 1.0000001 rounds the sub-milli remainder up.
        assert_eq!(parse_milli("1.0000001"), Some(1001));
    }

    #[test]
    fn test_negative() {
        assert_eq!(parse_milli("-1"), Some(-1000));
        assert_eq!(parse_milli("-250m"), Some(-250));
    }

    #[test]
    fn test_invalid() {
        assert_eq!(parse_milli(""), None);
        assert_eq!(parse_milli("abc"), None);
        assert_eq!(parse_milli("1X"), None);
        assert_eq!(parse_milli("Ki"), None);
    }

    #[test]
    fn test_typed_helper_defaults_to_zero() {
        assert_eq!(milli_value(None), 0);
        assert_eq!(milli_value(Some(&Quantity("nonsense".into()))), 0);
        assert_eq!(milli_value(Some(&Quantity("250m".into()))), 250);
    }
}
