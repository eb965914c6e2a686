//! Exact integer amounts.
//!
//! Balances routinely exceed 2^53, so every amount is a `U256` parsed from
//! a decimal string. Decimals are applied only when formatting for humans.

use crate::error::GateError;
use ethers_core::types::U256;

/// Parse a non-negative decimal integer string.
pub fn parse_amount(requirement_id: &str, raw: &str) -> Result<U256, GateError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GateError::invalid(requirement_id, "amount is empty"));
    }
    if trimmed.starts_with('-') {
        return Err(GateError::invalid(
            requirement_id,
            format!("amount must be non-negative, got {trimmed}"),
        ));
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GateError::invalid(
            requirement_id,
            format!("amount must be a decimal integer, got {trimmed:?}"),
        ));
    }
    U256::from_dec_str(trimmed).map_err(|_| {
        GateError::invalid(requirement_id, format!("amount {trimmed} exceeds 256 bits"))
    })
}

/// Format a base-unit amount with `decimals` fractional digits, trimming
/// trailing zeros: `1500000000000000000` with 18 decimals is `"1.5"`.
pub fn format_units(amount: U256, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    // 10^78 overflows U256; anything with that many decimals is all fraction.
    if decimals > 77 {
        return format!("0.{:0>width$}", amount, width = decimals as usize)
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string();
    }
    let unit = U256::exp10(decimals as usize);
    let (whole, frac) = amount.div_mod(unit);
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Saturating conversion for counters that cannot realistically exceed u64.
pub fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.low_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_beyond_f64_precision() {
        let a = parse_amount("r", "100000000000000000000").unwrap();
        let b = parse_amount("r", "99999999999999999999").unwrap();
        assert!(b < a);
        assert_eq!(a - b, U256::one());
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(matches!(
            parse_amount("r", "-1"),
            Err(GateError::InvalidRequirement { .. })
        ));
        assert!(parse_amount("r", "1.5").is_err());
        assert!(parse_amount("r", "").is_err());
        assert!(parse_amount("r", "0x10").is_err());
    }

    #[test]
    fn rejects_overflow() {
        let too_big = "1".repeat(80);
        assert!(parse_amount("r", &too_big).is_err());
    }

    #[test]
    fn formats_with_decimals() {
        let wei = U256::from_dec_str("1500000000000000000").unwrap();
        assert_eq!(format_units(wei, 18), "1.5");
        assert_eq!(format_units(U256::exp10(18), 18), "1");
        assert_eq!(format_units(U256::from(5), 18), "0.000000000000000005");
        assert_eq!(format_units(U256::from(42), 0), "42");
        assert_eq!(format_units(U256::zero(), 18), "0");
    }

    #[test]
    fn saturates_large_counts() {
        assert_eq!(saturating_u64(U256::from(7)), 7);
        assert_eq!(saturating_u64(U256::MAX), u64::MAX);
    }
}
