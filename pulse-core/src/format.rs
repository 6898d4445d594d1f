//! Human-readable number formatting used in labels and insight text

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Format a dollar amount rounded to whole dollars with thousands separators
///
/// `100000` becomes `"100,000"`.
pub fn format_thousands(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let digits = rounded.abs().trunc().to_string();

    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-{}", out)
    } else {
        out
    }
}

/// Format a volume with a magnitude suffix (`$5.3M`, `$425K`)
pub fn format_volume(volume: Decimal) -> String {
    let v = volume.to_f64().unwrap_or(0.0);
    if v >= 1e9 {
        format!("${:.1}B", v / 1e9)
    } else if v >= 1e6 {
        format!("${:.1}M", v / 1e6)
    } else if v >= 1e3 {
        format!("${:.0}K", v / 1e3)
    } else {
        format!("${:.0}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_thousands() {
        assert_eq!(format_thousands(dec!(100000)), "100,000");
        assert_eq!(format_thousands(dec!(95000.4)), "95,000");
        assert_eq!(format_thousands(dec!(999)), "999");
        assert_eq!(format_thousands(dec!(1234567)), "1,234,567");
        assert_eq!(format_thousands(dec!(0)), "0");
    }

    #[test]
    fn test_format_volume() {
        assert_eq!(format_volume(dec!(5300000)), "$5.3M");
        assert_eq!(format_volume(dec!(425200)), "$425K");
        assert_eq!(format_volume(dec!(2500000000)), "$2.5B");
        assert_eq!(format_volume(dec!(12)), "$12");
    }
}
