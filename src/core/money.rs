//! Fixed-point amounts.
//!
//! Prices are integer kopecks (×100) and quantities are thousandths (×1000).
//! Both arrive as decimal strings with either `.` or `,` as separator and are
//! parsed without going through floating point.

/// Scale of a price: two fractional digits.
pub const PRICE_SCALE: u32 = 2;

/// Scale of a quantity: three fractional digits.
pub const QUANTITY_SCALE: u32 = 3;

/// One whole unit of quantity.
pub const UNIT_QUANTITY: i64 = 1000;

/// Parses `"24,99"`, `"18.2"`, `"400"` or `"-12.50"` into an integer scaled by `10^scale`.
///
/// Extra fractional digits beyond `scale` are rejected rather than rounded.
pub fn parse_scaled(raw: &str, scale: u32) -> Option<i64> {
    let raw = raw.trim();
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };

    let (whole, fraction) = match digits.find(['.', ',']) {
        Some(pos) => (&digits[..pos], &digits[pos + 1..]),
        None => (digits, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if fraction.len() > scale as usize {
        return None;
    }

    let factor = 10_i64.checked_pow(scale)?;
    let whole_value: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut fraction_value: i64 = if fraction.is_empty() { 0 } else { fraction.parse().ok()? };
    for _ in fraction.len()..scale as usize {
        fraction_value *= 10;
    }

    let value = whole_value.checked_mul(factor)?.checked_add(fraction_value)?;
    Some(if negative { -value } else { value })
}

/// Parses a hryvnia amount into kopecks.
pub fn parse_price(raw: &str) -> Option<i64> {
    parse_scaled(raw, PRICE_SCALE)
}

/// Parses a quantity into thousandths of a unit.
pub fn parse_quantity(raw: &str) -> Option<i64> {
    parse_scaled(raw, QUANTITY_SCALE)
}

/// Formats kopecks as `"1234.50"`.
pub fn format_price(kopecks: i64) -> String {
    let sign = if kopecks < 0 { "-" } else { "" };
    let abs = kopecks.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Line total in kopecks for `price × quantity / 1000`, rounded half away from zero.
///
/// `None` when the product does not fit in `i64`.
pub fn line_total(price: i64, quantity: i64) -> Option<i64> {
    let product = price.checked_mul(quantity)?;
    let half = UNIT_QUANTITY / 2;
    let rounded = if product >= 0 {
        product.checked_add(half)?
    } else {
        product.checked_sub(half)?
    };
    Some(rounded / UNIT_QUANTITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_variants() {
        assert_eq!(parse_price("24,99"), Some(2499));
        assert_eq!(parse_price("18.2"), Some(1820));
        assert_eq!(parse_price("400"), Some(40000));
        assert_eq!(parse_price("300."), Some(30000));
        assert_eq!(parse_price("1821.23"), Some(182123));
        assert_eq!(parse_price("-12.50"), Some(-1250));
    }

    #[test]
    fn test_parse_price_rejects_garbage() {
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("."), None);
        assert_eq!(parse_price("12.345"), None);
        assert_eq!(parse_price("1 000"), None);
        assert_eq!(parse_price("abc"), None);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("1,25"), Some(1250));
        assert_eq!(parse_quantity("0,500"), Some(500));
        assert_eq!(parse_quantity("2"), Some(2000));
        assert_eq!(parse_quantity("0.4"), Some(400));
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(2499), "24.99");
        assert_eq!(format_price(30000), "300.00");
        assert_eq!(format_price(5), "0.05");
        assert_eq!(format_price(-1250), "-12.50");
    }

    #[test]
    fn test_line_total_rounds() {
        assert_eq!(line_total(2499, 1250), Some(3124)); // 31.2375
        assert_eq!(line_total(2500, 400), Some(1000));
        assert_eq!(line_total(20000, 5000), Some(100000));
        assert_eq!(line_total(1, 500), Some(1));
    }

    #[test]
    fn test_line_total_overflow() {
        assert_eq!(line_total(i64::MAX / 2, 1000), None);
        assert_eq!(line_total(10_000_000_000_000, 100_000_000_000_000), None);
    }
}
