//! Free-text sale lines: `<name> <price> грн [<quantity>]`, one per line.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::checkbox::models::Good;
use crate::core::money::{format_price, parse_price, parse_quantity, UNIT_QUANTITY};

static GOODS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(.+?)\s+(\d+(?:[.,]\d{0,2})?)\s+грн(?:\s+(\d+(?:[.,]\d{0,3})?))?\s*$")
        .expect("Invalid goods line regex")
});

fn parse_line(line: &str) -> Option<Good> {
    let caps = GOODS_LINE.captures(line)?;
    let name = caps.get(1)?.as_str().to_string();
    let price = parse_price(caps.get(2)?.as_str())?;
    let quantity = match caps.get(3) {
        Some(qty) => parse_quantity(qty.as_str())?,
        None => UNIT_QUANTITY,
    };

    Some(Good {
        code: format!("{} {}", name, format_price(price)),
        name,
        price,
        quantity,
    })
}

/// Parses every line of a message; `None` unless all lines match.
pub fn parse_goods(text: &str) -> Option<Vec<Good>> {
    let goods = text.lines().map(parse_line).collect::<Option<Vec<_>>>()?;
    if goods.is_empty() {
        return None;
    }
    Some(goods)
}

/// Whether any line reads as a goods line; routes the message to the sale handler.
pub fn looks_like_goods(text: &str) -> bool {
    text.lines().any(|line| GOODS_LINE.is_match(line))
}
