//! Common transaction record produced by every source.

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::core::money;

/// A normalized payment event.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Source-specific natural key
    pub key: String,
    pub ts: NaiveDateTime,
    /// Goods code used when no catalog item matches
    pub code: String,
    /// Goods name used when no catalog item matches
    pub name: String,
    /// Payer as parsed from the narrative, may be empty
    pub sender: String,
    /// Amount as the source printed it, e.g. `"1000.00"`
    pub sum: String,
    /// Amount in kopecks
    pub amount: i64,
    /// Whether it should become a receipt and a ledger row
    pub eligible: bool,
}

impl Transaction {
    /// `[date, sum, sender]` row for the cashless worksheet.
    pub fn ledger_row(&self) -> Vec<Value> {
        vec![
            Value::String(self.ts.date().to_string()),
            Value::String(self.sum.clone()),
            Value::String(self.sender.clone()),
        ]
    }

    /// Operator notification text.
    pub fn notification_text(&self) -> String {
        let mut text = format!("💸 Безготівкове зарахування: {} грн", self.sum);
        if !self.sender.is_empty() {
            text.push_str(&format!("\n💁 Платник: {}", self.sender));
        }
        text
    }
}

/// Reads a field that may arrive as a JSON string or number.
pub fn field_text(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses an amount field into `(printed, kopecks)`.
pub fn amount_field(raw: &Value, key: &str) -> Result<(String, i64), String> {
    let text = field_text(raw, key).ok_or_else(|| format!("missing {}", key))?;
    let amount = money::parse_price(&text).ok_or_else(|| format!("invalid {}: {}", key, text))?;
    Ok((text, amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn tx(sender: &str) -> Transaction {
        Transaction {
            key: "1".to_string(),
            ts: NaiveDate::from_ymd_opt(2024, 5, 17)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            code: "Оплата 150.00".to_string(),
            name: "Оплата".to_string(),
            sender: sender.to_string(),
            sum: "150.00".to_string(),
            amount: 15000,
            eligible: true,
        }
    }

    #[test]
    fn test_notification_text() {
        assert_eq!(tx("").notification_text(), "💸 Безготівкове зарахування: 150.00 грн");
        assert_eq!(
            tx("JANE DOE").notification_text(),
            "💸 Безготівкове зарахування: 150.00 грн\n💁 Платник: JANE DOE"
        );
    }

    #[test]
    fn test_ledger_row() {
        assert_eq!(tx("JANE DOE").ledger_row(), vec![json!("2024-05-17"), json!("150.00"), json!("JANE DOE")]);
    }

    #[test]
    fn test_amount_field_accepts_numbers() {
        let raw = json!({"a": "12,50", "b": 99, "c": 10.5});
        assert_eq!(amount_field(&raw, "a").unwrap(), ("12,50".to_string(), 1250));
        assert_eq!(amount_field(&raw, "b").unwrap().1, 9900);
        assert_eq!(amount_field(&raw, "c").unwrap().1, 1050);
        assert!(amount_field(&raw, "missing").is_err());
    }
}
