//! Turning a payment amount into sale lines.

use crate::checkbox::models::{CatalogItem, Good};
use crate::core::money::UNIT_QUANTITY;
use crate::reconcile::transaction::Transaction;

/// Maps an amount (kopecks) to a single sale line.
///
/// The most expensive catalog item whose price divides the amount wins
/// (ties keep catalog order) and its quantity is scaled accordingly.
/// Without a match the transaction itself becomes the good: one unit at the
/// full amount.
pub fn amount_to_goods(code: &str, name: &str, amount: i64, catalog: &[CatalogItem]) -> Vec<Good> {
    let mut candidates: Vec<&CatalogItem> = catalog.iter().filter(|item| item.price > 0).collect();
    // Stable sort: equal prices stay in catalog order.
    candidates.sort_by(|a, b| b.price.cmp(&a.price));

    let matched = candidates
        .into_iter()
        .find(|item| amount > 0 && amount % item.price == 0);

    let good = match matched {
        Some(item) => Good {
            code: item.code.clone(),
            name: item.name.clone(),
            price: item.price,
            quantity: amount / item.price * UNIT_QUANTITY,
        },
        None => Good {
            code: code.to_string(),
            name: name.to_string(),
            price: amount,
            quantity: UNIT_QUANTITY,
        },
    };

    vec![good]
}

pub fn transaction_to_goods(transaction: &Transaction, catalog: &[CatalogItem]) -> Vec<Good> {
    amount_to_goods(&transaction.code, &transaction.name, transaction.amount, catalog)
}
