//! Reply and inline keyboards.

use teloxide::types::{ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

use crate::checkbox::models::CatalogItem;
use crate::core::money::format_price;

pub const CREATE_RECEIPT: &str = "📜 Створити чек";
pub const CANCEL: &str = "🚫 Скасувати";
pub const SHARE_CONTACT: &str = "Поділитись контактом";

/// Callback data prefix of the print button.
pub const PRINT_PREFIX: &str = "print:";

pub fn start_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(CREATE_RECEIPT)]]).resize_keyboard()
}

pub fn contact_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(SHARE_CONTACT).request(ButtonRequest::Contact)]])
        .resize_keyboard()
        .one_time_keyboard()
}

/// Button text of a catalog item; it parses back as a goods line.
pub fn goods_button_text(item: &CatalogItem) -> String {
    format!("{} {} грн", item.name, format_price(item.price))
}

/// One catalog item per row, cancel at the bottom.
pub fn goods_keyboard(items: &[CatalogItem]) -> KeyboardMarkup {
    let mut rows: Vec<Vec<KeyboardButton>> = items
        .iter()
        .filter(|item| item.price > 0)
        .map(|item| vec![KeyboardButton::new(goods_button_text(item))])
        .collect();
    rows.push(vec![KeyboardButton::new(CANCEL)]);
    KeyboardMarkup::new(rows).resize_keyboard()
}

pub fn print_button(receipt_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "Друкувати",
        format!("{}{}", PRINT_PREFIX, receipt_id),
    )]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::goods_parser::parse_goods;

    #[test]
    fn test_goods_button_round_trips_through_parser() {
        let item = CatalogItem {
            code: "K1".to_string(),
            name: "Кава".to_string(),
            price: 4000,
        };
        let goods = parse_goods(&goods_button_text(&item)).unwrap();
        assert_eq!(goods[0].name, "Кава");
        assert_eq!(goods[0].price, 4000);
        assert_eq!(goods[0].quantity, 1000);
    }

    #[test]
    fn test_goods_keyboard_skips_free_items() {
        let items = vec![
            CatalogItem {
                code: "A".to_string(),
                name: "Чай".to_string(),
                price: 2500,
            },
            CatalogItem {
                code: "B".to_string(),
                name: "Пакет".to_string(),
                price: 0,
            },
        ];
        let keyboard = goods_keyboard(&items);
        assert_eq!(keyboard.keyboard.len(), 2);
        assert_eq!(keyboard.keyboard[0][0].text, "Чай 25.00 грн");
        assert_eq!(keyboard.keyboard[1][0].text, CANCEL);
    }
}
