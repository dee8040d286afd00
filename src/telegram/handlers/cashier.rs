//! CASHIER flow: start keyboard, goods keyboard, sale and print.

use anyhow::{anyhow, Result};
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatAction, Message};

use crate::checkbox::SaleError;
use crate::core::Role;
use crate::telegram::goods_parser::parse_goods;
use crate::telegram::handlers::types::{sender_id, HandlerDeps};
use crate::telegram::keyboards::{goods_keyboard, start_keyboard, PRINT_PREFIX};
use crate::telegram::notifications::send_receipt;
use crate::telegram::Bot;

pub async fn start(bot: &Bot, chat_id: ChatId) -> Result<(), teloxide::RequestError> {
    bot.send_message(chat_id, "Вітаю!").reply_markup(start_keyboard()).await?;
    Ok(())
}

/// Shows the goods keyboard built from the catalog.
pub async fn create(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<()> {
    let items = deps.catalog.items().await?;
    bot.send_message(msg.chat.id, "Оберіть позицію")
        .reply_markup(goods_keyboard(&items))
        .await?;
    Ok(())
}

/// Sells the goods of a message for cash and sends the receipt back.
pub async fn sell(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<()> {
    bot.send_chat_action(msg.chat.id, ChatAction::UploadDocument).await?;

    let text = msg.text().unwrap_or_default();
    let goods = parse_goods(text).ok_or_else(|| {
        log::error!("parse error: {}", text);
        anyhow!("Не вдалося розібрати повідомлення")
    })?;

    let artifact = match deps.receipts.sell_and_sign(&goods, false).await {
        Ok(artifact) => artifact,
        Err(SaleError::Unsigned { receipt_id, source }) => {
            log::error!("receipt {} created but not delivered: {}", receipt_id, source);
            bot.send_message(msg.chat.id, "Чек успішно створено").await?;
            return Err(source.into());
        }
        Err(SaleError::NotCreated(e)) => return Err(e.into()),
    };

    send_receipt(bot, msg.chat.id, &artifact).await?;
    start(bot, msg.chat.id).await?;

    deps.broadcaster
        .broadcast_receipt(Role::Supervisor, &artifact, Some(sender_id(msg)))
        .await;
    Ok(())
}

/// `print:<receipt_id>` callback.
pub async fn print(bot: &Bot, q: &CallbackQuery, deps: &HandlerDeps) -> Result<()> {
    let receipt_id = q
        .data
        .as_deref()
        .and_then(|data| data.strip_prefix(PRINT_PREFIX))
        .ok_or_else(|| anyhow!("invalid callback data"))?;
    log::info!("print: {}", receipt_id);

    let printer = deps.printer.as_ref().ok_or_else(|| anyhow!("Принтер не налаштовано"))?;

    let shown = q.regular_message().and_then(|m| m.text()).map(str::to_string);
    let text = match shown {
        Some(text) => text,
        None => deps.receipts.receipt_text(receipt_id).await?,
    };

    printer.print_receipt(&text).await?;
    bot.answer_callback_query(q.id.clone()).text("Друкую…").await?;
    Ok(())
}
