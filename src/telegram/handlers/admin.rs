//! ADMIN commands: users, sign mode, roles, receipts and the shift.

use anyhow::{anyhow, bail, Result};
use std::str::FromStr;
use teloxide::prelude::*;
use teloxide::types::{KeyboardRemove, Message};

use crate::core::money::format_price;
use crate::core::{Role, SignMode};
use crate::storage::db;
use crate::storage::get_connection;
use crate::telegram::auth::normalize_phone;
use crate::telegram::bot::Command;
use crate::telegram::handlers::cashier;
use crate::telegram::handlers::types::HandlerDeps;
use crate::telegram::notifications::send_receipt;
use crate::telegram::Bot;

fn parse_user_id(raw: &str) -> Result<i64> {
    raw.trim().parse().map_err(|_| anyhow!("invalid user id: {}", raw.trim()))
}

pub async fn handle(bot: &Bot, msg: &Message, deps: &HandlerDeps, cmd: Command) -> Result<()> {
    match cmd {
        Command::Users => users(bot, msg, deps).await,
        Command::Sign(args) => sign(bot, msg, deps, &args).await,
        Command::Role(args) => role(bot, msg, deps, &args).await,
        Command::Delete(args) => delete(bot, msg, deps, &args).await,
        Command::Receipt(args) => receipt(bot, msg, deps, &args).await,
        Command::Shift(args) => shift(bot, msg, deps, &args).await,
        Command::Start => Ok(()),
    }
}

async fn users(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<()> {
    let users = {
        let conn = get_connection(&deps.db_pool)?;
        db::get_all_users(&conn)?
    };

    let text = if users.is_empty() {
        "no users".to_string()
    } else {
        users.iter().map(|u| u.to_string()).collect::<Vec<_>>().join("\n")
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// `/sign` shows the mode, `/sign <on|one|off>` sets it.
async fn sign(bot: &Bot, msg: &Message, deps: &HandlerDeps, args: &str) -> Result<()> {
    let arg = args.trim();
    let mode = {
        let mut current = deps.sign_mode.lock().await;
        if !arg.is_empty() {
            *current = SignMode::from_str(arg).map_err(|_| anyhow!("invalid mode"))?;
            log::info!("sign mode: {}", *current);
        }
        *current
    };

    bot.send_message(msg.chat.id, format!("/sign {}", mode)).await?;
    Ok(())
}

/// `/role <user_id> <role>`
async fn role(bot: &Bot, msg: &Message, deps: &HandlerDeps, args: &str) -> Result<()> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let [user_id, role_name] = parts.as_slice() else {
        bail!("usage: /role <user_id> <role>");
    };
    let user_id = parse_user_id(user_id)?;
    let role = Role::from_str(role_name).map_err(|_| anyhow!("invalid role: {}", role_name))?;

    let user = {
        let conn = get_connection(&deps.db_pool)?;
        if db::get_user(&conn, user_id)?.is_none() {
            bail!("no user: {}", user_id);
        }
        db::add_role(&conn, user_id, role)?;
        db::get_user(&conn, user_id)?.ok_or_else(|| anyhow!("no user: {}", user_id))?
    };

    bot.send_message(msg.chat.id, user.to_string()).await?;

    if user.has_role(Role::Cashier) && user.user_id != msg.chat.id.0 {
        cashier::start(bot, ChatId(user.user_id)).await?;
    }
    Ok(())
}

/// `/delete <user_id>`
async fn delete(bot: &Bot, msg: &Message, deps: &HandlerDeps, args: &str) -> Result<()> {
    let user_id = parse_user_id(args)?;

    let deleted = {
        let conn = get_connection(&deps.db_pool)?;
        db::delete_user(&conn, user_id)?
    };
    if !deleted {
        bail!("no user: {}", user_id);
    }

    bot.send_message(msg.chat.id, format!("deleted: {}", user_id)).await?;
    bot.send_message(ChatId(user_id), "Бувай!")
        .reply_markup(KeyboardRemove::new())
        .await?;
    Ok(())
}

/// `/receipt <fiscal_code> [user_id|+phone]` resends a signed receipt.
async fn receipt(bot: &Bot, msg: &Message, deps: &HandlerDeps, args: &str) -> Result<()> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let (fiscal_code, recipient) = match parts.as_slice() {
        [code] => (*code, None),
        [code, recipient] => (*code, Some(*recipient)),
        _ => bail!("usage: /receipt <fiscal_code> [user_id|+phone]"),
    };

    let chat_id = match recipient {
        None => msg.chat.id,
        Some(phone) if phone.starts_with('+') => {
            let phone = normalize_phone(phone).ok_or_else(|| anyhow!("invalid phone: {}", phone))?;
            let user = {
                let conn = get_connection(&deps.db_pool)?;
                db::find_user_by_phone(&conn, &phone)?
            };
            ChatId(user.ok_or_else(|| anyhow!("no user: {}", phone))?.user_id)
        }
        Some(id) => ChatId(parse_user_id(id)?),
    };

    let receipt_id = deps
        .receipts
        .search(fiscal_code)
        .await?
        .ok_or_else(|| anyhow!("no receipt: {}", fiscal_code))?;
    let artifact = deps.receipts.fetch_signed(&receipt_id).await?;

    send_receipt(bot, chat_id, &artifact).await?;
    Ok(())
}

/// `/shift` shows the balance, `/shift close` closes the shift.
async fn shift(bot: &Bot, msg: &Message, deps: &HandlerDeps, args: &str) -> Result<()> {
    let text = match args.trim() {
        "" => match deps.receipts.shifts().balance().await? {
            None => "Зміна закрита".to_string(),
            Some(balance) => format!("Баланс: {} грн", format_price(balance)),
        },
        "close" => match deps.shift_closer.close_and_report(Some(msg.chat.id.0)).await? {
            None => "Зміну вже закрито".to_string(),
            Some(income) => format!("Зміну закрито. Дохід {} грн", format_price(income)),
        },
        other => bail!("unknown argument: {}", other),
    };

    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}
