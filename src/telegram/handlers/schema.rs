//! Dispatcher schema and handler chain builders

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, KeyboardRemove, Message};
use teloxide::utils::html;

use super::types::{callback_sender_id, report_callback_error, report_message_error, sender_id, HandlerDeps, HandlerError};
use super::{admin, cashier};
use crate::core::Role;
use crate::storage::db::NewUser;
use crate::storage::get_connection;
use crate::telegram::auth::{authorize, normalize_phone, sign_in};
use crate::telegram::bot::Command;
use crate::telegram::goods_parser::looks_like_goods;
use crate::telegram::keyboards::{CANCEL, CREATE_RECEIPT, PRINT_PREFIX};
use crate::telegram::Bot;

/// Creates the main dispatcher schema for the Telegram bot.
///
/// Every endpoint checks the role it needs, then runs its handler behind the
/// error boundary. Handler errors never reach the dispatcher.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    dptree::entry()
        .branch(contact_handler(deps.clone()))
        .branch(command_handler(deps.clone()))
        .branch(create_receipt_handler(deps.clone()))
        .branch(cancel_handler(deps.clone()))
        .branch(sale_handler(deps.clone()))
        .branch(print_handler(deps))
}

fn text_is(expected: &'static str) -> impl Fn(Message) -> bool + Clone + Send + Sync + 'static {
    move |msg: Message| msg.text() == Some(expected)
}

/// Contact sharing registers the sender.
fn contact_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.contact().is_some())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                let user_id = sender_id(&msg);
                if let Err(e) = handle_contact(&bot, &msg, &deps).await {
                    report_message_error(&bot, &deps, user_id, &e).await;
                }
                Ok(())
            }
        })
}

async fn handle_contact(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> anyhow::Result<()> {
    let Some(contact) = msg.contact() else {
        return Ok(());
    };
    let user_id = sender_id(msg);
    if contact.user_id.map(|id| id.0) != u64::try_from(user_id).ok() {
        anyhow::bail!("Надішліть власний контакт");
    }

    let new_user = NewUser {
        user_id,
        phone_number: normalize_phone(&contact.phone_number)
            .ok_or_else(|| anyhow::anyhow!("invalid phone: {}", contact.phone_number))?,
        first_name: Some(contact.first_name.clone()),
        last_name: contact.last_name.clone(),
    };

    let user = {
        let mut mode = deps.sign_mode.lock().await;
        let conn = get_connection(&deps.db_pool)?;
        sign_in(&conn, &new_user, &mut mode, &deps.settings.telegram_bot.admins)?
    };

    let Some(user) = user else {
        log::info!("sign-in closed, contact of {} ignored", user_id);
        return Ok(());
    };

    if !user.roles.is_empty() {
        bot.send_message(msg.chat.id, format!("Ролі: {}", user.roles_label()))
            .reply_markup(KeyboardRemove::new())
            .await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, "Адміністратор має підтвердити")
        .reply_markup(KeyboardRemove::new())
        .await?;
    deps.broadcaster
        .broadcast(Role::Admin, &html::escape(&format!("new user: {}", user)), Some(user_id))
        .await;
    Ok(())
}

/// `/start` is for cashiers, every other command for admins.
fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |bot: Bot, msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                let user_id = sender_id(&msg);
                log::info!("command {:?} from {}", cmd, user_id);

                let role = match cmd {
                    Command::Start => Role::Cashier,
                    _ => Role::Admin,
                };
                if !authorize(&bot, &deps.db_pool, user_id, role, deps.sign_mode().await).await? {
                    return Ok(());
                }

                let result = match cmd {
                    Command::Start => cashier::start(&bot, msg.chat.id).await.map_err(Into::into),
                    cmd => admin::handle(&bot, &msg, &deps, cmd).await,
                };
                if let Err(e) = result {
                    report_message_error(&bot, &deps, user_id, &e).await;
                }
                Ok(())
            }
        },
    ))
}

fn create_receipt_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(text_is(CREATE_RECEIPT))
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                let user_id = sender_id(&msg);
                if !authorize(&bot, &deps.db_pool, user_id, Role::Cashier, deps.sign_mode().await).await? {
                    return Ok(());
                }
                if let Err(e) = cashier::create(&bot, &msg, &deps).await {
                    report_message_error(&bot, &deps, user_id, &e).await;
                }
                Ok(())
            }
        })
}

fn cancel_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(text_is(CANCEL))
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                let user_id = sender_id(&msg);
                if !authorize(&bot, &deps.db_pool, user_id, Role::Cashier, deps.sign_mode().await).await? {
                    return Ok(());
                }
                cashier::start(&bot, msg.chat.id).await?;
                Ok(())
            }
        })
}

/// Free-text goods lines.
fn sale_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.text().is_some_and(looks_like_goods))
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                let user_id = sender_id(&msg);
                if !authorize(&bot, &deps.db_pool, user_id, Role::Cashier, deps.sign_mode().await).await? {
                    return Ok(());
                }
                if let Err(e) = cashier::sell(&bot, &msg, &deps).await {
                    report_message_error(&bot, &deps, user_id, &e).await;
                }
                Ok(())
            }
        })
}

fn print_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query()
        .filter(|q: CallbackQuery| q.data.as_deref().is_some_and(|d| d.starts_with(PRINT_PREFIX)))
        .endpoint(move |bot: Bot, q: CallbackQuery| {
            let deps = deps.clone();
            async move {
                let user_id = callback_sender_id(&q);
                if !authorize(&bot, &deps.db_pool, user_id, Role::Cashier, deps.sign_mode().await).await? {
                    return Ok(());
                }
                if let Err(e) = cashier::print(&bot, &q, &deps).await {
                    report_callback_error(&bot, &deps, &q, &e).await;
                }
                Ok(())
            }
        })
}
