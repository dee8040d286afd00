//! Handler types, dependencies and the error boundary

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, Message};
use tokio::sync::Mutex;

use crate::checkbox::{CatalogCache, ReceiptController};
use crate::core::{AppResult, Role, Settings, SignMode};
use crate::printer::Printer;
use crate::shift_close::ShiftCloser;
use crate::storage::db::{self, DbPool};
use crate::storage::get_connection;
use crate::telegram::handlers::cashier;
use crate::telegram::notifications::{error_text, Broadcaster};
use crate::telegram::Bot;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub db_pool: Arc<DbPool>,
    pub settings: Arc<Settings>,
    pub receipts: ReceiptController,
    pub catalog: CatalogCache,
    pub printer: Option<Arc<Printer>>,
    pub broadcaster: Broadcaster,
    pub shift_closer: Arc<ShiftCloser>,
    pub sign_mode: Arc<Mutex<SignMode>>,
}

impl HandlerDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: Arc<DbPool>,
        settings: Arc<Settings>,
        receipts: ReceiptController,
        catalog: CatalogCache,
        printer: Option<Arc<Printer>>,
        broadcaster: Broadcaster,
        shift_closer: Arc<ShiftCloser>,
    ) -> Self {
        Self {
            db_pool,
            settings,
            receipts,
            catalog,
            printer,
            broadcaster,
            shift_closer,
            sign_mode: Arc::new(Mutex::new(SignMode::default())),
        }
    }

    pub async fn sign_mode(&self) -> SignMode {
        *self.sign_mode.lock().await
    }

    pub fn has_role(&self, user_id: i64, role: Role) -> bool {
        let lookup = || -> AppResult<bool> {
            let conn = get_connection(&self.db_pool)?;
            Ok(db::has_role(&conn, user_id, role)?)
        };
        lookup().unwrap_or_else(|e| {
            log::error!("role lookup for {} failed: {}", user_id, e);
            false
        })
    }
}

/// Sender of a message, 0 for channel posts.
pub fn sender_id(msg: &Message) -> i64 {
    msg.from.as_ref().and_then(|u| i64::try_from(u.id.0).ok()).unwrap_or(0)
}

pub fn callback_sender_id(q: &CallbackQuery) -> i64 {
    i64::try_from(q.from.id.0).unwrap_or(0)
}

/// Reports a failed message handler to its user and to the admins.
///
/// Cashiers are put back on the start keyboard.
pub async fn report_message_error(bot: &Bot, deps: &HandlerDeps, user_id: i64, error: &anyhow::Error) {
    log::error!("handler error for {}: {:#}", user_id, error);
    let text = error.to_string();

    if let Err(e) = bot
        .send_message(ChatId(user_id), error_text(&text))
        .parse_mode(teloxide::types::ParseMode::Html)
        .await
    {
        log::error!("error report to {} failed: {}", user_id, e);
    }

    if deps.has_role(user_id, Role::Cashier) {
        if let Err(e) = cashier::start(bot, ChatId(user_id)).await {
            log::error!("start keyboard for {} failed: {}", user_id, e);
        }
    }

    deps.broadcaster.broadcast_error(&text, Some(user_id)).await;
}

/// Reports a failed callback as an alert and to the admins.
pub async fn report_callback_error(bot: &Bot, deps: &HandlerDeps, q: &CallbackQuery, error: &anyhow::Error) {
    let user_id = callback_sender_id(q);
    log::error!("callback error for {}: {:#}", user_id, error);
    let text = error.to_string();

    if let Err(e) = bot
        .answer_callback_query(q.id.clone())
        .text(format!("Помилка: {}", text))
        .show_alert(true)
        .await
    {
        log::error!("callback answer to {} failed: {}", user_id, e);
    }

    deps.broadcaster.broadcast_error(&text, Some(user_id)).await;
}
