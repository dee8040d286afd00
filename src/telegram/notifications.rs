//! Outgoing messages: role broadcasts, receipts and error reports.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode};
use teloxide::utils::html;
use teloxide::RequestError;

use crate::checkbox::models::ReceiptArtifact;
use crate::core::{AppResult, Role};
use crate::reconcile::traits::Notifier;
use crate::storage::db::{self, DbPool};
use crate::storage::get_connection;
use crate::telegram::keyboards::print_button;
use crate::telegram::Bot;

/// Flood-control waits honoured per message before giving up.
const MAX_RETRY_AFTER: u32 = 10;

/// Re-sends while Telegram answers with `RetryAfter`.
pub async fn with_retry_after<F, Fut, T>(mut send: F) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut retries = 0;
    loop {
        match send().await {
            Err(RequestError::RetryAfter(wait)) if retries < MAX_RETRY_AFTER => {
                retries += 1;
                log::warn!("flood control, retry {} in {:?}", retries, wait.duration());
                tokio::time::sleep(wait.duration()).await;
            }
            other => return other,
        }
    }
}

/// `<b>Помилка:</b> <code>…</code>` with the message escaped.
pub fn error_text(error: &str) -> String {
    format!("<b>Помилка:</b> <code>{}</code>", html::escape(error))
}

/// Sends the receipt image, then the text with a print button.
///
/// PNG receipts carry the button on the photo itself.
pub async fn send_receipt(bot: &Bot, chat_id: ChatId, artifact: &ReceiptArtifact) -> Result<(), RequestError> {
    let has_text = artifact.text.is_some();

    with_retry_after(|| async move {
        let mut photo = bot.send_photo(chat_id, InputFile::memory(artifact.image.clone()));
        if let Some(url) = artifact.tax_url.as_deref() {
            photo = photo.caption(url);
        }
        if !has_text {
            photo = photo.reply_markup(print_button(&artifact.receipt_id));
        }
        photo.await
    })
    .await?;

    if let Some(text) = artifact.text.as_deref() {
        with_retry_after(|| async move {
            bot.send_message(chat_id, format!("<pre>{}</pre>", html::escape(text)))
                .parse_mode(ParseMode::Html)
                .reply_markup(print_button(&artifact.receipt_id))
                .await
        })
        .await?;
    }
    Ok(())
}

/// Fan-out to every holder of a role.
#[derive(Clone)]
pub struct Broadcaster {
    bot: Bot,
    db_pool: Arc<DbPool>,
}

impl Broadcaster {
    pub fn new(bot: Bot, db_pool: Arc<DbPool>) -> Self {
        Self { bot, db_pool }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    fn role_members(&self, role: Role) -> AppResult<Vec<i64>> {
        let conn = get_connection(&self.db_pool)?;
        Ok(db::user_ids_with_role(&conn, role)?)
    }

    fn recipients(&self, role: Role, skip: Option<i64>) -> Vec<i64> {
        match self.role_members(role) {
            Ok(ids) => ids.into_iter().filter(|id| Some(*id) != skip).collect(),
            Err(e) => {
                log::error!("recipients of {} unavailable: {}", role, e);
                Vec::new()
            }
        }
    }

    /// HTML text to every holder of `role` except `skip`.
    ///
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, role: Role, text: &str, skip: Option<i64>) -> usize {
        let bot = &self.bot;
        let mut delivered = 0;

        for user_id in self.recipients(role, skip) {
            let chat_id = ChatId(user_id);
            let sent = with_retry_after(|| async move {
                bot.send_message(chat_id, text).parse_mode(ParseMode::Html).await
            })
            .await;

            match sent {
                Ok(_) => delivered += 1,
                Err(e) => log::error!("broadcast to {} failed: {}", user_id, e),
            }
        }
        delivered
    }

    pub async fn broadcast_error(&self, error: &str, skip: Option<i64>) -> usize {
        self.broadcast(Role::Admin, &error_text(error), skip).await
    }

    pub async fn broadcast_receipt(&self, role: Role, artifact: &ReceiptArtifact, skip: Option<i64>) -> usize {
        let mut delivered = 0;
        for user_id in self.recipients(role, skip) {
            match send_receipt(&self.bot, ChatId(user_id), artifact).await {
                Ok(()) => delivered += 1,
                Err(e) => log::error!("receipt broadcast to {} failed: {}", user_id, e),
            }
        }
        delivered
    }
}

/// Reconciliation messages go to supervisors.
pub struct TelegramNotifier {
    broadcaster: Broadcaster,
}

impl TelegramNotifier {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self { broadcaster }
    }

    fn check(&self, delivered: usize, what: &str) -> anyhow::Result<()> {
        let expected = self.broadcaster.recipients(Role::Supervisor, None).len();
        if expected > 0 && delivered == 0 {
            anyhow::bail!("{} not delivered to any of {} supervisor(s)", what, expected);
        }
        if expected == 0 {
            log::warn!("no supervisors to receive {}", what);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        let delivered = self
            .broadcaster
            .broadcast(Role::Supervisor, &html::escape(text), None)
            .await;
        self.check(delivered, "notification")
    }

    async fn send_receipt(&self, artifact: &ReceiptArtifact) -> anyhow::Result<()> {
        let delivered = self
            .broadcaster
            .broadcast_receipt(Role::Supervisor, artifact, None)
            .await;
        self.check(delivered, "receipt")
    }
}
