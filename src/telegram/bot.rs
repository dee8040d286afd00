//! Bot instance and command list.

use reqwest::ClientBuilder;
use teloxide::utils::command::BotCommands;

use crate::core::config::{self, Settings};
use crate::telegram::Bot;

/// Bot commands. Arguments are split by the handlers themselves.
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Команди:")]
pub enum Command {
    #[command(description = "почати роботу")]
    Start,
    #[command(description = "список користувачів")]
    Users,
    #[command(description = "режим реєстрації: on, one, off")]
    Sign(String),
    #[command(description = "надати роль: <user_id> <role>")]
    Role(String),
    #[command(description = "видалити користувача: <user_id>")]
    Delete(String),
    #[command(description = "надіслати чек: <fiscal_code> [user_id|+phone]")]
    Receipt(String),
    #[command(description = "баланс зміни або /shift close")]
    Shift(String),
}

/// Creates the bot with the configured token.
///
/// `BOT_API_URL` points it at a self-hosted Bot API server.
pub fn create_bot(settings: &Settings) -> anyhow::Result<Bot> {
    let token = settings
        .bot_token()
        .ok_or_else(|| anyhow::anyhow!("BOT_TOKEN is not set and telegram_bot.token is empty"))?;
    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    let bot = Bot::with_client(token, client);

    match std::env::var("BOT_API_URL") {
        Ok(bot_api_url) => {
            log::info!("Using custom Bot API URL: {}", bot_api_url);
            let url = url::Url::parse(&bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
            Ok(bot.set_api_url(url))
        }
        Err(_) => Ok(bot),
    }
}

/// Publishes the command list in the Telegram UI.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    use teloxide::prelude::Requester;

    bot.set_my_commands(Command::bot_commands()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_arguments_are_kept_whole() {
        assert_eq!(
            Command::parse("/role 42 cashier", "kasabot").unwrap(),
            Command::Role("42 cashier".to_string())
        );
        assert_eq!(Command::parse("/shift", "kasabot").unwrap(), Command::Shift(String::new()));
        assert_eq!(Command::parse("/start", "kasabot").unwrap(), Command::Start);
    }
}
