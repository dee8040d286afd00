//! Telegram bot integration and handlers

pub mod auth;
pub mod bot;
pub mod goods_parser;
pub mod handlers;
pub mod keyboards;
pub mod notifications;

pub use bot::{create_bot, setup_bot_commands, Command};
pub use handlers::{schema, HandlerDeps, HandlerError};
pub use notifications::{Broadcaster, TelegramNotifier};
pub use teloxide::Bot;
