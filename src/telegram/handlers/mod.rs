//! Telegram bot handler tree configuration
//!
//! The same schema is used by the production dispatcher and can be reused
//! by integration tests.

pub mod admin;
pub mod cashier;
mod schema;
mod types;

pub use schema::schema;
pub use types::{report_callback_error, report_message_error, HandlerDeps, HandlerError};
