//! Kasabot - point-of-sale Telegram bot on top of the Checkbox fiscal API
//!
//! Cashiers sell goods from Telegram and get signed fiscal receipts back,
//! admins manage users and the shift, and supervisors receive receipts,
//! cashless payment notices and the daily sales report.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, retry and money helpers
//! - `storage`: SQLite pool, migrations, users/roles and processing state
//! - `checkbox`: fiscal API client, shift and receipt lifecycles
//! - `reconcile`: cashless statement reconciliation (Privat24, Fondy)
//! - `sheets`: Google Sheets ledger
//! - `printer`: ESC/POS network printer
//! - `shift_close`: close job, sales report and daily scheduler
//! - `telegram`: bot, auth gate, keyboards and handlers

pub mod checkbox;
pub mod cli;
pub mod core;
pub mod printer;
pub mod reconcile;
pub mod sheets;
pub mod shift_close;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult, Settings};
pub use storage::{create_pool, get_connection, DbConnection, DbPool};
