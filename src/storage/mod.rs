//! SQLite storage: users, roles and transaction processing state

pub mod db;
pub mod migrations;
pub mod transactions;

// Re-exports for convenience
pub use db::{create_pool, get_connection, DbConnection, DbPool};
