// orderq Infrastructure - SQLite Adapter
// Implements: MessageStore

mod connection;
mod message_store;
mod migration;

pub use connection::{create_pool, database_url};
pub use message_store::SqliteMessageStore;
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
