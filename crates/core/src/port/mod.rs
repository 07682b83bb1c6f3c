// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod message_store;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use message_store::memory::InMemoryMessageStore;
pub use message_store::MessageStore;
pub use time_provider::TimeProvider;
