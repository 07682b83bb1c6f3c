// Domain Layer - Pure business logic and entities

pub mod destination;
pub mod envelope;
pub mod error;
pub mod order;

// Re-exports
pub use destination::{Destinations, QueueId, DEFAULT_DEAD_LETTER_QUEUE, DEFAULT_MAIN_QUEUE};
pub use envelope::{Envelope, EnvelopeState, MessageId};
pub use error::DomainError;
pub use order::{Order, OrderId};
