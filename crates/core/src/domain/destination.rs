// Destination Domain Model

use crate::domain::error::{DomainError, Result};

/// Queue identifier
pub type QueueId = String;

/// Main queue used by the reference deployment
pub const DEFAULT_MAIN_QUEUE: &str = "orders.queue";

/// Dead-letter queue used by the reference deployment
pub const DEFAULT_DEAD_LETTER_QUEUE: &str = "ActiveMQ.DLQ";

/// The two named destinations the pipeline works with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    pub main: QueueId,
    pub dead_letter: QueueId,
}

impl Destinations {
    /// Both names must be non-empty and distinct
    pub fn new(main: impl Into<String>, dead_letter: impl Into<String>) -> Result<Self> {
        let main = main.into();
        let dead_letter = dead_letter.into();

        if main.trim().is_empty() || dead_letter.trim().is_empty() {
            return Err(DomainError::InvalidInput(
                "destination names must not be empty".to_string(),
            ));
        }
        if main == dead_letter {
            return Err(DomainError::InvalidInput(format!(
                "main and dead-letter destinations must differ (both '{}')",
                main
            )));
        }

        Ok(Self { main, dead_letter })
    }
}

impl Default for Destinations {
    fn default() -> Self {
        Self {
            main: DEFAULT_MAIN_QUEUE.to_string(),
            dead_letter: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
        }
    }
}
