// Consumer / Validator
use crate::domain::error::Result;
use crate::domain::Order;
use tracing::{error, info};

/// Outcome of a single delivery, fed back to the broker client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Acknowledge: remove from the queue
    Accept,
    /// Failed: redeliver or dead-letter per policy
    Reject,
}

/// Typed message handler registered through `BrokerClient::subscribe`
pub trait MessageHandler<T>: Send + Sync {
    fn handle(&self, message: &T) -> Outcome;
}

/// Adapter so a plain closure can be subscribed as a handler
pub struct FnHandler<F>(pub F);

impl<T, F> MessageHandler<T> for FnHandler<F>
where
    F: Fn(&T) -> Outcome + Send + Sync,
{
    fn handle(&self, message: &T) -> Outcome {
        (self.0)(message)
    }
}

/// Order consumer: accepts iff `quantity > 0`
///
/// Stateless, so one instance can serve any number of concurrent deliveries.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderValidator;

impl OrderValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validation with the failure reason
    pub fn validate(&self, order: &Order) -> Result<()> {
        order.ensure_valid_quantity()
    }
}

impl MessageHandler<Order> for OrderValidator {
    fn handle(&self, order: &Order) -> Outcome {
        info!(order_id = %order.id, "Received order: {}", order);

        match self.validate(order) {
            Ok(()) => {
                info!(order_id = %order.id, "Successfully processed order");
                Outcome::Accept
            }
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Invalid order received");
                Outcome::Reject
            }
        }
    }
}
