// Order Producer
use crate::application::broker_client::BrokerClient;
use crate::codec::{self, CodecError};
use crate::domain::{MessageId, Order};
use crate::error::AppError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Publish failure as seen by the submitter
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] CodecError),
}

/// Publishes orders onto the main destination
pub struct OrderProducer {
    broker: Arc<BrokerClient>,
    destination: String,
}

impl OrderProducer {
    pub fn new(broker: Arc<BrokerClient>, destination: impl Into<String>) -> Self {
        Self {
            broker,
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Encode and enqueue one order
    ///
    /// A blank `id` is refused before the broker is touched. Store failures
    /// surface as `BrokerUnavailable`; there is no retry here.
    pub async fn publish(&self, order: Order) -> Result<MessageId, PublishError> {
        order
            .ensure_well_formed()
            .map_err(|e| PublishError::InvalidInput(e.to_string()))?;

        let payload = codec::encode(&order)?;

        let message_id = self
            .broker
            .publish(&self.destination, payload)
            .await
            .map_err(|e| match e {
                AppError::Validation(msg) => PublishError::InvalidInput(msg),
                AppError::Domain(domain) => PublishError::InvalidInput(domain.to_string()),
                other => {
                    error!(order_id = %order.id, error = %other, "Failed to publish order");
                    PublishError::BrokerUnavailable(other.to_string())
                }
            })?;

        info!(
            order_id = %order.id,
            message_id = %message_id,
            destination = %self.destination,
            "Order published"
        );
        Ok(message_id)
    }
}
