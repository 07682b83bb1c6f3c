// Order Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Order ID (caller supplied, unique per submission)
pub type OrderId = String;

/// Order submitted through the entry point and carried as message payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    #[serde(default)]
    pub product: String,
    pub quantity: i64,
}

impl Order {
    pub fn new(id: impl Into<String>, product: impl Into<String>, quantity: i64) -> Self {
        Self {
            id: id.into(),
            product: product.into(),
            quantity,
        }
    }

    /// Structural check done before publishing: the id must be present.
    /// Quantity is checked by the consumer, not here.
    pub fn ensure_well_formed(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(DomainError::InvalidInput(
                "order id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Business rule applied on consumption: quantity must be positive
    pub fn ensure_valid_quantity(&self) -> Result<()> {
        if self.quantity <= 0 {
            return Err(DomainError::ValidationFailure {
                order_id: self.id.clone(),
                reason: format!("invalid quantity {}", self.quantity),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Order{{id={}, product={}, quantity={}}}",
            self.id, self.product, self.quantity
        )
    }
}
