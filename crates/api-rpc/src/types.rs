//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use orderq_core::domain::Order;
use serde::{Deserialize, Serialize};

/// orders.create.v1 - Submit an order
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Missing id is reported as invalid input, not as a parse error
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub product: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub message_id: String,
    pub queue: String,
    pub message: String,
}

/// queues.stats.v1 - Queue depths (no parameters)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub main_queue: String,
    pub main_depth: i64,
    pub dlq: String,
    pub dlq_depth: i64,
    pub uptime_seconds: i64,
}

/// dlq.list.v1 - Inspect dead-lettered orders
#[derive(Debug, Deserialize)]
pub struct DlqListRequest {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for DlqListRequest {
    fn default() -> Self {
        Self {
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DlqListResponse {
    pub messages: Vec<DeadLetterView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterView {
    pub message_id: String,
    /// `None` when the payload could not be decoded as an order
    pub order: Option<Order>,
    pub redelivery_count: u32,
    pub reason: Option<String>,
    pub original_destination: Option<String>,
}
