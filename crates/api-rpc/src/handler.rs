//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::{publish_error_to_rpc, to_rpc_error};
use crate::types::{
    CreateOrderRequest, CreateOrderResponse, DeadLetterView, DlqListRequest, DlqListResponse,
    StatsResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use orderq_core::application::{BrokerClient, OrderProducer};
use orderq_core::codec;
use orderq_core::domain::{Destinations, Order};
use std::sync::Arc;
use tracing::info;

/// Upper bound for `dlq.list.v1`
pub const MAX_DLQ_LIST_LIMIT: usize = 500;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    producer: Arc<OrderProducer>,
    broker: Arc<BrokerClient>,
    destinations: Destinations,
    start_time: std::time::Instant,
}

impl RpcHandler {
    pub fn new(
        producer: Arc<OrderProducer>,
        broker: Arc<BrokerClient>,
        destinations: Destinations,
    ) -> Self {
        Self {
            producer,
            broker,
            destinations,
            start_time: std::time::Instant::now(),
        }
    }

    /// orders.create.v1
    pub async fn create_order(
        &self,
        params: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ErrorObjectOwned> {
        let order = Order::new(params.id, params.product, params.quantity);
        let order_id = order.id.clone();

        let message_id = self
            .producer
            .publish(order)
            .await
            .map_err(publish_error_to_rpc)?;

        info!(order_id = %order_id, message_id = %message_id, "Order created");

        Ok(CreateOrderResponse {
            message: format!("Order created and sent to queue: {}", order_id),
            order_id,
            message_id,
            queue: self.producer.destination().to_string(),
        })
    }

    /// queues.stats.v1
    pub async fn stats(&self) -> Result<StatsResponse, ErrorObjectOwned> {
        let main_depth = self
            .broker
            .depth(&self.destinations.main)
            .await
            .map_err(to_rpc_error)?;
        let dlq_depth = self
            .broker
            .depth(&self.destinations.dead_letter)
            .await
            .map_err(to_rpc_error)?;

        Ok(StatsResponse {
            main_queue: self.destinations.main.clone(),
            main_depth,
            dlq: self.destinations.dead_letter.clone(),
            dlq_depth,
            uptime_seconds: self.start_time.elapsed().as_secs() as i64,
        })
    }

    /// dlq.list.v1
    pub async fn dlq_list(&self, params: DlqListRequest) -> Result<DlqListResponse, ErrorObjectOwned> {
        let limit = params.limit.min(MAX_DLQ_LIST_LIMIT);
        let envelopes = self
            .broker
            .peek(&self.destinations.dead_letter, limit)
            .await
            .map_err(to_rpc_error)?;

        let messages = envelopes
            .into_iter()
            .map(|envelope| DeadLetterView {
                order: codec::decode::<Order>(&envelope.payload).ok(),
                message_id: envelope.id,
                redelivery_count: envelope.redelivery_count,
                reason: envelope.dead_letter_reason,
                original_destination: envelope.original_destination,
            })
            .collect();

        Ok(DlqListResponse { messages })
    }
}
