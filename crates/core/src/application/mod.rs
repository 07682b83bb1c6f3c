// Application Layer - Use Cases and Business Logic

pub mod broker_client;
pub mod consumer;
pub mod producer;
pub mod recovery;
pub mod redelivery;
pub mod worker;

// Re-exports
pub use broker_client::{
    BrokerClient, BrokerClientConfig, DeliveryAction, DeliveryHandler, DeliveryReport,
    Subscription, TypedHandler,
};
pub use consumer::{FnHandler, MessageHandler, OrderValidator, Outcome};
pub use producer::{OrderProducer, PublishError};
pub use recovery::LeaseRecovery;
pub use redelivery::{decide, RedeliveryDecision, RedeliveryDelay, RedeliveryPolicy};
pub use worker::{shutdown_channel, spawn_workers, ShutdownSender, ShutdownToken, Worker};
