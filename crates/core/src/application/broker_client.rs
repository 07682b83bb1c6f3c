//! Broker client: publish/subscribe over a `MessageStore`
//!
//! Delivery of one message:
//! 1. claim the oldest ready envelope with a lease (single active delivery)
//! 2. hand `(payload, redelivery_count)` to the subscribed handler
//! 3. `Accept` acknowledges; `Reject` consults the redelivery policy and
//!    either requeues with an incremented count or moves the envelope to the
//!    dead-letter destination
//!
//! A handler panic counts as `Reject`. A payload that cannot be decoded is
//! dead-lettered right away since no redelivery can fix it.

use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::application::consumer::{MessageHandler, Outcome};
use crate::application::redelivery::{RedeliveryDecision, RedeliveryPolicy};
use crate::application::worker::{execute_guarded, PanicGuardResult};
use crate::codec::{self, CodecError, TypedMessage};
use crate::domain::{Envelope, EnvelopeState, MessageId};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, MessageStore, TimeProvider};

/// Raw delivery callback: receives the encoded payload and redelivery count
pub trait DeliveryHandler: Send + Sync {
    fn on_delivery(
        &self,
        payload: &str,
        redelivery_count: u32,
    ) -> std::result::Result<Outcome, CodecError>;
}

/// Decodes the payload with the codec before calling a typed handler
pub struct TypedHandler<T, H> {
    handler: H,
    _message: PhantomData<fn(&T)>,
}

impl<T, H> TypedHandler<T, H>
where
    T: TypedMessage,
    H: MessageHandler<T>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _message: PhantomData,
        }
    }
}

impl<T, H> DeliveryHandler for TypedHandler<T, H>
where
    T: TypedMessage,
    H: MessageHandler<T>,
{
    fn on_delivery(
        &self,
        payload: &str,
        redelivery_count: u32,
    ) -> std::result::Result<Outcome, CodecError> {
        let message: T = codec::decode(payload)?;
        debug!(redelivery_count, type_id = T::TYPE_ID, "Dispatching delivery");
        Ok(self.handler.handle(&message))
    }
}

/// A handler bound to a destination
#[derive(Clone)]
pub struct Subscription {
    destination: String,
    handler: Arc<dyn DeliveryHandler>,
}

impl Subscription {
    pub fn destination(&self) -> &str {
        &self.destination
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// What happened to a delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryAction {
    /// Accepted and removed from the queue
    Acknowledged,
    /// Back on its destination with the new count
    Redelivered {
        redelivery_count: u32,
        available_at: i64,
    },
    /// Moved to the dead-letter destination
    DeadLettered { reason: String },
    /// The lease expired before the outcome could be recorded; whoever holds
    /// the message now decides its fate
    LeaseLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub message_id: MessageId,
    pub destination: String,
    /// Count the handler saw for this delivery
    pub redelivery_count: u32,
    pub action: DeliveryAction,
}

/// Broker client configuration
#[derive(Debug, Clone)]
pub struct BrokerClientConfig {
    pub dead_letter_destination: String,
    pub lease_ms: i64,
}

pub struct BrokerClient {
    store: Arc<dyn MessageStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    policy: Arc<RedeliveryPolicy>,
    config: BrokerClientConfig,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl BrokerClient {
    pub fn new(
        store: Arc<dyn MessageStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        policy: Arc<RedeliveryPolicy>,
        config: BrokerClientConfig,
    ) -> Self {
        Self {
            store,
            id_provider,
            time_provider,
            policy,
            config,
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Enqueue an encoded payload on `destination`
    pub async fn publish(&self, destination: &str, payload: String) -> Result<MessageId> {
        if destination.trim().is_empty() {
            return Err(AppError::Validation(
                "destination must not be empty".to_string(),
            ));
        }

        let id = self.id_provider.generate_id();
        let envelope = Envelope::new(
            id.clone(),
            destination,
            payload,
            self.time_provider.now_millis(),
        );
        self.store.enqueue(&envelope).await?;

        debug!(message_id = %id, destination = %destination, "Message enqueued");
        Ok(id)
    }

    /// Register a raw handler for `destination`
    pub fn subscribe(
        &self,
        destination: impl Into<String>,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Subscription {
        let subscription = Subscription {
            destination: destination.into(),
            handler,
        };
        info!(destination = %subscription.destination, "Subscription registered");

        self.subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(subscription.clone());
        subscription
    }

    /// Register a typed handler; payloads are decoded with the codec
    pub fn subscribe_typed<T, H>(&self, destination: impl Into<String>, handler: H) -> Subscription
    where
        T: TypedMessage + 'static,
        H: MessageHandler<T> + 'static,
    {
        self.subscribe(destination, Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    /// All subscriptions registered so far
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Deliver at most one message to `subscription`
    ///
    /// Returns `None` when nothing is claimable.
    pub async fn deliver_next(&self, subscription: &Subscription) -> Result<Option<DeliveryReport>> {
        let now = self.time_provider.now_millis();
        let Some(envelope) = self
            .store
            .claim_next(&subscription.destination, now, self.config.lease_ms)
            .await?
        else {
            return Ok(None);
        };

        let message_id = envelope.id.clone();
        let redelivery_count = envelope.redelivery_count;
        debug!(
            message_id = %message_id,
            destination = %subscription.destination,
            redelivery_count,
            "Delivering message"
        );

        let handler = Arc::clone(&subscription.handler);
        let verdict = execute_guarded(AssertUnwindSafe(|| {
            handler.on_delivery(&envelope.payload, envelope.redelivery_count)
        }));

        let action = match verdict {
            PanicGuardResult::Success(Ok(Outcome::Accept)) => self.acknowledge(&envelope).await?,
            PanicGuardResult::Success(Ok(Outcome::Reject)) => {
                self.fail_delivery(envelope, "rejected by consumer").await?
            }
            PanicGuardResult::Success(Err(e)) => {
                let reason = format!("undecodable payload: {}", e);
                self.dead_letter(envelope, reason).await?
            }
            PanicGuardResult::Panicked(msg) => {
                self.fail_delivery(envelope, format!("handler panicked: {}", msg))
                    .await?
            }
        };

        Ok(Some(DeliveryReport {
            message_id,
            destination: subscription.destination.clone(),
            redelivery_count,
            action,
        }))
    }

    /// Record a failed delivery of an in-flight envelope: redeliver with an
    /// incremented count, or dead-letter once the policy says so
    pub async fn fail_delivery(
        &self,
        mut envelope: Envelope,
        reason: impl Into<String>,
    ) -> Result<DeliveryAction> {
        let reason = reason.into();
        let lease = Self::lease_of(&envelope)?;

        match self.policy.decide(&envelope.id, envelope.redelivery_count) {
            RedeliveryDecision::Redeliver => {
                let available_at = self
                    .policy
                    .next_available_at(self.time_provider.now_millis(), envelope.redelivery_count);
                envelope.requeue(available_at)?;

                if !self.store.settle(&envelope, lease).await? {
                    return Ok(self.lease_lost(&envelope));
                }

                info!(
                    message_id = %envelope.id,
                    redelivery_count = envelope.redelivery_count,
                    available_at,
                    reason = %reason,
                    "Message redelivered"
                );
                Ok(DeliveryAction::Redelivered {
                    redelivery_count: envelope.redelivery_count,
                    available_at,
                })
            }
            RedeliveryDecision::DeadLetter => {
                let reason = format!(
                    "redelivery exhausted after {} redeliveries: {}",
                    envelope.redelivery_count, reason
                );
                self.dead_letter(envelope, reason).await
            }
        }
    }

    /// In-flight envelopes whose lease has run out
    pub async fn expired_deliveries(&self) -> Result<Vec<Envelope>> {
        self.store
            .find_expired_leases(self.time_provider.now_millis())
            .await
    }

    /// Messages currently on `destination` (ready, in flight or dead)
    pub async fn depth(&self, destination: &str) -> Result<i64> {
        let mut total = 0;
        for state in [EnvelopeState::Ready, EnvelopeState::InFlight, EnvelopeState::Dead] {
            total += self.store.count(destination, state).await?;
        }
        Ok(total)
    }

    /// Oldest messages on `destination`, without claiming them
    pub async fn peek(&self, destination: &str, limit: usize) -> Result<Vec<Envelope>> {
        self.store.list(destination, limit).await
    }

    async fn acknowledge(&self, envelope: &Envelope) -> Result<DeliveryAction> {
        let lease = Self::lease_of(envelope)?;
        if !self.store.ack(&envelope.id, lease).await? {
            return Ok(self.lease_lost(envelope));
        }
        debug!(message_id = %envelope.id, "Message acknowledged");
        Ok(DeliveryAction::Acknowledged)
    }

    async fn dead_letter(&self, mut envelope: Envelope, reason: String) -> Result<DeliveryAction> {
        let lease = Self::lease_of(&envelope)?;
        envelope.dead_letter(self.config.dead_letter_destination.as_str(), reason.as_str())?;

        if !self.store.settle(&envelope, lease).await? {
            return Ok(self.lease_lost(&envelope));
        }

        warn!(
            message_id = %envelope.id,
            from = envelope.original_destination.as_deref().unwrap_or_default(),
            to = %envelope.destination,
            redelivery_count = envelope.redelivery_count,
            reason = %reason,
            "Message moved to dead-letter destination"
        );
        Ok(DeliveryAction::DeadLettered { reason })
    }

    fn lease_lost(&self, envelope: &Envelope) -> DeliveryAction {
        warn!(
            message_id = %envelope.id,
            "Delivery lease lost before settlement, outcome discarded"
        );
        DeliveryAction::LeaseLost
    }

    fn lease_of(envelope: &Envelope) -> Result<i64> {
        envelope.lease_expires_at.ok_or_else(|| {
            AppError::InvalidState(format!("Message {} is not in flight", envelope.id))
        })
    }
}
