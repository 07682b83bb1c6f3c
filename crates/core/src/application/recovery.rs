// Lease recovery
use crate::application::broker_client::{BrokerClient, DeliveryAction};
use crate::application::worker::constants::LEASE_RECOVERY_INTERVAL;
use crate::application::worker::ShutdownToken;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub const LEASE_EXPIRED_REASON: &str = "delivery lease expired";

/// Returns deliveries whose lease ran out to the redelivery path
///
/// A worker that crashed (or a daemon that was killed) mid-delivery leaves
/// the message IN_FLIGHT. Once its lease expires this counts as a failed
/// delivery: the message is redelivered with an incremented count, or
/// dead-lettered when the policy is exhausted.
pub struct LeaseRecovery {
    client: Arc<BrokerClient>,
    interval: Duration,
}

impl LeaseRecovery {
    pub fn new(client: Arc<BrokerClient>, interval: Option<Duration>) -> Self {
        Self {
            client,
            interval: interval.unwrap_or(LEASE_RECOVERY_INTERVAL),
        }
    }

    /// One recovery pass; returns the number of messages settled
    pub async fn recover_expired(&self) -> Result<usize> {
        let expired = self.client.expired_deliveries().await?;
        if expired.is_empty() {
            return Ok(0);
        }

        info!(expired = expired.len(), "Recovering expired deliveries");

        let mut recovered = 0;
        for envelope in expired {
            let message_id = envelope.id.clone();
            match self
                .client
                .fail_delivery(envelope, LEASE_EXPIRED_REASON)
                .await
            {
                Ok(DeliveryAction::LeaseLost) => {
                    warn!(message_id = %message_id, "Expired delivery settled concurrently")
                }
                Ok(_) => recovered += 1,
                Err(e) => {
                    error!(message_id = %message_id, error = %e, "Failed to recover expired delivery")
                }
            }
        }

        info!(recovered, "Lease recovery complete");
        Ok(recovered)
    }

    /// Periodic recovery until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Lease recovery started");
        loop {
            if let Err(e) = self.recover_expired().await {
                error!(error = %e, "Lease recovery failed");
            }
            tokio::select! {
                _ = sleep(self.interval) => {},
                _ = shutdown.wait() => break,
            }
        }
        info!("Lease recovery stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::broker_client::BrokerClientConfig;
    use crate::application::redelivery::{RedeliveryDelay, RedeliveryPolicy};
    use crate::codec;
    use crate::domain::{EnvelopeState, Order, DEFAULT_DEAD_LETTER_QUEUE, DEFAULT_MAIN_QUEUE};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use crate::port::{InMemoryMessageStore, MessageStore, TimeProvider};

    const LEASE_MS: i64 = 1_000;

    fn setup(max: u32) -> (Arc<InMemoryMessageStore>, Arc<ManualTimeProvider>, LeaseRecovery) {
        let store = Arc::new(InMemoryMessageStore::new());
        let clock = Arc::new(ManualTimeProvider::new(10_000));
        let client = Arc::new(BrokerClient::new(
            store.clone(),
            Arc::new(SequentialIdProvider::default()),
            clock.clone(),
            Arc::new(RedeliveryPolicy::new(max, RedeliveryDelay::none())),
            BrokerClientConfig {
                dead_letter_destination: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
                lease_ms: LEASE_MS,
            },
        ));
        (store, clock, LeaseRecovery::new(client, None))
    }

    async fn enqueue_and_abandon(store: &InMemoryMessageStore, clock: &ManualTimeProvider) {
        let payload = codec::encode(&Order::new("42", "Lamp", 1)).unwrap();
        store
            .enqueue(&crate::domain::Envelope::new(
                "m-1",
                DEFAULT_MAIN_QUEUE,
                payload,
                clock.now_millis(),
            ))
            .await
            .unwrap();
        store
            .claim_next(DEFAULT_MAIN_QUEUE, clock.now_millis(), LEASE_MS)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_live_lease_is_left_alone() {
        let (store, clock, recovery) = setup(3);
        enqueue_and_abandon(&store, &clock).await;

        clock.advance(LEASE_MS - 1);
        assert_eq!(recovery.recover_expired().await.unwrap(), 0);
        let env = store.find_by_id(&"m-1".to_string()).await.unwrap().unwrap();
        assert_eq!(env.state, EnvelopeState::InFlight);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered_with_incremented_count() {
        let (store, clock, recovery) = setup(3);
        enqueue_and_abandon(&store, &clock).await;

        clock.advance(LEASE_MS);
        assert_eq!(recovery.recover_expired().await.unwrap(), 1);

        let env = store.find_by_id(&"m-1".to_string()).await.unwrap().unwrap();
        assert_eq!(env.state, EnvelopeState::Ready);
        assert_eq!(env.destination, DEFAULT_MAIN_QUEUE);
        assert_eq!(env.redelivery_count, 1);
        assert!(env.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_dead_lettered_when_exhausted() {
        let (store, clock, recovery) = setup(0);
        enqueue_and_abandon(&store, &clock).await;

        clock.advance(LEASE_MS + 1);
        assert_eq!(recovery.recover_expired().await.unwrap(), 1);

        let env = store.find_by_id(&"m-1".to_string()).await.unwrap().unwrap();
        assert_eq!(env.state, EnvelopeState::Dead);
        assert_eq!(env.destination, DEFAULT_DEAD_LETTER_QUEUE);
        assert!(env
            .dead_letter_reason
            .as_deref()
            .unwrap()
            .contains(LEASE_EXPIRED_REASON));
    }

    #[tokio::test]
    async fn test_store_error_does_not_abort_pass() {
        use crate::error::AppError;
        use crate::port::message_store::MockMessageStore;

        let expired: Vec<_> = ["m-1", "m-2"]
            .into_iter()
            .map(|id| {
                let mut env = crate::domain::Envelope::new(id, DEFAULT_MAIN_QUEUE, "{}", 0);
                env.claim(0, LEASE_MS).unwrap();
                env
            })
            .collect();

        let mut store = MockMessageStore::new();
        store
            .expect_find_expired_leases()
            .returning(move |_| Ok(expired.clone()));
        store.expect_settle().times(2).returning(|env, _| {
            if env.id == "m-1" {
                Err(AppError::Database("database is locked".to_string()))
            } else {
                Ok(true)
            }
        });

        let client = Arc::new(BrokerClient::new(
            Arc::new(store),
            Arc::new(SequentialIdProvider::default()),
            Arc::new(ManualTimeProvider::new(10_000)),
            Arc::new(RedeliveryPolicy::new(3, RedeliveryDelay::none())),
            BrokerClientConfig {
                dead_letter_destination: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
                lease_ms: LEASE_MS,
            },
        ));
        let recovery = LeaseRecovery::new(client, None);

        assert_eq!(recovery.recover_expired().await.unwrap(), 1);
    }
}
