// Worker - Delivery loop

pub mod constants;
mod panic_guard;
mod shutdown;

use constants::*;
pub use panic_guard::{execute_guarded, PanicGuardResult};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::broker_client::{BrokerClient, DeliveryAction, Subscription};
use crate::error::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Worker drives deliveries for one subscription
pub struct Worker {
    name: String,
    client: Arc<BrokerClient>,
    subscription: Subscription,
}

impl Worker {
    pub fn new(name: impl Into<String>, client: Arc<BrokerClient>, subscription: Subscription) -> Self {
        Self {
            name: name.into(),
            client,
            subscription,
        }
    }

    /// Run worker loop with graceful shutdown support
    ///
    /// The shutdown token is only checked between deliveries, so a delivery
    /// already claimed runs to settlement.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(
            worker = %self.name,
            destination = %self.subscription.destination(),
            "Worker started"
        );
        loop {
            if shutdown.is_shutdown() {
                info!(worker = %self.name, "Worker shutting down");
                break;
            }
            match self.process_next().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = sleep(IDLE_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(worker = %self.name, "Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(worker = %self.name, error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(worker = %self.name, "Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!(worker = %self.name, "Worker stopped");
        Ok(())
    }

    /// Deliver one message (returns true if a message was delivered)
    pub async fn process_next(&self) -> Result<bool> {
        let Some(report) = self.client.deliver_next(&self.subscription).await? else {
            return Ok(false);
        };

        match &report.action {
            DeliveryAction::Acknowledged => debug!(
                worker = %self.name,
                message_id = %report.message_id,
                "Delivery acknowledged"
            ),
            action => debug!(
                worker = %self.name,
                message_id = %report.message_id,
                redelivery_count = report.redelivery_count,
                action = ?action,
                "Delivery settled"
            ),
        }
        Ok(true)
    }
}

/// Spawn `count` workers sharing one subscription
pub fn spawn_workers(
    client: Arc<BrokerClient>,
    subscription: Subscription,
    count: usize,
    shutdown: &ShutdownSender,
) -> Vec<JoinHandle<Result<()>>> {
    (0..count.max(1))
        .map(|i| {
            let worker = Worker::new(
                format!("{}-worker-{}", subscription.destination(), i),
                Arc::clone(&client),
                subscription.clone(),
            );
            let token = shutdown.token();
            tokio::spawn(async move { worker.run(token).await })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::broker_client::BrokerClientConfig;
    use crate::application::consumer::{FnHandler, OrderValidator, Outcome};
    use crate::application::redelivery::{RedeliveryDelay, RedeliveryPolicy};
    use crate::codec;
    use crate::domain::{Order, DEFAULT_DEAD_LETTER_QUEUE, DEFAULT_MAIN_QUEUE};
    use crate::port::id_provider::UuidProvider;
    use crate::port::time_provider::SystemTimeProvider;
    use crate::port::InMemoryMessageStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    fn client(max_redeliveries: u32) -> Arc<BrokerClient> {
        Arc::new(BrokerClient::new(
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
            Arc::new(RedeliveryPolicy::new(max_redeliveries, RedeliveryDelay::none())),
            BrokerClientConfig {
                dead_letter_destination: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
                lease_ms: DEFAULT_LEASE_MS,
            },
        ))
    }

    #[tokio::test]
    async fn test_process_next_idle_returns_false() {
        let client = client(3);
        let sub = client.subscribe_typed::<Order, _>(DEFAULT_MAIN_QUEUE, OrderValidator::new());
        let worker = Worker::new("w", client, sub);
        assert!(!worker.process_next().await.unwrap());
    }

    #[tokio::test]
    async fn test_workers_drain_queue_and_stop_on_shutdown() {
        let client = client(2);
        let sub = client.subscribe_typed::<Order, _>(DEFAULT_MAIN_QUEUE, OrderValidator::new());

        for (id, quantity) in [("1", 1), ("2", 0), ("3", 5)] {
            let payload = codec::encode(&Order::new(id, "Box", quantity)).unwrap();
            client.publish(DEFAULT_MAIN_QUEUE, payload).await.unwrap();
        }

        let (tx, _token) = shutdown_channel();
        let handles = spawn_workers(client.clone(), sub, 2, &tx);

        let drained = async {
            loop {
                let main = client.depth(DEFAULT_MAIN_QUEUE).await.unwrap();
                let dlq = client.depth(DEFAULT_DEAD_LETTER_QUEUE).await.unwrap();
                if main == 0 && dlq == 1 {
                    break;
                }
                sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), drained)
            .await
            .expect("queue should drain");

        tx.shutdown();
        for handle in handles {
            let result = tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("worker should stop")
                .unwrap();
            assert!(result.is_ok());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_lets_in_flight_delivery_finish() {
        let client = client(3);
        let calls = Arc::new(AtomicU32::new(0));
        let gate = Arc::new(Barrier::new(2));

        let sub = {
            let calls = calls.clone();
            let gate = gate.clone();
            client.subscribe_typed::<Order, _>(
                DEFAULT_MAIN_QUEUE,
                FnHandler(move |_order: &Order| {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        // entered, then held until released
                        gate.wait();
                        gate.wait();
                    }
                    Outcome::Accept
                }),
            )
        };

        let mut ids = Vec::new();
        for id in ["1", "2"] {
            let payload = codec::encode(&Order::new(id, "Box", 1)).unwrap();
            ids.push(client.publish(DEFAULT_MAIN_QUEUE, payload).await.unwrap());
        }

        let (tx, _token) = shutdown_channel();
        let mut handles = spawn_workers(client.clone(), sub, 1, &tx);

        let wait_gate = gate.clone();
        tokio::task::spawn_blocking(move || wait_gate.wait())
            .await
            .unwrap();
        tx.shutdown();
        let release_gate = gate.clone();
        tokio::task::spawn_blocking(move || release_gate.wait())
            .await
            .unwrap();

        let handle = handles.pop().unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop")
            .unwrap()
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let remaining = client.peek(DEFAULT_MAIN_QUEUE, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, ids[1]);
        assert_eq!(remaining[0].state, crate::domain::EnvelopeState::Ready);
        assert_eq!(client.depth(DEFAULT_MAIN_QUEUE).await.unwrap(), 1);
    }
}
