// Message Store Port (Interface)
// Storage capability the broker client is built on

use crate::domain::{Envelope, EnvelopeState, MessageId};
use crate::error::Result;
use async_trait::async_trait;

/// Durable storage for envelopes, keyed by destination
///
/// Implementations must make `claim_next` atomic: a READY envelope is handed
/// to at most one caller, which then holds it IN_FLIGHT until its lease
/// expires. `ack` and `settle` only apply while that same lease is held;
/// they return `false` when the lease was lost (expired and recovered).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a new READY envelope
    async fn enqueue(&self, envelope: &Envelope) -> Result<()>;

    /// Claim the oldest READY envelope on `destination` whose `available_at`
    /// has passed, marking it IN_FLIGHT until `now + lease_ms`
    async fn claim_next(&self, destination: &str, now: i64, lease_ms: i64)
        -> Result<Option<Envelope>>;

    /// Permanently remove an in-flight envelope
    async fn ack(&self, id: &MessageId, lease_expires_at: i64) -> Result<bool>;

    /// Write back an envelope that left IN_FLIGHT (requeued or dead-lettered)
    async fn settle(&self, envelope: &Envelope, lease_expires_at: i64) -> Result<bool>;

    /// Find envelope by ID
    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Envelope>>;

    /// Count envelopes on a destination in a given state
    async fn count(&self, destination: &str, state: EnvelopeState) -> Result<i64>;

    /// Envelopes on a destination, oldest first
    async fn list(&self, destination: &str, limit: usize) -> Result<Vec<Envelope>>;

    /// IN_FLIGHT envelopes whose lease expired at or before `now`
    async fn find_expired_leases(&self, now: i64) -> Result<Vec<Envelope>>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

pub mod memory {
    use super::*;
    use crate::error::AppError;
    use std::sync::{Mutex, MutexGuard};

    /// Non-durable store for tests and embedding
    ///
    /// Envelopes are kept in insertion order, which is also claim order.
    #[derive(Default)]
    pub struct InMemoryMessageStore {
        envelopes: Mutex<Vec<Envelope>>,
    }

    impl InMemoryMessageStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> Result<MutexGuard<'_, Vec<Envelope>>> {
            self.envelopes
                .lock()
                .map_err(|_| AppError::Internal("message store lock poisoned".to_string()))
        }
    }

    fn holds_lease(envelope: &Envelope, id: &str, lease_expires_at: i64) -> bool {
        envelope.id == id
            && envelope.state == EnvelopeState::InFlight
            && envelope.lease_expires_at == Some(lease_expires_at)
    }

    #[async_trait]
    impl MessageStore for InMemoryMessageStore {
        async fn enqueue(&self, envelope: &Envelope) -> Result<()> {
            let mut envelopes = self.lock()?;
            if envelopes.iter().any(|e| e.id == envelope.id) {
                return Err(AppError::InvalidState(format!(
                    "Message {} already exists",
                    envelope.id
                )));
            }
            envelopes.push(envelope.clone());
            Ok(())
        }

        async fn claim_next(
            &self,
            destination: &str,
            now: i64,
            lease_ms: i64,
        ) -> Result<Option<Envelope>> {
            let mut envelopes = self.lock()?;
            let Some(envelope) = envelopes.iter_mut().find(|e| {
                e.destination == destination
                    && e.state == EnvelopeState::Ready
                    && e.available_at <= now
            }) else {
                return Ok(None);
            };

            envelope.claim(now, lease_ms)?;
            Ok(Some(envelope.clone()))
        }

        async fn ack(&self, id: &MessageId, lease_expires_at: i64) -> Result<bool> {
            let mut envelopes = self.lock()?;
            let before = envelopes.len();
            envelopes.retain(|e| !holds_lease(e, id, lease_expires_at));
            Ok(envelopes.len() < before)
        }

        async fn settle(&self, envelope: &Envelope, lease_expires_at: i64) -> Result<bool> {
            let mut envelopes = self.lock()?;
            match envelopes
                .iter_mut()
                .find(|e| holds_lease(e, &envelope.id, lease_expires_at))
            {
                Some(stored) => {
                    *stored = envelope.clone();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn find_by_id(&self, id: &MessageId) -> Result<Option<Envelope>> {
            Ok(self.lock()?.iter().find(|e| &e.id == id).cloned())
        }

        async fn count(&self, destination: &str, state: EnvelopeState) -> Result<i64> {
            let count = self
                .lock()?
                .iter()
                .filter(|e| e.destination == destination && e.state == state)
                .count();
            Ok(count as i64)
        }

        async fn list(&self, destination: &str, limit: usize) -> Result<Vec<Envelope>> {
            Ok(self
                .lock()?
                .iter()
                .filter(|e| e.destination == destination)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn find_expired_leases(&self, now: i64) -> Result<Vec<Envelope>> {
            Ok(self
                .lock()?
                .iter()
                .filter(|e| e.is_lease_expired(now))
                .cloned()
                .collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_claim_is_fifo_and_exclusive() {
            let store = InMemoryMessageStore::new();
            store.enqueue(&Envelope::new("a", "q", "1", 100)).await.unwrap();
            store.enqueue(&Envelope::new("b", "q", "2", 200)).await.unwrap();

            let first = store.claim_next("q", 1000, 50).await.unwrap().unwrap();
            let second = store.claim_next("q", 1000, 50).await.unwrap().unwrap();
            assert_eq!(first.id, "a");
            assert_eq!(second.id, "b");
            assert!(store.claim_next("q", 1000, 50).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_claim_respects_available_at() {
            let store = InMemoryMessageStore::new();
            let mut env = Envelope::new("a", "q", "1", 100);
            env.available_at = 5000;
            store.enqueue(&env).await.unwrap();

            assert!(store.claim_next("q", 4999, 50).await.unwrap().is_none());
            assert!(store.claim_next("q", 5000, 50).await.unwrap().is_some());
        }

        #[tokio::test]
        async fn test_ack_requires_current_lease() {
            let store = InMemoryMessageStore::new();
            store.enqueue(&Envelope::new("a", "q", "1", 100)).await.unwrap();
            let claimed = store.claim_next("q", 1000, 50).await.unwrap().unwrap();

            assert!(!store.ack(&claimed.id, 999).await.unwrap());
            assert!(store.ack(&claimed.id, 1050).await.unwrap());
            assert!(store.find_by_id(&claimed.id).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_duplicate_enqueue_rejected() {
            let store = InMemoryMessageStore::new();
            let env = Envelope::new("a", "q", "1", 100);
            store.enqueue(&env).await.unwrap();
            assert!(store.enqueue(&env).await.is_err());
        }

        #[tokio::test]
        async fn test_expired_leases() {
            let store = InMemoryMessageStore::new();
            store.enqueue(&Envelope::new("a", "q", "1", 100)).await.unwrap();
            store.claim_next("q", 1000, 50).await.unwrap();

            assert!(store.find_expired_leases(1049).await.unwrap().is_empty());
            assert_eq!(store.find_expired_leases(1050).await.unwrap().len(), 1);
        }
    }
}
