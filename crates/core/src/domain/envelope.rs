// Envelope Domain Model

use serde::{Deserialize, Serialize};

/// Message ID (UUID v4, assigned at enqueue time)
pub type MessageId = String;

/// Envelope State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeState {
    /// Waiting on its destination, claimable once `available_at` has passed
    Ready,
    /// Claimed by exactly one delivery, protected by a lease
    InFlight,
    /// Terminal: resides on the dead-letter destination
    Dead,
}

impl std::fmt::Display for EnvelopeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeState::Ready => write!(f, "READY"),
            EnvelopeState::InFlight => write!(f, "IN_FLIGHT"),
            EnvelopeState::Dead => write!(f, "DEAD"),
        }
    }
}

impl std::str::FromStr for EnvelopeState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "READY" => Ok(EnvelopeState::Ready),
            "IN_FLIGHT" => Ok(EnvelopeState::InFlight),
            "DEAD" => Ok(EnvelopeState::Dead),
            other => Err(format!("unknown envelope state: {}", other)),
        }
    }
}

/// Stored message: encoded payload plus delivery metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: MessageId,
    /// Queue the message currently resides on (main or DLQ)
    pub destination: String,
    /// Encoded wire payload (see `codec`)
    pub payload: String,
    pub redelivery_count: u32,
    pub state: EnvelopeState,

    pub enqueued_at: i64,  // epoch ms
    pub available_at: i64, // epoch ms, pushed forward by redelivery delay
    pub lease_expires_at: Option<i64>,

    // Set when dead-lettered
    pub original_destination: Option<String>,
    pub dead_letter_reason: Option<String>,
}

impl Envelope {
    /// Create a READY envelope
    ///
    /// # Arguments
    ///
    /// * `id` - Message ID (injected, not generated)
    /// * `destination` - Queue name
    /// * `payload` - Encoded payload
    /// * `now_millis` - Enqueue timestamp (injected, not system time)
    pub fn new(
        id: impl Into<String>,
        destination: impl Into<String>,
        payload: impl Into<String>,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            destination: destination.into(),
            payload: payload.into(),
            redelivery_count: 0,
            state: EnvelopeState::Ready,
            enqueued_at: now_millis,
            available_at: now_millis,
            lease_expires_at: None,
            original_destination: None,
            dead_letter_reason: None,
        }
    }

    /// READY -> IN_FLIGHT with a lease
    pub fn claim(
        &mut self,
        now_millis: i64,
        lease_ms: i64,
    ) -> crate::domain::error::Result<()> {
        if self.state != EnvelopeState::Ready {
            return Err(crate::domain::error::DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "IN_FLIGHT".to_string(),
            });
        }
        self.state = EnvelopeState::InFlight;
        self.lease_expires_at = Some(now_millis.saturating_add(lease_ms));
        Ok(())
    }

    /// IN_FLIGHT -> READY on the same destination, count incremented
    pub fn requeue(&mut self, available_at: i64) -> crate::domain::error::Result<()> {
        if self.state != EnvelopeState::InFlight {
            return Err(crate::domain::error::DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "READY".to_string(),
            });
        }
        self.redelivery_count += 1;
        self.state = EnvelopeState::Ready;
        self.available_at = available_at;
        self.lease_expires_at = None;
        Ok(())
    }

    /// IN_FLIGHT -> DEAD, moved onto the dead-letter destination.
    /// Payload (and therefore the order id inside it) is preserved.
    pub fn dead_letter(
        &mut self,
        dead_letter_destination: impl Into<String>,
        reason: impl Into<String>,
    ) -> crate::domain::error::Result<()> {
        if self.state != EnvelopeState::InFlight {
            return Err(crate::domain::error::DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "DEAD".to_string(),
            });
        }
        let dlq = dead_letter_destination.into();
        self.original_destination = Some(std::mem::replace(&mut self.destination, dlq));
        self.dead_letter_reason = Some(reason.into());
        self.state = EnvelopeState::Dead;
        self.lease_expires_at = None;
        Ok(())
    }

    pub fn is_lease_expired(&self, now_millis: i64) -> bool {
        self.state == EnvelopeState::InFlight
            && self.lease_expires_at.is_some_and(|expires| expires <= now_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_requires_ready() {
        let mut env = Envelope::new("m-1", "orders.queue", "{}", 1000);
        env.claim(1000, 500).unwrap();
        assert_eq!(env.state, EnvelopeState::InFlight);
        assert_eq!(env.lease_expires_at, Some(1500));

        assert!(env.claim(1100, 500).is_err());
    }

    #[test]
    fn test_huge_lease_saturates() {
        let mut env = Envelope::new("m-1", "orders.queue", "{}", 1000);
        env.claim(1000, i64::MAX).unwrap();
        assert_eq!(env.lease_expires_at, Some(i64::MAX));
        assert!(!env.is_lease_expired(i64::MAX - 1));
    }

    #[test]
    fn test_requeue_increments_count() {
        let mut env = Envelope::new("m-1", "orders.queue", "{}", 1000);
        env.claim(1000, 500).unwrap();
        env.requeue(2000).unwrap();

        assert_eq!(env.redelivery_count, 1);
        assert_eq!(env.state, EnvelopeState::Ready);
        assert_eq!(env.available_at, 2000);
        assert_eq!(env.lease_expires_at, None);
    }

    #[test]
    fn test_dead_letter_moves_destination() {
        let mut env = Envelope::new("m-1", "orders.queue", r#"{"id":"998"}"#, 1000);
        env.claim(1000, 500).unwrap();
        env.dead_letter("ActiveMQ.DLQ", "redelivery exhausted").unwrap();

        assert_eq!(env.destination, "ActiveMQ.DLQ");
        assert_eq!(env.original_destination.as_deref(), Some("orders.queue"));
        assert_eq!(env.payload, r#"{"id":"998"}"#);
        assert_eq!(env.state, EnvelopeState::Dead);

        // Dead is terminal
        assert!(env.claim(2000, 500).is_err());
        assert!(env.requeue(2000).is_err());
    }

    #[test]
    fn test_lease_expiry() {
        let mut env = Envelope::new("m-1", "orders.queue", "{}", 1000);
        assert!(!env.is_lease_expired(5000));
        env.claim(1000, 500).unwrap();
        assert!(!env.is_lease_expired(1499));
        assert!(env.is_lease_expired(1500));
    }

    #[test]
    fn test_state_round_trips_through_string() {
        for state in [EnvelopeState::Ready, EnvelopeState::InFlight, EnvelopeState::Dead] {
            let parsed: EnvelopeState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("DONE".parse::<EnvelopeState>().is_err());
    }
}
