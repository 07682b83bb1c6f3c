// Redelivery policy: bounded redelivery before dead-lettering
use tracing::{info, warn};

/// Redelivery decision result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeliveryDecision {
    /// Put the message back on its destination with an incremented count
    Redeliver,
    /// Move the message to the dead-letter destination (terminal)
    DeadLetter,
}

/// Cutoff rule: `Redeliver` iff `redelivery_count < max`
pub fn decide(redelivery_count: u32, max: u32) -> RedeliveryDecision {
    if redelivery_count < max {
        RedeliveryDecision::Redeliver
    } else {
        RedeliveryDecision::DeadLetter
    }
}

/// Delay before a redelivered message becomes claimable again
///
/// delay(n) = min(initial_ms * multiplier ^ n, max_ms)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedeliveryDelay {
    pub initial_ms: i64,
    pub multiplier: f64,
    pub max_ms: i64,
}

impl RedeliveryDelay {
    pub fn new(initial_ms: i64, multiplier: f64, max_ms: i64) -> Self {
        Self {
            initial_ms: initial_ms.max(0),
            multiplier: if multiplier < 1.0 { 1.0 } else { multiplier },
            max_ms: max_ms.max(0),
        }
    }

    /// Redeliver immediately
    pub fn none() -> Self {
        Self::new(0, 1.0, 0)
    }

    pub fn delay_ms(&self, redelivery_count: u32) -> i64 {
        if self.initial_ms == 0 {
            return 0;
        }
        let exponent = i32::try_from(redelivery_count).unwrap_or(i32::MAX);
        let delay = self.initial_ms as f64 * self.multiplier.powi(exponent);
        if !delay.is_finite() || delay > self.max_ms as f64 {
            self.max_ms
        } else {
            delay as i64
        }
    }
}

/// Redelivery policy consulted on every rejected delivery
///
/// The maximum is a required argument: there is no implicit default here,
/// the deployment decides it.
#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    max_redeliveries: u32,
    delay: RedeliveryDelay,
}

impl RedeliveryPolicy {
    /// Create a new redelivery policy
    ///
    /// # Arguments
    /// * `max_redeliveries` - Redeliveries allowed after the first delivery
    /// * `delay` - Backoff applied to each redelivery
    ///
    /// # Example
    /// ```text
    /// let policy = RedeliveryPolicy::new(6, RedeliveryDelay::new(1000, 2.0, 60_000));
    /// ```
    pub fn new(max_redeliveries: u32, delay: RedeliveryDelay) -> Self {
        Self {
            max_redeliveries,
            delay,
        }
    }

    /// Decide the next hop for a message rejected with `redelivery_count`
    pub fn decide(&self, message_id: &str, redelivery_count: u32) -> RedeliveryDecision {
        let decision = decide(redelivery_count, self.max_redeliveries);
        match decision {
            RedeliveryDecision::Redeliver => info!(
                message_id = %message_id,
                redelivery_count = redelivery_count,
                max_redeliveries = self.max_redeliveries,
                "Scheduling redelivery"
            ),
            RedeliveryDecision::DeadLetter => warn!(
                message_id = %message_id,
                redelivery_count = redelivery_count,
                max_redeliveries = self.max_redeliveries,
                "Max redeliveries reached"
            ),
        }
        decision
    }

    /// Epoch ms at which the next redelivery becomes claimable
    pub fn next_available_at(&self, now_millis: i64, redelivery_count: u32) -> i64 {
        now_millis.saturating_add(self.delay.delay_ms(redelivery_count))
    }
}
