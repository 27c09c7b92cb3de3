// Reconnect Backoff
//
// Delay doubles from `base` up to `max`. Once more than `max_attempts`
// consecutive attempts have been scheduled, reconnection stops.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    #[serde(with = "millis")]
    pub base_delay: Duration,
    /// Ceiling for the doubled delay
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Attempt counter plus current delay
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let delay = policy.base_delay;
        Self {
            policy,
            attempts: 0,
            delay,
        }
    }

    /// Count one more attempt and return `(attempt, delay)` to wait before it,
    /// or `None` when the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<(u32, Duration)> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.policy.max_attempts {
            return None;
        }
        let delay = self.delay;
        self.delay = self.delay.saturating_mul(2).min(self.policy.max_delay);
        Some((self.attempts, delay))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.policy.base_delay;
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }
}
