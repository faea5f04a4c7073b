use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::{Result, SessionError};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum-interval gate in front of outbound model calls.
///
/// Holds only the instant of the last accepted request. There is no burst
/// allowance: every accepted call must be at least `min_interval` after the
/// previous accepted one. Rejected attempts leave the timestamp untouched.
#[derive(Debug, Clone)]
pub struct RateLimitGuard {
    min_interval: Duration,
    last_accepted: Option<Instant>,
}

impl RateLimitGuard {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }

    /// Check the gate at the current instant, recording it when accepted.
    pub fn try_acquire(&mut self) -> Result<()> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&mut self, now: Instant) -> Result<()> {
        if let Some(last) = self.last_accepted {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_interval {
                let retry_after = self.min_interval - elapsed;
                warn!(
                    "Request rejected by rate guard, {}ms since last call",
                    elapsed.as_millis()
                );
                return Err(SessionError::RateLimited { retry_after });
            }
        }

        self.last_accepted = Some(now);
        Ok(())
    }
}

impl Default for RateLimitGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}
