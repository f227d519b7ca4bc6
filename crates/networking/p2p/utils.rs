use koorde_common::DhtError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Per-operation context: an absolute deadline plus a cancellation signal,
/// threaded through every inbound and outbound call so a client timeout or
/// a shutdown aborts the whole lookup chain.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Instant,
    cancel: CancellationToken,
}

impl Context {
    /// Context with a fresh token, for operations nothing else cancels.
    pub fn with_budget(budget: Duration) -> Self {
        Self::with_cancellation(budget, CancellationToken::new())
    }

    /// Context bound to an existing cancellation token.
    pub fn with_cancellation(budget: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + budget,
            cancel,
        }
    }

    /// The first action of every handler: fails with `Canceled` once the
    /// token fired, with `Timeout` once the deadline passed.
    pub fn check(&self) -> Result<(), DhtError> {
        if self.cancel.is_cancelled() {
            return Err(DhtError::Canceled);
        }
        if self.expired() {
            return Err(DhtError::Timeout);
        }
        Ok(())
    }

    pub fn canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left on the budget, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Remaining budget in milliseconds as carried on the wire, saturating.
    pub fn ttl_ms(&self) -> u32 {
        u32::try_from(self.remaining().as_millis()).unwrap_or(u32::MAX)
    }

    /// Timeout for a single downstream call: the per-call failure timeout,
    /// clipped to whatever is left of the overall budget.
    pub fn call_timeout(&self, failure_timeout: Duration) -> Duration {
        self.remaining().min(failure_timeout)
    }

    /// Token observed by blocking waits; canceling it aborts them.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_expires_and_clips() {
        let ctx = Context::with_budget(Duration::from_secs(60));
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining() <= Duration::from_secs(60));
        assert_eq!(
            ctx.call_timeout(Duration::from_millis(10)),
            Duration::from_millis(10)
        );

        let past = Context::with_budget(Duration::ZERO);
        assert!(past.expired());
        assert_eq!(past.remaining(), Duration::ZERO);
        assert_eq!(past.ttl_ms(), 0);
        assert_eq!(past.check(), Err(DhtError::Timeout));
    }

    #[test]
    fn cancellation_wins_over_the_deadline() {
        let cancel = CancellationToken::new();
        let ctx = Context::with_cancellation(Duration::from_secs(60), cancel.clone());
        assert!(!ctx.canceled());
        assert!(ctx.check().is_ok());

        cancel.cancel();
        assert!(ctx.canceled());
        assert_eq!(ctx.check(), Err(DhtError::Canceled));

        // A canceled context reports Canceled even once also expired.
        let spent = Context::with_cancellation(Duration::ZERO, cancel);
        assert_eq!(spent.check(), Err(DhtError::Canceled));
    }
}
