//! Reconnect policy and cancellable timer tasks

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Backoff and cooldown policy for a streaming client.
///
/// The cooldown length and attempt cap are provider folklore rather than
/// documented contract, so they are configuration with defaults instead of
/// constants.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First retry delay; doubled on each subsequent attempt
    pub base_delay_ms: u64,

    /// Attempts allowed before the client gives up for good
    pub max_attempts: u32,

    /// Wait imposed after a rate-limit close before connecting again
    pub rate_limit_cooldown_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_attempts: 10,
            rate_limit_cooldown_secs: 300,
        }
    }
}

impl ReconnectConfig {
    /// Exponential backoff delay for the given attempt (1-based):
    /// `base * 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }
}

/// A timer-driven task that is cancelled deterministically when dropped or
/// replaced, so a competing state transition can never race a just-fired
/// timer into stale work.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `fut` once after `delay`
    pub fn once<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });
        Self { handle }
    }

    /// Run `task` every `period`, starting one period from now
    pub fn repeating<F, Fut>(period: Duration, mut task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately; the first heartbeat should not
            ticker.tick().await;
            loop {
                ticker.tick().await;
                task().await;
            }
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let cfg = ReconnectConfig {
            base_delay_ms: 500,
            ..Default::default()
        };
        assert_eq!(cfg.delay_for(1), Duration::from_millis(500));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(1000));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(2000));
        assert_eq!(cfg.delay_for(5), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let cfg = ReconnectConfig {
            base_delay_ms: u64::MAX / 2,
            ..Default::default()
        };
        let delay = cfg.delay_for(64);
        assert!(delay >= Duration::from_millis(u64::MAX / 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_task = Arc::clone(&fired);
        let _task = ScheduledTask::once(Duration::from_secs(5), async move {
            fired_in_task.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_task = Arc::clone(&fired);
        let task = ScheduledTask::once(Duration::from_secs(5), async move {
            fired_in_task.fetch_add(1, Ordering::SeqCst);
        });

        task.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_task() {
        let fired = Arc::new(AtomicU32::new(0));
        {
            let fired_in_task = Arc::clone(&fired);
            let _task = ScheduledTask::once(Duration::from_secs(5), async move {
                fired_in_task.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_fires_on_every_period() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_task = Arc::clone(&fired);
        let _task = ScheduledTask::repeating(Duration::from_secs(30), move || {
            let fired = Arc::clone(&fired_in_task);
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }
}
