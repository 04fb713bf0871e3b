use std::{sync::Arc, time::Duration};

use crate::{domain::UserId, store::KvStore, Result};

const KEY_PREFIX: &str = "media_count:";

/// Per-user media send counter over a fixed window.
///
/// The window starts at the first send and is not extended by later sends, so
/// a user gets `ceiling` media messages per window, then nothing until the
/// counter expires.
#[derive(Clone)]
pub struct QuotaTracker {
    kv: Arc<dyn KvStore>,
    ceiling: u64,
    window: Duration,
}

impl QuotaTracker {
    pub fn new(kv: Arc<dyn KvStore>, ceiling: u64, window: Duration) -> Self {
        Self {
            kv,
            ceiling,
            window,
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn key(user: &UserId) -> String {
        format!("{KEY_PREFIX}{}", user.0)
    }

    pub async fn used(&self, user: &UserId) -> Result<u64> {
        self.kv.count(&Self::key(user)).await
    }

    pub async fn remaining(&self, user: &UserId) -> Result<u64> {
        Ok(self.ceiling.saturating_sub(self.used(user).await?))
    }

    /// Atomically record one send. `false` (nothing recorded) once the
    /// ceiling is reached.
    pub async fn try_consume(&self, user: &UserId) -> Result<bool> {
        let next = self
            .kv
            .increment_below(&Self::key(user), self.ceiling, self.window)
            .await?;
        Ok(next.is_some())
    }

    /// Time until the user's window resets; `None` when no window is open.
    pub async fn resets_in(&self, user: &UserId) -> Result<Option<Duration>> {
        self.kv.ttl(&Self::key(user)).await
    }
}

/// "5h 12m" style rendering for user-facing quota messages.
pub fn format_wait(d: Duration) -> String {
    let total_minutes = d.as_secs().div_ceil(60);
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    match (hours, minutes) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn user() -> UserId {
        UserId("15550001111".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_ceiling_consumptions_per_window() {
        let quota = QuotaTracker::new(Arc::new(MemoryStore::new()), 12, DAY);

        for n in 0..12 {
            assert_eq!(quota.remaining(&user()).await.unwrap(), 12 - n);
            assert!(quota.try_consume(&user()).await.unwrap());
        }
        assert_eq!(quota.remaining(&user()).await.unwrap(), 0);
        assert!(!quota.try_consume(&user()).await.unwrap());
        assert!(!quota.try_consume(&user()).await.unwrap());
        assert_eq!(quota.used(&user()).await.unwrap(), 12);

        tokio::time::advance(DAY).await;
        assert_eq!(quota.remaining(&user()).await.unwrap(), 12);
        assert!(quota.try_consume(&user()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn window_is_fixed_from_first_send() {
        let quota = QuotaTracker::new(Arc::new(MemoryStore::new()), 3, DAY);
        assert!(quota.try_consume(&user()).await.unwrap());

        tokio::time::advance(Duration::from_secs(20 * 60 * 60)).await;
        assert!(quota.try_consume(&user()).await.unwrap());

        let left = quota.resets_in(&user()).await.unwrap().unwrap();
        assert_eq!(left, Duration::from_secs(4 * 60 * 60));

        tokio::time::advance(left).await;
        assert_eq!(quota.used(&user()).await.unwrap(), 0);
        assert_eq!(quota.resets_in(&user()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_consumers_never_exceed_ceiling() {
        let quota = QuotaTracker::new(Arc::new(MemoryStore::new()), 5, DAY);
        let mut tasks = Vec::new();
        for _ in 0..40 {
            let quota = quota.clone();
            tasks.push(tokio::spawn(async move { quota.try_consume(&user()).await }));
        }

        let mut granted = 0;
        for t in tasks {
            if t.await.unwrap().unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
        assert_eq!(quota.used(&user()).await.unwrap(), 5);
    }

    #[test]
    fn wait_formatting_rounds_up_to_minutes() {
        assert_eq!(format_wait(Duration::from_secs(30)), "1m");
        assert_eq!(format_wait(Duration::from_secs(3600)), "1h");
        assert_eq!(format_wait(Duration::from_secs(5 * 3600 + 11 * 60 + 1)), "5h 12m");
    }
}
