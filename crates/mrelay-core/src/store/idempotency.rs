use std::{sync::Arc, time::Duration};

use tracing::warn;

use crate::{domain::EventId, store::KvStore, Result};

const KEY_PREFIX: &str = "processed_message:";

/// Outcome of [`IdempotencyStore::claim`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    /// This caller recorded the event and owns its processing.
    Fresh,
    /// A live record already exists.
    Duplicate,
}

/// Tracks which inbound events were already handed to the pipeline.
///
/// Records expire after `ttl`. Expiry only bounds memory: platform webhook
/// retries stop long before it elapses.
#[derive(Clone)]
pub struct IdempotencyStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(event_id: &EventId) -> String {
        format!("{KEY_PREFIX}{}", event_id.0)
    }

    /// Check-and-set in one step. Only one concurrent caller per event gets
    /// [`Claim::Fresh`]. Backend failures are returned to the caller, which
    /// decides whether to fail open or closed.
    pub async fn claim(&self, event_id: &EventId) -> Result<Claim> {
        let created = self.kv.set_if_absent(&Self::key(event_id), self.ttl).await?;
        Ok(if created {
            Claim::Fresh
        } else {
            Claim::Duplicate
        })
    }

    /// Fails open: an unreachable backend reads as "not processed".
    pub async fn is_processed(&self, event_id: &EventId) -> bool {
        match self.kv.exists(&Self::key(event_id)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "idempotency lookup failed, treating as new");
                false
            }
        }
    }

    /// Best-effort; failures are logged.
    pub async fn mark_processed(&self, event_id: &EventId) {
        if let Err(e) = self.kv.set_if_absent(&Self::key(event_id), self.ttl).await {
            warn!(event_id = %event_id, error = %e, "failed to record processed event");
        }
    }
}
