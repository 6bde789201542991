//! In-process locker.

use super::{LockLease, LockOptions, Locker};
use async_trait::async_trait;
use feedline_core::{FeedError, FeedResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

/// Upper bound on a single wait before the lock table is checked again.
const RECHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Locker for a single process.
///
/// Leases lapse after their hold time exactly like the Redis locker, so code
/// that overruns behaves the same in tests as in production.
#[derive(Debug, Default)]
pub struct LocalLocker {
    held: Mutex<HashMap<String, (String, Instant)>>,
    released: Notify,
}

impl LocalLocker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire(&self, key: &str, hold: Duration) -> Option<LockLease> {
        let now = Instant::now();
        let mut held = self.held.lock();

        if let Some((_, expires_at)) = held.get(key) {
            if *expires_at > now {
                return None;
            }
        }

        let token = Uuid::new_v4().to_string();
        held.insert(key.to_string(), (token.clone(), now + hold));
        Some(LockLease {
            key: key.to_string(),
            token,
            expires_at: now + hold,
        })
    }
}

#[async_trait]
impl Locker for LocalLocker {
    async fn acquire(&self, key: &str, options: LockOptions) -> FeedResult<LockLease> {
        let deadline = Instant::now() + options.wait;

        loop {
            if let Some(lease) = self.try_acquire(key, options.hold) {
                return Ok(lease);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(FeedError::lock_failure(
                    key,
                    format!("not acquired within {}ms", options.wait.as_millis()),
                ));
            }

            let pause = (deadline - now).min(RECHECK_INTERVAL);
            let _ = tokio::time::timeout(pause, self.released.notified()).await;
        }
    }

    async fn release(&self, lease: LockLease) -> FeedResult<()> {
        {
            let mut held = self.held.lock();
            if held.get(&lease.key).is_some_and(|(token, _)| *token == lease.token) {
                held.remove(&lease.key);
            }
        }
        self.released.notify_waiters();
        Ok(())
    }
}
