//! Per-user checkout locks with bounded leases
//!
//! A lease is a `{token, expires_at}` record keyed by user. Acquisition succeeds when no
//! record exists or the existing one has expired; release only removes a record whose
//! token matches the handle. A holder that crashes simply lets its lease run out.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use sled::Db;
use tracing::debug;

use super::clock::Clock;
use super::error::LockError;
use super::store::keys;
use super::utils;

/// Proof of holding a user's checkout lock. Consumed by `release`.
#[derive(Debug, PartialEq, Eq)]
pub struct LockHandle {
    user_id: String,
    token: String,
    expires_at_ms: i64,
}

impl LockHandle {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

pub trait CheckoutLock: Send + Sync {
    /// Take the lock for `user_id` for at most `lease`. Fails with `Unavailable` once
    /// the retry policy is spent while another live lease exists.
    fn acquire(&self, user_id: &str, lease: Duration) -> Result<LockHandle, LockError>;

    /// Give the lock back. Fails with `Lost` when the lease expired or another holder
    /// took it over in the meantime.
    fn release(&self, handle: LockHandle) -> Result<(), LockError>;
}

/// How long `acquire` keeps trying before reporting `Unavailable`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            retry_count: 0,
            retry_delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 10,
            retry_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
struct LockRecord {
    #[n(0)]
    token: String,
    #[n(1)]
    expires_at_ms: i64,
}

impl LockRecord {
    fn is_live_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}

impl From<&LockHandle> for LockRecord {
    fn from(handle: &LockHandle) -> Self {
        Self {
            token: handle.token.clone(),
            expires_at_ms: handle.expires_at_ms,
        }
    }
}

fn new_handle(user_id: &str, now_ms: i64, lease: Duration) -> anyhow::Result<LockHandle> {
    let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
    Ok(LockHandle {
        user_id: user_id.to_string(),
        token: utils::new_lease_token()?,
        expires_at_ms: now_ms.saturating_add(lease_ms),
    })
}

fn acquire_with_retries<F>(
    policy: RetryPolicy,
    user_id: &str,
    mut attempt: F,
) -> Result<LockHandle, LockError>
where
    F: FnMut() -> anyhow::Result<Option<LockHandle>>,
{
    for tried in 0..=policy.retry_count {
        if let Some(handle) = attempt()? {
            return Ok(handle);
        }
        if tried < policy.retry_count {
            debug!(user_id, tried, "checkout lock busy, waiting");
            thread::sleep(policy.retry_delay);
        }
    }
    Err(LockError::Unavailable(user_id.to_string()))
}

/// Lease records stored in the shared sled keyspace under `lock:checkout:{user_id}`
#[derive(Clone)]
pub struct StoreLockManager {
    instance: Arc<Db>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl StoreLockManager {
    pub fn new(instance: Arc<Db>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            instance,
            clock,
            policy,
        }
    }

    /// Whether a live lease exists for the user right now
    pub fn is_held(&self, user_id: &str) -> anyhow::Result<bool> {
        let now_ms = self.clock.now().timestamp_millis();
        match self.instance.get(keys::checkout_lock(user_id))? {
            Some(bytes) => Ok(minicbor::decode::<LockRecord>(&bytes)?.is_live_at(now_ms)),
            None => Ok(false),
        }
    }

    fn try_acquire(&self, user_id: &str, lease: Duration) -> anyhow::Result<Option<LockHandle>> {
        let key = keys::checkout_lock(user_id);
        let now_ms = self.clock.now().timestamp_millis();

        let current = self.instance.get(&key)?;
        if let Some(bytes) = &current {
            let record: LockRecord = minicbor::decode(bytes)?;
            if record.is_live_at(now_ms) {
                return Ok(None);
            }
            debug!(user_id, "taking over expired checkout lease");
        }

        let handle = new_handle(user_id, now_ms, lease)?;
        let record = minicbor::to_vec(LockRecord::from(&handle))?;
        // the swap fails if anyone acquired or released between the read and here
        let swapped = self.instance.compare_and_swap(&key, current, Some(record))?;
        Ok(swapped.ok().map(|()| handle))
    }
}

impl CheckoutLock for StoreLockManager {
    fn acquire(&self, user_id: &str, lease: Duration) -> Result<LockHandle, LockError> {
        acquire_with_retries(self.policy, user_id, || self.try_acquire(user_id, lease))
    }

    fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        let key = keys::checkout_lock(&handle.user_id);
        let now_ms = self.clock.now().timestamp_millis();

        let Some(current) = self.instance.get(&key).map_err(anyhow::Error::from)? else {
            return Err(LockError::Lost(handle.user_id));
        };
        let record: LockRecord = minicbor::decode(&current).map_err(anyhow::Error::from)?;
        if record.token != handle.token {
            return Err(LockError::Lost(handle.user_id));
        }

        let removed = self
            .instance
            .compare_and_swap(&key, Some(current), None::<Vec<u8>>)
            .map_err(anyhow::Error::from)?;
        if removed.is_err() || !record.is_live_at(now_ms) {
            return Err(LockError::Lost(handle.user_id));
        }
        Ok(())
    }
}

/// Process-local leases for single-node deployments and tests
pub struct InMemoryLockManager {
    leases: Mutex<HashMap<String, LockRecord>>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl InMemoryLockManager {
    pub fn new(clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            clock,
            policy,
        }
    }

    pub fn is_held(&self, user_id: &str) -> bool {
        let now_ms = self.clock.now().timestamp_millis();
        self.leases
            .lock()
            .map(|leases| leases.get(user_id).is_some_and(|record| record.is_live_at(now_ms)))
            .unwrap_or(false)
    }

    fn try_acquire(&self, user_id: &str, lease: Duration) -> anyhow::Result<Option<LockHandle>> {
        let now_ms = self.clock.now().timestamp_millis();
        let mut leases = self.leases.lock().map_err(|_| anyhow!("lease table poisoned"))?;

        if leases.get(user_id).is_some_and(|record| record.is_live_at(now_ms)) {
            return Ok(None);
        }
        let handle = new_handle(user_id, now_ms, lease)?;
        leases.insert(user_id.to_string(), LockRecord::from(&handle));
        Ok(Some(handle))
    }
}

impl CheckoutLock for InMemoryLockManager {
    fn acquire(&self, user_id: &str, lease: Duration) -> Result<LockHandle, LockError> {
        acquire_with_retries(self.policy, user_id, || self.try_acquire(user_id, lease))
    }

    fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        let now_ms = self.clock.now().timestamp_millis();
        let mut leases = self.leases.lock().map_err(|_| anyhow!("lease table poisoned"))?;

        match leases.get(&handle.user_id) {
            Some(record) if record.token == handle.token => {
                let live = record.is_live_at(now_ms);
                leases.remove(&handle.user_id);
                if live { Ok(()) } else { Err(LockError::Lost(handle.user_id)) }
            }
            _ => Err(LockError::Lost(handle.user_id)),
        }
    }
}
