use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use metrics::counter;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

/// Per-domain exclusive locks. Work on different domains never contends.
#[derive(Clone)]
pub struct DomainLocks {
    entries: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    timeout: Duration,
}

impl DomainLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Runs `work` while holding the lock for `domain_id`.
    ///
    /// Waits at most the configured timeout for the lock. The lock is released
    /// when `work` completes, fails or is dropped.
    pub async fn with_lock<F, Fut, T>(&self, domain_id: &str, work: F) -> Result<T, LockTimeout>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let acquired = tokio::time::timeout(self.timeout, self.entry(domain_id).lock_owned()).await;
        let guard = match acquired {
            Ok(guard) => guard,
            Err(_) => {
                self.prune(domain_id);
                counter!("domain_lock_timeouts_total").increment(1);
                warn!(
                    stage = "push",
                    domain_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "domain lock wait timed out"
                );
                return Err(LockTimeout {
                    domain_id: domain_id.to_string(),
                });
            }
        };

        let output = work().await;
        drop(guard);
        self.prune(domain_id);
        Ok(output)
    }

    fn entry(&self, domain_id: &str) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.entry(domain_id.to_string()).or_default().clone()
    }

    /// Drops the entry once nobody holds or waits for it.
    fn prune(&self, domain_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(domain_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            entries.remove(domain_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Debug, Clone, Error)]
#[error("timed out waiting for the lock on domain {domain_id}")]
pub struct LockTimeout {
    pub domain_id: String,
}
