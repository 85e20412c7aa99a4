use std::{collections::HashMap, sync::Arc};

use metrics::counter;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

/// Which site a hostname serves, as needed by request routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteResolution {
    pub site_id: String,
    pub domain_id: String,
    pub hostname: String,
    pub is_primary: bool,
    /// Primary hostname to redirect to, when this domain redirects.
    pub redirect_to: Option<String>,
}

/// Process-wide hostname to site map, filled lazily from storage.
///
/// Entries have no TTL; every mutation touching a hostname must call
/// [`HostnameCache::invalidate`] before reporting success. Loads record the
/// generation they started at, and [`HostnameCache::insert_if_current`]
/// refuses them when an invalidation happened in between.
#[derive(Clone, Default)]
pub struct HostnameCache {
    inner: Arc<RwLock<CacheState>>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, SiteResolution>,
    generation: u64,
}

impl HostnameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, hostname: &str) -> Option<SiteResolution> {
        let found = self.inner.read().await.entries.get(hostname).cloned();
        let result = if found.is_some() { "hit" } else { "miss" };
        counter!("hostname_cache_lookups_total", "result" => result).increment(1);
        found
    }

    /// Generation to pass to [`HostnameCache::insert_if_current`] after a load.
    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    /// Stores a loaded entry unless the cache was invalidated since `generation`.
    pub async fn insert_if_current(&self, generation: u64, resolution: SiteResolution) -> bool {
        let mut state = self.inner.write().await;
        if state.generation != generation {
            debug!(stage = "cache", hostname = %resolution.hostname, "discarded stale hostname load");
            return false;
        }
        state
            .entries
            .insert(resolution.hostname.clone(), resolution);
        true
    }

    pub async fn invalidate(&self, hostname: &str) {
        self.invalidate_many(std::iter::once(hostname)).await;
    }

    pub async fn invalidate_many<'a, I>(&self, hostnames: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = self.inner.write().await;
        state.generation += 1;
        for hostname in hostnames {
            state.entries.remove(hostname);
            debug!(stage = "cache", hostname, "hostname cache entry invalidated");
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}
