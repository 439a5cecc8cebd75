//! Per client record of recently delivered blobs.
//!
//! Clients fetching many overlapping sequences would otherwise receive the
//! same large blob over and over. Before sending a blob the sender asks
//! [ExcludeBlobCache::check_and_add]: a blob delivered to the same client
//! within the resend window, or one being delivered by a concurrent request
//! of that client, is replaced by a short "excluded" notice.
//!
//! Entries of clients that stay silent longer than the inactivity timeout
//! are dropped by a background purge task, see [ExcludeCachePurger].

use seqgate_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Exclude cache configuration types.
pub mod config {
    /// Configuration parameters for [ExcludeBlobCache](super::ExcludeBlobCache).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct ExcludeCacheConfig {
        /// Once a client tracks more blobs than this, the oldest completed
        /// entries are dropped. Default: 1000.
        pub max_blobs_per_client: usize,

        /// Size a client's entry list is trimmed down to. Default: 800.
        pub purge_down_to: usize,

        /// Clients silent for this long are forgotten. Default: 1 hour.
        pub inactivity_timeout_ms: u64,

        /// How often the purge task runs. Default: 1 minute.
        pub purge_interval_ms: u64,

        /// A blob sent less than this long ago is not sent again.
        /// Requests may override it. Default: 200 ms.
        pub resend_timeout_ms: u64,
    }

    impl Default for ExcludeCacheConfig {
        fn default() -> Self {
            Self {
                max_blobs_per_client: 1000,
                purge_down_to: 800,
                inactivity_timeout_ms: 1000 * 60 * 60,
                purge_interval_ms: 1000 * 60,
                resend_timeout_ms: 200,
            }
        }
    }

    /// Module-level configuration for the exclude cache.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct ExcludeCacheModConfig {
        /// Exclude cache configuration.
        pub exclude_cache: ExcludeCacheConfig,
    }

    impl seqgate_api::config::ModConfig for ExcludeCacheModConfig {}
}

pub use config::*;

/// Outcome of [ExcludeBlobCache::check_and_add].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcludeCheck {
    /// Not tracked (or tracked but stale). Now marked in progress, the
    /// caller should send the blob.
    Added,
    /// Another request of the same client is sending it.
    InProgress,
    /// Completed for this client this long ago.
    SentRecently {
        /// Time since completion.
        ago: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    InProgress,
    Completed,
}

#[derive(Debug)]
struct Entry {
    state: EntryState,
    at: Instant,
}

#[derive(Debug)]
struct ClientBlobs {
    last_touch: Instant,
    blobs: HashMap<BlobId, Entry>,
}

/// The exclude cache, shared by every request of the gateway.
#[derive(Debug)]
pub struct ExcludeBlobCache {
    config: ExcludeCacheConfig,
    clients: Mutex<HashMap<ClientId, ClientBlobs>>,
}

impl ExcludeBlobCache {
    /// Construct a new, empty cache.
    pub fn new(config: ExcludeCacheConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The configured default resend window.
    pub fn resend_timeout(&self) -> Duration {
        Duration::from_millis(self.config.resend_timeout_ms)
    }

    /// Check whether `blob` should be sent to `client`, registering the
    /// send if so.
    pub fn check_and_add(
        &self,
        client: &ClientId,
        blob: BlobId,
        resend_timeout: Duration,
    ) -> ExcludeCheck {
        let now = Instant::now();
        let mut lock = self.clients.lock().unwrap();
        let c = lock.entry(client.clone()).or_insert_with(|| ClientBlobs {
            last_touch: now,
            blobs: HashMap::new(),
        });
        c.last_touch = now;

        if let Some(e) = c.blobs.get_mut(&blob) {
            match e.state {
                EntryState::InProgress => return ExcludeCheck::InProgress,
                EntryState::Completed => {
                    let ago = now.saturating_duration_since(e.at);
                    if ago < resend_timeout {
                        return ExcludeCheck::SentRecently { ago };
                    }
                    e.state = EntryState::InProgress;
                    e.at = now;
                    return ExcludeCheck::Added;
                }
            }
        }

        c.blobs.insert(
            blob,
            Entry {
                state: EntryState::InProgress,
                at: now,
            },
        );
        if c.blobs.len() > self.config.max_blobs_per_client {
            Self::trim(c, self.config.purge_down_to);
        }
        ExcludeCheck::Added
    }

    /// Drop the oldest completed entries until at most `target` remain.
    /// In progress entries are kept.
    fn trim(c: &mut ClientBlobs, target: usize) {
        let mut completed: Vec<(Instant, BlobId)> = c
            .blobs
            .iter()
            .filter(|(_, e)| e.state == EntryState::Completed)
            .map(|(id, e)| (e.at, *id))
            .collect();
        completed.sort();
        let excess = c.blobs.len().saturating_sub(target);
        for (_, id) in completed.into_iter().take(excess) {
            c.blobs.remove(&id);
        }
    }

    /// Mark a send as completed, starting its resend window.
    pub fn set_completed(&self, client: &ClientId, blob: BlobId) {
        let mut lock = self.clients.lock().unwrap();
        if let Some(e) =
            lock.get_mut(client).and_then(|c| c.blobs.get_mut(&blob))
        {
            e.state = EntryState::Completed;
            e.at = Instant::now();
        }
    }

    /// Forget a send that failed or was canceled.
    pub fn remove(&self, client: &ClientId, blob: BlobId) {
        let mut lock = self.clients.lock().unwrap();
        if let Some(c) = lock.get_mut(client) {
            c.blobs.remove(&blob);
        }
    }

    /// Forget clients inactive for longer than the inactivity timeout.
    /// Returns the number of clients removed.
    pub fn purge_inactive(&self) -> usize {
        let timeout = Duration::from_millis(self.config.inactivity_timeout_ms);
        let now = Instant::now();
        let mut lock = self.clients.lock().unwrap();
        let before = lock.len();
        lock.retain(|_, c| now.saturating_duration_since(c.last_touch) < timeout);
        before - lock.len()
    }

    /// Number of clients tracked.
    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Number of blobs tracked for a client.
    pub fn blob_count(&self, client: &ClientId) -> usize {
        self.clients
            .lock()
            .unwrap()
            .get(client)
            .map(|c| c.blobs.len())
            .unwrap_or(0)
    }
}

/// Background task purging inactive clients. Aborted on drop.
#[derive(Debug)]
pub struct ExcludeCachePurger(tokio::task::JoinHandle<()>);

impl Drop for ExcludeCachePurger {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl ExcludeCachePurger {
    /// Spawn the purge task. It stops on its own once the cache is gone.
    pub fn spawn(cache: &Arc<ExcludeBlobCache>) -> Self {
        let interval =
            Duration::from_millis(cache.config.purge_interval_ms.max(1));
        let weak: Weak<ExcludeBlobCache> = Arc::downgrade(cache);
        Self(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(cache) = weak.upgrade() else {
                    return;
                };
                let removed = cache.purge_inactive();
                if removed > 0 {
                    tracing::debug!(removed, "purged inactive exclude cache clients");
                }
            }
        }))
    }
}

#[cfg(test)]
mod test;
