//! Gateway wide state, shared by all requests.

use crate::exclude_cache::*;
use crate::split::SatMap;
use seqgate_api::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Gateway configuration types.
pub mod config {
    use std::collections::BTreeMap;

    /// Gateway level configuration parameters.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct GatewayConfig {
        /// Satellite number to backend keyspace. Default: 4 to
        /// `satncbi_extended`, 5 to `satprot`.
        pub sat_map: BTreeMap<i32, String>,

        /// Blobs up to this size are never subject to the exclude cache.
        /// Default: 16 KiB.
        pub small_blob_size: i64,

        /// Deadline of every single backend operation. Default: 5 s.
        pub backend_op_timeout_ms: u64,

        /// Upper bound on how long a request driver sleeps without
        /// re-checking its processor. Default: 100 ms.
        pub output_poll_interval_ms: u64,

        /// Keyspaces holding named annotations. Default: `["nannot"]`.
        pub annot_keyspaces: Vec<String>,
    }

    impl Default for GatewayConfig {
        fn default() -> Self {
            Self {
                sat_map: [
                    (4, "satncbi_extended".to_string()),
                    (5, "satprot".to_string()),
                ]
                .into_iter()
                .collect(),
                small_blob_size: 16 * 1024,
                backend_op_timeout_ms: 5000,
                output_poll_interval_ms: 100,
                annot_keyspaces: vec!["nannot".to_string()],
            }
        }
    }

    /// Module-level configuration for the gateway.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct GatewayModConfig {
        /// Gateway configuration.
        pub gateway: GatewayConfig,
    }

    impl seqgate_api::config::ModConfig for GatewayModConfig {}
}

pub use config::*;

macro_rules! counters {
    ($($(#[$m:meta])* $n:ident,)*) => {
        /// Gateway wide statistics.
        #[derive(Debug, Default)]
        pub struct Counters {
            $($(#[$m])* pub $n: AtomicU64,)*
        }

        /// A point in time copy of [Counters].
        #[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct CountersSnapshot {
            $($(#[$m])* pub $n: u64,)*
        }

        impl Counters {
            /// Copy the current values.
            pub fn snapshot(&self) -> CountersSnapshot {
                CountersSnapshot {
                    $($n: self.$n.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    /// Requests finished with a found status.
    requests_found,
    /// Requests finished with a not-found status.
    requests_not_found,
    /// Requests finished with an error status.
    requests_failed,
    /// Requests canceled.
    requests_canceled,
    /// Resolution failures other than not-found.
    resolve_errors,
    /// Backend operation failures other than timeouts.
    backend_errors,
    /// Backend operations that exceeded their deadline.
    backend_timeouts,
    /// Metadata lookups answered by the local cache.
    cache_hits,
    /// Metadata lookups the local cache could not answer.
    cache_misses,
    /// Blobs whose data was sent completely.
    blobs_sent,
    /// Blobs replaced by an exclude notice.
    blobs_excluded,
}

impl Counters {
    /// Increment a counter.
    pub fn incr(c: &AtomicU64) {
        c.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything a processor needs from the gateway. Passed explicitly to
/// every request, there are no globals.
#[derive(Debug)]
pub struct GatewayContext {
    config: GatewayConfig,
    sat_map: SatMap,
    backend: DynBackendStore,
    local_cache: Option<DynLocalCache>,
    exclude_cache: Arc<ExcludeBlobCache>,
    counters: Counters,
    _purger: ExcludeCachePurger,
}

impl GatewayContext {
    /// Construct the context. Spawns the exclude cache purge task, so this
    /// must be called within a tokio runtime.
    pub fn new(
        config: GatewayConfig,
        exclude_config: ExcludeCacheConfig,
        backend: DynBackendStore,
        local_cache: Option<DynLocalCache>,
    ) -> Self {
        let sat_map =
            SatMap::new(config.sat_map.iter().map(|(s, k)| (*s, k)));
        let exclude_cache = Arc::new(ExcludeBlobCache::new(exclude_config));
        let purger = ExcludeCachePurger::spawn(&exclude_cache);
        Self {
            config,
            sat_map,
            backend,
            local_cache,
            exclude_cache,
            counters: Counters::default(),
            _purger: purger,
        }
    }

    /// The gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Satellite to keyspace mapping.
    pub fn sat_map(&self) -> &SatMap {
        &self.sat_map
    }

    /// The backend store.
    pub fn backend(&self) -> &DynBackendStore {
        &self.backend
    }

    /// The local cache, `None` if disabled.
    pub fn local_cache(&self) -> Option<&DynLocalCache> {
        self.local_cache.as_ref()
    }

    /// The exclude cache.
    pub fn exclude_cache(&self) -> &Arc<ExcludeBlobCache> {
        &self.exclude_cache
    }

    /// Statistics.
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Deadline of a single backend operation.
    pub fn backend_op_timeout(&self) -> Duration {
        Duration::from_millis(self.config.backend_op_timeout_ms)
    }

    /// Upper bound of one request driver sleep.
    pub fn output_poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.output_poll_interval_ms.max(1))
    }

    /// Count a backend failure. Not-found is not a failure.
    pub fn note_backend_error(&self, err: &GwError) {
        match err {
            GwError::NotFound { .. } => (),
            GwError::BackendTimeout { .. } => {
                Counters::incr(&self.counters.backend_timeouts)
            }
            _ => Counters::incr(&self.counters.backend_errors),
        }
    }
}
