//! The in-memory local cache.
//!
//! Loaded once from a [LocalCacheSnapshot] and read-only afterwards, so
//! lookups take no lock.

use seqgate_api::config::*;
use seqgate_api::*;
use std::collections::HashMap;
use std::sync::Arc;

/// MemLocalCache configuration types.
pub mod config {
    /// Configuration parameters for [MemLocalCacheFactory](super::MemLocalCacheFactory).
    #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemLocalCacheConfig {
        /// Json [LocalCacheSnapshot](super::LocalCacheSnapshot) to load.
        /// Without one the cache starts empty.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub snapshot_path: Option<String>,
    }

    /// Module-level configuration for MemLocalCache.
    #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemLocalCacheModConfig {
        /// MemLocalCache configuration.
        pub local_cache: MemLocalCacheConfig,
    }

    impl seqgate_api::config::ModConfig for MemLocalCacheModConfig {}
}

pub use config::*;

/// What the local cache is loaded from.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalCacheSnapshot {
    /// Canonical metadata rows.
    pub bioseq_info: Vec<BioseqInfo>,
    /// Secondary id rows.
    pub si2csi: Vec<Si2Csi>,
    /// Blob properties.
    pub blob_props: Vec<BlobProps>,
}

impl LocalCacheSnapshot {
    /// Load a snapshot from a json file.
    pub fn load(path: &str) -> GwResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            GwError::other_src(format!("reading cache snapshot {path}"), err)
        })?;
        serde_json::from_str(&text).map_err(|err| {
            GwError::other_src(format!("parsing cache snapshot {path}"), err)
        })
    }
}

/// The in-memory local cache.
#[derive(Debug, Default)]
pub struct MemLocalCache {
    bioseq_info: HashMap<String, Vec<BioseqInfo>>,
    si2csi: HashMap<String, Vec<Si2Csi>>,
    blob_props: HashMap<BlobId, Vec<BlobProps>>,
}

impl MemLocalCache {
    /// Index a snapshot.
    pub fn new(snapshot: LocalCacheSnapshot) -> Self {
        let mut out = Self::default();
        for r in snapshot.bioseq_info {
            out.bioseq_info
                .entry(r.accession.to_ascii_uppercase())
                .or_default()
                .push(r);
        }
        for r in snapshot.si2csi {
            out.si2csi
                .entry(r.sec_seq_id.to_ascii_uppercase())
                .or_default()
                .push(r);
        }
        for p in snapshot.blob_props {
            out.blob_props.entry(p.blob_id).or_default().push(p);
        }
        out
    }
}

impl LocalCache for MemLocalCache {
    fn lookup_bioseq_info(
        &self,
        query: &BioseqInfoQuery,
    ) -> GwResult<Vec<BioseqInfo>> {
        Ok(self
            .bioseq_info
            .get(&query.accession.to_ascii_uppercase())
            .map(|rows| {
                rows.iter().filter(|r| query.matches(r)).cloned().collect()
            })
            .unwrap_or_default())
    }

    fn lookup_si2csi(&self, query: &Si2CsiQuery) -> GwResult<Vec<Si2Csi>> {
        Ok(self
            .si2csi
            .get(&query.sec_seq_id.to_ascii_uppercase())
            .map(|rows| {
                rows.iter().filter(|r| query.matches(r)).cloned().collect()
            })
            .unwrap_or_default())
    }

    fn lookup_blob_props(
        &self,
        blob_id: BlobId,
        last_modified: Option<i64>,
    ) -> GwResult<Option<BlobProps>> {
        Ok(self.blob_props.get(&blob_id).and_then(|revs| {
            revs.iter()
                .filter(|p| {
                    last_modified
                        .map(|lm| lm == p.last_modified)
                        .unwrap_or(true)
                })
                .max_by_key(|p| p.last_modified)
                .cloned()
        }))
    }
}

/// Creates [MemLocalCache]s.
#[derive(Debug)]
pub struct MemLocalCacheFactory {
    snapshot: Option<LocalCacheSnapshot>,
}

impl MemLocalCacheFactory {
    /// Construct a new MemLocalCacheFactory, loading the configured
    /// snapshot (if any) on create.
    pub fn create() -> DynLocalCacheFactory {
        Arc::new(Self { snapshot: None })
    }

    /// A factory for a cache holding exactly this snapshot.
    pub fn with_snapshot(snapshot: LocalCacheSnapshot) -> DynLocalCacheFactory {
        Arc::new(Self {
            snapshot: Some(snapshot),
        })
    }
}

impl LocalCacheFactory for MemLocalCacheFactory {
    fn default_config(&self, config: &Config) -> GwResult<()> {
        config.add_default_module_config::<MemLocalCacheModConfig>()
    }

    fn create(
        &self,
        config: Arc<Config>,
    ) -> BoxFut<'static, GwResult<DynLocalCache>> {
        let snapshot = self.snapshot.clone();
        Box::pin(async move {
            let snapshot = match snapshot {
                Some(snapshot) => snapshot,
                None => {
                    let config: MemLocalCacheModConfig =
                        config.get_module_config()?;
                    match &config.local_cache.snapshot_path {
                        Some(path) => LocalCacheSnapshot::load(path)?,
                        None => LocalCacheSnapshot::default(),
                    }
                }
            };
            tracing::debug!(
                bioseq_info = snapshot.bioseq_info.len(),
                si2csi = snapshot.si2csi.len(),
                blob_props = snapshot.blob_props.len(),
                "local cache loaded",
            );
            let out: DynLocalCache = Arc::new(MemLocalCache::new(snapshot));
            Ok(out)
        })
    }
}
