//! Backend store and local cache contracts.

use crate::*;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Lookup of canonical sequence metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BioseqInfoQuery {
    /// Accession without version.
    pub accession: String,
    /// Version, any if unset.
    pub version: Option<i16>,
    /// Seq id type, any if unset.
    pub seq_id_type: Option<SeqIdType>,
    /// Gi, any if unset.
    pub gi: Option<i64>,
}

/// Lookup of a secondary identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Si2CsiQuery {
    /// Secondary id text.
    pub sec_seq_id: String,
    /// Secondary id type, any if unset.
    pub sec_seq_id_type: Option<SeqIdType>,
}

/// Identical protein group lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IpgQuery {
    /// Normalized protein accession.version.
    pub protein: Option<String>,
    /// Normalized nucleotide accession.version.
    pub nucleotide: Option<String>,
    /// Group id.
    pub ipg: Option<i64>,
}

/// The remote column store holding sequence metadata and blobs.
///
/// Every call is asynchronous. Implementations are shared by all requests
/// and must be internally thread-safe. Per-operation timeouts are applied
/// by the caller.
pub trait BackendStore: 'static + Send + Sync + std::fmt::Debug {
    /// Canonical metadata matching the query. Empty when nothing matches.
    fn fetch_bioseq_info(
        &self,
        query: BioseqInfoQuery,
    ) -> BoxFut<'_, GwResult<Vec<BioseqInfo>>>;

    /// Secondary id mappings matching the query.
    fn fetch_si2csi(
        &self,
        query: Si2CsiQuery,
    ) -> BoxFut<'_, GwResult<Vec<Si2Csi>>>;

    /// Blob properties. With `last_modified` only that exact revision,
    /// otherwise the latest one.
    fn fetch_blob_props(
        &self,
        keyspace: Arc<str>,
        sat_key: i32,
        last_modified: Option<i64>,
    ) -> BoxFut<'_, GwResult<Option<BlobProps>>>;

    /// Stream the stored pieces of a blob revision. Pieces may arrive in
    /// any order.
    fn stream_blob_chunks(
        &self,
        keyspace: Arc<str>,
        sat_key: i32,
        last_modified: i64,
    ) -> BoxStream<'static, GwResult<BlobChunk>>;

    /// Split history of an object. With `split_version` only that
    /// version, otherwise all of them.
    fn fetch_split_history(
        &self,
        keyspace: Arc<str>,
        sat_key: i32,
        split_version: Option<i32>,
    ) -> BoxFut<'_, GwResult<Vec<SplitHistoryRecord>>>;

    /// Named annotations of a canonical sequence stored in one keyspace.
    fn fetch_named_annotations(
        &self,
        keyspace: Arc<str>,
        accession: String,
        version: i16,
        seq_id_type: SeqIdType,
        names: Vec<String>,
    ) -> BoxFut<'_, GwResult<Vec<NamedAnnotRecord>>>;

    /// History of an accession, newest first.
    fn fetch_accession_history(
        &self,
        accession: String,
        seq_id_type: SeqIdType,
    ) -> BoxFut<'_, GwResult<Vec<AccessionHistoryRecord>>>;

    /// Identical protein group rows.
    fn fetch_ipg(&self, query: IpgQuery) -> BoxFut<'_, GwResult<Vec<IpgRecord>>>;
}

/// Trait object [BackendStore].
pub type DynBackendStore = Arc<dyn BackendStore>;

/// A factory for creating BackendStore instances.
pub trait BackendStoreFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &config::Config) -> GwResult<()>;

    /// Construct a BackendStore instance.
    fn create(
        &self,
        config: Arc<config::Config>,
    ) -> BoxFut<'static, GwResult<DynBackendStore>>;
}

/// Trait object [BackendStoreFactory].
pub type DynBackendStoreFactory = Arc<dyn BackendStoreFactory>;

/// A fast, read-mostly metadata cache consulted before the backend.
///
/// Lookups are synchronous and may run concurrently from any number of
/// requests without external locking. An empty result is a cache miss.
pub trait LocalCache: 'static + Send + Sync + std::fmt::Debug {
    /// Cached canonical metadata.
    fn lookup_bioseq_info(
        &self,
        query: &BioseqInfoQuery,
    ) -> GwResult<Vec<BioseqInfo>>;

    /// Cached secondary id mappings.
    fn lookup_si2csi(&self, query: &Si2CsiQuery) -> GwResult<Vec<Si2Csi>>;

    /// Cached blob properties.
    fn lookup_blob_props(
        &self,
        blob_id: BlobId,
        last_modified: Option<i64>,
    ) -> GwResult<Option<BlobProps>>;
}

/// Trait object [LocalCache].
pub type DynLocalCache = Arc<dyn LocalCache>;

/// A factory for creating LocalCache instances.
pub trait LocalCacheFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &config::Config) -> GwResult<()>;

    /// Construct a LocalCache instance. A failure here disables the
    /// local cache, it does not prevent the gateway from starting.
    fn create(
        &self,
        config: Arc<config::Config>,
    ) -> BoxFut<'static, GwResult<DynLocalCache>>;
}

/// Trait object [LocalCacheFactory].
pub type DynLocalCacheFactory = Arc<dyn LocalCacheFactory>;

impl BioseqInfoQuery {
    /// The query matching a parsed seq id as a primary identifier.
    pub fn from_seq_id(seq_id: &SeqId) -> Self {
        let p = seq_id.parsed();
        Self {
            accession: p.accession.clone(),
            version: p.version,
            seq_id_type: p.seq_id_type,
            gi: None,
        }
    }

    /// True if the record satisfies this query.
    pub fn matches(&self, r: &BioseqInfo) -> bool {
        r.accession.eq_ignore_ascii_case(&self.accession)
            && self.version.map(|v| v == r.version).unwrap_or(true)
            && self
                .seq_id_type
                .map(|t| t == r.seq_id_type)
                .unwrap_or(true)
            && self.gi.map(|g| Some(g) == r.gi).unwrap_or(true)
    }
}

impl Si2CsiQuery {
    /// The secondary lookup matching a parsed seq id.
    pub fn from_seq_id(seq_id: &SeqId) -> Self {
        let p = seq_id.parsed();
        let sec_seq_id = if seq_id.is_gi() || !seq_id.is_accession_like() {
            p.accession.clone()
        } else {
            // secondary accessions are stored upper-cased without version
            p.accession.to_ascii_uppercase()
        };
        Self {
            sec_seq_id,
            sec_seq_id_type: p.seq_id_type,
        }
    }

    /// True if the record satisfies this query.
    pub fn matches(&self, r: &Si2Csi) -> bool {
        r.sec_seq_id.eq_ignore_ascii_case(&self.sec_seq_id)
            && self
                .sec_seq_id_type
                .map(|t| t == r.sec_seq_id_type)
                .unwrap_or(true)
    }
}
