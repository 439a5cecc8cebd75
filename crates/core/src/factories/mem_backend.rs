//! The in-memory backend store.
//!
//! Holds a [BackendFixture] and answers every [BackendStore] call from it.
//! Every call is logged and can be delayed, failed, or hung through
//! [MemBackendStore::set_fault], which is what most gateway tests use to
//! stage backend misbehavior.

use futures::stream::{BoxStream, StreamExt};
use seqgate_api::config::*;
use seqgate_api::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// MemBackendStore configuration types.
pub mod config {
    /// Configuration parameters for [MemBackendStoreFactory](super::MemBackendStoreFactory).
    #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemBackendConfig {
        /// Json [BackendFixture](super::BackendFixture) to load at
        /// startup. Without one the store starts empty.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub fixture_path: Option<String>,
    }

    /// Module-level configuration for MemBackendStore.
    #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemBackendModConfig {
        /// MemBackendStore configuration.
        pub mem_backend: MemBackendConfig,
    }

    impl seqgate_api::config::ModConfig for MemBackendModConfig {}
}

pub use config::*;

/// A blob revision of the fixture.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureBlob {
    /// Keyspace holding the blob.
    pub keyspace: String,
    /// The blob properties.
    pub props: BlobProps,
    /// Stored pieces, in order. Text, to keep fixtures hand editable.
    #[serde(default)]
    pub chunks: Vec<String>,
}

/// A record tied to the keyspace it is stored in.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InKeyspace<T> {
    /// The keyspace.
    pub keyspace: String,
    /// The record.
    pub record: T,
}

/// Everything the in-memory backend knows.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendFixture {
    /// Canonical metadata rows.
    pub bioseq_info: Vec<BioseqInfo>,
    /// Secondary id rows.
    pub si2csi: Vec<Si2Csi>,
    /// Blob revisions.
    pub blobs: Vec<FixtureBlob>,
    /// Split history rows.
    pub split_history: Vec<InKeyspace<SplitHistoryRecord>>,
    /// Named annotation rows.
    pub named_annotations: Vec<InKeyspace<NamedAnnotRecord>>,
    /// Accession history rows.
    pub accession_history: Vec<AccessionHistoryRecord>,
    /// Identical protein group rows.
    pub ipg: Vec<IpgRecord>,
}

impl BackendFixture {
    /// Load a fixture from a json file.
    pub fn load(path: &str) -> GwResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            GwError::other_src(format!("reading fixture {path}"), err)
        })?;
        serde_json::from_str(&text).map_err(|err| {
            GwError::other_src(format!("parsing fixture {path}"), err)
        })
    }

    /// Add a canonical metadata row.
    pub fn with_bioseq_info(mut self, record: BioseqInfo) -> Self {
        self.bioseq_info.push(record);
        self
    }

    /// Add a secondary id row.
    pub fn with_si2csi(mut self, record: Si2Csi) -> Self {
        self.si2csi.push(record);
        self
    }

    /// Add a blob revision.
    pub fn with_blob<I, S>(
        mut self,
        keyspace: &str,
        props: BlobProps,
        chunks: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blobs.push(FixtureBlob {
            keyspace: keyspace.into(),
            props,
            chunks: chunks.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Add a split history row.
    pub fn with_split_history(
        mut self,
        keyspace: &str,
        record: SplitHistoryRecord,
    ) -> Self {
        self.split_history.push(InKeyspace {
            keyspace: keyspace.into(),
            record,
        });
        self
    }

    /// Add a named annotation row.
    pub fn with_named_annot(
        mut self,
        keyspace: &str,
        record: NamedAnnotRecord,
    ) -> Self {
        self.named_annotations.push(InKeyspace {
            keyspace: keyspace.into(),
            record,
        });
        self
    }

    /// Add an accession history row.
    pub fn with_accession_history(
        mut self,
        record: AccessionHistoryRecord,
    ) -> Self {
        self.accession_history.push(record);
        self
    }

    /// Add an identical protein group row.
    pub fn with_ipg(mut self, record: IpgRecord) -> Self {
        self.ipg.push(record);
        self
    }
}

/// The backend calls, for the op log and fault injection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendOp {
    /// [BackendStore::fetch_bioseq_info].
    BioseqInfo,
    /// [BackendStore::fetch_si2csi].
    Si2Csi,
    /// [BackendStore::fetch_blob_props].
    BlobProps,
    /// [BackendStore::stream_blob_chunks].
    BlobChunks,
    /// [BackendStore::fetch_split_history].
    SplitHistory,
    /// [BackendStore::fetch_named_annotations] on one keyspace.
    NamedAnnotations(Arc<str>),
    /// [BackendStore::fetch_accession_history].
    AccessionHistory,
    /// [BackendStore::fetch_ipg].
    Ipg,
}

/// Staged misbehavior of a backend call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Answer normally after a delay.
    Delay(Duration),
    /// Fail with this error.
    Fail(GwError),
    /// Never answer.
    Hang,
}

impl Fault {
    async fn apply(self) -> GwResult<()> {
        match self {
            Self::Delay(d) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
            Self::Fail(err) => Err(err),
            Self::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default)]
struct Staging {
    faults: HashMap<BackendOp, Fault>,
    log: Vec<BackendOp>,
    reverse_chunks: bool,
    chunk_delay: Option<Duration>,
}

/// The in-memory backend store.
#[derive(Debug)]
pub struct MemBackendStore {
    data: Mutex<BackendFixture>,
    staging: Mutex<Staging>,
}

impl MemBackendStore {
    /// A store answering from this fixture.
    pub fn new(fixture: BackendFixture) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(fixture),
            staging: Mutex::new(Staging::default()),
        })
    }

    /// Replace the fixture.
    pub fn set_fixture(&self, fixture: BackendFixture) {
        *self.data.lock().unwrap() = fixture;
    }

    /// Stage a fault for every later call of `op`.
    pub fn set_fault(&self, op: BackendOp, fault: Fault) {
        self.staging.lock().unwrap().faults.insert(op, fault);
    }

    /// Remove a staged fault.
    pub fn clear_fault(&self, op: &BackendOp) {
        self.staging.lock().unwrap().faults.remove(op);
    }

    /// Stream blob pieces last to first.
    pub fn set_reverse_chunks(&self, reverse: bool) {
        self.staging.lock().unwrap().reverse_chunks = reverse;
    }

    /// Delay every streamed blob piece.
    pub fn set_chunk_delay(&self, delay: Option<Duration>) {
        self.staging.lock().unwrap().chunk_delay = delay;
    }

    /// How many times `op` was called.
    pub fn op_count(&self, op: &BackendOp) -> usize {
        self.staging
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|o| *o == op)
            .count()
    }

    /// Every call so far, in call order.
    pub fn op_log(&self) -> Vec<BackendOp> {
        self.staging.lock().unwrap().log.clone()
    }

    fn enter(&self, op: BackendOp) -> Option<Fault> {
        let mut lock = self.staging.lock().unwrap();
        let fault = lock.faults.get(&op).cloned();
        lock.log.push(op);
        fault
    }

    async fn gate(&self, op: BackendOp) -> GwResult<()> {
        match self.enter(op) {
            Some(fault) => fault.apply().await,
            None => Ok(()),
        }
    }
}

impl BackendStore for MemBackendStore {
    fn fetch_bioseq_info(
        &self,
        query: BioseqInfoQuery,
    ) -> BoxFut<'_, GwResult<Vec<BioseqInfo>>> {
        Box::pin(async move {
            self.gate(BackendOp::BioseqInfo).await?;
            Ok(self
                .data
                .lock()
                .unwrap()
                .bioseq_info
                .iter()
                .filter(|r| query.matches(r))
                .cloned()
                .collect())
        })
    }

    fn fetch_si2csi(
        &self,
        query: Si2CsiQuery,
    ) -> BoxFut<'_, GwResult<Vec<Si2Csi>>> {
        Box::pin(async move {
            self.gate(BackendOp::Si2Csi).await?;
            Ok(self
                .data
                .lock()
                .unwrap()
                .si2csi
                .iter()
                .filter(|r| query.matches(r))
                .cloned()
                .collect())
        })
    }

    fn fetch_blob_props(
        &self,
        keyspace: Arc<str>,
        sat_key: i32,
        last_modified: Option<i64>,
    ) -> BoxFut<'_, GwResult<Option<BlobProps>>> {
        Box::pin(async move {
            self.gate(BackendOp::BlobProps).await?;
            Ok(self
                .data
                .lock()
                .unwrap()
                .blobs
                .iter()
                .filter(|b| {
                    *b.keyspace == *keyspace
                        && b.props.blob_id.sat_key == sat_key
                        && last_modified
                            .map(|lm| lm == b.props.last_modified)
                            .unwrap_or(true)
                })
                .max_by_key(|b| b.props.last_modified)
                .map(|b| b.props.clone()))
        })
    }

    fn stream_blob_chunks(
        &self,
        keyspace: Arc<str>,
        sat_key: i32,
        last_modified: i64,
    ) -> BoxStream<'static, GwResult<BlobChunk>> {
        let fault = self.enter(BackendOp::BlobChunks);
        let (reverse, chunk_delay) = {
            let lock = self.staging.lock().unwrap();
            (lock.reverse_chunks, lock.chunk_delay)
        };

        let mut items: VecDeque<BlobChunk> = self
            .data
            .lock()
            .unwrap()
            .blobs
            .iter()
            .find(|b| {
                *b.keyspace == *keyspace
                    && b.props.blob_id.sat_key == sat_key
                    && b.props.last_modified == last_modified
            })
            .map(|b| {
                b.chunks
                    .iter()
                    .enumerate()
                    .map(|(i, data)| BlobChunk {
                        chunk_no: i as u32,
                        data: bytes::Bytes::copy_from_slice(data.as_bytes()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        if reverse {
            items.make_contiguous().reverse();
        }

        futures::stream::unfold(
            (fault, items),
            move |(fault, mut items)| async move {
                if let Some(fault) = fault {
                    if let Err(err) = fault.apply().await {
                        return Some((Err(err), (None, VecDeque::new())));
                    }
                }
                let chunk = items.pop_front()?;
                if let Some(delay) = chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                Some((Ok(chunk), (None, items)))
            },
        )
        .boxed()
    }

    fn fetch_split_history(
        &self,
        keyspace: Arc<str>,
        sat_key: i32,
        split_version: Option<i32>,
    ) -> BoxFut<'_, GwResult<Vec<SplitHistoryRecord>>> {
        Box::pin(async move {
            self.gate(BackendOp::SplitHistory).await?;
            Ok(self
                .data
                .lock()
                .unwrap()
                .split_history
                .iter()
                .filter(|r| {
                    *r.keyspace == *keyspace
                        && r.record.sat_key == sat_key
                        && split_version
                            .map(|v| v == r.record.split_version)
                            .unwrap_or(true)
                })
                .map(|r| r.record.clone())
                .collect())
        })
    }

    fn fetch_named_annotations(
        &self,
        keyspace: Arc<str>,
        accession: String,
        version: i16,
        seq_id_type: SeqIdType,
        names: Vec<String>,
    ) -> BoxFut<'_, GwResult<Vec<NamedAnnotRecord>>> {
        Box::pin(async move {
            self.gate(BackendOp::NamedAnnotations(keyspace.clone()))
                .await?;
            Ok(self
                .data
                .lock()
                .unwrap()
                .named_annotations
                .iter()
                .filter(|r| {
                    *r.keyspace == *keyspace
                        && r.record.accession.eq_ignore_ascii_case(&accession)
                        && r.record.version == version
                        && r.record.seq_id_type == seq_id_type
                        && names.contains(&r.record.annot_name)
                })
                .map(|r| r.record.clone())
                .collect())
        })
    }

    fn fetch_accession_history(
        &self,
        accession: String,
        seq_id_type: SeqIdType,
    ) -> BoxFut<'_, GwResult<Vec<AccessionHistoryRecord>>> {
        Box::pin(async move {
            self.gate(BackendOp::AccessionHistory).await?;
            let mut out: Vec<_> = self
                .data
                .lock()
                .unwrap()
                .accession_history
                .iter()
                .filter(|r| {
                    r.accession.eq_ignore_ascii_case(&accession)
                        && r.seq_id_type == seq_id_type
                })
                .cloned()
                .collect();
            out.sort_by(|a, b| b.version.cmp(&a.version));
            Ok(out)
        })
    }

    fn fetch_ipg(
        &self,
        query: IpgQuery,
    ) -> BoxFut<'_, GwResult<Vec<IpgRecord>>> {
        Box::pin(async move {
            self.gate(BackendOp::Ipg).await?;
            Ok(self
                .data
                .lock()
                .unwrap()
                .ipg
                .iter()
                .filter(|r| {
                    query
                        .protein
                        .as_ref()
                        .map(|p| p.eq_ignore_ascii_case(&r.protein))
                        .unwrap_or(true)
                        && query
                            .nucleotide
                            .as_ref()
                            .map(|n| {
                                r.nucleotide
                                    .as_ref()
                                    .map(|rn| rn.eq_ignore_ascii_case(n))
                                    .unwrap_or(false)
                            })
                            .unwrap_or(true)
                        && query.ipg.map(|g| g == r.ipg).unwrap_or(true)
                })
                .cloned()
                .collect())
        })
    }
}

/// Creates [MemBackendStore]s.
#[derive(Debug)]
pub struct MemBackendStoreFactory {
    store: Option<Arc<MemBackendStore>>,
}

impl MemBackendStoreFactory {
    /// Construct a new MemBackendStoreFactory, loading the configured
    /// fixture (if any) on create.
    pub fn create() -> DynBackendStoreFactory {
        Arc::new(Self { store: None })
    }

    /// A factory handing out this exact store, so a test can keep a
    /// handle on it.
    pub fn with_store(store: Arc<MemBackendStore>) -> DynBackendStoreFactory {
        Arc::new(Self { store: Some(store) })
    }
}

impl BackendStoreFactory for MemBackendStoreFactory {
    fn default_config(&self, config: &Config) -> GwResult<()> {
        config.add_default_module_config::<MemBackendModConfig>()
    }

    fn create(
        &self,
        config: Arc<Config>,
    ) -> BoxFut<'static, GwResult<DynBackendStore>> {
        let store = self.store.clone();
        Box::pin(async move {
            if let Some(store) = store {
                let out: DynBackendStore = store;
                return Ok(out);
            }
            let config: MemBackendModConfig = config.get_module_config()?;
            let fixture = match &config.mem_backend.fixture_path {
                Some(path) => {
                    let fixture = BackendFixture::load(path)?;
                    tracing::info!(
                        %path,
                        bioseq_info = fixture.bioseq_info.len(),
                        blobs = fixture.blobs.len(),
                        "loaded backend fixture",
                    );
                    fixture
                }
                None => BackendFixture::default(),
            };
            let out: DynBackendStore = MemBackendStore::new(fixture);
            Ok(out)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn props(sat_key: i32, last_modified: i64) -> BlobProps {
        BlobProps {
            blob_id: BlobId::new(4, sat_key),
            last_modified,
            size: 6,
            n_chunks: 2,
            id2_info: None,
            gzip: false,
            withdrawn: false,
        }
    }

    fn store() -> Arc<MemBackendStore> {
        MemBackendStore::new(
            BackendFixture::default()
                .with_blob("ks", props(7, 10), ["abc", "def"])
                .with_blob("ks", props(7, 20), ["ghi", "jkl"]),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn props_latest_or_exact() {
        let s = store();
        let got = s.fetch_blob_props("ks".into(), 7, None).await.unwrap();
        assert_eq!(20, got.unwrap().last_modified);
        let got = s.fetch_blob_props("ks".into(), 7, Some(10)).await.unwrap();
        assert_eq!(10, got.unwrap().last_modified);
        let got = s.fetch_blob_props("ks".into(), 7, Some(15)).await.unwrap();
        assert!(got.is_none());
        let got = s.fetch_blob_props("other".into(), 7, None).await.unwrap();
        assert!(got.is_none());
        assert_eq!(4, s.op_count(&BackendOp::BlobProps));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn chunks_reversed_on_request() {
        let s = store();
        s.set_reverse_chunks(true);
        let got: Vec<_> = s
            .stream_blob_chunks("ks".into(), 7, 10)
            .map(|r| r.unwrap().chunk_no)
            .collect()
            .await;
        assert_eq!(vec![1, 0], got);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn staged_failure() {
        let s = store();
        s.set_fault(BackendOp::BlobChunks, Fault::Fail(GwError::backend("x")));
        let got: Vec<_> =
            s.stream_blob_chunks("ks".into(), 7, 10).collect().await;
        assert_eq!(1, got.len());
        assert_eq!(502, got[0].as_ref().unwrap_err().status_code());

        s.clear_fault(&BackendOp::BlobChunks);
        let got: Vec<_> =
            s.stream_blob_chunks("ks".into(), 7, 10).collect().await;
        assert_eq!(2, got.len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn factory_loads_fixture_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.json");
        let fixture = BackendFixture::default().with_blob(
            "ks",
            props(1, 1),
            ["x"],
        );
        std::fs::write(&path, serde_json::to_string(&fixture).unwrap())
            .unwrap();

        let config = Config::default();
        config
            .set_module_config(&MemBackendModConfig {
                mem_backend: MemBackendConfig {
                    fixture_path: Some(path.to_string_lossy().to_string()),
                },
            })
            .unwrap();
        let store = MemBackendStoreFactory::create()
            .create(Arc::new(config))
            .await
            .unwrap();
        assert!(store
            .fetch_blob_props("ks".into(), 1, None)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn factory_fails_on_missing_fixture() {
        let config = Config::default();
        config
            .set_module_config(&MemBackendModConfig {
                mem_backend: MemBackendConfig {
                    fixture_path: Some("/nonexistent/fixture.json".into()),
                },
            })
            .unwrap();
        assert!(MemBackendStoreFactory::create()
            .create(Arc::new(config))
            .await
            .is_err());
    }
}
