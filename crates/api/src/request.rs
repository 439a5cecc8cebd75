//! Inbound request types.

use crate::*;

/// Where metadata lookups may be answered from.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum CachePolicy {
    /// Only the local cache, never the backend.
    CacheOnly,
    /// Only the backend, never the local cache.
    DbOnly,
    /// Local cache first, backend on miss.
    #[default]
    Either,
}

impl CachePolicy {
    /// May the local cache be consulted.
    pub fn use_cache(&self) -> bool {
        !matches!(self, Self::DbOnly)
    }

    /// May the backend be consulted.
    pub fn use_db(&self) -> bool {
        !matches!(self, Self::CacheOnly)
    }
}

/// What to send for the blob of a get-by-id request.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum TseOption {
    /// Blob properties only.
    None,
    /// Split info if the blob is split, otherwise properties only.
    Slim,
    /// Split info if the blob is split, otherwise the whole blob.
    #[default]
    Smart,
    /// Split info plus every chunk if split, otherwise the whole blob.
    Whole,
    /// The original, unsplit blob.
    Orig,
}

/// A sequence range, inclusive start, exclusive stop.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
pub struct SeqRange {
    /// Start position.
    pub start: i64,
    /// Stop position.
    pub stop: i64,
}

impl SeqRange {
    /// Reject empty or negative ranges.
    pub fn validate(&self) -> GwResult<()> {
        if self.start < 0 || self.stop <= self.start {
            return Err(GwError::client(format!(
                "invalid range {}-{}",
                self.start, self.stop
            )));
        }
        Ok(())
    }
}

/// The different kinds of requests the gateway serves.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestKind {
    /// Resolve an identifier to canonical metadata.
    #[serde(rename_all = "camelCase")]
    Resolve {
        /// The identifier.
        seq_id: SeqId,
        /// Send every field, not only the canonical id.
        #[serde(default)]
        all_info: bool,
    },

    /// Resolve an identifier and send its blob.
    #[serde(rename_all = "camelCase")]
    GetBlobById {
        /// The identifier.
        seq_id: SeqId,
        /// What to send.
        #[serde(default)]
        tse: TseOption,
        /// Optional range of interest.
        #[serde(default)]
        range: Option<SeqRange>,
    },

    /// Send a blob by its storage key.
    #[serde(rename_all = "camelCase")]
    GetBlobByKey {
        /// The blob.
        blob_id: BlobId,
        /// Expected last modification; mismatch is not found.
        #[serde(default)]
        last_modified: Option<i64>,
    },

    /// Send the named annotations of a sequence.
    #[serde(rename_all = "camelCase")]
    GetAnnotations {
        /// The identifier.
        seq_id: SeqId,
        /// Annotation names.
        names: Vec<String>,
    },

    /// Send one chunk of a split blob.
    #[serde(rename_all = "camelCase")]
    GetBlobChunk {
        /// Split descriptor text, `sat.info.chunks[.split_version]`.
        id2_info: String,
        /// Chunk number, 0 is the split-info chunk.
        chunk_no: i32,
    },

    /// Send the accession history of a sequence.
    #[serde(rename_all = "camelCase")]
    GetHistory {
        /// The identifier.
        seq_id: SeqId,
    },

    /// Identical protein group lookup by protein and/or nucleotide.
    #[serde(rename_all = "camelCase")]
    IpgResolve {
        /// Protein identifier.
        #[serde(default)]
        protein: Option<SeqId>,
        /// Nucleotide identifier.
        #[serde(default)]
        nucleotide: Option<SeqId>,
        /// Group id.
        #[serde(default)]
        ipg: Option<i64>,
    },
}

impl RequestKind {
    /// Short request kind name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Resolve { .. } => "resolve",
            Self::GetBlobById { .. } => "get",
            Self::GetBlobByKey { .. } => "getblob",
            Self::GetAnnotations { .. } => "get_na",
            Self::GetBlobChunk { .. } => "get_tse_chunk",
            Self::GetHistory { .. } => "accession_version_history",
            Self::IpgResolve { .. } => "ipg_resolve",
        }
    }

    /// True for kinds that several processors may answer piecemeal.
    /// Every other kind is finished by the first processor that finds
    /// something.
    pub fn supports_partial_coverage(&self) -> bool {
        matches!(self, Self::GetAnnotations { .. })
    }
}

/// Per request options.
#[derive(
    Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    /// Send trace messages to the client.
    pub trace: bool,
    /// Where metadata may come from.
    pub cache_policy: CachePolicy,
    /// The client, for exclude-cache bookkeeping.
    pub client_id: Option<ClientId>,
    /// Override of the configured blob resend timeout.
    pub resend_timeout_ms: Option<u64>,
}

/// One inbound request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Request {
    /// What is requested.
    #[serde(flatten)]
    pub kind: RequestKind,
    /// How.
    #[serde(default)]
    pub options: RequestOptions,
}

impl Request {
    /// A request with default options.
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            options: RequestOptions::default(),
        }
    }

    /// Builder-style option setter.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_from_json() {
        let r: Request = serde_json::from_str(
            r#"{
              "type": "getAnnotations",
              "seqId": "NC_000001.11",
              "names": ["NA000000001.1", "SNP"],
              "options": { "trace": true, "clientId": "c1" }
            }"#,
        )
        .unwrap();
        assert_eq!("get_na", r.kind.name());
        assert!(r.kind.supports_partial_coverage());
        assert!(r.options.trace);
        assert_eq!(CachePolicy::Either, r.options.cache_policy);
        assert_eq!(Some(ClientId::from("c1")), r.options.client_id);
    }

    #[test]
    fn bad_seq_id_rejected_at_parse() {
        assert!(serde_json::from_str::<Request>(
            r#"{ "type": "resolve", "seqId": "gi|x" }"#
        )
        .is_err());
    }

    #[test]
    fn range_validation() {
        assert!(SeqRange { start: 0, stop: 10 }.validate().is_ok());
        assert!(SeqRange { start: 10, stop: 10 }.validate().is_err());
        assert!(SeqRange { start: -1, stop: 10 }.validate().is_err());
    }

    #[test]
    fn cache_policy_flags() {
        assert!(CachePolicy::Either.use_cache());
        assert!(CachePolicy::Either.use_db());
        assert!(!CachePolicy::DbOnly.use_cache());
        assert!(!CachePolicy::CacheOnly.use_db());
    }
}
