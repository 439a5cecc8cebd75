//! Records returned by the backend store and the local cache.
//!
//! All records are plain serde types. The backend fixture format and the
//! local cache snapshot format are simply json documents of these.

use crate::*;

/// Canonical metadata of a sequence.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BioseqInfo {
    /// Canonical accession, without version.
    pub accession: String,
    /// Canonical version.
    pub version: i16,
    /// Canonical seq id type.
    pub seq_id_type: SeqIdType,
    /// The gi, if the sequence has one.
    #[serde(default)]
    pub gi: Option<i64>,
    /// Optional name (locus).
    #[serde(default)]
    pub name: Option<String>,
    /// The blob holding the sequence entry.
    pub blob_id: BlobId,
    /// Sequence length.
    #[serde(default)]
    pub length: i64,
    /// Molecule type code.
    #[serde(default)]
    pub mol: i8,
    /// Taxonomy id.
    #[serde(default)]
    pub tax_id: i64,
    /// Sequence hash.
    #[serde(default)]
    pub hash: i32,
    /// Last change, ms since epoch.
    #[serde(default)]
    pub date_changed: i64,
    /// Other ids of this sequence, as (type, text).
    #[serde(default)]
    pub seq_ids: Vec<(SeqIdType, String)>,
}

impl BioseqInfo {
    /// "accession.version".
    pub fn versioned_accession(&self) -> String {
        format!("{}.{}", self.accession, self.version)
    }
}

/// Secondary id to canonical id mapping.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Si2Csi {
    /// The secondary id text (upper-cased for accessions).
    pub sec_seq_id: String,
    /// The secondary id type.
    pub sec_seq_id_type: SeqIdType,
    /// Canonical accession.
    pub accession: String,
    /// Canonical version.
    pub version: i16,
    /// Canonical seq id type.
    pub seq_id_type: SeqIdType,
    /// Canonical gi, if any.
    #[serde(default)]
    pub gi: Option<i64>,
}

/// Blob properties.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobProps {
    /// The blob these properties describe.
    pub blob_id: BlobId,
    /// Last modification, ms since epoch.
    pub last_modified: i64,
    /// Total blob size in bytes.
    pub size: i64,
    /// Number of storage chunks the blob data is cut into.
    pub n_chunks: u32,
    /// Split descriptor, when the blob is split.
    #[serde(default)]
    pub id2_info: Option<Id2Info>,
    /// Blob is gzip compressed.
    #[serde(default)]
    pub gzip: bool,
    /// Blob is withdrawn / suppressed.
    #[serde(default)]
    pub withdrawn: bool,
}

/// One piece of blob data as stored in the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobChunk {
    /// Zero based position of this piece within the blob.
    pub chunk_no: u32,
    /// The data.
    pub data: bytes::Bytes,
}

/// Split history: which id2 info a split version of an object had.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitHistoryRecord {
    /// The object (sat key of the split-info blob).
    pub sat_key: i32,
    /// Split version.
    pub split_version: i32,
    /// Modification time, ms since epoch.
    #[serde(default)]
    pub modified: i64,
    /// The split layout of that version.
    pub id2_info: Id2Info,
}

/// A named annotation attached to a sequence.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedAnnotRecord {
    /// Canonical accession of the annotated sequence.
    pub accession: String,
    /// Canonical version.
    pub version: i16,
    /// Canonical seq id type.
    pub seq_id_type: SeqIdType,
    /// Annotation name.
    pub annot_name: String,
    /// Blob holding the annotation.
    pub blob_id: BlobId,
    /// Annotated range start.
    #[serde(default)]
    pub start: i64,
    /// Annotated range stop.
    #[serde(default)]
    pub stop: i64,
    /// Feature counts etc., opaque to the gateway.
    #[serde(default)]
    pub annot_info: serde_json::Value,
}

/// One entry of an accession's history.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessionHistoryRecord {
    /// Accession.
    pub accession: String,
    /// Version this entry describes.
    pub version: i16,
    /// Seq id type.
    pub seq_id_type: SeqIdType,
    /// Gi of this version.
    #[serde(default)]
    pub gi: Option<i64>,
    /// Blob holding this version.
    pub blob_id: BlobId,
    /// Replaced-by / replaces chain pointer.
    #[serde(default)]
    pub chain: Option<i64>,
    /// Change date, ms since epoch.
    #[serde(default)]
    pub date_changed: i64,
}

/// An identical-protein-group report row.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpgRecord {
    /// Group id.
    pub ipg: i64,
    /// Protein accession.version.
    pub protein: String,
    /// Nucleotide accession.version, if any.
    #[serde(default)]
    pub nucleotide: Option<String>,
    /// Product name.
    #[serde(default)]
    pub product_name: Option<String>,
    /// Taxonomy id.
    #[serde(default)]
    pub tax_id: i64,
    /// Nucleotide start position.
    #[serde(default)]
    pub start: i64,
    /// Nucleotide stop position.
    #[serde(default)]
    pub stop: i64,
}
