//! The reply sink contract.
//!
//! Processors never write bytes. They hand typed [ReplyChunk]s to a
//! [ReplySink], which owns ordering, buffering, and the wire format.

use crate::*;

/// Severity of a reply message.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    /// Request tracing.
    Trace,
    /// Informational.
    Info,
    /// Something was skipped or degraded.
    Warning,
    /// The request (or part of it) failed.
    Error,
    /// Internal inconsistency.
    Critical,
}

/// Why a blob was not sent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ExcludeReason {
    /// The same client received this blob recently.
    SentRecently,
    /// Another request of the same client is sending it right now.
    InProgress,
}

/// One unit of output.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "item", rename_all = "camelCase")]
pub enum ReplyChunk {
    /// Sequence metadata.
    #[serde(rename_all = "camelCase")]
    BioseqInfo {
        /// The record.
        record: BioseqInfo,
    },

    /// Blob properties.
    #[serde(rename_all = "camelCase")]
    BlobProps {
        /// The properties.
        props: BlobProps,
    },

    /// A piece of blob data. Pieces of one blob are sent in ascending
    /// `chunk_no` order, the final piece has `last` set and may be empty.
    #[serde(rename_all = "camelCase")]
    BlobData {
        /// The blob.
        blob_id: BlobId,
        /// Piece number.
        chunk_no: u32,
        /// No more data follows for this blob.
        last: bool,
        /// The data.
        #[serde(with = "crate::serde_bytes_base64")]
        data: bytes::Bytes,
    },

    /// A blob was deliberately not sent.
    #[serde(rename_all = "camelCase")]
    BlobExcluded {
        /// The blob.
        blob_id: BlobId,
        /// Why.
        reason: ExcludeReason,
        /// For [ExcludeReason::SentRecently]: how long ago, in microseconds.
        sent_ago_us: Option<u64>,
    },

    /// A named annotation.
    #[serde(rename_all = "camelCase")]
    NamedAnnot {
        /// The record.
        record: NamedAnnotRecord,
    },

    /// Final per-name status for annotation names that were not found.
    #[serde(rename_all = "camelCase")]
    AnnotStatus {
        /// The annotation name.
        name: String,
        /// Status code.
        status: u16,
    },

    /// An accession history entry.
    #[serde(rename_all = "camelCase")]
    AccessionHistory {
        /// The record.
        record: AccessionHistoryRecord,
    },

    /// An identical protein group row.
    #[serde(rename_all = "camelCase")]
    Ipg {
        /// The record.
        record: IpgRecord,
    },

    /// A human readable message.
    #[serde(rename_all = "camelCase")]
    Message {
        /// Severity.
        severity: Severity,
        /// Status code.
        status: u16,
        /// Text.
        text: String,
    },

    /// The reply is complete.
    #[serde(rename_all = "camelCase")]
    Completion {
        /// Overall status code.
        status: u16,
    },
}

/// Ordered, flushable output channel to one client.
pub trait ReplySink: 'static + Send + Sync {
    /// Queue a chunk. Chunks are delivered in the order prepared.
    fn prepare(&mut self, chunk: ReplyChunk);

    /// Push queued chunks towards the client without blocking. An error
    /// means the client is gone.
    fn flush(&mut self) -> GwResult<()>;

    /// True while the sink can take more data without growing its queue
    /// past its window.
    fn is_output_ready(&self) -> bool;

    /// True once a completion chunk was prepared.
    fn is_finished(&self) -> bool;

    /// True when no prepared chunk is waiting inside the sink.
    fn is_drained(&self) -> bool;

    /// Resolves when the sink may have become ready again.
    fn writable(&self) -> BoxFut<'_, ()>;

    /// Queue a message chunk.
    fn prepare_message(&mut self, severity: Severity, status: u16, text: String) {
        self.prepare(ReplyChunk::Message {
            severity,
            status,
            text,
        });
    }

    /// Queue a blob data chunk.
    fn prepare_data_chunk(
        &mut self,
        blob_id: BlobId,
        chunk_no: u32,
        data: bytes::Bytes,
        last: bool,
    ) {
        self.prepare(ReplyChunk::BlobData {
            blob_id,
            chunk_no,
            last,
            data,
        });
    }

    /// Queue the completion chunk.
    fn prepare_completion(&mut self, status: u16) {
        self.prepare(ReplyChunk::Completion { status });
    }
}

/// Trait object [ReplySink].
pub type DynReplySink = Box<dyn ReplySink>;
