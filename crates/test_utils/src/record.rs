//! Record builders for fixtures.
//!
//! Fields not named by the builder get plausible fixed values.

use seqgate_api::*;

/// Canonical metadata of `accession.version`, stored in blob `sat.sat_key`.
pub fn bioseq_info(
    accession: &str,
    version: i16,
    gi: Option<i64>,
    blob_id: BlobId,
) -> BioseqInfo {
    BioseqInfo {
        accession: accession.into(),
        version,
        seq_id_type: SeqIdType::Other,
        gi,
        name: None,
        blob_id,
        length: 1000,
        mol: 1,
        tax_id: 9606,
        hash: 42,
        date_changed: 1_700_000_000_000,
        seq_ids: Vec::new(),
    }
}

/// A secondary id mapping to `accession.version`.
pub fn si2csi(
    sec_seq_id: &str,
    sec_seq_id_type: SeqIdType,
    accession: &str,
    version: i16,
) -> Si2Csi {
    Si2Csi {
        sec_seq_id: sec_seq_id.into(),
        sec_seq_id_type,
        accession: accession.into(),
        version,
        seq_id_type: SeqIdType::Other,
        gi: None,
    }
}

/// The gi of `accession.version` as a secondary id.
pub fn gi_si2csi(gi: i64, accession: &str, version: i16) -> Si2Csi {
    Si2Csi {
        gi: Some(gi),
        ..si2csi(&gi.to_string(), SeqIdType::Gi, accession, version)
    }
}

/// Unsplit blob properties.
pub fn blob_props(
    blob_id: BlobId,
    last_modified: i64,
    size: i64,
    n_chunks: u32,
) -> BlobProps {
    BlobProps {
        blob_id,
        last_modified,
        size,
        n_chunks,
        id2_info: None,
        gzip: false,
        withdrawn: false,
    }
}

/// `n` data pieces of `size` bytes each, their text naming the blob and
/// the piece.
pub fn blob_pieces(blob_id: BlobId, n: u32, size: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let mut s = format!("{blob_id}#{i}:");
            while s.len() < size {
                s.push('x');
            }
            s
        })
        .collect()
}

/// A named annotation of `accession.version`.
pub fn named_annot(
    accession: &str,
    version: i16,
    annot_name: &str,
    blob_id: BlobId,
) -> NamedAnnotRecord {
    NamedAnnotRecord {
        accession: accession.into(),
        version,
        seq_id_type: SeqIdType::Other,
        annot_name: annot_name.into(),
        blob_id,
        start: 0,
        stop: 1000,
        annot_info: serde_json::json!({ "featCount": 1 }),
    }
}

/// Split history of the object at `id2.info`.
pub fn split_history(id2: Id2Info) -> SplitHistoryRecord {
    SplitHistoryRecord {
        sat_key: id2.info,
        split_version: id2.split_version,
        modified: 1_700_000_000_000,
        id2_info: id2,
    }
}

/// One version of an accession.
pub fn accession_history(
    accession: &str,
    version: i16,
    gi: Option<i64>,
    blob_id: BlobId,
) -> AccessionHistoryRecord {
    AccessionHistoryRecord {
        accession: accession.into(),
        version,
        seq_id_type: SeqIdType::Other,
        gi,
        blob_id,
        chain: None,
        date_changed: 1_700_000_000_000 + version as i64,
    }
}

/// An identical protein group row.
pub fn ipg(ipg: i64, protein: &str, nucleotide: Option<&str>) -> IpgRecord {
    IpgRecord {
        ipg,
        protein: protein.into(),
        nucleotide: nucleotide.map(Into::into),
        product_name: Some("hypothetical protein".into()),
        tax_id: 562,
        start: 1,
        stop: 300,
    }
}
