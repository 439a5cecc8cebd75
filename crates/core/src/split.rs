//! Split blob arithmetic and satellite to keyspace mapping.
//!
//! A split blob is described by an [Id2Info] `sat.info.chunks[.version]`.
//! Chunk 0 is the split-info ("index") blob stored at key `info`. Data
//! chunks `1..=chunks` are stored at the keys right below it, chunk `n` at
//! `info - chunks - 1 + n`.

use seqgate_api::*;
use std::collections::HashMap;
use std::sync::Arc;

/// The chunk number addressing the split-info blob itself.
pub const INDEX_CHUNK: i32 = 0;

/// Storage key of chunk `chunk_no` of a split blob.
pub fn chunk_sat_key(id2: &Id2Info, chunk_no: i32) -> GwResult<i32> {
    validate_chunk_no(id2, chunk_no)?;
    if chunk_no == INDEX_CHUNK {
        return Ok(id2.info);
    }
    Ok(id2.info - id2.chunks - 1 + chunk_no)
}

/// Reject chunk numbers outside `0..=chunks`.
pub fn validate_chunk_no(id2: &Id2Info, chunk_no: i32) -> GwResult<()> {
    if chunk_no < 0 || chunk_no > id2.chunks {
        return Err(GwError::client(format!(
            "chunk {chunk_no} out of range for id2 info {id2} ({} chunks)",
            id2.chunks
        )));
    }
    Ok(())
}

/// Blob ids of the data chunks of a split blob, in chunk order.
pub fn data_chunk_blob_ids(id2: &Id2Info) -> Vec<(i32, BlobId)> {
    (1..=id2.chunks)
        .map(|n| (n, BlobId::new(id2.sat, id2.info - id2.chunks - 1 + n)))
        .collect()
}

/// Maps satellite numbers to backend keyspace names.
#[derive(Debug, Clone, Default)]
pub struct SatMap(HashMap<i32, Arc<str>>);

impl SatMap {
    /// Construct from configured `(sat, keyspace)` pairs.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i32, S)>,
        S: AsRef<str>,
    {
        Self(
            entries
                .into_iter()
                .map(|(sat, ks)| (sat, ks.as_ref().into()))
                .collect(),
        )
    }

    /// The keyspace of a satellite. An unknown satellite is a client
    /// error: blob ids come from the client or from records it asked for.
    pub fn keyspace(&self, sat: i32) -> GwResult<Arc<str>> {
        self.0
            .get(&sat)
            .cloned()
            .ok_or_else(|| GwError::client(format!("unknown satellite {sat}")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id2() -> Id2Info {
        "4.1000.5".parse().unwrap()
    }

    #[test]
    fn index_chunk_is_info_key() {
        assert_eq!(1000, chunk_sat_key(&id2(), INDEX_CHUNK).unwrap());
    }

    #[test]
    fn data_chunks_below_info() {
        assert_eq!(995, chunk_sat_key(&id2(), 1).unwrap());
        assert_eq!(999, chunk_sat_key(&id2(), 5).unwrap());
        let ids = data_chunk_blob_ids(&id2());
        assert_eq!(5, ids.len());
        assert_eq!((1, BlobId::new(4, 995)), ids[0]);
        assert_eq!((5, BlobId::new(4, 999)), ids[4]);
    }

    #[test]
    fn out_of_range_is_client_error() {
        for n in [-1, 6, 100] {
            let err = chunk_sat_key(&id2(), n).unwrap_err();
            assert_eq!(400, err.status_code(), "{n}");
        }
    }

    #[test]
    fn sat_map_lookup() {
        let m = SatMap::new([(4, "satncbi_extended")]);
        assert_eq!("satncbi_extended", &*m.keyspace(4).unwrap());
        assert_eq!(400, m.keyspace(5).unwrap_err().status_code());
    }
}
