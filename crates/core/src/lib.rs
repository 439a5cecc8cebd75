#![deny(missing_docs)]
//! Seqgate sequence-data gateway engine.
//!
//! One request becomes a chain of processors, each a non-blocking state
//! machine over a remote [BackendStore](seqgate_api::BackendStore) and an
//! optional [LocalCache](seqgate_api::LocalCache). Partial answers of
//! several processors are merged through a per request coverage set, split
//! blobs are re-sequenced chunk by chunk, and a per client exclude cache
//! keeps large blobs from being sent twice in a short time.

use std::sync::Arc;

pub mod builder;
pub use builder::{Builder, Gateway};

pub mod context;
pub mod coverage;
pub mod dispatch;
pub mod exclude_cache;
pub mod factories;
pub mod fetch;
pub mod processor;
pub mod request_ctx;
pub mod resolver;
pub mod split;

#[cfg(test)]
pub(crate) mod test_support;

/// The processor factories of a default gateway, most authoritative first.
pub fn default_processors() -> Vec<processor::DynProcessorFactory> {
    vec![
        factories::ResolveProcessorFactory::create(),
        factories::GetBlobProcessorFactory::create(),
        factories::BlobByKeyProcessorFactory::create(),
        factories::AnnotProcessorFactory::create(),
        factories::TseChunkProcessorFactory::create(),
        factories::HistoryProcessorFactory::create(),
        factories::IpgResolveProcessorFactory::create(),
    ]
}

/// Construct a default builder.
///
/// - `backend` - The default backend is [factories::MemBackendStoreFactory],
///   serving the `memBackend.fixturePath` fixture.
/// - `local_cache` - The default local cache is
///   [factories::MemLocalCacheFactory], loading `localCache.snapshotPath`.
/// - `processors` - See [default_processors].
pub fn default_builder() -> Builder {
    Builder {
        config: seqgate_api::config::Config::default(),
        backend: factories::MemBackendStoreFactory::create(),
        local_cache: Some(factories::MemLocalCacheFactory::create()),
        processors: default_processors(),
    }
}

/// Construct a default builder over an existing in-memory store, so the
/// caller can stage fixtures and faults on it.
pub fn default_test_builder(
    store: Arc<factories::MemBackendStore>,
) -> Builder {
    Builder {
        backend: factories::MemBackendStoreFactory::with_store(store),
        ..default_builder()
    }
}
