//! Factories for the processors, backend stores, local caches and reply
//! sinks shipped with seqgate.

pub(crate) mod blob_send;

mod resolve;
pub use resolve::*;

mod get_blob;
pub use get_blob::*;

mod blob_by_key;
pub use blob_by_key::*;

pub mod annot;
pub use annot::{AnnotNameFilter, AnnotProcessor, AnnotProcessorFactory};

mod tse_chunk;
pub use tse_chunk::*;

mod history;
pub use history::*;

pub mod ipg_resolve;
pub use ipg_resolve::{IpgResolveProcessor, IpgResolveProcessorFactory};

pub mod mem_backend;
pub use mem_backend::{
    BackendFixture, BackendOp, Fault, MemBackendStore, MemBackendStoreFactory,
};

pub mod mem_local_cache;
pub use mem_local_cache::{
    LocalCacheSnapshot, MemLocalCache, MemLocalCacheFactory,
};

mod mem_reply;
pub use mem_reply::*;
