#![deny(missing_docs)]
//! Seqgate API contains the traits and plain data types shared by the
//! sequence-data gateway modules: requests, records, statuses, errors,
//! module configuration, and the backend store / local cache / reply sink
//! contracts.
//!
//! If you want to run a gateway, please see the seqgate_core crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub(crate) mod serde_bytes_base64 {
    pub fn serialize<S>(
        b: &bytes::Bytes,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use base64::prelude::*;
        serializer.serialize_str(&BASE64_STANDARD.encode(b))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bytes::Bytes, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use base64::prelude::*;
        let s: String = serde::Deserialize::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(s)
            .map(bytes::Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

pub mod config;

mod error;
pub use error::*;

pub mod id;
pub use id::{BlobId, ClientId, Id2Info, SeqId, SeqIdType};

mod record;
pub use record::*;

mod request;
pub use request::*;

mod status;
pub use status::*;

mod reply;
pub use reply::*;

mod backend;
pub use backend::*;
