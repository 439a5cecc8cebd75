//! Test utilities associated with ids.

use rand::Rng;
use seqgate_api::{ClientId, SeqId};

/// Create a random client id.
pub fn random_client_id() -> ClientId {
    let n: u64 = rand::thread_rng().gen();
    ClientId::from(format!("client-{n:016x}"))
}

/// Parse a seq id, panicking on bad input.
pub fn seq_id(s: &str) -> SeqId {
    SeqId::parse(s).unwrap()
}
