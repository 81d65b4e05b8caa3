pub mod hash;
pub mod keys;

pub use hash::{hybrid_digest, sha3_256, Hash256};
