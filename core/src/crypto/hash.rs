use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// 256-bit digest used everywhere in consensus.
///
/// Byte order is big-endian when interpreted as an integer, so the derived
/// `Ord` (lexicographic over the array) is exactly the numeric ordering the
/// hash-vs-target comparison needs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// All bits set — the largest representable target.
    pub const MAX: Hash256 = Hash256([0xff; 32]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Some(Hash256(out))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        hex::decode(s).ok().and_then(|b| Self::from_slice(&b))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({}…)", &self.to_hex()[..16])
    }
}

// Digests serialize as lowercase hex so storage values and audit details
// stay greppable.
impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash256::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid 32-byte hex digest"))
    }
}

/// Canonical digest: SHA3-256.
pub fn sha3_256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&out);
    Hash256(bytes)
}

/// Digest over two concatenated nodes — the Merkle inner step.
pub fn sha3_256_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha3_256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    let out = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&out);
    Hash256(bytes)
}

/// Hybrid work digest: BLAKE3 over the SHA3-256 of the input.
///
/// Used for proof-of-work contribution checks (`validate_work`); the
/// canonical header hash stays plain SHA3-256.
pub fn hybrid_digest(data: &[u8]) -> Hash256 {
    let inner = sha3_256(data);
    let out = blake3::hash(&inner.0);
    Hash256(*out.as_bytes())
}
