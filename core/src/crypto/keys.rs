use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::crypto::hash::sha3_256;

const NOVARA_BASE32_ALPHABET: &[u8; 32] = b"023456789acdefghjklmnpqrstuvwxyz";

/// Verify an Ed25519 signature over `msg`.
///
/// The wire scheme is nominally hybrid (classical + PQ slot); only the
/// classical half is carried here — the second slot is ignored by consensus
/// and reserved for a future network upgrade.
pub fn verify(public_key_bytes: &[u8], msg: &[u8], signature_bytes: &[u8]) -> bool {
    let pk_array: [u8; 32] = match public_key_bytes.try_into() {
        Ok(arr) => arr,
        Err(_) => return false,
    };

    let public_key = match VerifyingKey::from_bytes(&pk_array) {
        Ok(pk) => pk,
        Err(_) => return false,
    };

    let signature_array: [u8; 64] = match signature_bytes.try_into() {
        Ok(arr) => arr,
        Err(_) => return false,
    };

    let signature = Signature::from_bytes(&signature_array);

    public_key.verify(msg, &signature).is_ok()
}

/// Signing keypair. Lives only in miner / validator processes; consensus
/// code paths never require a secret key.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing: SigningKey::generate(&mut csprng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.signing.sign(msg).to_bytes().to_vec()
    }

    pub fn address(&self) -> String {
        address_from_public_key(&self.public_key_bytes())
    }
}

/// Derive a `nvr1...` address from public key bytes.
///
/// SHA3-256(pubkey) → first 20 bytes → base32 body (40 chars) → 4-char
/// checksum over `"nvr1" + body`.
pub fn address_from_public_key(public_key_bytes: &[u8]) -> String {
    let key_hash = sha3_256(public_key_bytes);

    let mut body = String::with_capacity(40);
    for &byte in &key_hash.0[..20] {
        body.push(NOVARA_BASE32_ALPHABET[(byte % 32) as usize] as char);
        body.push(NOVARA_BASE32_ALPHABET[((byte / 32) % 32) as usize] as char);
    }

    let ck = address_checksum(&body);
    format!("nvr1{}{}", body, ck)
}

fn address_checksum(body: &str) -> String {
    let mut data = Vec::with_capacity(4 + body.len());
    data.extend_from_slice(b"nvr1");
    data.extend_from_slice(body.as_bytes());
    let hash = sha3_256(&data);

    let mut ck = String::with_capacity(4);
    for &byte in &hash.0[..2] {
        ck.push(NOVARA_BASE32_ALPHABET[(byte % 32) as usize] as char);
        ck.push(NOVARA_BASE32_ALPHABET[((byte / 32) % 32) as usize] as char);
    }
    ck
}

/// Structural + checksum validation of a Novara address.
pub fn is_valid_address(addr: &str) -> bool {
    if addr.len() != 48 || !addr.starts_with("nvr1") {
        return false;
    }
    let body = &addr[4..44];
    let ck = &addr[44..];
    if !body
        .bytes()
        .all(|b| NOVARA_BASE32_ALPHABET.contains(&b.to_ascii_lowercase()))
    {
        return false;
    }
    address_checksum(body) == ck
}
