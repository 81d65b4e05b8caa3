use serde::{Deserialize, Serialize};

use crate::crypto::hash::{sha3_256, Hash256};
use crate::crypto::keys;

// ──────────────────────────────────────────────
// Structural policy constants
// ──────────────────────────────────────────────

/// Maximum inputs per transaction.
pub const MAX_INPUTS: usize = 1_000;

/// Maximum outputs per transaction.
pub const MAX_OUTPUTS: usize = 1_000;

/// Maximum serialized transaction size: 100 KB.
pub const MAX_TX_SIZE: usize = 100_000;

/// Maximum |tx.timestamp − now| accepted at admission: 2 hours.
pub const MAX_TIME_DRIFT: u64 = 7_200;

/// Minimum coinbase script length.
pub const MIN_COINBASE_SCRIPT: usize = 8;

/// Accepted transaction versions.
pub const MIN_TX_VERSION: u32 = 1;
pub const MAX_TX_VERSION: u32 = 2;

/// Native currency tag carried on outputs.
pub const CURRENCY_TAG: &str = "NVR";

// ──────────────────────────────────────────────
// Types
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    Standard,
    Transfer,
    Regular,
    Coinbase,
    PowReward,
    QuadraticVote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Recognised output script templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
}

/// Classify a script against the recognised template set.
pub fn script_kind(script: &[u8]) -> Option<ScriptKind> {
    match script {
        [0x76, 0xa9, 0x14, .., 0x88, 0xac] if script.len() == 25 => Some(ScriptKind::P2pkh),
        [0xa9, 0x14, .., 0x87] if script.len() == 23 => Some(ScriptKind::P2sh),
        [0x00, 0x14, ..] if script.len() == 22 => Some(ScriptKind::P2wpkh),
        [0x00, 0x20, ..] if script.len() == 34 => Some(ScriptKind::P2wsh),
        [0x51, 0x20, ..] if script.len() == 34 => Some(ScriptKind::P2tr),
        _ => None,
    }
}

/// Build a P2PKH script committing to a 20-byte hash of `address`.
pub fn p2pkh_script(address: &str) -> Vec<u8> {
    let h = sha3_256(address.as_bytes());
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(&h.0[..20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_txid: Hash256,
    pub output_index: u32,
    pub script: Vec<u8>,
    /// Ed25519 signature over the transaction's canonical bytes.
    #[serde(with = "serde_hex")]
    pub signature: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub public_key: Vec<u8>,
    /// Amount of the referenced output, restated for fast fee computation.
    pub amount: u128,
    pub sequence: u32,
}

impl TxInput {
    pub fn outpoint(&self) -> (Hash256, u32) {
        (self.prev_txid, self.output_index)
    }

    pub fn outpoint_label(&self) -> String {
        format!("{}:{}", self.prev_txid, self.output_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub amount: u128,
    pub script: Vec<u8>,
    pub currency_tag: String,
    pub index: u32,
}

/// Per-input witness stacks. The stack count must equal the input count.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Witness {
    pub stacks: Vec<Vec<Vec<u8>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash256,
    pub version: u32,
    pub tx_type: TxType,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: u128,
    pub timestamp: u64,
    pub witness: Option<Witness>,
    pub status: TxStatus,
}

impl Transaction {
    /// Canonical bytes hashed into the transaction id. Signatures, witness
    /// data and status are excluded so signing cannot change the id.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(128 + self.inputs.len() * 64 + self.outputs.len() * 64);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.push(self.tx_type as u8);
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.fee.to_le_bytes());

        data.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            data.extend_from_slice(&input.prev_txid.0);
            data.extend_from_slice(&input.output_index.to_le_bytes());
            data.extend_from_slice(&input.amount.to_le_bytes());
            data.extend_from_slice(&(input.script.len() as u32).to_le_bytes());
            data.extend_from_slice(&input.script);
        }

        data.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            data.extend_from_slice(&(output.address.len() as u32).to_le_bytes());
            data.extend_from_slice(output.address.as_bytes());
            data.extend_from_slice(&output.amount.to_le_bytes());
            data.extend_from_slice(&(output.script.len() as u32).to_le_bytes());
            data.extend_from_slice(&output.script);
            data.extend_from_slice(&(output.currency_tag.len() as u32).to_le_bytes());
            data.extend_from_slice(output.currency_tag.as_bytes());
            data.extend_from_slice(&output.index.to_le_bytes());
        }

        data
    }

    pub fn compute_id(&self) -> Hash256 {
        sha3_256(&self.canonical_bytes())
    }

    /// Recompute and assign the id; call after any mutation.
    pub fn seal(mut self) -> Self {
        self.id = self.compute_id();
        self
    }

    pub fn is_coinbase(&self) -> bool {
        self.tx_type == TxType::Coinbase
    }

    /// Policy serialized size in bytes.
    ///
    /// version(4) + varint(#in) + per-input [outpoint(36) + varint(script)
    /// + script + signature + pubkey + sequence(4)] + varint(#out) +
    /// per-output [value(8) + varint(script) + script] + locktime(4) +
    /// optional witness [flag(2) + varint(#stacks) + per-item varint + bytes].
    pub fn serialized_size(&self) -> usize {
        let mut size = 4usize; // version

        size += var_int_len(self.inputs.len() as u64);
        for input in &self.inputs {
            size += 36; // outpoint: txid(32) + index(4)
            size += var_int_len(input.script.len() as u64) + input.script.len();
            size += input.signature.len();
            size += input.public_key.len();
            size += 4; // sequence
        }

        size += var_int_len(self.outputs.len() as u64);
        for output in &self.outputs {
            size += 8; // value
            size += var_int_len(output.script.len() as u64) + output.script.len();
        }

        size += 4; // locktime

        if let Some(witness) = &self.witness {
            size += 2; // marker + flag
            size += var_int_len(witness.stacks.len() as u64);
            for stack in &witness.stacks {
                size += var_int_len(stack.len() as u64);
                for item in stack {
                    size += var_int_len(item.len() as u64) + item.len();
                }
            }
        }

        size
    }

    /// Base size: serialized size without the witness section.
    pub fn base_size(&self) -> usize {
        let stripped = Transaction {
            witness: None,
            ..self.clone()
        };
        stripped.serialized_size()
    }

    /// Simplified non-SegWit weight: `base × 3 + total`. Single override
    /// point should the formula ever change.
    pub fn weight(&self) -> usize {
        self.base_size() * 3 + self.serialized_size()
    }

    pub fn total_output(&self) -> u128 {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    /// Verify every input signature over the canonical bytes. Coinbase
    /// carries no signatures and always passes.
    pub fn verify_signatures(&self) -> bool {
        if self.is_coinbase() {
            return true;
        }
        let msg = self.canonical_bytes();
        self.inputs
            .iter()
            .all(|input| keys::verify(&input.public_key, &msg, &input.signature))
    }

    /// Build the coinbase for a block at `height` paying `amount`.
    pub fn coinbase(miner_address: &str, amount: u128, height: u64, timestamp: u64) -> Self {
        let mut script = Vec::with_capacity(16);
        script.extend_from_slice(&height.to_le_bytes());
        script.extend_from_slice(b"novara/1");

        Transaction {
            id: Hash256::ZERO,
            version: 1,
            tx_type: TxType::Coinbase,
            inputs: vec![],
            outputs: vec![TxOutput {
                address: miner_address.to_string(),
                amount,
                script,
                currency_tag: CURRENCY_TAG.to_string(),
                index: 0,
            }],
            fee: 0,
            timestamp,
            witness: None,
            status: TxStatus::Pending,
        }
        .seal()
    }
}

/// Bitcoin-style variable integer encoded length.
pub fn var_int_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Unspent transaction output. Never destroyed — spends flip `spent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Hash256,
    pub output_index: u32,
    pub address: String,
    pub amount: u128,
    pub script: Vec<u8>,
    pub spent: bool,
    /// Height of the block that created this output.
    pub height: u64,
    /// Whether the creating transaction was a coinbase (maturity applies).
    pub coinbase: bool,
    pub currency_tag: String,
}

impl Utxo {
    pub fn key_label(&self) -> String {
        format!("{}:{}", self.txid, self.output_index)
    }

    pub fn confirmations(&self, tip_height: u64) -> u64 {
        tip_height.saturating_sub(self.height) + 1
    }
}

pub(crate) mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;

    fn make_transfer(kp: &Keypair, amount: u128, fee: u128) -> Transaction {
        let mut tx = Transaction {
            id: Hash256::ZERO,
            version: 1,
            tx_type: TxType::Transfer,
            inputs: vec![TxInput {
                prev_txid: sha3_256(b"prev"),
                output_index: 0,
                script: p2pkh_script("nvr1sender"),
                signature: vec![],
                public_key: kp.public_key_bytes().to_vec(),
                amount: amount + fee,
                sequence: 0,
            }],
            outputs: vec![TxOutput {
                address: "nvr1recipient".to_string(),
                amount,
                script: p2pkh_script("nvr1recipient"),
                currency_tag: CURRENCY_TAG.to_string(),
                index: 0,
            }],
            fee,
            timestamp: 1_700_000_000,
            witness: None,
            status: TxStatus::Pending,
        };
        let sig = kp.sign(&tx.canonical_bytes());
        tx.inputs[0].signature = sig;
        tx.seal()
    }

    #[test]
    fn test_id_is_canonical_hash() {
        let kp = Keypair::generate();
        let tx = make_transfer(&kp, 1_000, 50);
        assert_eq!(tx.id, tx.compute_id());
    }

    #[test]
    fn test_signature_round_trip() {
        let kp = Keypair::generate();
        let tx = make_transfer(&kp, 1_000, 50);
        assert!(tx.verify_signatures());

        let mut tampered = tx.clone();
        tampered.outputs[0].amount = 999_999;
        assert!(!tampered.verify_signatures());
    }

    #[test]
    fn test_signing_does_not_change_id() {
        let kp = Keypair::generate();
        let tx = make_transfer(&kp, 1_000, 50);
        let mut unsigned = tx.clone();
        unsigned.inputs[0].signature = vec![];
        assert_eq!(unsigned.compute_id(), tx.id);
    }

    #[test]
    fn test_var_int_boundaries() {
        assert_eq!(var_int_len(0), 1);
        assert_eq!(var_int_len(0xfc), 1);
        assert_eq!(var_int_len(0xfd), 3);
        assert_eq!(var_int_len(0xffff), 3);
        assert_eq!(var_int_len(0x1_0000), 5);
        assert_eq!(var_int_len(u64::MAX), 9);
    }

    #[test]
    fn test_serialized_size_components() {
        let kp = Keypair::generate();
        let tx = make_transfer(&kp, 1_000, 50);
        // version(4) + varint(1) + outpoint(36) + varint(1)+script(25)
        // + sig(64) + pubkey(32) + seq(4) + varint(1) + value(8)
        // + varint(1)+script(25) + locktime(4)
        assert_eq!(
            tx.serialized_size(),
            4 + 1 + 36 + 26 + 64 + 32 + 4 + 1 + 8 + 26 + 4
        );
    }

    #[test]
    fn test_weight_formula() {
        let kp = Keypair::generate();
        let mut tx = make_transfer(&kp, 1_000, 50);
        // Without witness, total == base and weight == 4 × base.
        assert_eq!(tx.weight(), tx.serialized_size() * 4);

        tx.witness = Some(Witness {
            stacks: vec![vec![vec![0u8; 10]]],
        });
        let base = tx.base_size();
        let total = tx.serialized_size();
        assert!(total > base);
        assert_eq!(tx.weight(), base * 3 + total);
    }

    #[test]
    fn test_coinbase_shape() {
        let cb = Transaction::coinbase("nvr1miner", 5_000_000_000, 42, 1_700_000_000);
        assert!(cb.is_coinbase());
        assert!(cb.inputs.is_empty());
        assert_eq!(cb.outputs.len(), 1);
        assert!(cb.outputs[0].script.len() >= MIN_COINBASE_SCRIPT);
        assert_eq!(cb.outputs[0].currency_tag, CURRENCY_TAG);
        assert!(cb.verify_signatures());
    }

    #[test]
    fn test_script_classification() {
        assert_eq!(script_kind(&p2pkh_script("nvr1a")), Some(ScriptKind::P2pkh));

        let mut p2sh = vec![0xa9, 0x14];
        p2sh.extend_from_slice(&[0u8; 20]);
        p2sh.push(0x87);
        assert_eq!(script_kind(&p2sh), Some(ScriptKind::P2sh));

        let mut p2wpkh = vec![0x00, 0x14];
        p2wpkh.extend_from_slice(&[0u8; 20]);
        assert_eq!(script_kind(&p2wpkh), Some(ScriptKind::P2wpkh));

        let mut p2tr = vec![0x51, 0x20];
        p2tr.extend_from_slice(&[0u8; 32]);
        assert_eq!(script_kind(&p2tr), Some(ScriptKind::P2tr));

        assert_eq!(script_kind(&[0xde, 0xad]), None);
    }

    #[test]
    fn test_utxo_confirmations() {
        let utxo = Utxo {
            txid: sha3_256(b"t"),
            output_index: 0,
            address: "nvr1a".into(),
            amount: 10,
            script: vec![],
            spent: false,
            height: 100,
            coinbase: false,
            currency_tag: CURRENCY_TAG.into(),
        };
        assert_eq!(utxo.confirmations(100), 1);
        assert_eq!(utxo.confirmations(109), 10);
    }
}
