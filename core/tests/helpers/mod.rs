//! Shared fixtures for the integration suites: a funded chain, a mempool
//! wired to it, and signed-transaction builders.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use novara_core::audit::AuditSink;
use novara_core::blockchain::block::{Block, BlockHeader};
use novara_core::blockchain::consensus::{target_from_difficulty, INITIAL_DIFFICULTY};
use novara_core::blockchain::reward;
use novara_core::config::ConsensusConfig;
use novara_core::crypto::hash::Hash256;
use novara_core::crypto::keys::Keypair;
use novara_core::ledger::{LedgerView, StoreLedger};
use novara_core::mempool::{Mempool, NoWork};
use novara_core::p2p::{NetworkHealth, StaticNetwork, SyncState};
use novara_core::storage::MemoryStore;
use novara_core::tx::{
    p2pkh_script, Transaction, TxInput, TxOutput, TxStatus, TxType, CURRENCY_TAG,
};

pub const FUNDING_OUTPUTS: u32 = 64;
pub const FUNDING_AMOUNT: u128 = 10_000_000;

pub struct TestChain {
    pub ledger: Arc<StoreLedger>,
    pub network: Arc<StaticNetwork>,
    pub audit: Arc<AuditSink>,
    pub kp: Keypair,
    pub funding: Transaction,
    pub now: u64,
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// A chain holding one block with a 64-output funding transaction.
pub fn funded_chain() -> TestChain {
    let now = now_secs();
    let ledger = Arc::new(
        StoreLedger::open(Arc::new(MemoryStore::new()), now.saturating_sub(600)).unwrap(),
    );
    let kp = Keypair::from_secret_bytes(&[7u8; 32]);

    // Zero-input Standard transaction: its outputs become spendable
    // non-coinbase UTXOs without touching maturity rules.
    let funding = Transaction {
        id: Hash256::ZERO,
        version: 1,
        tx_type: TxType::Standard,
        inputs: vec![],
        outputs: (0..FUNDING_OUTPUTS)
            .map(|i| TxOutput {
                address: kp.address(),
                amount: FUNDING_AMOUNT,
                script: p2pkh_script(&kp.address()),
                currency_tag: CURRENCY_TAG.into(),
                index: i,
            })
            .collect(),
        fee: 0,
        timestamp: now.saturating_sub(600),
        witness: None,
        status: TxStatus::Pending,
    }
    .seal();

    apply_next_block(&ledger, vec![funding.clone()], now.saturating_sub(300));

    TestChain {
        ledger,
        network: Arc::new(StaticNetwork::new(5, vec![], SyncState::Synced)),
        audit: Arc::new(AuditSink::new(256)),
        kp,
        funding,
        now,
    }
}

/// Append a structurally linked block carrying `extra_txs` (after the
/// coinbase). Consensus checks are bypassed — this grows chain state, it
/// does not exercise validation.
pub fn apply_next_block(ledger: &StoreLedger, extra_txs: Vec<Transaction>, timestamp: u64) {
    let height = ledger.height() + 1;
    let coinbase = Transaction::coinbase(
        "nvr1miner",
        reward::reward_schedule(height),
        height,
        timestamp,
    );
    let mut txs = vec![coinbase];
    txs.extend(extra_txs);
    let merkle_root = Block::calculate_merkle_root(&txs);

    let header = BlockHeader {
        version: 1,
        height,
        previous_hash: ledger.best_hash(),
        merkle_root,
        validator_merkle_root: Hash256::ZERO,
        timestamp,
        difficulty: INITIAL_DIFFICULTY,
        nonce: 0,
        target: target_from_difficulty(INITIAL_DIFFICULTY),
        miner_address: "nvr1miner".into(),
        miner_public_key: String::new(),
    };
    ledger.apply_block(&Block::new(header, txs)).unwrap();
}

pub fn mempool_over(chain: &TestChain, cfg: ConsensusConfig) -> Mempool {
    let health = Arc::new(NetworkHealth::new(
        chain.network.clone(),
        chain.audit.clone(),
        cfg.min_peer_count,
        cfg.network_failure_threshold,
        Duration::from_secs(cfg.network_failure_reset_secs),
        Duration::from_secs(cfg.breaker_cooloff_secs),
    ));
    Mempool::new(
        cfg,
        chain.ledger.clone(),
        health,
        chain.audit.clone(),
        Arc::new(NoWork),
    )
}

/// A signed transfer spending `prev_txid:index`. The 19-byte input script
/// pads the serialized size to exactly 200 bytes, so fees map to round
/// fee rates (400 → 2.0, 440 → 2.2, 500 → 2.5).
pub fn transfer(
    chain: &TestChain,
    prev_txid: Hash256,
    index: u32,
    input_amount: u128,
    fee: u128,
) -> Transaction {
    let mut tx = Transaction {
        id: Hash256::ZERO,
        version: 1,
        tx_type: TxType::Transfer,
        inputs: vec![TxInput {
            prev_txid,
            output_index: index,
            script: vec![0x51; 19],
            signature: vec![],
            public_key: chain.kp.public_key_bytes().to_vec(),
            amount: input_amount,
            sequence: 0,
        }],
        outputs: vec![TxOutput {
            address: "nvr1recipient".into(),
            amount: input_amount - fee,
            script: p2pkh_script("nvr1recipient"),
            currency_tag: CURRENCY_TAG.into(),
            index: 0,
        }],
        fee,
        timestamp: chain.now,
        witness: None,
        status: TxStatus::Pending,
    };
    let sig = chain.kp.sign(&tx.canonical_bytes());
    tx.inputs[0].signature = sig;
    tx.seal()
}

pub fn spend_funding(chain: &TestChain, index: u32, fee: u128) -> Transaction {
    transfer(chain, chain.funding.id, index, FUNDING_AMOUNT, fee)
}
