use crate::blockchain::block::{Block, MAX_BLOCK_SIZE, MAX_BLOCK_VERSION, MAX_FUTURE_DRIFT, MIN_BLOCK_VERSION};
use crate::blockchain::consensus;
use crate::error::{ConsensusError, Result};
use crate::ledger::LedgerView;
use crate::tx::{
    script_kind, Transaction, MAX_INPUTS, MAX_OUTPUTS, MAX_TIME_DRIFT, MAX_TX_SIZE,
    MAX_TX_VERSION, MIN_COINBASE_SCRIPT, MIN_TX_VERSION, CURRENCY_TAG,
};

/// Full block validation, in consensus order:
///
/// 1. structure (header fields, counts, size, chain linkage, timestamp)
/// 2. hash recomputation vs the declared hash and target
/// 3. difficulty schedule
/// 4. coinbase rules
/// 5. per-transaction context (duplicates, UTXOs, signatures, sizes)
/// 6. merkle root
///
/// The validator-quorum check (step 7) needs the expected validator set and
/// lives in the PoW engine, which owns that handle.
pub fn validate_block(
    block: &Block,
    prev: &Block,
    ledger: &dyn LedgerView,
    expected_difficulty: u64,
    now: u64,
) -> Result<()> {
    validate_structure(block, prev, ledger, now)?;
    validate_hash(block)?;
    validate_difficulty(block, expected_difficulty)?;
    validate_coinbase(block)?;
    validate_transactions(block, ledger)?;
    validate_merkle(block)?;
    Ok(())
}

fn validate_structure(block: &Block, prev: &Block, ledger: &dyn LedgerView, now: u64) -> Result<()> {
    let header = &block.header;

    if !(MIN_BLOCK_VERSION..=MAX_BLOCK_VERSION).contains(&header.version) {
        return Err(ConsensusError::StructureInvalid(format!(
            "unsupported block version {}",
            header.version
        )));
    }

    if block.transactions.is_empty() {
        return Err(ConsensusError::StructureInvalid(
            "block has no transactions".into(),
        ));
    }

    if header.height != prev.header.height + 1 {
        return Err(ConsensusError::StructureInvalid(format!(
            "height {} does not extend previous height {}",
            header.height, prev.header.height
        )));
    }

    if header.previous_hash != prev.hash {
        return Err(ConsensusError::StructureInvalid(format!(
            "previous hash {} does not match parent {}",
            header.previous_hash, prev.hash
        )));
    }

    if header.nonce > consensus::MAX_NONCE {
        return Err(ConsensusError::HeaderInvalid(format!(
            "nonce {} beyond search bound",
            header.nonce
        )));
    }

    let size = block.size();
    if size > MAX_BLOCK_SIZE {
        return Err(ConsensusError::SizeExceeded {
            size,
            max: MAX_BLOCK_SIZE,
        });
    }

    // Timestamp window: (median of last 11, now + 2h]
    if let Some(median) = ledger.median_time_past() {
        if header.timestamp < median {
            return Err(ConsensusError::TimestampOutOfRange(format!(
                "timestamp {} below median time past {median}",
                header.timestamp
            )));
        }
    }
    if header.timestamp > now + MAX_FUTURE_DRIFT {
        return Err(ConsensusError::TimestampOutOfRange(format!(
            "timestamp {} more than {MAX_FUTURE_DRIFT}s ahead of {now}",
            header.timestamp
        )));
    }

    Ok(())
}

fn validate_hash(block: &Block) -> Result<()> {
    let computed = block.header.calculate_hash();
    if computed != block.hash {
        return Err(ConsensusError::HeaderInvalid(format!(
            "declared hash {} does not match recomputed {computed}",
            block.hash
        )));
    }

    let target = consensus::target_from_difficulty(block.header.difficulty);
    if block.header.target != target {
        return Err(ConsensusError::HeaderInvalid(
            "declared target does not match difficulty".into(),
        ));
    }

    if !consensus::meets_target(&computed, &target) {
        return Err(ConsensusError::TargetNotMet);
    }

    Ok(())
}

fn validate_difficulty(block: &Block, expected: u64) -> Result<()> {
    let difficulty = block.header.difficulty;
    if !consensus::difficulty_in_range(difficulty) {
        return Err(ConsensusError::DifficultyOutOfRange(difficulty));
    }
    if difficulty != expected {
        return Err(ConsensusError::DifficultyOutOfRange(difficulty));
    }
    Ok(())
}

fn validate_coinbase(block: &Block) -> Result<()> {
    let coinbase = block
        .transactions
        .first()
        .filter(|tx| tx.is_coinbase())
        .ok_or_else(|| ConsensusError::CoinbaseInvalid("first transaction must be coinbase".into()))?;

    if block.transactions.iter().skip(1).any(|tx| tx.is_coinbase()) {
        return Err(ConsensusError::CoinbaseInvalid(
            "more than one coinbase".into(),
        ));
    }

    if !coinbase.inputs.is_empty() {
        return Err(ConsensusError::CoinbaseInvalid("coinbase has inputs".into()));
    }

    if coinbase.outputs.len() != 1 {
        return Err(ConsensusError::CoinbaseInvalid(format!(
            "coinbase must have exactly one output, found {}",
            coinbase.outputs.len()
        )));
    }

    let output = &coinbase.outputs[0];
    if output.script.len() < MIN_COINBASE_SCRIPT {
        return Err(ConsensusError::CoinbaseInvalid(format!(
            "coinbase script {} bytes (minimum {MIN_COINBASE_SCRIPT})",
            output.script.len()
        )));
    }

    if output.currency_tag != CURRENCY_TAG {
        return Err(ConsensusError::CoinbaseInvalid(format!(
            "currency tag {} (expected {CURRENCY_TAG})",
            output.currency_tag
        )));
    }

    let reward = crate::blockchain::reward::reward_schedule(block.header.height);
    let max_payout = reward + block.total_fees();
    if output.amount > max_payout {
        return Err(ConsensusError::CoinbaseInvalid(format!(
            "coinbase pays {} above subsidy+fees {max_payout}",
            output.amount
        )));
    }

    Ok(())
}

fn validate_transactions(block: &Block, ledger: &dyn LedgerView) -> Result<()> {
    for (index, tx) in block.transactions.iter().enumerate().skip(1) {
        validate_block_transaction(tx, ledger)
            .map_err(|e| ConsensusError::TxInvalid {
                index,
                reason: e.to_string(),
            })?;
    }
    Ok(())
}

/// Contextual checks for a non-coinbase transaction inside a block.
fn validate_block_transaction(tx: &Transaction, ledger: &dyn LedgerView) -> Result<()> {
    if ledger.contains_tx(&tx.id) {
        return Err(ConsensusError::DuplicateTx {
            txid: tx.id.to_hex(),
        });
    }

    let size = tx.serialized_size();
    if size > ledger.max_tx_size() {
        return Err(ConsensusError::TxTooLarge {
            size,
            max: ledger.max_tx_size(),
        });
    }

    for input in &tx.inputs {
        match ledger.utxo(&input.prev_txid, input.output_index) {
            Some(utxo) if !utxo.spent => {}
            _ => {
                return Err(ConsensusError::SpentUtxo {
                    outpoint: input.outpoint_label(),
                });
            }
        }
    }

    if !tx.verify_signatures() {
        return Err(ConsensusError::SignatureInvalid);
    }

    Ok(())
}

fn validate_merkle(block: &Block) -> Result<()> {
    let computed = Block::calculate_merkle_root(&block.transactions);
    if computed != block.header.merkle_root {
        return Err(ConsensusError::MerkleMismatch);
    }
    Ok(())
}

/// Context-free structural validation shared by mempool admission.
pub fn validate_tx_structure(tx: &Transaction, now: u64) -> Result<()> {
    if tx.id != tx.compute_id() {
        return Err(ConsensusError::StructureInvalid(
            "transaction id does not match canonical hash".into(),
        ));
    }

    if !(MIN_TX_VERSION..=MAX_TX_VERSION).contains(&tx.version) {
        return Err(ConsensusError::StructureInvalid(format!(
            "unsupported tx version {}",
            tx.version
        )));
    }

    if tx.inputs.is_empty() {
        return Err(ConsensusError::StructureInvalid("no inputs".into()));
    }
    if tx.outputs.is_empty() {
        return Err(ConsensusError::StructureInvalid("no outputs".into()));
    }
    if tx.inputs.len() > MAX_INPUTS {
        return Err(ConsensusError::StructureInvalid(format!(
            "{} inputs (max {MAX_INPUTS})",
            tx.inputs.len()
        )));
    }
    if tx.outputs.len() > MAX_OUTPUTS {
        return Err(ConsensusError::StructureInvalid(format!(
            "{} outputs (max {MAX_OUTPUTS})",
            tx.outputs.len()
        )));
    }

    for output in &tx.outputs {
        if script_kind(&output.script).is_none() {
            return Err(ConsensusError::StructureInvalid(
                "unrecognised output script template".into(),
            ));
        }
    }

    // Witness stacks, when present, must line up with inputs.
    if let Some(witness) = &tx.witness {
        if witness.stacks.len() != tx.inputs.len() {
            return Err(ConsensusError::StructureInvalid(format!(
                "witness stack count {} != input count {}",
                witness.stacks.len(),
                tx.inputs.len()
            )));
        }
    }

    let drift = now.abs_diff(tx.timestamp);
    if drift > MAX_TIME_DRIFT {
        return Err(ConsensusError::TimestampOutOfRange(format!(
            "tx timestamp drift {drift}s exceeds {MAX_TIME_DRIFT}s"
        )));
    }

    let size = tx.serialized_size();
    if size > MAX_TX_SIZE {
        return Err(ConsensusError::TxTooLarge {
            size,
            max: MAX_TX_SIZE,
        });
    }

    Ok(())
}
