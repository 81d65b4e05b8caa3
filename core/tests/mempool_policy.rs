/// Mempool policy suite: replace-by-fee, dynamic congestion fees,
/// coinbase maturity and ancestry bounds, driven through the public
/// admission surface.
mod helpers;

use helpers::*;
use novara_core::config::ConsensusConfig;
use novara_core::error::ConsensusError;
use novara_core::ledger::LedgerView;
use novara_core::mempool::fees::{dynamic_min_fee, fee_rate, FEE_RATE_SCALE};

// ═══════════════════════════════════════════════════════════════════════════
// 1. Replace-by-fee
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_rbf_accepts_ten_percent_improvement() {
    let chain = funded_chain();
    let mempool = mempool_over(&chain, ConsensusConfig::default());

    // A: 200 bytes, fee 400 → rate 2.0
    let a = spend_funding(&chain, 0, 400);
    assert_eq!(a.serialized_size(), 200);
    assert_eq!(fee_rate(a.fee, a.serialized_size()), 2 * FEE_RATE_SCALE);
    mempool.add_transaction(a.clone()).await.unwrap();

    // B shares A's input, fee 500 → rate 2.5 > 2.2 ⇒ accepted, A gone.
    let b = spend_funding(&chain, 0, 500);
    assert_eq!(mempool.add_transaction(b.clone()).await, Ok(true));
    assert!(!mempool.contains(&a.id));
    assert!(mempool.contains(&b.id));
}

#[tokio::test]
async fn test_rbf_rejects_exact_boundary() {
    let chain = funded_chain();
    let mempool = mempool_over(&chain, ConsensusConfig::default());

    let a = spend_funding(&chain, 0, 400);
    mempool.add_transaction(a.clone()).await.unwrap();

    // B at rate 2.2 — not strictly above 1.1 × 2.0 ⇒ rejected, A stays.
    let b = spend_funding(&chain, 0, 440);
    assert!(matches!(
        mempool.add_transaction(b.clone()).await,
        Err(ConsensusError::DoubleSpend { .. })
    ));
    assert!(mempool.contains(&a.id));
    assert!(!mempool.contains(&b.id));
}

#[tokio::test]
async fn test_rbf_against_multiple_conflicts() {
    let chain = funded_chain();
    let mempool = mempool_over(&chain, ConsensusConfig::default());

    // Two independent entries at rate 2.0 each.
    let a = spend_funding(&chain, 0, 400);
    let b = spend_funding(&chain, 1, 400);
    mempool.add_transaction(a.clone()).await.unwrap();
    mempool.add_transaction(b.clone()).await.unwrap();

    // C spends both inputs: must beat the SUM (4.0 × 1.1 = 4.4).
    let mut c = transfer(&chain, chain.funding.id, 0, FUNDING_AMOUNT, 0);
    c.inputs.push(c.inputs[0].clone());
    c.inputs[1].output_index = 1;
    c.fee = 1_500; // size grows with the second input; rate ≈ 4.2 < 4.4
    let c = {
        let mut tx = c;
        tx.inputs[0].signature.clear();
        tx.inputs[1].signature.clear();
        let sig = chain.kp.sign(&tx.canonical_bytes());
        tx.inputs[0].signature = sig.clone();
        tx.inputs[1].signature = sig;
        tx.seal()
    };
    let size = c.serialized_size();
    assert!(fee_rate(c.fee, size) < fee_rate(400, 200) * 2 * 11 / 10);
    assert!(mempool.add_transaction(c.clone()).await.is_err());

    // Raising the fee over the threshold flips the outcome.
    let mut d = c.clone();
    d.fee = 2_000;
    d.inputs[0].signature.clear();
    d.inputs[1].signature.clear();
    let sig = chain.kp.sign(&d.canonical_bytes());
    d.inputs[0].signature = sig.clone();
    d.inputs[1].signature = sig;
    let d = d.seal();
    assert!(fee_rate(d.fee, d.serialized_size()) > fee_rate(400, 200) * 2 * 11 / 10);
    assert_eq!(mempool.add_transaction(d.clone()).await, Ok(true));
    assert!(!mempool.contains(&a.id));
    assert!(!mempool.contains(&b.id));
}

// ═══════════════════════════════════════════════════════════════════════════
// 2. Dynamic congestion fee
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_dynamic_fee_at_92_percent() {
    // MAX_SIZE = 50 000, |M| = 46 000 → c = 0.92,
    // m = 4 + 16 × 0.02² = 4.0064 → min ≈ 4; rate 3 fails.
    let base = FEE_RATE_SCALE;
    let min = dynamic_min_fee(46_000, 50_000, base);
    assert_eq!(min, 400_640);
    assert!(3 * FEE_RATE_SCALE < min);
    assert!(5 * FEE_RATE_SCALE > min);
}

#[tokio::test]
async fn test_congestion_gate_rejects_low_rate() {
    let chain = funded_chain();
    let cfg = ConsensusConfig {
        mempool_max_size: 50,
        high_congestion_threshold: 10,
        ..Default::default()
    };
    let mempool = mempool_over(&chain, cfg);

    // Fill to 46/50 (c = 0.92) with comfortably-priced entries.
    for i in 0..46 {
        let tx = spend_funding(&chain, i, 1_000); // rate 5.0
        assert_eq!(mempool.add_transaction(tx).await, Ok(true), "tx {i}");
    }

    // Rate 3.0 sits under the ≈4.0 dynamic floor.
    let cheap = spend_funding(&chain, 50, 600);
    assert!(matches!(
        mempool.add_transaction(cheap).await,
        Err(ConsensusError::FeeTooLow { .. })
    ));

    // Rate 4.5 clears it.
    let priced = spend_funding(&chain, 51, 900);
    assert_eq!(mempool.add_transaction(priced).await, Ok(true));
}

// ═══════════════════════════════════════════════════════════════════════════
// 3. Coinbase maturity
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_coinbase_maturity_window() {
    let chain = funded_chain();
    let mempool = mempool_over(&chain, ConsensusConfig::default());

    // Coinbase minted at height 10.
    let mut ts = chain.now.saturating_sub(290);
    for _ in 0..9 {
        apply_next_block(&chain.ledger, vec![], ts);
        ts += 1;
    }
    let coinbase_at_10 = chain.ledger.block_by_height(10).unwrap().transactions[0].clone();
    let amount = coinbase_at_10.outputs[0].amount;

    // Tip 10: far too early.
    let spend = transfer(&chain, coinbase_at_10.id, 0, amount, 400);
    assert!(matches!(
        mempool.add_transaction(spend.clone()).await,
        Err(ConsensusError::CoinbaseInvalid(_))
    ));

    // Grow to height 109: still one short of 10 + 100.
    for _ in 11..=109 {
        apply_next_block(&chain.ledger, vec![], ts);
        ts += 1;
    }
    assert_eq!(chain.ledger.height(), 109);
    assert!(matches!(
        mempool.add_transaction(spend.clone()).await,
        Err(ConsensusError::CoinbaseInvalid(_))
    ));

    // Height 110: the spend matures.
    apply_next_block(&chain.ledger, vec![], ts);
    assert_eq!(chain.ledger.height(), 110);
    assert_eq!(mempool.add_transaction(spend).await, Ok(true));
}

// ═══════════════════════════════════════════════════════════════════════════
// 4. Size accounting & ancestry
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_size_invariant_through_add_remove() {
    let chain = funded_chain();
    let mempool = mempool_over(&chain, ConsensusConfig::default());

    let txs: Vec<_> = (0..5).map(|i| spend_funding(&chain, i, 500 + i as u128)).collect();
    for tx in &txs {
        mempool.add_transaction(tx.clone()).await.unwrap();
    }
    let expected: usize = txs.iter().map(|t| t.serialized_size()).sum();
    assert_eq!(mempool.size(), 5);
    assert_eq!(mempool.bytes(), expected);

    mempool.remove_transactions(&txs[..2]);
    let expected: usize = txs[2..].iter().map(|t| t.serialized_size()).sum();
    assert_eq!(mempool.size(), 3);
    assert_eq!(mempool.bytes(), expected);
}

#[tokio::test]
async fn test_descendant_bound_fans_out() {
    let chain = funded_chain();
    let mempool = mempool_over(&chain, ConsensusConfig::default());

    // One parent with many outputs, then 25 children each spending one.
    let parent = {
        let mut tx = spend_funding(&chain, 0, 40_000);
        tx.outputs = (0..30)
            .map(|i| novara_core::tx::TxOutput {
                address: chain.kp.address(),
                amount: (FUNDING_AMOUNT - 40_000) / 30,
                script: novara_core::tx::p2pkh_script(&chain.kp.address()),
                currency_tag: novara_core::tx::CURRENCY_TAG.into(),
                index: i,
            })
            .collect();
        tx.inputs[0].signature.clear();
        let sig = chain.kp.sign(&tx.canonical_bytes());
        tx.inputs[0].signature = sig;
        tx.seal()
    };
    let child_amount = (FUNDING_AMOUNT - 40_000) / 30;
    mempool.add_transaction(parent.clone()).await.unwrap();

    for i in 0..25 {
        let child = transfer(&chain, parent.id, i, child_amount, 400);
        assert_eq!(mempool.add_transaction(child).await, Ok(true), "child {i}");
    }

    // Child 26 would push the parent past 25 descendants.
    let overflow = transfer(&chain, parent.id, 25, child_amount, 400);
    assert!(matches!(
        mempool.add_transaction(overflow).await,
        Err(ConsensusError::AncestryLimitExceeded { .. })
    ));
}
