use crate::crypto::hash::Hash256;

use super::PoolState;

/// Evict until the pool fits `max_txs` and `max_bytes`.
///
/// Policy: lowest fee rate first, ties broken oldest-first. Freed
/// outpoints, bucket slots and ancestry edges are released with each
/// entry. Returns the evicted ids.
pub(super) fn evict_to_limits(
    state: &mut PoolState,
    max_txs: usize,
    max_bytes: usize,
) -> Vec<Hash256> {
    if state.entries.len() <= max_txs && state.bytes <= max_bytes {
        return Vec::new();
    }

    let mut candidates: Vec<(u128, u64, Hash256)> = state
        .entries
        .values()
        .map(|e| (e.fee_rate, e.seq, e.tx.id))
        .collect();
    // Ascending fee rate, then oldest arrival.
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut evicted = Vec::new();
    for (_, _, txid) in candidates {
        if state.entries.len() <= max_txs && state.bytes <= max_bytes {
            break;
        }
        if state.remove_entry(&txid).is_some() {
            evicted.push(txid);
        }
    }
    evicted
}
