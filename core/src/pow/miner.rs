use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::blockchain::block::BlockHeader;
use crate::blockchain::consensus::meets_target;
use crate::crypto::hash::Hash256;
use crate::error::{ConsensusError, Result};

/// Parallel nonce search over `[start, end)`.
///
/// The window is split into one contiguous range per worker; each worker
/// hashes in `batch_size` strides and checks the stop/found flags only at
/// stride boundaries, so cancellation latency is one batch.
pub async fn search_range(
    header: &BlockHeader,
    target: &Hash256,
    start: u64,
    end: u64,
    workers: usize,
    batch_size: u64,
    stop: Arc<AtomicBool>,
    hash_counter: Arc<AtomicU64>,
) -> Result<Option<(u64, Hash256)>> {
    if start >= end {
        return Ok(None);
    }
    let workers = workers.max(1);
    let batch_size = batch_size.max(1);
    let span = (end - start).div_ceil(workers as u64);

    let found = Arc::new(AtomicBool::new(false));
    let (result_tx, mut result_rx) = mpsc::channel::<(u64, Hash256)>(workers);

    let mut handles = Vec::with_capacity(workers);
    for w in 0..workers {
        let mut h = header.clone();
        let target = *target;
        let stop = stop.clone();
        let found = found.clone();
        let result_tx = result_tx.clone();
        let counter = hash_counter.clone();

        let range_start = start + w as u64 * span;
        let range_end = range_start.saturating_add(span).min(end);

        handles.push(tokio::task::spawn_blocking(move || {
            let mut nonce = range_start;
            while nonce < range_end {
                if stop.load(Ordering::Relaxed) || found.load(Ordering::Relaxed) {
                    return;
                }
                let batch_end = nonce.saturating_add(batch_size).min(range_end);
                for n in nonce..batch_end {
                    h.nonce = n;
                    let hash = h.calculate_hash();
                    if meets_target(&hash, &target) {
                        found.store(true, Ordering::Relaxed);
                        let _ = result_tx.blocking_send((n, hash));
                        counter.fetch_add(n - nonce + 1, Ordering::Relaxed);
                        return;
                    }
                }
                counter.fetch_add(batch_end - nonce, Ordering::Relaxed);
                nonce = batch_end;
            }
        }));
    }
    drop(result_tx);

    for handle in handles {
        handle
            .await
            .map_err(|e| ConsensusError::WorkerError(e.to_string()))?;
    }

    Ok(result_rx.recv().await)
}
