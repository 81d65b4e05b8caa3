//! Novara consensus core.
//!
//! The hybrid consensus subsystem of the Novara chain: a proof-of-work
//! mining and block-validation engine, a quadratic-voting governance and
//! fork-selection engine, and the transaction mempool that feeds both.
//! `state::Inner` composes the three and exposes the caller surface
//! (`submit_transaction`, `submit_block`, `submit_vote`,
//! `get_block_template`, `get_mining_info`, `handle_chain_fork`).
//!
//! Persistence, peer networking and audit delivery are consumed through
//! narrow interfaces (`storage::KvStore`, `p2p::PeerNetwork`,
//! `audit::AuditSink`); everything behind them is pluggable.

pub mod audit;
pub mod blockchain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod mempool;
pub mod p2p;
pub mod pow;
pub mod state;
pub mod storage;
pub mod tx;
pub mod utils;
pub mod validators;
pub mod voting;

pub use config::ConsensusConfig;
pub use error::{ConsensusError, ErrorKind, Result};
pub use state::{Inner, State};
