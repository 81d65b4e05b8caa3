use thiserror::Error;

/// Broad error categories. They decide propagation: validation and policy
/// errors surface to the caller and are never retried, transient errors may
/// be retried at the producing callsite, fatal errors abort the operation
/// and are reported at CRITICAL severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Policy,
    Transient,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsensusError {
    // ── Validation ──
    #[error("transaction too large: {size} bytes (max {max})")]
    TxTooLarge { size: usize, max: usize },
    #[error("fee too low: {got} (minimum {required})")]
    FeeTooLow { got: u128, required: u128 },
    #[error("size exceeded: {size} bytes (max {max})")]
    SizeExceeded { size: usize, max: usize },
    #[error("double spend: outpoint {outpoint} conflicts with mempool")]
    DoubleSpend { outpoint: String },
    #[error("input references missing or spent utxo {outpoint}")]
    SpentUtxo { outpoint: String },
    #[error("transaction {txid} already known")]
    DuplicateTx { txid: String },
    #[error("ancestry limit exceeded: {count} (max {max})")]
    AncestryLimitExceeded { count: usize, max: usize },
    #[error("coinbase invalid: {0}")]
    CoinbaseInvalid(String),
    #[error("merkle root mismatch")]
    MerkleMismatch,
    #[error("block hash does not meet target")]
    TargetNotMet,
    #[error("header invalid: {0}")]
    HeaderInvalid(String),
    #[error("block structure invalid: {0}")]
    StructureInvalid(String),
    #[error("transaction {index} invalid: {reason}")]
    TxInvalid { index: usize, reason: String },
    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(String),
    #[error("difficulty {0} out of range")]
    DifficultyOutOfRange(u64),
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("chain append failed: {0}")]
    ChainAppendFailed(String),

    // ── Policy ──
    #[error("network unhealthy: {0}")]
    NetworkUnhealthy(String),
    #[error("rate limited: {actor}")]
    RateLimited { actor: String },
    #[error("rejected under backpressure")]
    BackpressureRejected,
    #[error("fork depth {depth} exceeds maximum {max}")]
    ForkTooDeep { depth: u64, max: u64 },
    #[error("no active voting period")]
    NoActivePeriod,
    #[error("vote outside the active period window")]
    OutsidePeriodWindow,
    #[error("invalid vote type")]
    InvalidVoteType,
    #[error("vote too large: {size} bytes (max {max})")]
    VoteTooLarge { size: usize, max: usize },
    #[error("{0} is not an authorized validator")]
    UnauthorizedValidator(String),
    #[error("duplicate vote from {0}")]
    DuplicateVote(String),
    #[error("{address} not vote-eligible: {reason}")]
    VoteIneligible { address: String, reason: String },

    // ── Transient ──
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("timed out acquiring {0} mutex")]
    MutexTimeout(String),
    #[error("in-flight attempt timed out for block {0}")]
    BlockInflightTimeout(String),
    #[error("worker error: {0}")]
    WorkerError(String),
    #[error("gpu failure: {0}")]
    GpuFailure(String),

    // ── Fatal ──
    #[error("consensus state corrupted: {0}")]
    ConsensusStateCorrupted(String),
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
    #[error("critical storage failure: {0}")]
    CriticalStorageFailure(String),
}

impl ConsensusError {
    pub fn kind(&self) -> ErrorKind {
        use ConsensusError::*;
        match self {
            TxTooLarge { .. }
            | FeeTooLow { .. }
            | SizeExceeded { .. }
            | DoubleSpend { .. }
            | SpentUtxo { .. }
            | DuplicateTx { .. }
            | AncestryLimitExceeded { .. }
            | CoinbaseInvalid(_)
            | MerkleMismatch
            | TargetNotMet
            | HeaderInvalid(_)
            | StructureInvalid(_)
            | TxInvalid { .. }
            | TimestampOutOfRange(_)
            | DifficultyOutOfRange(_)
            | SignatureInvalid
            | ChainAppendFailed(_) => ErrorKind::Validation,

            NetworkUnhealthy(_)
            | RateLimited { .. }
            | BackpressureRejected
            | ForkTooDeep { .. }
            | NoActivePeriod
            | OutsidePeriodWindow
            | InvalidVoteType
            | VoteTooLarge { .. }
            | UnauthorizedValidator(_)
            | DuplicateVote(_)
            | VoteIneligible { .. } => ErrorKind::Policy,

            StorageUnavailable(_)
            | MutexTimeout(_)
            | BlockInflightTimeout(_)
            | WorkerError(_)
            | GpuFailure(_) => ErrorKind::Transient,

            ConsensusStateCorrupted(_) | InvariantViolated(_) | CriticalStorageFailure(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// Stable machine-readable code, logged with every policy denial.
    pub fn code(&self) -> &'static str {
        use ConsensusError::*;
        match self {
            TxTooLarge { .. } => "TX_TOO_LARGE",
            FeeTooLow { .. } => "FEE_TOO_LOW",
            SizeExceeded { .. } => "SIZE_EXCEEDED",
            DoubleSpend { .. } => "DOUBLE_SPEND",
            SpentUtxo { .. } => "SPENT_UTXO",
            DuplicateTx { .. } => "DUPLICATE_TX",
            AncestryLimitExceeded { .. } => "ANCESTRY_LIMIT_EXCEEDED",
            CoinbaseInvalid(_) => "COINBASE_INVALID",
            MerkleMismatch => "MERKLE_MISMATCH",
            TargetNotMet => "TARGET_NOT_MET",
            HeaderInvalid(_) => "HEADER_INVALID",
            StructureInvalid(_) => "STRUCTURE_INVALID",
            TxInvalid { .. } => "TX_INVALID",
            TimestampOutOfRange(_) => "TIMESTAMP_OUT_OF_RANGE",
            DifficultyOutOfRange(_) => "DIFFICULTY_OUT_OF_RANGE",
            SignatureInvalid => "SIGNATURE_INVALID",
            ChainAppendFailed(_) => "CHAIN_APPEND_FAILED",
            NetworkUnhealthy(_) => "NETWORK_UNHEALTHY",
            RateLimited { .. } => "RATE_LIMITED",
            BackpressureRejected => "BACKPRESSURE_REJECTED",
            ForkTooDeep { .. } => "FORK_TOO_DEEP",
            NoActivePeriod => "NO_ACTIVE_PERIOD",
            OutsidePeriodWindow => "OUTSIDE_PERIOD_WINDOW",
            InvalidVoteType => "INVALID_VOTE_TYPE",
            VoteTooLarge { .. } => "VOTE_TOO_LARGE",
            UnauthorizedValidator(_) => "UNAUTHORIZED_VALIDATOR",
            DuplicateVote(_) => "DUPLICATE_VOTE",
            VoteIneligible { .. } => "VOTE_INELIGIBLE",
            StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            MutexTimeout(_) => "MUTEX_TIMEOUT",
            BlockInflightTimeout(_) => "BLOCK_INFLIGHT_TIMEOUT",
            WorkerError(_) => "WORKER_ERROR",
            GpuFailure(_) => "GPU_FAILURE",
            ConsensusStateCorrupted(_) => "CONSENSUS_STATE_CORRUPTED",
            InvariantViolated(_) => "INVARIANT_VIOLATED",
            CriticalStorageFailure(_) => "CRITICAL_STORAGE_FAILURE",
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Lift a storage-layer failure into the consensus taxonomy.
    pub fn from_storage(err: anyhow::Error) -> Self {
        ConsensusError::StorageUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            ConsensusError::TxTooLarge { size: 10, max: 5 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ConsensusError::NoActivePeriod.kind(),
            ErrorKind::Policy
        );
        assert_eq!(
            ConsensusError::MutexTimeout("mempool".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            ConsensusError::InvariantViolated("expired handle".into()).kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_transient_predicate() {
        assert!(ConsensusError::StorageUnavailable("io".into()).is_transient());
        assert!(!ConsensusError::TargetNotMet.is_transient());
        assert!(!ConsensusError::TargetNotMet.is_fatal());
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ConsensusError::MerkleMismatch.code(), "MERKLE_MISMATCH");
        assert_eq!(
            ConsensusError::DuplicateVote("nvr1x".into()).code(),
            "DUPLICATE_VOTE"
        );
    }
}
