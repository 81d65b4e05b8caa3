/// Configuration validation: defaults are coherent and operator mistakes
/// are caught before the bundle wires anything.
use novara_core::config::ConsensusConfig;

#[test]
fn test_defaults_validate() {
    assert!(ConsensusConfig::default().validate().is_ok());
}

#[test]
fn test_serde_round_trip_preserves_tunables() {
    let cfg = ConsensusConfig {
        mempool_max_size: 1234,
        voting_period_blocks: 77,
        max_fork_depth: 9,
        ..Default::default()
    };
    let json = serde_json::to_string_pretty(&cfg).unwrap();
    let back: ConsensusConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.mempool_max_size, 1234);
    assert_eq!(back.voting_period_blocks, 77);
    assert_eq!(back.max_fork_depth, 9);
}

#[test]
fn test_rejects_degenerate_limits() {
    for cfg in [
        ConsensusConfig {
            mempool_max_size: 0,
            ..Default::default()
        },
        ConsensusConfig {
            max_blocks_in_flight: 0,
            ..Default::default()
        },
        ConsensusConfig {
            voting_period_blocks: 0,
            ..Default::default()
        },
        ConsensusConfig {
            min_participation_percent: 150,
            ..Default::default()
        },
        ConsensusConfig {
            absence_penalty_multiplier: 0.5,
            ..Default::default()
        },
        ConsensusConfig {
            min_backup_uptime: 1.5,
            ..Default::default()
        },
    ] {
        assert!(cfg.validate().is_err());
    }
}

#[test]
fn test_congestion_threshold_bounded_by_capacity() {
    let cfg = ConsensusConfig {
        mempool_max_size: 100,
        high_congestion_threshold: 101,
        ..Default::default()
    };
    assert!(cfg.validate().is_err());
}
