use std::time::Duration;

/// Tunables of a single Raft server.
///
/// The election timer fires after a randomized interval in
/// `[election_timeout, 2 * election_timeout]` without contact
/// from the current-term leader.
#[derive(Clone, Debug)]
pub struct RaftConfig {
    pub election_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// How long a leader keeps serving writes without hearing
    /// from a quorum before it steps down.
    pub quorum_stepdown_timeout: Duration,
    pub compaction_interval: Duration,
    pub snapshot_chunk_size: usize,
    /// Client responses not settled within
    /// `response_deadline_factor * election_timeout` fail with `Timeout`.
    pub response_deadline_factor: u32,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(100),
            quorum_stepdown_timeout: Duration::from_secs(5),
            compaction_interval: Duration::from_secs(10),
            snapshot_chunk_size: 1 << 20,
            response_deadline_factor: 20,
        }
    }
}
