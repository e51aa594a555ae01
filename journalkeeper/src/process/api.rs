use super::*;

pub mod request {
    use super::*;

    pub struct UpdateClusterState {
        pub requests: Vec<UpdateRequest>,
        pub include_header: bool,
        pub response_level: ResponseLevel,
        /// When set, buffer into the transaction instead of appending.
        pub transaction: Option<uuid::Uuid>,
    }

    pub struct QueryClusterState {
        pub query: Bytes,
        pub consistency: Consistency,
    }

    pub struct AppendEntries {
        pub leader_id: NodeId,
        pub term: Term,
        pub prev_clock: Clock,
        /// Empty entries double as a heartbeat.
        pub entries: Vec<Entry>,
        pub leader_commit: Index,
    }

    pub struct RequestVote {
        pub candidate_id: NodeId,
        pub candidate_clock: Clock,
        /// The term the candidate tries to promote at.
        pub vote_term: Term,
        /// Set by TimeoutNow: the receiver votes regardless of
        /// believing the leader alive.
        pub force_vote: bool,
        /// Pre-vote round; grants don't mutate the ballot.
        pub pre_vote: bool,
    }

    pub struct InstallSnapshot {
        pub leader_id: NodeId,
        pub term: Term,
        pub last_included: Clock,
        pub config: ClusterConfig,
        pub offset: u64,
        pub data: Bytes,
        pub done: bool,
    }

    pub struct DisableLeaderWrite {
        pub timeout_ms: i64,
        pub term: i32,
    }

    pub struct UpdateVoters {
        pub old: Vec<NodeId>,
        pub new: Vec<NodeId>,
    }

    pub struct ConvertRoll {
        pub node: NodeId,
        pub roll: Roll,
    }

    pub struct GetServers;

    pub struct TimeoutNow;

    pub struct CreateTransaction;

    pub struct CompleteTransaction {
        pub tx_id: uuid::Uuid,
        pub commit: bool,
    }

    pub struct OpeningTransactions;

    pub struct Watch {
        pub since: u64,
    }
}

pub mod response {
    use super::*;

    pub struct AppendEntries {
        pub term: Term,
        pub success: bool,
        pub n_inserted: u64,
        pub log_last_index: Index,
        /// On rejection: the conflicting term and the first index the
        /// follower holds of that term, so the leader can rewind in one
        /// jump instead of one index at a time.
        pub conflict: Option<Clock>,
    }

    pub struct RequestVote {
        pub term: Term,
        pub vote_granted: bool,
    }

    pub struct InstallSnapshot {
        pub term: Term,
        pub success: bool,
    }

    pub struct UpdateClusterState {
        /// Applied results for `ResponseLevel::All`; null otherwise.
        pub results: Option<Vec<Bytes>>,
    }

    pub struct QueryClusterState {
        pub result: Bytes,
    }

    pub struct ClusterInfo {
        pub known_leader: Option<NodeId>,
        pub leader_term: Term,
        pub voters: Vec<NodeId>,
        pub observers: Vec<NodeId>,
    }

    pub struct DisableLeaderWrite {
        pub term: Term,
    }

    pub struct UpdateVoters;

    pub struct ConvertRoll;

    pub struct TimeoutNow;

    pub struct CreateTransaction {
        pub tx_id: uuid::Uuid,
    }

    pub struct CompleteTransaction;

    pub struct OpeningTransactions {
        pub tx_ids: Vec<uuid::Uuid>,
    }

    pub struct Watch {
        pub events: Vec<(u64, ClusterEvent)>,
        pub head: u64,
    }
}
