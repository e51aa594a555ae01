use super::*;

mod election;
mod failure_detector;
mod heartbeat;
mod stepdown;

use super::raft_process::Transactions;

#[derive(Clone, Copy, Debug)]
pub enum ElectionState {
    Leader,
    Candidate,
    Follower,
}

pub struct Inner {
    state: spin::Mutex<ElectionState>,
    ballot: Box<dyn BallotStore>,

    /// Serializing any events that may change ballot state simplifies the
    /// voter's logic.
    vote_lock: tokio::sync::Mutex<()>,

    /// Unless `safe_term >= cur_term`, new user entries are not allowed
    /// to be queued (the fresh leader's barrier is not committed yet).
    safe_term: AtomicU64,

    /// Writes are rejected until this instant (DisableLeaderWrite).
    write_gate: spin::Mutex<Option<std::time::Instant>>,

    leader_failure_detector: failure_detector::FailureDetector,

    command_log: CommandLog,
    peers: PeerSvc,
    transactions: Transactions,
    driver: RaftDriver,
    events: EventBus,
    config: RaftConfig,
}

#[derive(shrinkwraprs::Shrinkwrap, Clone)]
pub struct Voter(pub Arc<Inner>);
impl Voter {
    pub fn new(
        ballot_store: impl BallotStore,
        command_log: CommandLog,
        peers: PeerSvc,
        transactions: Transactions,
        driver: RaftDriver,
        events: EventBus,
        config: RaftConfig,
    ) -> Self {
        let inner = Inner {
            state: spin::Mutex::new(ElectionState::Follower),
            ballot: Box::new(ballot_store),
            vote_lock: tokio::sync::Mutex::new(()),
            safe_term: AtomicU64::new(0),
            write_gate: spin::Mutex::new(None),
            leader_failure_detector: failure_detector::FailureDetector::new(
                config.election_timeout,
            ),
            command_log,
            peers,
            transactions,
            driver,
            events,
            config,
        };
        Self(Arc::new(inner))
    }
}

impl Voter {
    pub fn read_election_state(&self) -> ElectionState {
        *self.state.lock()
    }

    pub fn write_election_state(&self, e: ElectionState) {
        let mut cur = self.state.lock();
        let was_leader = std::matches!(*cur, ElectionState::Leader);
        info!("election state -> {e:?}");
        *cur = e;
        drop(cur);

        if was_leader && !std::matches!(e, ElectionState::Leader) {
            // Every pending response dies with the leadership, and so do
            // the open transactions.
            self.command_log
                .abort_pending(|| crate::Error::NotLeader(None));
            self.transactions.invalidate_all();
        }
    }

    /// The externally visible role; a non-voting member is an Observer.
    pub fn read_roll(&self) -> Roll {
        match self.read_election_state() {
            ElectionState::Leader => Roll::Leader,
            ElectionState::Candidate => Roll::Candidate,
            ElectionState::Follower => {
                let config = self.peers.read_config();
                if config.is_voter(&self.driver.selfid()) {
                    Roll::Follower
                } else {
                    Roll::Observer
                }
            }
        }
    }

    pub async fn read_ballot(&self) -> Result<Ballot> {
        self.ballot.load_ballot().await
    }

    pub async fn write_ballot(&self, b: Ballot) -> Result<()> {
        self.ballot.save_ballot(b).await
    }

    pub fn commit_safe_term(&self, term: Term) {
        info!("commit safe term={term}");
        self.safe_term.store(term, Ordering::SeqCst);
    }

    /// Returns the current term iff the leader may queue user entries.
    pub async fn allow_queue_entry(&self) -> Result<Term> {
        let cur_term = self.ballot.load_ballot().await?.cur_term;
        let cur_safe_term = self.safe_term.load(Ordering::SeqCst);
        ensure!(
            cur_safe_term == cur_term,
            crate::Error::NotLeader(None)
        );
        Ok(cur_term)
    }

    /// A higher term seen anywhere forces Follower and clears the vote.
    pub async fn observe_term(&self, t: Term) -> Result<()> {
        let _lk = self.vote_lock.lock().await;
        let mut ballot = self.read_ballot().await?;
        if t > ballot.cur_term {
            warn!("observed newer term {t}. stepping down");
            ballot.cur_term = t;
            ballot.voted_for = None;
            self.write_ballot(ballot).await?;
            self.write_election_state(ElectionState::Follower);
        }
        Ok(())
    }

    /// Gate new proposals until `now + timeout_ms` (DisableLeaderWrite).
    pub async fn disable_write(&self, timeout_ms: i64, term: i32) -> Result<Term> {
        let ballot = self.read_ballot().await?;
        ensure!(term as Term == ballot.cur_term);
        let until = std::time::Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64);
        *self.write_gate.lock() = Some(until);
        info!("leader writes disabled for {timeout_ms}ms");
        self.events.emit(ClusterEvent::WriteGateChanged { disabled: true });
        Ok(ballot.cur_term)
    }

    pub fn write_allowed(&self) -> std::result::Result<(), crate::Error> {
        let mut gate = self.write_gate.lock();
        match *gate {
            Some(until) if std::time::Instant::now() < until => {
                Err(crate::Error::LeaderWriteDisabled)
            }
            Some(_) => {
                *gate = None;
                self.events.emit(ClusterEvent::WriteGateChanged { disabled: false });
                Ok(())
            }
            None => Ok(()),
        }
    }
}
