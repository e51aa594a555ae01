use super::*;

mod cluster;
mod queue;
mod responder;
mod transaction;

pub(crate) use transaction::Transactions;

struct ThreadHandles {
    advance_kern_handle: thread::ThreadHandle,
    advance_apply_handle: thread::ThreadHandle,
    advance_commit_handle: thread::ThreadHandle,
    advance_snapshot_handle: thread::ThreadHandle,
    election_handle: thread::ThreadHandle,
    log_compaction_handle: thread::ThreadHandle,
    query_execution_handle: thread::ThreadHandle,
    stepdown_handle: thread::ThreadHandle,
}

/// A chunked snapshot mid-installation.
struct SnapshotBuf {
    clock: Clock,
    next_offset: u64,
    data: bytes::BytesMut,
}

pub struct RaftProcess {
    command_log: CommandLog,
    voter: Voter,
    peers: PeerSvc,
    query_queue: QueryQueue,
    driver: RaftDriver,
    transactions: Transactions,
    events: EventBus,
    snapshot_buf: spin::Mutex<Option<SnapshotBuf>>,
    config: RaftConfig,
    stopped: std::sync::atomic::AtomicBool,
    _thread_handles: ThreadHandles,
}

impl RaftProcess {
    pub async fn new(
        app: impl StateMachine,
        log_store: impl JournalStore,
        ballot_store: impl BallotStore,
        driver: RaftDriver,
        config: RaftConfig,
    ) -> Result<Self> {
        let app = App::new(app);

        let query_queue = QueryQueue::new(Ref(app.clone()));

        let command_log = CommandLog::new(log_store, app.clone());
        command_log.restore_state().await?;

        let events = EventBus::new(256);
        let transactions = Transactions::new();

        let peers = PeerSvc::new(
            Ref(command_log.clone()),
            driver.clone(),
            events.clone(),
            config.clone(),
        );

        let voter = Voter::new(
            ballot_store,
            command_log.clone(),
            peers.clone(),
            transactions.clone(),
            driver.clone(),
            events.clone(),
            config.clone(),
        );

        peers.restore_state(Ref(voter.clone())).await?;

        let _thread_handles = ThreadHandles {
            advance_kern_handle: thread::advance_kern::new(command_log.clone(), voter.clone()),
            advance_apply_handle: thread::advance_apply::new(command_log.clone(), app.clone()),
            advance_commit_handle: thread::advance_commit::new(
                command_log.clone(),
                Ref(peers.clone()),
                Ref(voter.clone()),
            ),
            advance_snapshot_handle: thread::advance_snapshot::new(
                command_log.clone(),
                config.compaction_interval,
            ),
            election_handle: thread::election::new(voter.clone()),
            log_compaction_handle: thread::log_compaction::new(
                command_log.clone(),
                config.compaction_interval,
            ),
            query_execution_handle: thread::query_execution::new(
                query_queue.clone(),
                Ref(command_log.clone()),
            ),
            stepdown_handle: thread::stepdown::new(voter.clone()),
        };

        Ok(Self {
            command_log,
            voter,
            peers,
            query_queue,
            driver,
            transactions,
            events,
            snapshot_buf: spin::Mutex::new(None),
            config,
            stopped: std::sync::atomic::AtomicBool::new(false),
            _thread_handles,
        })
    }

    /// Graceful shutdown: every in-flight future fails with `Stopped`.
    /// The periodic duties die with the process when it is dropped.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.command_log.abort_pending(|| crate::Error::Stopped);
        self.transactions.invalidate_all();
        info!("raft process stopped");
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        ensure!(
            !self.stopped.load(Ordering::SeqCst),
            crate::Error::Stopped
        );
        Ok(())
    }

    /// Response deadline derived from the response level contract.
    pub(crate) fn response_deadline(&self) -> Duration {
        self.config.election_timeout * self.config.response_deadline_factor
    }

    pub fn applied_digest(&self) -> u64 {
        self.command_log.applied_digest()
    }

    pub fn last_applied(&self) -> Index {
        self.command_log.apply_pointer.load(Ordering::SeqCst)
    }

    pub fn commit_index(&self) -> Index {
        self.command_log.commit_pointer.load(Ordering::SeqCst)
    }
}
