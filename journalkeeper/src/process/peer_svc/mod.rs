use super::*;

mod replication;
mod snapshot;

use std::time::Instant;

#[derive(Clone, Copy, Debug)]
pub(crate) struct ReplicationProgress {
    /// The log entries `[0, match_index]` are replicated to this node.
    pub match_index: Index,
    /// The next replication sends `[next_index, next_index + next_max_cnt)`.
    pub next_index: Index,
    pub next_max_cnt: Index,
}
impl ReplicationProgress {
    pub fn new(init_next_index: Index) -> Self {
        Self {
            match_index: 0,
            next_index: init_next_index,
            next_max_cnt: 1,
        }
    }
}

#[derive(Clone)]
pub struct PeerContexts {
    progress: ReplicationProgress,
    last_ack: Instant,
}

#[allow(dead_code)]
struct ThreadHandles {
    replicator_handle: thread::ThreadHandle,
    heartbeater_handle: thread::ThreadHandle,
}

pub struct Inner {
    config: spin::RwLock<ClusterConfig>,
    peer_contexts: spin::RwLock<HashMap<NodeId, PeerContexts>>,
    peer_threads: spin::Mutex<HashMap<NodeId, ThreadHandles>>,

    command_log: Ref<CommandLog>,
    driver: RaftDriver,
    events: EventBus,
    raft_config: RaftConfig,
}

#[derive(shrinkwraprs::Shrinkwrap, Clone)]
pub struct PeerSvc(pub Arc<Inner>);
impl PeerSvc {
    pub fn new(
        command_log: Ref<CommandLog>,
        driver: RaftDriver,
        events: EventBus,
        raft_config: RaftConfig,
    ) -> Self {
        let inner = Inner {
            config: spin::RwLock::new(ClusterConfig::default()),
            peer_contexts: spin::RwLock::new(HashMap::new()),
            peer_threads: spin::Mutex::new(HashMap::new()),
            command_log,
            driver,
            events,
            raft_config,
        };
        Self(Arc::new(inner))
    }

    /// Restore the membership from the state of the log.
    pub async fn restore_state(&self, voter: Ref<Voter>) -> Result<()> {
        let log_last_index = self.command_log.get_log_last_index().await?;
        let last_membership_index = self
            .command_log
            .find_last_membership_index(log_last_index)
            .await?;

        if let Some(last_membership_index) = last_membership_index {
            let last_membership = self
                .command_log
                .try_read_membership_change(last_membership_index)
                .await?
                .ok_or(crate::Error::LogStateError)?;
            self.set_membership(last_membership, last_membership_index, voter)
                .await?;
        };

        Ok(())
    }
}

impl PeerSvc {
    async fn add_peer(&self, id: NodeId, voter: Ref<Voter>) -> Result<()> {
        if id == self.driver.selfid() {
            return Ok(());
        }

        if self.peer_contexts.read().contains_key(&id) {
            return Ok(());
        }

        let init_progress = {
            // Start at the leader's last entry so the configuration entry
            // that introduced this peer is the first thing it receives;
            // the peer reconciles backwards from there.
            let last_log_index = self.command_log.get_log_last_index().await?;
            ReplicationProgress::new(std::cmp::max(last_log_index, 1))
        };

        self.peer_contexts.write().insert(
            id,
            PeerContexts {
                progress: init_progress,
                last_ack: Instant::now(),
            },
        );

        let thread_handles = ThreadHandles {
            replicator_handle: thread::replication::new(id, self.clone(), voter.clone()),
            heartbeater_handle: thread::heartbeat::new(
                id,
                voter,
                self.raft_config.heartbeat_interval,
            ),
        };
        self.peer_threads.lock().insert(id, thread_handles);

        Ok(())
    }

    fn remove_peer(&self, id: NodeId) {
        self.peer_threads.lock().remove(&id);
        self.peer_contexts.write().remove(&id);
    }

    /// Adopt a configuration the moment its entry is appended.
    pub async fn set_membership(
        &self,
        config: ClusterConfig,
        index: Index,
        voter: Ref<Voter>,
    ) -> Result<()> {
        let cur = self.read_config().members();
        let new = config.members();

        let add_peers: Vec<NodeId> = new.difference(&cur).cloned().collect();
        let remove_peers: Vec<NodeId> = cur.difference(&new).cloned().collect();

        // When a change needs multiple steps it is preferable to add
        // servers before removing servers.
        for id in add_peers {
            self.add_peer(id, voter.clone()).await?;
        }
        for id in remove_peers {
            self.remove_peer(id);
        }

        info!("membership changed -> {:?}", config);
        *self.config.write() = config.clone();

        self.command_log
            .membership_pointer
            .store(index, Ordering::SeqCst);

        self.events.emit(ClusterEvent::ConfigurationChanged {
            voters: config.voters.iter().cloned().collect(),
            observers: config.observers.iter().cloned().collect(),
        });

        Ok(())
    }

    pub fn read_config(&self) -> ClusterConfig {
        self.config.read().clone()
    }

    pub fn record_ack(&self, id: NodeId) {
        if let Some(peer) = self.peer_contexts.write().get_mut(&id) {
            peer.last_ack = Instant::now();
        }
    }

    pub fn acked_within(&self, id: NodeId, window: Duration) -> bool {
        match self.peer_contexts.read().get(&id) {
            Some(peer) => peer.last_ack.elapsed() < window,
            None => false,
        }
    }

    /// The largest index replicated to a quorum whose entry carries the
    /// current term. Leaders never count prior-term entries alone; those
    /// commit transitively through a current-term entry.
    pub async fn find_new_commit_index(&self, cur_term: Term) -> Result<Index> {
        let cur_commit = self.command_log.commit_pointer.load(Ordering::SeqCst);

        let last_log_index = self.command_log.get_log_last_index().await?;
        let selfid = self.driver.selfid();

        let match_of = |id: &NodeId| -> Index {
            if *id == selfid {
                return last_log_index;
            }
            self.peer_contexts
                .read()
                .get(id)
                .map(|p| p.progress.match_index)
                .unwrap_or(0)
        };

        let config = self.read_config();
        let mut candidates: Vec<Index> = config.members().iter().map(|id| match_of(id)).collect();
        candidates.sort_unstable();
        candidates.dedup();

        let mut best = cur_commit;
        for n in candidates.into_iter().rev() {
            if n <= cur_commit {
                break;
            }
            if config.quorum_ok(|id| match_of(id) >= n) {
                best = n;
                break;
            }
        }
        if best == cur_commit {
            return Ok(cur_commit);
        }

        let term_at_best = self.command_log.get_entry(best).await?.this_clock.term;
        if term_at_best != cur_term {
            return Ok(cur_commit);
        }
        Ok(best)
    }

    pub fn reset_progress(&self, init_next_index: Index) {
        let mut peer_contexts = self.peer_contexts.write();
        for (_, peer) in peer_contexts.iter_mut() {
            peer.progress = ReplicationProgress::new(init_next_index);
            peer.last_ack = Instant::now();
        }
    }

    /// Choose the most advanced follower and send it TimeoutNow.
    pub async fn transfer_leadership(&self) -> Result<()> {
        let mut xs = {
            let config = self.read_config();
            let peer_contexts = self.peer_contexts.read();
            let mut out = vec![];
            for (id, peer) in peer_contexts.iter() {
                if !config.is_voter(id) {
                    continue;
                }
                out.push((*id, peer.progress.match_index));
            }
            out
        };
        // highest match_index last
        xs.sort_by_key(|x| x.1);

        if let Some(new_leader) = xs.pop() {
            info!("transfer leadership to {}", new_leader.0);
            let conn = self.driver.connect(new_leader.0);
            conn.send_timeout_now().await?;
        }

        Ok(())
    }
}
