//! The client router: leader discovery, redirect handling, retry with
//! backoff, transaction pinning, and event watching.

use super::*;

use crate::requester::Connection;
use crate::Error;
use anyhow::ensure;
use process::*;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub max_retries: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub event_poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff_base: Duration::from_millis(50),
            backoff_cap: Duration::from_secs(2),
            event_poll_interval: Duration::from_millis(200),
        }
    }
}

/// Summary of the cluster as one server sees it.
#[derive(Clone, Debug)]
pub struct ServerInfo {
    pub leader: Option<NodeId>,
    pub term: u64,
    pub voters: Vec<NodeId>,
    pub observers: Vec<NodeId>,
}

pub type WatchHandle = u64;

struct Poller(tokio::task::AbortHandle);
impl Drop for Poller {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Inner {
    label: String,
    servers: spin::RwLock<Vec<NodeId>>,
    leader: spin::Mutex<Option<NodeId>>,
    conns: moka::sync::Cache<NodeId, Connection>,
    cursor: AtomicUsize,
    config: ClientConfig,
    /// Transactions are pinned to the leader that created them.
    tx_leaders: spin::Mutex<HashMap<Uuid, NodeId>>,
    watchers: spin::Mutex<HashMap<WatchHandle, Box<dyn Fn(&ClusterEvent) + Send + Sync>>>,
    next_watcher: AtomicU64,
    poller: spin::Mutex<Option<Poller>>,
    stopped: AtomicBool,
}

#[derive(shrinkwraprs::Shrinkwrap, Clone)]
pub struct RaftClient(Arc<Inner>);

impl RaftClient {
    pub fn new(servers: Vec<NodeId>) -> Self {
        Self::with_config(servers, ClientConfig::default())
    }

    pub fn with_config(servers: Vec<NodeId>, config: ClientConfig) -> Self {
        let conns = moka::sync::Cache::builder()
            .initial_capacity(16)
            .time_to_live(Duration::from_secs(60))
            .build();
        let inner = Inner {
            label: format!("client-{}", Uuid::new_v4()),
            servers: spin::RwLock::new(servers),
            leader: spin::Mutex::new(None),
            conns,
            cursor: AtomicUsize::new(0),
            config,
            tx_leaders: spin::Mutex::new(HashMap::new()),
            watchers: spin::Mutex::new(HashMap::new()),
            next_watcher: AtomicU64::new(1),
            poller: spin::Mutex::new(None),
            stopped: AtomicBool::new(false),
        };
        Self(Arc::new(inner))
    }

    fn ensure_running(&self) -> Result<()> {
        ensure!(!self.stopped.load(Ordering::SeqCst), Error::Stopped);
        Ok(())
    }

    fn connect(&self, id: NodeId) -> Connection {
        let label = self.label.clone();
        self.conns.get_with(id, || Connection::new(label, id))
    }

    /// The current leader guess, falling back to endpoint rotation.
    fn pick_target(&self) -> Result<NodeId> {
        if let Some(leader) = *self.leader.lock() {
            return Ok(leader);
        }
        let servers = self.servers.read();
        ensure!(!servers.is_empty(), "no servers configured");
        let k = self.cursor.fetch_add(1, Ordering::SeqCst) % servers.len();
        Ok(servers[k])
    }

    fn learn_leader(&self, hint: Option<NodeId>) {
        if let Some(id) = hint {
            debug!("leader hint -> {id}");
        }
        *self.leader.lock() = hint;
    }

    /// Retry loop shared by every routed operation: follow `NotLeader`
    /// hints, rotate endpoints on connection failures, back off
    /// exponentially, give up after the configured attempts.
    async fn with_retry<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: Fn(NodeId, Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.config.backoff_base;
        let mut last_err = anyhow::Error::from(Error::Timeout);
        for _ in 0..self.config.max_retries {
            self.ensure_running()?;
            let target = self.pick_target()?;
            let conn = self.connect(target);
            match f(target, conn).await {
                Ok(v) => {
                    self.learn_leader(Some(target));
                    return Ok(v);
                }
                Err(e) => {
                    match e.downcast_ref::<Error>() {
                        Some(Error::NotLeader(hint)) => {
                            self.learn_leader(*hint);
                        }
                        Some(Error::Timeout) | None => {
                            // Connection trouble: forget the guess and
                            // rotate to the next endpoint.
                            self.learn_leader(None);
                        }
                        Some(_) => return Err(e),
                    }
                    last_err = e;
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, self.config.backoff_cap);
        }
        Err(last_err)
    }

    /// Submit update proposals and resolve at the requested response
    /// level. Sub-`All` levels resolve to `None`.
    pub async fn update(
        &self,
        requests: Vec<UpdateRequest>,
        include_header: bool,
        response_level: ResponseLevel,
    ) -> Result<Option<Vec<Bytes>>> {
        self.ensure_running()?;
        let resp = self
            .with_retry(|_, conn| {
                let requests = requests.clone();
                async move {
                    conn.update_cluster_state(request::UpdateClusterState {
                        requests,
                        include_header,
                        response_level,
                        transaction: None,
                    })
                    .await
                }
            })
            .await?;
        Ok(resp.results)
    }

    /// Single-entry form: defaults partition 0, batch size 1, no inline
    /// header, `Replication` level; returns the first batch result.
    pub async fn update_one(&self, payload: Bytes) -> Result<Option<Bytes>> {
        self.update_one_with(UpdateRequest::new(payload), false, ResponseLevel::Replication)
            .await
    }

    pub async fn update_one_with(
        &self,
        request: UpdateRequest,
        include_header: bool,
        response_level: ResponseLevel,
    ) -> Result<Option<Bytes>> {
        let rs = self
            .update(vec![request], include_header, response_level)
            .await?;
        Ok(rs.and_then(|mut v| {
            if v.is_empty() {
                None
            } else {
                Some(v.remove(0))
            }
        }))
    }

    /// Strongly consistent query (leader-routed read-index).
    pub async fn query(&self, query: Bytes) -> Result<Bytes> {
        self.query_with(query, Consistency::Strong).await
    }

    pub async fn query_with(&self, query: Bytes, consistency: Consistency) -> Result<Bytes> {
        self.ensure_running()?;
        let resp = self
            .with_retry(|_, conn| {
                let query = query.clone();
                async move {
                    conn.query_cluster_state(request::QueryClusterState { query, consistency })
                        .await
                }
            })
            .await?;
        Ok(resp.result)
    }

    pub async fn get_servers(&self) -> Result<ServerInfo> {
        self.ensure_running()?;
        let info = self
            .with_retry(|_, conn| async move { conn.get_servers().await })
            .await?;
        if info.known_leader.is_some() {
            self.learn_leader(info.known_leader);
        }
        Ok(ServerInfo {
            leader: info.known_leader,
            term: info.leader_term,
            voters: info.voters,
            observers: info.observers,
        })
    }

    /// Poll until the cluster has a known leader.
    pub async fn wait_for_cluster_ready(&self, timeout: Duration) -> Result<()> {
        let give_up = tokio::time::Instant::now() + timeout;
        loop {
            self.ensure_running()?;
            if let Ok(info) = self.get_servers().await {
                if info.leader.is_some() {
                    return Ok(());
                }
            }
            ensure!(tokio::time::Instant::now() < give_up, Error::Timeout);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn update_voters(&self, old: Vec<NodeId>, new: Vec<NodeId>) -> Result<()> {
        self.ensure_running()?;
        self.with_retry(|_, conn| {
            let old = old.clone();
            let new = new.clone();
            async move { conn.update_voters(request::UpdateVoters { old, new }).await }
        })
        .await
    }

    pub async fn convert_roll(&self, node: NodeId, roll: Roll) -> Result<()> {
        self.ensure_running()?;
        self.with_retry(|_, conn| async move {
            conn.convert_roll(request::ConvertRoll { node, roll }).await
        })
        .await
    }

    /// Halt proposal acceptance at the current leader for `timeout_ms`.
    pub async fn disable_leader_write(&self, timeout_ms: i64) -> Result<()> {
        self.ensure_running()?;
        let term = self.get_servers().await?.term as i32;
        self.with_retry(|_, conn| async move {
            conn.disable_leader_write(request::DisableLeaderWrite { timeout_ms, term })
                .await?;
            Ok(())
        })
        .await
    }

    /// Graceful shutdown: subsequent and in-flight calls fail `Stopped`.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        *self.poller.lock() = None;
        self.watchers.lock().clear();
        info!("client stopped");
    }
}

// ---- transactions

impl RaftClient {
    fn pinned(&self, tx_id: &Uuid) -> Result<Connection> {
        let leader = *self
            .tx_leaders
            .lock()
            .get(tx_id)
            .ok_or(Error::TransactionInvalidated)?;
        Ok(self.connect(leader))
    }

    /// A redirect on a pinned call means the creating leader is gone,
    /// and the session with it.
    fn map_tx_err(e: anyhow::Error) -> anyhow::Error {
        match e.downcast_ref::<Error>() {
            Some(Error::NotLeader(_)) => Error::TransactionInvalidated.into(),
            _ => e,
        }
    }

    pub async fn begin_transaction(&self) -> Result<Uuid> {
        self.ensure_running()?;
        let (tx_id, leader) = self
            .with_retry(|target, conn| async move {
                let resp = conn.create_transaction().await?;
                Ok((resp.tx_id, target))
            })
            .await?;
        // Pin every later call of this session to the creating leader.
        self.tx_leaders.lock().insert(tx_id, leader);
        Ok(tx_id)
    }

    pub async fn update_in(
        &self,
        tx_id: Uuid,
        requests: Vec<UpdateRequest>,
        include_header: bool,
    ) -> Result<()> {
        self.ensure_running()?;
        let conn = self.pinned(&tx_id)?;
        conn.update_cluster_state(request::UpdateClusterState {
            requests,
            include_header,
            response_level: ResponseLevel::Receive,
            transaction: Some(tx_id),
        })
        .await
        .map_err(Self::map_tx_err)?;
        Ok(())
    }

    pub async fn commit_transaction(&self, tx_id: Uuid) -> Result<()> {
        self.ensure_running()?;
        let conn = self.pinned(&tx_id)?;
        conn.complete_transaction(request::CompleteTransaction {
            tx_id,
            commit: true,
        })
        .await
        .map_err(Self::map_tx_err)?;
        self.tx_leaders.lock().remove(&tx_id);
        Ok(())
    }

    pub async fn rollback_transaction(&self, tx_id: Uuid) -> Result<()> {
        self.ensure_running()?;
        let conn = self.pinned(&tx_id)?;
        conn.complete_transaction(request::CompleteTransaction {
            tx_id,
            commit: false,
        })
        .await
        .map_err(Self::map_tx_err)?;
        self.tx_leaders.lock().remove(&tx_id);
        Ok(())
    }

    pub async fn opening_transactions(&self) -> Result<Vec<Uuid>> {
        self.ensure_running()?;
        let resp = self
            .with_retry(|_, conn| async move { conn.opening_transactions().await })
            .await?;
        Ok(resp.tx_ids)
    }
}

// ---- events

impl RaftClient {
    /// Register a cluster-event listener, starting the poll loop on the
    /// first registration.
    pub fn watch(&self, listener: impl Fn(&ClusterEvent) + Send + Sync + 'static) -> WatchHandle {
        let handle = self.next_watcher.fetch_add(1, Ordering::SeqCst);
        self.watchers.lock().insert(handle, Box::new(listener));
        self.ensure_poller();
        handle
    }

    pub fn unwatch(&self, handle: WatchHandle) {
        self.watchers.lock().remove(&handle);
    }

    fn ensure_poller(&self) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return;
        }
        let this = self.clone();
        let hdl = tokio::spawn(async move {
            let mut since = 0u64;
            let mut interval = tokio::time::interval(this.config.event_poll_interval);
            loop {
                interval.tick().await;
                let target = match this.pick_target() {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                let conn = this.connect(target);
                match conn.watch(request::Watch { since }).await {
                    Ok(resp) => {
                        for (_, ev) in &resp.events {
                            let watchers = this.watchers.lock();
                            for f in watchers.values() {
                                f(ev);
                            }
                        }
                        since = std::cmp::max(since, resp.head);
                    }
                    Err(e) => {
                        warn!("event poll failed: {e}");
                    }
                }
            }
        })
        .abort_handle();
        *poller = Some(Poller(hdl));
    }
}
