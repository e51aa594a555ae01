//! In-process cluster harness over loopback TCP, plus a small counter
//! state machine used by the scenario tests.

use anyhow::{ensure, Result};
use bytes::Bytes;
use journalkeeper::client::{ClientConfig, RaftClient};
use journalkeeper::journal::{FileBallot, FileJournal, MemBallot, MemJournal};
use journalkeeper::process::{Entry, Index, RaftProcess, SnapshotStream};
use journalkeeper::{NodeId, RaftConfig, RaftNode, StateMachine};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

pub fn delta(v: u64) -> Bytes {
    Bytes::copy_from_slice(&v.to_be_bytes())
}

pub fn parse_u64(b: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[..8]);
    u64::from_be_bytes(raw)
}

struct AppState {
    value: u64,
    last_applied: Index,
}

/// A fetch-add counter. `apply` adds the 8-byte big-endian delta and
/// returns the previous value; `query` returns the current value.
pub struct CounterApp {
    state: spin::Mutex<AppState>,
    snapshots: spin::Mutex<BTreeMap<Index, u64>>,
    headers: spin::Mutex<Vec<Option<Bytes>>>,
}

impl CounterApp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: spin::Mutex::new(AppState {
                value: 0,
                last_applied: 0,
            }),
            snapshots: spin::Mutex::new(BTreeMap::new()),
            headers: spin::Mutex::new(vec![]),
        })
    }

    pub fn value(&self) -> u64 {
        self.state.lock().value
    }

    /// The application metadata attached to each applied entry, in
    /// apply order.
    pub fn seen_headers(&self) -> Vec<Option<Bytes>> {
        self.headers.lock().clone()
    }

    /// Capture a snapshot of the current applied state; the framework
    /// picks it up and moves the journal boundary.
    pub fn snapshot_now(&self) {
        let st = self.state.lock();
        if st.last_applied > 1 {
            self.snapshots.lock().insert(st.last_applied, st.value);
        }
    }
}

#[async_trait::async_trait]
impl StateMachine for CounterApp {
    async fn apply(&self, entry: &Entry) -> Result<Bytes> {
        let add = parse_u64(&entry.payload);
        self.headers.lock().push(entry.header.clone());
        let mut st = self.state.lock();
        let old = st.value;
        st.value += add;
        st.last_applied = entry.this_clock.index;
        Ok(delta(old))
    }

    async fn query(&self, _query: &[u8]) -> Result<Bytes> {
        Ok(delta(self.state.lock().value))
    }

    async fn install_snapshot(&self, index: Index) -> Result<()> {
        let value = if index <= 1 {
            0
        } else {
            *self
                .snapshots
                .lock()
                .get(&index)
                .ok_or_else(|| anyhow::anyhow!("no snapshot at {index}"))?
        };
        let mut st = self.state.lock();
        st.value = value;
        st.last_applied = index;
        Ok(())
    }

    async fn save_snapshot(&self, st: SnapshotStream, index: Index) -> Result<()> {
        use futures::StreamExt;
        let mut raw = vec![];
        let mut st = st;
        while let Some(chunk) = st.next().await {
            raw.extend_from_slice(&chunk?);
        }
        ensure!(raw.len() >= 8);
        self.snapshots.lock().insert(index, parse_u64(&raw));
        Ok(())
    }

    async fn open_snapshot(&self, index: Index) -> Result<SnapshotStream> {
        let value = *self
            .snapshots
            .lock()
            .get(&index)
            .ok_or_else(|| anyhow::anyhow!("no snapshot at {index}"))?;
        let data = delta(value);
        let st: SnapshotStream = Box::pin(futures::stream::once(async move { Ok(data) }));
        Ok(st)
    }

    async fn delete_snapshots_before(&self, index: Index) -> Result<()> {
        let mut m = self.snapshots.lock();
        let keep = m.split_off(&index);
        *m = keep;
        Ok(())
    }

    async fn get_latest_snapshot(&self) -> Result<Index> {
        Ok(self
            .snapshots
            .lock()
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }
}

struct AbortOnDrop(tokio::task::AbortHandle);
impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct NodeHandle {
    _node: RaftNode,
    _serve: AbortOnDrop,
}

pub struct Builder {
    with_persistency: bool,
    config: RaftConfig,
}

impl Builder {
    fn new() -> Self {
        let config = RaftConfig {
            election_timeout: Duration::from_millis(150),
            heartbeat_interval: Duration::from_millis(50),
            quorum_stepdown_timeout: Duration::from_secs(2),
            compaction_interval: Duration::from_millis(300),
            ..RaftConfig::default()
        };
        Self {
            with_persistency: false,
            config,
        }
    }

    pub fn with_persistency(self, b: bool) -> Self {
        Self {
            with_persistency: b,
            ..self
        }
    }

    pub fn with_raft_config(self, config: RaftConfig) -> Self {
        Self { config, ..self }
    }

    pub async fn build(self, n: u8) -> Result<Cluster> {
        ensure!(n > 0);
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let mut cluster = Cluster {
            nodes: HashMap::new(),
            addrs: HashMap::new(),
            apps: HashMap::new(),
            dirs: HashMap::new(),
            with_persistency: self.with_persistency,
            config: self.config,
        };
        for id in 0..n {
            cluster.spawn_node(id, None).await?;
        }

        // Bootstrap the first node, then grow the voter set one step at
        // a time.
        let a0 = cluster.address(0);
        cluster
            .client_to(0)
            .update_voters(vec![], vec![a0])
            .await?;
        cluster
            .client_to(0)
            .wait_for_cluster_ready(Duration::from_secs(10))
            .await?;

        let mut voters = vec![a0];
        for id in 1..n {
            let mut next = voters.clone();
            next.push(cluster.address(id));
            cluster
                .client_to(0)
                .update_voters(voters.clone(), next.clone())
                .await?;
            voters = next;
        }

        Ok(cluster)
    }
}

pub struct Cluster {
    nodes: HashMap<u8, NodeHandle>,
    addrs: HashMap<u8, NodeId>,
    apps: HashMap<u8, Arc<CounterApp>>,
    dirs: HashMap<u8, tempfile::TempDir>,
    with_persistency: bool,
    config: RaftConfig,
}

impl Cluster {
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Create `n` nodes on loopback and join them into one voter group.
    pub async fn new(n: u8) -> Result<Self> {
        Self::builder().build(n).await
    }

    pub fn address(&self, id: u8) -> NodeId {
        self.addrs[&id]
    }

    pub fn app(&self, id: u8) -> Arc<CounterApp> {
        self.apps[&id].clone()
    }

    /// A router over every configured endpoint.
    pub fn client(&self) -> RaftClient {
        let mut servers: Vec<NodeId> = self.addrs.values().cloned().collect();
        servers.sort();
        RaftClient::new(servers)
    }

    /// A router aimed at one endpoint.
    pub fn client_to(&self, id: u8) -> RaftClient {
        RaftClient::with_config(
            vec![self.address(id)],
            ClientConfig {
                max_retries: 30,
                ..ClientConfig::default()
            },
        )
    }

    async fn spawn_node(&mut self, id: u8, reuse_addr: Option<NodeId>) -> Result<()> {
        let listener = match reuse_addr {
            Some(addr) => tokio::net::TcpListener::bind(addr.addr()).await?,
            None => tokio::net::TcpListener::bind("127.0.0.1:0").await?,
        };
        let addr = NodeId::new(listener.local_addr()?);

        let app = CounterApp::new();
        let node = RaftNode::new(addr);
        let driver = node.get_driver();

        let process = if self.with_persistency {
            let dir = self
                .dirs
                .entry(id)
                .or_insert_with(|| tempfile::tempdir().expect("tempdir"));
            let root = dir.path().join("store");
            if !root.exists() {
                FileJournal::create(&root)?;
            }
            let journal = FileJournal::open(&root).await?;
            let ballot = FileBallot::open(&root)?;
            RaftProcess::new(app.clone(), journal, ballot, driver, self.config.clone()).await?
        } else {
            RaftProcess::new(
                app.clone(),
                MemJournal::new(),
                MemBallot::new(),
                driver,
                self.config.clone(),
            )
            .await?
        };
        node.attach_process(process);

        let serve_node = node.clone();
        let hdl = tokio::spawn(async move {
            journalkeeper::service::serve(serve_node, listener).await.ok();
        })
        .abort_handle();

        self.addrs.insert(id, addr);
        self.apps.insert(id, app);
        self.nodes.insert(
            id,
            NodeHandle {
                _node: node,
                _serve: AbortOnDrop(hdl),
            },
        );
        Ok(())
    }

    /// Start one more node that is not yet part of any voter set; join
    /// it with `update_voters` or `convert_roll`.
    pub async fn spawn_extra_node(&mut self, id: u8) -> Result<()> {
        self.spawn_node(id, None).await
    }

    /// Take a node down (process and listener die together).
    pub fn remove_node(&mut self, id: u8) {
        self.nodes.remove(&id);
        self.apps.remove(&id);
    }

    /// Bring a node back on the same address from its persisted state.
    pub async fn restart_node(&mut self, id: u8) -> Result<()> {
        ensure!(self.with_persistency);
        let addr = self.address(id);
        self.nodes.remove(&id);
        // Give the old listener a moment to release the port.
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.spawn_node(id, Some(addr)).await?;
        Ok(())
    }
}
