use super::*;

use crate::event::EventBus;

use anyhow::ensure;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

mod api;
pub mod snapshot;
pub(crate) use api::*;
mod peer_svc;
use peer_svc::PeerSvc;
mod command_log;
use command_log::CommandLog;
mod voter;
use voter::Voter;
mod query_queue;
use query_queue::QueryQueue;
mod app;
use app::App;

mod command;
mod completion;
use command::Command;
use completion::*;
mod raft_process;
pub use raft_process::RaftProcess;
mod thread;
pub use snapshot::SnapshotStream;

pub type Term = u64;
pub type Index = u64;

/// The partition reserved for Raft-internal entries (noop barriers,
/// configuration changes, snapshot boundaries). User updates must
/// target a lower partition.
pub const RAFT_PARTITION: u16 = u16::MAX;

#[derive(Clone, Copy, Eq, Debug)]
pub struct Clock {
    pub term: Term,
    pub index: Index,
}
impl PartialEq for Clock {
    fn eq(&self, that: &Self) -> bool {
        self.term == that.term && self.index == that.index
    }
}

/// One element of the replicated journal.
/// Once written at `(term, index)` an entry is never mutated;
/// a follower may only truncate it away as part of a suffix.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub this_clock: Clock,
    pub partition: u16,
    /// Number of logical sub-entries carried in `payload`.
    pub batch_size: u16,
    /// Leader-side wall clock at propose time, in unix millis.
    pub timestamp: i64,
    /// Opaque application metadata.
    pub header: Option<Bytes>,
    pub payload: Bytes,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ballot {
    pub cur_term: Term,
    pub voted_for: Option<NodeId>,
}
impl Ballot {
    pub fn new() -> Self {
        Self {
            cur_term: 0,
            voted_for: None,
        }
    }
}

/// The committed voter/observer sets. During a joint-consensus change
/// `old_voters` holds the outgoing set and a proposal commits only with
/// majorities in both sets.
#[derive(Clone, Debug, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ClusterConfig {
    pub voters: HashSet<NodeId>,
    pub old_voters: Option<HashSet<NodeId>>,
    pub observers: HashSet<NodeId>,
}
impl ClusterConfig {
    pub fn is_joint(&self) -> bool {
        self.old_voters.is_some()
    }

    pub fn is_voter(&self, id: &NodeId) -> bool {
        self.voters.contains(id)
            || self
                .old_voters
                .as_ref()
                .map(|old| old.contains(id))
                .unwrap_or(false)
    }

    /// Every node that receives replication: voters of both generations
    /// plus observers.
    pub fn members(&self) -> HashSet<NodeId> {
        let mut out = self.voters.clone();
        if let Some(old) = &self.old_voters {
            out.extend(old.iter().cloned());
        }
        out.extend(self.observers.iter().cloned());
        out
    }

    /// True iff `pred` holds on a majority of `voters` and, during joint
    /// consensus, also on a majority of `old_voters`.
    pub fn quorum_ok(&self, pred: impl Fn(&NodeId) -> bool) -> bool {
        fn majority(set: &HashSet<NodeId>, pred: &impl Fn(&NodeId) -> bool) -> bool {
            if set.is_empty() {
                return true;
            }
            let n_ok = set.iter().filter(|id| pred(id)).count();
            n_ok >= set.len() / 2 + 1
        }
        majority(&self.voters, &pred)
            && self
                .old_voters
                .as_ref()
                .map(|old| majority(old, &pred))
                .unwrap_or(true)
    }
}

/// Externally visible role of a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Roll {
    Leader,
    Candidate,
    Follower,
    Observer,
}

/// The stage of progress at which a client's update future resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseLevel {
    /// Acknowledged by the leader; resolves to null.
    Receive,
    /// Persisted in the leader's journal; resolves to null.
    Persistence,
    /// Replicated to a quorum; resolves to null.
    Replication,
    /// Applied by the state machine; resolves to the applied results.
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consistency {
    /// Leader-routed, linearizable.
    Strong,
    /// Served by any server against its own applied state.
    Sequential,
}

/// One client update proposal; becomes one journal entry.
#[derive(Clone, Debug)]
pub struct UpdateRequest {
    pub payload: Bytes,
    pub partition: u16,
    pub batch_size: u16,
}
impl UpdateRequest {
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            partition: 0,
            batch_size: 1,
        }
    }
}

#[derive(shrinkwraprs::Shrinkwrap, Clone)]
struct Ref<T>(T);

/// The user-supplied deterministic state machine.
///
/// `apply` runs on one logical execution stream: while one entry is being
/// applied no other is, and entries arrive in index order.
#[async_trait::async_trait]
pub trait StateMachine: Sync + Send + 'static {
    async fn apply(&self, entry: &Entry) -> Result<Bytes>;
    async fn query(&self, query: &[u8]) -> Result<Bytes>;
    async fn install_snapshot(&self, index: Index) -> Result<()>;
    async fn save_snapshot(&self, st: SnapshotStream, index: Index) -> Result<()>;
    async fn open_snapshot(&self, index: Index) -> Result<SnapshotStream>;
    async fn delete_snapshots_before(&self, index: Index) -> Result<()>;
    async fn get_latest_snapshot(&self) -> Result<Index>;
}

#[async_trait::async_trait]
impl<T: StateMachine> StateMachine for Arc<T> {
    async fn apply(&self, entry: &Entry) -> Result<Bytes> {
        (**self).apply(entry).await
    }
    async fn query(&self, query: &[u8]) -> Result<Bytes> {
        (**self).query(query).await
    }
    async fn install_snapshot(&self, index: Index) -> Result<()> {
        (**self).install_snapshot(index).await
    }
    async fn save_snapshot(&self, st: SnapshotStream, index: Index) -> Result<()> {
        (**self).save_snapshot(st, index).await
    }
    async fn open_snapshot(&self, index: Index) -> Result<SnapshotStream> {
        (**self).open_snapshot(index).await
    }
    async fn delete_snapshots_before(&self, index: Index) -> Result<()> {
        (**self).delete_snapshots_before(index).await
    }
    async fn get_latest_snapshot(&self) -> Result<Index> {
        (**self).get_latest_snapshot().await
    }
}

/// The backing journal. `append_entry` must be durable when it returns and
/// `truncate_after` must be durable before any reply that depends on it.
#[async_trait::async_trait]
pub trait JournalStore: Sync + Send + 'static {
    /// `e.this_clock.index` must be `last_index + 1`.
    async fn append_entry(&self, e: Entry) -> Result<()>;
    /// Reset the journal to a single snapshot-boundary entry
    /// (snapshot installation and cluster bootstrap).
    async fn insert_boundary(&self, e: Entry) -> Result<()>;
    async fn get_entry(&self, i: Index) -> Result<Option<Entry>>;
    /// First retained index, 0 when empty.
    async fn head_index(&self) -> Result<Index>;
    async fn last_index(&self) -> Result<Index>;
    async fn truncate_after(&self, i: Index) -> Result<()>;
    /// Drop whole segments strictly below `i`. The entry at `i` stays
    /// readable.
    async fn compact_before(&self, i: Index) -> Result<()>;
    /// The latest snapshot boundary and the configuration committed at it.
    async fn save_snapshot_meta(&self, clock: Clock, config: ClusterConfig) -> Result<()>;
    async fn load_snapshot_meta(&self) -> Result<Option<(Clock, ClusterConfig)>>;
}

/// Persistent voter record, fsynced before any reply that depends on it.
#[async_trait::async_trait]
pub trait BallotStore: Sync + Send + 'static {
    async fn save_ballot(&self, v: Ballot) -> Result<()>;
    async fn load_ballot(&self) -> Result<Ballot>;
}

pub(crate) fn unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(port: u16) -> NodeId {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn set(ports: &[u16]) -> HashSet<NodeId> {
        ports.iter().map(|p| node(*p)).collect()
    }

    #[test]
    fn quorum_is_simple_majority() {
        let config = ClusterConfig {
            voters: set(&[1, 2, 3]),
            old_voters: None,
            observers: set(&[9]),
        };
        let up = set(&[1, 2]);
        assert!(config.quorum_ok(|id| up.contains(id)));
        let up = set(&[1]);
        assert!(!config.quorum_ok(|id| up.contains(id)));
        // observers never count toward the quorum
        let up = set(&[1, 9]);
        assert!(!config.quorum_ok(|id| up.contains(id)));
    }

    #[test]
    fn joint_quorum_needs_both_majorities() {
        // {1,2,3} -> {1,2,4}
        let config = ClusterConfig {
            voters: set(&[1, 2, 4]),
            old_voters: Some(set(&[1, 2, 3])),
            observers: HashSet::new(),
        };
        // 1 and 2 form a majority in both generations.
        let up = set(&[1, 2]);
        assert!(config.quorum_ok(|id| up.contains(id)));
        // 1 and 3 satisfy only the outgoing set.
        let up = set(&[1, 3]);
        assert!(!config.quorum_ok(|id| up.contains(id)));
        // 1 and 4 satisfy only the incoming set.
        let up = set(&[1, 4]);
        assert!(!config.quorum_ok(|id| up.contains(id)));
    }

    #[test]
    fn members_spans_generations_and_observers() {
        let config = ClusterConfig {
            voters: set(&[1, 2, 4]),
            old_voters: Some(set(&[1, 2, 3])),
            observers: set(&[9]),
        };
        assert_eq!(config.members(), set(&[1, 2, 3, 4, 9]));
        assert!(config.is_voter(&node(3)));
        assert!(!config.is_voter(&node(9)));
    }
}
