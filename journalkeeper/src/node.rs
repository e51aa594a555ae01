use super::*;
use crate::process::RaftProcess;

pub struct Inner {
    selfid: NodeId,
    cache: moka::sync::Cache<NodeId, requester::Connection>,
    process: once_cell::sync::OnceCell<RaftProcess>,
}

#[derive(shrinkwraprs::Shrinkwrap, Clone)]
pub struct RaftNode(Arc<Inner>);
impl RaftNode {
    pub fn new(id: NodeId) -> Self {
        let builder = moka::sync::Cache::builder()
            .initial_capacity(100)
            .time_to_live(Duration::from_secs(60));
        let inner = Inner {
            selfid: id,
            cache: builder.build(),
            process: once_cell::sync::OnceCell::new(),
        };
        Self(inner.into())
    }

    pub fn selfid(&self) -> NodeId {
        self.selfid
    }

    pub fn get_driver(&self) -> RaftDriver {
        RaftDriver {
            self_node_id: self.selfid,
            cache: self.cache.clone(),
        }
    }

    pub fn attach_process(&self, p: RaftProcess) {
        self.process.set(p).ok();
    }

    pub fn get_process(&self) -> Result<&RaftProcess> {
        self.process
            .get()
            .ok_or_else(|| anyhow::anyhow!("no raft process attached"))
    }
}

/// Hands out cached peer connections; cheap to clone into every
/// component that talks to the network.
#[derive(Clone)]
pub struct RaftDriver {
    self_node_id: NodeId,
    cache: moka::sync::Cache<NodeId, requester::Connection>,
}
impl RaftDriver {
    pub(crate) fn selfid(&self) -> NodeId {
        self.self_node_id
    }

    pub(crate) fn connect(&self, id: NodeId) -> requester::Connection {
        self.cache
            .get_with(id, || requester::Connection::new(self.self_node_id.to_string(), id))
    }
}
