use super::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not the leader (hint={0:?})")]
    NotLeader(Option<NodeId>),
    #[error("leader writes are disabled")]
    LeaderWriteDisabled,
    #[error("deadline exceeded")]
    Timeout,
    #[error("transaction invalidated by a leader change")]
    TransactionInvalidated,
    #[error("malformed frame")]
    MalformedFrame,
    #[error("unknown rpc type (code={0})")]
    UnknownType(i32),
    #[error("server stopped")]
    Stopped,
    #[error("unrecoverable storage fault: {0}")]
    StorageFault(String),
    #[error("another configuration change is in flight")]
    ConfigurationConflict,
    #[error("peer (id={0}) not found")]
    PeerNotFound(NodeId),
    #[error("log state is broken")]
    LogStateError,
    #[error("entry not found at index {0}")]
    EntryNotFound(u64),
}
