use super::*;

/// Raft-internal commands, carried as the payload of entries on
/// `RAFT_PARTITION`. User entries never decode through here.
#[derive(serde::Serialize, serde::Deserialize)]
pub enum Command {
    /// Appended by a fresh leader so it can commit its own term.
    Barrier(Term),
    ClusterConfiguration {
        config: ClusterConfig,
    },
    /// Marks the first retained index after a compaction. Entries below
    /// it are only reachable through the snapshot.
    SnapshotBoundary {
        config: ClusterConfig,
    },
}

impl Command {
    pub fn serialize(self) -> Bytes {
        bincode::serialize(&self).unwrap().into()
    }

    pub fn deserialize(x: &[u8]) -> Command {
        bincode::deserialize(x).unwrap()
    }
}
