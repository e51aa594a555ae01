use super::*;

impl CommandLog {
    /// Find the last configuration-bearing entry in `[head, to]`.
    pub async fn find_last_membership_index(&self, to: Index) -> Result<Option<Index>> {
        let head = std::cmp::max(self.get_log_head_index().await?, 1);
        for i in (head..=to).rev() {
            let e = self.get_entry(i).await?;
            if e.partition != RAFT_PARTITION {
                continue;
            }
            match Command::deserialize(&e.payload) {
                Command::ClusterConfiguration { .. } | Command::SnapshotBoundary { .. } => {
                    return Ok(Some(i))
                }
                _ => {}
            }
        }
        Ok(None)
    }

    pub async fn try_read_membership_change(&self, index: Index) -> Result<Option<ClusterConfig>> {
        let e = self.get_entry(index).await?;
        if e.partition != RAFT_PARTITION {
            return Ok(None);
        }
        match Command::deserialize(&e.payload) {
            Command::ClusterConfiguration { config } => Ok(Some(config)),
            Command::SnapshotBoundary { config } => Ok(Some(config)),
            _ => Ok(None),
        }
    }

    /// A new configuration may be queued only when the previous one is
    /// committed and not mid-joint-transition.
    pub async fn allow_queue_new_membership(&self) -> Result<bool> {
        let mi = self.membership_pointer.load(Ordering::SeqCst);
        if mi > self.commit_pointer.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if mi == 0 {
            return Ok(true);
        }
        let cur = self.try_read_membership_change(mi).await?;
        Ok(!cur.map(|c| c.is_joint()).unwrap_or(false))
    }
}
