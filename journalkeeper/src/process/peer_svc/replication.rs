use super::*;

impl PeerSvc {
    pub(crate) fn read_progress(&self, follower_id: NodeId) -> Result<ReplicationProgress> {
        Ok(self
            .peer_contexts
            .read()
            .get(&follower_id)
            .ok_or(crate::Error::PeerNotFound(follower_id))?
            .progress)
    }

    pub(crate) fn write_progress(&self, follower_id: NodeId, p: ReplicationProgress) -> Result<()> {
        self.peer_contexts
            .write()
            .get_mut(&follower_id)
            .ok_or(crate::Error::PeerNotFound(follower_id))?
            .progress = p;
        Ok(())
    }

    pub async fn advance_replication(&self, follower_id: NodeId, voter: &Voter) -> Result<bool> {
        let old_progress = self.read_progress(follower_id)?;
        let cur_last_log_index = self.command_log.get_log_last_index().await?;

        // More entries to send?
        let should_send = cur_last_log_index >= old_progress.next_index;
        if !should_send {
            return Ok(false);
        }

        let ballot = voter.read_ballot().await?;

        // The entries to be sent may already be compacted away. In that
        // case the follower is caught up with a snapshot instead.
        let head_index = self.command_log.get_log_head_index().await?;
        if old_progress.next_index <= head_index {
            warn!(
                "entry not found at next_index (idx={}) for {}. installing a snapshot",
                old_progress.next_index, follower_id,
            );
            self.install_snapshot_on(follower_id, ballot.cur_term).await?;
            return Ok(true);
        }

        let n_max_possible = cur_last_log_index - old_progress.next_index + 1;
        let n = std::cmp::min(old_progress.next_max_cnt, n_max_possible);
        ensure!(n >= 1);

        let prev_clock = self
            .command_log
            .get_entry(old_progress.next_index - 1)
            .await?
            .this_clock;
        let mut entries = Vec::with_capacity(n as usize);
        for i in old_progress.next_index..old_progress.next_index + n {
            entries.push(self.command_log.get_entry(i).await?);
        }

        let req = request::AppendEntries {
            leader_id: self.driver.selfid(),
            term: ballot.cur_term,
            prev_clock,
            entries,
            leader_commit: self.command_log.commit_pointer.load(Ordering::SeqCst),
        };

        let conn = self.driver.connect(follower_id);
        let send_resp = conn.send_append_entries(req).await;

        let new_progress = if let Ok(resp) = send_resp {
            self.record_ack(follower_id);
            if resp.term > ballot.cur_term {
                voter.observe_term(resp.term).await?;
                return Ok(false);
            }
            if resp.success {
                let n_inserted = resp.n_inserted;
                ReplicationProgress {
                    match_index: old_progress.next_index + n_inserted - 1,
                    next_index: old_progress.next_index + n_inserted,
                    // All entries in: double the width for quick catch-up.
                    next_max_cnt: if n_inserted == n { n * 2 } else { n },
                }
            } else {
                // Rewind. The conflict hint jumps over the whole
                // conflicting term in one step.
                let mut next = std::cmp::min(
                    old_progress.next_index - 1,
                    resp.log_last_index + 1,
                );
                if let Some(conflict) = resp.conflict {
                    next = std::cmp::min(next, conflict.index);
                }
                ReplicationProgress {
                    match_index: old_progress.match_index,
                    next_index: std::cmp::max(next, 1),
                    next_max_cnt: 1,
                }
            }
        } else {
            old_progress
        };

        self.write_progress(follower_id, new_progress)?;

        Ok(true)
    }
}
