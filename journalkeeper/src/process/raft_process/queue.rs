use super::*;

impl RaftProcess {
    /// Configuration entries take effect the moment they are appended,
    /// not when they commit.
    pub(crate) async fn process_membership_change(&self, e: &Entry) -> Result<()> {
        if e.partition != RAFT_PARTITION {
            return Ok(());
        }
        match Command::deserialize(&e.payload) {
            Command::ClusterConfiguration { config } | Command::SnapshotBoundary { config } => {
                self.peers
                    .set_membership(config, e.this_clock.index, Ref(self.voter.clone()))
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Leader-side append of one Raft-internal entry.
    pub(crate) async fn queue_new_entry(
        &self,
        payload: Bytes,
        completion: Option<Completion>,
    ) -> Result<Index> {
        let cur_term = self.voter.allow_queue_entry().await?;

        let append_index = self
            .command_log
            .append_new_entry(payload.clone(), cur_term, completion)
            .await?;

        let e = self.command_log.get_entry(append_index).await?;
        self.process_membership_change(&e).await?;
        Ok(append_index)
    }

    /// Follower-side insertion of a replicated batch.
    pub(crate) async fn queue_received_entries(
        &self,
        req: request::AppendEntries,
    ) -> Result<response::AppendEntries> {
        let cur_term = self.voter.read_ballot().await?.cur_term;

        let mut prev_clock = req.prev_clock;
        let mut n_inserted = 0u64;
        for e in req.entries {
            let this_clock = e.this_clock;
            match self.command_log.try_insert_entry(prev_clock, e).await? {
                command_log::TryInsertResult::Inserted => {
                    let inserted = self.command_log.get_entry(this_clock.index).await?;
                    self.process_membership_change(&inserted).await?;
                    n_inserted += 1;
                }
                command_log::TryInsertResult::Skipped => {
                    n_inserted += 1;
                }
                command_log::TryInsertResult::Rejected { conflict } => {
                    warn!("rejected append entry (clock={:?})", this_clock);
                    return Ok(response::AppendEntries {
                        term: cur_term,
                        success: false,
                        n_inserted: 0,
                        log_last_index: self.command_log.get_log_last_index().await?,
                        conflict,
                    });
                }
            }
            prev_clock = this_clock;
        }

        Ok(response::AppendEntries {
            term: cur_term,
            success: true,
            n_inserted,
            log_last_index: self.command_log.get_log_last_index().await?,
            conflict: None,
        })
    }
}
