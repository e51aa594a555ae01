use super::*;

impl Voter {
    /// Term/leader bookkeeping shared by every AppendEntries arrival,
    /// with or without entries. Returns false when the message is stale
    /// and must be rejected.
    pub async fn receive_append_entries_meta(
        &self,
        leader_id: NodeId,
        leader_term: Term,
        leader_commit: Index,
    ) -> Result<bool> {
        let _lk = self.vote_lock.lock().await;

        let mut ballot = self.read_ballot().await?;
        if leader_term < ballot.cur_term {
            warn!("append entries from a stale term. rejected");
            return Ok(false);
        }

        self.leader_failure_detector.receive_heartbeat();

        if leader_term > ballot.cur_term {
            warn!("received append entries with a newer term. reset ballot");
            ballot.cur_term = leader_term;
            ballot.voted_for = None;
            self.write_election_state(ElectionState::Follower);
        }

        if std::matches!(self.read_election_state(), ElectionState::Candidate) {
            // A valid same-term leader exists.
            self.write_election_state(ElectionState::Follower);
        }

        if ballot.voted_for != Some(leader_id) {
            info!("learn the current leader ({leader_id})");
            ballot.voted_for = Some(leader_id);
            self.events.emit(ClusterEvent::LeaderChanged {
                leader: Some(leader_id),
                term: leader_term,
            });
        }

        self.write_ballot(ballot).await?;

        let new_commit_index =
            std::cmp::min(leader_commit, self.command_log.get_log_last_index().await?);
        self.command_log
            .commit_pointer
            .fetch_max(new_commit_index, Ordering::SeqCst);

        Ok(true)
    }

    /// Leader heartbeat: an empty AppendEntries carrying the commit index.
    pub async fn send_heartbeat(&self, follower_id: NodeId) -> Result<()> {
        let ballot = self.read_ballot().await?;
        let leader_commit = self.command_log.commit_pointer.load(Ordering::SeqCst);
        let req = request::AppendEntries {
            leader_id: self.driver.selfid(),
            term: ballot.cur_term,
            prev_clock: Clock { term: 0, index: 0 },
            entries: vec![],
            leader_commit,
        };
        let conn = self.driver.connect(follower_id);
        let resp = conn.send_append_entries(req).await?;
        self.peers.record_ack(follower_id);
        if resp.term > ballot.cur_term {
            self.observe_term(resp.term).await?;
        }
        Ok(())
    }
}
