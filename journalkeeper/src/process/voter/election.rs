use super::*;

/// Why a vote request was denied, or that it was granted.
enum Verdict {
    Grant,
    StaleTerm,
    CandidateNotVoter,
    LeaderAlive,
    LogBehind,
    VoteSpent,
}

impl Voter {
    /// Decide one vote request. The verdict is computed against a single
    /// read of the ballot, and a grant is durable before the reply
    /// leaves this server, so no term can hand out two of them.
    pub async fn receive_vote(&self, req: request::RequestVote) -> Result<bool> {
        let _lk = self.vote_lock.lock().await;

        let config = self.peers.read_config();
        // An observer holds no ballot worth granting.
        if !config.is_voter(&self.driver.selfid()) {
            return Ok(false);
        }

        let ballot = self.read_ballot().await?;
        let local_last = self.command_log.get_log_last_clock().await?;
        let leader_failed = self
            .leader_failure_detector
            .get_election_timeout()
            .is_some();

        let verdict = Self::judge(&req, &ballot, &config, local_last, leader_failed);
        let granted = matches!(verdict, Verdict::Grant);

        // A probe round leaves the ballot untouched.
        if req.pre_vote {
            return Ok(granted);
        }

        if matches!(verdict, Verdict::StaleTerm) {
            warn!(
                "denied vote: candidate term {} is behind local term {}",
                req.vote_term, ballot.cur_term
            );
            return Ok(false);
        }

        let mut next = ballot;
        if req.vote_term > next.cur_term {
            // Entering the candidate's term forgets any older vote,
            // granted or not.
            next.cur_term = req.vote_term;
            next.voted_for = None;
            self.write_election_state(ElectionState::Follower);
        }
        if granted {
            next.voted_for = Some(req.candidate_id);
        }
        self.write_ballot(next).await?;

        match verdict {
            Verdict::Grant => {
                info!("granted vote to {} at term {}", req.candidate_id, req.vote_term)
            }
            Verdict::CandidateNotVoter => {
                warn!("denied vote: {} is not a voter here", req.candidate_id)
            }
            Verdict::LeaderAlive => debug!("denied vote: the leader is still answering"),
            Verdict::LogBehind => warn!(
                "denied vote: candidate log {:?} is behind {:?}",
                req.candidate_clock, local_last
            ),
            Verdict::VoteSpent => warn!("denied vote: term {} is already spent", req.vote_term),
            Verdict::StaleTerm => {}
        }
        Ok(granted)
    }

    fn judge(
        req: &request::RequestVote,
        ballot: &Ballot,
        config: &ClusterConfig,
        local_last: Clock,
        leader_failed: bool,
    ) -> Verdict {
        if req.vote_term < ballot.cur_term {
            return Verdict::StaleTerm;
        }
        // Only members of a voter set may be elected; observers and
        // departed servers campaign in vain.
        if !config.is_voter(&req.candidate_id) {
            return Verdict::CandidateNotVoter;
        }
        // A forced vote (leadership transfer) overrides a live leader.
        if !req.force_vote && !leader_failed {
            return Verdict::LeaderAlive;
        }
        let c = req.candidate_clock;
        if (c.term, c.index) < (local_last.term, local_last.index) {
            return Verdict::LogBehind;
        }
        let fresh_term = req.vote_term > ballot.cur_term;
        match &ballot.voted_for {
            Some(id) if !fresh_term && *id != req.candidate_id => Verdict::VoteSpent,
            _ => Verdict::Grant,
        }
    }

    pub fn get_election_timeout(&self) -> Option<Duration> {
        // A node outside the voter sets won't become a leader anyway;
        // this also keeps observers out of elections.
        if !self
            .peers
            .read_config()
            .is_voter(&self.driver.selfid())
        {
            return None;
        }
        self.leader_failure_detector.get_election_timeout()
    }

    /// Attempt to take leadership. The campaign runs twice: a probe
    /// round that binds nothing, then the real election at the probed
    /// term. Binding the term means voting for ourselves durably before
    /// any peer is asked.
    pub async fn try_promote(&self, force_vote: bool) -> Result<()> {
        let _lk = self.vote_lock.lock().await;

        let config = self.peers.read_config();
        ensure!(config.is_voter(&self.driver.selfid()));

        let campaign_term = self.read_ballot().await?.cur_term + 1;

        if !self
            .campaign(campaign_term, &config, force_vote, true)
            .await
            .unwrap_or(false)
        {
            info!("probe for term {campaign_term} fell short. staying follower");
            return Ok(());
        }

        {
            let mut ballot = self.read_ballot().await?;
            ensure!(ballot.cur_term + 1 == campaign_term);
            ballot.cur_term = campaign_term;
            ballot.voted_for = Some(self.driver.selfid());
            self.write_ballot(ballot).await?;
        }
        // Candidate state keeps this server from stacking a second
        // election on top of this one.
        self.write_election_state(ElectionState::Candidate);

        info!("campaigning for term {campaign_term}");
        // An I/O failure mid-campaign counts as a lost election.
        let won = self
            .campaign(campaign_term, &config, force_vote, false)
            .await
            .unwrap_or(false);

        if won {
            self.become_leader(campaign_term).await?;
        } else {
            info!("campaign for term {campaign_term} lost. back to follower");
            self.write_election_state(ElectionState::Follower);
        }
        Ok(())
    }

    /// One round of vote requests, counted against every voter set in
    /// the configuration: during a joint transition the campaign must
    /// win majorities in both generations.
    async fn campaign(
        &self,
        term: Term,
        config: &ClusterConfig,
        force_vote: bool,
        pre_vote: bool,
    ) -> Result<bool> {
        let selfid = self.driver.selfid();
        let candidate_clock = self.command_log.get_log_last_clock().await?;

        let electorate: Vec<NodeId> = {
            let mut all = config.voters.clone();
            if let Some(old) = &config.old_voters {
                all.extend(old.iter().cloned());
            }
            all.into_iter().filter(|id| *id != selfid).collect()
        };

        let mut polls = vec![];
        for voter_id in electorate {
            let conn = self.driver.connect(voter_id);
            polls.push(async move {
                let req = request::RequestVote {
                    candidate_id: selfid,
                    candidate_clock,
                    vote_term: term,
                    force_vote,
                    pre_vote,
                };
                let granted = match conn.request_vote(req).await {
                    Ok(resp) => resp.vote_granted,
                    Err(_) => false,
                };
                (voter_id, granted)
            });
        }

        let round_deadline = self.config.election_timeout * 2;
        let returns = tokio::time::timeout(round_deadline, futures::future::join_all(polls))
            .await
            .unwrap_or_default();

        let mut granted: HashSet<NodeId> = returns
            .into_iter()
            .filter_map(|(id, g)| g.then_some(id))
            .collect();
        granted.insert(selfid);

        Ok(config.quorum_ok(|id| granted.contains(id)))
    }

    /// The first act of a leadership is a barrier entry at the new term;
    /// committing it is what makes the term safe for user writes.
    async fn become_leader(&self, term: Term) -> Result<()> {
        let index = self
            .command_log
            .append_new_entry(Command::Barrier(term).serialize(), term, None)
            .await?;

        self.peers.reset_progress(index);
        self.write_election_state(ElectionState::Leader);
        self.events.emit(ClusterEvent::LeaderChanged {
            leader: Some(self.driver.selfid()),
            term,
        });

        info!("won the election. leading term {term} from barrier@{index}");
        Ok(())
    }
}
