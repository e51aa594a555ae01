use super::*;

impl RaftProcess {
    /// Cluster bootstrapping: a single node seeds its own journal with a
    /// boundary and a one-voter configuration, then elects itself.
    async fn init_cluster(&self) -> Result<()> {
        let selfid = self.driver.selfid();

        let init_config = ClusterConfig::default();
        let boundary = Entry {
            this_clock: Clock { term: 0, index: 1 },
            partition: RAFT_PARTITION,
            batch_size: 1,
            timestamp: unix_millis(),
            header: None,
            payload: Command::SnapshotBoundary {
                config: init_config.clone(),
            }
            .serialize(),
        };
        self.command_log
            .install_boundary(boundary, init_config)
            .await?;

        let mut voters = HashSet::new();
        voters.insert(selfid);
        let config = ClusterConfig {
            voters,
            old_voters: None,
            observers: HashSet::new(),
        };
        let add_self = Entry {
            this_clock: Clock { term: 0, index: 2 },
            partition: RAFT_PARTITION,
            batch_size: 1,
            timestamp: unix_millis(),
            header: None,
            payload: Command::ClusterConfiguration {
                config: config.clone(),
            }
            .serialize(),
        };
        self.command_log.storage.append_entry(add_self).await?;
        self.peers
            .set_membership(config, 2, Ref(self.voter.clone()))
            .await?;

        // The self-vote succeeds immediately in a one-voter cluster and
        // commit advances from there.
        self.voter.try_promote(true).await?;

        Ok(())
    }

    async fn await_commit(&self, index: Index) -> Result<()> {
        let (completion, rx) = prepare_completion();
        self.command_log.register_commit_completion(index, completion);
        let deadline = self.response_deadline();
        let settled = tokio::time::timeout(deadline, rx)
            .await
            .map_err(|_| crate::Error::Timeout)?
            .map_err(|_| crate::Error::Stopped)?;
        settled.map_err(anyhow::Error::from)?;
        Ok(())
    }

    /// Change the voter set from `old` to `new`. A change that both adds
    /// and removes voters goes through joint consensus; the final
    /// configuration is appended automatically once the joint entry
    /// commits. A single add or remove is one step, guarded against
    /// concurrent changes.
    pub async fn update_voters(&self, req: request::UpdateVoters) -> Result<response::UpdateVoters> {
        self.ensure_running()?;

        let cur = self.peers.read_config();
        let selfid = self.driver.selfid();
        if cur.voters.is_empty() && req.new == vec![selfid] {
            self.init_cluster().await?;
            return Ok(response::UpdateVoters);
        }

        self.ensure_leader().await?;
        self.voter.allow_queue_entry().await?;

        let old: HashSet<NodeId> = req.old.iter().cloned().collect();
        let new: HashSet<NodeId> = req.new.iter().cloned().collect();
        ensure!(
            old == cur.voters,
            crate::Error::ConfigurationConflict
        );
        ensure!(
            self.command_log.allow_queue_new_membership().await?,
            crate::Error::ConfigurationConflict
        );

        let n_added = new.difference(&old).count();
        let n_removed = old.difference(&new).count();

        let next = if n_added > 0 && n_removed > 0 {
            // Both directions at once: joint consensus.
            ClusterConfig {
                voters: new,
                old_voters: Some(old),
                observers: cur.observers.clone(),
            }
        } else {
            ClusterConfig {
                voters: new,
                old_voters: None,
                observers: cur.observers.clone(),
            }
        };

        let index = self
            .queue_new_entry(
                Command::ClusterConfiguration { config: next }.serialize(),
                None,
            )
            .await?;
        self.await_commit(index).await?;
        Ok(response::UpdateVoters)
    }

    /// Move one node between the voter and observer lists.
    pub async fn convert_roll(&self, req: request::ConvertRoll) -> Result<response::ConvertRoll> {
        self.ensure_running()?;
        self.ensure_leader().await?;
        self.voter.allow_queue_entry().await?;
        ensure!(
            self.command_log.allow_queue_new_membership().await?,
            crate::Error::ConfigurationConflict
        );

        let cur = self.peers.read_config();
        let mut voters = cur.voters.clone();
        let mut observers = cur.observers.clone();
        match req.roll {
            Roll::Observer => {
                voters.remove(&req.node);
                observers.insert(req.node);
            }
            Roll::Follower => {
                observers.remove(&req.node);
                voters.insert(req.node);
            }
            _ => anyhow::bail!("a node converts only to Follower or Observer"),
        }
        let next = ClusterConfig {
            voters,
            old_voters: None,
            observers,
        };

        let index = self
            .queue_new_entry(
                Command::ClusterConfiguration { config: next }.serialize(),
                None,
            )
            .await?;
        self.await_commit(index).await?;
        Ok(response::ConvertRoll)
    }

    pub async fn request_cluster_info(&self) -> Result<response::ClusterInfo> {
        self.ensure_running()?;
        let ballot = self.voter.read_ballot().await?;
        let config = self.peers.read_config();
        Ok(response::ClusterInfo {
            known_leader: ballot.voted_for,
            leader_term: ballot.cur_term,
            voters: config.voters.iter().cloned().collect(),
            observers: config.observers.iter().cloned().collect(),
        })
    }

}
