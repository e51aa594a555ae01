use super::*;

#[derive(Clone)]
pub struct Thread {
    command_log: CommandLog,
    peers: Ref<PeerSvc>,
    voter: Ref<Voter>,
}
impl Thread {
    async fn run_once(&self) -> Result<()> {
        let election_state = self.voter.read_election_state();
        ensure!(std::matches!(election_state, voter::ElectionState::Leader));

        let cur_term = self.voter.read_ballot().await?.cur_term;
        let cur_commit_index = self.command_log.commit_pointer.load(Ordering::SeqCst);
        let new_commit_index = self.peers.find_new_commit_index(cur_term).await?;

        if new_commit_index > cur_commit_index {
            debug!("commit -> {new_commit_index}");
            self.command_log
                .commit_pointer
                .store(new_commit_index, Ordering::SeqCst);
        }

        self.try_finalize_joint_configuration().await?;

        Ok(())
    }

    /// Once a joint configuration commits, the leader appends the final
    /// single-set configuration to complete the transition.
    async fn try_finalize_joint_configuration(&self) -> Result<()> {
        let mi = self.command_log.membership_pointer.load(Ordering::SeqCst);
        if mi == 0 || mi > self.command_log.commit_pointer.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(config) = self.command_log.try_read_membership_change(mi).await? else {
            return Ok(());
        };
        if !config.is_joint() {
            return Ok(());
        }

        info!("joint configuration committed. appending the final configuration");
        let target = ClusterConfig {
            voters: config.voters,
            old_voters: None,
            observers: config.observers,
        };
        let cur_term = self.voter.allow_queue_entry().await?;
        let index = self
            .command_log
            .append_new_entry(
                Command::ClusterConfiguration {
                    config: target.clone(),
                }
                .serialize(),
                cur_term,
                None,
            )
            .await?;
        self.peers
            .set_membership(target, index, self.voter.clone())
            .await?;
        Ok(())
    }

    fn do_loop(self) -> ThreadHandle {
        let hdl = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(10));
            loop {
                interval.tick().await;
                let fut = {
                    let this = self.clone();
                    async move { this.run_once().await }
                };
                let _ = defensive_panic_guard(fut).await;
            }
        })
        .abort_handle();

        ThreadHandle(hdl)
    }
}

pub fn new(command_log: CommandLog, peers: Ref<PeerSvc>, voter: Ref<Voter>) -> ThreadHandle {
    Thread {
        command_log,
        peers,
        voter,
    }
    .do_loop()
}
