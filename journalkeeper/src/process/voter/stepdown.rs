use super::*;

impl Voter {
    pub async fn try_stepdown(&self) -> Result<()> {
        ensure!(std::matches!(
            self.read_election_state(),
            ElectionState::Leader
        ));

        // A leader that lost contact with a quorum for the stepdown
        // window stops accepting writes so clients re-route.
        let window = self.config.quorum_stepdown_timeout;
        let config = self.peers.read_config();
        let selfid = self.driver.selfid();
        let quorum_alive =
            config.quorum_ok(|id| *id == selfid || self.peers.acked_within(*id, window));
        if !quorum_alive {
            warn!("lost contact with a quorum. stepping down");
            self.write_election_state(ElectionState::Follower);
            return Ok(());
        }

        // A leader removed from the committed configuration hands off.
        let last_membership_change_index =
            self.command_log.membership_pointer.load(Ordering::SeqCst);
        if last_membership_change_index == 0 {
            return Ok(());
        }
        // Ensure the membership entry is committed, otherwise the change
        // may still be lost.
        ensure!(
            last_membership_change_index
                <= self.command_log.commit_pointer.load(Ordering::SeqCst)
        );

        let config = self
            .command_log
            .try_read_membership_change(last_membership_change_index)
            .await?
            .ok_or(crate::Error::LogStateError)?;
        ensure!(!config.is_voter(&selfid));

        info!("removed from the configuration. step down");
        self.write_election_state(ElectionState::Follower);
        self.peers.transfer_leadership().await?;

        Ok(())
    }
}
