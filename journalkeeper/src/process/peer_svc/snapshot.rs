use super::*;

use futures::StreamExt;

impl PeerSvc {
    /// Stream the latest snapshot to a follower whose next entry was
    /// compacted away, then restart replication right after the boundary.
    pub(crate) async fn install_snapshot_on(&self, follower_id: NodeId, term: Term) -> Result<()> {
        let boundary = self.command_log.snapshot_clock();
        let config = self.command_log.snapshot_config();
        let selfid = self.driver.selfid();

        let conn = self.driver.connect(follower_id);

        // Boundary 1 is the empty bootstrap state; there is no snapshot
        // content to ship.
        if boundary.index <= 1 {
            let req = request::InstallSnapshot {
                leader_id: selfid,
                term,
                last_included: boundary,
                config: config.clone(),
                offset: 0,
                data: Bytes::new(),
                done: true,
            };
            let resp = conn.install_snapshot(req).await?;
            ensure!(resp.success);
        } else {
            let mut st = self.command_log.app.open_snapshot(boundary.index).await?;
            let mut offset = 0u64;
            while let Some(chunk) = st.next().await {
                let data = chunk?;
                let req = request::InstallSnapshot {
                    leader_id: selfid,
                    term,
                    last_included: boundary,
                    config: config.clone(),
                    offset,
                    data: data.clone(),
                    done: false,
                };
                let resp = conn.install_snapshot(req).await?;
                ensure!(resp.success);
                offset += data.len() as u64;
            }
            let req = request::InstallSnapshot {
                leader_id: selfid,
                term,
                last_included: boundary,
                config: config.clone(),
                offset,
                data: Bytes::new(),
                done: true,
            };
            let resp = conn.install_snapshot(req).await?;
            ensure!(resp.success);
        }

        info!(
            "snapshot@{} installed on {}",
            boundary.index, follower_id
        );
        self.record_ack(follower_id);
        self.write_progress(
            follower_id,
            ReplicationProgress {
                match_index: boundary.index,
                next_index: boundary.index + 1,
                next_max_cnt: 1,
            },
        )?;
        Ok(())
    }
}
