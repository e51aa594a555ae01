use super::*;

impl RaftProcess {
    async fn leader_hint(&self) -> Option<NodeId> {
        self.voter.read_ballot().await.ok()?.voted_for
    }

    pub(crate) async fn ensure_leader(&self) -> Result<()> {
        if !std::matches!(
            self.voter.read_election_state(),
            voter::ElectionState::Leader
        ) {
            let hint = self.leader_hint().await.filter(|id| *id != self.driver.selfid());
            return Err(crate::Error::NotLeader(hint).into());
        }
        Ok(())
    }

    /// Split an inline entry header off the payload when the client says
    /// it already framed one; the journal must not re-prepend it then.
    fn split_header(payload: Bytes) -> Result<(Option<Bytes>, Bytes)> {
        let mut buf = payload;
        let header = crate::wire::codec::get_bytes(&mut buf)?;
        Ok((Some(header), buf))
    }

    /// The client update pipeline: assign indices, persist, replicate,
    /// and resolve at the requested response level.
    pub async fn update_cluster_state(
        &self,
        req: request::UpdateClusterState,
    ) -> Result<response::UpdateClusterState> {
        self.ensure_running()?;
        self.ensure_leader().await?;
        self.voter.write_allowed()?;
        let cur_term = self.voter.allow_queue_entry().await?;

        ensure!(!req.requests.is_empty());
        for r in &req.requests {
            ensure!(r.partition < RAFT_PARTITION);
            ensure!(r.batch_size >= 1);
        }

        let mut entries = Vec::with_capacity(req.requests.len());
        for r in req.requests {
            let (header, payload) = if req.include_header {
                Self::split_header(r.payload.clone())?
            } else {
                (None, r.payload.clone())
            };
            entries.push((
                UpdateRequest {
                    payload,
                    partition: r.partition,
                    batch_size: r.batch_size,
                },
                header,
            ));
        }

        if let Some(tx_id) = req.transaction {
            self.buffer_in_transaction(tx_id, entries).await?;
            return Ok(response::UpdateClusterState { results: None });
        }

        let n = entries.len();
        let mut receivers = Vec::with_capacity(n);
        let mut completions = Vec::with_capacity(n);
        for _ in 0..n {
            let (c, rx) = prepare_completion();
            completions.push(c);
            receivers.push(rx);
        }

        self.command_log
            .append_user_entries(entries, cur_term, req.response_level, completions)
            .await?;

        let deadline = self.response_deadline();
        let joined = futures::future::try_join_all(receivers);
        let settled = tokio::time::timeout(deadline, joined)
            .await
            .map_err(|_| crate::Error::Timeout)?
            .map_err(|_| crate::Error::Stopped)?;

        let mut applied = Vec::with_capacity(n);
        for s in settled {
            let v = s.map_err(anyhow::Error::from)?;
            applied.push(v.unwrap_or_default());
        }

        // Sub-`All` levels resolve to a single null, not a list of nulls.
        let results = match req.response_level {
            ResponseLevel::All => Some(applied),
            _ => None,
        };
        Ok(response::UpdateClusterState { results })
    }

    pub async fn query_cluster_state(
        &self,
        req: request::QueryClusterState,
    ) -> Result<response::QueryClusterState> {
        self.ensure_running()?;

        let result = match req.consistency {
            // Any server may answer against its own applied state.
            Consistency::Sequential => self.command_log.app.query(&req.query).await?,
            // Leader-routed read-index query.
            Consistency::Strong => {
                self.ensure_leader().await?;
                self.voter.allow_queue_entry().await?;

                let (completion, rx) = prepare_completion();
                let read_index = self.command_log.commit_pointer.load(Ordering::SeqCst);
                self.query_queue.register(
                    read_index,
                    query_queue::Query {
                        message: req.query,
                        completion,
                    },
                );

                let deadline = self.response_deadline();
                let settled = tokio::time::timeout(deadline, rx)
                    .await
                    .map_err(|_| crate::Error::Timeout)?
                    .map_err(|_| crate::Error::Stopped)?;
                settled.map_err(anyhow::Error::from)?.unwrap_or_default()
            }
        };
        Ok(response::QueryClusterState { result })
    }

    pub async fn request_vote(&self, req: request::RequestVote) -> Result<response::RequestVote> {
        self.ensure_running()?;
        let vote_granted = self.voter.receive_vote(req).await?;
        let term = self.voter.read_ballot().await?.cur_term;
        Ok(response::RequestVote { term, vote_granted })
    }

    pub async fn append_entries(
        &self,
        req: request::AppendEntries,
    ) -> Result<response::AppendEntries> {
        self.ensure_running()?;
        let accepted = self
            .voter
            .receive_append_entries_meta(req.leader_id, req.term, req.leader_commit)
            .await?;
        let cur_term = self.voter.read_ballot().await?.cur_term;
        if !accepted {
            return Ok(response::AppendEntries {
                term: cur_term,
                success: false,
                n_inserted: 0,
                log_last_index: self.command_log.get_log_last_index().await?,
                conflict: None,
            });
        }

        if req.entries.is_empty() {
            // Heartbeat.
            return Ok(response::AppendEntries {
                term: cur_term,
                success: true,
                n_inserted: 0,
                log_last_index: self.command_log.get_log_last_index().await?,
                conflict: None,
            });
        }

        self.queue_received_entries(req).await
    }

    pub async fn install_snapshot(
        &self,
        req: request::InstallSnapshot,
    ) -> Result<response::InstallSnapshot> {
        self.ensure_running()?;
        let accepted = self
            .voter
            .receive_append_entries_meta(req.leader_id, req.term, 0)
            .await?;
        let cur_term = self.voter.read_ballot().await?.cur_term;
        if !accepted {
            return Ok(response::InstallSnapshot {
                term: cur_term,
                success: false,
            });
        }

        // Collect chunks in order; a gap restarts the transfer.
        {
            let mut buf = self.snapshot_buf.lock();
            let continuing = std::matches!(
                &*buf,
                Some(b) if b.clock == req.last_included && b.next_offset == req.offset
            );
            if !continuing {
                if req.offset != 0 {
                    warn!("out-of-order snapshot chunk at offset {}", req.offset);
                    *buf = None;
                    return Ok(response::InstallSnapshot {
                        term: cur_term,
                        success: false,
                    });
                }
                *buf = Some(SnapshotBuf {
                    clock: req.last_included,
                    next_offset: 0,
                    data: bytes::BytesMut::new(),
                });
            }
            let b = buf.as_mut().expect("snapshot buffer exists");
            b.data.extend_from_slice(&req.data);
            b.next_offset += req.data.len() as u64;
        }

        if !req.done {
            return Ok(response::InstallSnapshot {
                term: cur_term,
                success: true,
            });
        }

        let collected = self
            .snapshot_buf
            .lock()
            .take()
            .expect("snapshot buffer exists");
        let boundary_index = req.last_included.index;

        info!("log is too old. installing snapshot@{boundary_index} from the leader");
        if boundary_index > 1 {
            let data = collected.data.freeze();
            let st: SnapshotStream =
                Box::pin(futures::stream::once(async move { Ok(data) }));
            self.command_log.app.save_snapshot(st, boundary_index).await?;
            self.command_log.app.install_snapshot(boundary_index).await?;
        }

        let boundary = Entry {
            this_clock: req.last_included,
            partition: RAFT_PARTITION,
            batch_size: 1,
            timestamp: unix_millis(),
            header: None,
            payload: Command::SnapshotBoundary {
                config: req.config.clone(),
            }
            .serialize(),
        };
        self.command_log
            .install_boundary(boundary, req.config.clone())
            .await?;
        self.peers
            .set_membership(req.config, boundary_index, Ref(self.voter.clone()))
            .await?;

        Ok(response::InstallSnapshot {
            term: cur_term,
            success: true,
        })
    }

    pub async fn disable_leader_write(
        &self,
        req: request::DisableLeaderWrite,
    ) -> Result<response::DisableLeaderWrite> {
        self.ensure_running()?;
        self.ensure_leader().await?;
        let term = self.voter.disable_write(req.timeout_ms, req.term).await?;
        Ok(response::DisableLeaderWrite { term })
    }

    pub async fn timeout_now(&self) -> Result<response::TimeoutNow> {
        self.ensure_running()?;
        info!("received TimeoutNow. try to become a leader");
        self.voter.try_promote(true).await?;
        Ok(response::TimeoutNow)
    }

    pub async fn watch(&self, req: request::Watch) -> Result<response::Watch> {
        self.ensure_running()?;
        let (events, head) = self.events.since(req.since);
        Ok(response::Watch { events, head })
    }
}
