use super::*;

pub enum TryInsertResult {
    Inserted,
    Skipped,
    /// The follower's log disagrees at `prev`; the leader should rewind.
    Rejected {
        /// The conflicting term and the first index held of it, when the
        /// follower has an entry at `prev.index` with another term.
        conflict: Option<Clock>,
    },
}

impl CommandLog {
    /// Append one Raft-internal entry (barrier, configuration).
    pub async fn append_new_entry(
        &self,
        payload: Bytes,
        term: Term,
        completion: Option<Completion>,
    ) -> Result<Index> {
        let _g = self.append_lock.lock().await;

        let append_index = self.get_log_last_index().await? + 1;
        let e = Entry {
            this_clock: Clock {
                term,
                index: append_index,
            },
            partition: RAFT_PARTITION,
            batch_size: 1,
            timestamp: unix_millis(),
            header: None,
            payload,
        };
        if let Some(c) = completion {
            self.register_commit_completion(append_index, c);
        }
        self.storage.append_entry(e).await?;

        Ok(append_index)
    }

    /// Append a batch of user entries under one lock acquisition so the
    /// assigned index range is contiguous. Completions are registered at
    /// their level before the entries are durable:
    /// `Receive` settles on index assignment, `Persistence` right after
    /// local durability, the rest when their stage is reached.
    pub async fn append_user_entries(
        &self,
        requests: Vec<(UpdateRequest, Option<Bytes>)>,
        term: Term,
        response_level: ResponseLevel,
        completions: Vec<Completion>,
    ) -> Result<Vec<Index>> {
        ensure!(requests.len() == completions.len());
        let _g = self.append_lock.lock().await;

        let first = self.get_log_last_index().await? + 1;
        let indices: Vec<Index> = (0..requests.len() as u64).map(|k| first + k).collect();

        let mut persist_completions = vec![];
        for (k, c) in completions.into_iter().enumerate() {
            let i = indices[k];
            match response_level {
                ResponseLevel::Receive => c.settle(None),
                ResponseLevel::Persistence => persist_completions.push(c),
                ResponseLevel::Replication => self.register_commit_completion(i, c),
                ResponseLevel::All => self.register_apply_completion(i, c),
            }
        }

        for (k, (req, header)) in requests.into_iter().enumerate() {
            let e = Entry {
                this_clock: Clock {
                    term,
                    index: indices[k],
                },
                partition: req.partition,
                batch_size: req.batch_size,
                timestamp: unix_millis(),
                header,
                payload: req.payload,
            };
            self.storage.append_entry(e).await?;
        }

        for c in persist_completions {
            c.settle(None);
        }

        Ok(indices)
    }

    /// Insert one replicated entry, reconciling with the local log.
    /// `prev` is the clock right below `entry`.
    pub async fn try_insert_entry(&self, prev: Clock, entry: Entry) -> Result<TryInsertResult> {
        let _g = self.append_lock.lock().await;

        let local_prev = self.try_get_entry(prev.index).await?.map(|e| e.this_clock);
        let matches = match (prev.index, local_prev) {
            (0, _) => true,
            (_, Some(c)) => c == prev,
            (_, None) => false,
        };
        if !matches {
            let conflict = match local_prev {
                Some(c) => Some(self.first_clock_of_term(c).await?),
                None => None,
            };
            return Ok(TryInsertResult::Rejected { conflict });
        }

        let this_index = entry.this_clock.index;
        if let Some(old) = self.try_get_entry(this_index).await? {
            if old.this_clock == entry.this_clock {
                // Same term and index implies the same entry.
                return Ok(TryInsertResult::Skipped);
            }
            // A conflicting suffix from a deposed leader; drop it durably
            // before the overwriting entry is acknowledged.
            warn!("truncating conflicting suffix from {}", this_index);
            self.storage.truncate_after(this_index - 1).await?;
            self.drop_completions_from(this_index);
        }

        self.storage.append_entry(entry).await?;
        Ok(TryInsertResult::Inserted)
    }

    /// First clock of the term that `c` belongs to, scanning back through
    /// the local log. Lets the leader skip the whole conflicting term.
    async fn first_clock_of_term(&self, c: Clock) -> Result<Clock> {
        let head = self.get_log_head_index().await?;
        let mut first = c;
        let mut i = c.index;
        while i > head {
            i -= 1;
            match self.try_get_entry(i).await? {
                Some(e) if e.this_clock.term == c.term => first = e.this_clock,
                _ => break,
            }
        }
        Ok(first)
    }

    fn drop_completions_from(&self, i: Index) {
        let commits: Vec<Completion> = {
            let mut m = self.commit_completions.lock();
            m.split_off(&i).into_values().collect()
        };
        let applies: Vec<Completion> = {
            let mut m = self.apply_completions.lock();
            m.split_off(&i).into_values().collect()
        };
        for c in commits.into_iter().chain(applies) {
            c.fail(crate::Error::NotLeader(None));
        }
    }
}
