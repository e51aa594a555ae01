use super::*;

impl CommandLog {
    /// Run the kernel effect of the next committed entry and settle its
    /// replication-level response.
    pub(crate) async fn advance_kern_process(&self, voter: Voter) -> Result<bool> {
        let cur_kern_index = self.kern_pointer.load(Ordering::SeqCst);
        if cur_kern_index >= self.commit_pointer.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let process_index = cur_kern_index + 1;
        let e = self.get_entry(process_index).await?;

        debug!("process kern@{process_index}");
        if e.partition == RAFT_PARTITION {
            if let Command::Barrier(term) = Command::deserialize(&e.payload) {
                voter.commit_safe_term(term);
            }
        }

        if let Some(c) = self.commit_completions.lock().remove(&process_index) {
            c.settle(None);
        }

        self.kern_pointer.fetch_max(process_index, Ordering::SeqCst);

        Ok(true)
    }

    /// Apply the next entry on the single application stream and settle
    /// its `All`-level response with the result.
    pub(crate) async fn advance_apply_process(&self, app: App) -> Result<bool> {
        let cur_apply_index = self.apply_pointer.load(Ordering::SeqCst);
        if cur_apply_index >= self.kern_pointer.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let process_index = cur_apply_index + 1;
        let e = self.get_entry(process_index).await?;

        debug!("process apply@{process_index}");
        if e.partition != RAFT_PARTITION {
            let resp = app.apply(&e).await?;
            self.fold_digest(process_index, &resp);
            self.applied_cache.insert(process_index, resp.clone());
            if let Some(c) = self.apply_completions.lock().remove(&process_index) {
                c.settle(Some(resp));
            }
        }

        self.apply_pointer.fetch_max(process_index, Ordering::SeqCst);

        Ok(true)
    }
}
