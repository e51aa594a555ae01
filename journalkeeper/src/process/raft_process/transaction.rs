use super::*;

use uuid::Uuid;

pub(crate) struct TxSession {
    /// The leader term the session was created at. A leader change
    /// invalidates the session.
    pub term: Term,
    pub requests: Vec<(UpdateRequest, Option<Bytes>)>,
}

#[derive(shrinkwraprs::Shrinkwrap, Clone)]
pub(crate) struct Transactions(Arc<spin::Mutex<HashMap<Uuid, TxSession>>>);

impl Transactions {
    pub fn new() -> Self {
        Self(Arc::new(spin::Mutex::new(HashMap::new())))
    }

    pub fn invalidate_all(&self) {
        let n = {
            let mut m = self.lock();
            let n = m.len();
            m.clear();
            n
        };
        if n > 0 {
            warn!("invalidated {n} open transactions");
        }
    }
}

impl RaftProcess {
    async fn ensure_tx_leader(&self) -> Result<Term> {
        let ballot = self.voter.read_ballot().await?;
        ensure!(
            std::matches!(
                self.voter.read_election_state(),
                voter::ElectionState::Leader
            ),
            crate::Error::NotLeader(ballot.voted_for)
        );
        Ok(ballot.cur_term)
    }

    pub async fn create_transaction(&self) -> Result<response::CreateTransaction> {
        self.ensure_running()?;
        let term = self.ensure_tx_leader().await?;
        let tx_id = Uuid::new_v4();
        self.transactions.lock().insert(
            tx_id,
            TxSession {
                term,
                requests: vec![],
            },
        );
        info!("transaction {tx_id} opened at term {term}");
        Ok(response::CreateTransaction { tx_id })
    }

    /// Buffer updates into an open transaction. Nothing reaches the
    /// journal until commit.
    pub(crate) async fn buffer_in_transaction(
        &self,
        tx_id: Uuid,
        requests: Vec<(UpdateRequest, Option<Bytes>)>,
    ) -> Result<()> {
        let term = self.ensure_tx_leader().await?;
        let mut m = self.transactions.lock();
        let session = m
            .get_mut(&tx_id)
            .ok_or(crate::Error::TransactionInvalidated)?;
        ensure!(
            session.term == term,
            crate::Error::TransactionInvalidated
        );
        session.requests.extend(requests);
        Ok(())
    }

    /// Commit appends the buffered entries atomically (one contiguous
    /// index range); rollback just discards them.
    pub async fn complete_transaction(
        &self,
        req: request::CompleteTransaction,
    ) -> Result<response::CompleteTransaction> {
        self.ensure_running()?;
        let term = self.ensure_tx_leader().await?;

        let cur_term = self.voter.allow_queue_entry().await?;
        if req.commit {
            self.voter.write_allowed()?;
        }

        let session = self
            .transactions
            .lock()
            .remove(&req.tx_id)
            .ok_or(crate::Error::TransactionInvalidated)?;
        ensure!(
            session.term == term,
            crate::Error::TransactionInvalidated
        );

        if !req.commit {
            info!("transaction {} rolled back", req.tx_id);
            return Ok(response::CompleteTransaction);
        }

        if session.requests.is_empty() {
            return Ok(response::CompleteTransaction);
        }

        let n = session.requests.len();
        let mut receivers = Vec::with_capacity(n);
        let mut completions = Vec::with_capacity(n);
        for _ in 0..n {
            let (c, rx) = prepare_completion();
            completions.push(c);
            receivers.push(rx);
        }

        self.command_log
            .append_user_entries(
                session.requests,
                cur_term,
                ResponseLevel::Replication,
                completions,
            )
            .await?;

        let deadline = self.response_deadline();
        let joined = futures::future::try_join_all(receivers);
        let results = tokio::time::timeout(deadline, joined)
            .await
            .map_err(|_| crate::Error::Timeout)?
            .map_err(|_| crate::Error::Stopped)?;
        for r in results {
            r.map_err(anyhow::Error::from)?;
        }

        info!("transaction {} committed ({n} entries)", req.tx_id);
        Ok(response::CompleteTransaction)
    }

    pub async fn opening_transactions(&self) -> Result<response::OpeningTransactions> {
        self.ensure_running()?;
        self.ensure_tx_leader().await?;
        let tx_ids = self.transactions.lock().keys().cloned().collect();
        Ok(response::OpeningTransactions { tx_ids })
    }
}
