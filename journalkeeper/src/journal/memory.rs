use crate::process::{Ballot, BallotStore, Clock, ClusterConfig, Entry, Index, JournalStore};
use anyhow::Result;
use std::collections::BTreeMap;

pub struct MemJournal {
    entries: spin::RwLock<BTreeMap<Index, Entry>>,
    snapshot_meta: spin::Mutex<Option<(Clock, ClusterConfig)>>,
}

impl MemJournal {
    pub fn new() -> Self {
        Self {
            entries: spin::RwLock::new(BTreeMap::new()),
            snapshot_meta: spin::Mutex::new(None),
        }
    }
}

impl Default for MemJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl JournalStore for MemJournal {
    async fn append_entry(&self, e: Entry) -> Result<()> {
        let mut entries = self.entries.write();
        let last = entries.keys().next_back().copied().unwrap_or(0);
        anyhow::ensure!(
            last == 0 || e.this_clock.index == last + 1,
            crate::Error::LogStateError
        );
        entries.insert(e.this_clock.index, e);
        Ok(())
    }

    async fn insert_boundary(&self, e: Entry) -> Result<()> {
        let mut entries = self.entries.write();
        entries.clear();
        entries.insert(e.this_clock.index, e);
        Ok(())
    }

    async fn get_entry(&self, i: Index) -> Result<Option<Entry>> {
        Ok(self.entries.read().get(&i).cloned())
    }

    async fn head_index(&self) -> Result<Index> {
        Ok(self.entries.read().keys().next().copied().unwrap_or(0))
    }

    async fn last_index(&self) -> Result<Index> {
        Ok(self.entries.read().keys().next_back().copied().unwrap_or(0))
    }

    async fn truncate_after(&self, i: Index) -> Result<()> {
        self.entries.write().split_off(&(i + 1));
        Ok(())
    }

    async fn compact_before(&self, i: Index) -> Result<()> {
        let mut entries = self.entries.write();
        let keep = entries.split_off(&i);
        *entries = keep;
        Ok(())
    }

    async fn save_snapshot_meta(&self, clock: Clock, config: ClusterConfig) -> Result<()> {
        *self.snapshot_meta.lock() = Some((clock, config));
        Ok(())
    }

    async fn load_snapshot_meta(&self) -> Result<Option<(Clock, ClusterConfig)>> {
        Ok(self.snapshot_meta.lock().clone())
    }
}

pub struct MemBallot {
    ballot: spin::Mutex<Ballot>,
}

impl MemBallot {
    pub fn new() -> Self {
        Self {
            ballot: spin::Mutex::new(Ballot::new()),
        }
    }
}

impl Default for MemBallot {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BallotStore for MemBallot {
    async fn save_ballot(&self, v: Ballot) -> Result<()> {
        *self.ballot.lock() = v;
        Ok(())
    }

    async fn load_ballot(&self) -> Result<Ballot> {
        Ok(self.ballot.lock().clone())
    }
}
