use super::*;

mod consumer;
mod membership;
mod producer;

pub use producer::TryInsertResult;

pub struct Inner {
    /// Serializes index assignment so a batch gets a contiguous range.
    pub append_lock: tokio::sync::Mutex<()>,

    /// Highest index known replicated to a quorum.
    pub commit_pointer: AtomicU64,
    /// Highest index whose kernel effects (barrier, configuration) ran.
    pub kern_pointer: AtomicU64,
    /// Highest index applied by the state machine (lastApplied).
    pub apply_pointer: AtomicU64,
    /// Index of the entry carrying the effective cluster configuration.
    pub membership_pointer: AtomicU64,

    /// Latest snapshot boundary and the configuration at it.
    snapshot_meta: spin::Mutex<(Clock, ClusterConfig)>,

    /// Rolling digest over (index, applied result); equal digests on two
    /// servers imply identical applied prefixes.
    applied_digest: AtomicU64,

    /// Pending responses resolved when the index commits.
    commit_completions: spin::Mutex<BTreeMap<Index, Completion>>,
    /// Pending responses resolved with the applied result.
    apply_completions: spin::Mutex<BTreeMap<Index, Completion>>,

    /// Recent applied results by index, for late response fan-out.
    applied_cache: moka::sync::Cache<Index, Bytes>,

    pub storage: Box<dyn JournalStore>,
    pub app: App,
}

#[derive(shrinkwraprs::Shrinkwrap, Clone)]
pub struct CommandLog(pub Arc<Inner>);

impl CommandLog {
    pub fn new(storage: impl JournalStore, app: App) -> Self {
        let applied_cache = moka::sync::Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(60))
            .build();
        let inner = Inner {
            append_lock: tokio::sync::Mutex::new(()),
            commit_pointer: AtomicU64::new(0),
            kern_pointer: AtomicU64::new(0),
            apply_pointer: AtomicU64::new(0),
            membership_pointer: AtomicU64::new(0),
            snapshot_meta: spin::Mutex::new((Clock { term: 0, index: 0 }, ClusterConfig::default())),
            applied_digest: AtomicU64::new(0xcbf2_9ce4_8422_2325),
            commit_completions: spin::Mutex::new(BTreeMap::new()),
            apply_completions: spin::Mutex::new(BTreeMap::new()),
            applied_cache,
            storage: Box::new(storage),
            app,
        };
        Self(Arc::new(inner))
    }

    /// Rebuild the volatile pointers from persisted state and let the
    /// application restore itself from its latest snapshot.
    pub async fn restore_state(&self) -> Result<()> {
        if let Some((clock, config)) = self.storage.load_snapshot_meta().await? {
            *self.snapshot_meta.lock() = (clock, config);
            let start = clock.index;
            self.commit_pointer.store(start, Ordering::SeqCst);
            self.kern_pointer.store(start, Ordering::SeqCst);
            self.apply_pointer.store(start, Ordering::SeqCst);
            if clock.index > 1 {
                self.app.install_snapshot(clock.index).await?;
            }
            info!("restored from snapshot boundary@{}", clock.index);
        }
        Ok(())
    }

    pub async fn get_log_last_index(&self) -> Result<Index> {
        self.storage.last_index().await
    }

    pub async fn get_log_head_index(&self) -> Result<Index> {
        self.storage.head_index().await
    }

    pub async fn get_entry(&self, i: Index) -> Result<Entry> {
        let e = self
            .storage
            .get_entry(i)
            .await?
            .ok_or(crate::Error::EntryNotFound(i))?;
        Ok(e)
    }

    pub async fn try_get_entry(&self, i: Index) -> Result<Option<Entry>> {
        self.storage.get_entry(i).await
    }

    /// Clock of the last entry, (0, 0) when the journal is empty.
    pub async fn get_log_last_clock(&self) -> Result<Clock> {
        let last = self.get_log_last_index().await?;
        if last == 0 {
            return Ok(Clock { term: 0, index: 0 });
        }
        Ok(self.get_entry(last).await?.this_clock)
    }

    pub fn snapshot_clock(&self) -> Clock {
        self.snapshot_meta.lock().0
    }

    pub fn snapshot_config(&self) -> ClusterConfig {
        self.snapshot_meta.lock().1.clone()
    }

    pub fn register_commit_completion(&self, i: Index, c: Completion) {
        // The kern pass may already be beyond this index.
        if i <= self.kern_pointer.load(Ordering::SeqCst) {
            c.settle(None);
            return;
        }
        self.commit_completions.lock().insert(i, c);
    }

    pub fn register_apply_completion(&self, i: Index, c: Completion) {
        // The apply pipeline may already have passed this index.
        if i <= self.apply_pointer.load(Ordering::SeqCst) {
            let cached = self.applied_cache.get(&i);
            c.settle(cached);
            return;
        }
        self.apply_completions.lock().insert(i, c);
    }

    /// Fail every pending response; used on stepdown and shutdown.
    pub fn abort_pending(&self, err: impl Fn() -> crate::Error) {
        let commits: Vec<Completion> = {
            let mut m = self.commit_completions.lock();
            std::mem::take(&mut *m).into_values().collect()
        };
        let applies: Vec<Completion> = {
            let mut m = self.apply_completions.lock();
            std::mem::take(&mut *m).into_values().collect()
        };
        for c in commits.into_iter().chain(applies) {
            c.fail(err());
        }
    }

    /// Install a replicated snapshot: reset the journal to the boundary
    /// entry and fast-forward every pointer past it.
    pub async fn install_boundary(&self, boundary: Entry, config: ClusterConfig) -> Result<()> {
        let clock = boundary.this_clock;
        self.storage.insert_boundary(boundary).await?;
        self.storage.save_snapshot_meta(clock, config.clone()).await?;
        *self.snapshot_meta.lock() = (clock, config);

        self.commit_pointer.store(clock.index, Ordering::SeqCst);
        self.kern_pointer.store(clock.index, Ordering::SeqCst);
        self.apply_pointer.store(clock.index, Ordering::SeqCst);
        Ok(())
    }

    /// Move the snapshot boundary up to the application's latest stable
    /// snapshot. Compaction follows lazily.
    pub async fn advance_snapshot_index(&self) -> Result<()> {
        let cur = self.snapshot_clock().index;
        let proposed = self.app.get_latest_snapshot().await?;
        if proposed <= cur {
            return Ok(());
        }
        ensure!(proposed <= self.apply_pointer.load(Ordering::SeqCst));

        info!("found a newer snapshot@{proposed}. moving the snapshot boundary");
        let term = self.get_entry(proposed).await?.this_clock.term;
        let config = {
            let i = self
                .find_last_membership_index(proposed)
                .await?
                .ok_or(crate::Error::LogStateError)?;
            self.try_read_membership_change(i)
                .await?
                .ok_or(crate::Error::LogStateError)?
        };
        let clock = Clock {
            term,
            index: proposed,
        };
        self.storage.save_snapshot_meta(clock, config.clone()).await?;
        *self.snapshot_meta.lock() = (clock, config);

        self.app.delete_snapshots_before(proposed).await?;
        Ok(())
    }

    /// Drop journal segments wholly below the snapshot boundary.
    pub async fn advance_compaction(&self) -> Result<()> {
        let boundary = self.snapshot_clock().index;
        if boundary > 0 {
            self.storage.compact_before(boundary).await?;
        }
        Ok(())
    }

    pub fn applied_digest(&self) -> u64 {
        self.applied_digest.load(Ordering::SeqCst)
    }

    fn fold_digest(&self, index: Index, result: &[u8]) {
        // FNV-1a over (index, result)
        let mut h = self.applied_digest.load(Ordering::SeqCst);
        let mut step = |b: u8| {
            h ^= b as u64;
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        };
        for b in index.to_be_bytes() {
            step(b);
        }
        for b in result {
            step(*b);
        }
        self.applied_digest.store(h, Ordering::SeqCst);
    }
}
