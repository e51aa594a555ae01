use super::*;

use tokio::task::AbortHandle;

pub mod advance_apply;
pub mod advance_commit;
pub mod advance_kern;
pub mod advance_snapshot;
pub mod election;
pub mod heartbeat;
pub mod log_compaction;
pub mod query_execution;
pub mod replication;
pub mod stepdown;

/// Wrapper around an `AbortHandle` that aborts when it is dropped.
pub struct ThreadHandle(AbortHandle);
impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run one iteration in its own task so a panic doesn't take the
/// scheduling loop down with it.
pub(crate) async fn defensive_panic_guard<T: Send + 'static>(
    fut: impl std::future::Future<Output = Result<T>> + Send + 'static,
) -> Result<T> {
    match tokio::spawn(fut).await {
        Ok(r) => r,
        Err(e) => Err(anyhow::anyhow!("loop iteration panicked: {e}")),
    }
}
