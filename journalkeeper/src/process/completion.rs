use super::*;

use tokio::sync::oneshot;

/// Settles a pending client response once its requested stage of
/// progress is reached, or fails it.
pub struct Completion(oneshot::Sender<std::result::Result<Option<Bytes>, crate::Error>>);

impl Completion {
    /// Resolve with the applied result (`All`) or null (lower levels).
    pub fn settle(self, v: Option<Bytes>) {
        self.0.send(Ok(v)).ok();
    }

    pub fn fail(self, e: crate::Error) {
        self.0.send(Err(e)).ok();
    }
}

pub type CompletionReceiver =
    oneshot::Receiver<std::result::Result<Option<Bytes>, crate::Error>>;

pub fn prepare_completion() -> (Completion, CompletionReceiver) {
    let (tx, rx) = oneshot::channel();
    (Completion(tx), rx)
}
