//! Typed client of the wire protocol, used for both peer RPCs and the
//! client router. One TCP connection per remote; requests are pipelined
//! and matched back by correlation id.

use super::*;

use crate::wire::{self, Frame, FrameHeader, Payload};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use process::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, warn};

type Pending = Arc<spin::Mutex<HashMap<u64, oneshot::Sender<Result<Frame>>>>>;

struct Io {
    tx: mpsc::UnboundedSender<(Frame, oneshot::Sender<Result<Frame>>)>,
}

pub struct Inner {
    sender_label: String,
    peer: NodeId,
    io: spin::Mutex<Option<Io>>,
    next_request_id: AtomicU64,
}

#[derive(shrinkwraprs::Shrinkwrap, Clone)]
pub struct Connection(Arc<Inner>);

impl Connection {
    pub fn new(sender_label: String, peer: NodeId) -> Self {
        let inner = Inner {
            sender_label,
            peer,
            io: spin::Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        };
        Self(Arc::new(inner))
    }

    /// (Re)connect lazily; a broken pipe drains its pending calls with an
    /// error and the next call dials again.
    async fn io_sender(
        &self,
    ) -> Result<mpsc::UnboundedSender<(Frame, oneshot::Sender<Result<Frame>>)>> {
        if let Some(io) = &*self.io.lock() {
            if !io.tx.is_closed() {
                return Ok(io.tx.clone());
            }
        }

        let stream = tokio::net::TcpStream::connect(self.peer.addr()).await?;
        stream.set_nodelay(true).ok();
        let (r, w) = stream.into_split();
        let mut frames_in = FramedRead::new(r, LengthDelimitedCodec::new());
        let mut frames_out = FramedWrite::new(w, LengthDelimitedCodec::new());

        let (tx, mut rx) = mpsc::unbounded_channel::<(Frame, oneshot::Sender<Result<Frame>>)>();
        let pending: Pending = Arc::new(spin::Mutex::new(HashMap::new()));

        let writer_pending = pending.clone();
        tokio::spawn(async move {
            while let Some((frame, completer)) = rx.recv().await {
                let request_id = frame.header.request_id;
                writer_pending.lock().insert(request_id, completer);
                if let Err(e) = frames_out.send(frame.encode()).await {
                    if let Some(c) = writer_pending.lock().remove(&request_id) {
                        c.send(Err(anyhow::anyhow!("connection write failed: {e}")))
                            .ok();
                    }
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let peer = self.peer;
        tokio::spawn(async move {
            while let Some(chunk) = frames_in.next().await {
                let raw = match chunk {
                    Ok(b) => b.freeze(),
                    Err(e) => {
                        debug!("connection to {peer} broke: {e}");
                        break;
                    }
                };
                let frame = match Frame::decode(raw) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("dropping malformed frame from {peer}: {e}");
                        break;
                    }
                };
                if let Some(c) = reader_pending.lock().remove(&frame.header.request_id) {
                    c.send(Ok(frame)).ok();
                }
            }
            // Fail whatever is still in flight.
            let mut p = reader_pending.lock();
            for (_, c) in p.drain() {
                c.send(Err(anyhow::anyhow!("connection to {peer} closed"))).ok();
            }
        });

        *self.io.lock() = Some(Io { tx: tx.clone() });
        Ok(tx)
    }

    async fn call<Req: Payload, Resp: Payload>(&self, req: Req) -> Result<Resp> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let frame = Frame {
            header: FrameHeader {
                version: wire::VERSION,
                typ: Req::TYPE,
                request_id,
                sender: self.sender_label.clone(),
                receiver: self.peer.to_string(),
            },
            payload: req.to_bytes(),
        };

        let tx = self.io_sender().await?;
        let (completer, rx) = oneshot::channel();
        tx.send((frame, completer))
            .map_err(|_| anyhow::anyhow!("connection to {} closed", self.peer))?;
        let resp_frame = rx.await.map_err(|_| crate::Error::Stopped)??;

        anyhow::ensure!(
            resp_frame.header.typ == Resp::TYPE,
            crate::Error::UnknownType(resp_frame.header.typ)
        );
        let resp = Resp::from_bytes(resp_frame.payload)?;
        Ok(resp)
    }
}

impl Connection {
    pub async fn request_vote(&self, req: request::RequestVote) -> Result<response::RequestVote> {
        self.call(req).await
    }

    pub async fn send_append_entries(
        &self,
        req: request::AppendEntries,
    ) -> Result<response::AppendEntries> {
        self.call(req).await
    }

    pub async fn install_snapshot(
        &self,
        req: request::InstallSnapshot,
    ) -> Result<response::InstallSnapshot> {
        self.call(req).await
    }

    pub async fn send_timeout_now(&self) -> Result<()> {
        let _: response::TimeoutNow = self.call(request::TimeoutNow).await?;
        Ok(())
    }

    pub async fn update_cluster_state(
        &self,
        req: request::UpdateClusterState,
    ) -> Result<response::UpdateClusterState> {
        self.call(req).await
    }

    pub async fn query_cluster_state(
        &self,
        req: request::QueryClusterState,
    ) -> Result<response::QueryClusterState> {
        self.call(req).await
    }

    pub async fn get_servers(&self) -> Result<response::ClusterInfo> {
        self.call(request::GetServers).await
    }

    pub async fn update_voters(&self, req: request::UpdateVoters) -> Result<()> {
        let _: response::UpdateVoters = self.call(req).await?;
        Ok(())
    }

    pub async fn convert_roll(&self, req: request::ConvertRoll) -> Result<()> {
        let _: response::ConvertRoll = self.call(req).await?;
        Ok(())
    }

    pub async fn disable_leader_write(
        &self,
        req: request::DisableLeaderWrite,
    ) -> Result<response::DisableLeaderWrite> {
        self.call(req).await
    }

    pub async fn create_transaction(&self) -> Result<response::CreateTransaction> {
        self.call(request::CreateTransaction).await
    }

    pub async fn complete_transaction(&self, req: request::CompleteTransaction) -> Result<()> {
        let _: response::CompleteTransaction = self.call(req).await?;
        Ok(())
    }

    pub async fn opening_transactions(&self) -> Result<response::OpeningTransactions> {
        self.call(request::OpeningTransactions).await
    }

    pub async fn watch(&self, req: request::Watch) -> Result<response::Watch> {
        self.call(req).await
    }
}
