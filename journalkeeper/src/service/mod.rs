//! The TCP service: accepts connections, decodes frames, dispatches to
//! the local `RaftProcess`, and writes replies. Responses are pipelined:
//! each request is handled in its own task and answered whenever it
//! finishes, matched by correlation id.

use super::*;

use crate::wire::{self, payload::error_payload, rpc_type, Frame, FrameHeader, Payload};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use process::*;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, warn};

/// Serve the Raft node on an already-bound listener until the task is
/// dropped.
pub async fn serve(node: RaftNode, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("accepted connection from {peer}");
        stream.set_nodelay(true).ok();
        let node = node.clone();
        tokio::spawn(async move {
            handle_connection(node, stream).await;
        });
    }
}

async fn handle_connection(node: RaftNode, stream: TcpStream) {
    let (r, w) = stream.into_split();
    let mut frames_in = FramedRead::new(r, LengthDelimitedCodec::new());
    let mut frames_out = FramedWrite::new(w, LengthDelimitedCodec::new());

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(bin) = rx.recv().await {
            if frames_out.send(bin).await.is_err() {
                break;
            }
        }
    });

    while let Some(chunk) = frames_in.next().await {
        let raw = match chunk {
            Ok(b) => b.freeze(),
            Err(_) => break,
        };
        let frame = match Frame::decode(raw) {
            Ok(f) => f,
            Err(e) => {
                // Slack is never tolerated; a peer speaking garbage is
                // disconnected.
                warn!("closing connection on codec error: {e}");
                break;
            }
        };
        let node = node.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let reply = dispatch(&node, frame).await;
            tx.send(reply.encode()).ok();
        });
    }
}

fn reply_frame(node: &RaftNode, req_header: &FrameHeader, payload: Bytes) -> Frame {
    Frame {
        header: FrameHeader {
            version: wire::VERSION,
            typ: rpc_type::response_of(req_header.typ),
            request_id: req_header.request_id,
            sender: node.selfid().to_string(),
            receiver: req_header.sender.clone(),
        },
        payload,
    }
}

fn err_payload(e: anyhow::Error) -> Bytes {
    match e.downcast_ref::<crate::Error>() {
        Some(known) => error_payload(known),
        None => {
            debug!("internal error on rpc: {e:#}");
            error_payload(&crate::Error::MalformedFrame)
        }
    }
}

async fn dispatch(node: &RaftNode, frame: Frame) -> Frame {
    let result = handle(node, frame.header.typ, frame.payload.clone()).await;
    let payload = match result {
        Ok(bin) => bin,
        Err(e) => err_payload(e),
    };
    reply_frame(node, &frame.header, payload)
}

async fn handle(node: &RaftNode, typ: i32, payload: Bytes) -> Result<Bytes> {
    let process = node.get_process()?;
    let bin = match typ {
        rpc_type::VOTE_REQUEST => {
            let req = request::RequestVote::from_bytes(payload)?;
            process.request_vote(req).await?.to_bytes()
        }
        rpc_type::APPEND_ENTRIES_REQUEST => {
            let req = request::AppendEntries::from_bytes(payload)?;
            process.append_entries(req).await?.to_bytes()
        }
        rpc_type::INSTALL_SNAPSHOT_REQUEST => {
            let req = request::InstallSnapshot::from_bytes(payload)?;
            process.install_snapshot(req).await?.to_bytes()
        }
        rpc_type::TIMEOUT_NOW_REQUEST => {
            let _ = request::TimeoutNow::from_bytes(payload)?;
            process.timeout_now().await?.to_bytes()
        }
        rpc_type::UPDATE_CLUSTER_STATE_REQUEST => {
            let req = request::UpdateClusterState::from_bytes(payload)?;
            process.update_cluster_state(req).await?.to_bytes()
        }
        rpc_type::QUERY_CLUSTER_STATE_REQUEST => {
            let req = request::QueryClusterState::from_bytes(payload)?;
            process.query_cluster_state(req).await?.to_bytes()
        }
        rpc_type::GET_SERVERS_REQUEST => {
            let _ = request::GetServers::from_bytes(payload)?;
            process.request_cluster_info().await?.to_bytes()
        }
        rpc_type::UPDATE_VOTERS_REQUEST => {
            let req = request::UpdateVoters::from_bytes(payload)?;
            process.update_voters(req).await?.to_bytes()
        }
        rpc_type::CONVERT_ROLL_REQUEST => {
            let req = request::ConvertRoll::from_bytes(payload)?;
            process.convert_roll(req).await?.to_bytes()
        }
        rpc_type::DISABLE_LEADER_WRITE_REQUEST => {
            let req = request::DisableLeaderWrite::from_bytes(payload)?;
            process.disable_leader_write(req).await?.to_bytes()
        }
        rpc_type::CREATE_TRANSACTION_REQUEST => {
            let _ = request::CreateTransaction::from_bytes(payload)?;
            process.create_transaction().await?.to_bytes()
        }
        rpc_type::COMPLETE_TRANSACTION_REQUEST => {
            let req = request::CompleteTransaction::from_bytes(payload)?;
            process.complete_transaction(req).await?.to_bytes()
        }
        rpc_type::OPENING_TRANSACTIONS_REQUEST => {
            let _ = request::OpeningTransactions::from_bytes(payload)?;
            process.opening_transactions().await?.to_bytes()
        }
        rpc_type::WATCH_REQUEST => {
            let req = request::Watch::from_bytes(payload)?;
            process.watch(req).await?.to_bytes()
        }
        other => return Err(crate::Error::UnknownType(other).into()),
    };
    Ok(bin)
}
