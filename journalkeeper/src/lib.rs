#![deny(unused_must_use)]

pub mod process;

pub mod client;
pub mod journal;
pub mod service;
pub mod wire;

mod config;
mod error;
mod event;
mod node;
mod requester;

pub use config::RaftConfig;
pub use error::Error;
pub use event::ClusterEvent;
pub use node::{RaftDriver, RaftNode};
pub use process::{
    Consistency, ResponseLevel, Roll, StateMachine, UpdateRequest, RAFT_PARTITION,
};

use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of a server in the cluster (a socket address).
#[derive(
    serde::Serialize,
    serde::Deserialize,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Debug,
    derive_more::Display,
    derive_more::FromStr,
)]
pub struct NodeId(std::net::SocketAddr);

impl NodeId {
    pub fn new(addr: std::net::SocketAddr) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> std::net::SocketAddr {
        self.0
    }
}
