//! Backend adapter contract
//!
//! Dispatchers talk to Redis only through these traits. Implementations
//! never invoke a handler or reply callback synchronously from `connect` or
//! `command_argv`; every completion arrives on a later event loop iteration.

use super::contents::Contents;
use super::resp::RespValue;
use crate::core::HostAndPort;
use std::io;

/// Connection-level failure reported by an adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("I/O error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },
    #[error("connection closed by peer")]
    Eof,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("no cluster node available for the command")]
    ClusterNotConnected,
    #[error("cluster node connection lost")]
    ClusterConnectionLost,
    #[error("{0}")]
    Other(String),
}

impl From<io::Error> for ContextError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof => ContextError::Eof,
            io::ErrorKind::OutOfMemory => ContextError::OutOfMemory,
            kind => ContextError::Io {
                kind,
                message: error.to_string(),
            },
        }
    }
}

/// Reply callback. `FnMut` because subscriptions deliver many replies.
pub type ReplyCallback = Box<dyn FnMut(Result<RespValue, ContextError>)>;

pub struct ConnectionHandlers {
    pub on_connect: Box<dyn FnOnce(Result<(), ContextError>)>,
    pub on_disconnect: Box<dyn FnOnce(Result<(), ContextError>)>,
}

/// Opens connections to a single Redis server
pub trait RedisSystem {
    fn connect(
        &self,
        address: &HostAndPort,
        handlers: ConnectionHandlers,
    ) -> Result<Box<dyn RedisConnection>, ContextError>;
}

/// A live link to one server. Dropping it frees the link without invoking
/// any further callbacks.
pub trait RedisConnection {
    fn command_argv(
        &mut self,
        contents: &Contents,
        on_reply: ReplyCallback,
    ) -> Result<(), ContextError>;
}

pub struct ClusterHandlers {
    pub on_node_connect: Box<dyn FnMut(&HostAndPort, Result<(), ContextError>)>,
    pub on_node_disconnect: Box<dyn FnMut(&HostAndPort, Result<(), ContextError>)>,
    /// No node link is left
    pub on_cluster_lost: Box<dyn FnOnce(ContextError)>,
}

/// Opens slot-routing connections to a Redis Cluster
pub trait ClusterSystem {
    fn connect(
        &self,
        seeds: &[HostAndPort],
        handlers: ClusterHandlers,
    ) -> Result<Box<dyn ClusterConnection>, ContextError>;
}

pub trait ClusterConnection {
    /// Send to the node owning the slot of `routing_key`
    fn command_argv(
        &mut self,
        routing_key: &str,
        contents: &Contents,
        on_reply: ReplyCallback,
    ) -> Result<(), ContextError>;

    /// Forget a node whose link went down
    fn detach_node(&mut self, address: &HostAndPort);
}
