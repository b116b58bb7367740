/// Asynchronous Redis command dispatch for the shared data layer
///
/// Key pieces:
/// - RESP framing and the reply tree handed to callers
/// - Backend adapter traits with TCP and cluster implementations
/// - Slot-based routing with MOVED/ASK redirection
/// - Single-instance and cluster dispatchers behind one trait
pub mod cluster;
pub mod cluster_client;
pub mod connection;
pub mod contents;
pub mod dispatcher;
pub mod general;
pub mod pending;
pub mod redirect;
pub mod reply;
pub mod resp;
pub mod single;
pub mod slots;
pub mod system;

pub use cluster::ClusterCommandDispatcher;
pub use cluster_client::{RedisClusterSystem, DEFAULT_MAX_REDIRECTS};
pub use connection::TcpRedisSystem;
pub use contents::{Contents, ContentsBuilder};
pub use dispatcher::{
    create, create_with_systems, AsyncCommandDispatcher, BackendSystems, CommandCb, ConnectAck,
    DisconnectCb, DispatcherOptions, ServiceState,
};
pub use reply::{Reply, ReplyType};
pub use resp::{RespEncoder, RespParseError, RespParser, RespValue};
pub use single::RedisCommandDispatcher;
pub use system::{
    ClusterConnection, ClusterHandlers, ClusterSystem, ConnectionHandlers, ContextError,
    RedisConnection, RedisSystem, ReplyCallback,
};
